//! harplib — ABC notation to table-harp tablature sheets.
//!
//! The pipeline turns ABC source text into positioned, format-independent
//! drawing primitives: each note lands on the vertical strip of one harp
//! string (X = pitch) with vertical position encoding time (Y = compressed
//! beat). Downstream renderers translate the resulting [`drawing::Sheet`]
//! one to one into PDF, SVG or a screen canvas.
//!
//! # Example
//! ```
//! let abc = "X:1\nT:Ode\nM:4/4\nK:C\nCDEF|GABc|\n";
//! let result = harplib::render_extract(abc, 0).unwrap();
//! assert!(result.errors.is_empty());
//! assert!(!result.sheet.children.is_empty());
//! ```

pub mod abc;
pub mod adapter;
pub mod config;
pub mod drawing;
pub mod error;
pub mod model;
pub mod playback;
pub mod renderer;
pub mod transform;

pub use adapter::{parse, save_format, CONFIG_SEPARATOR};
pub use config::{ConfStack, ConfValue};
pub use drawing::Sheet;
pub use error::{HarpError, ParseError, Result, Warning};
pub use model::Song;
pub use playback::{events_to_json, player_events, PlayerEvent};
pub use renderer::layout;

/// The complete output of one render pass.
#[derive(Debug)]
pub struct RenderResult {
    pub sheet: Sheet,
    pub song: Song,
    /// Hit-box SVG layer for cross-highlighting in the editor.
    pub svg: String,
    /// Parse errors (rendering continues on partial input).
    pub errors: Vec<ParseError>,
    /// Player event list for the audio component.
    pub events: Vec<PlayerEvent>,
}

/// Run the whole pipeline on a fresh configuration stack: defaults, plus
/// the configuration block embedded in `text` when present.
pub fn render_extract(text: &str, extract: usize) -> Result<RenderResult> {
    let mut conf = ConfStack::with_defaults();
    render_with_conf(text, &mut conf, extract)
}

/// Run the pipeline against a caller-managed configuration stack.
///
/// The embedded configuration block (if any) is pushed as a layer and stays
/// active for follow-up renders. On any error the stack is rolled back to
/// its prior depth, so a failed render never leaks layers.
pub fn render_with_conf(
    text: &str,
    conf: &mut ConfStack,
    extract: usize,
) -> Result<RenderResult> {
    let depth = conf.depth();
    let outcome = render_inner(text, conf, extract);
    if outcome.is_err() {
        conf.reset_to(depth);
    }
    outcome
}

fn render_inner(text: &str, conf: &mut ConfStack, extract: usize) -> Result<RenderResult> {
    let parsed = adapter::parse(text);
    if let Some(block) = &parsed.config {
        conf.push(ConfValue::from(block.clone()));
    }

    let settings = transform::Settings::from_conf(conf)?;
    let mut song = transform::transform(&parsed.tune, &settings);
    song.checksum = parsed.checksum.clone();

    let sheet = renderer::layout(&song, conf, extract)?;
    let events = playback::player_events(&parsed.tune);

    Ok(RenderResult {
        sheet,
        song,
        svg: parsed.svg,
        errors: parsed.tune.errors.clone(),
        events,
    })
}
