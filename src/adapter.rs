//! Front-end facade: splits the embedded configuration block off the source
//! text, runs the ABC producer, assigns line/column positions to every
//! symbol, and annotates a hit-box SVG layer used by the UI for
//! cross-highlighting and click-to-edit.

use serde_json::Value;

use crate::abc::{self, Tune};
use crate::error::ParseError;

/// Separator line that introduces the embedded configuration block.
/// Kept literally for compatibility with sheet files from the zupfnoter
/// ecosystem.
pub const CONFIG_SEPARATOR: &str = "%%%%zupfnoter.config";

/// Everything the pipeline needs from the source text.
#[derive(Debug, Clone)]
pub struct ParsedInput {
    pub tune: Tune,
    /// The embedded configuration block, when present and well-formed.
    pub config: Option<Value>,
    /// Hit-box SVG layer with one `abcref` rectangle per symbol.
    pub svg: String,
    /// FNV-1a hash of the full source text, hex encoded.
    pub checksum: String,
}

/// Split source text into the ABC part and the configuration block.
/// A malformed block is reported as a parse error on its first line.
pub fn split_config(text: &str) -> (&str, Option<Value>, Vec<ParseError>) {
    let mut errors = Vec::new();
    match text.find(CONFIG_SEPARATOR) {
        None => (text, None, errors),
        Some(at) => {
            let abc_part = &text[..at];
            let rest = &text[at + CONFIG_SEPARATOR.len()..];
            match serde_json::from_str::<Value>(rest.trim()) {
                Ok(v) => (abc_part, Some(v), errors),
                Err(e) => {
                    let sep_line = text[..at].lines().count() + 1;
                    errors.push(ParseError::new(
                        format!("cannot read configuration block: {e}"),
                        sep_line,
                        1,
                    ));
                    (abc_part, None, errors)
                }
            }
        }
    }
}

/// Parse source text (ABC plus optional configuration block).
pub fn parse(text: &str) -> ParsedInput {
    let (abc_part, config, mut split_errors) = split_config(text);

    let mut tune = abc::parse_abc(abc_part);
    tune.errors.append(&mut split_errors);

    let positions = LineIndex::new(abc_part);
    for voice in &mut tune.voices {
        for sym in &mut voice.symbols {
            sym.start_pos = positions.position(sym.start_char);
            sym.end_pos = positions.position(sym.end_char);
        }
    }

    let svg = abcref_svg(&tune);
    let checksum = fnv1a_hex(text);

    ParsedInput { tune, config, svg, checksum }
}

/// Compose the persisted form: ABC text with the configuration block
/// appended after the separator line.
pub fn save_format(abc_text: &str, config: &Value) -> String {
    let body = serde_json::to_string_pretty(config).unwrap_or_else(|_| "{}".to_string());
    let mut out = String::with_capacity(abc_text.len() + body.len() + 32);
    out.push_str(abc_text);
    if !abc_text.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(CONFIG_SEPARATOR);
    out.push('\n');
    out.push_str(&body);
    out.push('\n');
    out
}

/// Maps char offsets to 1-based (line, column) pairs.
struct LineIndex {
    /// Char offset of each line start.
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        let mut starts = vec![0];
        for (i, c) in text.chars().enumerate() {
            if c == '\n' {
                starts.push(i + 1);
            }
        }
        Self { starts }
    }

    fn position(&self, offset: usize) -> (usize, usize) {
        let line = match self.starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        (line + 1, offset - self.starts[line] + 1)
    }
}

// ─── abcref hit boxes ───────────────────────────────────────────────

/// Accumulates SVG elements and produces the final string.
struct SvgBuilder {
    elements: Vec<String>,
    width: f64,
    height: f64,
}

impl SvgBuilder {
    fn new(width: f64, height: f64) -> Self {
        Self { elements: Vec::new(), width, height }
    }

    fn build(self) -> String {
        let mut svg = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {} {}" width="{}" height="{}">"#,
            self.width, self.height, self.width, self.height
        );
        svg.push('\n');
        for el in &self.elements {
            svg.push_str("  ");
            svg.push_str(el);
            svg.push('\n');
        }
        svg.push_str("</svg>\n");
        svg
    }

    /// A symbol group wrapping a transparent hit-box rectangle. The id
    /// `_<type>_<startChar>_<endChar>_` is what the UI matches against
    /// source selections.
    fn abcref(&mut self, id: &str, x: f64, y: f64, w: f64, h: f64) {
        self.elements.push(format!(
            r#"<g class="{id}"><rect class="abcref" id="{id}" x="{x:.1}" y="{y:.1}" width="{w:.1}" height="{h:.1}" fill="transparent"/></g>"#
        ));
    }
}

const REF_CELL_W: f64 = 14.0;
const REF_CELL_H: f64 = 30.0;

/// Build the hit-box layer: one transparent rectangle per symbol, laid out
/// on a simple per-voice grid.
fn abcref_svg(tune: &Tune) -> String {
    let max_syms = tune.voices.iter().map(|v| v.symbols.len()).max().unwrap_or(0);
    let width = (max_syms as f64 + 1.0) * REF_CELL_W;
    let height = (tune.voices.len() as f64 + 1.0) * REF_CELL_H;
    let mut svg = SvgBuilder::new(width.max(REF_CELL_W), height.max(REF_CELL_H));

    for (row, voice) in tune.voices.iter().enumerate() {
        for (col, sym) in voice.symbols.iter().enumerate() {
            let id = format!("_{}_{}_{}_", sym.kind as u8, sym.start_char, sym.end_char);
            svg.abcref(
                &id,
                col as f64 * REF_CELL_W,
                row as f64 * REF_CELL_H,
                REF_CELL_W - 2.0,
                REF_CELL_H - 6.0,
            );
        }
    }
    svg.build()
}

/// FNV-1a, 64 bit, hex encoded.
fn fnv1a_hex(text: &str) -> String {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in text.as_bytes() {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    format!("{hash:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_config_block() {
        let text = "X:1\nK:C\nCDEF|\n%%%%zupfnoter.config\n{\"extract\": {\"0\": {\"title\": \"t\"}}}\n";
        let (abc_part, config, errors) = split_config(text);
        assert!(errors.is_empty());
        assert!(abc_part.ends_with("CDEF|\n"));
        let config = config.expect("config block parsed");
        assert_eq!(config["extract"]["0"]["title"], "t");
    }

    #[test]
    fn malformed_config_reports_error() {
        let text = "X:1\nK:C\nC|\n%%%%zupfnoter.config\n{not json\n";
        let (_, config, errors) = split_config(text);
        assert!(config.is_none());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line, 4);
    }

    #[test]
    fn positions_are_assigned_from_offsets() {
        let parsed = parse("X:1\nM:4/4\nK:C\nCD|\n");
        let voice = &parsed.tune.voices[0];
        let first = &voice.symbols[0];
        assert_eq!(first.start_pos, (4, 1));
        let second = &voice.symbols[1];
        assert_eq!(second.start_pos, (4, 2));
    }

    #[test]
    fn svg_carries_abcref_rect_per_symbol() {
        let parsed = parse("X:1\nM:4/4\nK:C\nCD|\n");
        let rects = parsed.svg.matches("class=\"abcref\"").count();
        assert_eq!(rects, parsed.tune.voices[0].symbols.len());
        // note type tag is 8
        assert!(parsed.svg.contains("id=\"_8_14_"));
    }

    #[test]
    fn save_format_roundtrips_through_split() {
        let config = serde_json::json!({"extract": {"0": {"title": "x"}}});
        let saved = save_format("X:1\nK:C\nC|\n", &config);
        let (abc_part, parsed, errors) = split_config(&saved);
        assert!(errors.is_empty());
        assert_eq!(abc_part, "X:1\nK:C\nC|\n");
        assert_eq!(parsed, Some(config));
    }

    #[test]
    fn checksum_is_stable() {
        let a = parse("X:1\nK:C\nC|\n");
        let b = parse("X:1\nK:C\nC|\n");
        let c = parse("X:1\nK:C\nD|\n");
        assert_eq!(a.checksum, b.checksum);
        assert_ne!(a.checksum, c.checksum);
    }
}
