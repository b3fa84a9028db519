//! Drawing model — the format-independent output of the layout engine.
//!
//! A [`Sheet`] is an ordered list of drawables with pre-computed positions
//! in sheet millimeters, ready for a dumb renderer (PDF, SVG, canvas) to
//! translate one to one. Drawables carry a back-reference to the source
//! entity (`origin`) and an optional `conf_key` so the UI can map clicks
//! back to the text and offer per-instance configuration overrides.

use serde::Serialize;

use crate::model::Origin;

/// A point in sheet millimeters. X grows to the right, Y down the page.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn offset(&self, dx: f64, dy: f64) -> Point {
        Point::new(self.x + dx, self.y + dy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FillStyle {
    Filled,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LineStyle {
    Solid,
    Dashed,
    Dotted,
}

/// Text styles understood by the downstream renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TextStyle {
    Smaller,
    Small,
    Regular,
    Bold,
    Large,
}

impl TextStyle {
    pub fn from_name(name: &str) -> TextStyle {
        match name {
            "smaller" => TextStyle::Smaller,
            "small" => TextStyle::Small,
            "bold" => TextStyle::Bold,
            "large" => TextStyle::Large,
            _ => TextStyle::Regular,
        }
    }

    /// Nominal font size in points, used for collision estimates.
    pub fn font_size(self) -> f64 {
        match self {
            TextStyle::Smaller => 6.0,
            TextStyle::Small => 9.0,
            TextStyle::Regular => 12.0,
            TextStyle::Bold => 12.0,
            TextStyle::Large => 20.0,
        }
    }
}

/// Path commands. `Move`/`LineTo`/`CurveTo` are absolute, `LineBy` and
/// `CurveBy` relative to the current point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum PathCommand {
    Move(Point),
    LineTo(Point),
    LineBy(f64, f64),
    CurveBy(f64, f64, f64, f64, f64, f64),
    Close,
}

/// A note head.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ellipse {
    pub center: Point,
    /// (rx, ry) radii in millimeters.
    pub size: (f64, f64),
    pub fill: FillStyle,
    pub dotted: bool,
    pub color: String,
    pub line_width: f64,
    pub visible: bool,
    pub origin: Option<Origin>,
    pub conf_key: Option<String>,
}

/// The light line connecting successive notes of one voice, and the dashed
/// synchronization lines within chords and across voices.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowLine {
    pub from: Point,
    pub to: Point,
    pub style: LineStyle,
    pub color: String,
    pub line_width: f64,
    pub visible: bool,
    pub origin: Option<Origin>,
}

/// An arbitrary path: jump lines, arrowheads, measure bars, note flags.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathShape {
    pub commands: Vec<PathCommand>,
    pub filled: bool,
    pub color: String,
    pub line_width: f64,
    pub visible: bool,
    pub origin: Option<Origin>,
    pub conf_key: Option<String>,
}

/// Free or notebound text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationText {
    pub position: Point,
    pub text: String,
    pub style: TextStyle,
    pub color: String,
    pub visible: bool,
    pub origin: Option<Origin>,
    pub conf_key: Option<String>,
}

/// Identifier of a pre-computed glyph outline (see the renderer's catalog).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GlyphId {
    RestWhole,
    RestHalf,
    RestQuarter,
    RestEighth,
    RestSixteenth,
    RestThirtysecond,
    RestSixtyfourth,
    Fermata,
    Emphasis,
    Error,
}

/// A glyph placed on the sheet (rests, fermata, emphasis).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlyphSign {
    pub center: Point,
    /// (width, height) in millimeters.
    pub size: (f64, f64),
    pub glyph: GlyphId,
    pub dotted: bool,
    pub color: String,
    pub line_width: f64,
    pub visible: bool,
    pub origin: Option<Origin>,
}

/// An external image reference (e.g. a logo placed on the sheet).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRef {
    pub position: Point,
    pub url: String,
    pub height: f64,
    pub visible: bool,
}

/// One drawable of a sheet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Drawable {
    Ellipse(Ellipse),
    FlowLine(FlowLine),
    Path(PathShape),
    Annotation(AnnotationText),
    Glyph(GlyphSign),
    Image(ImageRef),
}

impl Drawable {
    pub fn visible(&self) -> bool {
        match self {
            Drawable::Ellipse(e) => e.visible,
            Drawable::FlowLine(f) => f.visible,
            Drawable::Path(p) => p.visible,
            Drawable::Annotation(a) => a.visible,
            Drawable::Glyph(g) => g.visible,
            Drawable::Image(i) => i.visible,
        }
    }

    pub fn origin(&self) -> Option<&Origin> {
        match self {
            Drawable::Ellipse(e) => e.origin.as_ref(),
            Drawable::FlowLine(f) => f.origin.as_ref(),
            Drawable::Path(p) => p.origin.as_ref(),
            Drawable::Annotation(a) => a.origin.as_ref(),
            Drawable::Glyph(g) => g.origin.as_ref(),
            Drawable::Image(_) => None,
        }
    }

    pub fn conf_key(&self) -> Option<&str> {
        match self {
            Drawable::Ellipse(e) => e.conf_key.as_deref(),
            Drawable::Path(p) => p.conf_key.as_deref(),
            Drawable::Annotation(a) => a.conf_key.as_deref(),
            _ => None,
        }
    }
}

/// Printer geometry forwarded to the paper renderers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrinterSpec {
    pub a3_offset: (f64, f64),
    pub a4_offset: (f64, f64),
    pub show_border: bool,
}

impl Default for PrinterSpec {
    fn default() -> Self {
        Self { a3_offset: (0.0, 0.0), a4_offset: (-5.0, 0.0), show_border: false }
    }
}

/// The layout result: drawables in paint order plus the active voice list
/// and printer geometry.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Sheet {
    pub children: Vec<Drawable>,
    /// 1-based indices of the voices that were laid out.
    pub active_voices: Vec<usize>,
    pub printer: PrinterSpec,
}

impl Sheet {
    /// Pairs of annotation drawables whose estimated text boxes overlap.
    /// Returns indices into `children`, each pair reported once.
    pub fn annotation_collisions(&self) -> Vec<(usize, usize)> {
        let boxes: Vec<(usize, Rect)> = self
            .children
            .iter()
            .enumerate()
            .filter_map(|(i, d)| match d {
                Drawable::Annotation(a) if a.visible => Some((i, annotation_box(a))),
                _ => None,
            })
            .collect();

        let mut hits = Vec::new();
        for (ai, (i, a)) in boxes.iter().enumerate() {
            for (j, b) in boxes.iter().skip(ai + 1) {
                if a.overlaps(b) {
                    hits.push((*i, *j));
                }
            }
        }
        hits
    }
}

#[derive(Debug, Clone, Copy)]
struct Rect {
    left: f64,
    top: f64,
    right: f64,
    bottom: f64,
}

impl Rect {
    fn overlaps(&self, other: &Rect) -> bool {
        self.left < other.right
            && other.left < self.right
            && self.top < other.bottom
            && other.top < self.bottom
    }
}

/// Estimated bounding box of an annotation. Text metrics are not available
/// at layout time; width is estimated from the glyph count.
const MM_PER_POINT: f64 = 0.352_778;
const AVG_GLYPH_WIDTH: f64 = 0.55;

fn annotation_box(a: &AnnotationText) -> Rect {
    let size_mm = a.style.font_size() * MM_PER_POINT;
    let widest = a.text.lines().map(|l| l.chars().count()).max().unwrap_or(0);
    let lines = a.text.lines().count().max(1);
    Rect {
        left: a.position.x,
        top: a.position.y - size_mm,
        right: a.position.x + widest as f64 * size_mm * AVG_GLYPH_WIDTH,
        bottom: a.position.y + (lines as f64 - 1.0) * size_mm * 1.2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotation(x: f64, y: f64, text: &str) -> Drawable {
        Drawable::Annotation(AnnotationText {
            position: Point::new(x, y),
            text: text.to_string(),
            style: TextStyle::Regular,
            color: "black".to_string(),
            visible: true,
            origin: None,
            conf_key: None,
        })
    }

    #[test]
    fn overlapping_annotations_are_flagged() {
        let sheet = Sheet {
            children: vec![
                annotation(10.0, 10.0, "eins"),
                annotation(11.0, 10.5, "zwei"),
                annotation(200.0, 200.0, "weit weg"),
            ],
            ..Sheet::default()
        };
        let hits = sheet.annotation_collisions();
        assert_eq!(hits, vec![(0, 1)]);
    }

    #[test]
    fn invisible_annotations_do_not_collide() {
        let mut a = annotation(10.0, 10.0, "eins");
        if let Drawable::Annotation(ann) = &mut a {
            ann.visible = false;
        }
        let sheet = Sheet {
            children: vec![a, annotation(10.0, 10.0, "zwei")],
            ..Sheet::default()
        };
        assert!(sheet.annotation_collisions().is_empty());
    }

    #[test]
    fn point_offset_translates() {
        let p = Point::new(1.0, 2.0).offset(3.0, -1.0);
        assert_eq!(p, Point::new(4.0, 1.0));
    }

    #[test]
    fn drawables_serialize_to_json() {
        let sheet = Sheet {
            children: vec![annotation(1.0, 2.0, "x")],
            active_voices: vec![1],
            printer: PrinterSpec::default(),
        };
        let json = serde_json::to_string(&sheet).expect("sheet serializes");
        assert!(json.contains("\"Annotation\""));
        assert!(json.contains("\"active_voices\":[1]"));
    }
}
