//! Fixed layout constants and style tables (sizes in sheet millimeters).

use crate::drawing::{FillStyle, GlyphId};

// ── Sheet geometry (A3 landscape) ───────────────────────────────────
pub(super) const DRAWING_WIDTH: f64 = 420.0;
pub(super) const DRAWING_HEIGHT: f64 = 282.0;

/// Notes closer than this to the paper edge shift inward when `limit_a3`
/// is on.
pub(super) const A3_LEFT_EDGE: f64 = 5.0;
pub(super) const A3_RIGHT_EDGE: f64 = 415.0;

// ── Beat compression ────────────────────────────────────────────────
/// Compression units per size-factor unit.
pub(super) const BEAT_RESOLUTION: f64 = 64.0;
/// Millimeters per compression unit before the spread cap.
pub(super) const Y_SCALE: f64 = 4.0;

// ── Measure bars and flags ──────────────────────────────────────────
pub(super) const MEASURE_BAR_GAP: f64 = 1.0;
pub(super) const MEASURE_BAR_HEIGHT: f64 = 0.5;
pub(super) const FLAG_STEM_LENGTH: f64 = 3.2;
pub(super) const FLAG_WIDTH: f64 = 1.1;

// ── Jump lines ──────────────────────────────────────────────────────
pub(super) const ARROW_LENGTH: f64 = 2.5;
pub(super) const ARROW_HALF_WIDTH: f64 = 1.0;

/// Duration bucket key for the style tables (`"d8"`, `"err"` …).
pub(super) fn duration_key(duration: u32) -> &'static str {
    match duration {
        1 => "d1",
        2 => "d2",
        3 => "d3",
        4 => "d4",
        6 => "d6",
        8 => "d8",
        12 => "d12",
        16 => "d16",
        24 => "d24",
        32 => "d32",
        48 => "d48",
        64 => "d64",
        _ => "err",
    }
}

/// Visual style of a note head: size factor, fill, dot.
pub(super) struct NoteStyle {
    pub size_factor: f64,
    pub fill: FillStyle,
    pub dotted: bool,
}

pub(super) fn duration_style(key: &str) -> NoteStyle {
    let (size_factor, fill, dotted) = match key {
        "d64" => (0.9, FillStyle::Empty, false),
        "d48" => (0.7, FillStyle::Empty, true),
        "d32" => (0.7, FillStyle::Empty, false),
        "d24" => (0.7, FillStyle::Filled, true),
        "d16" => (0.7, FillStyle::Filled, false),
        "d12" => (0.5, FillStyle::Filled, true),
        "d8" => (0.5, FillStyle::Filled, false),
        "d6" => (0.3, FillStyle::Filled, true),
        "d4" => (0.3, FillStyle::Filled, false),
        "d3" => (0.1, FillStyle::Filled, true),
        "d2" => (0.1, FillStyle::Filled, false),
        "d1" => (0.05, FillStyle::Filled, false),
        _ => (2.0, FillStyle::Filled, false),
    };
    NoteStyle { size_factor, fill, dotted }
}

/// Visual style of a rest: size factors, glyph, dot.
pub(super) struct RestStyle {
    pub size_factor: (f64, f64),
    pub glyph: GlyphId,
    pub dotted: bool,
}

pub(super) fn rest_style(key: &str) -> RestStyle {
    let (size_factor, glyph, dotted) = match key {
        "d64" => ((0.9, 0.9), GlyphId::RestWhole, false),
        "d48" => ((0.7, 0.7), GlyphId::RestHalf, true),
        "d32" => ((0.7, 0.7), GlyphId::RestHalf, false),
        "d24" => ((0.7, 0.7), GlyphId::RestQuarter, true),
        "d16" => ((0.7, 0.7), GlyphId::RestQuarter, false),
        "d12" => ((0.5, 0.5), GlyphId::RestEighth, true),
        "d8" => ((0.5, 0.5), GlyphId::RestEighth, false),
        "d6" => ((0.4, 0.4), GlyphId::RestSixteenth, true),
        "d4" => ((0.4, 0.4), GlyphId::RestSixteenth, false),
        "d3" => ((0.3, 0.3), GlyphId::RestThirtysecond, true),
        "d2" => ((0.3, 0.3), GlyphId::RestThirtysecond, false),
        "d1" => ((0.3, 0.3), GlyphId::RestSixtyfourth, false),
        _ => ((2.0, 2.0), GlyphId::Error, false),
    };
    RestStyle { size_factor, glyph, dotted }
}

/// Number of flag strokes a duration carries when beaming is enabled.
pub(super) fn flag_count(key: &str) -> u32 {
    match key {
        "d8" | "d12" => 1,
        "d4" | "d6" => 2,
        "d2" | "d3" => 3,
        "d1" => 4,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_cover_the_duration_set() {
        for d in [1u32, 2, 3, 4, 6, 8, 12, 16, 24, 32, 48, 64] {
            assert_ne!(duration_key(d), "err");
        }
        assert_eq!(duration_key(5), "err");
        assert_eq!(duration_key(128), "err");
    }

    #[test]
    fn longer_notes_are_larger() {
        assert!(duration_style("d64").size_factor > duration_style("d16").size_factor);
        assert!(duration_style("d16").size_factor > duration_style("d4").size_factor);
    }

    #[test]
    fn whole_and_half_notes_are_empty() {
        assert_eq!(duration_style("d64").fill, FillStyle::Empty);
        assert_eq!(duration_style("d32").fill, FillStyle::Empty);
        assert_eq!(duration_style("d16").fill, FillStyle::Filled);
    }

    #[test]
    fn dotted_buckets_carry_the_dot() {
        assert!(duration_style("d24").dotted);
        assert!(!duration_style("d16").dotted);
        assert!(rest_style("d12").dotted);
    }
}
