//! Catalog of rest/fermata/emphasis glyphs as pre-computed path-command
//! lists.
//!
//! Outlines are defined in a nominal box centered on the origin; the
//! renderer scales them to the requested size. Shapes are deliberately
//! simple — on a tablature sheet a rest only needs to be recognizable,
//! not engraved.

use crate::drawing::{GlyphId, PathCommand, Point};

/// A glyph outline: nominal extent and the commands that draw it.
pub struct GlyphOutline {
    /// Nominal (width, height) of the outline box.
    pub size: (f64, f64),
    pub commands: Vec<PathCommand>,
    pub filled: bool,
}

/// Look up the outline for a glyph id.
pub fn glyph_outline(id: GlyphId) -> GlyphOutline {
    match id {
        // hangs below its center line
        GlyphId::RestWhole => rect_outline(3.0, 1.2, 0.6),
        // sits on its center line
        GlyphId::RestHalf => rect_outline(3.0, 1.2, -0.6),
        GlyphId::RestQuarter => GlyphOutline {
            size: (1.6, 4.0),
            commands: vec![
                PathCommand::Move(Point::new(-0.5, -2.0)),
                PathCommand::LineBy(1.0, 1.2),
                PathCommand::LineBy(-0.8, 1.0),
                PathCommand::LineBy(0.9, 1.1),
                PathCommand::CurveBy(-1.2, -0.2, -1.2, 0.8, -0.3, 0.9),
                PathCommand::LineBy(-0.4, -0.4),
                PathCommand::LineBy(0.5, -1.4),
                PathCommand::LineBy(-0.8, -1.1),
                PathCommand::LineBy(0.8, -1.2),
                PathCommand::Close,
            ],
            filled: true,
        },
        GlyphId::RestEighth => hooked_rest(1),
        GlyphId::RestSixteenth => hooked_rest(2),
        GlyphId::RestThirtysecond => hooked_rest(3),
        GlyphId::RestSixtyfourth => hooked_rest(4),
        GlyphId::Fermata => GlyphOutline {
            size: (4.0, 2.4),
            commands: vec![
                PathCommand::Move(Point::new(-2.0, 1.0)),
                PathCommand::CurveBy(0.4, -2.6, 3.6, -2.6, 4.0, 0.0),
                PathCommand::LineBy(-0.4, 0.0),
                PathCommand::CurveBy(-0.4, -1.8, -2.8, -1.8, -3.2, 0.0),
                PathCommand::Close,
                PathCommand::Move(Point::new(-0.3, 0.6)),
                PathCommand::LineBy(0.6, 0.0),
                PathCommand::LineBy(0.0, 0.6),
                PathCommand::LineBy(-0.6, 0.0),
                PathCommand::Close,
            ],
            filled: true,
        },
        GlyphId::Emphasis => GlyphOutline {
            size: (3.0, 1.6),
            commands: vec![
                PathCommand::Move(Point::new(-1.5, -0.8)),
                PathCommand::LineBy(3.0, 0.8),
                PathCommand::LineBy(-3.0, 0.8),
            ],
            filled: false,
        },
        GlyphId::Error => GlyphOutline {
            size: (3.0, 3.0),
            commands: vec![
                PathCommand::Move(Point::new(-1.5, -1.5)),
                PathCommand::LineBy(3.0, 3.0),
                PathCommand::Move(Point::new(1.5, -1.5)),
                PathCommand::LineBy(-3.0, 3.0),
            ],
            filled: false,
        },
    }
}

/// Whole/half rest blocks: a filled bar above or below the center line.
fn rect_outline(w: f64, h: f64, y_offset: f64) -> GlyphOutline {
    GlyphOutline {
        size: (w, h),
        commands: vec![
            PathCommand::Move(Point::new(-w / 2.0, y_offset - h / 2.0)),
            PathCommand::LineBy(w, 0.0),
            PathCommand::LineBy(0.0, h),
            PathCommand::LineBy(-w, 0.0),
            PathCommand::Close,
        ],
        filled: true,
    }
}

/// Eighth and shorter rests: a slanted stem with `hooks` hook strokes.
fn hooked_rest(hooks: u32) -> GlyphOutline {
    let height = 3.0 + hooks as f64 * 0.8;
    let mut commands = vec![
        PathCommand::Move(Point::new(0.9, -height / 2.0)),
        PathCommand::LineBy(-1.4, height),
    ];
    for k in 0..hooks {
        let y = -height / 2.0 + 0.4 + k as f64 * 0.9;
        commands.push(PathCommand::Move(Point::new(0.8, y)));
        commands.push(PathCommand::CurveBy(-0.6, 0.8, -1.2, 0.8, -1.6, 0.2));
    }
    GlyphOutline { size: (2.2, height), commands, filled: false }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_glyph_has_an_outline() {
        for id in [
            GlyphId::RestWhole,
            GlyphId::RestHalf,
            GlyphId::RestQuarter,
            GlyphId::RestEighth,
            GlyphId::RestSixteenth,
            GlyphId::RestThirtysecond,
            GlyphId::RestSixtyfourth,
            GlyphId::Fermata,
            GlyphId::Emphasis,
            GlyphId::Error,
        ] {
            let outline = glyph_outline(id);
            assert!(!outline.commands.is_empty());
            assert!(outline.size.0 > 0.0 && outline.size.1 > 0.0);
            assert!(matches!(outline.commands[0], PathCommand::Move(_)));
        }
    }

    #[test]
    fn shorter_rests_carry_more_hooks() {
        let eighth = glyph_outline(GlyphId::RestEighth);
        let sixtyfourth = glyph_outline(GlyphId::RestSixtyfourth);
        assert!(sixtyfourth.commands.len() > eighth.commands.len());
    }
}
