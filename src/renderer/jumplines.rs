//! Jump lines: the heavy L-shaped paths marking repeats and variant jumps,
//! plus the cross-voice synchronization lines.

use super::constants::{ARROW_HALF_WIDTH, ARROW_LENGTH};
use super::notes::NotePos;
use super::Frame;
use crate::drawing::{Drawable, FlowLine, LineStyle, PathCommand, PathShape, Point};
use crate::model::{JumpPolicy, VerticalAnchor};

/// Build the drawables of one jump: the routed line path and the filled
/// arrowhead whose apex sits at the destination anchor.
pub(super) fn jump_drawables(
    from: &NotePos,
    to: &NotePos,
    policy: &JumpPolicy,
    frame: &Frame<'_>,
) -> Vec<Drawable> {
    // bottom-up layout flips which side of a note is "before"
    let flip = if frame.settings.bottomup { -1.0 } else { 1.0 };
    let from_factor = policy.from_anchor.factor() * flip;
    let to_factor = policy.to_anchor.factor() * flip;

    let anchor = frame.settings.jumpline_anchor;
    let start = Point::new(
        from.center.x,
        from.center.y + from_factor * (from.size.1 + anchor.1),
    );
    let end = Point::new(
        to.center.x,
        to.center.y + to_factor * (to.size.1 + anchor.1),
    );

    // the vertical corridor hangs off the anchor note, offset by the
    // configured string-column distance
    let anchor_x = match policy.vertical_anchor {
        VerticalAnchor::From => from.center.x,
        VerticalAnchor::To => to.center.x,
    };
    let corridor_x = anchor_x + (policy.distance as f64 + 0.5) * frame.settings.x_spacing;

    let line = PathShape {
        commands: vec![
            PathCommand::Move(start),
            PathCommand::LineBy(corridor_x - start.x, 0.0),
            PathCommand::LineBy(0.0, end.y - start.y),
            PathCommand::LineBy(end.x - corridor_x, 0.0),
        ],
        filled: false,
        color: frame.settings.color_default.clone(),
        line_width: frame.settings.line_thick,
        visible: true,
        origin: None,
        conf_key: policy.conf_key.clone(),
    };

    // arrowhead pointing along the final horizontal segment
    let dir = if end.x >= corridor_x { 1.0 } else { -1.0 };
    let arrow = PathShape {
        commands: vec![
            PathCommand::Move(end),
            PathCommand::LineBy(-dir * ARROW_LENGTH, -ARROW_HALF_WIDTH),
            PathCommand::LineBy(0.0, 2.0 * ARROW_HALF_WIDTH),
            PathCommand::Close,
        ],
        filled: true,
        color: frame.settings.color_default.clone(),
        line_width: frame.settings.line_thick,
        visible: true,
        origin: None,
        conf_key: policy.conf_key.clone(),
    };

    vec![Drawable::Path(line), Drawable::Path(arrow)]
}

/// Dashed synchronization line between two simultaneous playables of
/// different voices, connecting the pitch-closest pair of notes.
pub(super) fn cross_voice_synchline(
    a: &NotePos,
    b: &NotePos,
    frame: &Frame<'_>,
) -> Option<Drawable> {
    let mut best: Option<(i32, Point, Point)> = None;
    for (pa, pta, _) in &a.points {
        for (pb, ptb, _) in &b.points {
            let d = (pa - pb).abs();
            if best.as_ref().map_or(true, |(bd, _, _)| d < *bd) {
                best = Some((d, *pta, *ptb));
            }
        }
    }
    best.map(|(_, from, to)| {
        Drawable::FlowLine(FlowLine {
            from,
            to,
            style: LineStyle::Dashed,
            color: frame.settings.color_default.clone(),
            line_width: frame.settings.line_thin,
            visible: true,
            origin: None,
        })
    })
}
