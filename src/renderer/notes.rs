//! Per-voice rendering of playables: note heads, rest glyphs, measure
//! bars, note flags, flowlines and chord synchlines.

use std::collections::HashMap;

use super::constants::*;
use super::Frame;
use crate::drawing::{
    Drawable, Ellipse, FillStyle, FlowLine, GlyphSign, LineStyle, PathCommand, PathShape, Point,
};
use crate::model::{Entity, Note, PlayableRef, Shift, Voice};

/// Rendered position of a playable: the proxy center plus one point per
/// constituent note (for chord synchlines and pitch-matched cross-voice
/// synchlines).
#[derive(Debug, Clone)]
pub(super) struct NotePos {
    pub center: Point,
    pub size: (f64, f64),
    pub points: Vec<(i32, Point, (f64, f64))>,
}

/// Render all playables of one voice. Returns the drawables plus the
/// rendered positions keyed by entity index.
pub(super) fn layout_playables(
    voice: &Voice,
    frame: &Frame<'_>,
) -> (Vec<Drawable>, HashMap<usize, NotePos>) {
    let mut drawables = Vec::new();
    let mut positions: HashMap<usize, NotePos> = HashMap::new();

    for (idx, entity) in voice.entities.iter().enumerate() {
        let playable = match entity.as_playable() {
            Some(p) => p,
            None => continue,
        };
        let beat = match playable.beat() {
            Some(b) => b,
            None => continue,
        };
        let y = frame.y_of(beat);

        match entity {
            Entity::Note(note) => {
                let (d, pos) = note_head(note, playable, y, frame);
                drawables.extend(d);
                positions.insert(idx, pos);
            }
            Entity::SynchPoint(sp) => {
                let mut points = Vec::new();
                let mut all = Vec::new();
                for note in &sp.notes {
                    let as_playable = PlayableRef::Note(note);
                    let (d, pos) = note_head(note, as_playable, y, frame);
                    all.extend(d);
                    points.extend(pos.points);
                }
                let proxy = points.last().cloned().expect("synch point has notes");
                // dashed synchline between the first and last chord note
                if let (Some(first), Some(last)) = (points.first(), points.last()) {
                    all.push(Drawable::FlowLine(FlowLine {
                        from: first.1,
                        to: last.1,
                        style: LineStyle::Dashed,
                        color: frame.settings.color_default.clone(),
                        line_width: frame.settings.line_thin,
                        visible: playable.visible(),
                        origin: Some(playable.origin().clone()),
                    }));
                }
                drawables.extend(all);
                positions.insert(
                    idx,
                    NotePos { center: proxy.1, size: proxy.2, points },
                );
            }
            Entity::Pause(pause) => {
                let key = duration_key(pause.duration);
                let style = rest_style(key);
                let size = (
                    frame.settings.rest_size.0 * style.size_factor.0,
                    frame.settings.rest_size.1 * style.size_factor.1,
                );
                let x = note_x(playable, size.0, frame);
                let center = Point::new(x, y);

                drawables.push(Drawable::Glyph(GlyphSign {
                    center,
                    size,
                    glyph: style.glyph,
                    dotted: style.dotted,
                    color: frame.settings.color_default.clone(),
                    line_width: frame.settings.line_medium,
                    visible: pause.visible,
                    origin: Some(pause.origin.clone()),
                }));
                if pause.measure_start {
                    drawables.push(measure_bar(center, size, playable, frame));
                }
                positions.insert(
                    idx,
                    NotePos {
                        center,
                        size,
                        points: vec![(pause.pitch, center, size)],
                    },
                );
            }
            _ => {}
        }
    }

    (drawables, positions)
}

/// One note head: ellipse, optional measure bar and flags.
fn note_head(
    note: &Note,
    playable: PlayableRef<'_>,
    y: f64,
    frame: &Frame<'_>,
) -> (Vec<Drawable>, NotePos) {
    let key = duration_key(note.duration);
    let style = duration_style(key);
    let size = (
        frame.settings.ellipse_size.0 * style.size_factor,
        frame.settings.ellipse_size.1 * style.size_factor,
    );
    let x = shifted_x(note, size.0, frame);
    let center = Point::new(x, y);

    let filled = style.fill == FillStyle::Filled;
    let line_width = if filled {
        frame.settings.line_thin
    } else {
        frame.settings.line_medium
    };

    let mut drawables = vec![Drawable::Ellipse(Ellipse {
        center,
        size,
        fill: style.fill,
        dotted: style.dotted,
        color: frame.variant_color(note.variant),
        line_width,
        visible: note.visible,
        origin: Some(note.origin.clone()),
        conf_key: None,
    })];

    if note.measure_start {
        drawables.push(measure_bar(center, size, playable, frame));
    }

    if frame.settings.beams {
        let flags = flag_count(key);
        if flags > 0 {
            drawables.push(note_flags(center, size, flags, frame));
        }
    }

    let pos = NotePos {
        center,
        size,
        points: vec![(note.pitch, center, size)],
    };
    (drawables, pos)
}

/// Horizontal position of a note, honoring edge limits and explicit shifts.
fn shifted_x(note: &Note, rx: f64, frame: &Frame<'_>) -> f64 {
    let mut x = frame.x_of(note.pitch);
    if frame.settings.limit_a3 {
        if x < A3_LEFT_EDGE {
            x += 2.0 * rx;
        } else if x > A3_RIGHT_EDGE {
            x -= 2.0 * rx;
        }
    }
    match note.shift {
        Some(Shift::Left) => x -= 2.0 * rx,
        Some(Shift::Right) => x += 2.0 * rx,
        None => {}
    }
    x
}

fn note_x(playable: PlayableRef<'_>, rx: f64, frame: &Frame<'_>) -> f64 {
    let mut x = frame.x_of(playable.pitch());
    if frame.settings.limit_a3 {
        if x < A3_LEFT_EDGE {
            x += 2.0 * rx;
        } else if x > A3_RIGHT_EDGE {
            x -= 2.0 * rx;
        }
    }
    x
}

/// Thin filled rectangle above the note marking the measure (below it in
/// bottom-up layout).
fn measure_bar(center: Point, size: (f64, f64), playable: PlayableRef<'_>, frame: &Frame<'_>) -> Drawable {
    let dir = if frame.settings.bottomup { 1.0 } else { -1.0 };
    let top = center.y + dir * (size.1 + MEASURE_BAR_GAP + MEASURE_BAR_HEIGHT);
    let w = size.0 * 2.0;
    Drawable::Path(PathShape {
        commands: vec![
            PathCommand::Move(Point::new(center.x - w / 2.0, top)),
            PathCommand::LineBy(w, 0.0),
            PathCommand::LineBy(0.0, MEASURE_BAR_HEIGHT),
            PathCommand::LineBy(-w, 0.0),
            PathCommand::Close,
        ],
        filled: true,
        color: frame.settings.color_default.clone(),
        line_width: frame.settings.line_thin,
        visible: playable.visible(),
        origin: Some(playable.origin().clone()),
        conf_key: None,
    })
}

/// Stem plus flag strokes for short durations when beaming is enabled.
fn note_flags(center: Point, size: (f64, f64), flags: u32, frame: &Frame<'_>) -> Drawable {
    let dir = if frame.settings.bottomup { 1.0 } else { -1.0 };
    let stem_x = center.x + size.0;
    let stem_top = center.y + dir * FLAG_STEM_LENGTH;

    let mut commands = vec![
        PathCommand::Move(Point::new(stem_x, center.y)),
        PathCommand::LineBy(0.0, dir * FLAG_STEM_LENGTH),
    ];
    for k in 0..flags {
        commands.push(PathCommand::Move(Point::new(
            stem_x,
            stem_top - dir * k as f64 * 0.9,
        )));
        commands.push(PathCommand::LineBy(FLAG_WIDTH, -dir * 0.7));
    }

    Drawable::Path(PathShape {
        commands,
        filled: false,
        color: frame.settings.color_default.clone(),
        line_width: frame.settings.line_thin,
        visible: true,
        origin: None,
        conf_key: None,
    })
}

/// Flowlines between consecutive visible playables of a voice.
pub(super) fn flowlines(
    voice: &Voice,
    positions: &HashMap<usize, NotePos>,
    frame: &Frame<'_>,
) -> Vec<Drawable> {
    let in_flow = frame.settings.flowlines.contains(&voice.index);
    let in_subflow = frame.settings.subflowlines.contains(&voice.index);
    if !in_flow && !in_subflow {
        return Vec::new();
    }

    let mut out = Vec::new();
    let playables = voice.playable_indices();
    for pair in playables.windows(2) {
        let (a_idx, b_idx) = (pair[0], pair[1]);
        let (a, b) = match (voice.playable(a_idx), voice.playable(b_idx)) {
            (Some(a), Some(b)) => (a, b),
            _ => continue,
        };
        if !a.visible() || !b.visible() {
            continue;
        }
        // a part break interrupts the flow
        if b.first_in_part() {
            continue;
        }
        let (from, to) = match (positions.get(&a_idx), positions.get(&b_idx)) {
            (Some(f), Some(t)) => (f.center, t.center),
            _ => continue,
        };
        let style = if in_subflow {
            LineStyle::Dashed
        } else if a.tie_start() && b.tie_end() {
            LineStyle::Dotted
        } else {
            LineStyle::Solid
        };
        out.push(Drawable::FlowLine(FlowLine {
            from,
            to,
            style,
            color: frame.settings.color_default.clone(),
            line_width: frame.settings.line_medium,
            visible: true,
            origin: Some(b.origin().clone()),
        }));
    }
    out
}
