//! Sheet text: notebound annotations, bar numbers, count notes, string
//! names, the legend and free-standing extract notes.

use std::collections::HashMap;

use super::notes::NotePos;
use super::Frame;
use crate::drawing::{AnnotationText, Drawable, Point, TextStyle};
use crate::model::{Entity, Song, Voice};

/// Annotations bound to a companion playable (part names, variant labels,
/// user texts from the ABC source).
pub(super) fn notebound(
    voice: &Voice,
    positions: &HashMap<usize, NotePos>,
    frame: &Frame<'_>,
) -> Vec<Drawable> {
    let mut out = Vec::new();
    for entity in &voice.entities {
        if let Entity::NoteBound(nb) = entity {
            let companion = match positions.get(&nb.companion) {
                Some(pos) => pos,
                None => continue,
            };
            out.push(Drawable::Annotation(AnnotationText {
                position: companion.center.offset(nb.position.0, nb.position.1),
                text: nb.text.clone(),
                style: TextStyle::from_name(&nb.style),
                color: frame.settings.color_default.clone(),
                visible: true,
                origin: Some(nb.origin.clone()),
                conf_key: nb.conf_key.clone(),
            }));
        }
    }
    out
}

/// Measure numbers next to every measure start of the configured voices.
pub(super) fn barnumbers(
    voice: &Voice,
    positions: &HashMap<usize, NotePos>,
    frame: &Frame<'_>,
) -> Vec<Drawable> {
    let spec = &frame.settings.barnumbers;
    if !spec.voices.contains(&voice.index) {
        return Vec::new();
    }
    let mut out = Vec::new();
    for idx in voice.playable_indices() {
        let p = match voice.playable(idx) {
            Some(p) if p.measure_start() => p,
            _ => continue,
        };
        let number = match p.measure_count() {
            Some(n) => n,
            None => continue,
        };
        if let Some(pos) = positions.get(&idx) {
            out.push(Drawable::Annotation(AnnotationText {
                position: pos.center.offset(spec.pos.0, spec.pos.1),
                text: format!("{}{}", spec.prefix, number),
                style: spec.style,
                color: frame.settings.color_default.clone(),
                visible: true,
                origin: Some(p.origin().clone()),
                conf_key: None,
            }));
        }
    }
    out
}

/// Count-beat labels ("1", "2", …) next to playables of the configured
/// voices.
pub(super) fn countnotes(
    voice: &Voice,
    positions: &HashMap<usize, NotePos>,
    frame: &Frame<'_>,
) -> Vec<Drawable> {
    let spec = &frame.settings.countnotes;
    if !spec.voices.contains(&voice.index) {
        return Vec::new();
    }
    let mut out = Vec::new();
    for idx in voice.playable_indices() {
        let p = match voice.playable(idx) {
            Some(p) => p,
            None => continue,
        };
        let label = match p.count_note() {
            Some(l) if !l.is_empty() => l,
            _ => continue,
        };
        if let Some(pos) = positions.get(&idx) {
            out.push(Drawable::Annotation(AnnotationText {
                position: pos.center.offset(spec.pos.0, spec.pos.1),
                text: label.to_string(),
                style: spec.style,
                color: frame.settings.color_default.clone(),
                visible: true,
                origin: Some(p.origin().clone()),
                conf_key: None,
            }));
        }
    }
    out
}

/// A row of string labels across the instrument, one per semitone column.
pub(super) fn stringnames(frame: &Frame<'_>) -> Vec<Drawable> {
    let text = match &frame.settings.stringnames_text {
        Some(t) if !t.trim().is_empty() => t,
        _ => return Vec::new(),
    };
    let first_pitch = frame.settings.stringnames_base;
    let y = frame.settings.stringnames_vpos;

    text.split_whitespace()
        .enumerate()
        .map(|(i, name)| {
            let x = frame.x_of(first_pitch + i as i32);
            Drawable::Annotation(AnnotationText {
                position: Point::new(x, y),
                text: name.to_string(),
                style: TextStyle::Smaller,
                color: frame.settings.color_default.clone(),
                visible: true,
                origin: None,
                conf_key: None,
            })
        })
        .collect()
}

/// Title plus the meter/key/tempo/composer line.
pub(super) fn legend(song: &Song, frame: &Frame<'_>) -> Vec<Drawable> {
    let mut out = Vec::new();
    let title = song
        .meta
        .title
        .clone()
        .unwrap_or_else(|| frame.settings.title.clone());
    out.push(Drawable::Annotation(AnnotationText {
        position: Point::new(frame.settings.legend_pos.0, frame.settings.legend_pos.1),
        text: title,
        style: TextStyle::Large,
        color: frame.settings.color_default.clone(),
        visible: true,
        origin: None,
        conf_key: Some("extract.legend.pos".to_string()),
    }));

    let mut parts: Vec<String> = Vec::new();
    if let Some(m) = &song.meta.meter {
        parts.push(m.clone());
    }
    if let Some(k) = &song.meta.key {
        parts.push(k.clone());
    }
    if let Some(t) = &song.meta.tempo {
        parts.push(t.clone());
    }
    if let Some(c) = &song.meta.composer {
        parts.push(c.clone());
    }
    if !parts.is_empty() {
        out.push(Drawable::Annotation(AnnotationText {
            position: Point::new(frame.settings.legend_spos.0, frame.settings.legend_spos.1),
            text: parts.join("  "),
            style: TextStyle::Regular,
            color: frame.settings.color_default.clone(),
            visible: true,
            origin: None,
            conf_key: Some("extract.legend.spos".to_string()),
        }));
    }
    out
}

/// Free-standing sheet notes from `extract.<n>.notes`.
pub(super) fn extract_notes(frame: &Frame<'_>) -> Vec<Drawable> {
    frame
        .settings
        .notes
        .iter()
        .map(|note| {
            Drawable::Annotation(AnnotationText {
                position: Point::new(note.pos.0, note.pos.1),
                text: note.text.clone(),
                style: note.style,
                color: frame.settings.color_default.clone(),
                visible: true,
                origin: None,
                conf_key: Some(note.conf_key.clone()),
            })
        })
        .collect()
}
