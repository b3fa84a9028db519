//! Music model for harp tablature sheets.
//!
//! These structures capture the musical information the layout engine needs:
//! playable notes, rests and chords with their time/beat positions, plus the
//! non-playable entities (measure starts, part starts, jumps, notebound
//! annotations) that decorate them.
//!
//! Entities live in an arena: each [`Voice`] owns its entities as an ordered
//! sequence and prev/next links are indices into that sequence, so the
//! doubly linked playable chain needs no reference counting.

use serde::Serialize;

use crate::error::Warning;

/// Integer time in normalized duration units: a whole note is 64 units.
pub type Ticks = u64;

/// Normalized time units per layout beat (an eighth note is one beat).
pub const TICKS_PER_BEAT: Ticks = 8;

/// Back-reference of a music entity into the ABC source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Origin {
    pub start_char: usize,
    pub end_char: usize,
    /// The raw source fragment, for diagnostics.
    pub raw: String,
}

impl Origin {
    pub fn new(start_char: usize, end_char: usize, raw: &str) -> Self {
        Self { start_char, end_char, raw: raw.to_string() }
    }

    /// Stable identifier for configuration overrides: `"<startChar>_<time>"`.
    pub fn znid(&self, time: Ticks) -> String {
        format!("{}_{}", self.start_char, time)
    }
}

/// Horizontal nudge requested by a `<`/`>` annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Shift {
    Left,
    Right,
}

/// A single note on one string.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Note {
    pub pitch: i32,
    /// Duration in normalized units (power-of-two bucket, dotted included).
    pub duration: u32,
    pub time: Ticks,
    pub beat: Option<Ticks>,
    pub origin: Origin,
    pub visible: bool,

    pub tie_start: bool,
    pub tie_end: bool,
    /// Open-slur ids started/ended on this note (depth stacks).
    pub slur_starts: Vec<usize>,
    pub slur_ends: Vec<usize>,

    /// Tuplet divisor (1 when not in a tuplet).
    pub tuplet: u32,
    pub tuplet_start: bool,
    pub tuplet_end: bool,

    pub measure_start: bool,
    pub measure_count: Option<u32>,
    /// Beat-count label within the measure, empty when off the count grid.
    pub count_note: Option<String>,
    /// Variant-ending ordinal (1-based) or None outside voltas.
    pub variant: Option<u32>,
    pub first_in_part: bool,
    pub decorations: Vec<String>,
    pub shift: Option<Shift>,

    pub prev_pitch: Option<i32>,
    pub next_pitch: Option<i32>,
    /// Entity index of the neighboring playables within the owning voice.
    pub prev_playable: Option<usize>,
    pub next_playable: Option<usize>,
}

impl Note {
    pub fn new(pitch: i32, duration: u32, time: Ticks, origin: Origin) -> Self {
        Self {
            pitch,
            duration,
            time,
            beat: None,
            origin,
            visible: true,
            tie_start: false,
            tie_end: false,
            slur_starts: Vec::new(),
            slur_ends: Vec::new(),
            tuplet: 1,
            tuplet_start: false,
            tuplet_end: false,
            measure_start: false,
            measure_count: None,
            count_note: None,
            variant: None,
            first_in_part: false,
            decorations: Vec::new(),
            shift: None,
            prev_pitch: None,
            next_pitch: None,
            prev_playable: None,
            next_playable: None,
        }
    }
}

/// A rest. Same shape as a note; the pitch is inferred from the surrounding
/// notes so the rest glyph lands on a plausible string.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pause {
    pub pitch: i32,
    pub duration: u32,
    pub time: Ticks,
    pub beat: Option<Ticks>,
    pub origin: Origin,
    pub visible: bool,

    pub measure_start: bool,
    pub measure_count: Option<u32>,
    pub count_note: Option<String>,
    pub variant: Option<u32>,
    pub first_in_part: bool,

    pub tuplet: u32,
    pub tuplet_start: bool,
    pub tuplet_end: bool,

    /// Set when this rest immediately precedes a repeat-end bar; drives the
    /// `restposition.repeatend` rule.
    pub at_repeat_end: bool,

    pub prev_pitch: Option<i32>,
    pub next_pitch: Option<i32>,
    pub prev_playable: Option<usize>,
    pub next_playable: Option<usize>,
}

impl Pause {
    pub fn new(duration: u32, time: Ticks, origin: Origin) -> Self {
        Self {
            pitch: 0,
            duration,
            time,
            beat: None,
            origin,
            visible: true,
            measure_start: false,
            measure_count: None,
            count_note: None,
            variant: None,
            first_in_part: false,
            tuplet: 1,
            tuplet_start: false,
            tuplet_end: false,
            at_repeat_end: false,
            prev_pitch: None,
            next_pitch: None,
            prev_playable: None,
            next_playable: None,
        }
    }
}

/// Notes played simultaneously (an ABC chord). Acts as a playable by
/// delegating to its proxy note — the last one in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynchPoint {
    pub notes: Vec<Note>,
}

impl SynchPoint {
    pub fn new(notes: Vec<Note>) -> Self {
        debug_assert!(notes.len() >= 2, "a synch point holds at least two notes");
        Self { notes }
    }

    pub fn proxy(&self) -> &Note {
        self.notes.last().expect("synch point is never empty")
    }

    pub fn proxy_mut(&mut self) -> &mut Note {
        self.notes.last_mut().expect("synch point is never empty")
    }
}

/// Text bound to a companion playable, positioned relative to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteBoundAnnotation {
    /// Entity index of the companion playable in the owning voice.
    pub companion: usize,
    pub text: String,
    pub style: String,
    /// Offset from the companion center, in sheet millimeters.
    pub position: (f64, f64),
    /// Path for per-instance configuration overrides.
    pub conf_key: Option<String>,
    pub origin: Origin,
    pub time: Ticks,
}

/// Marks the first playable of a measure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasureStart {
    pub companion: usize,
    pub origin: Origin,
    pub time: Ticks,
}

/// Marks the first playable of a named part.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewPart {
    pub companion: usize,
    pub name: String,
    pub origin: Origin,
    pub time: Ticks,
}

/// Which side of a note a jump line attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Anchor {
    Before,
    After,
}

impl Anchor {
    /// -1 above the note, +1 below (sign flips in bottom-up layout).
    pub fn factor(self) -> f64 {
        match self {
            Anchor::Before => -1.0,
            Anchor::After => 1.0,
        }
    }
}

/// Which end of the jump anchors the vertical corridor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VerticalAnchor {
    From,
    To,
}

/// Rendering policy of a jump line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JumpPolicy {
    pub is_repeat: bool,
    /// Repetition-stack depth when the jump was created.
    pub level: u32,
    /// Horizontal corridor distance in string columns.
    pub distance: i32,
    pub from_anchor: Anchor,
    pub to_anchor: Anchor,
    pub vertical_anchor: VerticalAnchor,
    pub conf_key: Option<String>,
}

impl JumpPolicy {
    pub fn repeat(level: u32, distance: i32) -> Self {
        Self {
            is_repeat: true,
            level,
            distance,
            from_anchor: Anchor::After,
            to_anchor: Anchor::Before,
            vertical_anchor: VerticalAnchor::From,
            conf_key: None,
        }
    }
}

/// A jump from one playable back (or forward) to another.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Goto {
    /// Entity indices in the owning voice.
    pub from: usize,
    pub to: usize,
    pub policy: JumpPolicy,
}

/// One element of a voice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Entity {
    Note(Note),
    SynchPoint(SynchPoint),
    Pause(Pause),
    NoteBound(NoteBoundAnnotation),
    MeasureStart(MeasureStart),
    NewPart(NewPart),
    Goto(Goto),
}

impl Entity {
    pub fn is_playable(&self) -> bool {
        matches!(self, Entity::Note(_) | Entity::SynchPoint(_) | Entity::Pause(_))
    }

    pub fn as_playable(&self) -> Option<PlayableRef<'_>> {
        match self {
            Entity::Note(n) => Some(PlayableRef::Note(n)),
            Entity::SynchPoint(s) => Some(PlayableRef::SynchPoint(s)),
            Entity::Pause(p) => Some(PlayableRef::Pause(p)),
            _ => None,
        }
    }
}

/// Read access to the playable behavior shared by notes, rests and chords.
/// A chord forwards to its proxy note.
#[derive(Debug, Clone, Copy)]
pub enum PlayableRef<'a> {
    Note(&'a Note),
    Pause(&'a Pause),
    SynchPoint(&'a SynchPoint),
}

impl<'a> PlayableRef<'a> {
    pub fn time(&self) -> Ticks {
        match self {
            PlayableRef::Note(n) => n.time,
            PlayableRef::Pause(p) => p.time,
            PlayableRef::SynchPoint(s) => s.proxy().time,
        }
    }

    pub fn beat(&self) -> Option<Ticks> {
        match self {
            PlayableRef::Note(n) => n.beat,
            PlayableRef::Pause(p) => p.beat,
            PlayableRef::SynchPoint(s) => s.proxy().beat,
        }
    }

    pub fn pitch(&self) -> i32 {
        match self {
            PlayableRef::Note(n) => n.pitch,
            PlayableRef::Pause(p) => p.pitch,
            PlayableRef::SynchPoint(s) => s.proxy().pitch,
        }
    }

    pub fn duration(&self) -> u32 {
        match self {
            PlayableRef::Note(n) => n.duration,
            PlayableRef::Pause(p) => p.duration,
            PlayableRef::SynchPoint(s) => s.proxy().duration,
        }
    }

    pub fn measure_start(&self) -> bool {
        match self {
            PlayableRef::Note(n) => n.measure_start,
            PlayableRef::Pause(p) => p.measure_start,
            PlayableRef::SynchPoint(s) => s.proxy().measure_start,
        }
    }

    pub fn measure_count(&self) -> Option<u32> {
        match self {
            PlayableRef::Note(n) => n.measure_count,
            PlayableRef::Pause(p) => p.measure_count,
            PlayableRef::SynchPoint(s) => s.proxy().measure_count,
        }
    }

    pub fn count_note(&self) -> Option<&'a str> {
        match self {
            PlayableRef::Note(n) => n.count_note.as_deref(),
            PlayableRef::Pause(p) => p.count_note.as_deref(),
            PlayableRef::SynchPoint(s) => s.proxy().count_note.as_deref(),
        }
    }

    pub fn variant(&self) -> Option<u32> {
        match self {
            PlayableRef::Note(n) => n.variant,
            PlayableRef::Pause(p) => p.variant,
            PlayableRef::SynchPoint(s) => s.proxy().variant,
        }
    }

    pub fn first_in_part(&self) -> bool {
        match self {
            PlayableRef::Note(n) => n.first_in_part,
            PlayableRef::Pause(p) => p.first_in_part,
            PlayableRef::SynchPoint(s) => s.proxy().first_in_part,
        }
    }

    pub fn visible(&self) -> bool {
        match self {
            PlayableRef::Note(n) => n.visible,
            PlayableRef::Pause(p) => p.visible,
            PlayableRef::SynchPoint(s) => s.proxy().visible,
        }
    }

    pub fn origin(&self) -> &'a Origin {
        match self {
            PlayableRef::Note(n) => &n.origin,
            PlayableRef::Pause(p) => &p.origin,
            PlayableRef::SynchPoint(s) => &s.proxy().origin,
        }
    }

    pub fn znid(&self) -> String {
        self.origin().znid(self.time())
    }

    pub fn tie_start(&self) -> bool {
        match self {
            PlayableRef::Note(n) => n.tie_start,
            PlayableRef::Pause(_) => false,
            PlayableRef::SynchPoint(s) => s.notes.iter().any(|n| n.tie_start),
        }
    }

    pub fn tie_end(&self) -> bool {
        match self {
            PlayableRef::Note(n) => n.tie_end,
            PlayableRef::Pause(_) => false,
            PlayableRef::SynchPoint(s) => s.notes.iter().any(|n| n.tie_end),
        }
    }

    pub fn shift(&self) -> Option<Shift> {
        match self {
            PlayableRef::Note(n) => n.shift,
            PlayableRef::Pause(_) => None,
            PlayableRef::SynchPoint(s) => s.proxy().shift,
        }
    }

    pub fn prev_pitch(&self) -> Option<i32> {
        match self {
            PlayableRef::Note(n) => n.prev_pitch,
            PlayableRef::Pause(p) => p.prev_pitch,
            PlayableRef::SynchPoint(s) => s.proxy().prev_pitch,
        }
    }

    pub fn next_pitch(&self) -> Option<i32> {
        match self {
            PlayableRef::Note(n) => n.next_pitch,
            PlayableRef::Pause(p) => p.next_pitch,
            PlayableRef::SynchPoint(s) => s.proxy().next_pitch,
        }
    }

    pub fn prev_playable(&self) -> Option<usize> {
        match self {
            PlayableRef::Note(n) => n.prev_playable,
            PlayableRef::Pause(p) => p.prev_playable,
            PlayableRef::SynchPoint(s) => s.proxy().prev_playable,
        }
    }

    pub fn next_playable(&self) -> Option<usize> {
        match self {
            PlayableRef::Note(n) => n.next_playable,
            PlayableRef::Pause(p) => p.next_playable,
            PlayableRef::SynchPoint(s) => s.proxy().next_playable,
        }
    }

    /// MIDI pitches of every constituent note (one entry unless a chord).
    pub fn pitches(&self) -> Vec<i32> {
        match self {
            PlayableRef::Note(n) => vec![n.pitch],
            PlayableRef::Pause(p) => vec![p.pitch],
            PlayableRef::SynchPoint(s) => s.notes.iter().map(|n| n.pitch).collect(),
        }
    }
}

/// One voice: an ordered arena of entities.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Voice {
    /// 1-based voice index as addressed by configuration.
    pub index: usize,
    pub name: String,
    pub entities: Vec<Entity>,
}

impl Voice {
    pub fn new(index: usize, name: &str) -> Self {
        Self { index, name: name.to_string(), entities: Vec::new() }
    }

    pub fn playable(&self, idx: usize) -> Option<PlayableRef<'_>> {
        self.entities.get(idx).and_then(|e| e.as_playable())
    }

    /// Entity indices of all playables, in order.
    pub fn playable_indices(&self) -> Vec<usize> {
        self.entities
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_playable())
            .map(|(i, _)| i)
            .collect()
    }

    /// Assign beats to every playable. A time that is not on the beat grid
    /// (an unsupported tuplet) is rounded down and reported as a warning.
    fn update_beats(&mut self, warnings: &mut Vec<Warning>) {
        for entity in &mut self.entities {
            match entity {
                Entity::Note(n) => {
                    n.beat = Some(beat_of(n.time, &n.origin, warnings));
                }
                Entity::Pause(p) => {
                    p.beat = Some(beat_of(p.time, &p.origin, warnings));
                }
                Entity::SynchPoint(s) => {
                    let beat = beat_of(s.proxy().time, &s.proxy().origin.clone(), warnings);
                    // setting the beat propagates to all constituents
                    for n in &mut s.notes {
                        n.beat = Some(beat);
                    }
                }
                _ => {}
            }
        }
    }
}

fn beat_of(time: Ticks, origin: &Origin, warnings: &mut Vec<Warning>) -> Ticks {
    if time % TICKS_PER_BEAT != 0 {
        let w = Warning::new(
            format!("tuplet produces a fractional beat at time {time}, rounding down"),
            origin.start_char,
            origin.end_char,
        );
        log::warn!("{}", w.message);
        warnings.push(w);
    }
    time / TICKS_PER_BEAT
}

/// Tune metadata shown in the sheet legend.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetaData {
    pub title: Option<String>,
    pub composer: Option<String>,
    pub meter: Option<String>,
    pub key: Option<String>,
    pub tempo: Option<String>,
    pub tune_id: Option<String>,
}

/// The transformed tune: voices, metadata and per-voice beat maps.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Song {
    /// Voices in ascending `Voice::index` order (1-based indices).
    pub voices: Vec<Voice>,
    pub meta: MetaData,
    /// FNV-1a hash of the source text, hex encoded.
    pub checksum: String,
    pub warnings: Vec<Warning>,
    /// Per voice: layout beat -> entity index of the playable starting there.
    #[serde(skip)]
    pub beat_maps: Vec<std::collections::BTreeMap<Ticks, usize>>,
}

impl Song {
    pub fn new(voices: Vec<Voice>, meta: MetaData) -> Self {
        Self {
            voices,
            meta,
            checksum: String::new(),
            warnings: Vec::new(),
            beat_maps: Vec::new(),
        }
    }

    /// Voice by its 1-based configuration index. Index 0 is an alias of
    /// voice 1, preserving one-based addressing in configuration.
    pub fn voice(&self, index: usize) -> Option<&Voice> {
        let wanted = if index == 0 { 1 } else { index };
        self.voices.iter().find(|v| v.index == wanted)
    }

    /// Beat map of the voice with the given configuration index.
    pub fn beat_map(&self, index: usize) -> Option<&std::collections::BTreeMap<Ticks, usize>> {
        let wanted = if index == 0 { 1 } else { index };
        self.voices
            .iter()
            .position(|v| v.index == wanted)
            .and_then(|pos| self.beat_maps.get(pos))
    }

    /// Assign beats to all playables and rebuild the beat maps.
    pub fn update_beats(&mut self) {
        let mut warnings = Vec::new();
        for voice in &mut self.voices {
            voice.update_beats(&mut warnings);
        }
        self.warnings.append(&mut warnings);

        self.beat_maps = self
            .voices
            .iter()
            .map(|voice| {
                let mut map = std::collections::BTreeMap::new();
                for (idx, entity) in voice.entities.iter().enumerate() {
                    if let Some(p) = entity.as_playable() {
                        if let Some(beat) = p.beat() {
                            map.entry(beat).or_insert(idx);
                        }
                    }
                }
                map
            })
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin(start: usize) -> Origin {
        Origin::new(start, start + 1, "C")
    }

    #[test]
    fn znid_is_startchar_and_time() {
        let note = Note::new(60, 16, 32, origin(12));
        assert_eq!(note.origin.znid(note.time), "12_32");
    }

    #[test]
    fn synch_point_delegates_to_last_note() {
        let a = Note::new(60, 16, 0, origin(0));
        let b = Note::new(67, 8, 0, origin(2));
        let sp = SynchPoint::new(vec![a, b]);
        let entity = Entity::SynchPoint(sp);
        let p = entity.as_playable().unwrap();
        assert_eq!(p.pitch(), 67);
        assert_eq!(p.duration(), 8);
        assert_eq!(p.pitches(), vec![60, 67]);
    }

    #[test]
    fn beat_assignment_propagates_to_chord_notes() {
        let a = Note::new(60, 16, 16, origin(0));
        let b = Note::new(64, 16, 16, origin(2));
        let mut voice = Voice::new(1, "melody");
        voice.entities.push(Entity::SynchPoint(SynchPoint::new(vec![a, b])));

        let mut song = Song::new(vec![voice], MetaData::default());
        song.update_beats();
        assert!(song.warnings.is_empty());

        match &song.voices[0].entities[0] {
            Entity::SynchPoint(sp) => {
                assert!(sp.notes.iter().all(|n| n.beat == Some(2)));
            }
            other => panic!("unexpected entity {other:?}"),
        }
    }

    #[test]
    fn fractional_beat_warns_and_rounds_down() {
        let mut voice = Voice::new(1, "melody");
        voice.entities.push(Entity::Note(Note::new(60, 11, 11, origin(0))));
        let mut song = Song::new(vec![voice], MetaData::default());
        song.update_beats();

        assert_eq!(song.warnings.len(), 1);
        match &song.voices[0].entities[0] {
            Entity::Note(n) => assert_eq!(n.beat, Some(1)),
            other => panic!("unexpected entity {other:?}"),
        }
    }

    #[test]
    fn voice_zero_aliases_voice_one() {
        let song = Song::new(vec![Voice::new(1, "melody")], MetaData::default());
        assert_eq!(song.voice(0).unwrap().index, 1);
        assert_eq!(song.voice(1).unwrap().index, 1);
        assert!(song.voice(2).is_none());
    }
}
