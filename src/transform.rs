//! Builds the music model from per-voice symbol streams.
//!
//! Each voice is consumed linearly by a state machine that tracks measures,
//! repeats, volta brackets, ties, slurs and tuplets, producing the entity
//! arena of a [`Voice`]. Jump lines for repeats and variant endings are
//! synthesized from the collected state after the walk.

use std::collections::HashMap;

use crate::abc::{Symbol, SymbolKind, Tune, PARSER_WHOLE};
use crate::config::ConfStack;
use crate::error::{Result, Warning};
use crate::model::{
    Anchor, Entity, Goto, JumpPolicy, MeasureStart, MetaData, NewPart, Note,
    NoteBoundAnnotation, Origin, Pause, Shift, Song, SynchPoint, Ticks, VerticalAnchor, Voice,
};

/// Where a rest takes its pitch from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestPosition {
    Center,
    Previous,
    Next,
}

impl RestPosition {
    fn from_conf(text: Option<&str>, fallback: RestPosition) -> RestPosition {
        match text {
            Some("center") => RestPosition::Center,
            Some("previous") => RestPosition::Previous,
            Some("next") => RestPosition::Next,
            _ => fallback,
        }
    }
}

/// Transformer settings, resolved once from the configuration stack.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Normalized units per whole note.
    pub shortest_note: u32,
    pub rest_default: RestPosition,
    pub rest_repeatend: RestPosition,
    pub partname_pos: (f64, f64),
    pub variantend_pos: (f64, f64),
    pub annotation_pos: (f64, f64),
    /// `annotations.<name>` templates: name -> (text, position).
    pub templates: HashMap<String, (String, (f64, f64))>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            shortest_note: 64,
            rest_default: RestPosition::Center,
            rest_repeatend: RestPosition::Previous,
            partname_pos: (-4.0, -7.0),
            variantend_pos: (-4.0, -7.0),
            annotation_pos: (5.0, -7.0),
            templates: HashMap::new(),
        }
    }
}

impl Settings {
    pub fn from_conf(conf: &ConfStack) -> Result<Self> {
        let mut settings = Settings::default();

        if let Some(v) = conf.get("extract.0.layout.SHORTEST_NOTE")? {
            if let Some(n) = v.as_i64() {
                settings.shortest_note = n.clamp(1, 128) as u32;
            }
        }
        if let Some(v) = conf.get("restposition.default")? {
            settings.rest_default = RestPosition::from_conf(v.as_str(), settings.rest_default);
        }
        if let Some(v) = conf.get("restposition.repeatend")? {
            settings.rest_repeatend = RestPosition::from_conf(v.as_str(), settings.rest_repeatend);
        }
        if let Some(v) = conf.get("defaults.notebound.partname.pos")? {
            if let Some(p) = v.as_pair() {
                settings.partname_pos = p;
            }
        }
        if let Some(v) = conf.get("defaults.notebound.variantend.pos")? {
            if let Some(p) = v.as_pair() {
                settings.variantend_pos = p;
            }
        }
        if let Some(v) = conf.get("defaults.notebound.annotation.pos")? {
            if let Some(p) = v.as_pair() {
                settings.annotation_pos = p;
            }
        }
        if let Some(templates) = conf.get("annotations")? {
            if let Some(map) = templates.as_map() {
                for (name, tpl) in map {
                    let text = tpl
                        .child("text")
                        .and_then(|t| t.as_str())
                        .unwrap_or("")
                        .to_string();
                    let pos = tpl
                        .child("pos")
                        .and_then(|p| p.as_pair())
                        .unwrap_or(settings.annotation_pos);
                    settings.templates.insert(name.clone(), (text, pos));
                }
            }
        }
        Ok(settings)
    }
}

/// Transform a parsed tune into a [`Song`].
pub fn transform(tune: &Tune, settings: &Settings) -> Song {
    let mut voices = Vec::new();
    let mut warnings = Vec::new();

    for stream in &tune.voices {
        let ctx = VoiceCtx::new(stream.id, &stream.name, tune, settings);
        let (voice, mut voice_warnings) = ctx.run(&stream.symbols);
        warnings.append(&mut voice_warnings);
        voices.push(voice);
    }

    let meta = MetaData {
        title: tune.meta.title.clone(),
        composer: tune.meta.composer.clone(),
        meter: tune.meta.meter_text.clone(),
        key: tune.meta.key_text.clone(),
        tempo: tune.meta.tempo_text.clone(),
        tune_id: tune.meta.tune_id.clone(),
    };

    let mut song = Song::new(voices, meta);
    song.warnings = warnings;
    song.update_beats();
    song
}

const DEFAULT_REPEAT_DISTANCE: i32 = 2;
const DEFAULT_VARIANT_DISTANCES: [i32; 3] = [-10, 10, 15];

/// Marks set by bars and part symbols, applied to the next playable.
#[derive(Debug, Default)]
struct NextNoteMarks {
    measure: bool,
    repeat_start: bool,
    variant_ending: Option<String>,
    variant_followup: bool,
}

/// One volta bracket inside a variant group.
#[derive(Debug, Clone, Default)]
struct VariantEntry {
    rbstart: Option<usize>,
    rbstop: Option<usize>,
    distance: Option<Vec<i32>>,
    repeat_end: bool,
    is_followup: bool,
}

struct VoiceCtx<'a> {
    settings: &'a Settings,
    voice_id: usize,
    voice_name: String,
    entities: Vec<Entity>,

    measure_count: u32,
    measure_start_time: Ticks,
    repetition_stack: Vec<usize>,
    marks: NextNoteMarks,
    previous_playable: Option<usize>,
    variant_groups: Vec<Vec<VariantEntry>>,
    variant_no: u32,
    /// Ordinal of the volta bracket currently open, applied to every
    /// playable inside it.
    current_variant: Option<u32>,
    tie_started: bool,
    slur_stack: Vec<usize>,
    next_slur_id: usize,
    count_by: u32,
    w_measure: Ticks,
    part_table: HashMap<Ticks, String>,

    goto_targets: HashMap<String, usize>,
    named_gotos: Vec<(usize, String, Vec<i32>)>,
    pending_distance: Option<Vec<i32>>,
    pauses_at_repeat_end: Vec<usize>,
    gotos: Vec<Goto>,
    warnings: Vec<Warning>,
}

impl<'a> VoiceCtx<'a> {
    fn new(voice_id: usize, voice_name: &str, tune: &Tune, settings: &'a Settings) -> Self {
        Self {
            settings,
            voice_id,
            voice_name: voice_name.to_string(),
            entities: Vec::new(),
            measure_count: 0,
            measure_start_time: 0,
            repetition_stack: Vec::new(),
            // the tune start opens the first measure
            marks: NextNoteMarks { measure: true, ..NextNoteMarks::default() },
            previous_playable: None,
            variant_groups: vec![Vec::new()],
            variant_no: 0,
            current_variant: None,
            tie_started: false,
            slur_stack: Vec::new(),
            next_slur_id: 0,
            count_by: tune.denominator.max(1),
            w_measure: normalize_ticks(tune.wmeasure, settings.shortest_note),
            part_table: HashMap::new(),
            goto_targets: HashMap::new(),
            named_gotos: Vec::new(),
            pending_distance: None,
            pauses_at_repeat_end: Vec::new(),
            gotos: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn run(mut self, symbols: &[Symbol]) -> (Voice, Vec<Warning>) {
        // part labels are keyed by normalized time
        for sym in symbols {
            if sym.kind == SymbolKind::Part {
                if let Some(label) = &sym.text {
                    let time = normalize_ticks(sym.time, self.settings.shortest_note);
                    self.part_table.insert(time, label.clone());
                }
            }
        }

        for sym in symbols {
            match sym.kind {
                SymbolKind::Note => self.handle_note(sym),
                SymbolKind::Rest => self.handle_rest(sym),
                SymbolKind::Bar => self.handle_bar(sym),
                SymbolKind::Meter => {
                    self.w_measure = normalize_ticks(sym.wmeasure, self.settings.shortest_note);
                    self.count_by = sym.denominator.max(1);
                }
                // key, tempo, staves and parts have no per-note effect here
                _ => {}
            }
        }

        self.finish()
    }

    // ─── Symbol handlers ────────────────────────────────────────────

    fn handle_note(&mut self, sym: &Symbol) {
        let time = normalize_ticks(sym.time, self.settings.shortest_note);
        let duration = normalize_duration(sym.dur, self.settings.shortest_note);

        let mut notes: Vec<Note> = sym
            .heads
            .iter()
            .map(|head| {
                let origin = Origin::new(head.start_char, head.end_char, "");
                let mut note = Note::new(head.pitch, duration, time, origin);
                note.tie_start = head.tie_start;
                note.tie_end = self.tie_started;
                note.tuplet = sym.tuplet;
                note.tuplet_start = sym.tuplet_start;
                note.tuplet_end = sym.tuplet_end;
                note.decorations = sym.decorations.clone();
                note.count_note = self.count_label(time);
                note
            })
            .collect();
        self.tie_started = sym.heads.iter().any(|h| h.tie_start);

        // slur starts push one id per nibble, slur ends pop
        let mut starts = Vec::new();
        let mut bits = sym.slur_start;
        while bits != 0 {
            if bits & 0xF != 0 {
                let id = self.next_slur_id;
                self.next_slur_id += 1;
                self.slur_stack.push(id);
                starts.push(id);
            }
            bits >>= 4;
        }
        let mut ends = Vec::new();
        for _ in 0..sym.slur_end {
            if let Some(id) = self.slur_stack.pop() {
                ends.push(id);
            }
        }
        if let Some(last) = notes.last_mut() {
            last.slur_starts = starts;
            last.slur_ends = ends;
        }

        let entity = if notes.len() == 1 {
            let mut note = notes.pop().expect("one note present");
            note.origin = Origin::new(sym.start_char, sym.end_char, "");
            Entity::Note(note)
        } else {
            Entity::SynchPoint(SynchPoint::new(notes))
        };
        let idx = self.entities.len();
        self.entities.push(entity);
        self.link_and_annotate(idx, sym, time);
    }

    fn handle_rest(&mut self, sym: &Symbol) {
        let time = normalize_ticks(sym.time, self.settings.shortest_note);
        let duration = normalize_duration(sym.dur, self.settings.shortest_note);

        let origin = Origin::new(sym.start_char, sym.end_char, "");
        let mut pause = Pause::new(duration, time, origin);
        pause.visible = !sym.invisible;
        pause.tuplet = sym.tuplet;
        pause.tuplet_start = sym.tuplet_start;
        pause.tuplet_end = sym.tuplet_end;
        pause.count_note = self.count_label(time);
        // a rest interrupts any tie
        self.tie_started = false;

        let idx = self.entities.len();
        self.entities.push(Entity::Pause(pause));
        self.link_and_annotate(idx, sym, time);
    }

    fn handle_bar(&mut self, sym: &Symbol) {
        let time = normalize_ticks(sym.time, self.settings.shortest_note);
        let bar_type = sym.bar_type.as_deref().unwrap_or("|");

        for a in &sym.annotations {
            if let Some(rest) = a.strip_prefix("@@") {
                if let Some(list) = parse_distances(rest) {
                    self.pending_distance = Some(list);
                }
            }
        }

        // volta close fills the open group entry with the previous playable
        if sym.rbstop == 2 {
            self.current_variant = None;
            let previous = self.previous_playable;
            let is_repeat_end = bar_type.starts_with(':');
            if let Some(entry) = self
                .variant_groups
                .last_mut()
                .and_then(|g| g.iter_mut().rev().find(|e| e.rbstop.is_none() && !e.is_followup))
            {
                entry.rbstop = previous;
                entry.repeat_end = is_repeat_end;
            }
            if is_repeat_end {
                if let Some(&top) = self.repetition_stack.last() {
                    self.repetition_stack.push(top);
                }
            }
            if sym.rbstart != 2 {
                // the bracket run ends here; whatever follows is the
                // common continuation
                self.marks.variant_followup = true;
                self.variant_groups.push(Vec::new());
                self.variant_no = 0;
            }
        }

        if sym.rbstart == 2 {
            self.variant_no += 1;
            let text = sym
                .volta_text
                .clone()
                .unwrap_or_else(|| self.variant_no.to_string());
            self.marks.variant_ending = Some(text);
        }

        // a volta-only bracket is not a measure bar
        if bar_type != "[" {
            self.marks.measure = true;
            self.measure_start_time = time;
        }
        if bar_type.ends_with(':') {
            self.marks.repeat_start = true;
        }

        if bar_type.starts_with(':') {
            self.make_repeat_goto(sym);
        }
    }

    fn make_repeat_goto(&mut self, sym: &Symbol) {
        let from = match self.previous_playable {
            Some(idx) => idx,
            None => {
                self.warnings.push(Warning::new(
                    "repeat end without a previous note",
                    sym.start_char,
                    sym.end_char,
                ));
                return;
            }
        };
        let to = match self.repetition_stack.last() {
            Some(&idx) => idx,
            None => match self.entities.iter().position(|e| e.is_playable()) {
                Some(idx) => idx,
                None => return,
            },
        };
        let level = self.repetition_stack.len() as u32;
        if self.repetition_stack.len() > 1 {
            self.repetition_stack.pop();
        }
        let distance = self
            .pending_distance
            .take()
            .and_then(|d| d.first().copied())
            .unwrap_or(DEFAULT_REPEAT_DISTANCE);

        if let Entity::Pause(_) = self.entities[from] {
            self.pauses_at_repeat_end.push(from);
        }

        let mut policy = JumpPolicy::repeat(level.max(1), distance);
        if let Some(p) = self.entities[from].as_playable() {
            policy.conf_key = Some(format!("goto.v{}.{}", self.voice_id, p.znid()));
        }
        self.gotos.push(Goto { from, to, policy });
    }

    // ─── Linking and annotations ────────────────────────────────────

    fn link_and_annotate(&mut self, idx: usize, sym: &Symbol, time: Ticks) {
        // bidirectional linkage with the previous playable
        if let Some(prev) = self.previous_playable {
            let pitch = playable_pitch(&self.entities[idx]);
            let prev_pitch = playable_pitch(&self.entities[prev]);
            for_each_note(&mut self.entities[prev], |n| {
                n.next_playable = Some(idx);
                n.next_pitch = Some(pitch);
            });
            if let Entity::Pause(p) = &mut self.entities[prev] {
                p.next_playable = Some(idx);
                p.next_pitch = Some(pitch);
            }
            for_each_note(&mut self.entities[idx], |n| {
                n.prev_playable = Some(prev);
                n.prev_pitch = Some(prev_pitch);
            });
            if let Entity::Pause(p) = &mut self.entities[idx] {
                p.prev_playable = Some(prev);
                p.prev_pitch = Some(prev_pitch);
            }
        }

        let znid = self.entities[idx]
            .as_playable()
            .map(|p| p.znid())
            .unwrap_or_default();
        let origin = self.entities[idx]
            .as_playable()
            .map(|p| p.origin().clone())
            .unwrap_or_else(|| Origin::new(sym.start_char, sym.end_char, ""));

        // part starts
        if let Some(label) = self.part_table.get(&time).cloned() {
            set_first_in_part(&mut self.entities[idx]);
            self.entities.push(Entity::NewPart(NewPart {
                companion: idx,
                name: label.clone(),
                origin: origin.clone(),
                time,
            }));
            self.entities.push(Entity::NoteBound(NoteBoundAnnotation {
                companion: idx,
                text: label,
                style: "regular".to_string(),
                position: self.settings.partname_pos,
                conf_key: Some(format!("notebound.partname.v{}.{}", self.voice_id, znid)),
                origin: origin.clone(),
                time,
            }));
        }

        // pending marks from the last bar
        if self.marks.measure {
            self.marks.measure = false;
            self.measure_count += 1;
            let count = self.measure_count;
            for_each_note(&mut self.entities[idx], |n| {
                n.measure_start = true;
                n.measure_count = Some(count);
            });
            if let Entity::Pause(p) = &mut self.entities[idx] {
                p.measure_start = true;
                p.measure_count = Some(count);
            }
            self.entities.push(Entity::MeasureStart(MeasureStart {
                companion: idx,
                origin: origin.clone(),
                time,
            }));
        }

        if self.marks.repeat_start {
            self.marks.repeat_start = false;
            self.repetition_stack.push(idx);
            set_first_in_part(&mut self.entities[idx]);
        }

        if let Some(text) = self.marks.variant_ending.take() {
            let variant = self.variant_no;
            self.current_variant = Some(variant);
            self.entities.push(Entity::NoteBound(NoteBoundAnnotation {
                companion: idx,
                text,
                style: "smaller".to_string(),
                position: self.settings.variantend_pos,
                conf_key: Some(format!("notebound.variantend.v{}.{}", self.voice_id, znid)),
                origin: origin.clone(),
                time,
            }));
            let distance = self.pending_distance.take();
            if let Some(group) = self.variant_groups.last_mut() {
                group.push(VariantEntry {
                    rbstart: Some(idx),
                    distance,
                    ..VariantEntry::default()
                });
            }
        }

        if let Some(variant) = self.current_variant {
            for_each_note(&mut self.entities[idx], |n| n.variant = Some(variant));
            if let Entity::Pause(p) = &mut self.entities[idx] {
                p.variant = Some(variant);
            }
        }

        if self.marks.variant_followup {
            self.marks.variant_followup = false;
            let group_count = self.variant_groups.len();
            if group_count >= 2 {
                self.variant_groups[group_count - 2].push(VariantEntry {
                    rbstart: Some(idx),
                    is_followup: true,
                    ..VariantEntry::default()
                });
            }
        }

        self.scan_annotations(idx, sym, time, &znid, &origin);
        self.previous_playable = Some(idx);
    }

    fn scan_annotations(
        &mut self,
        idx: usize,
        sym: &Symbol,
        time: Ticks,
        znid: &str,
        origin: &Origin,
    ) {
        for raw in sym.annotations.clone() {
            if let Some(label) = raw.strip_prefix(':') {
                self.goto_targets.insert(label.to_string(), idx);
            } else if let Some(rest) = raw.strip_prefix('@') {
                // "@<label>@<n>(,<n>,<n>)"
                if let Some((label, dist)) = rest.split_once('@') {
                    if !label.is_empty() {
                        let distances =
                            parse_distances(dist).unwrap_or_else(|| vec![DEFAULT_REPEAT_DISTANCE]);
                        self.named_gotos.push((idx, label.to_string(), distances));
                    } else if let Some(list) = parse_distances(dist) {
                        self.pending_distance = Some(list);
                    }
                }
            } else if let Some(name) = raw.strip_prefix('#') {
                if let Some((text, pos)) = self.settings.templates.get(name).cloned() {
                    self.push_notebound(idx, text, pos, time, znid, origin);
                } else {
                    self.warnings.push(Warning::new(
                        format!("unknown annotation template '{name}'"),
                        origin.start_char,
                        origin.end_char,
                    ));
                }
            } else if let Some(body) = raw.strip_prefix('!') {
                let (text, pos) = split_position_suffix(body, self.settings.annotation_pos);
                self.push_notebound(idx, text, pos, time, znid, origin);
            } else if let Some(body) = raw.strip_prefix('<') {
                set_shift(&mut self.entities[idx], Shift::Left);
                if !body.is_empty() {
                    let (text, pos) = split_position_suffix(body, self.settings.annotation_pos);
                    self.push_notebound(idx, text, pos, time, znid, origin);
                }
            } else if let Some(body) = raw.strip_prefix('>') {
                set_shift(&mut self.entities[idx], Shift::Right);
                if !body.is_empty() {
                    let (text, pos) = split_position_suffix(body, self.settings.annotation_pos);
                    self.push_notebound(idx, text, pos, time, znid, origin);
                }
            }
            // any other annotation text is standard-notation chord naming,
            // which the tablature does not render
        }
    }

    fn push_notebound(
        &mut self,
        companion: usize,
        text: String,
        position: (f64, f64),
        time: Ticks,
        znid: &str,
        origin: &Origin,
    ) {
        if text.is_empty() {
            return;
        }
        self.entities.push(Entity::NoteBound(NoteBoundAnnotation {
            companion,
            text,
            style: "regular".to_string(),
            position,
            conf_key: Some(format!("notebound.annotation.v{}.{}", self.voice_id, znid)),
            origin: origin.clone(),
            time,
        }));
    }

    fn count_label(&self, time: Ticks) -> Option<String> {
        let unit = (self.settings.shortest_note as Ticks) / (self.count_by as Ticks).max(1);
        if unit == 0 {
            return None;
        }
        let offset = time.checked_sub(self.measure_start_time)?;
        if offset % unit == 0 {
            Some((offset / unit + 1).to_string())
        } else {
            None
        }
    }

    // ─── Post-processing ────────────────────────────────────────────

    fn finish(mut self) -> (Voice, Vec<Warning>) {
        self.fix_rest_pitches();
        self.emit_named_gotos();
        self.emit_variant_gotos();

        if self.repetition_stack.len() > 1 {
            self.warnings.push(Warning::new(
                format!(
                    "voice {}: {} repeat starts without matching ends",
                    self.voice_id,
                    self.repetition_stack.len() - 1
                ),
                0,
                0,
            ));
        }

        for goto in self.gotos.drain(..) {
            self.entities.push(Entity::Goto(goto));
        }
        self.refresh_pitch_links();

        let mut voice = Voice::new(self.voice_id, &self.voice_name);
        voice.entities = self.entities;
        (voice, self.warnings)
    }

    /// Give every rest a pitch from its surroundings so it lands on a
    /// plausible string.
    fn fix_rest_pitches(&mut self) {
        let playables = self.playable_order();

        // nearest real (non-rest) pitch before/after each playable slot
        let mut prev_real: Vec<Option<i32>> = Vec::with_capacity(playables.len());
        let mut last = None;
        for &idx in &playables {
            prev_real.push(last);
            if !matches!(self.entities[idx], Entity::Pause(_)) {
                last = Some(playable_pitch(&self.entities[idx]));
            }
        }
        let mut next_real: Vec<Option<i32>> = vec![None; playables.len()];
        let mut coming = None;
        for (slot, &idx) in playables.iter().enumerate().rev() {
            next_real[slot] = coming;
            if !matches!(self.entities[idx], Entity::Pause(_)) {
                coming = Some(playable_pitch(&self.entities[idx]));
            }
        }

        for (slot, &idx) in playables.iter().enumerate() {
            if let Entity::Pause(_) = self.entities[idx] {
                let policy = if self.pauses_at_repeat_end.contains(&idx) {
                    self.settings.rest_repeatend
                } else {
                    self.settings.rest_default
                };
                let prev = prev_real[slot];
                let next = next_real[slot];
                let pitch = match policy {
                    RestPosition::Previous => prev.or(next),
                    RestPosition::Next => next.or(prev),
                    RestPosition::Center => match (prev, next) {
                        (Some(a), Some(b)) => Some((a + b).div_euclid(2)),
                        (Some(a), None) => Some(a),
                        (None, Some(b)) => Some(b),
                        (None, None) => None,
                    },
                };
                let pitch = pitch.unwrap_or_else(|| {
                    log::debug!("rest without neighboring notes, defaulting to middle c");
                    60
                });
                if let Entity::Pause(p) = &mut self.entities[idx] {
                    p.pitch = pitch;
                }
            }
        }
    }

    fn emit_named_gotos(&mut self) {
        let named = std::mem::take(&mut self.named_gotos);
        for (from, label, distances) in named {
            match self.goto_targets.get(&label) {
                Some(&to) => {
                    let distance = distances
                        .first()
                        .copied()
                        .unwrap_or(DEFAULT_REPEAT_DISTANCE);
                    let mut policy = JumpPolicy {
                        is_repeat: false,
                        level: 1,
                        distance,
                        from_anchor: Anchor::After,
                        to_anchor: Anchor::Before,
                        vertical_anchor: VerticalAnchor::From,
                        conf_key: None,
                    };
                    if let Some(p) = self.entities[from].as_playable() {
                        policy.conf_key =
                            Some(format!("goto.v{}.{}", self.voice_id, p.znid()));
                    }
                    self.gotos.push(Goto { from, to, policy });
                }
                None => {
                    let origin = self.entities[from]
                        .as_playable()
                        .map(|p| (p.origin().start_char, p.origin().end_char))
                        .unwrap_or((0, 0));
                    self.warnings.push(Warning::new(
                        format!("no jump target named '{label}'"),
                        origin.0,
                        origin.1,
                    ));
                }
            }
        }
    }

    /// Synthesize jump lines for the collected variant groups.
    fn emit_variant_gotos(&mut self) {
        let groups = std::mem::take(&mut self.variant_groups);
        for group in groups {
            if group.len() < 2 {
                continue;
            }
            let variants: Vec<&VariantEntry> =
                group.iter().filter(|e| !e.is_followup).collect();
            let followup = group.iter().find(|e| e.is_followup);
            if variants.len() < 2 && followup.is_none() {
                continue;
            }
            let last = variants.len().saturating_sub(1);
            let triple = |entry: &VariantEntry, slot: usize| -> i32 {
                entry
                    .distance
                    .as_ref()
                    .and_then(|d| d.get(slot).copied())
                    .unwrap_or(DEFAULT_VARIANT_DISTANCES[slot])
            };

            // start lines: from the close of the first bracket to every
            // later variant start
            if let Some(stop0) = variants.first().and_then(|e| e.rbstop) {
                for entry in variants.iter().skip(1) {
                    if let Some(start) = entry.rbstart {
                        self.gotos.push(Goto {
                            from: stop0,
                            to: start,
                            policy: JumpPolicy {
                                is_repeat: false,
                                level: 1,
                                distance: triple(entry, 0),
                                from_anchor: Anchor::After,
                                to_anchor: Anchor::Before,
                                vertical_anchor: VerticalAnchor::From,
                                conf_key: None,
                            },
                        });
                    }
                }
            }

            // end lines: a variant that does not repeat back jumps to the
            // start of the last variant
            for (i, entry) in variants.iter().enumerate() {
                if i >= last || entry.repeat_end {
                    continue;
                }
                if let (Some(stop), Some(target)) =
                    (entry.rbstop, variants[last].rbstart)
                {
                    self.gotos.push(Goto {
                        from: stop,
                        to: target,
                        policy: JumpPolicy {
                            is_repeat: false,
                            level: 1,
                            distance: triple(entry, 1),
                            from_anchor: Anchor::After,
                            to_anchor: Anchor::Before,
                            vertical_anchor: VerticalAnchor::To,
                            conf_key: None,
                        },
                    });
                }
            }

            // follow-up line: from the end of the last variant into the
            // common continuation
            if let Some(followup) = followup {
                if let (Some(stop), Some(target)) =
                    (variants.last().and_then(|e| e.rbstop), followup.rbstart)
                {
                    self.gotos.push(Goto {
                        from: stop,
                        to: target,
                        policy: JumpPolicy {
                            is_repeat: false,
                            level: 1,
                            distance: triple(followup, 2),
                            from_anchor: Anchor::After,
                            to_anchor: Anchor::Before,
                            vertical_anchor: VerticalAnchor::From,
                            conf_key: None,
                        },
                    });
                }
            }
        }
    }

    fn playable_order(&self) -> Vec<usize> {
        self.entities
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_playable())
            .map(|(i, _)| i)
            .collect()
    }

    /// Re-derive prev/next pitch links after rest pitches settled.
    fn refresh_pitch_links(&mut self) {
        let playables = self.playable_order();
        let pitches: Vec<i32> = playables
            .iter()
            .map(|&i| playable_pitch(&self.entities[i]))
            .collect();
        for (slot, &idx) in playables.iter().enumerate() {
            let prev = slot.checked_sub(1).map(|s| pitches[s]);
            let next = pitches.get(slot + 1).copied();
            for_each_note(&mut self.entities[idx], |n| {
                n.prev_pitch = prev;
                n.next_pitch = next;
            });
            if let Entity::Pause(p) = &mut self.entities[idx] {
                p.prev_pitch = prev;
                p.next_pitch = next;
            }
        }
    }
}

// ─── Entity helpers ─────────────────────────────────────────────────

fn for_each_note<F: FnMut(&mut Note)>(entity: &mut Entity, mut f: F) {
    match entity {
        Entity::Note(n) => f(n),
        Entity::SynchPoint(s) => {
            for n in &mut s.notes {
                f(n);
            }
        }
        _ => {}
    }
}

fn set_first_in_part(entity: &mut Entity) {
    match entity {
        Entity::Note(n) => n.first_in_part = true,
        Entity::SynchPoint(s) => {
            for n in &mut s.notes {
                n.first_in_part = true;
            }
        }
        Entity::Pause(p) => p.first_in_part = true,
        _ => {}
    }
}

fn set_shift(entity: &mut Entity, shift: Shift) {
    match entity {
        Entity::Note(n) => n.shift = Some(shift),
        Entity::SynchPoint(s) => {
            for n in &mut s.notes {
                n.shift = Some(shift);
            }
        }
        _ => {}
    }
}

fn playable_pitch(entity: &Entity) -> i32 {
    entity.as_playable().map(|p| p.pitch()).unwrap_or(0)
}

/// Normalize parser ticks to `shortest_note` units per whole, rounding.
fn normalize_ticks(ticks: u32, shortest_note: u32) -> Ticks {
    ((ticks as u64 * shortest_note as u64 + (PARSER_WHOLE as u64 / 2)) / PARSER_WHOLE as u64)
        as Ticks
}

/// Duration normalization clamps into the drawable bucket range.
fn normalize_duration(ticks: u32, shortest_note: u32) -> u32 {
    (normalize_ticks(ticks, shortest_note) as u32).clamp(1, 128)
}

/// Parse `"2"` or `"-10,10,15"` into a distance list.
fn parse_distances(text: &str) -> Option<Vec<i32>> {
    let list: Vec<i32> = text
        .split(',')
        .filter_map(|t| t.trim().parse::<i32>().ok())
        .collect();
    if list.is_empty() {
        None
    } else {
        Some(list)
    }
}

/// Split a trailing `@x,y` position suffix off an annotation body.
fn split_position_suffix(body: &str, default_pos: (f64, f64)) -> (String, (f64, f64)) {
    if let Some(at) = body.rfind('@') {
        let (text, tail) = body.split_at(at);
        let coords: Vec<&str> = tail[1..].split(',').collect();
        if coords.len() == 2 {
            if let (Ok(x), Ok(y)) = (coords[0].trim().parse::<f64>(), coords[1].trim().parse::<f64>())
            {
                return (text.to_string(), (x, y));
            }
        }
    }
    (body.to_string(), default_pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abc::parse_abc;
    use crate::model::PlayableRef;

    fn song_of(abc: &str) -> Song {
        let tune = parse_abc(abc);
        assert!(tune.errors.is_empty(), "parse errors: {:?}", tune.errors);
        transform(&tune, &Settings::default())
    }

    fn song_with(abc: &str, settings: &Settings) -> Song {
        let tune = parse_abc(abc);
        transform(&tune, settings)
    }

    fn playables(voice: &Voice) -> Vec<PlayableRef<'_>> {
        voice
            .entities
            .iter()
            .filter_map(|e| e.as_playable())
            .collect()
    }

    fn gotos(voice: &Voice) -> Vec<&Goto> {
        voice
            .entities
            .iter()
            .filter_map(|e| match e {
                Entity::Goto(g) => Some(g),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn single_bar_yields_linked_notes_and_one_measure() {
        let song = song_of("X:1\nM:4/4\nK:C\nCDEF|\n");
        let voice = song.voice(1).unwrap();
        let ps = playables(voice);
        assert_eq!(ps.len(), 4);
        assert_eq!(
            ps.iter().map(|p| p.pitch()).collect::<Vec<_>>(),
            vec![60, 62, 64, 65]
        );
        assert_eq!(
            ps.iter().map(|p| p.beat().unwrap()).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        let measures = voice
            .entities
            .iter()
            .filter(|e| matches!(e, Entity::MeasureStart(_)))
            .count();
        assert_eq!(measures, 1);
        assert!(ps[0].measure_start());
        assert_eq!(ps[0].measure_count(), Some(1));
        // entity indices skip the interleaved measure-start entity
        assert_eq!(ps[1].prev_playable(), Some(0));
        assert_eq!(ps[0].next_playable(), Some(2));
        assert_eq!(ps[1].prev_pitch(), Some(60));
        assert_eq!(ps[1].next_pitch(), Some(64));
    }

    #[test]
    fn repeat_creates_goto_with_default_distance() {
        let song = song_of("X:1\nM:4/4\nK:C\n|:CDEF:|\n");
        let voice = song.voice(1).unwrap();
        let gs = gotos(voice);
        assert_eq!(gs.len(), 1);
        let g = gs[0];
        assert!(g.policy.is_repeat);
        assert_eq!(g.policy.distance, 2);
        // from the 4th note back to the 1st
        let from = voice.playable(g.from).unwrap();
        let to = voice.playable(g.to).unwrap();
        assert_eq!(from.pitch(), 65);
        assert_eq!(to.pitch(), 60);
    }

    #[test]
    fn repeat_distance_reads_bar_annotation() {
        let song = song_of("X:1\nM:4/4\nK:C\n|:CDEF\"@@5\":|\n");
        let voice = song.voice(1).unwrap();
        let gs = gotos(voice);
        assert_eq!(gs.len(), 1);
        assert_eq!(gs[0].policy.distance, 5);
    }

    #[test]
    fn repetition_stack_balances_on_well_formed_input() {
        let song = song_of("X:1\nM:4/4\nK:C\n|:CD:|:EF:|\n");
        assert!(song.warnings.is_empty());
        let voice = song.voice(1).unwrap();
        assert_eq!(gotos(voice).len(), 2);
    }

    #[test]
    fn ties_mark_first_and_second_note() {
        let song = song_of("X:1\nM:4/4\nK:C\nC-C D|\n");
        let voice = song.voice(1).unwrap();
        let ps = playables(voice);
        assert!(ps[0].tie_start());
        assert!(!ps[0].tie_end());
        assert!(ps[1].tie_end());
        assert!(!ps[1].tie_start());
        assert!(!ps[2].tie_end());
    }

    #[test]
    fn chord_becomes_synch_point_sharing_time() {
        let song = song_of("X:1\nM:4/4\nL:1/4\nK:C\n[CEG]2|\n");
        let voice = song.voice(1).unwrap();
        match &voice.entities[0] {
            Entity::SynchPoint(sp) => {
                assert_eq!(sp.notes.len(), 3);
                assert!(sp.notes.iter().all(|n| n.time == 0));
                assert!(sp.notes.iter().all(|n| n.beat == Some(0)));
            }
            other => panic!("expected a synch point, got {other:?}"),
        }
    }

    #[test]
    fn rest_pitch_centers_between_neighbors() {
        let song = song_of("X:1\nM:4/4\nK:C\nC2 z2 G2|\n");
        let voice = song.voice(1).unwrap();
        let ps = playables(voice);
        assert_eq!(ps[1].pitch(), 63, "center of 60 and 67 rounds down");
    }

    #[test]
    fn rest_pitch_follows_configuration() {
        let mut settings = Settings::default();
        settings.rest_default = RestPosition::Next;
        let song = song_with("X:1\nM:4/4\nK:C\nC2 z2 G2|\n", &settings);
        assert_eq!(playables(song.voice(1).unwrap())[1].pitch(), 67);

        settings.rest_default = RestPosition::Previous;
        let song = song_with("X:1\nM:4/4\nK:C\nC2 z2 G2|\n", &settings);
        assert_eq!(playables(song.voice(1).unwrap())[1].pitch(), 60);
    }

    #[test]
    fn variant_endings_produce_jump_lines() {
        let song = song_of("X:1\nM:4/4\nK:C\n|:CD|1 EF:|2 GA|\n");
        let voice = song.voice(1).unwrap();
        let ps = playables(voice);
        assert_eq!(ps.len(), 6);

        let gs = gotos(voice);
        let repeats: Vec<_> = gs.iter().filter(|g| g.policy.is_repeat).collect();
        assert_eq!(repeats.len(), 1);

        let variant_jumps: Vec<_> = gs.iter().filter(|g| !g.policy.is_repeat).collect();
        assert_eq!(variant_jumps.len(), 1, "one start line into variant 2");
        let start_line = variant_jumps[0];
        assert_eq!(start_line.policy.distance, -10);
        // from the close of variant 1 (F) to the first note of variant 2 (G)
        assert_eq!(voice.playable(start_line.from).unwrap().pitch(), 65);
        assert_eq!(voice.playable(start_line.to).unwrap().pitch(), 67);

        // variant ordinals cover every playable in the bracket
        assert_eq!(ps[2].variant(), Some(1));
        assert_eq!(ps[3].variant(), Some(1));
        assert_eq!(ps[4].variant(), Some(2));
        assert_eq!(ps[5].variant(), Some(2));
        assert_eq!(ps[0].variant(), None);
        // and each bracket carries its label annotation
        let labels: Vec<&str> = voice
            .entities
            .iter()
            .filter_map(|e| match e {
                Entity::NoteBound(nb) => Some(nb.text.as_str()),
                _ => None,
            })
            .collect();
        assert!(labels.contains(&"1"));
        assert!(labels.contains(&"2"));
    }

    #[test]
    fn variant_followup_connects_to_continuation() {
        let song = song_of("X:1\nM:4/4\nK:C\n|:CD|1 EF:|2 GA| cc|\n");
        let voice = song.voice(1).unwrap();
        let gs = gotos(voice);
        let followups: Vec<_> = gs
            .iter()
            .filter(|g| !g.policy.is_repeat && g.policy.distance == 15)
            .collect();
        assert_eq!(followups.len(), 1);
        let f = followups[0];
        assert_eq!(voice.playable(f.from).unwrap().pitch(), 69, "from end of variant 2");
        assert_eq!(voice.playable(f.to).unwrap().pitch(), 72, "into the continuation");
    }

    #[test]
    fn parts_mark_first_note_and_add_annotation() {
        let song = song_of("X:1\nM:4/4\nK:C\nP:A\nCD|\nP:B\nEF|\n");
        let voice = song.voice(1).unwrap();
        let ps = playables(voice);
        assert!(ps[0].first_in_part());
        assert!(ps[2].first_in_part());
        let parts: Vec<&str> = voice
            .entities
            .iter()
            .filter_map(|e| match e {
                Entity::NewPart(p) => Some(p.name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(parts, vec!["A", "B"]);
    }

    #[test]
    fn shift_annotations_set_direction() {
        let song = song_of("X:1\nM:4/4\nK:C\n\"<\"C \">\"D|\n");
        let voice = song.voice(1).unwrap();
        let ps = playables(voice);
        assert_eq!(ps[0].shift(), Some(Shift::Left));
        assert_eq!(ps[1].shift(), Some(Shift::Right));
    }

    #[test]
    fn free_annotation_with_position_suffix() {
        let song = song_of("X:1\nM:4/4\nK:C\n\"!hello@3,4\"C D|\n");
        let voice = song.voice(1).unwrap();
        let nb: Vec<_> = voice
            .entities
            .iter()
            .filter_map(|e| match e {
                Entity::NoteBound(nb) => Some(nb),
                _ => None,
            })
            .collect();
        assert_eq!(nb.len(), 1);
        assert_eq!(nb[0].text, "hello");
        assert_eq!(nb[0].position, (3.0, 4.0));
    }

    #[test]
    fn named_jump_targets_connect() {
        let song = song_of("X:1\nM:4/4\nK:C\n\":fine\"CD \"@fine@4\"E|\n");
        let voice = song.voice(1).unwrap();
        let gs = gotos(voice);
        assert_eq!(gs.len(), 1);
        assert_eq!(gs[0].policy.distance, 4);
        assert_eq!(voice.playable(gs[0].to).unwrap().pitch(), 60);
        assert_eq!(voice.playable(gs[0].from).unwrap().pitch(), 64);
    }

    #[test]
    fn count_labels_follow_the_meter() {
        let song = song_of("X:1\nM:4/4\nL:1/4\nK:C\nCDEF|GABc|\n");
        let voice = song.voice(1).unwrap();
        let ps = playables(voice);
        let labels: Vec<Option<&str>> = ps.iter().map(|p| p.count_note()).collect();
        assert_eq!(
            labels,
            vec![
                Some("1"),
                Some("2"),
                Some("3"),
                Some("4"),
                Some("1"),
                Some("2"),
                Some("3"),
                Some("4")
            ]
        );
    }

    #[test]
    fn unbalanced_repeat_start_warns() {
        let song = song_of("X:1\nM:4/4\nK:C\n|:CD|:EF|\n");
        assert!(song
            .warnings
            .iter()
            .any(|w| w.message.contains("repeat starts")));
    }
}
