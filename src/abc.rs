//! ABC front end — converts ABC notation text into per-voice symbol streams.
//!
//! The producer covers the subset the tablature pipeline consumes: notes,
//! rests, bar structure (repeats and volta brackets), chords, ties, slurs,
//! tuplets, decorations, quoted annotation strings and the header fields
//! `X T C M L Q K V P`. Grace notes, lyrics and engraving directives are
//! outside the subset; unknown characters are reported as parse errors and
//! skipped so partial input still yields a stream.
//!
//! All char offsets are absolute positions in the parsed text. Symbol
//! positions (`start_pos`/`end_pos` line/column pairs) are filled in by the
//! adapter, which owns the newline index.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::ParseError;

/// Parser ticks per whole note.
pub const PARSER_WHOLE: u32 = 1536;

/// Stable small-integer type tags of the symbol kinds consumed downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum SymbolKind {
    Bar = 0,
    Key = 5,
    Meter = 6,
    Note = 8,
    Part = 9,
    Rest = 10,
    Staves = 12,
    Tempo = 14,
}

/// One pitch of a note symbol (a chord carries several).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoteHead {
    pub pitch: i32,
    /// A tie marker (`-`) follows this head.
    pub tie_start: bool,
    pub start_char: usize,
    pub end_char: usize,
}

/// One element of a voice's symbol stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Symbol {
    pub kind: SymbolKind,
    /// Start time in parser ticks, voice-local.
    pub time: u32,
    /// Duration in parser ticks (notes and rests).
    pub dur: u32,
    pub heads: Vec<NoteHead>,

    /// Raw bar token (`"|"`, `":|"`, `"|:"`, `"::"`, `"["` …).
    pub bar_type: Option<String>,
    /// 2 when a volta bracket opens here.
    pub rbstart: u8,
    /// 2 when a volta bracket closes here.
    pub rbstop: u8,
    /// Volta label (`"1"`, `"2"`, `"1,2"`).
    pub volta_text: Option<String>,

    /// Quoted annotation strings attached to this symbol.
    pub annotations: Vec<String>,
    pub decorations: Vec<String>,
    /// Nibble-packed slur-start markers (one nibble per opened slur).
    pub slur_start: u32,
    /// Number of slurs closing after this symbol.
    pub slur_end: u8,

    /// Tuplet divisor in effect (1 outside tuplets).
    pub tuplet: u32,
    pub tuplet_start: bool,
    pub tuplet_end: bool,

    /// `x` rests occupy time but are not drawn.
    pub invisible: bool,

    /// Part label, tempo text, meter text or key text.
    pub text: Option<String>,
    /// Parser ticks per measure (meter symbols).
    pub wmeasure: u32,
    /// Meter denominator (count-beat grouping).
    pub denominator: u32,
    pub tempo_bpm: Option<f64>,

    pub start_char: usize,
    pub end_char: usize,
    /// (line, column), 1-based; assigned by the adapter.
    pub start_pos: (usize, usize),
    pub end_pos: (usize, usize),
}

impl Symbol {
    fn new(kind: SymbolKind, time: u32, start_char: usize) -> Self {
        Self {
            kind,
            time,
            dur: 0,
            heads: Vec::new(),
            bar_type: None,
            rbstart: 0,
            rbstop: 0,
            volta_text: None,
            annotations: Vec::new(),
            decorations: Vec::new(),
            slur_start: 0,
            slur_end: 0,
            tuplet: 1,
            tuplet_start: false,
            tuplet_end: false,
            invisible: false,
            text: None,
            wmeasure: 0,
            denominator: 4,
            tempo_bpm: None,
            start_char,
            end_char: start_char,
            start_pos: (0, 0),
            end_pos: (0, 0),
        }
    }
}

/// The captured symbol chain of one voice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceStream {
    /// 1-based voice id as written in `V:` lines.
    pub id: usize,
    pub name: String,
    pub symbols: Vec<Symbol>,
}

/// Header metadata of the tune.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TuneMeta {
    pub tune_id: Option<String>,
    pub title: Option<String>,
    pub composer: Option<String>,
    pub meter_text: Option<String>,
    pub key_text: Option<String>,
    pub tempo_text: Option<String>,
    /// Quarter notes per minute (default 120).
    pub tempo_qpm: f64,
}

/// The parsed tune: per-voice symbol streams plus metadata and errors.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Tune {
    pub voices: Vec<VoiceStream>,
    pub meta: TuneMeta,
    /// Parser ticks per measure after the header.
    pub wmeasure: u32,
    /// Meter denominator after the header.
    pub denominator: u32,
    pub errors: Vec<ParseError>,
}

/// Parse ABC text into a [`Tune`]. Never fails wholesale: errors accumulate
/// and parsing continues with the next character or line.
pub fn parse_abc(text: &str) -> Tune {
    Parser::new(text).run()
}

// ─── Key signatures ─────────────────────────────────────────────────

const SHARP_ORDER: [char; 7] = ['F', 'C', 'G', 'D', 'A', 'E', 'B'];
const FLAT_ORDER: [char; 7] = ['B', 'E', 'A', 'D', 'G', 'C', 'F'];

fn letter_semitone(letter: char) -> i32 {
    match letter.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => 0,
    }
}

/// Position of a major tonic on the circle of fifths.
fn major_fifths(letter: char, accidental: i32) -> i32 {
    let base = match letter {
        'F' => -1,
        'C' => 0,
        'G' => 1,
        'D' => 2,
        'A' => 3,
        'E' => 4,
        'B' => 5,
        _ => 0,
    };
    base + 7 * accidental
}

/// The key-signature alteration of a natural letter under `fifths`.
fn key_accidental(fifths: i32, letter: char) -> i32 {
    if fifths > 0 {
        let n = (fifths as usize).min(7);
        if SHARP_ORDER[..n].contains(&letter) {
            return 1;
        }
    } else if fifths < 0 {
        let n = ((-fifths) as usize).min(7);
        if FLAT_ORDER[..n].contains(&letter) {
            return -1;
        }
    }
    0
}

// ─── Parser ─────────────────────────────────────────────────────────

struct VoiceState {
    id: usize,
    name: String,
    symbols: Vec<Symbol>,
    time: u32,
    /// (letter, octave) -> alteration, valid to the end of the measure.
    measure_accidentals: HashMap<(char, i32), i32>,
    pending_annotations: Vec<String>,
    pending_decorations: Vec<String>,
    pending_slur_starts: u32,
    /// remaining notes / divisor / multiplier / total of the open tuplet
    tuplet_remaining: u32,
    tuplet_p: u32,
    tuplet_q: u32,
    tuplet_total: u32,
    volta_open: bool,
}

impl VoiceState {
    fn new(id: usize) -> Self {
        Self {
            id,
            name: id.to_string(),
            symbols: Vec::new(),
            time: 0,
            measure_accidentals: HashMap::new(),
            pending_annotations: Vec::new(),
            pending_decorations: Vec::new(),
            pending_slur_starts: 0,
            tuplet_remaining: 0,
            tuplet_p: 1,
            tuplet_q: 1,
            tuplet_total: 0,
            volta_open: false,
        }
    }
}

struct Parser {
    chars: Vec<char>,
    errors: Vec<ParseError>,
    meta: TuneMeta,
    unit_len: u32,
    unit_len_explicit: bool,
    wmeasure: u32,
    denominator: u32,
    key_fifths: i32,
    in_body: bool,
    voices: Vec<VoiceState>,
    current_voice: usize,
    line_no: usize,
    line_start: usize,
}

impl Parser {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            errors: Vec::new(),
            meta: TuneMeta { tempo_qpm: 120.0, ..TuneMeta::default() },
            unit_len: PARSER_WHOLE / 8,
            unit_len_explicit: false,
            wmeasure: PARSER_WHOLE,
            denominator: 4,
            key_fifths: 0,
            in_body: false,
            voices: Vec::new(),
            current_voice: 0,
            line_no: 0,
            line_start: 0,
        }
    }

    fn error_at(&mut self, offset: usize, message: String) {
        let column = offset.saturating_sub(self.line_start) + 1;
        self.errors.push(ParseError::new(message, self.line_no, column));
    }

    fn voice(&mut self) -> &mut VoiceState {
        if self.voices.is_empty() {
            self.voices.push(VoiceState::new(1));
            self.current_voice = 0;
        }
        &mut self.voices[self.current_voice]
    }

    fn switch_voice(&mut self, id: usize) {
        match self.voices.iter().position(|v| v.id == id) {
            Some(pos) => self.current_voice = pos,
            None => {
                self.voices.push(VoiceState::new(id));
                self.current_voice = self.voices.len() - 1;
            }
        }
    }

    fn run(mut self) -> Tune {
        let lines: Vec<(usize, usize)> = {
            // (start, end) char ranges of each line
            let mut out = Vec::new();
            let mut start = 0;
            for (i, &c) in self.chars.iter().enumerate() {
                if c == '\n' {
                    out.push((start, i));
                    start = i + 1;
                }
            }
            if start < self.chars.len() {
                out.push((start, self.chars.len()));
            }
            out
        };

        for (lineno, &(start, end)) in lines.iter().enumerate() {
            self.line_no = lineno + 1;
            self.line_start = start;
            let line: String = self.chars[start..end].iter().collect();
            let trimmed = line.trim_end_matches('\r');

            if trimmed.trim().is_empty() || trimmed.starts_with('%') {
                continue;
            }

            let mut cs = trimmed.chars();
            let first = cs.next();
            let second = cs.next();
            if let (Some(letter), Some(':')) = (first, second) {
                if letter.is_ascii_alphabetic() {
                    let rest: String = trimmed[2..].to_string();
                    self.handle_field(letter, rest.trim(), start);
                    continue;
                }
            }

            if self.in_body {
                self.parse_music_line(trimmed, start);
            }
        }

        self.voices.sort_by_key(|v| v.id);
        Tune {
            voices: self
                .voices
                .into_iter()
                .map(|v| VoiceStream { id: v.id, name: v.name, symbols: v.symbols })
                .collect(),
            meta: self.meta,
            wmeasure: self.wmeasure,
            denominator: self.denominator,
            errors: self.errors,
        }
    }

    // ─── Field lines ────────────────────────────────────────────────

    fn handle_field(&mut self, letter: char, value: &str, offset: usize) {
        match letter {
            'X' => self.meta.tune_id = Some(value.to_string()),
            'T' => {
                if self.meta.title.is_none() {
                    self.meta.title = Some(value.to_string());
                }
            }
            'C' => self.meta.composer = Some(value.to_string()),
            'M' => self.handle_meter(value, offset),
            'L' => {
                if let Some((num, den)) = parse_fraction(value) {
                    self.unit_len = PARSER_WHOLE * num / den;
                    self.unit_len_explicit = true;
                }
            }
            'Q' => self.handle_tempo(value, offset),
            'K' => self.handle_key(value, offset),
            'V' => self.handle_voice_field(value, offset),
            'P' => {
                if self.in_body {
                    let time = self.voice().time;
                    let mut sym = Symbol::new(SymbolKind::Part, time, offset);
                    sym.end_char = offset + value.len() + 2;
                    sym.text = Some(value.split_whitespace().next().unwrap_or("").to_string());
                    self.voice().symbols.push(sym);
                }
            }
            // lyrics, history, notes … are outside the subset
            _ => {}
        }
    }

    fn handle_meter(&mut self, value: &str, offset: usize) {
        let (num, den) = match value.trim() {
            "C" => (4, 4),
            "C|" => (2, 2),
            "none" => (4, 4),
            v => match parse_fraction(v) {
                Some(f) => f,
                None => {
                    self.error_at(offset, format!("cannot read meter '{v}'"));
                    return;
                }
            },
        };
        self.wmeasure = PARSER_WHOLE * num / den;
        self.denominator = den;
        if self.meta.meter_text.is_none() {
            self.meta.meter_text = Some(value.trim().to_string());
        }
        if !self.unit_len_explicit {
            self.unit_len = if num * 4 >= den * 3 {
                // >= 3/4 : default unit is the eighth
                PARSER_WHOLE / 8
            } else {
                PARSER_WHOLE / 16
            };
        }
        if self.in_body {
            let time = self.voice().time;
            let mut sym = Symbol::new(SymbolKind::Meter, time, offset);
            sym.wmeasure = self.wmeasure;
            sym.denominator = self.denominator;
            sym.text = Some(value.trim().to_string());
            self.voice().symbols.push(sym);
        }
    }

    fn handle_tempo(&mut self, value: &str, offset: usize) {
        let v = value.trim();
        let qpm = if let Some((frac, bpm)) = v.split_once('=') {
            match (parse_fraction(frac), bpm.trim().parse::<f64>()) {
                (Some((num, den)), Ok(bpm)) => {
                    let base_ticks = PARSER_WHOLE as f64 * num as f64 / den as f64;
                    Some(bpm * base_ticks / (PARSER_WHOLE as f64 / 4.0))
                }
                _ => None,
            }
        } else {
            v.parse::<f64>().ok()
        };
        match qpm {
            Some(qpm) => {
                self.meta.tempo_qpm = qpm;
                self.meta.tempo_text = Some(v.to_string());
                if self.in_body {
                    let time = self.voice().time;
                    let mut sym = Symbol::new(SymbolKind::Tempo, time, offset);
                    sym.tempo_bpm = Some(qpm);
                    sym.text = Some(v.to_string());
                    self.voice().symbols.push(sym);
                }
            }
            None => self.error_at(offset, format!("cannot read tempo '{v}'")),
        }
    }

    fn handle_key(&mut self, value: &str, offset: usize) {
        let v = value.trim();
        let mut cs = v.chars().peekable();
        let tonic = match cs.next() {
            Some(c) if c.is_ascii_uppercase() && ('A'..='G').contains(&c) => c,
            _ => {
                self.error_at(offset, format!("cannot read key '{v}'"));
                'C'
            }
        };
        let accidental = match cs.peek() {
            Some('#') => {
                cs.next();
                1
            }
            Some('b') => {
                cs.next();
                -1
            }
            _ => 0,
        };
        let mode: String = cs.collect::<String>().trim().to_lowercase();
        let minor = mode == "m" || mode.starts_with("min");
        let mut fifths = major_fifths(tonic, accidental);
        if minor {
            fifths -= 3;
        }
        self.key_fifths = fifths;
        if self.meta.key_text.is_none() {
            self.meta.key_text = Some(v.to_string());
        }

        if self.in_body {
            let time = self.voice().time;
            let mut sym = Symbol::new(SymbolKind::Key, time, offset);
            sym.text = Some(v.to_string());
            self.voice().symbols.push(sym);
        } else {
            // K: ends the header
            self.in_body = true;
            self.voice();
        }
    }

    fn handle_voice_field(&mut self, value: &str, offset: usize) {
        let mut parts = value.split_whitespace();
        let id_token = parts.next().unwrap_or("");
        let id = match id_token.parse::<usize>() {
            Ok(id) if id >= 1 => id,
            _ => {
                self.error_at(offset, format!("voice id '{id_token}' is not a positive integer"));
                return;
            }
        };
        self.switch_voice(id);
        // optional name="…"
        if let Some(pos) = value.find("name=\"") {
            let rest = &value[pos + 6..];
            if let Some(end) = rest.find('"') {
                let name = rest[..end].to_string();
                self.voice().name = name;
            }
        }
    }

    // ─── Music lines ────────────────────────────────────────────────

    fn parse_music_line(&mut self, line: &str, offset: usize) {
        let chars: Vec<char> = line.chars().collect();
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            let abs = offset + i;
            match c {
                ' ' | '\t' => i += 1,
                '\\' if i + 1 == chars.len() => i += 1,
                '%' => break,
                'y' => {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                '"' => {
                    let start = i + 1;
                    match chars[start..].iter().position(|&c| c == '"') {
                        Some(len) => {
                            let text: String = chars[start..start + len].iter().collect();
                            self.voice().pending_annotations.push(text);
                            i = start + len + 1;
                        }
                        None => {
                            self.error_at(abs, "unterminated annotation string".to_string());
                            i = chars.len();
                        }
                    }
                }
                '!' => {
                    let start = i + 1;
                    match chars[start..].iter().position(|&c| c == '!') {
                        Some(len) => {
                            let text: String = chars[start..start + len].iter().collect();
                            self.voice().pending_decorations.push(text);
                            i = start + len + 1;
                        }
                        None => {
                            self.error_at(abs, "unterminated decoration".to_string());
                            i = chars.len();
                        }
                    }
                }
                '.' => {
                    self.voice().pending_decorations.push("staccato".to_string());
                    i += 1;
                }
                '~' => {
                    self.voice().pending_decorations.push("roll".to_string());
                    i += 1;
                }
                '(' => {
                    if i + 1 < chars.len() && chars[i + 1].is_ascii_digit() {
                        i = self.parse_tuplet_spec(&chars, i + 1);
                    } else {
                        self.voice().pending_slur_starts += 1;
                        i += 1;
                    }
                }
                ')' => {
                    let voice = self.voice();
                    match voice.symbols.iter_mut().rev().find(|s| s.kind == SymbolKind::Note) {
                        Some(sym) => sym.slur_end += 1,
                        None => self.error_at(abs, "slur end without a note".to_string()),
                    }
                    i += 1;
                }
                '-' => {
                    let voice = self.voice();
                    match voice.symbols.iter_mut().rev().find(|s| s.kind == SymbolKind::Note) {
                        Some(sym) => {
                            for head in &mut sym.heads {
                                head.tie_start = true;
                            }
                        }
                        None => self.error_at(abs, "tie without a note".to_string()),
                    }
                    i += 1;
                }
                '|' | ':' => {
                    i = self.parse_bar(&chars, i, offset);
                }
                '[' => {
                    if let Some(next) = chars.get(i + 1) {
                        if next.is_ascii_digit() || *next == '|' {
                            i = self.parse_bar(&chars, i, offset);
                        } else if chars.get(i + 2) == Some(&':') && next.is_ascii_alphabetic() {
                            i = self.parse_inline_field(&chars, i, offset);
                        } else {
                            i = self.parse_chord(&chars, i, offset);
                        }
                    } else {
                        self.error_at(abs, "dangling '['".to_string());
                        i += 1;
                    }
                }
                'z' | 'x' => {
                    let start = i;
                    i += 1;
                    let (num, den, ni) = parse_duration_token(&chars, i);
                    i = ni;
                    let dur = self.scaled_duration(num, den);
                    self.push_rest(dur, c == 'x', offset + start, offset + i);
                }
                'Z' => {
                    let start = i;
                    i += 1;
                    let mut count = 0u32;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        count = count * 10 + chars[i].to_digit(10).unwrap_or(0);
                        i += 1;
                    }
                    let dur = self.wmeasure * count.max(1);
                    self.push_rest(dur, false, offset + start, offset + i);
                }
                '^' | '_' | '=' => {
                    i = self.parse_single_note(&chars, i, offset);
                }
                c if c.is_ascii_alphabetic() && ('A'..='G').contains(&c.to_ascii_uppercase()) => {
                    i = self.parse_single_note(&chars, i, offset);
                }
                other => {
                    self.error_at(abs, format!("unexpected character '{other}'"));
                    i += 1;
                }
            }
        }
    }

    fn parse_tuplet_spec(&mut self, chars: &[char], mut i: usize) -> usize {
        let mut nums: Vec<u32> = Vec::new();
        loop {
            let mut n = 0u32;
            let mut saw = false;
            while i < chars.len() && chars[i].is_ascii_digit() {
                n = n * 10 + chars[i].to_digit(10).unwrap_or(0);
                i += 1;
                saw = true;
            }
            if saw {
                nums.push(n);
            }
            if i < chars.len() && chars[i] == ':' {
                i += 1;
            } else {
                break;
            }
        }
        let p = *nums.first().unwrap_or(&1);
        let q = nums.get(1).copied().filter(|&q| q > 0).unwrap_or(match p {
            2 | 4 | 8 => 3,
            _ => 2,
        });
        let r = nums.get(2).copied().filter(|&r| r > 0).unwrap_or(p);
        let voice = self.voice();
        voice.tuplet_p = p.max(1);
        voice.tuplet_q = q;
        voice.tuplet_remaining = r;
        voice.tuplet_total = r;
        i
    }

    fn parse_inline_field(&mut self, chars: &[char], i: usize, offset: usize) -> usize {
        // chars[i] == '[', chars[i+1] is the field letter, chars[i+2] == ':'
        let letter = chars[i + 1];
        let start = i + 3;
        match chars[start..].iter().position(|&c| c == ']') {
            Some(len) => {
                let value: String = chars[start..start + len].iter().collect();
                self.handle_field(letter, value.trim(), offset + i);
                start + len + 1
            }
            None => {
                self.error_at(offset + i, "unterminated inline field".to_string());
                chars.len()
            }
        }
    }

    fn parse_bar(&mut self, chars: &[char], i: usize, offset: usize) -> usize {
        let start = i;
        let rest: String = chars[i..].iter().collect();
        let (token, mut consumed) = if rest.starts_with(":|") {
            let mut t = ":|".to_string();
            let mut n = 2;
            if rest[n..].starts_with(']') {
                t.push(']');
                n += 1;
            } else if rest[n..].starts_with(':') {
                t = ":|:".to_string();
                n += 1;
            }
            (t, n)
        } else if rest.starts_with("::") {
            ("::".to_string(), 2)
        } else if rest.starts_with("|:") {
            ("|:".to_string(), 2)
        } else if rest.starts_with("||") {
            ("||".to_string(), 2)
        } else if rest.starts_with("|]") {
            ("|]".to_string(), 2)
        } else if rest.starts_with("[|") {
            ("[|".to_string(), 2)
        } else if rest.starts_with('|') {
            ("|".to_string(), 1)
        } else if rest.starts_with('[') {
            ("[".to_string(), 1)
        } else {
            self.error_at(offset + i, "stray ':'".to_string());
            return i + 1;
        };

        // volta label directly after the bar token
        let mut volta = String::new();
        {
            let bytes: Vec<char> = rest.chars().collect();
            let mut j = consumed;
            while j < bytes.len() && (bytes[j].is_ascii_digit() || bytes[j] == ',') {
                volta.push(bytes[j]);
                j += 1;
            }
            consumed = j;
        }
        if token == "[" && volta.is_empty() {
            // not a volta bracket after all — should not happen, the caller
            // checked for a digit
            self.error_at(offset + i, "dangling '['".to_string());
            return i + 1;
        }

        let time = self.voice().time;
        let mut sym = Symbol::new(SymbolKind::Bar, time, offset + start);
        sym.end_char = offset + start + consumed;
        sym.bar_type = Some(token);
        let voice_volta_open = self.voice().volta_open;
        if voice_volta_open {
            sym.rbstop = 2;
            self.voice().volta_open = false;
        }
        if !volta.is_empty() {
            sym.rbstart = 2;
            sym.volta_text = Some(volta);
            self.voice().volta_open = true;
        }
        let voice = self.voice();
        sym.annotations = std::mem::take(&mut voice.pending_annotations);
        voice.measure_accidentals.clear();
        voice.symbols.push(sym);

        start + consumed
    }

    fn parse_chord(&mut self, chars: &[char], i: usize, offset: usize) -> usize {
        let start = i;
        let mut j = i + 1;
        let mut heads: Vec<NoteHead> = Vec::new();
        let mut head_dur: Option<(u32, u32)> = None;

        while j < chars.len() && chars[j] != ']' {
            if chars[j] == ' ' {
                j += 1;
                continue;
            }
            match self.parse_pitch(chars, j, offset) {
                Some((pitch, nj)) => {
                    let head_start = offset + j;
                    j = nj;
                    let (num, den, nj) = parse_duration_token(chars, j);
                    j = nj;
                    if head_dur.is_none() {
                        head_dur = Some((num, den));
                    }
                    let mut tie = false;
                    if j < chars.len() && chars[j] == '-' {
                        tie = true;
                        j += 1;
                    }
                    heads.push(NoteHead {
                        pitch,
                        tie_start: tie,
                        start_char: head_start,
                        end_char: offset + j,
                    });
                }
                None => {
                    self.error_at(offset + j, format!("unexpected character '{}' in chord", chars[j]));
                    j += 1;
                }
            }
        }
        if j >= chars.len() {
            self.error_at(offset + start, "unterminated chord".to_string());
            return chars.len();
        }
        j += 1; // ']'

        // chord-level duration multiplier and tie
        let (cnum, cden, nj) = parse_duration_token(chars, j);
        j = nj;
        let mut chord_tie = false;
        if j < chars.len() && chars[j] == '-' {
            chord_tie = true;
            j += 1;
        }

        if heads.is_empty() {
            self.error_at(offset + start, "empty chord".to_string());
            return j;
        }

        let (hnum, hden) = head_dur.unwrap_or((1, 1));
        let dur = self.scaled_duration(hnum * cnum, hden * cden);
        if chord_tie {
            for head in &mut heads {
                head.tie_start = true;
            }
        }
        self.push_note(heads, dur, offset + start, offset + j);
        j
    }

    fn parse_single_note(&mut self, chars: &[char], i: usize, offset: usize) -> usize {
        let start = i;
        match self.parse_pitch(chars, i, offset) {
            Some((pitch, mut j)) => {
                let (num, den, nj) = parse_duration_token(chars, j);
                j = nj;
                let mut tie = false;
                if j < chars.len() && chars[j] == '-' {
                    tie = true;
                    j += 1;
                }
                let dur = self.scaled_duration(num, den);
                let head = NoteHead {
                    pitch,
                    tie_start: tie,
                    start_char: offset + start,
                    end_char: offset + j,
                };
                self.push_note(vec![head], dur, offset + start, offset + j);
                j
            }
            None => {
                self.error_at(offset + i, format!("cannot read note at '{}'", chars[i]));
                i + 1
            }
        }
    }

    /// Parse accidental, letter and octave marks. Returns (midi, next index).
    fn parse_pitch(&mut self, chars: &[char], mut i: usize, _offset: usize) -> Option<(i32, usize)> {
        let mut explicit: Option<i32> = None;
        if i < chars.len() {
            match chars[i] {
                '^' => {
                    i += 1;
                    if chars.get(i) == Some(&'^') {
                        i += 1;
                        explicit = Some(2);
                    } else {
                        explicit = Some(1);
                    }
                }
                '_' => {
                    i += 1;
                    if chars.get(i) == Some(&'_') {
                        i += 1;
                        explicit = Some(-2);
                    } else {
                        explicit = Some(-1);
                    }
                }
                '=' => {
                    i += 1;
                    explicit = Some(0);
                }
                _ => {}
            }
        }

        let letter = *chars.get(i)?;
        if !letter.is_ascii_alphabetic() || !('A'..='G').contains(&letter.to_ascii_uppercase()) {
            return None;
        }
        i += 1;

        let mut octave = if letter.is_ascii_lowercase() { 5 } else { 4 };
        while i < chars.len() {
            match chars[i] {
                ',' => {
                    octave -= 1;
                    i += 1;
                }
                '\'' => {
                    octave += 1;
                    i += 1;
                }
                _ => break,
            }
        }

        let upper = letter.to_ascii_uppercase();
        let key_alter = key_accidental(self.key_fifths, upper);
        let voice = self.voice();
        let alter = match explicit {
            Some(a) => {
                voice.measure_accidentals.insert((upper, octave), a);
                a
            }
            None => *voice
                .measure_accidentals
                .get(&(upper, octave))
                .unwrap_or(&key_alter),
        };

        let midi = (octave + 1) * 12 + letter_semitone(letter) + alter;
        Some((midi, i))
    }

    fn scaled_duration(&mut self, num: u32, den: u32) -> u32 {
        let mut dur = self.unit_len * num / den.max(1);
        let voice = self.voice();
        if voice.tuplet_remaining > 0 {
            dur = dur * voice.tuplet_q / voice.tuplet_p.max(1);
        }
        dur
    }

    fn push_note(&mut self, heads: Vec<NoteHead>, dur: u32, start: usize, end: usize) {
        let time = self.voice().time;
        let mut sym = Symbol::new(SymbolKind::Note, time, start);
        sym.end_char = end;
        sym.heads = heads;
        sym.dur = dur;
        self.attach_pending(&mut sym);
        self.apply_tuplet(&mut sym);
        let voice = self.voice();
        voice.time += dur;
        voice.symbols.push(sym);
    }

    fn push_rest(&mut self, dur: u32, invisible: bool, start: usize, end: usize) {
        let time = self.voice().time;
        let mut sym = Symbol::new(SymbolKind::Rest, time, start);
        sym.end_char = end;
        sym.dur = dur;
        sym.invisible = invisible;
        self.attach_pending(&mut sym);
        self.apply_tuplet(&mut sym);
        let voice = self.voice();
        voice.time += sym.dur;
        voice.symbols.push(sym);
    }

    fn attach_pending(&mut self, sym: &mut Symbol) {
        let voice = self.voice();
        sym.annotations = std::mem::take(&mut voice.pending_annotations);
        sym.decorations = std::mem::take(&mut voice.pending_decorations);
        let starts = voice.pending_slur_starts;
        voice.pending_slur_starts = 0;
        for k in 0..starts.min(8) {
            sym.slur_start |= 1 << (4 * k);
        }
    }

    fn apply_tuplet(&mut self, sym: &mut Symbol) {
        let voice = self.voice();
        if voice.tuplet_remaining > 0 {
            sym.tuplet = voice.tuplet_p;
            sym.tuplet_start = voice.tuplet_remaining == voice.tuplet_total;
            voice.tuplet_remaining -= 1;
            sym.tuplet_end = voice.tuplet_remaining == 0;
            if sym.tuplet_end {
                voice.tuplet_p = 1;
                voice.tuplet_q = 1;
                voice.tuplet_total = 0;
            }
        }
    }
}

/// Parse a duration multiplier: `""`, `"2"`, `"3/2"`, `"/"`, `"//"`, `"/4"`.
/// Returns (numerator, denominator, next index).
fn parse_duration_token(chars: &[char], mut i: usize) -> (u32, u32, usize) {
    let mut num = 0u32;
    let mut saw_num = false;
    while i < chars.len() && chars[i].is_ascii_digit() {
        num = num * 10 + chars[i].to_digit(10).unwrap_or(0);
        i += 1;
        saw_num = true;
    }
    let num = if saw_num { num.max(1) } else { 1 };

    let mut slashes = 0u32;
    let mut den = 0u32;
    let mut saw_den = false;
    while i < chars.len() && chars[i] == '/' {
        slashes += 1;
        i += 1;
        if i < chars.len() && chars[i].is_ascii_digit() {
            let mut d = 0u32;
            while i < chars.len() && chars[i].is_ascii_digit() {
                d = d * 10 + chars[i].to_digit(10).unwrap_or(0);
                i += 1;
            }
            den = d.max(1);
            saw_den = true;
            break;
        }
    }
    let den = if saw_den {
        den
    } else if slashes > 0 {
        1 << slashes
    } else {
        1
    };
    (num, den, i)
}

/// Parse `"3/4"` or `"4"` into a fraction.
fn parse_fraction(text: &str) -> Option<(u32, u32)> {
    let t = text.trim();
    match t.split_once('/') {
        Some((n, d)) => {
            let n = n.trim().parse::<u32>().ok()?;
            let d = d.trim().parse::<u32>().ok()?;
            if d == 0 {
                return None;
            }
            Some((n, d))
        }
        None => {
            let n = t.parse::<u32>().ok()?;
            Some((n, 1))
        }
    }
}
