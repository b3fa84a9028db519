//! Layout engine — converts a [`Song`] plus one extract configuration into
//! a [`Sheet`] of drawables.
//!
//! The coordinate model is the tablature's: X encodes pitch (one string per
//! semitone column), Y encodes time through the content-aware beat
//! compression, so a whole tune fits one page.

mod annotations;
mod beat_map;
mod constants;
pub mod glyphs;
mod jumplines;
mod notes;

use std::collections::HashMap;

use beat_map::{compress, BeatCompression, PackerSettings};
use constants::*;

use crate::config::{instrument_preset, ConfStack, ConfValue};
use crate::drawing::{Drawable, PrinterSpec, Sheet, TextStyle};
use crate::error::Result;
use crate::model::{Entity, Song, Ticks};

/// Bar-number / count-note rendering options.
#[derive(Debug, Clone)]
pub struct CounterSpec {
    pub voices: Vec<usize>,
    pub pos: (f64, f64),
    pub prefix: String,
    pub style: TextStyle,
}

/// One free-standing sheet note from `extract.<n>.notes`.
#[derive(Debug, Clone)]
pub struct SheetNote {
    pub pos: (f64, f64),
    pub text: String,
    pub style: TextStyle,
    pub conf_key: String,
}

/// The extract configuration resolved into plain values. Extract `n` falls
/// back to extract 0 for everything it does not override.
#[derive(Debug, Clone)]
pub struct LayoutSettings {
    pub extract: usize,
    pub title: String,
    pub startpos: f64,
    pub layoutlines: Vec<usize>,
    pub flowlines: Vec<usize>,
    pub subflowlines: Vec<usize>,
    pub jumplines: Vec<usize>,
    pub synchlines: Vec<(usize, usize)>,

    pub x_spacing: f64,
    pub x_offset: f64,
    pub pitch_offset: f64,
    pub ellipse_size: (f64, f64),
    pub rest_size: (f64, f64),
    pub line_thin: f64,
    pub line_medium: f64,
    pub line_thick: f64,
    pub jumpline_anchor: (f64, f64),
    pub bottomup: bool,
    pub beams: bool,
    pub limit_a3: bool,
    pub color_default: String,
    pub color_variant1: String,
    pub color_variant2: String,

    pub pack_method: u8,
    pub pack_max_spreadfactor: f64,
    pub pack_min_increment: f64,

    pub barnumbers: CounterSpec,
    pub countnotes: CounterSpec,
    pub stringnames_text: Option<String>,
    pub stringnames_vpos: f64,
    pub stringnames_base: i32,
    pub legend_pos: (f64, f64),
    pub legend_spos: (f64, f64),
    pub notes: Vec<SheetNote>,
    pub printer: PrinterSpec,
}

impl LayoutSettings {
    pub fn from_conf(conf: &ConfStack, extract: usize) -> Result<Self> {
        let get = |suffix: &str| -> Result<Option<ConfValue>> {
            if let Some(v) = conf.get(&format!("extract.{extract}.{suffix}"))? {
                return Ok(Some(v));
            }
            conf.get(&format!("extract.0.{suffix}"))
        };
        let f64_of = |suffix: &str, fallback: f64| -> Result<f64> {
            Ok(get(suffix)?.and_then(|v| v.as_f64()).unwrap_or(fallback))
        };
        let bool_of = |suffix: &str, fallback: bool| -> Result<bool> {
            Ok(get(suffix)?.and_then(|v| v.as_bool()).unwrap_or(fallback))
        };
        let pair_of = |suffix: &str, fallback: (f64, f64)| -> Result<(f64, f64)> {
            Ok(get(suffix)?.and_then(|v| v.as_pair()).unwrap_or(fallback))
        };
        let str_of = |suffix: &str, fallback: &str| -> Result<String> {
            Ok(get(suffix)?
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_else(|| fallback.to_string()))
        };
        let voices_of = |suffix: &str| -> Result<Vec<usize>> {
            Ok(get(suffix)?.map(|v| usize_list(&v)).unwrap_or_default())
        };

        let barnumbers = CounterSpec {
            voices: voices_of("barnumbers.voices")?,
            pos: pair_of("barnumbers.pos", (6.0, -4.0))?,
            prefix: str_of("barnumbers.prefix", "")?,
            style: TextStyle::from_name(&str_of("barnumbers.style", "small")?),
        };
        let countnotes = CounterSpec {
            voices: voices_of("countnotes.voices")?,
            pos: pair_of("countnotes.pos", (3.0, -2.0))?,
            prefix: String::new(),
            style: TextStyle::from_name(&str_of("countnotes.style", "smaller")?),
        };

        let synchlines = get("synchlines")?
            .and_then(|v| {
                v.as_seq().map(|pairs| {
                    pairs
                        .iter()
                        .filter_map(|p| {
                            let list = usize_list(p);
                            if list.len() == 2 {
                                Some((list[0], list[1]))
                            } else {
                                None
                            }
                        })
                        .collect::<Vec<_>>()
                })
            })
            .unwrap_or_default();

        let mut notes = Vec::new();
        if let Some(map) = get("notes")?.and_then(|v| v.as_map().cloned()) {
            for (id, note) in map {
                let pos = note.child("pos").and_then(|p| p.as_pair());
                let text = note.child("text").and_then(|t| t.as_str().map(String::from));
                if let (Some(pos), Some(text)) = (pos, text) {
                    let style = note
                        .child("style")
                        .and_then(|s| s.as_str())
                        .map(TextStyle::from_name)
                        .unwrap_or(TextStyle::Regular);
                    notes.push(SheetNote {
                        pos,
                        text,
                        style,
                        conf_key: format!("extract.{extract}.notes.{id}.pos"),
                    });
                }
            }
        }

        let instrument = conf
            .get("instrument")?
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default();
        let stringnames_base = instrument_preset(&instrument).map(|(p, _)| p).unwrap_or(43);

        let printer = PrinterSpec {
            a3_offset: pair_of("printer.a3_offset", (0.0, 0.0))?,
            a4_offset: pair_of("printer.a4_offset", (-5.0, 0.0))?,
            show_border: bool_of("printer.show_border", false)?,
        };

        Ok(Self {
            extract,
            title: str_of("title", "")?,
            startpos: f64_of("startpos", 15.0)?,
            layoutlines: voices_of("layoutlines")?,
            flowlines: voices_of("flowlines")?,
            subflowlines: voices_of("subflowlines")?,
            jumplines: voices_of("jumplines")?,
            synchlines,
            x_spacing: f64_of("layout.X_SPACING", 11.5)?,
            x_offset: f64_of("layout.X_OFFSET", 2.8)?,
            pitch_offset: f64_of("layout.PITCH_OFFSET", -43.0)?,
            ellipse_size: pair_of("layout.ELLIPSE_SIZE", (3.5, 1.7))?,
            rest_size: pair_of("layout.REST_SIZE", (4.0, 2.0))?,
            line_thin: f64_of("layout.LINE_THIN", 0.1)?,
            line_medium: f64_of("layout.LINE_MEDIUM", 0.3)?,
            line_thick: f64_of("layout.LINE_THICK", 0.5)?,
            jumpline_anchor: pair_of("layout.jumpline_anchor", (3.5, 1.0))?,
            bottomup: bool_of("layout.bottomup", false)?,
            beams: bool_of("layout.beams", false)?,
            limit_a3: bool_of("layout.limit_a3", true)?,
            color_default: str_of("layout.color.color_default", "black")?,
            color_variant1: str_of("layout.color.color_variant1", "grey")?,
            color_variant2: str_of("layout.color.color_variant2", "dimgrey")?,
            pack_method: f64_of("layout.packer.pack_method", 0.0)? as u8,
            pack_max_spreadfactor: f64_of("layout.packer.pack_max_spreadfactor", 2.0)?,
            pack_min_increment: f64_of("layout.packer.pack_min_increment", 0.2)?,
            barnumbers,
            countnotes,
            stringnames_text: get("stringnames.text")?
                .and_then(|v| v.as_str().map(String::from)),
            stringnames_vpos: f64_of("stringnames.vpos", 4.0)?,
            stringnames_base,
            legend_pos: pair_of("legend.pos", (320.0, 27.0))?,
            legend_spos: pair_of("legend.spos", (320.0, 7.0))?,
            notes,
            printer,
        })
    }
}

fn usize_list(value: &ConfValue) -> Vec<usize> {
    value
        .as_seq()
        .map(|s| {
            s.iter()
                .filter_map(|v| v.as_i64())
                .filter(|&n| n >= 0)
                .map(|n| n as usize)
                .collect()
        })
        .unwrap_or_default()
}

/// Per-render context shared by the layout submodules.
pub(crate) struct Frame<'a> {
    pub settings: &'a LayoutSettings,
    compression: BeatCompression,
    beat_spacing: f64,
}

impl<'a> Frame<'a> {
    /// X position of a pitch: one column per semitone.
    fn x_of(&self, pitch: i32) -> f64 {
        (self.settings.pitch_offset + pitch as f64) * self.settings.x_spacing
            + self.settings.x_offset
    }

    /// Y position of a beat through the compression map.
    fn y_of(&self, beat: Ticks) -> f64 {
        let pos = self.compression.position(beat) * self.beat_spacing;
        if self.settings.bottomup {
            DRAWING_HEIGHT - pos
        } else {
            self.settings.startpos + pos
        }
    }

    /// Note color by variant ordinal.
    fn variant_color(&self, variant: Option<u32>) -> String {
        match variant {
            None => self.settings.color_default.clone(),
            Some(v) if v % 2 == 1 => self.settings.color_variant1.clone(),
            Some(_) => self.settings.color_variant2.clone(),
        }
    }
}

/// Lay out a song as the given extract.
pub fn layout(song: &Song, conf: &ConfStack, extract: usize) -> Result<Sheet> {
    let settings = LayoutSettings::from_conf(conf, extract)?;

    let layout_voices: Vec<usize> = settings
        .layoutlines
        .iter()
        .cloned()
        .filter(|&v| song.voice(v).is_some())
        .collect();

    let packer = PackerSettings {
        method: settings.pack_method,
        max_spreadfactor: settings.pack_max_spreadfactor,
        min_increment: settings.pack_min_increment,
    };
    let compression = compress(song, &layout_voices, &packer);

    let beat_spacing = if compression.is_empty() || compression.max_position <= 0.0 {
        1.0
    } else {
        let full = (DRAWING_HEIGHT - settings.startpos) / compression.max_position;
        full.min(packer.max_spreadfactor * Y_SCALE / BEAT_RESOLUTION)
    };

    let frame = Frame { settings: &settings, compression, beat_spacing };

    let mut children: Vec<Drawable> = Vec::new();
    let mut voice_positions: HashMap<usize, HashMap<usize, notes::NotePos>> = HashMap::new();

    for &voice_no in &layout_voices {
        let voice = song.voice(voice_no).expect("filtered above");

        let (mut drawables, positions) = notes::layout_playables(voice, &frame);
        children.append(&mut drawables);
        children.extend(notes::flowlines(voice, &positions, &frame));
        children.extend(annotations::notebound(voice, &positions, &frame));
        children.extend(annotations::barnumbers(voice, &positions, &frame));
        children.extend(annotations::countnotes(voice, &positions, &frame));

        if settings.jumplines.contains(&voice_no) {
            for entity in &voice.entities {
                if let Entity::Goto(goto) = entity {
                    if let (Some(from), Some(to)) =
                        (positions.get(&goto.from), positions.get(&goto.to))
                    {
                        children.extend(jumplines::jump_drawables(from, to, &goto.policy, &frame));
                    }
                }
            }
        }

        voice_positions.insert(voice_no, positions);
    }

    // cross-voice synchronization lines, pitch-matched per beat
    for &(va, vb) in &settings.synchlines {
        if !layout_voices.contains(&va) || !layout_voices.contains(&vb) {
            continue;
        }
        let (map_a, map_b) = match (song.beat_map(va), song.beat_map(vb)) {
            (Some(a), Some(b)) => (a, b),
            _ => continue,
        };
        for (beat, &idx_a) in map_a {
            let idx_b = match map_b.get(beat) {
                Some(&i) => i,
                None => continue,
            };
            let pos_a = voice_positions.get(&va).and_then(|m| m.get(&idx_a));
            let pos_b = voice_positions.get(&vb).and_then(|m| m.get(&idx_b));
            if let (Some(a), Some(b)) = (pos_a, pos_b) {
                if let Some(line) = jumplines::cross_voice_synchline(a, b, &frame) {
                    children.push(line);
                }
            }
        }
    }

    children.extend(annotations::stringnames(&frame));
    children.extend(annotations::legend(song, &frame));
    children.extend(annotations::extract_notes(&frame));

    let sheet = Sheet {
        children,
        active_voices: layout_voices,
        printer: settings.printer.clone(),
    };

    for (a, b) in sheet.annotation_collisions() {
        log::warn!(
            "overlapping annotations on the sheet (children {a} and {b}); consider moving one"
        );
    }

    Ok(sheet)
}
