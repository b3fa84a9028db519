//! Content-aware beat compression.
//!
//! Vertical placement does not use raw beats: dense passages of short notes
//! would waste space and sparse passages of long notes would overflow the
//! page. Instead every beat with content is assigned a position whose
//! distance to its predecessor depends on the visual weight of the notes at
//! both beats, so dense and sparse passages share one page. Beats that are
//! absent from the map (mid-chord alignment across voices) interpolate
//! linearly between their bracketing known beats.

use std::collections::BTreeMap;

use super::constants::{duration_key, duration_style, BEAT_RESOLUTION};
use crate::model::{Song, Ticks};

/// Packing parameters from the extract configuration.
#[derive(Debug, Clone)]
pub(super) struct PackerSettings {
    /// 0/1 compress, 2 is the identity map.
    pub method: u8,
    pub max_spreadfactor: f64,
    pub min_increment: f64,
}

impl Default for PackerSettings {
    fn default() -> Self {
        Self { method: 0, max_spreadfactor: 2.0, min_increment: 0.2 }
    }
}

/// The compression map from original beat to layout position.
#[derive(Debug, Clone, Default)]
pub(super) struct BeatCompression {
    positions: BTreeMap<Ticks, f64>,
    pub max_position: f64,
}

#[derive(Debug, Default, Clone, Copy)]
struct BeatInfo {
    max_duration: u32,
    measure_start: bool,
    first_in_part: bool,
}

/// Build the compression map from every playable of the layout voices.
pub(super) fn compress(song: &Song, layout_voices: &[usize], packer: &PackerSettings) -> BeatCompression {
    let mut infos: BTreeMap<Ticks, BeatInfo> = BTreeMap::new();

    for &voice_no in layout_voices {
        let voice = match song.voice(voice_no) {
            Some(v) => v,
            None => continue,
        };
        for entity in &voice.entities {
            if let Some(p) = entity.as_playable() {
                let beat = match p.beat() {
                    Some(b) => b,
                    None => continue,
                };
                let info = infos.entry(beat).or_default();
                info.max_duration = info.max_duration.max(p.duration());
                info.measure_start |= p.measure_start();
                info.first_in_part |= p.first_in_part();
            }
        }
    }

    if infos.is_empty() {
        return BeatCompression::default();
    }

    if packer.method == 2 {
        let positions: BTreeMap<Ticks, f64> =
            infos.keys().map(|&b| (b, b as f64)).collect();
        let max_position = positions.values().cloned().fold(0.0, f64::max);
        return BeatCompression { positions, max_position };
    }

    let scaled_min_increment = packer.min_increment * BEAT_RESOLUTION;
    let mut positions = BTreeMap::new();
    let mut position = 0.0;
    let mut last_size: Option<f64> = None;

    for (&beat, info) in &infos {
        let size = duration_style(duration_key(info.max_duration)).size_factor * BEAT_RESOLUTION;
        match last_size {
            None => {
                positions.insert(beat, 0.0);
            }
            Some(last) => {
                let default_increment = (size + last) / 2.0;
                let mut increment = default_increment.max(scaled_min_increment);
                if info.measure_start {
                    increment += increment / 4.0;
                }
                if info.first_in_part {
                    increment += default_increment;
                }
                position += increment;
                positions.insert(beat, position);
            }
        }
        last_size = Some(size);
    }

    BeatCompression { max_position: position, positions }
}

impl BeatCompression {
    /// Layout position of a beat, interpolating between known beats.
    pub(super) fn position(&self, beat: Ticks) -> f64 {
        if let Some(&p) = self.positions.get(&beat) {
            return p;
        }
        let below = self.positions.range(..beat).next_back();
        let above = self.positions.range(beat..).next();
        match (below, above) {
            (Some((&b0, &p0)), Some((&b1, &p1))) => {
                let span = (b1 - b0) as f64;
                if span == 0.0 {
                    p0
                } else {
                    p0 + (p1 - p0) * ((beat - b0) as f64 / span)
                }
            }
            (Some((_, &p0)), None) => p0,
            (None, Some((_, &p1))) => p1,
            (None, None) => 0.0,
        }
    }

    pub(super) fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abc::parse_abc;
    use crate::transform::{transform, Settings};

    fn compressed(abc: &str, packer: &PackerSettings) -> BeatCompression {
        let song = transform(&parse_abc(abc), &Settings::default());
        compress(&song, &[1], packer)
    }

    #[test]
    fn positions_grow_monotonically() {
        let c = compressed("X:1\nM:4/4\nK:C\nCDEF|GABc|\n", &PackerSettings::default());
        let beats: Vec<Ticks> = c.positions.keys().cloned().collect();
        for pair in beats.windows(2) {
            assert!(c.position(pair[0]) < c.position(pair[1]));
        }
    }

    #[test]
    fn equal_durations_space_equally_within_a_measure() {
        let c = compressed("X:1\nM:4/4\nK:C\nCDEF|\n", &PackerSettings::default());
        let p: Vec<f64> = [0, 1, 2, 3].iter().map(|&b| c.position(b)).collect();
        let step1 = p[1] - p[0];
        let step2 = p[2] - p[1];
        let step3 = p[3] - p[2];
        assert!((step1 - step2).abs() < 1e-9);
        assert!((step2 - step3).abs() < 1e-9);
    }

    #[test]
    fn longer_notes_take_more_room() {
        let c = compressed("X:1\nM:4/4\nL:1/4\nK:C\nC2D2|\n", &PackerSettings::default());
        let short = compressed("X:1\nM:4/4\nK:C\nCD|\n", &PackerSettings::default());
        assert!(c.position(4) > short.position(1));
    }

    #[test]
    fn measure_starts_get_extra_room() {
        let c = compressed("X:1\nM:4/4\nK:C\nCDEF|GABc|\n", &PackerSettings::default());
        let within = c.position(3) - c.position(2);
        let across = c.position(4) - c.position(3);
        assert!(across > within, "measure start adds a quarter increment");
    }

    #[test]
    fn identity_method_maps_beats_to_themselves() {
        let packer = PackerSettings { method: 2, ..PackerSettings::default() };
        let c = compressed("X:1\nM:4/4\nK:C\nCDEF|\n", &packer);
        assert_eq!(c.position(2), 2.0);
        assert_eq!(c.max_position, 3.0);
    }

    #[test]
    fn missing_beats_interpolate() {
        let c = compressed("X:1\nM:4/4\nL:1/4\nK:C\nC2D2|\n", &PackerSettings::default());
        // beats 0 and 4 are known; beat 2 interpolates halfway
        let mid = c.position(2);
        assert!((mid - c.position(4) / 2.0).abs() < 1e-9);
    }

    #[test]
    fn min_increment_floors_tiny_steps() {
        let packer = PackerSettings { min_increment: 10.0, ..PackerSettings::default() };
        let c = compressed("X:1\nM:4/4\nK:C\nCD|\n", &packer);
        assert!(c.position(1) >= 10.0 * BEAT_RESOLUTION);
    }
}
