//! Player event list: note-on/off events with source character indices.
//! This is the bridge between the symbol streams and a playback component —
//! the `index` of each event is matched against origin ranges for
//! highlighting the note being played in the text editor.

use serde::Serialize;

use crate::abc::{SymbolKind, Tune, PARSER_WHOLE};

/// One playable note event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerEvent {
    /// Character index in the ABC source where the note begins.
    pub index: usize,
    /// MIDI pitch.
    pub midi: i32,
    /// 1-based voice id.
    pub voice: usize,
    /// Start time in milliseconds.
    pub t_ms: f64,
    /// Duration in milliseconds.
    pub duration_ms: f64,
}

/// Generate the player event list for a parsed tune.
///
/// Times follow the tune tempo (quarter notes per minute); every voice
/// starts at zero, so simultaneous notes across voices share timestamps.
pub fn player_events(tune: &Tune) -> Vec<PlayerEvent> {
    let qpm = if tune.meta.tempo_qpm > 0.0 { tune.meta.tempo_qpm } else { 120.0 };
    let ms_per_tick = 60_000.0 / qpm / (PARSER_WHOLE as f64 / 4.0);

    let mut events = Vec::new();
    for voice in &tune.voices {
        for sym in &voice.symbols {
            if sym.kind != SymbolKind::Note {
                continue;
            }
            let t_ms = sym.time as f64 * ms_per_tick;
            let duration_ms = sym.dur as f64 * ms_per_tick;
            for head in &sym.heads {
                events.push(PlayerEvent {
                    index: head.start_char,
                    midi: head.pitch,
                    voice: voice.id,
                    t_ms,
                    duration_ms,
                });
            }
        }
    }
    events.sort_by(|a, b| a.t_ms.partial_cmp(&b.t_ms).unwrap_or(std::cmp::Ordering::Equal));
    events
}

/// Serialize the event list for the UI player.
pub fn events_to_json(events: &[PlayerEvent]) -> String {
    serde_json::to_string(events).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abc::parse_abc;

    #[test]
    fn events_follow_the_tempo() {
        let tune = parse_abc("X:1\nM:4/4\nL:1/4\nQ:1/4=120\nK:C\nCD|\n");
        let events = player_events(&tune);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].t_ms, 0.0);
        assert_eq!(events[0].duration_ms, 500.0);
        assert_eq!(events[1].t_ms, 500.0);
    }

    #[test]
    fn chord_notes_share_a_timestamp() {
        let tune = parse_abc("X:1\nM:4/4\nL:1/4\nK:C\n[CE]G|\n");
        let events = player_events(&tune);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].t_ms, events[1].t_ms);
        assert!(events[2].t_ms > events[0].t_ms);
    }

    #[test]
    fn voices_run_in_parallel() {
        let tune = parse_abc("X:1\nM:4/4\nK:C\nV:1\nC|\nV:2\nE|\n");
        let events = player_events(&tune);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].t_ms, events[1].t_ms);
    }

    #[test]
    fn index_points_into_the_source() {
        let abc = "X:1\nM:4/4\nK:C\nCD|\n";
        let tune = parse_abc(abc);
        let events = player_events(&tune);
        let c_index = abc.find("CD").unwrap();
        assert_eq!(events[0].index, c_index);
    }

    #[test]
    fn event_list_serializes() {
        let tune = parse_abc("X:1\nM:4/4\nK:C\nC|\n");
        let json = events_to_json(&player_events(&tune));
        assert!(json.contains("\"midi\":60"));
    }
}
