//! Layout properties: pitch/beat monotonicity, page fit, flow/jump/synch
//! lines on the produced sheet.

use harplib::drawing::{Drawable, Ellipse, FlowLine, LineStyle, PathCommand, PathShape};
use harplib::{render_extract, render_with_conf, ConfStack, ConfValue};

const DRAWING_HEIGHT: f64 = 282.0;

fn sheet_of(abc: &str) -> harplib::Sheet {
    render_extract(abc, 0).expect("pipeline runs").sheet
}

fn ellipses(sheet: &harplib::Sheet) -> Vec<&Ellipse> {
    sheet
        .children
        .iter()
        .filter_map(|d| match d {
            Drawable::Ellipse(e) => Some(e),
            _ => None,
        })
        .collect()
}

fn flowlines(sheet: &harplib::Sheet) -> Vec<&FlowLine> {
    sheet
        .children
        .iter()
        .filter_map(|d| match d {
            Drawable::FlowLine(f) => Some(f),
            _ => None,
        })
        .collect()
}

fn paths(sheet: &harplib::Sheet) -> Vec<&PathShape> {
    sheet
        .children
        .iter()
        .filter_map(|d| match d {
            Drawable::Path(p) => Some(p),
            _ => None,
        })
        .collect()
}

fn conf_layer(json: serde_json::Value) -> ConfValue {
    ConfValue::from(json)
}

// ─── Pitch → X ──────────────────────────────────────────────────────

#[test]
fn higher_pitches_sit_further_right() {
    let sheet = sheet_of("X:1\nM:4/4\nK:C\n[CEG]2|\n");
    let mut es = ellipses(&sheet);
    es.sort_by(|a, b| a.center.x.partial_cmp(&b.center.x).unwrap());
    assert_eq!(es.len(), 3);
    assert!(es[0].center.x < es[1].center.x);
    assert!(es[1].center.x < es[2].center.x);
    // all three share one beat, hence one height
    assert!(es.iter().all(|e| (e.center.y - es[0].center.y).abs() < 1e-9));
}

#[test]
fn semitone_columns_are_equally_spaced() {
    let sheet = sheet_of("X:1\nM:4/4\nK:C\nC^CD|\n");
    let es = ellipses(&sheet);
    let step1 = es[1].center.x - es[0].center.x;
    let step2 = es[2].center.x - es[1].center.x;
    assert!((step1 - 11.5).abs() < 1e-9);
    assert!((step2 - 11.5).abs() < 1e-9);
}

// ─── Beat → Y ───────────────────────────────────────────────────────

#[test]
fn later_beats_sit_further_down() {
    let sheet = sheet_of("X:1\nM:4/4\nK:C\nCDEF|\n");
    let es = ellipses(&sheet);
    assert_eq!(es.len(), 4);
    for pair in es.windows(2) {
        assert!(pair[0].center.y < pair[1].center.y);
    }
}

#[test]
fn bottomup_layout_flips_the_time_axis() {
    let mut conf = ConfStack::with_defaults();
    conf.push(conf_layer(serde_json::json!({
        "extract": {"0": {"layout": {"bottomup": true}}}
    })));
    let result =
        render_with_conf("X:1\nM:4/4\nK:C\nCDEF|\n", &mut conf, 0).expect("pipeline runs");
    let es = ellipses(&result.sheet);
    for pair in es.windows(2) {
        assert!(pair[0].center.y > pair[1].center.y);
    }
}

#[test]
fn a_long_tune_still_fits_the_page() {
    let mut abc = String::from("X:1\nM:4/4\nK:C\n");
    for _ in 0..32 {
        abc.push_str("CDEFGABc|");
    }
    abc.push('\n');
    let sheet = sheet_of(&abc);
    for e in ellipses(&sheet) {
        assert!(e.center.y <= DRAWING_HEIGHT + 1e-6);
    }
}

// ─── Flowlines ──────────────────────────────────────────────────────

#[test]
fn consecutive_notes_connect_with_solid_flowlines() {
    let sheet = sheet_of("X:1\nM:4/4\nK:C\nCDEF|\n");
    let fls = flowlines(&sheet);
    assert_eq!(fls.len(), 3);
    assert!(fls.iter().all(|f| f.style == LineStyle::Solid));
}

#[test]
fn a_tie_renders_as_a_dotted_flowline() {
    let sheet = sheet_of("X:1\nM:4/4\nK:C\nC-CD|\n");
    let styles: Vec<LineStyle> = flowlines(&sheet).iter().map(|f| f.style).collect();
    assert_eq!(styles, vec![LineStyle::Dotted, LineStyle::Solid]);
}

#[test]
fn part_starts_interrupt_the_flow() {
    let sheet = sheet_of("X:1\nM:4/4\nK:C\nP:A\nCD|\nP:B\nEF|\n");
    assert_eq!(flowlines(&sheet).len(), 2, "no line into the part start");
}

#[test]
fn chord_notes_connect_with_a_dashed_synchline() {
    let sheet = sheet_of("X:1\nM:4/4\nK:C\n[CEG]2|\n");
    let dashed: Vec<_> = flowlines(&sheet)
        .into_iter()
        .filter(|f| f.style == LineStyle::Dashed)
        .collect();
    assert_eq!(dashed.len(), 1);
    let line = dashed[0];
    assert!((line.from.y - line.to.y).abs() < 1e-9, "chord synchline is horizontal");
    assert!((line.to.x - line.from.x).abs() > 1.0);
}

// ─── Cross-voice synchlines ─────────────────────────────────────────

#[test]
fn synchlines_pair_voices_beat_by_beat() {
    let mut conf = ConfStack::with_defaults();
    // silence the dashed subflow rendering of voice 2 so every dashed line
    // on the sheet is a cross-voice synchline
    conf.push(conf_layer(serde_json::json!({
        "extract": {"0": {"subflowlines": [], "flowlines": [1, 2], "synchlines": [[1, 2]]}}
    })));
    let abc = "X:1\nM:4/4\nK:C\nV:1\nCDEF|\nV:2\nGABc|\n";
    let result = render_with_conf(abc, &mut conf, 0).expect("pipeline runs");
    let dashed: Vec<_> = flowlines(&result.sheet)
        .into_iter()
        .filter(|f| f.style == LineStyle::Dashed)
        .collect();
    assert_eq!(dashed.len(), 4, "one synchline per shared beat");
}

// ─── Jumplines ──────────────────────────────────────────────────────

#[test]
fn a_repeat_draws_one_line_and_one_arrowhead() {
    let sheet = sheet_of("X:1\nM:4/4\nK:C\n|:CDEF:|\n");
    // jump drawables use the thick line width
    let jump_paths: Vec<_> = paths(&sheet)
        .into_iter()
        .filter(|p| (p.line_width - 0.5).abs() < 1e-9)
        .collect();
    assert_eq!(jump_paths.len(), 2);

    let line = jump_paths.iter().find(|p| !p.filled).expect("routed line");
    assert_eq!(line.commands.len(), 4, "M plus three segments");

    let arrow = jump_paths.iter().find(|p| p.filled).expect("arrowhead");
    let apex = match arrow.commands.first() {
        Some(PathCommand::Move(p)) => *p,
        other => panic!("arrow starts with a move, got {other:?}"),
    };

    // the apex sits on the destination column (the first note, C = x of
    // the lowest ellipse), above the note
    let es = ellipses(&sheet);
    let first = es
        .iter()
        .min_by(|a, b| a.center.y.partial_cmp(&b.center.y).unwrap())
        .unwrap();
    assert!((apex.x - first.center.x).abs() < 1e-9);
    assert!(apex.y < first.center.y);
}

#[test]
fn jumpline_corridor_follows_the_distance() {
    let near = sheet_of("X:1\nM:4/4\nK:C\n|:CDEF\"@@2\":|\n");
    let far = sheet_of("X:1\nM:4/4\nK:C\n|:CDEF\"@@6\":|\n");
    let corridor_x = |sheet: &harplib::Sheet| -> f64 {
        let line = paths(sheet)
            .into_iter()
            .filter(|p| (p.line_width - 0.5).abs() < 1e-9)
            .find(|p| !p.filled)
            .expect("routed line");
        match (line.commands.first(), line.commands.get(1)) {
            (Some(PathCommand::Move(p)), Some(PathCommand::LineBy(dx, _))) => p.x + dx,
            other => panic!("unexpected path shape {other:?}"),
        }
    };
    assert!((corridor_x(&far) - corridor_x(&near) - 4.0 * 11.5).abs() < 1e-9);
}

// ─── Sheet furniture ────────────────────────────────────────────────

#[test]
fn string_names_line_up_over_the_columns() {
    let sheet = sheet_of("X:1\nM:4/4\nK:C\nCDEF|\n");
    let names: Vec<_> = sheet
        .children
        .iter()
        .filter_map(|d| match d {
            Drawable::Annotation(a) if (a.position.y - 4.0).abs() < 1e-9 => Some(a),
            _ => None,
        })
        .collect();
    assert_eq!(names.len(), 25, "default instrument has 25 strings");
    assert_eq!(names[0].text, "G");
    let step = names[1].position.x - names[0].position.x;
    assert!((step - 11.5).abs() < 1e-9);
}

#[test]
fn legend_shows_title_and_meta() {
    let sheet = sheet_of("X:1\nT:Der Mond\nC:Rilke\nM:6/8\nK:Em\nEFG|\n");
    let texts: Vec<String> = sheet
        .children
        .iter()
        .filter_map(|d| match d {
            Drawable::Annotation(a) => Some(a.text.clone()),
            _ => None,
        })
        .collect();
    assert!(texts.contains(&"Der Mond".to_string()));
    assert!(texts.iter().any(|t| t.contains("6/8") && t.contains("Rilke")));
}

#[test]
fn barnumbers_render_for_configured_voices() {
    let mut conf = ConfStack::with_defaults();
    conf.push(conf_layer(serde_json::json!({
        "extract": {"0": {"barnumbers": {"voices": [1]}}}
    })));
    let result =
        render_with_conf("X:1\nM:4/4\nK:C\nCDEF|GABc|\n", &mut conf, 0).expect("pipeline runs");
    let texts: Vec<String> = result
        .sheet
        .children
        .iter()
        .filter_map(|d| match d {
            Drawable::Annotation(a) => Some(a.text.clone()),
            _ => None,
        })
        .collect();
    assert!(texts.contains(&"1".to_string()));
    assert!(texts.contains(&"2".to_string()));
}

#[test]
fn active_voices_reflect_the_extract() {
    let abc = "X:1\nM:4/4\nK:C\nV:1\nCDEF|\nV:2\nGABc|\n";
    let sheet = sheet_of(abc);
    assert_eq!(sheet.active_voices, vec![1, 2]);

    // extract 1 limits to voices 1 and 2 as well, but a custom layer can
    // narrow the layout to a single voice
    let mut conf = ConfStack::with_defaults();
    conf.push(conf_layer(serde_json::json!({
        "extract": {"1": {"layoutlines": [2]}}
    })));
    let result = render_with_conf(abc, &mut conf, 1).expect("pipeline runs");
    assert_eq!(result.sheet.active_voices, vec![2]);
}
