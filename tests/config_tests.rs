//! Configuration layering driven through the public pipeline: embedded
//! blocks, layer push/pop around renders, instrument presets.

use harplib::drawing::Drawable;
use harplib::{render_with_conf, ConfStack, ConfValue, CONFIG_SEPARATOR};

fn first_ellipse_x(sheet: &harplib::Sheet) -> f64 {
    sheet
        .children
        .iter()
        .find_map(|d| match d {
            Drawable::Ellipse(e) => Some(e.center.x),
            _ => None,
        })
        .expect("sheet has ellipses")
}

#[test]
fn embedded_config_block_layers_onto_the_defaults() {
    let abc = format!(
        "X:1\nM:4/4\nK:C\nC2 z2 G2|\n{}\n{}\n",
        CONFIG_SEPARATOR,
        serde_json::json!({"restposition": {"default": "next"}})
    );
    let mut conf = ConfStack::with_defaults();
    let result = render_with_conf(&abc, &mut conf, 0).expect("pipeline runs");
    let rest_pitch = result
        .song
        .voice(1)
        .unwrap()
        .entities
        .iter()
        .find_map(|e| match e {
            harplib::model::Entity::Pause(p) => Some(p.pitch),
            _ => None,
        })
        .expect("one rest");
    assert_eq!(rest_pitch, 67, "block overrides the rest position");

    // the block stays as a layer; popping restores the default behavior
    conf.pop();
    let plain = "X:1\nM:4/4\nK:C\nC2 z2 G2|\n";
    let result = render_with_conf(plain, &mut conf, 0).expect("pipeline runs");
    let rest_pitch = result
        .song
        .voice(1)
        .unwrap()
        .entities
        .iter()
        .find_map(|e| match e {
            harplib::model::Entity::Pause(p) => Some(p.pitch),
            _ => None,
        })
        .unwrap();
    assert_eq!(rest_pitch, 63);
}

#[test]
fn layer_overrides_move_the_string_grid() {
    let abc = "X:1\nM:4/4\nK:C\nCDEF|\n";
    let mut conf = ConfStack::with_defaults();
    let before = render_with_conf(abc, &mut conf, 0).expect("pipeline runs");

    conf.push(ConfValue::from(serde_json::json!({
        "extract": {"0": {"layout": {"X_SPACING": 23.0}}}
    })));
    let after = render_with_conf(abc, &mut conf, 0).expect("pipeline runs");
    assert!(first_ellipse_x(&after.sheet) > first_ellipse_x(&before.sheet));

    conf.pop();
    let restored = render_with_conf(abc, &mut conf, 0).expect("pipeline runs");
    assert_eq!(
        first_ellipse_x(&restored.sheet),
        first_ellipse_x(&before.sheet)
    );
}

#[test]
fn instrument_preset_drives_the_string_name_row() {
    let abc = "X:1\nM:4/4\nK:C\nCDEF|\n";
    let mut conf = ConfStack::with_defaults();
    conf.push(ConfValue::from(serde_json::json!({
        "instrument": "37-strings-g-g"
    })));
    let result = render_with_conf(abc, &mut conf, 0).expect("pipeline runs");
    let names = result
        .sheet
        .children
        .iter()
        .filter(|d| match d {
            Drawable::Annotation(a) => (a.position.y - 4.0).abs() < 1e-9,
            _ => false,
        })
        .count();
    assert_eq!(names, 37, "string labels re-derive from the preset");
}

#[test]
fn malformed_config_block_reports_but_renders() {
    let abc = format!("X:1\nM:4/4\nK:C\nCDEF|\n{}\n{{oops\n", CONFIG_SEPARATOR);
    let parsed = harplib::parse(&abc);
    assert!(parsed.config.is_none());
    assert_eq!(parsed.tune.errors.len(), 1);
    assert_eq!(parsed.tune.voices.len(), 1);
}

#[test]
fn save_format_roundtrip_preserves_both_halves() {
    let config = serde_json::json!({"extract": {"0": {"title": "Stimme 1"}}});
    let saved = harplib::save_format("X:1\nM:4/4\nK:C\nC|\n", &config);
    let parsed = harplib::parse(&saved);
    assert_eq!(parsed.config, Some(config));
    assert_eq!(parsed.tune.voices.len(), 1);
}
