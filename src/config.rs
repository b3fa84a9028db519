//! Layered configuration stack.
//!
//! Defaults, instrument presets, per-extract overrides and user edits compose
//! as layers: every `push` deep-merges a fresh mapping onto the current top
//! and pushes the result, so earlier layers are never mutated and `pop`
//! restores them exactly. Values are addressed by dotted paths
//! (`extract.0.layout.X_SPACING`); numeric segments address sequence indices
//! when the node is a sequence and map keys otherwise.
//!
//! Leaves may be *deferred*: zero-argument producers evaluated on demand
//! against the stack itself. Deferred results are cached by producer identity
//! and the cache is invalidated by any `push`/`pop`/`set`. Evaluation keeps a
//! path stack so that mutually recursive deferred values fail with a
//! circular-dependency error naming the whole cycle.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use serde_json::json;

use crate::error::{HarpError, Result};

/// A zero-argument producer for a configuration value.
pub type DeferredFn = dyn Fn(&ConfStack) -> Result<ConfValue>;

/// One node of the configuration tree.
#[derive(Clone)]
pub enum ConfValue {
    /// Erases the key it is merged or `set` onto.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Vec<ConfValue>),
    Map(BTreeMap<String, ConfValue>),
    /// Evaluated on demand; never serialized as-is.
    Deferred(Rc<DeferredFn>),
}

impl fmt::Debug for ConfValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfValue::Null => write!(f, "Null"),
            ConfValue::Bool(b) => write!(f, "Bool({b})"),
            ConfValue::Int(i) => write!(f, "Int({i})"),
            ConfValue::Float(x) => write!(f, "Float({x})"),
            ConfValue::Str(s) => write!(f, "Str({s:?})"),
            ConfValue::Seq(s) => f.debug_tuple("Seq").field(s).finish(),
            ConfValue::Map(m) => f.debug_tuple("Map").field(m).finish(),
            ConfValue::Deferred(p) => write!(f, "Deferred({:p})", Rc::as_ptr(p)),
        }
    }
}

impl PartialEq for ConfValue {
    fn eq(&self, other: &Self) -> bool {
        use ConfValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Int(a), Float(b)) | (Float(b), Int(a)) => *a as f64 == *b,
            (Str(a), Str(b)) => a == b,
            (Seq(a), Seq(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            // identity comparison: two clones of the same producer are equal
            (Deferred(a), Deferred(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for ConfValue {
    fn from(v: bool) -> Self {
        ConfValue::Bool(v)
    }
}
impl From<i64> for ConfValue {
    fn from(v: i64) -> Self {
        ConfValue::Int(v)
    }
}
impl From<f64> for ConfValue {
    fn from(v: f64) -> Self {
        ConfValue::Float(v)
    }
}
impl From<&str> for ConfValue {
    fn from(v: &str) -> Self {
        ConfValue::Str(v.to_string())
    }
}
impl From<String> for ConfValue {
    fn from(v: String) -> Self {
        ConfValue::Str(v)
    }
}

impl From<serde_json::Value> for ConfValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => ConfValue::Null,
            serde_json::Value::Bool(b) => ConfValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ConfValue::Int(i)
                } else {
                    ConfValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => ConfValue::Str(s),
            serde_json::Value::Array(a) => {
                ConfValue::Seq(a.into_iter().map(ConfValue::from).collect())
            }
            serde_json::Value::Object(o) => ConfValue::Map(
                o.into_iter().map(|(k, v)| (k, ConfValue::from(v))).collect(),
            ),
        }
    }
}

impl ConfValue {
    /// Wrap a producer closure.
    pub fn deferred<F>(f: F) -> Self
    where
        F: Fn(&ConfStack) -> Result<ConfValue> + 'static,
    {
        ConfValue::Deferred(Rc::new(f))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfValue::Int(i) => Some(*i),
            ConfValue::Float(x) => Some(*x as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfValue::Int(i) => Some(*i as f64),
            ConfValue::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[ConfValue]> {
        match self {
            ConfValue::Seq(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, ConfValue>> {
        match self {
            ConfValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Child lookup on a mapping or sequence node.
    pub fn child(&self, key: &str) -> Option<&ConfValue> {
        match self {
            ConfValue::Map(m) => m.get(key),
            ConfValue::Seq(s) => key.parse::<usize>().ok().and_then(|i| s.get(i)),
            _ => None,
        }
    }

    /// A pair `[x, y]` of numbers, the common shape of position values.
    pub fn as_pair(&self) -> Option<(f64, f64)> {
        let s = self.as_seq()?;
        if s.len() != 2 {
            return None;
        }
        Some((s[0].as_f64()?, s[1].as_f64()?))
    }

    /// Convert to JSON. Deferred values are an error: resolve first, then
    /// serialize the computed value.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        match self {
            ConfValue::Null => Ok(serde_json::Value::Null),
            ConfValue::Bool(b) => Ok(json!(b)),
            ConfValue::Int(i) => Ok(json!(i)),
            ConfValue::Float(x) => Ok(json!(x)),
            ConfValue::Str(s) => Ok(json!(s)),
            ConfValue::Seq(s) => {
                let items: Result<Vec<_>> = s.iter().map(|v| v.to_json()).collect();
                Ok(serde_json::Value::Array(items?))
            }
            ConfValue::Map(m) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in m {
                    obj.insert(k.clone(), v.to_json()?);
                }
                Ok(serde_json::Value::Object(obj))
            }
            ConfValue::Deferred(_) => Err(HarpError::Config(
                "cannot serialize an unresolved deferred value".to_string(),
            )),
        }
    }
}

/// Deep merge `over` onto `base`. Mappings merge recursively; sequences,
/// deferred values and scalars replace wholesale; `Null` erases the key.
fn deep_merge(base: &ConfValue, over: &ConfValue) -> ConfValue {
    match (base, over) {
        (ConfValue::Map(b), ConfValue::Map(o)) => {
            let mut merged = b.clone();
            for (k, v) in o {
                match v {
                    ConfValue::Null => {
                        merged.remove(k);
                    }
                    _ => {
                        let next = match merged.get(k) {
                            Some(existing) => deep_merge(existing, v),
                            None => v.clone(),
                        };
                        merged.insert(k.clone(), next);
                    }
                }
            }
            ConfValue::Map(merged)
        }
        _ => over.clone(),
    }
}

/// The process-wide configuration stack.
pub struct ConfStack {
    layers: Vec<ConfValue>,
    /// producer identity -> resolved value
    cache: RefCell<HashMap<usize, ConfValue>>,
    /// paths currently being resolved, for cycle detection
    resolving: RefCell<Vec<String>>,
}

impl Default for ConfStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfStack {
    /// An empty stack: layer 0 is the empty mapping and never pops.
    pub fn new() -> Self {
        Self {
            layers: vec![ConfValue::Map(BTreeMap::new())],
            cache: RefCell::new(HashMap::new()),
            resolving: RefCell::new(Vec::new()),
        }
    }

    /// A stack with the built-in defaults pushed as layer 1.
    pub fn with_defaults() -> Self {
        let mut stack = Self::new();
        stack.push(default_conf());
        stack
    }

    /// Current number of layers.
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// Deep-merge `layer` onto the top and push the result. Returns the new
    /// depth.
    pub fn push(&mut self, layer: ConfValue) -> usize {
        let top = self.layers.last().expect("layer 0 always present");
        let merged = deep_merge(top, &layer);
        self.layers.push(merged);
        self.invalidate();
        self.layers.len()
    }

    /// Pop the top layer. Layer 0 stays; popping it is a no-op.
    pub fn pop(&mut self) -> usize {
        if self.layers.len() > 1 {
            self.layers.pop();
            self.invalidate();
        }
        self.layers.len()
    }

    /// Truncate to `depth` layers (at least 1). Returns the new depth.
    pub fn reset_to(&mut self, depth: usize) -> usize {
        let keep = depth.max(1);
        if keep < self.layers.len() {
            self.layers.truncate(keep);
            self.invalidate();
        }
        self.layers.len()
    }

    fn invalidate(&mut self) {
        self.cache.borrow_mut().clear();
    }

    /// The raw (unresolved) value at `path` in the top layer.
    pub fn get_raw(&self, path: &str) -> Option<&ConfValue> {
        let mut node = self.layers.last().expect("layer 0 always present");
        for seg in path.split('.') {
            node = node.child(seg)?;
        }
        Some(node)
    }

    /// The resolved value at `path`, or `None` when absent. Deferred values
    /// are evaluated (with cycle detection) and cached by identity;
    /// mappings and sequences resolve recursively.
    pub fn get(&self, path: &str) -> Result<Option<ConfValue>> {
        match self.get_raw(path) {
            None => Ok(None),
            Some(v) => {
                let v = v.clone();
                Ok(Some(self.resolve_at(path, &v)?))
            }
        }
    }

    /// The whole top layer, fully resolved.
    pub fn get_all(&self) -> Result<ConfValue> {
        let top = self.layers.last().expect("layer 0 always present").clone();
        self.resolve_at("", &top)
    }

    fn resolve_at(&self, path: &str, value: &ConfValue) -> Result<ConfValue> {
        match value {
            ConfValue::Deferred(producer) => {
                let key = Rc::as_ptr(producer) as *const () as usize;
                if let Some(cached) = self.cache.borrow().get(&key) {
                    return Ok(cached.clone());
                }
                {
                    let mut resolving = self.resolving.borrow_mut();
                    if resolving.iter().any(|p| p == path) {
                        let mut cycle = resolving.clone();
                        cycle.push(path.to_string());
                        resolving.clear();
                        return Err(HarpError::CircularConfig(cycle));
                    }
                    resolving.push(path.to_string());
                }
                let outcome = producer(self);
                self.resolving.borrow_mut().pop();
                let produced = outcome?;
                // the producer may itself return a deferred or nested tree
                let resolved = self.resolve_at(path, &produced)?;
                self.cache.borrow_mut().insert(key, resolved.clone());
                Ok(resolved)
            }
            ConfValue::Map(m) => {
                let mut out = BTreeMap::new();
                for (k, v) in m {
                    let child_path = if path.is_empty() {
                        k.clone()
                    } else {
                        format!("{path}.{k}")
                    };
                    out.insert(k.clone(), self.resolve_at(&child_path, v)?);
                }
                Ok(ConfValue::Map(out))
            }
            ConfValue::Seq(s) => {
                let mut out = Vec::with_capacity(s.len());
                for (i, v) in s.iter().enumerate() {
                    let child_path = if path.is_empty() {
                        i.to_string()
                    } else {
                        format!("{path}.{i}")
                    };
                    out.push(self.resolve_at(&child_path, v)?);
                }
                Ok(ConfValue::Seq(out))
            }
            other => Ok(other.clone()),
        }
    }

    /// Write `value` at `path` in the top layer, creating intermediate nodes
    /// as needed. A numeric segment indexes a sequence when one is present
    /// (padding with nulls when writing past the end) and otherwise creates
    /// one. `Null` removes the key.
    pub fn set(&mut self, path: &str, value: ConfValue) {
        let top = self.layers.last_mut().expect("layer 0 always present");
        set_in(top, path, value);
        self.invalidate();
    }

    /// Remove the value at `path` from the top layer.
    pub fn delete(&mut self, path: &str) {
        self.set(path, ConfValue::Null);
    }

    /// Every dotted path in the top layer, pre-order, including non-leaf
    /// mappings and sequences.
    pub fn keys(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_keys(self.layers.last().expect("layer 0 always present"), "", &mut out);
        out
    }
}

fn collect_keys(node: &ConfValue, prefix: &str, out: &mut Vec<String>) {
    match node {
        ConfValue::Map(m) => {
            for (k, v) in m {
                let path = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                out.push(path.clone());
                collect_keys(v, &path, out);
            }
        }
        ConfValue::Seq(s) => {
            for (i, v) in s.iter().enumerate() {
                let path = if prefix.is_empty() {
                    i.to_string()
                } else {
                    format!("{prefix}.{i}")
                };
                out.push(path.clone());
                collect_keys(v, &path, out);
            }
        }
        _ => {}
    }
}

fn set_in(node: &mut ConfValue, path: &str, value: ConfValue) {
    let (head, tail) = match path.split_once('.') {
        Some((h, t)) => (h, Some(t)),
        None => (path, None),
    };

    // make sure the current node can hold children
    if !matches!(node, ConfValue::Map(_) | ConfValue::Seq(_)) {
        *node = if head.parse::<usize>().is_ok() {
            ConfValue::Seq(Vec::new())
        } else {
            ConfValue::Map(BTreeMap::new())
        };
    }

    match node {
        ConfValue::Seq(s) => {
            if let Ok(idx) = head.parse::<usize>() {
                while s.len() <= idx {
                    s.push(ConfValue::Null);
                }
                match tail {
                    None => s[idx] = value,
                    Some(rest) => {
                        if matches!(s[idx], ConfValue::Null) {
                            s[idx] = child_container(rest);
                        }
                        set_in(&mut s[idx], rest, value);
                    }
                }
            }
            // non-numeric segment on a sequence: nothing sensible to do
        }
        ConfValue::Map(m) => match tail {
            None => {
                if matches!(value, ConfValue::Null) {
                    m.remove(head);
                } else {
                    m.insert(head.to_string(), value);
                }
            }
            Some(rest) => {
                let entry = m
                    .entry(head.to_string())
                    .or_insert_with(|| child_container(rest));
                set_in(entry, rest, value);
            }
        },
        _ => unreachable!("node was coerced to a container above"),
    }
}

/// Container shape for an intermediate node, decided by the next segment.
fn child_container(rest: &str) -> ConfValue {
    let next = rest.split('.').next().unwrap_or(rest);
    if next.parse::<usize>().is_ok() {
        ConfValue::Seq(Vec::new())
    } else {
        ConfValue::Map(BTreeMap::new())
    }
}

// ─── Instrument presets ─────────────────────────────────────────────

/// (lowest MIDI pitch, string count) for the supported instruments.
pub fn instrument_preset(name: &str) -> Option<(i32, usize)> {
    match name {
        "37-strings-g-g" => Some((43, 37)),
        "25-strings-g-g" => Some((55, 25)),
        "21-strings-a-f" => Some((57, 21)),
        "18-strings-b-e" => Some((59, 18)),
        _ => None,
    }
}

const PITCH_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Space-separated string labels for an instrument, lowest string first.
pub fn string_name_row(first_pitch: i32, count: usize) -> String {
    (0..count as i32)
        .map(|i| PITCH_NAMES[((first_pitch + i).rem_euclid(12)) as usize])
        .collect::<Vec<_>>()
        .join(" ")
}

// ─── Default configuration tree ─────────────────────────────────────

/// The built-in default layer. `extract.0` is fully populated; the other
/// extracts are sparse and fall back to `extract.0` during layout.
pub fn default_conf() -> ConfValue {
    let base = json!({
        "instrument": "25-strings-g-g",
        "restposition": {
            "default": "center",
            "repeatstart": "next",
            "repeatend": "previous"
        },
        "defaults": {
            "notebound": {
                "annotation": { "pos": [5.0, -7.0] },
                "partname": { "pos": [-4.0, -7.0] },
                "variantend": { "pos": [-4.0, -7.0] },
                "countnote": { "pos": [3.0, -2.0] }
            }
        },
        "annotations": {
            "vt": { "text": "v.t.", "pos": [-1.0, -6.0] },
            "vr": { "text": "v.r.", "pos": [2.0, -3.0] }
        },
        "extract": {
            "0": {
                "title": "alle Stimmen",
                "startpos": 15.0,
                "voices": [1, 2, 3, 4],
                "synchlines": [[1, 2], [3, 4]],
                "flowlines": [1, 3],
                "subflowlines": [2, 4],
                "jumplines": [1, 3],
                "layoutlines": [1, 2, 3, 4],
                "legend": { "pos": [320.0, 27.0], "spos": [320.0, 7.0] },
                "notes": {},
                "barnumbers": {
                    "voices": [],
                    "pos": [6.0, -4.0],
                    "prefix": "",
                    "style": "small"
                },
                "countnotes": { "voices": [], "pos": [3.0, -2.0], "style": "smaller" },
                "stringnames": {
                    "vpos": 4.0,
                    "marks": { "voices": [], "hpos": [43, 79] }
                },
                "printer": {
                    "a3_offset": [0.0, 0.0],
                    "a4_offset": [-5.0, 0.0],
                    "show_border": false
                },
                "layout": {
                    "limit_a3": true,
                    "LINE_THIN": 0.1,
                    "LINE_MEDIUM": 0.3,
                    "LINE_THICK": 0.5,
                    "ELLIPSE_SIZE": [3.5, 1.7],
                    "REST_SIZE": [4.0, 2.0],
                    "X_SPACING": 11.5,
                    "X_OFFSET": 2.8,
                    "PITCH_OFFSET": -43,
                    "jumpline_anchor": [3.5, 1.0],
                    "bottomup": false,
                    "beams": false,
                    "SHORTEST_NOTE": 64,
                    "color": {
                        "color_default": "black",
                        "color_variant1": "grey",
                        "color_variant2": "dimgrey"
                    },
                    "packer": {
                        "pack_method": 0,
                        "pack_max_spreadfactor": 2.0,
                        "pack_min_increment": 0.2
                    }
                }
            },
            "1": { "title": "Sopran, Alt", "voices": [1, 2] },
            "2": { "title": "Tenor, Bass", "voices": [3, 4] }
        }
    });

    let mut conf = ConfValue::from(base);

    // string labels derive from the selected instrument; expressed as a
    // deferred value so overriding `instrument` re-derives them
    let stringnames = ConfValue::deferred(|stack| {
        let name = stack
            .get("instrument")?
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| "25-strings-g-g".to_string());
        let (first, count) = instrument_preset(&name)
            .ok_or_else(|| HarpError::Config(format!("unknown instrument: {name}")))?;
        Ok(ConfValue::Str(string_name_row(first, count)))
    });
    if let ConfValue::Map(_) = conf {
        set_in(
            &mut conf,
            "extract.0.stringnames.text",
            stringnames,
        );
    }
    conf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(v: serde_json::Value) -> ConfValue {
        ConfValue::from(v)
    }

    #[test]
    fn push_pop_restores_prior_values() {
        let mut stack = ConfStack::new();
        stack.push(layer(json!({"a": {"b": 1, "c": 2}})));
        let before = stack.get("a").unwrap();

        stack.push(layer(json!({"a": {"b": 99}, "d": true})));
        assert_eq!(
            stack.get("a.b").unwrap(),
            Some(ConfValue::Int(99))
        );
        stack.pop();

        assert_eq!(stack.get("a").unwrap(), before);
        assert_eq!(stack.get("d").unwrap(), None);
    }

    #[test]
    fn deep_merge_is_non_destructive() {
        let mut stack = ConfStack::new();
        stack.push(layer(json!({"x": {"deep": {"k": "v"}, "n": 1}})));
        stack.push(layer(json!({"x": {"deep": {"k2": "v2"}}})));

        // merged view sees both
        assert_eq!(
            stack.get("x.deep.k").unwrap(),
            Some(ConfValue::Str("v".into()))
        );
        assert_eq!(
            stack.get("x.deep.k2").unwrap(),
            Some(ConfValue::Str("v2".into()))
        );

        stack.pop();
        assert_eq!(stack.get("x.deep.k2").unwrap(), None);
        assert_eq!(
            stack.get("x.deep.k").unwrap(),
            Some(ConfValue::Str("v".into()))
        );
    }

    #[test]
    fn sequences_replace_wholesale() {
        let mut stack = ConfStack::new();
        stack.push(layer(json!({"voices": [1, 2, 3, 4]})));
        stack.push(layer(json!({"voices": [1]})));
        assert_eq!(
            stack.get("voices").unwrap(),
            Some(ConfValue::Seq(vec![ConfValue::Int(1)]))
        );
    }

    #[test]
    fn null_erases_on_merge_and_set() {
        let mut stack = ConfStack::new();
        stack.push(layer(json!({"a": 1, "b": 2})));
        stack.push(layer(json!({"a": null})));
        assert_eq!(stack.get("a").unwrap(), None);
        assert_eq!(stack.get("b").unwrap(), Some(ConfValue::Int(2)));

        stack.delete("b");
        assert_eq!(stack.get("b").unwrap(), None);
    }

    #[test]
    fn circular_deferred_fails_with_cycle() {
        let mut stack = ConfStack::new();
        stack.set(
            "A",
            ConfValue::deferred(|s| Ok(s.get("B")?.unwrap_or(ConfValue::Null))),
        );
        stack.set(
            "B",
            ConfValue::deferred(|s| Ok(s.get("A")?.unwrap_or(ConfValue::Null))),
        );

        match stack.get("A") {
            Err(HarpError::CircularConfig(cycle)) => {
                assert!(cycle.contains(&"A".to_string()));
                assert!(cycle.contains(&"B".to_string()));
            }
            other => panic!("expected circular config error, got {other:?}"),
        }
    }

    #[test]
    fn deferred_results_are_cached_and_invalidated() {
        use std::cell::Cell;
        use std::rc::Rc;

        let calls = Rc::new(Cell::new(0));
        let calls2 = calls.clone();

        let mut stack = ConfStack::new();
        stack.set("base", ConfValue::Int(21));
        stack.set(
            "derived",
            ConfValue::deferred(move |s| {
                calls2.set(calls2.get() + 1);
                let base = s.get("base")?.and_then(|v| v.as_i64()).unwrap_or(0);
                Ok(ConfValue::Int(base * 2))
            }),
        );

        assert_eq!(stack.get("derived").unwrap(), Some(ConfValue::Int(42)));
        assert_eq!(stack.get("derived").unwrap(), Some(ConfValue::Int(42)));
        assert_eq!(calls.get(), 1, "second read must hit the cache");

        stack.set("base", ConfValue::Int(10));
        assert_eq!(stack.get("derived").unwrap(), Some(ConfValue::Int(20)));
        assert_eq!(calls.get(), 2, "set must invalidate the cache");
    }

    #[test]
    fn numeric_segments_create_sequences() {
        let mut stack = ConfStack::new();
        stack.set("x.0.y", ConfValue::Int(7));

        assert_eq!(stack.get("x.0.y").unwrap(), Some(ConfValue::Int(7)));
        let x = stack.get("x").unwrap().expect("x present");
        let seq = x.as_seq().expect("x is a sequence");
        assert_eq!(seq.len(), 1);
        assert_eq!(seq[0].child("y"), Some(&ConfValue::Int(7)));
    }

    #[test]
    fn numeric_segments_address_map_keys_when_present() {
        let mut stack = ConfStack::new();
        stack.push(layer(json!({"extract": {"0": {"title": "t"}}})));
        assert_eq!(
            stack.get("extract.0.title").unwrap(),
            Some(ConfValue::Str("t".into()))
        );
    }

    #[test]
    fn keys_lists_paths_preorder() {
        let mut stack = ConfStack::new();
        stack.push(layer(json!({"a": {"b": 1}, "c": [5]})));
        let keys = stack.keys();
        assert!(keys.contains(&"a".to_string()));
        assert!(keys.contains(&"a.b".to_string()));
        assert!(keys.contains(&"c".to_string()));
        assert!(keys.contains(&"c.0".to_string()));
    }

    #[test]
    fn default_conf_resolves_stringnames_per_instrument() {
        let mut stack = ConfStack::with_defaults();
        let names = stack
            .get("extract.0.stringnames.text")
            .unwrap()
            .and_then(|v| v.as_str().map(String::from))
            .expect("string names resolve");
        assert!(names.starts_with("G G# A"));
        assert_eq!(names.split(' ').count(), 25);

        stack.push({
            let mut m = BTreeMap::new();
            m.insert("instrument".to_string(), ConfValue::from("18-strings-b-e"));
            ConfValue::Map(m)
        });
        let names = stack
            .get("extract.0.stringnames.text")
            .unwrap()
            .and_then(|v| v.as_str().map(String::from))
            .expect("string names resolve");
        assert_eq!(names.split(' ').count(), 18);
        assert!(names.starts_with("B C"));
    }
}
