//! Component B: the Path Engine (spec §4.B).
//!
//! Documents are represented as `serde_json::Value`. We deliberately do not
//! enable serde_json's `preserve_order` feature, so `Value::Object` is
//! backed by a `BTreeMap` and already iterates in lexicographic key order —
//! that's what makes `canonical_json` a thin wrapper rather than a sort pass.

use serde_json::Value;
use std::fmt;

/// One segment of a leaf path: a map key, or an array index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A `.`-separated, index-bracketed leaf path, e.g.
/// `spec.template.spec.containers[0].image`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Path(pub Vec<PathSegment>);

impl Path {
    pub fn root() -> Self {
        Path(Vec::new())
    }

    pub fn push_key(&self, key: impl Into<String>) -> Self {
        let mut segs = self.0.clone();
        segs.push(PathSegment::Key(key.into()));
        Path(segs)
    }

    pub fn push_index(&self, idx: usize) -> Self {
        let mut segs = self.0.clone();
        segs.push(PathSegment::Index(idx));
        Path(segs)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse a dotted+indexed path string back into segments.
    ///
    /// `ignore_fields` entries and test fixtures are written in this form;
    /// user input is rejected with `None` on malformed index brackets rather
    /// than panicking.
    pub fn parse(s: &str) -> Option<Path> {
        if s.is_empty() {
            return Some(Path::root());
        }
        let mut segs = Vec::new();
        for part in s.split('.') {
            let mut rest = part;
            // A part may be `name` or `name[0]` or `name[0][1]` (rare, but
            // arrays-of-arrays-of-scalars are not outlawed by the model).
            if let Some(bracket) = rest.find('[') {
                let (name, mut tail) = rest.split_at(bracket);
                if !name.is_empty() {
                    segs.push(PathSegment::Key(name.to_string()));
                }
                loop {
                    if !tail.starts_with('[') {
                        break;
                    }
                    let close = tail.find(']')?;
                    let idx: usize = tail[1..close].parse().ok()?;
                    segs.push(PathSegment::Index(idx));
                    tail = &tail[close + 1..];
                }
                rest = "";
                let _ = rest;
            } else if !rest.is_empty() {
                segs.push(PathSegment::Key(rest.to_string()));
            }
        }
        Some(Path(segs))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for seg in &self.0 {
            match seg {
                PathSegment::Key(k) => {
                    if !first {
                        write!(f, ".")?;
                    }
                    write!(f, "{k}")?;
                }
                PathSegment::Index(i) => write!(f, "[{i}]")?,
            }
            first = false;
        }
        Ok(())
    }
}

/// A list counts as "of maps" (and is therefore recursed into, per spec
/// §4.B) only if every element is an object. An empty list, or a list with
/// any scalar/array element, is treated as an atomic leaf.
fn is_list_of_maps(items: &[Value]) -> bool {
    !items.is_empty() && items.iter().all(|v| v.is_object())
}

/// True when `value` is itself a leaf per spec §4.B: anything except a
/// non-empty map or a list whose every element is a map. Used to validate
/// that an `ignore_fields` entry addresses a leaf rather than an interior
/// node (spec §7).
pub fn is_leaf_value(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => !is_list_of_maps(items),
        _ => true,
    }
}

/// Enumerate all and only the leaves of `obj`.
pub fn leaf_paths(obj: &Value) -> Vec<Path> {
    let mut out = Vec::new();
    collect_leaf_paths(obj, &Path::root(), &mut out);
    out
}

fn collect_leaf_paths(obj: &Value, prefix: &Path, out: &mut Vec<Path>) {
    match obj {
        Value::Object(map) => {
            if map.is_empty() {
                // Nothing to recurse into; the empty object itself is the
                // value at this path.
                out.push(prefix.clone());
                return;
            }
            for (k, v) in map {
                collect_leaf_paths(v, &prefix.push_key(k.clone()), out);
            }
        }
        Value::Array(items) => {
            if is_list_of_maps(items) {
                for (i, v) in items.iter().enumerate() {
                    collect_leaf_paths(v, &prefix.push_index(i), out);
                }
            } else {
                out.push(prefix.clone());
            }
        }
        _ => out.push(prefix.clone()),
    }
}

/// Deterministic lookup. Absent segments return `(None, false)`; an array
/// index past the end is likewise absent rather than an error.
pub fn get_by_path<'a>(obj: &'a Value, path: &Path) -> (Option<&'a Value>, bool) {
    let mut cur = obj;
    for seg in &path.0 {
        match (seg, cur) {
            (PathSegment::Key(k), Value::Object(map)) => match map.get(k) {
                Some(v) => cur = v,
                None => return (None, false),
            },
            (PathSegment::Index(i), Value::Array(items)) => match items.get(*i) {
                Some(v) => cur = v,
                None => return (None, false),
            },
            _ => return (None, false),
        }
    }
    (Some(cur), true)
}

/// Create intermediate maps/arrays as needed. Growing an array pads with
/// `null` up to the target index.
pub fn set_by_path(dst: &mut Value, path: &Path, value: Value) {
    if path.0.is_empty() {
        *dst = value;
        return;
    }
    set_by_path_inner(dst, &path.0, value);
}

fn set_by_path_inner(dst: &mut Value, segs: &[PathSegment], value: Value) {
    let (head, tail) = (&segs[0], &segs[1..]);
    match head {
        PathSegment::Key(k) => {
            if !dst.is_object() {
                *dst = Value::Object(serde_json::Map::new());
            }
            let map = dst.as_object_mut().expect("just coerced to object");
            let entry = map
                .entry(k.clone())
                .or_insert_with(|| default_container_for(tail));
            if tail.is_empty() {
                *entry = value;
            } else {
                set_by_path_inner(entry, tail, value);
            }
        }
        PathSegment::Index(i) => {
            if !dst.is_array() {
                *dst = Value::Array(Vec::new());
            }
            let arr = dst.as_array_mut().expect("just coerced to array");
            while arr.len() <= *i {
                arr.push(Value::Null);
            }
            if tail.is_empty() {
                arr[*i] = value;
            } else {
                if arr[*i].is_null() {
                    arr[*i] = default_container_for(tail);
                }
                set_by_path_inner(&mut arr[*i], tail, value);
            }
        }
    }
}

fn default_container_for(remaining: &[PathSegment]) -> Value {
    match remaining.first() {
        Some(PathSegment::Key(_)) => Value::Object(serde_json::Map::new()),
        Some(PathSegment::Index(_)) => Value::Array(Vec::new()),
        None => Value::Null,
    }
}

/// Restrict `src` to `paths`, omitting any path absent from `src`.
pub fn project(src: &Value, paths: &[Path]) -> Value {
    let mut out = Value::Object(serde_json::Map::new());
    for path in paths {
        let (value, present) = get_by_path(src, path);
        if present {
            set_by_path(&mut out, path, value.unwrap().clone());
        }
    }
    out
}

/// Serialize with lexicographic key order and no insignificant whitespace.
/// Relies on `serde_json::Map` being `BTreeMap`-backed (the `preserve_order`
/// feature is not enabled anywhere in this crate's dependency tree).
pub fn canonical_json(obj: &Value) -> String {
    serde_json::to_string(obj).expect("Value serialization is infallible")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn path_display_and_parse_round_trip() {
        let p = Path(vec![
            PathSegment::Key("spec".into()),
            PathSegment::Key("containers".into()),
            PathSegment::Index(0),
            PathSegment::Key("image".into()),
        ]);
        assert_eq!(p.to_string(), "spec.containers[0].image");
        assert_eq!(Path::parse("spec.containers[0].image").unwrap(), p);
    }

    #[test]
    fn leaf_paths_recurses_into_lists_of_maps_only() {
        let obj = json!({
            "data": {"k1": "v1"},
            "tags": ["a", "b"],
            "containers": [{"name": "c1", "image": "nginx"}],
        });
        let mut paths: Vec<String> = leaf_paths(&obj).into_iter().map(|p| p.to_string()).collect();
        paths.sort();
        assert_eq!(
            paths,
            vec![
                "containers[0].image",
                "containers[0].name",
                "data.k1",
                "tags",
            ]
        );
    }

    #[test]
    fn empty_object_is_its_own_leaf() {
        let obj = json!({"spec": {}});
        let paths: Vec<String> = leaf_paths(&obj).into_iter().map(|p| p.to_string()).collect();
        assert_eq!(paths, vec!["spec"]);
    }

    #[test]
    fn is_leaf_value_rejects_non_empty_maps_and_lists_of_maps() {
        assert!(is_leaf_value(&json!("v1")));
        assert!(is_leaf_value(&json!(5)));
        assert!(is_leaf_value(&json!(["a", "b"])));
        assert!(is_leaf_value(&json!({})));
        assert!(!is_leaf_value(&json!({"k1": "v1"})));
        assert!(!is_leaf_value(&json!([{"name": "c1"}])));
    }

    #[test]
    fn get_by_path_absent_segment() {
        let obj = json!({"a": {"b": 1}});
        let (v, present) = get_by_path(&obj, &Path::parse("a.c").unwrap());
        assert!(!present);
        assert!(v.is_none());
    }

    #[test]
    fn set_by_path_grows_arrays_with_null_padding() {
        let mut dst = Value::Null;
        set_by_path(&mut dst, &Path::parse("containers[2].name").unwrap(), json!("c3"));
        assert_eq!(
            dst,
            json!({"containers": [null, null, {"name": "c3"}]})
        );
    }

    #[test]
    fn project_restricts_to_paths_and_omits_absent() {
        let obj = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "c1", "namespace": "default"},
            "data": {"k1": "v1", "k2": "v2"},
        });
        let paths = vec![
            Path::parse("apiVersion").unwrap(),
            Path::parse("kind").unwrap(),
            Path::parse("metadata.name").unwrap(),
            Path::parse("data.k1").unwrap(),
            Path::parse("data.missing").unwrap(),
        ];
        let projected = project(&obj, &paths);
        assert_eq!(
            projected,
            json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "c1"},
                "data": {"k1": "v1"},
            })
        );
    }

    #[test]
    fn canonical_json_is_deterministic_and_key_sorted() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn project_is_byte_for_byte_deterministic_across_runs() {
        let obj = json!({"z": 1, "a": {"y": 2, "b": 3}});
        let paths = leaf_paths(&obj);
        let first = canonical_json(&project(&obj, &paths));
        let second = canonical_json(&project(&obj, &paths));
        assert_eq!(first, second);
    }
}
