//! Component A: the Manifest Parser (spec §4.A).

use std::collections::BTreeSet;

use serde_json::Value;

use crate::annotation::STRATEGIC_MERGE_LIST_PATHS;
use crate::error::{CoreError, Result};
use crate::path::{get_by_path, is_leaf_value, Path};

/// Parse a single-document YAML/JSON payload into a document.
///
/// `serde_yaml` accepts JSON as a YAML subset, so this covers both input
/// formats the host engine may hand us (spec §1 bullet 1).
pub fn parse(yaml_body: &str) -> Result<Value> {
    let value: Value = serde_yaml::from_str(yaml_body)
        .map_err(|e| CoreError::UserInput(format!("failed to parse manifest: {e}")))?;
    validate(&value)?;
    Ok(value)
}

/// Post-parse validation (spec §4.A): required identity fields, and
/// strategic-merge list entries must be named.
pub fn validate(doc: &Value) -> Result<()> {
    require_nonempty_string(doc, "apiVersion")?;
    require_nonempty_string(doc, "kind")?;

    let name = doc
        .get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str);
    match name {
        Some(s) if !s.is_empty() => {}
        _ => {
            return Err(CoreError::UserInput(
                "metadata.name must be a non-empty string".into(),
            ));
        }
    }

    for list_path in STRATEGIC_MERGE_LIST_PATHS {
        if let Some(Value::Array(items)) = get_dotted(doc, list_path) {
            for (i, item) in items.iter().enumerate() {
                let entry_name = item.get("name").and_then(Value::as_str);
                if !matches!(entry_name, Some(s) if !s.is_empty()) {
                    return Err(CoreError::UserInput(format!(
                        "{list_path}[{i}] is missing a non-empty `name`; the server's \
                         strategic-merge algorithm requires one to align entries"
                    )));
                }
            }
        }
    }

    Ok(())
}

fn require_nonempty_string(doc: &Value, field: &str) -> Result<()> {
    match doc.get(field).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(()),
        _ => Err(CoreError::UserInput(format!(
            "{field} must be a non-empty string"
        ))),
    }
}

/// Plain dotted-key lookup (no array indices) used only for locating the
/// fixed strategic-merge list paths named in spec §4.A.
fn get_dotted<'a>(doc: &'a Value, dotted: &str) -> Option<&'a Value> {
    let mut cur = doc;
    for key in dotted.split('.') {
        cur = cur.get(key)?;
    }
    Some(cur)
}

/// Parse and validate `ignore_fields` entries against `desired` (spec §7:
/// "`ignore_fields` referencing a non-leaf path" is a `UserInputError`
/// surfaced at plan-time, not silently dropped). Each entry must parse into
/// a well-formed path; where it resolves against `desired`, the value found
/// there must itself be a leaf. An entry absent from `desired` is accepted
/// as-is — it may name a field the user is releasing rather than asserting
/// (spec Scenario 4).
pub fn parse_ignore_fields(desired: &Value, ignore_fields: &[String]) -> Result<BTreeSet<Path>> {
    let mut out = BTreeSet::new();
    for raw in ignore_fields {
        let path = Path::parse(raw).ok_or_else(|| {
            CoreError::UserInput(format!("ignore_fields entry {raw:?} is not a well-formed path"))
        })?;
        let (value, present) = get_by_path(desired, &path);
        if present && !is_leaf_value(value.expect("present implies Some")) {
            return Err(CoreError::UserInput(format!(
                "ignore_fields entry {raw:?} does not address a leaf path"
            )));
        }
        out.insert(path);
    }
    Ok(out)
}

/// Strip server-generated metadata and the status subtree, for Import
/// (spec §4.A, §6).
pub fn clean_for_export(doc: &Value) -> Value {
    let mut out = doc.clone();
    if let Value::Object(map) = &mut out {
        map.remove("status");
        if let Some(Value::Object(meta)) = map.get_mut("metadata") {
            for key in [
                "uid",
                "resourceVersion",
                "generation",
                "creationTimestamp",
                "managedFields",
                "selfLink",
                "ownerReferences",
            ] {
                meta.remove(key);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_valid_manifest() {
        let yaml = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: c1\n";
        let doc = parse(yaml).unwrap();
        assert_eq!(doc["kind"], "ConfigMap");
    }

    #[test]
    fn rejects_missing_name() {
        let yaml = "apiVersion: v1\nkind: ConfigMap\nmetadata: {}\n";
        let err = parse(yaml).unwrap_err();
        assert!(matches!(err, CoreError::UserInput(_)));
    }

    #[test]
    fn rejects_unnamed_container_entry() {
        let doc = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "d1"},
            "spec": {"template": {"spec": {"containers": [{"image": "nginx"}]}}},
        });
        let err = validate(&doc).unwrap_err();
        assert!(matches!(err, CoreError::UserInput(_)));
    }

    #[test]
    fn accepts_named_container_entries() {
        let doc = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "d1"},
            "spec": {"template": {"spec": {"containers": [{"name": "c1", "image": "nginx"}]}}},
        });
        assert!(validate(&doc).is_ok());
    }

    #[test]
    fn parse_ignore_fields_accepts_leaf_paths() {
        let doc = json!({"spec": {"replicas": 5, "template": {"spec": {"containers": []}}}});
        let paths = parse_ignore_fields(&doc, &["spec.replicas".to_string()]).unwrap();
        assert!(paths.contains(&Path::parse("spec.replicas").unwrap()));
    }

    #[test]
    fn parse_ignore_fields_accepts_an_entry_absent_from_desired() {
        // Releasing a field the user removed from the manifest (Scenario 4):
        // it can't be checked against `desired` but must not be rejected.
        let doc = json!({"metadata": {"name": "d1"}});
        let paths = parse_ignore_fields(&doc, &["spec.replicas".to_string()]).unwrap();
        assert!(paths.contains(&Path::parse("spec.replicas").unwrap()));
    }

    #[test]
    fn parse_ignore_fields_rejects_a_non_leaf_path() {
        let doc = json!({"spec": {"replicas": 5, "paused": false}});
        let err = parse_ignore_fields(&doc, &["spec".to_string()]).unwrap_err();
        assert!(matches!(err, CoreError::UserInput(_)));
    }

    #[test]
    fn parse_ignore_fields_rejects_a_malformed_path() {
        let doc = json!({"metadata": {"name": "d1"}});
        let err = parse_ignore_fields(&doc, &["spec.containers[oops]".to_string()]).unwrap_err();
        assert!(matches!(err, CoreError::UserInput(_)));
    }

    #[test]
    fn clean_for_export_strips_server_metadata_and_status() {
        let doc = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "c1",
                "uid": "abc",
                "resourceVersion": "123",
                "generation": 2,
                "creationTimestamp": "2024-01-01T00:00:00Z",
                "managedFields": [{"manager": "kubectl"}],
            },
            "data": {"k1": "v1"},
            "status": {"phase": "Active"},
        });
        let cleaned = clean_for_export(&doc);
        assert_eq!(
            cleaned,
            json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "c1"},
                "data": {"k1": "v1"},
            })
        );
    }
}
