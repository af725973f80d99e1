//! Component C: the Ownership Decoder (spec §4.C).
//!
//! The server reports per-field ownership as a list of
//! `{manager, operation, fields}` entries per `ManagedFieldsEntry`, where
//! `fields` is the nested `FieldsV1` encoding: each map key is one of
//! `f:<fieldname>`, `k:{<keyJSON>}`, `i:<index>`, `v:<scalar>`, and a bare
//! `.` key marks "this path itself is owned".
//!
//! Composite list keys (`k:{...}`) don't carry an index, so resolving them
//! to our index-based `Path` requires walking a reference object (the live
//! or dry-run object) in lockstep to find which array element the key
//! values match.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::path::{Path, PathSegment};

/// One raw `managedFields` entry as reported by the server.
#[derive(Debug, Clone)]
pub struct OwnershipEntry {
    pub manager: String,
    pub operation: String,
    pub fields: Value,
}

/// Decoded ownership: a path → manager map (last writer in entry order
/// wins), plus a convenience view of the paths owned by our manager.
#[derive(Debug, Clone, Default)]
pub struct Ownership {
    pub path_owner: BTreeMap<Path, String>,
    pub owned_by_us: std::collections::BTreeSet<Path>,
    /// `/status` entries (operation = Update), tracked but never fed to the
    /// Conflict Classifier (spec §9 open question, resolved: excluded).
    pub status_owners: BTreeMap<Path, String>,
}

/// Decode a server's `managedFields` list against `reference_obj` (the live
/// or dry-run object the entries describe — needed to resolve `k:` keyed
/// list entries to an index).
pub fn decode(entries: &[OwnershipEntry], reference_obj: &Value, our_manager: &str) -> Ownership {
    let mut out = Ownership::default();

    for entry in entries {
        if entry.fields.as_object().is_none_or(|m| m.is_empty()) {
            // Empty field trees carry no ownership information.
            continue;
        }

        if entry.operation != "Apply" {
            // Non-Apply entries (Update/Status) never participate in the
            // main projection; we still surface `/status` ownership for
            // callers that want it (spec §9).
            if entry.operation == "Update" {
                let mut paths = Vec::new();
                let mut prefix = Vec::new();
                walk(&entry.fields, Some(reference_obj), &mut prefix, &mut paths);
                for p in paths {
                    out.status_owners.insert(p, entry.manager.clone());
                }
            }
            continue;
        }

        let mut paths = Vec::new();
        let mut prefix = Vec::new();
        walk(&entry.fields, Some(reference_obj), &mut prefix, &mut paths);
        for p in paths {
            out.path_owner.insert(p.clone(), entry.manager.clone());
            if entry.manager == our_manager {
                out.owned_by_us.insert(p);
            }
        }
    }

    out
}

fn walk(
    node: &Value,
    reference: Option<&Value>,
    prefix: &mut Vec<PathSegment>,
    out: &mut Vec<Path>,
) {
    let Some(map) = node.as_object() else {
        return;
    };
    for (key, child) in map {
        if key == "." {
            out.push(Path(prefix.clone()));
            continue;
        }
        if let Some(field) = key.strip_prefix("f:") {
            prefix.push(PathSegment::Key(field.to_string()));
            let sub_ref = reference.and_then(|r| r.get(field));
            walk(child, sub_ref, prefix, out);
            prefix.pop();
        } else if let Some(raw_key) = key.strip_prefix("k:") {
            if let Some(idx) = resolve_keyed_index(raw_key, reference) {
                prefix.push(PathSegment::Index(idx));
                let sub_ref = reference.and_then(|r| r.get(idx));
                walk(child, sub_ref, prefix, out);
                prefix.pop();
            }
            // Unresolvable composite key (reference missing or no match):
            // skip. We cannot represent ownership of a list entry we can't
            // locate in the reference object.
        } else if let Some(raw_idx) = key.strip_prefix("i:") {
            if let Ok(idx) = raw_idx.parse::<usize>() {
                prefix.push(PathSegment::Index(idx));
                let sub_ref = reference.and_then(|r| r.get(idx));
                walk(child, sub_ref, prefix, out);
                prefix.pop();
            }
        } else if key.starts_with("v:") {
            // Set-membership marker for a scalar list element. Our path
            // model has no per-scalar-element leaf, so the owning manager
            // owns the whole array at this prefix.
            out.push(Path(prefix.clone()));
        }
    }
}

/// Find the array index in `reference` whose object fields match every
/// field/value pair in `key_json` (the JSON payload of a `k:{...}` key).
fn resolve_keyed_index(raw_key: &str, reference: Option<&Value>) -> Option<usize> {
    let key_json: Value = serde_json::from_str(raw_key).ok()?;
    let key_fields = key_json.as_object()?;
    let Value::Array(items) = reference? else {
        return None;
    };
    items.iter().position(|item| {
        key_fields
            .iter()
            .all(|(k, v)| item.get(k).map(|iv| iv == v).unwrap_or(false))
    })
}
