//! Wire-level constants (spec §6).
//!
//! Two spellings of the ownership annotation key appear in the upstream
//! source (`/id` vs `/terraform-id`); this crate fixes it to the one below,
//! per spec §9's resolution of that ambiguity.

/// Names the `ManagedState::id` that owns at least one leaf path of the
/// live object. Absent ⇒ unmanaged; present with a different value ⇒
/// foreign-managed (fatal per §4.G Create/Read/Update).
pub const OWNERSHIP_ANNOTATION: &str = "k8sconnect.terraform.io/terraform-id";

/// Paired annotation recording creation time in RFC 3339 UTC.
pub const CREATED_AT_ANNOTATION: &str = "k8sconnect.terraform.io/created-at";

/// Field manager name used for all regular SSA calls.
pub const FIELD_MANAGER: &str = "k8sconnect";

/// Distinct field manager used by the Import flow, so adoption is
/// traceable in `managedFields` separately from normal applies.
pub const IMPORT_FIELD_MANAGER: &str = "k8sconnect-import";

/// Dedicated field manager used only for the minimal
/// `{"metadata":{"finalizers":[]}}` patch issued by force-destroy.
pub const FORCE_DESTROY_FIELD_MANAGER: &str = "k8sconnect-force-destroy";

/// Environment variable the Import flow reads a kubeconfig path from.
pub const IMPORT_KUBECONFIG_ENV: &str = "K8SCONNECT_IMPORT_KUBECONFIG";

/// Strategic-merge list keys that require every entry to carry a `name`
/// (spec §4.A).
pub const STRATEGIC_MERGE_LIST_PATHS: &[&str] = &[
    "spec.containers",
    "spec.initContainers",
    "spec.template.spec.containers",
    "spec.template.spec.initContainers",
    "spec.jobTemplate.spec.template.spec.containers",
];

/// Read the ownership annotation off a live object, shared by the
/// Coordinator and the Import flow so "absent vs. foreign vs. ours" is
/// decided identically in both places.
pub fn extract_ownership_id(obj: &serde_json::Value) -> Option<String> {
    obj.get("metadata")
        .and_then(|m| m.get("annotations"))
        .and_then(|a| a.get(OWNERSHIP_ANNOTATION))
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}
