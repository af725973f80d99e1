//! The Managed State and Resource Identity (spec §3).

use std::collections::BTreeMap;
use std::time::Duration;

use kube::core::GroupVersionKind;

use crate::connection::ConnectionDescriptor;
use crate::projection::Projection;

/// `(GroupVersionKind, namespace, name)` — used as the lookup key against
/// the cluster, never persisted as the object id (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceIdentity {
    pub gvk: GroupVersionKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl std::fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}/{}", self.gvk.kind, self.gvk.version, ns, self.name),
            None => write!(f, "{}/{}/{}", self.gvk.kind, self.gvk.version, self.name),
        }
    }
}

/// The persistent unit owned by one Coordinator instance (spec §3).
#[derive(Debug, Clone)]
pub struct ManagedState {
    /// Opaque 12-hex-character identifier, assigned at creation, never
    /// mutated (I1).
    pub id: Option<String>,
    /// The user-asserted manifest as originally supplied, exact text
    /// preserved.
    pub yaml_body: String,
    /// The subset of the live object this resource claims to manage (I3).
    pub managed_projection: Projection,
    /// Leaf path → owning-manager-name, snapshotted from the last
    /// successful apply/read. Rebuilt from scratch every cycle — derived
    /// data, not authoritative.
    pub field_ownership: BTreeMap<String, String>,
    /// Ordered set of leaf paths explicitly excluded from management.
    pub ignore_fields: Vec<String>,
    pub delete_protection: bool,
    pub force_destroy: bool,
    pub delete_timeout: Duration,
    pub cluster_ref: ConnectionDescriptor,
}

impl ManagedState {
    pub fn new(yaml_body: String, cluster_ref: ConnectionDescriptor) -> Self {
        Self {
            id: None,
            yaml_body,
            managed_projection: Projection::Unknown,
            field_ownership: BTreeMap::new(),
            ignore_fields: Vec::new(),
            delete_protection: false,
            force_destroy: false,
            delete_timeout: Duration::from_secs(300),
            cluster_ref,
        }
    }

    /// I4: an ownership annotation on the live object names this resource
    /// iff it owns at least one leaf path.
    pub fn owns_any_field(&self) -> bool {
        !self.field_ownership.is_empty()
    }
}

/// Generate a fresh 12-hex-character id (spec §3). Not a UUID — just
/// random-enough bytes, hex-encoded and truncated, matching the shape the
/// host engine's state store expects.
pub fn generate_id() -> String {
    use sha2::{Digest, Sha256};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let counter = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let pid = std::process::id();

    let mut hasher = Sha256::new();
    hasher.update(nanos.to_le_bytes());
    hasher.update(counter.to_le_bytes());
    hasher.update(pid.to_le_bytes());
    let digest = hasher.finalize();
    hex_encode(&digest[..6])
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
