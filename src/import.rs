//! Import flow (spec §6).
//!
//! Brings an object that already exists on a cluster under management
//! without going through Create: fetch it, strip server-generated
//! bookkeeping, stamp the ownership annotation under a distinct field
//! manager so adoption is traceable, assign a fresh id, and hand back a
//! `ManagedState` ready for the host engine to persist.

use kube::api::{Api, Patch, PatchParams};
use kube::core::DynamicObject;
use kube::discovery::{Discovery, Scope};
use serde_json::Value;

use crate::annotation::{extract_ownership_id, CREATED_AT_ANNOTATION, FIELD_MANAGER, IMPORT_FIELD_MANAGER, IMPORT_KUBECONFIG_ENV, OWNERSHIP_ANNOTATION};
use crate::connection::ConnectionDescriptor;
use crate::coordinator::owned_by_us_field_ownership;
use crate::error::{CoreError, Result};
use crate::gateway::{classify_kube_error, extract_ownership_entries};
use crate::manifest;
use crate::ownership;
use crate::projection::{self, Projection};
use crate::state::{generate_id, ManagedState};

/// A parsed import id: `<context>/<namespace>/<kind>/<name>` (namespaced) or
/// `<context>/<kind>/<name>` (cluster-scoped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportId {
    pub context: String,
    pub namespace: Option<String>,
    pub kind: String,
    pub name: String,
}

pub fn parse_import_id(id: &str) -> Result<ImportId> {
    let parts: Vec<&str> = id.split('/').collect();
    match parts.as_slice() {
        [context, namespace, kind, name] => Ok(ImportId {
            context: context.to_string(),
            namespace: Some(namespace.to_string()),
            kind: kind.to_string(),
            name: name.to_string(),
        }),
        [context, kind, name] => Ok(ImportId {
            context: context.to_string(),
            namespace: None,
            kind: kind.to_string(),
            name: name.to_string(),
        }),
        _ => Err(CoreError::UserInput(format!(
            "import id {id:?} must be <context>/<namespace>/<kind>/<name> or <context>/<kind>/<name>"
        ))),
    }
}

/// Import `import_id` into a fresh `ManagedState`.
///
/// `force` controls what happens when the live object already carries a
/// foreign ownership annotation: `false` refuses (spec §9's resolution of
/// that open question — the safer default), `true` overwrites it.
pub async fn import_resource(import_id: &str, force: bool) -> Result<ManagedState> {
    let parsed = parse_import_id(import_id)?;

    let kubeconfig_path = std::env::var(IMPORT_KUBECONFIG_ENV)
        .map_err(|_| CoreError::UserInput(format!("{IMPORT_KUBECONFIG_ENV} is not set")))?;
    let cluster_ref = ConnectionDescriptor::KubeconfigFile {
        path: kubeconfig_path,
        context: Some(parsed.context.clone()),
    };
    let client = cluster_ref.build_client().await?;

    let discovery = Discovery::new(client.clone()).run().await.map_err(CoreError::Cluster)?;

    let (ar, scope) = resolve_kind(&discovery, &parsed.kind)?;

    let api: Api<DynamicObject> = match scope {
        Scope::Namespaced => {
            let ns = parsed.namespace.as_deref().unwrap_or("default");
            Api::namespaced_with(client.clone(), ns, &ar)
        }
        Scope::Cluster => Api::all_with(client.clone(), &ar),
    };

    let live = api.get(&parsed.name).await.map_err(classify_kube_error)?;
    let live_value = serde_json::to_value(&live).expect("DynamicObject serializes");

    if let Some(existing_id) = extract_ownership_id(&live_value) {
        if !force {
            return Err(CoreError::OwnershipConflict { existing_id });
        }
    }

    let cleaned = manifest::clean_for_export(&live_value);
    let id = generate_id();
    let created_at = now_rfc3339();

    let mut annotation_patch = serde_json::json!({
        "apiVersion": live_value.get("apiVersion").cloned().unwrap_or(Value::Null),
        "kind": live_value.get("kind").cloned().unwrap_or(Value::Null),
        "metadata": {
            "name": parsed.name,
            "annotations": {
                OWNERSHIP_ANNOTATION: id.clone(),
                CREATED_AT_ANNOTATION: created_at,
            },
        },
    });
    if let Some(ns) = &parsed.namespace {
        annotation_patch["metadata"]["namespace"] = Value::String(ns.clone());
    }

    let dynamic: DynamicObject =
        serde_json::from_value(annotation_patch).map_err(|e| CoreError::UserInput(e.to_string()))?;
    let params = PatchParams::apply(IMPORT_FIELD_MANAGER).force();
    let patched = api
        .patch(&parsed.name, &params, &Patch::Apply(&dynamic))
        .await
        .map_err(classify_kube_error)?;
    let patched_value = serde_json::to_value(&patched).expect("DynamicObject serializes");

    let entries = extract_ownership_entries(&patched_value);
    let decoded = ownership::decode(&entries, &patched_value, FIELD_MANAGER);
    let proj = projection::compute(
        &cleaned,
        &patched_value,
        &Default::default(),
        &Default::default(),
        &decoded.owned_by_us,
    );

    let yaml_body = serde_yaml::to_string(&cleaned).map_err(|e| CoreError::UserInput(e.to_string()))?;

    let mut state = ManagedState::new(yaml_body, cluster_ref);
    state.id = Some(id);
    state.field_ownership = owned_by_us_field_ownership(&decoded);
    state.managed_projection = Projection::Concrete(proj.canonical);

    Ok(state)
}

fn resolve_kind(discovery: &Discovery, kind: &str) -> Result<(kube::discovery::ApiResource, Scope)> {
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.kind == kind {
                return Ok((ar, caps.scope));
            }
        }
    }
    Err(CoreError::DiscoveryMiss(kind.to_string()))
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
