//! Component D: the Cluster Gateway (spec §4.D).

use std::collections::HashMap;
use std::time::Duration;

use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::core::{DynamicObject, GroupVersionKind};
use kube::discovery::{pinned_kind, ApiResource, Scope};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{CoreError, Result};
use crate::ownership::OwnershipEntry;
use crate::retry::retry_transient;

/// Why a Delete hasn't completed by the time `delete_timeout` elapsed
/// (spec §9 "Supplemented features").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStall {
    /// The object still carries finalizers.
    FinalizerBlocked,
    /// The object has no finalizers but is still present (e.g. a stuck
    /// admission webhook, or the apiserver never actually removed it).
    StuckWithoutFinalizers,
    /// The delete call itself never went through (network partition during
    /// the initial request, observed only by the caller's own bookkeeping).
    NeverInitiated,
}

/// Options controlling one apply/dry-run call (spec §4.D).
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub manager: String,
    pub force: bool,
}

/// Options controlling one delete call (spec §4.D).
#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    pub propagation: Option<String>,
    pub grace_period_seconds: Option<i64>,
}

/// Narrow interface the rest of the core depends on, so a test harness can
/// substitute an in-memory stub with no initialization-order concerns
/// (spec §9 "No hidden global state").
#[async_trait::async_trait]
pub trait Gateway: Send + Sync {
    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, Scope)>;
    async fn get(&self, gvk: &GroupVersionKind, ns: Option<&str>, name: &str) -> Result<Option<Value>>;
    async fn dry_run_apply(&self, obj: &Value, opts: &ApplyOptions) -> Result<Value>;
    async fn apply(&self, obj: &Value, opts: &ApplyOptions) -> Result<Value>;
    async fn delete(&self, gvk: &GroupVersionKind, ns: Option<&str>, name: &str, opts: &DeleteOptions) -> Result<()>;
    async fn remove_finalizers(&self, gvk: &GroupVersionKind, ns: Option<&str>, name: &str) -> Result<()>;
    /// Invalidate the discovery cache, e.g. after installing a CRD.
    async fn invalidate_discovery(&self);
}

/// Extract the raw `managedFields` list as `OwnershipEntry`s, for the
/// Ownership Decoder (component C).
pub fn extract_ownership_entries(obj: &Value) -> Vec<OwnershipEntry> {
    obj.get("metadata")
        .and_then(|m| m.get("managedFields"))
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| {
                    let manager = e.get("manager")?.as_str()?.to_string();
                    let operation = e.get("operation")?.as_str()?.to_string();
                    let fields = e.get("fieldsV1").cloned().unwrap_or(Value::Null);
                    Some(OwnershipEntry {
                        manager,
                        operation,
                        fields,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Error-class detection for §4.D/§7: CRD-installation races surface as one
/// of these message shapes from the apiserver.
fn is_discovery_race(err: &kube::Error) -> bool {
    let msg = err.to_string();
    msg.contains("no resource found")
        || msg.contains("couldn't get resource list")
        || msg.contains("the server doesn't have a resource type")
}

pub(crate) fn classify_kube_error(err: kube::Error) -> CoreError {
    if let kube::Error::Api(resp) = &err {
        match resp.code {
            401 | 403 => return CoreError::Auth(resp.message.clone()),
            404 => return CoreError::NotFound,
            429 => return CoreError::TransientCluster(resp.message.clone()),
            500..=599 => return CoreError::TransientCluster(resp.message.clone()),
            400 => return CoreError::UserInput(resp.message.clone()),
            _ => {}
        }
    }
    if is_discovery_race(&err) {
        return CoreError::DiscoveryMiss(err.to_string());
    }
    CoreError::Cluster(err)
}

const MAX_ATTEMPTS: u32 = 5;

/// `kube::Client`-backed implementation.
pub struct KubeGateway {
    client: kube::Client,
    discovery_cache: RwLock<HashMap<GroupVersionKind, (ApiResource, Scope)>>,
}

impl KubeGateway {
    pub fn new(client: kube::Client) -> Self {
        Self {
            client,
            discovery_cache: RwLock::new(HashMap::new()),
        }
    }

    async fn resolve_uncached(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, Scope)> {
        let (ar, caps) = pinned_kind(&self.client, gvk)
            .await
            .map_err(classify_kube_error)?;
        Ok((ar, caps.scope))
    }

    fn api_for(&self, ar: &ApiResource, scope: &Scope, ns: Option<&str>) -> Api<DynamicObject> {
        match scope {
            Scope::Namespaced => {
                let ns = ns.unwrap_or("default");
                Api::namespaced_with(self.client.clone(), ns, ar)
            }
            Scope::Cluster => Api::all_with(self.client.clone(), ar),
        }
    }

    async fn api_for_object(&self, obj: &Value) -> Result<(Api<DynamicObject>, GroupVersionKind)> {
        let gvk = gvk_of(obj)?;
        let ns = obj
            .get("metadata")
            .and_then(|m| m.get("namespace"))
            .and_then(Value::as_str);
        let (ar, scope) = self.resolve(&gvk).await?;
        Ok((self.api_for(&ar, &scope, ns), gvk))
    }
}

#[async_trait::async_trait]
impl Gateway for KubeGateway {
    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, Scope)> {
        if let Some(entry) = self.discovery_cache.read().await.get(gvk) {
            return Ok(entry.clone());
        }

        match self.resolve_uncached(gvk).await {
            Ok(entry) => {
                self.discovery_cache
                    .write()
                    .await
                    .insert(gvk.clone(), entry.clone());
                Ok(entry)
            }
            Err(CoreError::DiscoveryMiss(msg)) => {
                // One invalidate-and-retry on a CRD-installation race
                // (spec §4.D).
                warn!(%msg, "discovery miss, invalidating cache and retrying once");
                self.invalidate_discovery().await;
                match self.resolve_uncached(gvk).await {
                    Ok(entry) => {
                        self.discovery_cache
                            .write()
                            .await
                            .insert(gvk.clone(), entry.clone());
                        Ok(entry)
                    }
                    Err(_) => Err(CoreError::UserInput(format!(
                        "resource type {gvk:?} not found after retry; install the CRD first"
                    ))),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn get(&self, gvk: &GroupVersionKind, ns: Option<&str>, name: &str) -> Result<Option<Value>> {
        let (ar, scope) = self.resolve(gvk).await?;
        let api = self.api_for(&ar, &scope, ns);
        let result = retry_transient(MAX_ATTEMPTS, || async {
            api.get_opt(name).await.map_err(classify_kube_error)
        })
        .await?;
        Ok(result.map(|obj| serde_json::to_value(obj).expect("DynamicObject serializes")))
    }

    async fn dry_run_apply(&self, obj: &Value, opts: &ApplyOptions) -> Result<Value> {
        let (api, _gvk) = self.api_for_object(obj).await?;
        let name = name_of(obj)?;
        let dynamic: DynamicObject =
            serde_json::from_value(obj.clone()).map_err(|e| CoreError::UserInput(e.to_string()))?;

        let mut params = PatchParams::apply(&opts.manager);
        params.force = opts.force;
        params.dry_run = true;

        debug!(%name, manager = %opts.manager, "dry-run apply");
        let result = retry_transient(MAX_ATTEMPTS, || async {
            api.patch(&name, &params, &Patch::Apply(&dynamic))
                .await
                .map_err(classify_kube_error)
        })
        .await?;
        Ok(serde_json::to_value(result).expect("DynamicObject serializes"))
    }

    async fn apply(&self, obj: &Value, opts: &ApplyOptions) -> Result<Value> {
        let (api, _gvk) = self.api_for_object(obj).await?;
        let name = name_of(obj)?;
        let dynamic: DynamicObject =
            serde_json::from_value(obj.clone()).map_err(|e| CoreError::UserInput(e.to_string()))?;

        let mut params = PatchParams::apply(&opts.manager);
        params.force = opts.force;

        debug!(%name, manager = %opts.manager, "apply");
        let result = retry_transient(MAX_ATTEMPTS, || async {
            api.patch(&name, &params, &Patch::Apply(&dynamic))
                .await
                .map_err(classify_kube_error)
        })
        .await?;
        Ok(serde_json::to_value(result).expect("DynamicObject serializes"))
    }

    async fn delete(&self, gvk: &GroupVersionKind, ns: Option<&str>, name: &str, opts: &DeleteOptions) -> Result<()> {
        let (ar, scope) = self.resolve(gvk).await?;
        let api = self.api_for(&ar, &scope, ns);
        let mut dp = DeleteParams::default();
        if let Some(secs) = opts.grace_period_seconds {
            dp.grace_period_seconds = Some(secs as u32);
        }
        if let Some(prop) = &opts.propagation {
            dp.propagation_policy = match prop.as_str() {
                "Orphan" => Some(kube::api::PropagationPolicy::Orphan),
                "Background" => Some(kube::api::PropagationPolicy::Background),
                _ => Some(kube::api::PropagationPolicy::Foreground),
            };
        }
        retry_transient(MAX_ATTEMPTS, || async {
            match api.delete(name, &dp).await {
                Ok(_) => Ok(()),
                Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
                Err(e) => Err(classify_kube_error(e)),
            }
        })
        .await
    }

    async fn remove_finalizers(&self, gvk: &GroupVersionKind, ns: Option<&str>, name: &str) -> Result<()> {
        let (ar, scope) = self.resolve(gvk).await?;
        let api = self.api_for(&ar, &scope, ns);

        let patch = serde_json::json!({
            "apiVersion": format!("{}/{}", gvk.group, gvk.version).trim_start_matches('/'),
            "kind": gvk.kind,
            "metadata": { "name": name, "finalizers": [] },
        });
        let dynamic: DynamicObject =
            serde_json::from_value(patch).map_err(|e| CoreError::UserInput(e.to_string()))?;

        let params = PatchParams::apply(crate::annotation::FORCE_DESTROY_FIELD_MANAGER).force();
        retry_transient(MAX_ATTEMPTS, || async {
            api.patch(name, &params, &Patch::Apply(&dynamic))
                .await
                .map(|_| ())
                .map_err(classify_kube_error)
        })
        .await
    }

    async fn invalidate_discovery(&self) {
        self.discovery_cache.write().await.clear();
    }
}

fn name_of(obj: &Value) -> Result<String> {
    obj.get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CoreError::UserInput("metadata.name is required".into()))
}

fn gvk_of(obj: &Value) -> Result<GroupVersionKind> {
    let api_version = obj
        .get("apiVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::UserInput("apiVersion is required".into()))?;
    let kind = obj
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::UserInput("kind is required".into()))?;
    let (group, version) = match api_version.rsplit_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), api_version.to_string()),
    };
    Ok(GroupVersionKind {
        group,
        version,
        kind: kind.to_string(),
    })
}

/// Thin wrapper the Coordinator uses instead of `Duration` literals, so the
/// classification in spec §9's timeout handling stays readable.
pub fn short_extension() -> Duration {
    Duration::from_secs(5)
}
