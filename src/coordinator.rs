//! Component G: the Lifecycle Coordinator (spec §4.G).
//!
//! Wires the lower components into the five operations a host engine drives
//! a managed resource through: Plan-Modify, Create, Read, Update, Delete.
//! Holds no state of its own — every method takes the `ManagedState` it
//! operates on and, where the operation mutates it, takes it by `&mut`.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use crate::annotation::{CREATED_AT_ANNOTATION, FIELD_MANAGER, OWNERSHIP_ANNOTATION};
use crate::classifier::{self, PathTransition, Warnings};
use crate::connection::ConnectionDescriptor;
use crate::error::{CoreError, Result};
use crate::gateway::{self, ApplyOptions, DeleteOptions, DeleteStall, Gateway};
use crate::manifest;
use crate::ownership::{self, Ownership};
use crate::path::{get_by_path, leaf_paths, Path};
use crate::projection::{self, Projection};
use crate::state::{generate_id, ManagedState, ResourceIdentity};

/// Outcome of a Plan-Modify cycle (spec §4.G).
pub struct PlanOutcome {
    pub projection: Projection,
    pub warnings: Warnings,
}

/// Outcome of a Read (spec §4.G): distinguishes "still there" from
/// "the live object is gone", which the host engine turns into a
/// remove-from-state signal rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Present,
    Gone,
}

pub struct Coordinator<G: Gateway> {
    gateway: Arc<G>,
}

impl<G: Gateway> Coordinator<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self { gateway }
    }

    /// Plan-Modify (spec §4.G): dry-run apply, decode the reply's ownership,
    /// compute the projection, classify every affected path, never hard-fail
    /// on a not-yet-reachable cluster.
    #[tracing::instrument(skip_all)]
    pub async fn plan(
        &self,
        prior: &ManagedState,
        desired_yaml: &str,
        desired_ignore_fields: &[String],
    ) -> Result<PlanOutcome> {
        if !prior.cluster_ref.is_ready() {
            // Bootstrap: connection fields are themselves unknown-after-apply.
            return Ok(PlanOutcome {
                projection: Projection::Unknown,
                warnings: Warnings::default(),
            });
        }

        let new_desired = manifest::parse(desired_yaml)?;
        let old_desired = manifest::parse(&prior.yaml_body)?;
        let identity = resource_identity(&new_desired)?;

        let mut to_apply = new_desired.clone();
        if let Some(id) = &prior.id {
            stamp_ownership_only(&mut to_apply, id);
        }

        let opts = ApplyOptions {
            manager: FIELD_MANAGER.into(),
            force: true,
        };
        let reply = match self.gateway.dry_run_apply(&to_apply, &opts).await {
            Ok(reply) => reply,
            Err(CoreError::TransientCluster(_)) | Err(CoreError::Cluster(_)) | Err(CoreError::DiscoveryMiss(_)) => {
                // The referenced cluster (or CRD) may simply not exist yet
                // this cycle — e.g. it is being created in the same
                // operation. Plan degrades to unknown rather than failing.
                warn!("dry-run apply unreachable this cycle, degrading plan to unknown");
                return Ok(PlanOutcome {
                    projection: Projection::Unknown,
                    warnings: Warnings::default(),
                });
            }
            Err(e) => return Err(e),
        };

        // The dry-run reply reflects our own force-applied value for every
        // field we assert — it cannot be used to detect an external writer's
        // change (spec Scenario 2). Fetch the live (pre-apply) object
        // separately for that comparison.
        let live = match self.get_live(&identity).await {
            Ok(obj) => obj,
            Err(CoreError::TransientCluster(_)) | Err(CoreError::Cluster(_)) | Err(CoreError::DiscoveryMiss(_)) => {
                warn!("live object unreachable this cycle, degrading plan to unknown");
                return Ok(PlanOutcome {
                    projection: Projection::Unknown,
                    warnings: Warnings::default(),
                });
            }
            Err(e) => return Err(e),
        };
        let live_for_drift = live.unwrap_or(Value::Null);

        // `prior.ignore_fields` was already validated by `parse_ignore_fields`
        // when it was written (by a prior plan/create/read/update); re-running
        // the leaf check against `old_desired` here would be redundant.
        let old_ignore: BTreeSet<Path> = prior.ignore_fields.iter().filter_map(|s| Path::parse(s)).collect();
        let new_ignore = manifest::parse_ignore_fields(&new_desired, desired_ignore_fields)?;
        let prev_owned = prev_owned_paths(prior);

        let entries = gateway::extract_ownership_entries(&reply);
        let decoded = ownership::decode(&entries, &reply, FIELD_MANAGER);

        let proj = projection::compute(&new_desired, &reply, &new_ignore, &prev_owned, &decoded.owned_by_us);

        let prior_projection_doc = concrete_projection_doc(&prior.managed_projection);

        let transitions = build_transitions(
            &prev_owned,
            &proj.projection_paths,
            &decoded,
            &old_desired,
            &new_desired,
            &old_ignore,
            &new_ignore,
            prior_projection_doc.as_ref(),
            &live_for_drift,
        );
        let warnings = classifier::run(&transitions);

        Ok(PlanOutcome {
            projection: Projection::Concrete(proj.canonical),
            warnings,
        })
    }

    /// Create (spec §4.G): adopt an absent-annotation object, refuse a
    /// foreign-id one, assign a fresh id, stamp ownership, apply with force.
    #[tracing::instrument(skip_all)]
    pub async fn create(&self, state: &mut ManagedState) -> Result<()> {
        if !state.cluster_ref.is_ready() {
            return Err(CoreError::NotReady);
        }

        let desired = manifest::parse(&state.yaml_body)?;
        let identity = resource_identity(&desired)?;

        if let Some(existing) = self.get_live(&identity).await? {
            if let Some(existing_id) = crate::annotation::extract_ownership_id(&existing) {
                return Err(CoreError::OwnershipConflict { existing_id });
            }
            info!(%identity, "adopting pre-existing unmanaged object on create");
        }

        let id = generate_id();
        let mut to_apply = desired.clone();
        stamp_annotations(&mut to_apply, &id, &now_rfc3339());

        let opts = ApplyOptions {
            manager: FIELD_MANAGER.into(),
            force: true,
        };
        let applied = self.gateway.apply(&to_apply, &opts).await?;

        let ignore_paths = manifest::parse_ignore_fields(&desired, &state.ignore_fields)?;
        let entries = gateway::extract_ownership_entries(&applied);
        let decoded = ownership::decode(&entries, &applied, FIELD_MANAGER);
        let proj = projection::compute(&desired, &applied, &ignore_paths, &BTreeSet::new(), &decoded.owned_by_us);

        state.id = Some(id);
        state.field_ownership = owned_by_us_field_ownership(&decoded);
        state.managed_projection = Projection::Concrete(proj.canonical);
        Ok(())
    }

    /// Read (spec §4.G): re-fetch the live object, recompute ownership and
    /// projection, surface `Gone` instead of an error when the object has
    /// disappeared.
    #[tracing::instrument(skip_all)]
    pub async fn read(&self, state: &mut ManagedState) -> Result<ReadOutcome> {
        let desired = manifest::parse(&state.yaml_body)?;
        let identity = resource_identity(&desired)?;

        let Some(live) = self.get_live(&identity).await? else {
            return Ok(ReadOutcome::Gone);
        };

        if let Some(found_id) = crate::annotation::extract_ownership_id(&live) {
            if Some(&found_id) != state.id.as_ref() {
                return Err(CoreError::OwnershipConflict { existing_id: found_id });
            }
        }

        let ignore_paths = manifest::parse_ignore_fields(&desired, &state.ignore_fields)?;
        let prev_owned = prev_owned_paths(state);
        let entries = gateway::extract_ownership_entries(&live);
        let decoded = ownership::decode(&entries, &live, FIELD_MANAGER);
        let proj = projection::compute(&desired, &live, &ignore_paths, &prev_owned, &decoded.owned_by_us);

        state.field_ownership = owned_by_us_field_ownership(&decoded);
        state.managed_projection = Projection::Concrete(proj.canonical);
        Ok(ReadOutcome::Present)
    }

    /// Update (spec §4.G): reject a move to a non-equivalent cluster, verify
    /// ownership is still ours, apply the new manifest with force, classify
    /// every path transition against the prior cycle's projection.
    #[tracing::instrument(skip_all)]
    pub async fn update(
        &self,
        state: &mut ManagedState,
        new_cluster_ref: Option<ConnectionDescriptor>,
        new_yaml_body: String,
        new_ignore_fields: Vec<String>,
    ) -> Result<Warnings> {
        let id = state
            .id
            .clone()
            .ok_or_else(|| CoreError::UserInput("cannot update a resource with no assigned id".into()))?;

        if let Some(new_ref) = &new_cluster_ref {
            if new_ref.identity_hash() != state.cluster_ref.identity_hash() {
                return Err(CoreError::UserInput(
                    "cannot move a managed resource to a different cluster; destroy and recreate instead".into(),
                ));
            }
            state.cluster_ref = new_ref.clone();
        }
        if !state.cluster_ref.is_ready() {
            return Err(CoreError::NotReady);
        }

        let old_desired = manifest::parse(&state.yaml_body)?;
        let new_desired = manifest::parse(&new_yaml_body)?;
        let identity = resource_identity(&new_desired)?;

        let existing = self.get_live(&identity).await?;
        if let Some(existing) = &existing {
            if let Some(found_id) = crate::annotation::extract_ownership_id(existing) {
                if found_id != id {
                    return Err(CoreError::OwnershipConflict { existing_id: found_id });
                }
            }
        }
        // The live object as it stood just before this apply — used to
        // detect external drift (spec Scenario 2). The post-apply reply
        // below reflects our own force-applied value and cannot be used for
        // that comparison.
        let live_before_apply = existing.unwrap_or(Value::Null);

        // `state.ignore_fields` was already validated when it was written;
        // only the incoming `new_ignore_fields` is fresh user input.
        let old_ignore: BTreeSet<Path> = state.ignore_fields.iter().filter_map(|s| Path::parse(s)).collect();
        let new_ignore = manifest::parse_ignore_fields(&new_desired, &new_ignore_fields)?;
        let prev_owned = prev_owned_paths(state);

        let mut to_apply = new_desired.clone();
        stamp_ownership_only(&mut to_apply, &id);

        let opts = ApplyOptions {
            manager: FIELD_MANAGER.into(),
            force: true,
        };
        let reply = self.gateway.apply(&to_apply, &opts).await?;

        let entries = gateway::extract_ownership_entries(&reply);
        let decoded = ownership::decode(&entries, &reply, FIELD_MANAGER);
        let proj = projection::compute(&new_desired, &reply, &new_ignore, &prev_owned, &decoded.owned_by_us);

        let prior_projection_doc = concrete_projection_doc(&state.managed_projection);
        let transitions = build_transitions(
            &prev_owned,
            &proj.projection_paths,
            &decoded,
            &old_desired,
            &new_desired,
            &old_ignore,
            &new_ignore,
            prior_projection_doc.as_ref(),
            &live_before_apply,
        );
        let warnings = classifier::run(&transitions);

        state.yaml_body = new_yaml_body;
        state.ignore_fields = new_ignore_fields;
        state.field_ownership = owned_by_us_field_ownership(&decoded);
        state.managed_projection = Projection::Concrete(proj.canonical);
        Ok(warnings)
    }

    /// Delete (spec §4.G, §9 "Supplemented features"): short-circuits on
    /// `delete_protection` with no cluster call at all, polls until the
    /// object disappears or `delete_timeout` elapses, and applies
    /// force-destroy's finalizer strip with one short extension before
    /// giving up. `cancel` resolves when the caller wants polling aborted.
    #[tracing::instrument(skip_all)]
    pub async fn delete<C>(&self, state: &ManagedState, poll_interval: Duration, cancel: C) -> Result<()>
    where
        C: Future<Output = ()>,
    {
        if state.delete_protection {
            return Err(CoreError::UserInput(
                "delete_protection is enabled; refusing to delete".into(),
            ));
        }

        let desired = manifest::parse(&state.yaml_body)?;
        let identity = resource_identity(&desired)?;

        self.gateway
            .delete(&identity.gvk, identity.namespace.as_deref(), &identity.name, &DeleteOptions::default())
            .await?;

        let mut deadline = tokio::time::Instant::now() + state.delete_timeout;
        let mut extended = false;

        tokio::pin!(cancel);
        loop {
            tokio::select! {
                _ = &mut cancel => return Err(CoreError::Cancelled),
                _ = tokio::time::sleep(poll_interval) => {}
            }

            match self.get_live(&identity).await? {
                None => return Ok(()),
                Some(obj) => {
                    if tokio::time::Instant::now() < deadline {
                        continue;
                    }
                    if state.force_destroy && !extended {
                        warn!(%identity, "delete_timeout reached, force-destroying by stripping finalizers");
                        self.gateway
                            .remove_finalizers(&identity.gvk, identity.namespace.as_deref(), &identity.name)
                            .await?;
                        deadline = tokio::time::Instant::now() + gateway::short_extension();
                        extended = true;
                        continue;
                    }
                    let stall = if has_finalizers(&obj) {
                        DeleteStall::FinalizerBlocked
                    } else {
                        DeleteStall::StuckWithoutFinalizers
                    };
                    return Err(CoreError::DeleteStuck(stall));
                }
            }
        }
    }

    async fn get_live(&self, identity: &ResourceIdentity) -> Result<Option<Value>> {
        self.gateway
            .get(&identity.gvk, identity.namespace.as_deref(), &identity.name)
            .await
    }
}

fn prev_owned_paths(state: &ManagedState) -> BTreeSet<Path> {
    state.field_ownership.keys().filter_map(|s| Path::parse(s)).collect()
}

/// `field_ownership` (spec §3) tracks only the paths *we* own, not every
/// manager in `path_owner` — I2 requires every `field_ownership` path to
/// also be a leaf path of `managed_projection`, which the all-managers map
/// violates for foreign-only fields. The foreign manager name for warnings
/// still comes from the fresh `decoded.path_owner` in `build_transitions`.
pub(crate) fn owned_by_us_field_ownership(decoded: &Ownership) -> std::collections::BTreeMap<String, String> {
    decoded
        .owned_by_us
        .iter()
        .map(|p| (p.to_string(), FIELD_MANAGER.to_string()))
        .collect()
}

fn concrete_projection_doc(projection: &Projection) -> Option<Value> {
    match projection {
        Projection::Concrete(json) => serde_json::from_str(json).ok(),
        Projection::Unknown => None,
    }
}

#[allow(clippy::too_many_arguments)]
fn build_transitions(
    prev_owned: &BTreeSet<Path>,
    now_owned: &BTreeSet<Path>,
    decoded: &Ownership,
    old_desired: &Value,
    new_desired: &Value,
    old_ignore: &BTreeSet<Path>,
    new_ignore: &BTreeSet<Path>,
    prior_projection_doc: Option<&Value>,
    live: &Value,
) -> Vec<PathTransition> {
    let asserted_old: BTreeSet<Path> = leaf_paths(old_desired).into_iter().collect();
    let asserted_new: BTreeSet<Path> = leaf_paths(new_desired).into_iter().collect();

    let mut universe: BTreeSet<Path> = BTreeSet::new();
    universe.extend(prev_owned.iter().cloned());
    universe.extend(now_owned.iter().cloned());
    universe.extend(decoded.path_owner.keys().cloned());
    universe.extend(asserted_old.iter().cloned());
    universe.extend(asserted_new.iter().cloned());

    universe
        .into_iter()
        .map(|path| {
            let value_changed = get_by_path(old_desired, &path).0 != get_by_path(new_desired, &path).0;
            let ignore_changed = old_ignore.contains(&path) != new_ignore.contains(&path);
            let external_changed = match prior_projection_doc {
                Some(prior_doc) => get_by_path(prior_doc, &path).0 != get_by_path(live, &path).0,
                None => false,
            };
            let foreign_manager = decoded
                .path_owner
                .get(&path)
                .filter(|m| m.as_str() != FIELD_MANAGER)
                .cloned();
            PathTransition {
                prev_owned: prev_owned.contains(&path),
                now_owned: now_owned.contains(&path),
                config_changed: value_changed || ignore_changed,
                external_changed,
                foreign_manager,
                path,
            }
        })
        .collect()
}

/// Build the `(GVK, namespace, name)` identity a manifest describes.
fn resource_identity(doc: &Value) -> Result<ResourceIdentity> {
    let api_version = doc
        .get("apiVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::UserInput("apiVersion is required".into()))?;
    let kind = doc
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::UserInput("kind is required".into()))?;
    let name = doc
        .get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::UserInput("metadata.name is required".into()))?;
    let namespace = doc
        .get("metadata")
        .and_then(|m| m.get("namespace"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let (group, version) = match api_version.rsplit_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), api_version.to_string()),
    };

    Ok(ResourceIdentity {
        gvk: kube::core::GroupVersionKind {
            group,
            version,
            kind: kind.to_string(),
        },
        namespace,
        name: name.to_string(),
    })
}

fn has_finalizers(obj: &Value) -> bool {
    obj.get("metadata")
        .and_then(|m| m.get("finalizers"))
        .and_then(Value::as_array)
        .map(|a| !a.is_empty())
        .unwrap_or(false)
}

fn annotations_map(doc: &mut Value) -> &mut serde_json::Map<String, Value> {
    if doc.get("metadata").is_none() {
        doc["metadata"] = Value::Object(serde_json::Map::new());
    }
    let metadata = doc.get_mut("metadata").expect("just inserted");
    if metadata.get("annotations").is_none_or(|a| !a.is_object()) {
        metadata["annotations"] = Value::Object(serde_json::Map::new());
    }
    metadata
        .get_mut("annotations")
        .and_then(Value::as_object_mut)
        .expect("just ensured object")
}

fn stamp_ownership_only(doc: &mut Value, id: &str) {
    let annotations = annotations_map(doc);
    annotations.insert(OWNERSHIP_ANNOTATION.to_string(), Value::String(id.to_string()));
}

fn stamp_annotations(doc: &mut Value, id: &str, created_at: &str) {
    let annotations = annotations_map(doc);
    annotations.insert(OWNERSHIP_ANNOTATION.to_string(), Value::String(id.to_string()));
    annotations.insert(CREATED_AT_ANNOTATION.to_string(), Value::String(created_at.to_string()));
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Credentials;
    use crate::gateway::DeleteOptions as GwDeleteOptions;
    use async_trait::async_trait;
    use kube::core::GroupVersionKind;
    use kube::discovery::{ApiCapabilities, ApiResource, Scope};
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// An in-memory `Gateway` stub so the Coordinator's branching can be
    /// exercised with no real cluster (spec §9 "No hidden global state").
    #[derive(Default)]
    struct StubGateway {
        objects: Mutex<std::collections::HashMap<(String, Option<String>, String), Value>>,
    }

    fn key_for(gvk: &GroupVersionKind, ns: Option<&str>, name: &str) -> (String, Option<String>, String) {
        (format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind), ns.map(str::to_string), name.to_string())
    }

    #[async_trait]
    impl Gateway for StubGateway {
        async fn resolve(&self, _gvk: &GroupVersionKind) -> Result<(ApiResource, Scope)> {
            let ar = ApiResource {
                group: String::new(),
                version: "v1".into(),
                api_version: "v1".into(),
                kind: "ConfigMap".into(),
                plural: "configmaps".into(),
            };
            Ok((ar, Scope::Namespaced))
        }

        async fn get(&self, gvk: &GroupVersionKind, ns: Option<&str>, name: &str) -> Result<Option<Value>> {
            Ok(self.objects.lock().unwrap().get(&key_for(gvk, ns, name)).cloned())
        }

        async fn dry_run_apply(&self, obj: &Value, _opts: &ApplyOptions) -> Result<Value> {
            Ok(obj.clone())
        }

        async fn apply(&self, obj: &Value, _opts: &ApplyOptions) -> Result<Value> {
            let gvk = test_gvk();
            let ns = obj.get("metadata").and_then(|m| m.get("namespace")).and_then(Value::as_str);
            let name = obj.get("metadata").and_then(|m| m.get("name")).and_then(Value::as_str).unwrap();
            self.objects
                .lock()
                .unwrap()
                .insert(key_for(&gvk, ns, name), obj.clone());
            Ok(obj.clone())
        }

        async fn delete(&self, gvk: &GroupVersionKind, ns: Option<&str>, name: &str, _opts: &GwDeleteOptions) -> Result<()> {
            self.objects.lock().unwrap().remove(&key_for(gvk, ns, name));
            Ok(())
        }

        async fn remove_finalizers(&self, _gvk: &GroupVersionKind, _ns: Option<&str>, _name: &str) -> Result<()> {
            Ok(())
        }

        async fn invalidate_discovery(&self) {}
    }

    fn test_gvk() -> GroupVersionKind {
        GroupVersionKind {
            group: String::new(),
            version: "v1".into(),
            kind: "ConfigMap".into(),
        }
    }

    fn test_cluster_ref() -> ConnectionDescriptor {
        ConnectionDescriptor::Inline {
            host: "https://cluster.example.com".into(),
            cluster_ca_certificate: None,
            insecure: true,
            credentials: Credentials::Token("t".into()),
        }
    }

    fn yaml_for(name: &str, value: &str) -> String {
        format!("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {name}\ndata:\n  k1: {value}\n")
    }

    #[tokio::test]
    async fn create_assigns_id_and_stamps_ownership_annotation() {
        let gateway = Arc::new(StubGateway::default());
        let coordinator = Coordinator::new(gateway);
        let mut state = ManagedState::new(yaml_for("c1", "v1"), test_cluster_ref());

        coordinator.create(&mut state).await.unwrap();

        assert!(state.id.is_some());
        assert!(!state.managed_projection.is_unknown());
        assert!(state.owns_any_field());
    }

    #[tokio::test]
    async fn create_refuses_object_already_carrying_a_foreign_id() {
        let gateway = Arc::new(StubGateway::default());
        let gvk = test_gvk();
        gateway.objects.lock().unwrap().insert(
            key_for(&gvk, None, "c1"),
            json!({
                "apiVersion": "v1", "kind": "ConfigMap",
                "metadata": {"name": "c1", "annotations": {OWNERSHIP_ANNOTATION: "deadbeefcafe"}},
            }),
        );
        let coordinator = Coordinator::new(gateway);
        let mut state = ManagedState::new(yaml_for("c1", "v1"), test_cluster_ref());

        let err = coordinator.create(&mut state).await.unwrap_err();
        assert!(matches!(err, CoreError::OwnershipConflict { .. }));
    }

    #[tokio::test]
    async fn plan_degrades_to_unknown_before_connection_is_ready() {
        let gateway = Arc::new(StubGateway::default());
        let coordinator = Coordinator::new(gateway);
        let not_ready = ConnectionDescriptor::Inline {
            host: String::new(),
            cluster_ca_certificate: None,
            insecure: false,
            credentials: Credentials::Token(String::new()),
        };
        let state = ManagedState::new(yaml_for("c1", "v1"), not_ready);

        let outcome = coordinator.plan(&state, &state.yaml_body.clone(), &[]).await.unwrap();
        assert!(outcome.projection.is_unknown());
        assert!(outcome.warnings.is_empty());
    }

    #[tokio::test]
    async fn update_rejects_a_move_to_a_non_equivalent_cluster() {
        let gateway = Arc::new(StubGateway::default());
        let coordinator = Coordinator::new(gateway);
        let mut state = ManagedState::new(yaml_for("c1", "v1"), test_cluster_ref());
        coordinator.create(&mut state).await.unwrap();

        let other_cluster = ConnectionDescriptor::Inline {
            host: "https://other-cluster.example.com".into(),
            cluster_ca_certificate: None,
            insecure: true,
            credentials: Credentials::Token("t".into()),
        };
        let err = coordinator
            .update(&mut state, Some(other_cluster), yaml_for("c1", "v2"), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::UserInput(_)));
    }

    #[tokio::test]
    async fn update_accepts_an_equivalent_re_specification_of_the_same_cluster() {
        let gateway = Arc::new(StubGateway::default());
        let coordinator = Coordinator::new(gateway);
        let mut state = ManagedState::new(yaml_for("c1", "v1"), test_cluster_ref());
        coordinator.create(&mut state).await.unwrap();

        let rotated = ConnectionDescriptor::Inline {
            host: "https://cluster.example.com".into(),
            cluster_ca_certificate: None,
            insecure: true,
            credentials: Credentials::Token("rotated-token".into()),
        };
        let id_before_update = state.id.clone();
        let warnings = coordinator
            .update(&mut state, Some(rotated), yaml_for("c1", "v2"), vec![])
            .await
            .unwrap();
        assert!(warnings.is_empty());
        // P7: id is preserved across an equivalent re-specification of the
        // same cluster.
        assert_eq!(state.id, id_before_update);
    }

    #[tokio::test]
    async fn delete_protection_short_circuits_with_no_cluster_call() {
        let gateway = Arc::new(StubGateway::default());
        let coordinator = Coordinator::new(gateway);
        let mut state = ManagedState::new(yaml_for("c1", "v1"), test_cluster_ref());
        coordinator.create(&mut state).await.unwrap();
        state.delete_protection = true;

        let notify = Arc::new(Notify::new());
        let err = coordinator
            .delete(&state, Duration::from_millis(1), notify.notified())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::UserInput(_)));
        // The object must still be present: no delete call was ever issued.
        assert!(coordinator.get_live(&resource_identity(&manifest::parse(&state.yaml_body).unwrap()).unwrap()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_completes_once_the_object_disappears() {
        let gateway = Arc::new(StubGateway::default());
        let coordinator = Coordinator::new(gateway);
        let mut state = ManagedState::new(yaml_for("c1", "v1"), test_cluster_ref());
        coordinator.create(&mut state).await.unwrap();
        state.delete_timeout = Duration::from_secs(5);

        let notify = Arc::new(Notify::new());
        coordinator
            .delete(&state, Duration::from_millis(1), notify.notified())
            .await
            .unwrap();
    }

    /// P6: applying the same manifest twice produces identical
    /// `managed_projection` and `field_ownership`.
    #[tokio::test]
    async fn applying_the_same_manifest_twice_is_idempotent() {
        let gateway = Arc::new(StubGateway::default());
        let coordinator = Coordinator::new(gateway);
        let mut state = ManagedState::new(yaml_for("c1", "v1"), test_cluster_ref());
        coordinator.create(&mut state).await.unwrap();

        let projection_after_create = state.managed_projection.clone();
        let ownership_after_create = state.field_ownership.clone();

        coordinator
            .update(&mut state, None, yaml_for("c1", "v1"), vec![])
            .await
            .unwrap();

        assert_eq!(state.managed_projection, projection_after_create);
        assert_eq!(state.field_ownership, ownership_after_create);
    }

    /// I2 / Scenario 3 (Taking): `field_ownership` must only ever contain
    /// paths this manager owns, never a foreign manager's, even though
    /// `Ownership::path_owner` reports both.
    #[test]
    fn owned_by_us_field_ownership_excludes_foreign_owned_paths() {
        let mut decoded = Ownership::default();
        decoded.path_owner.insert(Path::parse("spec.replicas").unwrap(), "autoscaler".to_string());
        decoded.path_owner.insert(Path::parse("data.k1").unwrap(), FIELD_MANAGER.to_string());
        decoded.owned_by_us.insert(Path::parse("data.k1").unwrap());

        let field_ownership = owned_by_us_field_ownership(&decoded);

        assert_eq!(field_ownership.len(), 1);
        assert_eq!(field_ownership.get("data.k1"), Some(&FIELD_MANAGER.to_string()));
        assert!(!field_ownership.contains_key("spec.replicas"));
    }

    /// Scenario 2 (Drift): an external writer's change to an asserted field
    /// must be detected against the live object, not against the dry-run
    /// reply (which only ever reflects our own force-applied value).
    #[tokio::test]
    async fn plan_detects_drift_from_the_live_object_not_the_dry_run_reply() {
        let gateway = Arc::new(StubGateway::default());
        let gvk = test_gvk();
        gateway.objects.lock().unwrap().insert(
            key_for(&gvk, None, "c1"),
            json!({
                "apiVersion": "v1", "kind": "ConfigMap",
                "metadata": {"name": "c1"},
                "data": {"k1": "changed-out-of-band"},
            }),
        );
        let coordinator = Coordinator::new(gateway);

        let yaml = yaml_for("c1", "v1");
        let mut state = ManagedState::new(yaml.clone(), test_cluster_ref());
        state.field_ownership = [("data.k1".to_string(), FIELD_MANAGER.to_string())].into_iter().collect();
        state.managed_projection = Projection::Concrete(
            json!({
                "apiVersion": "v1", "kind": "ConfigMap",
                "metadata": {"name": "c1"}, "data": {"k1": "v1"},
            })
            .to_string(),
        );

        let outcome = coordinator.plan(&state, &yaml, &[]).await.unwrap();

        assert!(!outcome.warnings.drift.is_empty());
        assert!(outcome.warnings.drift.iter().any(|w| w.path == Path::parse("data.k1").unwrap()));
    }

    #[tokio::test]
    async fn read_reports_gone_once_the_object_is_deleted_out_of_band() {
        let gateway = Arc::new(StubGateway::default());
        let coordinator = Coordinator::new(gateway.clone());
        let mut state = ManagedState::new(yaml_for("c1", "v1"), test_cluster_ref());
        coordinator.create(&mut state).await.unwrap();

        gateway.objects.lock().unwrap().clear();
        let outcome = coordinator.read(&mut state).await.unwrap();
        assert_eq!(outcome, ReadOutcome::Gone);
    }
}
