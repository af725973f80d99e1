//! Small driver exercising the Coordinator against whatever cluster the
//! ambient kubeconfig points at. Not part of the library's public surface;
//! a worked example for anyone embedding the crate, mirroring the shape a
//! host provider's own engine drives.

use std::sync::Arc;
use std::time::Duration;

use k8sconnect_core::connection::ConnectionDescriptor;
use k8sconnect_core::coordinator::Coordinator;
use k8sconnect_core::gateway::KubeGateway;
use k8sconnect_core::state::ManagedState;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let client = kube::Client::try_default().await?;
    let gateway = Arc::new(KubeGateway::new(client));
    let coordinator = Coordinator::new(gateway);

    let cluster_ref = ConnectionDescriptor::KubeconfigFile {
        path: std::env::var("KUBECONFIG").unwrap_or_else(|_| "~/.kube/config".into()),
        context: None,
    };
    // `cluster_ref` here only records what ManagedState thinks it's pointed
    // at; the Coordinator itself talks to whatever cluster `KubeGateway` was
    // built against.
    let manifest = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: k8sconnect-demo
  namespace: default
data:
  greeting: "hello from k8sconnect-core"
"#;

    let mut state = ManagedState::new(manifest.to_string(), cluster_ref);

    info!("creating demo ConfigMap");
    coordinator.create(&mut state).await?;
    info!(id = ?state.id, "created");

    info!("planning a no-op update");
    let plan = coordinator.plan(&state, &state.yaml_body, &state.ignore_fields).await?;
    if plan.warnings.is_empty() {
        info!("plan: no conflicts");
    } else {
        for w in plan.warnings.render_all("ConfigMap/default/k8sconnect-demo") {
            info!("{w}");
        }
    }

    info!("deleting demo ConfigMap");
    let (_notify_tx, notify_rx) = tokio::sync::oneshot::channel::<()>();
    let cancel = async move {
        let _ = notify_rx.await;
    };
    coordinator.delete(&state, Duration::from_secs(2), cancel).await?;
    info!("deleted");

    Ok(())
}
