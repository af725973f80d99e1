//! Connection descriptor and the cluster-client cache (spec §5, §6).

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::error::{CoreError, Result};

/// One of `exec`'s three arg shapes (spec §6 inline mode).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecConfig {
    pub api_version: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// The credential half of an `inline` connection. Exactly one variant is
/// carried at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Token(String),
    ClientCert { certificate: String, key: String },
    Exec(ExecConfig),
}

/// A discriminated connection descriptor; exactly one mode is active
/// (spec §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionDescriptor {
    Inline {
        host: String,
        cluster_ca_certificate: Option<String>,
        insecure: bool,
        credentials: Credentials,
    },
    KubeconfigFile {
        path: String,
        context: Option<String>,
    },
    KubeconfigRaw {
        content: String,
        context: Option<String>,
    },
}

impl ConnectionDescriptor {
    /// True when every field needed to actually dial the cluster is a
    /// concrete value rather than a host-engine "unknown after apply"
    /// placeholder. The core doesn't know the host engine's unknown
    /// sentinel, so the caller resolves placeholders before constructing a
    /// descriptor; `is_ready` exists as the single place that decision is
    /// asserted once concrete.
    pub fn is_ready(&self) -> bool {
        match self {
            ConnectionDescriptor::Inline { host, .. } => !host.is_empty(),
            ConnectionDescriptor::KubeconfigFile { path, .. } => !path.is_empty(),
            ConnectionDescriptor::KubeconfigRaw { content, .. } => !content.is_empty(),
        }
    }

    /// Hash `host + cluster_ca_certificate + context` — NOT raw kubeconfig
    /// text, tokens, or exec-plugin arguments. Two descriptors that name
    /// the same cluster via different-but-equivalent re-specifications
    /// (e.g. a rotated token, a different context file on disk naming the
    /// same server) hash identically (spec §4.G Update, P7).
    pub fn identity_hash(&self) -> String {
        let mut hasher = Sha256::new();
        match self {
            ConnectionDescriptor::Inline {
                host,
                cluster_ca_certificate,
                ..
            } => {
                hasher.update(b"inline\0");
                hasher.update(host.as_bytes());
                hasher.update(b"\0");
                hasher.update(cluster_ca_certificate.as_deref().unwrap_or("").as_bytes());
            }
            ConnectionDescriptor::KubeconfigFile { context, .. }
            | ConnectionDescriptor::KubeconfigRaw { context, .. } => {
                // We can't know host/CA without parsing the kubeconfig; the
                // cache key instead becomes effective once the client is
                // built (see `ClientCache::get_or_build`), which re-derives
                // the identity hash from the *resolved* cluster info.
                hasher.update(b"kubeconfig\0");
                hasher.update(context.as_deref().unwrap_or("").as_bytes());
            }
        }
        format!("{:x}", hasher.finalize())
    }

    /// Cache key used for the effective-connection client cache (spec §5).
    /// Distinct from `identity_hash`: this one *does* distinguish a token
    /// change from a client-cert change, because those need different
    /// `kube::Client`s even though they name the same cluster.
    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        match self {
            ConnectionDescriptor::Inline {
                host,
                cluster_ca_certificate,
                insecure,
                credentials,
            } => {
                hasher.update(b"inline\0");
                hasher.update(host.as_bytes());
                hasher.update(cluster_ca_certificate.as_deref().unwrap_or("").as_bytes());
                hasher.update([*insecure as u8]);
                match credentials {
                    Credentials::Token(t) => {
                        hasher.update(b"token\0");
                        hasher.update(t.as_bytes());
                    }
                    Credentials::ClientCert { certificate, key } => {
                        hasher.update(b"cert\0");
                        hasher.update(certificate.as_bytes());
                        hasher.update(key.as_bytes());
                    }
                    Credentials::Exec(e) => {
                        hasher.update(b"exec\0");
                        hasher.update(e.api_version.as_bytes());
                        hasher.update(e.command.as_bytes());
                        for a in &e.args {
                            hasher.update(a.as_bytes());
                        }
                    }
                }
            }
            ConnectionDescriptor::KubeconfigFile { path, context } => {
                hasher.update(b"kubeconfig_file\0");
                hasher.update(path.as_bytes());
                hasher.update(context.as_deref().unwrap_or("").as_bytes());
            }
            ConnectionDescriptor::KubeconfigRaw { content, context } => {
                hasher.update(b"kubeconfig_raw\0");
                hasher.update(content.as_bytes());
                hasher.update(context.as_deref().unwrap_or("").as_bytes());
            }
        }
        format!("{:x}", hasher.finalize())
    }

    /// Build the `kube::Client` this descriptor describes.
    pub async fn build_client(&self) -> Result<kube::Client> {
        let config = match self {
            ConnectionDescriptor::Inline {
                host,
                cluster_ca_certificate,
                insecure,
                credentials,
            } => build_inline_config(host, cluster_ca_certificate.as_deref(), *insecure, credentials).await?,
            ConnectionDescriptor::KubeconfigFile { path, context } => {
                let kubeconfig = kube::config::Kubeconfig::read_from(path).map_err(|e| {
                    CoreError::UserInput(format!("failed to read kubeconfig at {path}: {e}"))
                })?;
                let options = kube::config::KubeConfigOptions {
                    context: context.clone(),
                    ..Default::default()
                };
                kube::Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .map_err(|e| CoreError::UserInput(format!("invalid kubeconfig: {e}")))?
            }
            ConnectionDescriptor::KubeconfigRaw { content, context } => {
                let kubeconfig = kube::config::Kubeconfig::from_yaml(content).map_err(|e| {
                    CoreError::UserInput(format!("failed to parse kubeconfig content: {e}"))
                })?;
                let options = kube::config::KubeConfigOptions {
                    context: context.clone(),
                    ..Default::default()
                };
                kube::Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .map_err(|e| CoreError::UserInput(format!("invalid kubeconfig: {e}")))?
            }
        };

        kube::Client::try_from(config).map_err(CoreError::Cluster)
    }
}

async fn build_inline_config(
    host: &str,
    cluster_ca_certificate: Option<&str>,
    insecure: bool,
    credentials: &Credentials,
) -> Result<kube::Config> {
    use kube::config::{AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext};

    use base64::Engine;

    let ca_data = cluster_ca_certificate
        .map(|b64| {
            base64::engine::general_purpose::STANDARD
                .decode(b64)
                .map_err(|e| CoreError::UserInput(format!("cluster_ca_certificate is not valid base64: {e}")))
        })
        .transpose()?;

    let auth_info = match credentials {
        Credentials::Token(token) => AuthInfo {
            token: Some(token.clone().into()),
            ..Default::default()
        },
        Credentials::ClientCert { certificate, key } => AuthInfo {
            client_certificate_data: Some(certificate.clone()),
            client_key_data: Some(key.clone().into()),
            ..Default::default()
        },
        Credentials::Exec(exec) => AuthInfo {
            exec: Some(kube::config::ExecConfig {
                api_version: Some(exec.api_version.clone()),
                command: Some(exec.command.clone()),
                args: Some(exec.args.clone()),
                env: if exec.env.is_empty() {
                    None
                } else {
                    Some(
                        exec.env
                            .iter()
                            .map(|(k, v)| kube::config::ExecEnvVar {
                                name: k.clone(),
                                value: v.clone(),
                            })
                            .collect(),
                    )
                },
                ..Default::default()
            }),
            ..Default::default()
        },
    };

    let kubeconfig = Kubeconfig {
        clusters: vec![NamedCluster {
            name: "k8sconnect".into(),
            cluster: Some(Cluster {
                server: Some(host.to_string()),
                certificate_authority_data: ca_data.map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes)),
                insecure_skip_tls_verify: Some(insecure),
                ..Default::default()
            }),
        }],
        auth_infos: vec![NamedAuthInfo {
            name: "k8sconnect".into(),
            auth_info: Some(auth_info),
        }],
        contexts: vec![NamedContext {
            name: "k8sconnect".into(),
            context: Some(Context {
                cluster: "k8sconnect".into(),
                user: "k8sconnect".into(),
                ..Default::default()
            }),
        }],
        current_context: Some("k8sconnect".into()),
        ..Default::default()
    };

    kube::Config::from_custom_kubeconfig(kubeconfig, &Default::default())
        .await
        .map_err(|e| CoreError::UserInput(format!("invalid inline connection: {e}")))
}

/// Cluster client cache, keyed by `ConnectionDescriptor::cache_key()`
/// (spec §5): readers check the cache under a shared lock; on miss, the
/// writer path acquires exclusively and double-checks before inserting.
#[derive(Default)]
pub struct ClientCache {
    clients: RwLock<HashMap<String, kube::Client>>,
}

impl ClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_build(&self, descriptor: &ConnectionDescriptor) -> Result<kube::Client> {
        let key = descriptor.cache_key();

        if let Some(client) = self.clients.read().await.get(&key) {
            return Ok(client.clone());
        }

        let mut guard = self.clients.write().await;
        if let Some(client) = guard.get(&key) {
            return Ok(client.clone());
        }

        let client = descriptor.build_client().await?;
        guard.insert(key, client.clone());
        Ok(client)
    }
}

pub type SharedClientCache = Arc<ClientCache>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_hash_ignores_token_rotation() {
        let a = ConnectionDescriptor::Inline {
            host: "https://cluster.example.com".into(),
            cluster_ca_certificate: Some("Y2E=".into()),
            insecure: false,
            credentials: Credentials::Token("token-a".into()),
        };
        let b = ConnectionDescriptor::Inline {
            host: "https://cluster.example.com".into(),
            cluster_ca_certificate: Some("Y2E=".into()),
            insecure: false,
            credentials: Credentials::Token("token-b-after-rotation".into()),
        };
        assert_eq!(a.identity_hash(), b.identity_hash());
        // But the client cache key *does* differ, since a different token
        // needs a different authenticated client.
        assert_ne!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn identity_hash_differs_across_hosts() {
        let a = ConnectionDescriptor::Inline {
            host: "https://cluster-a.example.com".into(),
            cluster_ca_certificate: None,
            insecure: true,
            credentials: Credentials::Token("t".into()),
        };
        let b = ConnectionDescriptor::Inline {
            host: "https://cluster-b.example.com".into(),
            cluster_ca_certificate: None,
            insecure: true,
            credentials: Credentials::Token("t".into()),
        };
        assert_ne!(a.identity_hash(), b.identity_hash());
    }

    #[test]
    fn is_ready_false_on_empty_placeholder_host() {
        let descriptor = ConnectionDescriptor::Inline {
            host: String::new(),
            cluster_ca_certificate: None,
            insecure: false,
            credentials: Credentials::Token("t".into()),
        };
        assert!(!descriptor.is_ready());
    }
}
