//! Typed error taxonomy for the core (spec §7).
//!
//! Lower components return these variants; the Lifecycle Coordinator decides
//! what becomes user-visible, what degrades to "unknown", and what gets
//! retried.

use thiserror::Error;

use crate::gateway::DeleteStall;

/// The error type threaded through every fallible operation in the core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed manifest, invalid connection descriptor, incompatible flags,
    /// `ignore_fields` referencing a non-leaf path. Never retried.
    #[error("invalid input: {0}")]
    UserInput(String),

    /// Connection fields are not yet known (bootstrap). Not a failure; the
    /// Coordinator turns this into an "unknown" projection rather than
    /// surfacing it as an error to the host engine.
    #[error("connection not ready")]
    NotReady,

    /// The GVK is not yet served by the cluster discovery document.
    #[error("resource type not found in discovery: {0}")]
    DiscoveryMiss(String),

    /// 429 / 5xx / connection reset. Retried with backoff; surfaced only if
    /// attempts are exhausted.
    #[error("transient cluster error: {0}")]
    TransientCluster(String),

    /// 401 / 403. Surfaced immediately, never retried.
    #[error("authentication/authorization error: {0}")]
    Auth(String),

    /// The live object carries a foreign ownership annotation.
    #[error("object already managed by id {existing_id}")]
    OwnershipConflict { existing_id: String },

    /// The object was not found where a Read expected it.
    #[error("object not found")]
    NotFound,

    /// A Delete did not complete within `delete_timeout`.
    #[error("delete did not complete before timeout: {0:?}")]
    DeleteStuck(DeleteStall),

    /// Any other error surfaced by the underlying Kubernetes client that
    /// does not cleanly classify into the buckets above.
    #[error("cluster error: {0}")]
    Cluster(#[from] kube::Error),

    /// The host engine cancelled an in-flight delete-wait (spec §5
    /// "Cancellation"). Not auto-retried by `retry_transient` — the caller
    /// asked for this, not the cluster — but a fresh `delete` call against
    /// the same state picks up exactly where this one left off.
    #[error("operation cancelled")]
    Cancelled,
}

impl CoreError {
    /// True for error classes §5 says must be retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::TransientCluster(_))
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
