//! Component E: the Projection Engine (spec §4.E).

use std::collections::BTreeSet;

use serde_json::Value;

use crate::path::{canonical_json, leaf_paths, project, Path};

/// Result of computing the Managed Projection for one apply/plan cycle.
pub struct ProjectionResult {
    /// The canonical-JSON serialization of the projection (the artifact the
    /// host engine diffs).
    pub canonical: String,
    /// The raw projected document (pre-canonicalization), useful for the
    /// Conflict Classifier's per-path lookups.
    pub document: Value,
    /// Leaf paths included in the projection.
    pub projection_paths: BTreeSet<Path>,
    /// Paths we owned before but the user has removed from the manifest —
    /// released, not projected (spec §4.E step 2).
    pub released_paths: BTreeSet<Path>,
}

/// Compute the Managed Projection.
///
/// `prev_owned_paths` is `field_ownership`'s keys from the prior state;
/// `owned_by_us_from_reply` is the Ownership Decoder's `owned_by_us` set
/// decoded from the dry-run/apply reply.
pub fn compute(
    desired: &Value,
    live_or_dry_run: &Value,
    ignore_paths: &BTreeSet<Path>,
    prev_owned_paths: &BTreeSet<Path>,
    owned_by_us_from_reply: &BTreeSet<Path>,
) -> ProjectionResult {
    let asserted: BTreeSet<Path> = leaf_paths(desired).into_iter().collect();

    let released_paths: BTreeSet<Path> = prev_owned_paths.difference(&asserted).cloned().collect();

    let projection_paths: BTreeSet<Path> = asserted
        .union(owned_by_us_from_reply)
        .filter(|p| !ignore_paths.contains(*p))
        .cloned()
        .collect();

    let paths_vec: Vec<Path> = projection_paths.iter().cloned().collect();
    let document = project(live_or_dry_run, &paths_vec);

    ProjectionResult {
        canonical: canonical_json(&document),
        document,
        projection_paths,
        released_paths,
    }
}

/// Sentinel for "known after apply" (spec §3 I5, §9 "Unknown-safe plan").
/// The host engine's own unknown representation is mapped onto this by the
/// caller; the core only needs to distinguish "a concrete projection" from
/// "we don't know yet."
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    Concrete(String),
    Unknown,
}

impl Projection {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Projection::Unknown)
    }
}
