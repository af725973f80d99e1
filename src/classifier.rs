//! Component F: the Conflict Classifier (spec §4.F).
//!
//! A pure function of the 4-tuple `(prev_owned, now_owned, config_changed,
//! external_changed)`, implemented as a dense table rather than an open
//! hierarchy of types (spec §9's "cycles, dispatch, coroutines" note).

use crate::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    NoConflict,
    Taking,
    Drift,
    Update,
}

/// The 16-row table of spec §4.F, rows 0–15 in the tuple's natural
/// bit-order (prev, now, cfg, ext). Rows marked unreachable in the spec
/// still return a defined class (`NoConflict`) rather than asserting,
/// satisfying P3 (classifier totality).
pub fn classify(prev_owned: bool, now_owned: bool, config_changed: bool, external_changed: bool) -> Classification {
    use Classification::*;
    match (prev_owned, now_owned, config_changed, external_changed) {
        (false, false, _, _) => NoConflict,
        (false, true, false, _) => NoConflict,
        (false, true, true, false) => NoConflict,
        (false, true, true, true) => Taking,
        (true, false, false, false) => NoConflict,
        (true, false, false, true) => Drift,
        (true, false, true, _) => NoConflict,
        (true, true, false, false) => NoConflict,
        (true, true, false, true) => Drift,
        (true, true, true, false) => NoConflict,
        (true, true, true, true) => Update,
    }
}

/// A single classified path, carrying enough context for a human-readable
/// message.
#[derive(Debug, Clone)]
pub struct Finding {
    pub path: Path,
    pub class: Classification,
    pub foreign_manager: Option<String>,
}

/// Input for one leaf path's classification.
pub struct PathTransition {
    pub path: Path,
    pub prev_owned: bool,
    pub now_owned: bool,
    pub config_changed: bool,
    pub external_changed: bool,
    /// The manager presently holding the field, when known — used only to
    /// name the "taking from X" / "drifted via X" warning.
    pub foreign_manager: Option<String>,
}

/// Warnings grouped by class, in the fixed emission order spec §4.F
/// requires: Drift, then Taking, then Update.
#[derive(Debug, Clone, Default)]
pub struct Warnings {
    pub drift: Vec<Warning>,
    pub taking: Vec<Warning>,
    pub update: Vec<Warning>,
}

#[derive(Debug, Clone)]
pub struct Warning {
    pub path: Path,
    pub summary: String,
}

impl Warnings {
    pub fn is_empty(&self) -> bool {
        self.drift.is_empty() && self.taking.is_empty() && self.update.is_empty()
    }

    /// Render in the fixed order, with the resource identity folded into
    /// each summary so a de-duplicating UI keeps distinct resources
    /// distinct (spec §4.F).
    pub fn render_all(&self, resource_identity: &str) -> Vec<String> {
        let mut out = Vec::new();
        for w in &self.drift {
            out.push(format!("[{resource_identity}] {}", w.summary));
        }
        for w in &self.taking {
            out.push(format!("[{resource_identity}] {}", w.summary));
        }
        for w in &self.update {
            out.push(format!("[{resource_identity}] {}", w.summary));
        }
        out
    }
}

/// Classify every transition and group the results into warning buckets.
pub fn run(transitions: &[PathTransition]) -> Warnings {
    let mut warnings = Warnings::default();
    for t in transitions {
        let class = classify(t.prev_owned, t.now_owned, t.config_changed, t.external_changed);
        match class {
            Classification::NoConflict => {}
            Classification::Taking => warnings.taking.push(Warning {
                path: t.path.clone(),
                summary: match &t.foreign_manager {
                    Some(m) => format!("{} is being taken from field manager \"{m}\"", t.path),
                    None => format!("{} is being taken from another field manager", t.path),
                },
            }),
            Classification::Drift => warnings.drift.push(Warning {
                path: t.path.clone(),
                summary: match &t.foreign_manager {
                    Some(m) => format!(
                        "{} was changed externally by \"{m}\" and will be reverted on the next apply",
                        t.path
                    ),
                    None => format!(
                        "{} was changed externally and will be reverted on the next apply",
                        t.path
                    ),
                },
            }),
            Classification::Update => warnings.update.push(Warning {
                path: t.path.clone(),
                summary: format!(
                    "{} was concurrently changed externally and is being overwritten by this apply",
                    t.path
                ),
            }),
        }
    }
    warnings
}
