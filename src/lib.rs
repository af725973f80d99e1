//! Managed projection and ownership core for a server-side-apply based
//! cluster orchestration provider.
//!
//! This crate is the engine a host provider embeds; it owns no network
//! listener, no CLI, and no persistence of its own. It turns a user-supplied
//! manifest plus a `ManagedState` into cluster calls through the [`Gateway`]
//! trait, and turns the cluster's replies back into a projection, an
//! ownership map, and a set of human-readable conflict warnings.
//!
//! Module layout mirrors the component table this core is built from:
//! [`manifest`] (A) → [`path`] (B) → [`ownership`] (C) → [`gateway`] (D) →
//! [`projection`] (E) → [`classifier`] (F) → [`coordinator`] (G), with
//! [`connection`], [`state`], [`retry`], [`error`] and [`annotation`]
//! supplying the data model and plumbing those six share.

pub mod annotation;
pub mod classifier;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod import;
pub mod manifest;
pub mod ownership;
pub mod path;
pub mod projection;
pub mod retry;
pub mod state;

pub use coordinator::{Coordinator, PlanOutcome, ReadOutcome};
pub use error::{CoreError, Result};
pub use gateway::{Gateway, KubeGateway};
pub use state::{ManagedState, ResourceIdentity};
