//! Reconciliation engine
//!
//! ```text
//! reconcile(node) ── gate ──► Adding: create intended-but-missing entities
//!                             Updating: remove orphans, refresh live ones
//!                             purge retired children
//!                             recurse into children (snapshot)
//!                             Idle
//! ```

pub mod engine;

pub use engine::{ReconcileReport, Reconciler, SharedReconciler};
