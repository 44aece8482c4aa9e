// Payment reconciliation: probe every awaiting address, decide, persist
pub mod evaluator;
pub mod reconciler;

pub use reconciler::{CycleReport, Reconciler, ReconcilerConfig};
