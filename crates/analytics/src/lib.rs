//! `wareflow-analytics` — predictive analytics over cached movement history.
//!
//! Pure, deterministic computations: per-product demand projection and
//! per-movement anomaly scoring. Inputs are provided by callers (the state
//! store, workers); nothing here touches cache, queue, or network state, so
//! every function is safely re-invocable from any component.

pub mod anomaly;
pub mod demand;

pub use anomaly::{AnomalyConfig, AnomalyResult, scan, score_movement};
pub use demand::{DemandConfig, StockPrediction, project_demand};
