//! Per-movement anomaly scoring.
//!
//! Model:
//! - Collect the product's preceding movements as signed stock deltas.
//! - Compare the candidate movement's delta against a rolling window of
//!   those baseline deltas.
//! - Flag if the absolute z-score strictly exceeds `z_threshold`; a score
//!   exactly at the threshold stays inside the normal band.

use serde::{Deserialize, Serialize};

use wareflow_core::{MovementId, ProductId};
use wareflow_domain::Movement;

/// Tuning for anomaly scoring.
#[derive(Debug, Clone, Copy)]
pub struct AnomalyConfig {
    /// Rolling window size for baseline deltas (effective minimum 2, needed
    /// to compute a standard deviation).
    window: usize,
    /// Z-score threshold (e.g. 3.0). Non-finite or non-positive values are
    /// ignored in favor of the current setting.
    z_threshold: f64,
}

impl AnomalyConfig {
    pub fn new() -> Self {
        Self {
            window: 10,
            z_threshold: 3.0,
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(2);
        self
    }

    pub fn with_z_threshold(mut self, z_threshold: f64) -> Self {
        if z_threshold.is_finite() && z_threshold > 0.0 {
            self.z_threshold = z_threshold;
        }
        self
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn z_threshold(&self) -> f64 {
        self.z_threshold
    }
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of scoring one movement. Derivative, never persisted as
/// authoritative state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub movement_id: MovementId,
    pub product_id: ProductId,
    pub is_anomalous: bool,
    /// Absolute z-score against the baseline window (0 when no baseline).
    pub score: f64,
    pub reason: String,
}

/// Score a single movement against the product's earlier movements.
///
/// `history` may contain movements of other products or the candidate
/// itself; only strictly preceding movements of the same product feed the
/// baseline. The first recorded movement of a product is never anomalous.
pub fn score_movement(
    movement: &Movement,
    history: &[Movement],
    config: &AnomalyConfig,
) -> AnomalyResult {
    let baseline = baseline_deltas(movement, history, config.window);

    if baseline.is_empty() {
        return AnomalyResult {
            movement_id: movement.id,
            product_id: movement.product_id,
            is_anomalous: false,
            score: 0.0,
            reason: "first recorded movement for this product; no baseline yet".to_string(),
        };
    }

    if baseline.len() < 2 {
        return AnomalyResult {
            movement_id: movement.id,
            product_id: movement.product_id,
            is_anomalous: false,
            score: 0.0,
            reason: format!(
                "only {} prior movement(s); not enough to establish a normal band",
                baseline.len()
            ),
        };
    }

    let delta = movement.signed_delta() as f64;
    let mean = mean(&baseline);
    let std = stddev_sample(&baseline, mean);

    // Constant baseline: any deviation is unusual, but keep the score finite.
    if std <= f64::EPSILON {
        let deviation = (delta - mean).abs();
        if deviation > 0.0 {
            return AnomalyResult {
                movement_id: movement.id,
                product_id: movement.product_id,
                is_anomalous: true,
                score: config.z_threshold * 2.0,
                reason: format!(
                    "moved by {delta:.2} units against a constant baseline of {mean:.2} (std≈0)"
                ),
            };
        }
        return AnomalyResult {
            movement_id: movement.id,
            product_id: movement.product_id,
            is_anomalous: false,
            score: 0.0,
            reason: format!("matches constant baseline of {mean:.2}"),
        };
    }

    let z = (delta - mean) / std;
    let score = z.abs();
    let is_anomalous = score > config.z_threshold;

    AnomalyResult {
        movement_id: movement.id,
        product_id: movement.product_id,
        is_anomalous,
        score,
        reason: format!(
            "moved by {delta:.2} units; baseline mean={mean:.2}, std={std:.2}, z={z:.2} (threshold={:.2})",
            config.z_threshold
        ),
    }
}

/// Score every movement against its chronological predecessors.
///
/// Results come back in chronological order (occurred_at, then id).
pub fn scan(movements: &[Movement], config: &AnomalyConfig) -> Vec<AnomalyResult> {
    let mut ordered: Vec<&Movement> = movements.iter().collect();
    ordered.sort_by_key(|m| (m.occurred_at, m.id));

    let mut results = Vec::with_capacity(ordered.len());
    for m in ordered {
        results.push(score_movement(m, movements, config));
    }
    results
}

/// Signed deltas of the movements strictly preceding `movement` for the same
/// product, most recent `window` of them, in chronological order.
fn baseline_deltas(movement: &Movement, history: &[Movement], window: usize) -> Vec<f64> {
    let mut prior: Vec<&Movement> = history
        .iter()
        .filter(|m| {
            m.product_id == movement.product_id
                && m.id != movement.id
                && (m.occurred_at, m.id) < (movement.occurred_at, movement.id)
        })
        .collect();
    prior.sort_by_key(|m| (m.occurred_at, m.id));

    let start = prior.len().saturating_sub(window);
    prior[start..]
        .iter()
        .map(|m| m.signed_delta() as f64)
        .collect()
}

pub(crate) fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / (xs.len() as f64)
}

/// Sample standard deviation (n-1), deterministic.
pub(crate) fn stddev_sample(xs: &[f64], mean: f64) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let var = xs
        .iter()
        .map(|x| {
            let d = x - mean;
            d * d
        })
        .sum::<f64>()
        / ((xs.len() - 1) as f64);
    var.sqrt()
}
