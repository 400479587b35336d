//! Per-product demand projection.
//!
//! Model:
//! - Bucket the product's outbound quantities by calendar day over a bounded
//!   lookback, zero-filling quiet days.
//! - Fit a least-squares trend line and (given enough history) day-of-week
//!   seasonality factors.
//! - Project the next `horizon_days` and derive a confidence band from the
//!   fit residuals.
//!
//! The projection is deterministic for identical input and degrades to a
//! wide, low-confidence band when history is sparse instead of erroring.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use wareflow_core::ProductId;
use wareflow_domain::{Movement, MovementKind};

use crate::anomaly::mean;

/// Tuning for demand projection.
#[derive(Debug, Clone, Copy)]
pub struct DemandConfig {
    /// Days ahead to project.
    horizon_days: u32,
    /// How far back movement history feeds the model.
    lookback_days: u32,
    /// Below this many observed days the projection reports a wide,
    /// low-confidence band instead of fitting a trend (effective minimum 2).
    min_observations: usize,
    /// Whether to weight projected days by day-of-week factors.
    seasonality: bool,
}

impl DemandConfig {
    pub fn new() -> Self {
        Self {
            horizon_days: 14,
            lookback_days: 90,
            min_observations: 5,
            seasonality: true,
        }
    }

    pub fn with_horizon_days(mut self, horizon_days: u32) -> Self {
        self.horizon_days = horizon_days.max(1);
        self
    }

    pub fn with_lookback_days(mut self, lookback_days: u32) -> Self {
        self.lookback_days = lookback_days.max(1);
        self
    }

    pub fn with_min_observations(mut self, min_observations: usize) -> Self {
        self.min_observations = min_observations;
        self
    }

    pub fn with_seasonality(mut self, seasonality: bool) -> Self {
        self.seasonality = seasonality;
        self
    }

    pub fn horizon_days(&self) -> u32 {
        self.horizon_days
    }
}

impl Default for DemandConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Projected demand for one product over the configured horizon.
/// Derivative, always recomputable from movement history; the cache's
/// recency bounds its validity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockPrediction {
    pub product_id: ProductId,
    pub horizon_days: u32,
    /// Total units expected to leave stock over the horizon.
    pub expected_demand: f64,
    /// Lower edge of the confidence band (never negative).
    pub lower: f64,
    /// Upper edge of the confidence band.
    pub upper: f64,
    /// Confidence in \[0, 1\]; low when history is short or noisy.
    pub confidence: f64,
    /// Observed days feeding the model.
    pub observations: usize,
    pub generated_at: DateTime<Utc>,
}

/// Project outbound demand for `product_id` over `config.horizon_days`.
pub fn project_demand(
    product_id: ProductId,
    movements: &[Movement],
    config: &DemandConfig,
    now: DateTime<Utc>,
) -> StockPrediction {
    let today = now.date_naive();
    let horizon = config.horizon_days;
    let series = daily_outbound(product_id, movements, config, today);

    let Some(series) = series else {
        // Never-sold product: defined result, zero expectation, no confidence.
        return StockPrediction {
            product_id,
            horizon_days: horizon,
            expected_demand: 0.0,
            lower: 0.0,
            upper: horizon as f64,
            confidence: 0.0,
            observations: 0,
            generated_at: now,
        };
    };

    let n = series.len();
    let daily_mean = mean(&series);
    let effective_min = config.min_observations.max(2);

    if n < effective_min {
        let expected = daily_mean * horizon as f64;
        return StockPrediction {
            product_id,
            horizon_days: horizon,
            expected_demand: expected,
            lower: 0.0,
            upper: (2.0 * expected).max(horizon as f64),
            confidence: 0.1 * (n as f64 / effective_min as f64),
            observations: n,
            generated_at: now,
        };
    }

    // Least-squares trend over day index.
    let t_bar = (n - 1) as f64 / 2.0;
    let mut s_tt = 0.0;
    let mut s_ty = 0.0;
    for (i, y) in series.iter().enumerate() {
        let dt = i as f64 - t_bar;
        s_tt += dt * dt;
        s_ty += dt * (y - daily_mean);
    }
    let slope = s_ty / s_tt;
    let intercept = daily_mean - slope * t_bar;

    let sse: f64 = series
        .iter()
        .enumerate()
        .map(|(i, y)| {
            let r = y - (intercept + slope * i as f64);
            r * r
        })
        .sum();
    let resid_std = (sse / (n.saturating_sub(2).max(1)) as f64).sqrt();

    let factors = weekday_factors(&series, today, daily_mean, config);

    let mut expected = 0.0;
    for h in 1..=horizon {
        let t = (n - 1 + h as usize) as f64;
        let base = (intercept + slope * t).max(0.0);
        let date = today + Days::new(u64::from(h));
        expected += base * factors[weekday_index(date)];
    }

    let half_width = 1.96 * resid_std * (horizon as f64).sqrt();
    let coverage = n as f64 / (n as f64 + 10.0);
    let noise = resid_std / (daily_mean.abs() + 1.0);

    StockPrediction {
        product_id,
        horizon_days: horizon,
        expected_demand: expected,
        lower: (expected - half_width).max(0.0),
        upper: expected + half_width,
        confidence: (coverage / (1.0 + noise)).clamp(0.0, 1.0),
        observations: n,
        generated_at: now,
    }
}

/// Zero-filled daily outbound series from first activity through today.
/// `None` when the product has no outbound history inside the lookback.
fn daily_outbound(
    product_id: ProductId,
    movements: &[Movement],
    config: &DemandConfig,
    today: NaiveDate,
) -> Option<Vec<f64>> {
    let cutoff = today - Days::new(u64::from(config.lookback_days.saturating_sub(1)));

    let mut daily: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for m in movements {
        if m.product_id != product_id || m.kind != MovementKind::Outbound {
            continue;
        }
        let date = m.occurred_at.date_naive();
        if date < cutoff || date > today {
            continue;
        }
        *daily.entry(date).or_insert(0.0) += m.quantity as f64;
    }

    let (&first_day, _) = daily.first_key_value()?;
    let span = today.signed_duration_since(first_day).num_days().max(0) as usize + 1;

    Some(
        (0..span)
            .map(|i| {
                daily
                    .get(&(first_day + Days::new(i as u64)))
                    .copied()
                    .unwrap_or(0.0)
            })
            .collect(),
    )
}

/// Day-of-week demand factors relative to the overall daily mean, clamped to
/// keep a few odd days from dominating the projection. All ones when
/// seasonality is disabled or history is too short to estimate a weekly
/// pattern.
fn weekday_factors(
    series: &[f64],
    today: NaiveDate,
    daily_mean: f64,
    config: &DemandConfig,
) -> [f64; 7] {
    let mut factors = [1.0; 7];
    if !config.seasonality || series.len() < 14 || daily_mean <= f64::EPSILON {
        return factors;
    }

    let n = series.len();
    let mut sums = [0.0f64; 7];
    let mut counts = [0usize; 7];
    for (i, y) in series.iter().enumerate() {
        // Day i of the series is (n - 1 - i) days before today.
        let date = today - Days::new((n - 1 - i) as u64);
        let w = weekday_index(date);
        sums[w] += y;
        counts[w] += 1;
    }

    for w in 0..7 {
        if counts[w] > 0 {
            let weekday_mean = sums[w] / counts[w] as f64;
            factors[w] = (weekday_mean / daily_mean).clamp(0.25, 4.0);
        }
    }
    factors
}

fn weekday_index(date: NaiveDate) -> usize {
    date.weekday().num_days_from_monday() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use wareflow_core::MovementId;

    fn outbound_on(product_id: ProductId, quantity: i64, days_ago: i64, now: DateTime<Utc>) -> Movement {
        let at = now - Duration::days(days_ago);
        Movement::new(
            MovementId::new(),
            product_id,
            MovementKind::Outbound,
            quantity,
            at,
            at,
        )
        .unwrap()
    }

    #[test]
    fn zero_history_yields_defined_low_confidence_result() {
        let now = Utc::now();
        let prediction = project_demand(ProductId::new(), &[], &DemandConfig::new(), now);

        assert_eq!(prediction.expected_demand, 0.0);
        assert_eq!(prediction.confidence, 0.0);
        assert_eq!(prediction.observations, 0);
        assert!(prediction.upper > prediction.lower);
    }

    #[test]
    fn sparse_history_reports_wide_band() {
        let now = Utc::now();
        let product_id = ProductId::new();
        let movements = vec![
            outbound_on(product_id, 5, 1, now),
            outbound_on(product_id, 5, 0, now),
        ];

        let prediction = project_demand(product_id, &movements, &DemandConfig::new(), now);
        assert!(prediction.confidence <= 0.1);
        assert_eq!(prediction.lower, 0.0);
        assert!(prediction.upper >= prediction.expected_demand);
    }

    #[test]
    fn steady_demand_projects_near_daily_rate() {
        let now = Utc::now();
        let product_id = ProductId::new();
        let movements: Vec<Movement> = (0..28i64)
            .map(|d| outbound_on(product_id, 10, d, now))
            .collect();

        let config = DemandConfig::new().with_seasonality(false);
        let prediction = project_demand(product_id, &movements, &config, now);

        let expected = 10.0 * config.horizon_days() as f64;
        assert!((prediction.expected_demand - expected).abs() < 1e-6);
        assert!(prediction.lower <= prediction.expected_demand);
        assert!(prediction.expected_demand <= prediction.upper);
        assert!(prediction.confidence > 0.5);
    }

    #[test]
    fn rising_trend_projects_above_flat_history() {
        let now = Utc::now();
        let flat_id = ProductId::new();
        let rising_id = ProductId::new();

        let mut movements: Vec<Movement> =
            (0..20i64).map(|d| outbound_on(flat_id, 10, d, now)).collect();
        // Same overall mean, but climbing toward today.
        movements.extend((0..20i64).map(|d| outbound_on(rising_id, 1 + (19 - d), d, now)));

        let config = DemandConfig::new().with_seasonality(false);
        let flat = project_demand(flat_id, &movements, &config, now);
        let rising = project_demand(rising_id, &movements, &config, now);

        assert!(rising.expected_demand > flat.expected_demand);
    }

    #[test]
    fn projection_is_deterministic() {
        let now = Utc::now();
        let product_id = ProductId::new();
        let movements: Vec<Movement> = (0..30i64)
            .map(|d| outbound_on(product_id, 4 + (d % 3), d, now))
            .collect();

        let config = DemandConfig::new();
        let a = project_demand(product_id, &movements, &config, now);
        let b = project_demand(product_id, &movements, &config, now);
        assert_eq!(a, b);
    }

    #[test]
    fn small_perturbation_moves_the_projection_a_little() {
        let now = Utc::now();
        let product_id = ProductId::new();
        let base: Vec<Movement> = (0..28i64)
            .map(|d| outbound_on(product_id, 10, d, now))
            .collect();

        let mut nudged = base.clone();
        nudged[5] = outbound_on(product_id, 11, 5, now);

        let config = DemandConfig::new().with_seasonality(false);
        let a = project_demand(product_id, &base, &config, now);
        let b = project_demand(product_id, &nudged, &config, now);

        assert!((a.expected_demand - b.expected_demand).abs() < 10.0);
    }

    #[test]
    fn old_history_outside_lookback_is_ignored() {
        let now = Utc::now();
        let product_id = ProductId::new();
        let movements = vec![outbound_on(product_id, 1_000, 400, now)];

        let prediction = project_demand(product_id, &movements, &DemandConfig::new(), now);
        assert_eq!(prediction.observations, 0);
        assert_eq!(prediction.expected_demand, 0.0);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 128,
                ..ProptestConfig::default()
            })]

            /// Property: the projection is always a defined, finite result
            /// with an ordered band, whatever the history looks like.
            #[test]
            fn projection_is_always_well_formed(
                quantities in proptest::collection::vec(1i64..5_000, 0..40),
            ) {
                let now = Utc::now();
                let product_id = ProductId::new();
                let movements: Vec<Movement> = quantities
                    .iter()
                    .enumerate()
                    .map(|(d, &q)| outbound_on(product_id, q, d as i64, now))
                    .collect();

                let prediction =
                    project_demand(product_id, &movements, &DemandConfig::new(), now);

                prop_assert!(prediction.expected_demand.is_finite());
                prop_assert!(prediction.lower >= 0.0);
                prop_assert!(prediction.lower <= prediction.upper);
                prop_assert!((0.0..=1.0).contains(&prediction.confidence));
            }
        }
    }
}
