use chrono::{Duration, Utc};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

use wareflow_analytics::{AnomalyConfig, DemandConfig, project_demand, scan};
use wareflow_core::{MovementId, ProductId};
use wareflow_domain::{Movement, MovementKind};

/// Deterministic synthetic outbound history: `days` days, one movement per
/// day, quantities cycling through a small pseudo-random pattern.
fn synthetic_history(product_id: ProductId, days: i64) -> Vec<Movement> {
    let now = Utc::now();
    (0..days)
        .map(|d| {
            let at = now - Duration::days(d);
            let quantity = 1 + (d * 7919) % 13;
            Movement::new(
                MovementId::new(),
                product_id,
                MovementKind::Outbound,
                quantity,
                at,
                at,
            )
            .unwrap()
        })
        .collect()
}

fn bench_project_demand(c: &mut Criterion) {
    let product_id = ProductId::new();
    let movements = synthetic_history(product_id, 90);
    let config = DemandConfig::new();
    let now = Utc::now();

    c.bench_function("project_demand_90_days", |b| {
        b.iter(|| {
            black_box(project_demand(
                black_box(product_id),
                black_box(&movements),
                &config,
                now,
            ))
        })
    });
}

fn bench_anomaly_scan(c: &mut Criterion) {
    let product_id = ProductId::new();
    let movements = synthetic_history(product_id, 365);
    let config = AnomalyConfig::new();

    c.bench_function("anomaly_scan_365_movements", |b| {
        b.iter(|| black_box(scan(black_box(&movements), &config)))
    });
}

criterion_group!(benches, bench_project_demand, bench_anomaly_scan);
criterion_main!(benches);
