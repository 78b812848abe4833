// SPDX-License-Identifier: MIT OR Apache-2.0
//! Router scoring throughput over registry snapshots of increasing size.

use agf_core::{ModuleStatus, ResourceHints};
use agf_registry::{
    CircuitState, RegistrySnapshot, RouteQuery, RouterWeights, SnapshotEntry, recommend,
};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

fn snapshot(entries: usize) -> RegistrySnapshot {
    RegistrySnapshot {
        entries: (0..entries)
            .map(|i| SnapshotEntry {
                module_id: format!("category{}/platform{i}", i % 7),
                version: "1.0.0".to_string(),
                capabilities: vec!["rest_api".to_string(), format!("tag{}", i % 5)],
                resources: ResourceHints {
                    memory_mb: Some(64 + (i as u64 % 512)),
                    avg_latency_ms: Some(50 + (i as u64 % 900)),
                    cpu_weight: None,
                },
                status: ModuleStatus::Active,
                circuit: if i % 11 == 0 {
                    CircuitState::Open
                } else {
                    CircuitState::Closed
                },
            })
            .collect(),
    }
}

fn bench_recommend(c: &mut Criterion) {
    let query = RouteQuery {
        text: "track the weather and my portfolio with rest api pagination".to_string(),
        required_capabilities: vec!["rest_api".to_string()],
    };
    let mut group = c.benchmark_group("recommend");
    for size in [10usize, 100, 1000] {
        let snap = snapshot(size);
        group.bench_function(format!("{size}_modules"), |b| {
            b.iter(|| recommend(black_box(&query), black_box(&snap), RouterWeights::default()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_recommend);
criterion_main!(benches);
