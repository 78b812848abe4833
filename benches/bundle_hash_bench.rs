// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bundle hashing throughput: the install guard recomputes bundle hashes on
//! every install, so this path sits on the hot side of module promotion.

use agf_core::build_bundle;
use criterion::{Criterion, black_box, criterion_group, criterion_main};

fn sample_files(count: usize, size: usize) -> Vec<(String, Vec<u8>)> {
    (0..count)
        .map(|i| {
            let path = format!("weather_openmeteo/src/file_{i:03}.py");
            let content = vec![b'x'; size];
            (path, content)
        })
        .collect()
}

fn bench_build_bundle(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_bundle");
    for (count, size) in [(3usize, 1024usize), (10, 10 * 1024), (10, 100 * 1024)] {
        let files = sample_files(count, size);
        group.bench_function(format!("{count}_files_{size}_bytes"), |b| {
            b.iter(|| build_bundle(black_box(files.clone())));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build_bundle);
criterion_main!(benches);
