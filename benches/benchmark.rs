// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Benchmarks for the `oram-client` crate.

extern crate criterion;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use oram_client::{Address, AesGcmCrypto, Layout, MemoryStore, OramKind, OramSession};
use rand::{rngs::StdRng, Rng, SeedableRng};

const CAPACITIES_TO_BENCHMARK: [Address; 2] = [64, 256];
const BLOCK_SIZE: usize = 64;

fn session(
    kinds: &[OramKind],
    capacity: Address,
    rng: &mut StdRng,
) -> OramSession<MemoryStore, AesGcmCrypto> {
    let layout = Layout::new(kinds, capacity, BLOCK_SIZE).unwrap();
    let store = MemoryStore::new(layout.total_slots);
    let crypto = AesGcmCrypto::derive(b"benchmark seed");
    OramSession::new(&layout, store, crypto, rng).unwrap()
}

fn benchmark_read(c: &mut Criterion, name: &str, kinds: &[OramKind]) {
    let mut group = c.benchmark_group(format!("{name}::read"));
    for capacity in CAPACITIES_TO_BENCHMARK {
        let mut rng = StdRng::seed_from_u64(0);
        let mut oram = session(kinds, capacity, &mut rng);
        for address in 1..=capacity {
            oram.write(address, &address.to_le_bytes(), &mut rng).unwrap();
        }
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, _| {
            b.iter(|| {
                let address = rng.gen_range(1..=capacity);
                black_box(oram.read(address, &mut rng).unwrap());
            })
        });
    }
    group.finish();
}

fn benchmark_initialization(c: &mut Criterion, name: &str, kinds: &[OramKind]) {
    let mut group = c.benchmark_group(format!("{name}::initialization"));
    for capacity in CAPACITIES_TO_BENCHMARK {
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, _| {
            let mut rng = StdRng::seed_from_u64(0);
            b.iter(|| black_box(session(kinds, capacity, &mut rng)))
        });
    }
    group.finish();
}

fn all_benchmarks(c: &mut Criterion) {
    benchmark_read(c, "path", &[OramKind::Path]);
    benchmark_read(c, "lookahead", &[OramKind::Lookahead]);
    benchmark_read(c, "trivial", &[OramKind::Trivial]);
    benchmark_read(c, "path_recursive", &[OramKind::Path, OramKind::Trivial]);
    benchmark_initialization(c, "path", &[OramKind::Path]);
    benchmark_initialization(c, "lookahead", &[OramKind::Lookahead]);
}

criterion_group!(
    name = benches;
    config = Criterion::default().warm_up_time(Duration::new(0, 1_000_000_00)).measurement_time(Duration::new(0, 1_000_000_00)).sample_size(10);
    targets = all_benchmarks
);
criterion_main!(benches);
