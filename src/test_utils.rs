// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Common test utilities for exercising ORAM sessions.

use crate::{
    crypto::AesGcmCrypto,
    planner::{Layout, OramKind},
    recursive::OramSession,
    store::{BlockStore, CountAccessesStore, MemoryStore},
    Address,
};
use duplicate::duplicate_item;
use rand::{rngs::StdRng, CryptoRng, Rng, RngCore, SeedableRng};
use simplelog::{Config, WriteLogger};
use std::sync::Once;

static INIT: Once = Once::new();

// For use in manual testing and inspection.
pub(crate) fn init_logger() {
    INIT.call_once(|| {
        WriteLogger::init(log::LevelFilter::Info, Config::default(), std::io::stdout()).unwrap()
    })
}

/// A store constructible from a slot count, so the same session helpers run
/// over plain and instrumented stores.
pub(crate) trait TestStore: BlockStore + Sized {
    fn with_capacity(capacity: Address) -> Self;
}

#[duplicate_item(
    store_type;
    [MemoryStore];
    [CountAccessesStore];
)]
impl TestStore for store_type {
    fn with_capacity(capacity: Address) -> Self {
        store_type::new(capacity)
    }
}

pub(crate) fn test_session_generic<T: TestStore, R: RngCore + CryptoRng>(
    kinds: &[OramKind],
    capacity: Address,
    block_size: usize,
    rng: &mut R,
) -> OramSession<T, AesGcmCrypto> {
    let layout = Layout::new(kinds, capacity, block_size).unwrap();
    let store = T::with_capacity(layout.total_slots);
    let crypto = AesGcmCrypto::derive(b"test session key seed");
    OramSession::new(&layout, store, crypto, rng).unwrap()
}

pub(crate) fn test_session<R: RngCore + CryptoRng>(
    kinds: &[OramKind],
    capacity: Address,
    block_size: usize,
    rng: &mut R,
) -> OramSession<MemoryStore, AesGcmCrypto> {
    test_session_generic(kinds, capacity, block_size, rng)
}

pub(crate) fn test_session_with_counting_store<R: RngCore + CryptoRng>(
    kinds: &[OramKind],
    capacity: Address,
    block_size: usize,
    rng: &mut R,
) -> OramSession<CountAccessesStore, AesGcmCrypto> {
    test_session_generic(kinds, capacity, block_size, rng)
}

fn random_data<R: RngCore + CryptoRng>(rng: &mut R, max_len: usize) -> Vec<u8> {
    let len = rng.gen_range(0..=max_len);
    (0..len).map(|_| rng.gen()).collect()
}

/// Tests a session layout on a workload of random reads and writes against a
/// mirror array, then reads every address back.
pub(crate) fn random_workload(
    kinds: &[OramKind],
    capacity: Address,
    block_size: usize,
    operations: u32,
) {
    init_logger();
    let mut rng = StdRng::seed_from_u64(0);
    let mut session = test_session(kinds, capacity, block_size, &mut rng);
    let mut mirror: Vec<Vec<u8>> = vec![Vec::new(); capacity as usize + 1];

    for _ in 0..operations {
        let address = rng.gen_range(1..=capacity);
        if rng.gen::<bool>() {
            assert_eq!(
                session.read(address, &mut rng).unwrap(),
                mirror[address as usize]
            );
        } else {
            let data = random_data(&mut rng, block_size);
            let previous = session.write(address, &data, &mut rng).unwrap();
            assert_eq!(previous, mirror[address as usize]);
            mirror[address as usize] = data;
        }
    }

    for address in 1..=capacity {
        assert_eq!(
            session.read(address, &mut rng).unwrap(),
            mirror[address as usize],
            "{address}"
        );
    }
}

/// Tests a session layout on repeated sequential passes over every address.
pub(crate) fn linear_workload(
    kinds: &[OramKind],
    capacity: Address,
    block_size: usize,
    operations: u32,
) {
    init_logger();
    let mut rng = StdRng::seed_from_u64(0);
    let mut session = test_session(kinds, capacity, block_size, &mut rng);
    let mut mirror: Vec<Vec<u8>> = vec![Vec::new(); capacity as usize + 1];

    let passes = operations / capacity;
    for _ in 0..passes {
        for address in 1..=capacity {
            if rng.gen::<bool>() {
                assert_eq!(
                    session.read(address, &mut rng).unwrap(),
                    mirror[address as usize]
                );
            } else {
                let data = random_data(&mut rng, block_size);
                session.write(address, &data, &mut rng).unwrap();
                mirror[address as usize] = data;
            }
        }
    }

    for address in 1..=capacity {
        assert_eq!(
            session.read(address, &mut rng).unwrap(),
            mirror[address as usize],
            "{address}"
        );
    }
}

macro_rules! create_session_correctness_tests {
    ($name:ident, $kinds:expr, $capacity:expr, $block_size:expr, $operations:expr) => {
        paste::paste! {
            #[test]
            fn [<random_workload_ $name _ $capacity _ $block_size _ $operations>]() {
                $crate::test_utils::random_workload($kinds, $capacity, $block_size, $operations);
            }

            #[test]
            fn [<linear_workload_ $name _ $capacity _ $block_size _ $operations>]() {
                $crate::test_utils::linear_workload($kinds, $capacity, $block_size, $operations);
            }
        }
    };
}

pub(crate) use create_session_correctness_tests;
