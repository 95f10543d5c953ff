// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! A very simple demonstration of the use of ORAM.

extern crate oram_client;

use oram_client::{AesGcmCrypto, Layout, MemoryStore, OramError, OramKind, OramSession};
use rand::rngs::OsRng;
use simplelog::{Config, TermLogger};

fn main() -> Result<(), OramError> {
    TermLogger::init(
        log::LevelFilter::Info,
        Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )
    .unwrap();

    let mut rng = OsRng;
    let layout = Layout::new(&[OramKind::Path, OramKind::Trivial], 64, 64)?;
    let store = MemoryStore::new(layout.total_slots);
    let crypto = AesGcmCrypto::derive(b"demo seed");

    let mut session = OramSession::new(&layout, store, crypto, &mut rng)?;
    println!("store round trip: {:?}", session.speed_test()?);

    session.write(1, b"hello oblivious world", &mut rng)?;
    println!("{}", String::from_utf8_lossy(&session.read(1, &mut rng)?));

    session.end_session()?;
    Ok(())
}
