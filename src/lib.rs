// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! A client-side implementation of Oblivious RAM over untrusted block storage.
//!
//! The client stores fixed-size data blocks on a remote [`BlockStore`] holding
//! only encrypted bytes, and accesses them so that the server learns nothing
//! about *which* logical addresses are touched. Three access strategies are
//! provided (Path ORAM, Lookahead ORAM, and a linear-scan Trivial ORAM) and
//! they compose recursively: each level's position map can itself be stored
//! obliviously inside the next level, with the innermost level holding its map
//! in client memory (or, for Trivial ORAM, needing none).
//!
//! ```no_run
//! use oram_client::{AesGcmCrypto, Layout, MemoryStore, OramKind, OramSession};
//! use rand::rngs::OsRng;
//!
//! # fn main() -> Result<(), oram_client::OramError> {
//! let mut rng = OsRng;
//! let layout = Layout::new(&[OramKind::Path], 64, 32)?;
//! let store = MemoryStore::new(layout.total_slots);
//! let crypto = AesGcmCrypto::derive(b"session seed");
//! let mut session = OramSession::new(&layout, store, crypto, &mut rng)?;
//! session.write(1, b"hello", &mut rng)?;
//! assert_eq!(session.read(1, &mut rng)?, b"hello");
//! # Ok(())
//! # }
//! ```

#![warn(clippy::cargo, clippy::doc_markdown, missing_docs, rustdoc::all)]

pub mod block;
pub mod crypto;
pub mod lookahead_oram;
pub mod path_oram;
pub mod planner;
pub(crate) mod position_map;
pub mod recursive;
pub mod store;
pub mod trivial_oram;
pub(crate) mod utils;

#[cfg(test)]
pub(crate) mod test_utils;

pub use block::{Block, EncryptedBlock, Index};
pub use crypto::{AesGcmCrypto, Crypto};
pub use path_oram::StashMetrics;
pub use planner::{Layout, LevelPlan, OramKind};
pub use recursive::OramSession;
pub use store::{BlockStore, CountAccessesStore, MemoryStore};

/// A logical ORAM address. Valid addresses are `1..=capacity`;
/// address `0` is the reserved dummy sentinel and is never stored for a client.
pub type Address = u32;

/// A server-side placement: a heap leaf index for Path ORAM,
/// or a flat matrix slot for Lookahead ORAM.
pub type Position = u32;

/// The number of blocks stored in each Path ORAM bucket.
pub type BucketSize = usize;

/// The kind of logical operation performed by an ORAM access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Fetch the data stored at an address.
    Read,
    /// Replace the data stored at an address.
    Write,
}

/// The error type for ORAM sessions.
///
/// Every failure is fatal to the session: after an error the client-side
/// invariants (stash contents, position map, maintenance schedule) are not
/// guaranteed consistent, and the caller must discard the session. Continuing
/// after a partial failure risks leaking access-pattern information, so no
/// variant is ever retried internally.
#[derive(Debug, thiserror::Error)]
pub enum OramError {
    /// Key derivation, encryption, or decryption failed.
    #[error("cryptographic operation failed: {0}")]
    Crypto(String),
    /// The block store reported an I/O failure.
    #[error("block store failure: {0}")]
    Store(String),
    /// The protocol state is inconsistent: a wrong-sized batch, a broken
    /// stash invariant, or an expected-dummy slot found occupied.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// An address could not be located in the position map or any stash.
    #[error("address {0} is not present in the position map or any stash")]
    Lookup(Address),
    /// The requested address is the dummy sentinel or beyond the capacity.
    #[error("address out of bounds")]
    AddressOutOfBounds,
    /// The requested geometry or arguments are unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// An internal integer conversion failed.
    #[error("integer conversion failed")]
    IntegerConversion(#[from] std::num::TryFromIntError),
}
