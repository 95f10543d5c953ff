// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The address-to-position map of an ORAM level, held either in client
//! memory or delegated to the inner levels as fixed-capacity pages.

use crate::{
    block::{decode_u32, encode_u32, Block, FIELD_BYTES},
    crypto::Crypto,
    recursive::{access_level, Engine, Request},
    store::BlockStore,
    Address, OramError, Position,
};
use rand::{CryptoRng, RngCore};

/// Splits a logical address into the 1-based page address holding its map
/// entry and the entry's offset within that page.
pub(crate) fn page_of(address: Address, positions_per_block: usize) -> (Address, usize) {
    let positions_per_block = positions_per_block as Address;
    let page = (address - 1) / positions_per_block + 1;
    let entry = (address - 1) % positions_per_block;
    (page, entry as usize)
}

/// The number of pages needed to map `capacity` addresses.
pub(crate) fn page_count(capacity: Address, positions_per_block: usize) -> Address {
    let positions_per_block = positions_per_block as Address;
    capacity.div_ceil(positions_per_block)
}

/// Reads the position at `entry` from the raw bytes of a page.
pub(crate) fn entry_in_page(page: &[u8], entry: usize) -> Result<Position, OramError> {
    let start = entry * FIELD_BYTES;
    let end = start + FIELD_BYTES;
    if page.len() < end {
        return Err(OramError::Protocol(
            "position-map page too short for the requested entry".to_string(),
        ));
    }
    decode_u32(&page[start..end])
}

/// Writes `position` at `entry` into the raw bytes of a page, growing the
/// page with zero entries if needed.
pub(crate) fn set_entry_in_page(page: &mut Vec<u8>, entry: usize, position: Position) {
    let start = entry * FIELD_BYTES;
    let end = start + FIELD_BYTES;
    if page.len() < end {
        page.resize(end, 0);
    }
    page[start..end].copy_from_slice(&encode_u32(position));
}

/// Encodes a whole position vector into fixed-width pages. The last page is
/// zero-padded to the full page width, so every page block of a level has the
/// same size. Page blocks are addressed `1..=page_count`.
pub(crate) fn pages_as_blocks(positions: &[Position], positions_per_block: usize) -> Vec<Block> {
    let mut blocks = Vec::new();
    for (index, chunk) in positions.chunks(positions_per_block).enumerate() {
        let mut data = vec![0u8; positions_per_block * FIELD_BYTES];
        for (entry, position) in chunk.iter().enumerate() {
            set_entry_in_page(&mut data, entry, *position);
        }
        blocks.push(Block::new(index as Address + 1, data));
    }
    blocks
}

/// Where a level keeps its position map.
#[derive(Debug)]
pub(crate) enum PositionMap {
    /// The whole map lives in client memory, indexed by `address - 1`.
    Local(Vec<Position>),
    /// The map lives inside the inner ORAM levels as fixed-capacity pages.
    Delegated {
        /// Number of 4-byte entries per page.
        positions_per_block: usize,
    },
}

impl PositionMap {
    /// Resolves `address` to its current position without changing the map.
    pub(crate) fn read<S: BlockStore, C: Crypto, R: RngCore + CryptoRng>(
        &mut self,
        inner: &mut [Engine],
        store: &mut S,
        crypto: &C,
        rng: &mut R,
        address: Address,
    ) -> Result<Position, OramError> {
        match self {
            PositionMap::Local(positions) => positions
                .get((address - 1) as usize)
                .copied()
                .ok_or(OramError::Lookup(address)),
            PositionMap::Delegated {
                positions_per_block,
            } => {
                let (page_address, entry) = page_of(address, *positions_per_block);
                log::debug!(
                    "Level {} position map read: {}",
                    inner.len(),
                    address
                );
                let page = access_level(inner, store, crypto, rng, page_address, Request::Read)?;
                entry_in_page(&page, entry)
            }
        }
    }

    /// Replaces the position of `address`, returning the previous one.
    pub(crate) fn replace<S: BlockStore, C: Crypto, R: RngCore + CryptoRng>(
        &mut self,
        inner: &mut [Engine],
        store: &mut S,
        crypto: &C,
        rng: &mut R,
        address: Address,
        new_position: Position,
    ) -> Result<Position, OramError> {
        match self {
            PositionMap::Local(positions) => {
                let slot = positions
                    .get_mut((address - 1) as usize)
                    .ok_or(OramError::Lookup(address))?;
                Ok(std::mem::replace(slot, new_position))
            }
            PositionMap::Delegated {
                positions_per_block,
            } => {
                let (page_address, entry) = page_of(address, *positions_per_block);
                log::debug!(
                    "Level {} position map write: {}",
                    inner.len(),
                    address
                );
                let page = access_level(
                    inner,
                    store,
                    crypto,
                    rng,
                    page_address,
                    Request::UpdatePosition {
                        entry,
                        position: new_position,
                    },
                )?;
                entry_in_page(&page, entry)
            }
        }
    }
}
