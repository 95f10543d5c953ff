// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The full-scan baseline ORAM: every access touches every block.

use crate::{
    block::{open_trivial_block, seal_trivial_block, Block, DUMMY_ADDRESS},
    crypto::Crypto,
    planner::LevelPlan,
    recursive::{apply_request, Engine, Request},
    store::BlockStore,
    Address, OramError,
};
use rand::{CryptoRng, RngCore};

/// A linear-time ORAM that is trivially oblivious: each access reads,
/// re-encrypts (with fresh IVs), and rewrites the whole store, so the access
/// pattern carries no information at all. It serves as the base case for
/// recursive position-map storage and as a correctness oracle in tests.
#[derive(Debug)]
pub struct TrivialOram {
    offset: Address,
    capacity: Address,
    block_size: usize,
}

impl TrivialOram {
    pub(crate) fn new(plan: &LevelPlan) -> Self {
        log::info!("TrivialOram::new(capacity = {})", plan.capacity);
        Self {
            offset: plan.offset,
            capacity: plan.capacity,
            block_size: plan.block_size,
        }
    }

    fn slots(&self) -> Vec<Address> {
        (self.offset..self.offset + self.capacity + 1).collect()
    }

    /// Populates the whole footprint: the provided blocks, then dummies.
    pub(crate) fn setup<S: BlockStore, C: Crypto>(
        &mut self,
        store: &mut S,
        crypto: &C,
        blocks: Vec<Block>,
    ) -> Result<(), OramError> {
        let slots = self.slots();
        if blocks.len() > slots.len() {
            return Err(OramError::InvalidConfiguration(format!(
                "{} initial blocks exceed the capacity {}",
                blocks.len(),
                self.capacity
            )));
        }
        let mut sealed = Vec::with_capacity(slots.len());
        for block in &blocks {
            if block.address == DUMMY_ADDRESS || block.address > self.capacity {
                return Err(OramError::AddressOutOfBounds);
            }
            sealed.push(seal_trivial_block(crypto, block, self.block_size)?);
        }
        for _ in blocks.len()..slots.len() {
            sealed.push(seal_trivial_block(crypto, &Block::dummy(), self.block_size)?);
        }
        store.write_batch(&slots, sealed)
    }

    pub(crate) fn access<S: BlockStore, C: Crypto, R: RngCore + CryptoRng>(
        &mut self,
        _inner: &mut [Engine],
        store: &mut S,
        crypto: &C,
        _rng: &mut R,
        address: Address,
        request: Request<'_>,
    ) -> Result<Vec<u8>, OramError> {
        if address == DUMMY_ADDRESS || address > self.capacity {
            return Err(OramError::AddressOutOfBounds);
        }

        let slots = self.slots();
        let sealed = store.read_batch(&slots)?;
        if sealed.len() != slots.len() {
            return Err(OramError::Protocol(format!(
                "store returned {} blocks for a {}-slot scan",
                sealed.len(),
                slots.len()
            )));
        }

        let mut blocks = Vec::with_capacity(sealed.len());
        for block in &sealed {
            blocks.push(open_trivial_block(crypto, block, self.block_size)?);
        }

        let mut result = Vec::new();
        let mut found = false;
        for block in blocks.iter_mut() {
            if block.address == address {
                found = true;
                result = apply_request(&mut block.data, &request);
            }
        }
        if !found {
            match request {
                // A read of a never-written address yields empty data.
                Request::Read => {}
                // A first write claims a dummy slot.
                Request::Write(_) | Request::UpdatePosition { .. } => {
                    let slot = blocks
                        .iter_mut()
                        .find(|block| block.is_dummy())
                        .ok_or_else(|| {
                            OramError::Protocol("no free slot for a new block".to_string())
                        })?;
                    slot.address = address;
                    apply_request(&mut slot.data, &request);
                }
            }
        }

        // Every block is re-sealed under a fresh IV, including untouched
        // ones, so the server cannot tell which block the access targeted.
        let mut resealed = Vec::with_capacity(blocks.len());
        for block in &blocks {
            resealed.push(seal_trivial_block(crypto, block, self.block_size)?);
        }
        store.write_batch(&slots, resealed)?;

        Ok(result)
    }
}
