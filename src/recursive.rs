// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Recursive composition of ORAM levels, and the client session façade.

use crate::{
    block::{Block, DUMMY_ADDRESS},
    crypto::Crypto,
    lookahead_oram::LookaheadOram,
    path_oram::{PathOram, StashMetrics},
    planner::{Layout, OramKind},
    position_map::{self, PositionMap},
    store::BlockStore,
    trivial_oram::TrivialOram,
    Address, Operation, OramError, Position,
};
use rand::{CryptoRng, RngCore};
use std::time::Duration;

/// What an access should do once the target block is in hand.
///
/// `UpdatePosition` exists for the recursive composition: an outer level
/// updating one entry of a delegated position map sends the changed entry
/// down, and the level storing the page merges it into the decoded page
/// before re-encoding, rather than replacing the page outright.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Request<'a> {
    Read,
    Write(&'a [u8]),
    UpdatePosition { entry: usize, position: Position },
}

/// Applies `request` to a located block's data, returning the previous data.
pub(crate) fn apply_request(data: &mut Vec<u8>, request: &Request<'_>) -> Vec<u8> {
    let previous = data.clone();
    match request {
        Request::Read => {}
        Request::Write(new_data) => *data = new_data.to_vec(),
        Request::UpdatePosition { entry, position } => {
            position_map::set_entry_in_page(data, *entry, *position);
        }
    }
    previous
}

/// One ORAM level, dispatched by access strategy. The variant is selected by
/// the [`Layout`] at construction time.
#[derive(Debug)]
pub(crate) enum Engine {
    Path(PathOram),
    Lookahead(LookaheadOram),
    Trivial(TrivialOram),
}

/// Runs one access against `levels[0]`, with `levels[1..]` available for
/// delegated position-map traffic. Each level that delegates its map recurses
/// here with its tail, so ownership stays linear: a level never holds a
/// reference to its inner levels outside the duration of one access.
pub(crate) fn access_level<S: BlockStore, C: Crypto, R: RngCore + CryptoRng>(
    levels: &mut [Engine],
    store: &mut S,
    crypto: &C,
    rng: &mut R,
    address: Address,
    request: Request<'_>,
) -> Result<Vec<u8>, OramError> {
    let (level, inner) = levels.split_first_mut().ok_or_else(|| {
        OramError::Protocol("a position-map access recursed below the innermost level".to_string())
    })?;
    match level {
        Engine::Path(oram) => oram.access(inner, store, crypto, rng, address, request),
        Engine::Lookahead(oram) => oram.access(inner, store, crypto, rng, address, request),
        Engine::Trivial(oram) => oram.access(inner, store, crypto, rng, address, request),
    }
}

/// A live ORAM session: a recursive chain of levels sharing one block store.
///
/// Accesses are strictly sequential; one access fully completes, including
/// all nested position-map sub-accesses and maintenance, before the next
/// begins. After any error the session must be discarded.
#[derive(Debug)]
pub struct OramSession<S, C> {
    levels: Vec<Engine>,
    store: S,
    crypto: C,
    capacity: Address,
    block_size: usize,
}

impl<S: BlockStore, C: Crypto> OramSession<S, C> {
    /// Builds a session over `store` with every address initially empty.
    pub fn new<R: RngCore + CryptoRng>(
        layout: &Layout,
        store: S,
        crypto: C,
        rng: &mut R,
    ) -> Result<Self, OramError> {
        Self::with_blocks(layout, store, crypto, rng, Vec::new())
    }

    /// Builds a session over `store`, preloading `blocks`.
    ///
    /// Levels are set up outermost first: each level scatters its blocks over
    /// its own slot range, and its freshly assigned position map becomes the
    /// initial blocks of the next level in, as fixed-capacity pages. The
    /// innermost level keeps its map in client memory (or, for Trivial ORAM,
    /// needs none).
    pub fn with_blocks<R: RngCore + CryptoRng>(
        layout: &Layout,
        mut store: S,
        crypto: C,
        rng: &mut R,
        blocks: Vec<Block>,
    ) -> Result<Self, OramError> {
        let Some(outer) = layout.levels.first() else {
            return Err(OramError::InvalidConfiguration(
                "a layout needs at least one level".to_string(),
            ));
        };
        let capacity = outer.capacity;
        let block_size = outer.block_size;

        let mut levels = Vec::with_capacity(layout.levels.len());
        let mut level_blocks = blocks;
        for (depth, plan) in layout.levels.iter().enumerate() {
            let delegated = depth + 1 < layout.levels.len();
            let delegated_map = PositionMap::Delegated {
                positions_per_block: layout.positions_per_block,
            };
            match plan.kind {
                OramKind::Path => {
                    let positions = PathOram::assign_positions(plan, rng);
                    let map = if delegated {
                        delegated_map
                    } else {
                        PositionMap::Local(positions.clone())
                    };
                    let mut oram = PathOram::new(plan, map);
                    oram.setup(&mut store, &crypto, rng, level_blocks, &positions)?;
                    level_blocks = if delegated {
                        position_map::pages_as_blocks(&positions, layout.positions_per_block)
                    } else {
                        Vec::new()
                    };
                    levels.push(Engine::Path(oram));
                }
                OramKind::Lookahead => {
                    let positions = LookaheadOram::assign_positions(plan, rng);
                    let map = if delegated {
                        delegated_map
                    } else {
                        PositionMap::Local(positions.clone())
                    };
                    let mut oram = LookaheadOram::new(plan, map);
                    oram.setup(&mut store, &crypto, rng, level_blocks, &positions)?;
                    level_blocks = if delegated {
                        position_map::pages_as_blocks(&positions, layout.positions_per_block)
                    } else {
                        Vec::new()
                    };
                    levels.push(Engine::Lookahead(oram));
                }
                OramKind::Trivial => {
                    let mut oram = TrivialOram::new(plan);
                    oram.setup(&mut store, &crypto, level_blocks)?;
                    level_blocks = Vec::new();
                    levels.push(Engine::Trivial(oram));
                }
            }
        }

        Ok(Self {
            levels,
            store,
            crypto,
            capacity,
            block_size,
        })
    }

    /// The number of logical addresses, `1..=capacity`.
    pub fn capacity(&self) -> Address {
        self.capacity
    }

    /// Performs one oblivious access.
    ///
    /// For [`Operation::Write`], `data` must be present and at most the
    /// outermost block size. Returns the data previously stored at
    /// `address` (empty for a never-written address).
    pub fn access<R: RngCore + CryptoRng>(
        &mut self,
        op: Operation,
        address: Address,
        data: Option<&[u8]>,
        rng: &mut R,
    ) -> Result<Vec<u8>, OramError> {
        if address == DUMMY_ADDRESS || address > self.capacity {
            return Err(OramError::AddressOutOfBounds);
        }
        let request = match op {
            Operation::Read => Request::Read,
            Operation::Write => {
                let data = data.ok_or_else(|| {
                    OramError::InvalidConfiguration("a write access needs data".to_string())
                })?;
                if data.len() > self.block_size {
                    return Err(OramError::InvalidConfiguration(format!(
                        "data length {} exceeds the block size {}",
                        data.len(),
                        self.block_size
                    )));
                }
                Request::Write(data)
            }
        };
        access_level(
            &mut self.levels,
            &mut self.store,
            &self.crypto,
            rng,
            address,
            request,
        )
    }

    /// Obliviously reads the data stored at `address`.
    pub fn read<R: RngCore + CryptoRng>(
        &mut self,
        address: Address,
        rng: &mut R,
    ) -> Result<Vec<u8>, OramError> {
        self.access(Operation::Read, address, None, rng)
    }

    /// Obliviously writes `data` at `address`, returning the previous data.
    pub fn write<R: RngCore + CryptoRng>(
        &mut self,
        address: Address,
        data: &[u8],
        rng: &mut R,
    ) -> Result<Vec<u8>, OramError> {
        self.access(Operation::Write, address, Some(data), rng)
    }

    /// The stash metrics of every Path ORAM level, outermost first.
    pub fn stash_metrics(&self) -> Vec<StashMetrics> {
        self.levels
            .iter()
            .filter_map(|level| match level {
                Engine::Path(oram) => Some(oram.metrics()),
                _ => None,
            })
            .collect()
    }

    /// Shared access to the block store, e.g. for instrumentation.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Measures the store round-trip time.
    pub fn speed_test(&mut self) -> Result<Duration, OramError> {
        self.store.speed_test()
    }

    /// Ends the session, telling the server to wipe its storage.
    /// Returns the store.
    pub fn end_session(mut self) -> Result<S, OramError> {
        self.store.send_end_signal()?;
        Ok(self.store)
    }
}
