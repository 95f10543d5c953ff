// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! An implementation of Path ORAM.

use crate::{
    block::{open_path_block, seal_path_block, Block, DUMMY_ADDRESS},
    crypto::Crypto,
    planner::{tree_levels, LevelPlan},
    position_map::PositionMap,
    recursive::{apply_request, Engine, Request},
    store::BlockStore,
    utils::{permute, CompleteBinaryTreeIndex, TreeHeight},
    Address, BucketSize, OramError, Position,
};
use rand::{CryptoRng, RngCore};

/// Externally observable stash-size statistics of a Path ORAM level.
///
/// These are metrics, not protocol state: they exist so that callers and
/// tests can watch the stash stay bounded, and have no effect on accesses.
#[derive(Clone, Copy, Debug, Default)]
pub struct StashMetrics {
    /// Peak stash occupancy, including blocks in flight during an access.
    pub max_stash_size: usize,
    /// Peak stash occupancy measured between accesses, after eviction.
    pub max_stash_size_between_accesses: usize,
}

#[derive(Debug)]
struct StashEntry {
    block: Block,
    leaf: Position,
}

/// A tree-structured ORAM with a client-side stash.
///
/// The server stores one bucket of `bucket_size` encrypted blocks per tree
/// node. Every access reads the full path from the root to the accessed
/// block's leaf (always `levels * bucket_size` blocks), re-randomizes the
/// block's leaf, and writes the same path back with blocks greedily evicted
/// from the stash as deep as their leaves allow. With bucket size 4 the
/// stash stays within a small multiple of `log2(capacity)` with
/// overwhelming probability (see the original Path ORAM paper,
/// <https://eprint.iacr.org/2013/280.pdf>, Figure 3).
#[derive(Debug)]
pub struct PathOram {
    offset: Address,
    capacity: Address,
    bucket_size: BucketSize,
    /// Depth of the leaves; the tree has `height + 1` bucket levels.
    height: TreeHeight,
    block_size: usize,
    stash: Vec<StashEntry>,
    map: PositionMap,
    metrics: StashMetrics,
}

impl PathOram {
    pub(crate) fn new(plan: &LevelPlan, map: PositionMap) -> Self {
        log::info!("PathOram::new(capacity = {})", plan.capacity);
        Self {
            offset: plan.offset,
            capacity: plan.capacity,
            bucket_size: plan.bucket_size,
            height: tree_levels(plan.capacity) - 1,
            block_size: plan.block_size,
            stash: Vec::new(),
            map,
            metrics: StashMetrics::default(),
        }
    }

    /// Draws a uniformly random leaf for every address of the level.
    pub(crate) fn assign_positions<R: RngCore + CryptoRng>(
        plan: &LevelPlan,
        rng: &mut R,
    ) -> Vec<Position> {
        let height = tree_levels(plan.capacity) - 1;
        (0..plan.capacity)
            .map(|_| Position::random_leaf(height, rng))
            .collect()
    }

    /// Observable stash statistics for this level.
    pub fn metrics(&self) -> StashMetrics {
        self.metrics
    }

    fn bucket_slots(&self, node: Position) -> Vec<Address> {
        let bucket_size = self.bucket_size as Address;
        let base = self.offset + (node - 1) * bucket_size;
        (base..base + bucket_size).collect()
    }

    /// Removes up to `bucket_size` stash entries whose leaf passes through
    /// `node` at `depth`, pads with dummies, permutes, and seals the bucket.
    fn fill_bucket<C: Crypto, R: RngCore + CryptoRng>(
        &mut self,
        crypto: &C,
        rng: &mut R,
        node: Position,
        depth: TreeHeight,
    ) -> Result<Vec<crate::block::EncryptedBlock>, OramError> {
        let mut bucket: Vec<(Block, Position)> = Vec::with_capacity(self.bucket_size);
        let mut index = 0;
        while index < self.stash.len() && bucket.len() < self.bucket_size {
            if self.stash[index].leaf.node_on_path(depth, self.height) == node {
                let entry = self.stash.swap_remove(index);
                bucket.push((entry.block, entry.leaf));
            } else {
                index += 1;
            }
        }
        while bucket.len() < self.bucket_size {
            bucket.push((Block::dummy(), 0));
        }
        permute(&mut bucket, rng);

        bucket
            .iter()
            .map(|(block, leaf)| seal_path_block(crypto, block, *leaf, self.block_size))
            .collect()
    }

    /// Places the initial blocks into the tree bottom-up: each bucket takes
    /// up to `bucket_size` pending blocks whose leaf lies in its subtree and
    /// is padded to a full, permuted, freshly encrypted bucket, so the
    /// server-visible write pattern is independent of the data distribution.
    pub(crate) fn setup<S: BlockStore, C: Crypto, R: RngCore + CryptoRng>(
        &mut self,
        store: &mut S,
        crypto: &C,
        rng: &mut R,
        blocks: Vec<Block>,
        positions: &[Position],
    ) -> Result<(), OramError> {
        for block in blocks {
            if block.address == DUMMY_ADDRESS || block.address > self.capacity {
                return Err(OramError::AddressOutOfBounds);
            }
            let leaf = positions[(block.address - 1) as usize];
            self.stash.push(StashEntry { block, leaf });
        }
        self.metrics.max_stash_size = self.metrics.max_stash_size.max(self.stash.len());

        for depth in (0..=self.height).rev() {
            for node in 2u32.pow(depth)..2u32.pow(depth + 1) {
                let sealed = self.fill_bucket(crypto, rng, node, depth)?;
                store.write_batch(&self.bucket_slots(node), sealed)?;
            }
        }

        self.metrics.max_stash_size_between_accesses = self
            .metrics
            .max_stash_size_between_accesses
            .max(self.stash.len());
        Ok(())
    }

    pub(crate) fn access<S: BlockStore, C: Crypto, R: RngCore + CryptoRng>(
        &mut self,
        inner: &mut [Engine],
        store: &mut S,
        crypto: &C,
        rng: &mut R,
        address: Address,
        request: Request<'_>,
    ) -> Result<Vec<u8>, OramError> {
        if address == DUMMY_ADDRESS || address > self.capacity {
            return Err(OramError::AddressOutOfBounds);
        }

        // The leaf must change on every access, before the path is even
        // read, so that repeated accesses to one address are unlinkable.
        let new_leaf = Position::random_leaf(self.height, rng);
        let old_leaf = self
            .map
            .replace(inner, store, crypto, rng, address, new_leaf)?;
        assert!(old_leaf.is_leaf(self.height));

        // One batch read of the whole old path.
        let mut path_slots = Vec::with_capacity((self.height as usize + 1) * self.bucket_size);
        for depth in 0..=self.height {
            path_slots.extend(self.bucket_slots(old_leaf.node_on_path(depth, self.height)));
        }
        let sealed = store.read_batch(&path_slots)?;
        if sealed.len() != path_slots.len() {
            return Err(OramError::Protocol(format!(
                "store returned {} blocks for a {}-slot path",
                sealed.len(),
                path_slots.len()
            )));
        }
        for sealed_block in &sealed {
            let (block, leaf) = open_path_block(crypto, sealed_block, self.block_size)?;
            if !block.is_dummy() {
                self.stash.push(StashEntry { block, leaf });
            }
        }
        self.metrics.max_stash_size = self.metrics.max_stash_size.max(self.stash.len());

        let mut result = Vec::new();
        let mut found = false;
        for entry in self.stash.iter_mut() {
            if entry.block.address == address {
                found = true;
                entry.leaf = new_leaf;
                result = apply_request(&mut entry.block.data, &request);
            }
        }
        if !found {
            match request {
                // A read of a never-written address yields empty data.
                Request::Read => {}
                Request::Write(_) | Request::UpdatePosition { .. } => {
                    let mut block = Block::new(address, Vec::new());
                    apply_request(&mut block.data, &request);
                    self.stash.push(StashEntry {
                        block,
                        leaf: new_leaf,
                    });
                }
            }
        }

        // Evict from the leaf level up, then write the path back in one batch.
        let mut write_slots = Vec::with_capacity(path_slots.len());
        let mut write_blocks = Vec::with_capacity(path_slots.len());
        for depth in (0..=self.height).rev() {
            let node = old_leaf.node_on_path(depth, self.height);
            write_slots.extend(self.bucket_slots(node));
            write_blocks.extend(self.fill_bucket(crypto, rng, node, depth)?);
        }
        store.write_batch(&write_slots, write_blocks)?;

        self.metrics.max_stash_size_between_accesses = self
            .metrics
            .max_stash_size_between_accesses
            .max(self.stash.len());

        Ok(result)
    }
}
