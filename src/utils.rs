// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Utilities.

use crate::Position;
use rand::seq::SliceRandom;
use rand::{CryptoRng, Rng, RngCore};

pub(crate) type TreeHeight = u32;

pub(crate) trait CompleteBinaryTreeIndex
where
    Self: Sized,
{
    fn node_on_path(&self, depth: TreeHeight, height: TreeHeight) -> Self;
    fn random_leaf<R: RngCore + CryptoRng>(tree_height: TreeHeight, rng: &mut R) -> Self;
    fn depth(&self) -> TreeHeight;
    fn is_leaf(&self, height: TreeHeight) -> bool;
}

impl CompleteBinaryTreeIndex for Position {
    // A tree index can have any nonzero value; the root is 1.
    fn node_on_path(&self, depth: TreeHeight, height: TreeHeight) -> Self {
        // We maintain the invariant that all tree index values are nonzero.
        assert_ne!(*self, 0);
        // We only call this method when the receiver is a leaf.
        assert!(self.is_leaf(height));

        let shift = height - depth;
        self >> shift
    }

    fn random_leaf<R: RngCore + CryptoRng>(tree_height: TreeHeight, rng: &mut R) -> Self {
        let result = 2u32.pow(tree_height) + rng.gen_range(0..2u32.pow(tree_height));
        // The value we've just generated is at least the first summand, which is at least 1.
        assert_ne!(result, 0);
        result
    }

    fn depth(&self) -> TreeHeight {
        // We maintain the invariant that all tree index values are nonzero.
        assert_ne!(*self, 0);

        let index_bitlength = 32;
        index_bitlength - self.leading_zeros() - 1
    }

    fn is_leaf(&self, height: TreeHeight) -> bool {
        // We maintain the invariant that all tree index values are nonzero.
        assert_ne!(*self, 0);

        self.depth() == height
    }
}

/// Uniformly permutes `items` in place. This is the shuffling primitive used
/// everywhere a bucket or stash is re-ordered before being written out.
pub(crate) fn permute<T, R: RngCore + CryptoRng>(items: &mut [T], rng: &mut R) {
    items.shuffle(rng);
}

/// Draws a uniformly random slot in `0..bound` that is not in `excluded`.
/// The caller guarantees `excluded` does not cover the whole range.
pub(crate) fn random_slot_excluding<R: RngCore + CryptoRng>(
    bound: Position,
    excluded: &[Position],
    rng: &mut R,
) -> Position {
    loop {
        let candidate = rng.gen_range(0..bound);
        if !excluded.contains(&candidate) {
            return candidate;
        }
    }
}

/// Draws `count` distinct uniformly random slots in `0..bound`.
pub(crate) fn sample_distinct_slots<R: RngCore + CryptoRng>(
    bound: Position,
    count: usize,
    rng: &mut R,
) -> Vec<Position> {
    let mut slots: Vec<Position> = Vec::with_capacity(count);
    while slots.len() < count {
        let candidate = random_slot_excluding(bound, &slots, rng);
        slots.push(candidate);
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use static_assertions::const_assert_eq;
    use std::mem::size_of;

    #[test]
    fn check_size_of_tree_index() {
        const_assert_eq!(size_of::<Position>(), 4);
    }

    #[test]
    fn random_leaves_are_leaves() {
        let mut rng = StdRng::seed_from_u64(0);
        for height in 0..8 {
            for _ in 0..16 {
                let leaf = Position::random_leaf(height, &mut rng);
                assert!(leaf.is_leaf(height));
                assert_eq!(leaf.depth(), height);
            }
        }
    }

    #[test]
    fn path_from_leaf_to_root() {
        let height = 3;
        let leaf: Position = 0b1101;
        let path: Vec<Position> = (0..=height).map(|d| leaf.node_on_path(d, height)).collect();
        assert_eq!(path, vec![0b1, 0b11, 0b110, 0b1101]);
    }

    #[test]
    fn permutation_preserves_elements() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut items: Vec<u32> = (0..128).collect();
        permute(&mut items, &mut rng);
        let mut sorted = items.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..128).collect::<Vec<u32>>());
    }

    #[test]
    fn distinct_slot_samples() {
        let mut rng = StdRng::seed_from_u64(0);
        let slots = sample_distinct_slots(16, 16, &mut rng);
        let mut sorted = slots.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 16);
    }

    #[test]
    fn excluded_slots_are_never_drawn() {
        let mut rng = StdRng::seed_from_u64(0);
        let excluded = vec![0, 1, 2];
        for _ in 0..64 {
            let slot = random_slot_excluding(4, &excluded, &mut rng);
            assert_eq!(slot, 3);
        }
    }
}
