// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Sizing of recursive ORAM layouts: per-level capacities, server
//! footprints, and disjoint slot offsets within one shared store.

use crate::{block::FIELD_BYTES, position_map, Address, BucketSize, OramError};

/// The parameter "Z" from the Path ORAM literature that sets the number of blocks per bucket; typical values are 3 or 4.
/// Here we adopt the more conservative setting of 4.
pub const DEFAULT_BUCKET_SIZE: BucketSize = 4;

/// The default number of position-map entries stored per page block.
pub const DEFAULT_POSITIONS_PER_BLOCK: usize = 8;

/// The access strategy of one ORAM level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OramKind {
    /// Tree-based eviction with a client-side stash.
    Path,
    /// Matrix-based swap-partner scheduling with lookahead maintenance.
    Lookahead,
    /// Full-scan baseline; needs no position map, so it terminates recursion.
    Trivial,
}

/// The geometry of one ORAM level.
#[derive(Clone, Debug)]
pub struct LevelPlan {
    /// The access strategy of this level.
    pub kind: OramKind,
    /// Logical addresses served by this level, `1..=capacity`.
    pub capacity: Address,
    /// Data bytes per block at this level.
    pub block_size: usize,
    /// First slot of this level in the shared store address space.
    pub offset: Address,
    /// Number of store slots occupied by this level.
    pub footprint: Address,
    /// Blocks per bucket (Path levels).
    pub bucket_size: BucketSize,
    /// Matrix height (Lookahead levels).
    pub matrix_height: u32,
}

/// A complete recursive layout: one plan per level, outermost first.
#[derive(Clone, Debug)]
pub struct Layout {
    /// Per-level plans, outermost first.
    pub levels: Vec<LevelPlan>,
    /// Position-map entries per page block, shared by all levels.
    pub positions_per_block: usize,
    /// Total store slots across all levels.
    pub total_slots: Address,
}

/// `ceil(log2(capacity))`, at least 1: the number of bucket levels in a
/// Path ORAM tree serving `capacity` addresses.
pub(crate) fn tree_levels(capacity: Address) -> u32 {
    capacity.next_power_of_two().ilog2().max(1)
}

/// The smallest matrix height whose square covers `capacity` addresses.
pub(crate) fn matrix_height_for(capacity: Address) -> u32 {
    let mut height = (f64::from(capacity)).sqrt() as u32;
    while u64::from(height) * u64::from(height) < u64::from(capacity) {
        height += 1;
    }
    while height > 1 && u64::from(height - 1) * u64::from(height - 1) >= u64::from(capacity) {
        height -= 1;
    }
    height
}

fn level_footprint(
    kind: OramKind,
    capacity: Address,
    bucket_size: BucketSize,
) -> Result<Address, OramError> {
    let footprint: u64 = match kind {
        // One bucket per tree node. For power-of-two capacities this is
        // (capacity - 1) * bucket_size.
        OramKind::Path => {
            let nodes = 2u64.pow(tree_levels(capacity)) - 1;
            nodes * bucket_size as u64
        }
        // The matrix plus one access-stash row and one swap-stash row.
        OramKind::Lookahead => {
            let height = u64::from(matrix_height_for(capacity));
            height * height + 2 * height
        }
        OramKind::Trivial => u64::from(capacity) + 1,
    };
    Ok(footprint.try_into()?)
}

impl Layout {
    /// Plans a layout with the default bucket size and page capacity.
    ///
    /// `kinds` lists the access strategy per level, outermost first; the
    /// outermost level serves `capacity` addresses of `block_size` bytes, and
    /// each inner level stores the position-map pages of the level before it.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidConfiguration` error for an empty `kinds`, a zero
    /// capacity, or a `Trivial` level that is not last.
    pub fn new(
        kinds: &[OramKind],
        capacity: Address,
        block_size: usize,
    ) -> Result<Self, OramError> {
        Self::with_parameters(
            kinds,
            capacity,
            block_size,
            DEFAULT_BUCKET_SIZE,
            DEFAULT_POSITIONS_PER_BLOCK,
        )
    }

    /// Plans a layout with explicit bucket size and page capacity.
    ///
    /// See [`Layout::new`]. Additionally requires `bucket_size >= 2` and
    /// `positions_per_block >= 2` (a one-entry page would never shrink the
    /// recursion), and a Lookahead level capacity of at least 2.
    pub fn with_parameters(
        kinds: &[OramKind],
        capacity: Address,
        block_size: usize,
        bucket_size: BucketSize,
        positions_per_block: usize,
    ) -> Result<Self, OramError> {
        if kinds.is_empty() {
            return Err(OramError::InvalidConfiguration(
                "a layout needs at least one level".to_string(),
            ));
        }
        if capacity == 0 {
            return Err(OramError::InvalidConfiguration(
                "capacity must be at least 1".to_string(),
            ));
        }
        if bucket_size < 2 {
            return Err(OramError::InvalidConfiguration(
                "bucket size must be at least 2".to_string(),
            ));
        }
        if positions_per_block < 2 {
            return Err(OramError::InvalidConfiguration(
                "positions per block must be at least 2".to_string(),
            ));
        }

        let mut levels = Vec::with_capacity(kinds.len());
        let mut level_capacity = capacity;
        let mut offset: Address = 0;
        for (depth, kind) in kinds.iter().copied().enumerate() {
            let last = depth + 1 == kinds.len();
            if kind == OramKind::Trivial && !last {
                return Err(OramError::InvalidConfiguration(
                    "a trivial level stores no position map, so no level may follow it"
                        .to_string(),
                ));
            }
            if kind == OramKind::Lookahead && level_capacity < 2 {
                return Err(OramError::InvalidConfiguration(
                    "a lookahead level needs a capacity of at least 2".to_string(),
                ));
            }
            let level_block_size = if depth == 0 {
                block_size
            } else {
                positions_per_block * FIELD_BYTES
            };
            let footprint = level_footprint(kind, level_capacity, bucket_size)?;
            levels.push(LevelPlan {
                kind,
                capacity: level_capacity,
                block_size: level_block_size,
                offset,
                footprint,
                bucket_size,
                matrix_height: matrix_height_for(level_capacity),
            });
            offset = offset
                .checked_add(footprint)
                .ok_or_else(|| {
                    OramError::InvalidConfiguration("layout exceeds the address space".to_string())
                })?;
            level_capacity = position_map::page_count(level_capacity, positions_per_block);
        }

        Ok(Self {
            levels,
            positions_per_block,
            total_slots: offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_levels_match_the_path_geometry() {
        assert_eq!(tree_levels(1), 1);
        assert_eq!(tree_levels(2), 1);
        assert_eq!(tree_levels(4), 2);
        assert_eq!(tree_levels(15), 4);
        assert_eq!(tree_levels(16), 4);
        assert_eq!(tree_levels(17), 5);
    }

    #[test]
    fn matrix_heights_cover_the_capacity() {
        assert_eq!(matrix_height_for(1), 1);
        assert_eq!(matrix_height_for(2), 2);
        assert_eq!(matrix_height_for(4), 2);
        assert_eq!(matrix_height_for(5), 3);
        assert_eq!(matrix_height_for(64), 8);
        assert_eq!(matrix_height_for(65), 9);
    }

    #[test]
    fn footprints_per_kind() {
        let layout = Layout::new(&[OramKind::Path], 16, 32).unwrap();
        // 15 buckets of 4 blocks.
        assert_eq!(layout.levels[0].footprint, 60);

        let layout = Layout::new(&[OramKind::Lookahead], 64, 32).unwrap();
        // 64 matrix cells plus two stash rows of 8.
        assert_eq!(layout.levels[0].footprint, 80);

        let layout = Layout::new(&[OramKind::Trivial], 8, 32).unwrap();
        assert_eq!(layout.levels[0].footprint, 9);
    }

    #[test]
    fn offsets_are_disjoint_prefix_sums() {
        let layout = Layout::with_parameters(
            &[OramKind::Path, OramKind::Path, OramKind::Trivial],
            64,
            32,
            4,
            4,
        )
        .unwrap();
        assert_eq!(layout.levels.len(), 3);
        assert_eq!(layout.levels[0].capacity, 64);
        assert_eq!(layout.levels[1].capacity, 16);
        assert_eq!(layout.levels[2].capacity, 4);
        assert_eq!(layout.levels[0].offset, 0);
        for pair in layout.levels.windows(2) {
            assert_eq!(pair[1].offset, pair[0].offset + pair[0].footprint);
        }
        let last = layout.levels.last().unwrap();
        assert_eq!(layout.total_slots, last.offset + last.footprint);
    }

    #[test]
    fn inner_levels_hold_page_blocks() {
        let layout =
            Layout::with_parameters(&[OramKind::Path, OramKind::Trivial], 64, 128, 4, 8).unwrap();
        assert_eq!(layout.levels[0].block_size, 128);
        assert_eq!(layout.levels[1].block_size, 32);
    }

    #[test]
    fn trivial_must_be_last() {
        assert!(matches!(
            Layout::new(&[OramKind::Trivial, OramKind::Path], 16, 32),
            Err(OramError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn rejects_degenerate_parameters() {
        assert!(Layout::new(&[], 16, 32).is_err());
        assert!(Layout::new(&[OramKind::Path], 0, 32).is_err());
        assert!(Layout::with_parameters(&[OramKind::Path], 16, 32, 1, 8).is_err());
        assert!(Layout::with_parameters(&[OramKind::Path], 16, 32, 4, 1).is_err());
    }
}
