// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! An implementation of Lookahead ORAM: a matrix-structured ORAM with
//! scheduled swap partners and per-column lookahead maintenance.

use crate::{
    block::{seal_lookahead_block, open_lookahead_block, Block, EncryptedBlock, Index, DUMMY_ADDRESS},
    crypto::Crypto,
    planner::LevelPlan,
    position_map::PositionMap,
    recursive::{apply_request, Engine, Request},
    store::BlockStore,
    utils::{permute, random_slot_excluding, sample_distinct_slots},
    Address, OramError, Position,
};
use rand::{CryptoRng, RngCore};

/// A matrix cell pre-selected to be pulled into the swap stash, and the
/// access round at which it will be consumed as a swap partner.
#[derive(Clone, Copy, Debug)]
struct SwapPartner {
    index: Index,
    scheduled_round: u64,
}

/// Where the accessed block was found during an access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Location {
    Matrix,
    AccessStash(usize),
    SwapStash(usize),
}

/// A matrix-structured ORAM.
///
/// The server holds a `matrix_height²` cell matrix plus two stash rows of
/// `matrix_height` cells each: the access stash (blocks displaced from the
/// matrix, waiting to migrate back into their home cells) and the swap stash
/// (blocks pre-fetched to serve as future swap partners). Every access reads
/// one matrix column, both stash rows, and possibly the accessed cell, for
/// a total of `3·matrix_height` or `3·matrix_height + 1` blocks; it swaps
/// the accessed block with the swap partner scheduled for this round and runs
/// the maintenance job for the current column. Columns are maintained
/// round-robin, so each cell's traffic is independent of the access pattern.
///
/// Client state between accesses is only the position map (possibly
/// delegated to the inner levels), the pending swap-partner schedule, and
/// the access counter; both stashes are authoritative on the server and
/// re-read every access.
#[derive(Debug)]
pub struct LookaheadOram {
    offset: Address,
    capacity: Address,
    matrix_height: u32,
    block_size: usize,
    access_counter: u64,
    scheduled: Vec<SwapPartner>,
    map: PositionMap,
}

impl LookaheadOram {
    pub(crate) fn new(plan: &LevelPlan, map: PositionMap) -> Self {
        log::info!(
            "LookaheadOram::new(capacity = {}, matrix height = {})",
            plan.capacity,
            plan.matrix_height
        );
        Self {
            offset: plan.offset,
            capacity: plan.capacity,
            matrix_height: plan.matrix_height,
            block_size: plan.block_size,
            access_counter: 0,
            scheduled: Vec::new(),
            map,
        }
    }

    /// Assigns each address a uniformly random distinct matrix cell.
    pub(crate) fn assign_positions<R: RngCore + CryptoRng>(
        plan: &LevelPlan,
        rng: &mut R,
    ) -> Vec<Position> {
        let cells = plan.matrix_height * plan.matrix_height;
        let mut slots: Vec<Position> = (0..cells).collect();
        permute(&mut slots, rng);
        slots.truncate(plan.capacity as usize);
        slots
    }

    fn cell_count(&self) -> Position {
        self.matrix_height * self.matrix_height
    }

    fn matrix_slot(&self, index: Index) -> Address {
        self.offset + index.flat(self.matrix_height)
    }

    fn access_stash_slot(&self, i: u32) -> Address {
        self.offset + self.cell_count() + i
    }

    fn swap_stash_slot(&self, i: u32) -> Address {
        self.offset + self.cell_count() + self.matrix_height + i
    }

    fn seal_swap_entry<C: Crypto>(
        &self,
        crypto: &C,
        entry: &Option<(Block, Index)>,
    ) -> Result<EncryptedBlock, OramError> {
        match entry {
            Some((block, binding)) => {
                seal_lookahead_block(crypto, block, *binding, self.block_size)
            }
            None => seal_lookahead_block(crypto, &Block::dummy(), Index::NONE, self.block_size),
        }
    }

    /// Materializes every address in the matrix, pulls the initial swap
    /// partners into the swap stash, and writes the whole footprint: matrix,
    /// empty access stash, and swap stash.
    pub(crate) fn setup<S: BlockStore, C: Crypto, R: RngCore + CryptoRng>(
        &mut self,
        store: &mut S,
        crypto: &C,
        rng: &mut R,
        blocks: Vec<Block>,
        positions: &[Position],
    ) -> Result<(), OramError> {
        let m = self.matrix_height;
        let cells = self.cell_count();

        // Every address gets a cell, so lookups never miss; cells beyond the
        // capacity hold true dummies.
        let mut matrix: Vec<Block> = vec![Block::dummy(); cells as usize];
        for address in 1..=self.capacity {
            matrix[positions[(address - 1) as usize] as usize] = Block::new(address, Vec::new());
        }
        for block in blocks {
            if block.address == DUMMY_ADDRESS || block.address > self.capacity {
                return Err(OramError::AddressOutOfBounds);
            }
            let dest = positions[(block.address - 1) as usize] as usize;
            matrix[dest] = block;
        }

        // The initial swap partners for rounds 0..m are pulled out of the
        // matrix rather than written to it.
        let mut swap_stash: Vec<Option<(Block, Index)>> = Vec::with_capacity(m as usize);
        for slot in sample_distinct_slots(cells, m as usize, rng) {
            let index = Index::from_flat(slot, m);
            swap_stash.push(Some((std::mem::take(&mut matrix[slot as usize]), index)));
        }

        let mut slots = Vec::with_capacity((cells + 2 * m) as usize);
        let mut sealed = Vec::with_capacity((cells + 2 * m) as usize);
        for (slot, block) in matrix.iter().enumerate() {
            let index = Index::from_flat(slot as Position, m);
            slots.push(self.matrix_slot(index));
            sealed.push(seal_lookahead_block(crypto, block, index, self.block_size)?);
        }
        for i in 0..m {
            slots.push(self.access_stash_slot(i));
            sealed.push(self.seal_swap_entry(crypto, &None)?);
        }
        for (i, entry) in swap_stash.iter().enumerate() {
            slots.push(self.swap_stash_slot(i as u32));
            sealed.push(self.seal_swap_entry(crypto, entry)?);
        }
        store.write_batch(&slots, sealed)?;

        self.scheduled.clear();
        self.access_counter = 0;
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
        let m = self.matrix_height;
        let m_us = m as usize;
        let column = (self.access_counter % u64::from(m)) as u32;

        // Resolve the target cell; one sub-access when the map is delegated.
        let slot = self.map.read(inner, store, crypto, rng, address)?;
        if slot >= self.cell_count() {
            return Err(OramError::Protocol(format!(
                "position map entry {slot} lies outside the matrix"
            )));
        }
        let target = Index::from_flat(slot, m);
        let target_in_column = target.col == column;

        // One batch read with a data-independent shape: the maintenance
        // column, both stash rows, and the target cell if not already
        // covered by the column.
        let mut read_slots = Vec::with_capacity(3 * m_us + 1);
        for row in 0..m {
            read_slots.push(self.matrix_slot(Index { row, col: column }));
        }
        for i in 0..m {
            read_slots.push(self.access_stash_slot(i));
        }
        for i in 0..m {
            read_slots.push(self.swap_stash_slot(i));
        }
        if !target_in_column {
            read_slots.push(self.matrix_slot(target));
        }
        let sealed = store.read_batch(&read_slots)?;
        if sealed.len() != read_slots.len() {
            return Err(OramError::Protocol(format!(
                "store returned {} blocks for a {}-slot read",
                sealed.len(),
                read_slots.len()
            )));
        }

        let mut matrix_column: Vec<Block> = Vec::with_capacity(m_us);
        for cell in &sealed[..m_us] {
            matrix_column.push(open_lookahead_block(crypto, cell, self.block_size)?.0);
        }
        let mut access_stash: Vec<(Block, Index)> = Vec::with_capacity(m_us);
        for cell in &sealed[m_us..2 * m_us] {
            let (block, binding) = open_lookahead_block(crypto, cell, self.block_size)?;
            if !block.is_dummy() {
                access_stash.push((block, binding));
            }
        }
        let mut swap_stash: Vec<Option<(Block, Index)>> = Vec::with_capacity(m_us);
        for cell in &sealed[2 * m_us..3 * m_us] {
            let (block, binding) = open_lookahead_block(crypto, cell, self.block_size)?;
            swap_stash.push((!binding.is_none()).then_some((block, binding)));
        }
        let target_cell_block = if target_in_column {
            matrix_column[target.row as usize].clone()
        } else {
            open_lookahead_block(crypto, &sealed[3 * m_us], self.block_size)?.0
        };

        // Locate the target: matrix cell, then access stash (keyed by its
        // cell), then swap stash (keyed by address). A miss in all three
        // means the client state is corrupt.
        let location = if target_cell_block.address == address {
            Location::Matrix
        } else if let Some(i) = access_stash.iter().position(|(_, binding)| *binding == target) {
            Location::AccessStash(i)
        } else if let Some(i) = swap_stash
            .iter()
            .position(|entry| entry.as_ref().is_some_and(|(block, _)| block.address == address))
        {
            Location::SwapStash(i)
        } else {
            return Err(OramError::Lookup(address));
        };

        let column_us = column as usize;
        let empty_slot_violation = || {
            OramError::Protocol(
                "the swap stash slot for the maintenance column is empty".to_string(),
            )
        };

        // Take this round's swap partner and swap logical identities: the
        // fetched block adopts the partner's old cell. When the target *is*
        // the scheduled partner, the swap degenerates to the identity and no
        // partner block remains to place.
        let mut fetched;
        let new_index;
        let mut partner: Option<Block> = None;
        if location == Location::SwapStash(column_us) {
            let (block, binding) = swap_stash[column_us].take().ok_or_else(empty_slot_violation)?;
            fetched = block;
            new_index = binding;
        } else {
            let (partner_block, partner_binding) =
                swap_stash[column_us].take().ok_or_else(empty_slot_violation)?;
            fetched = match location {
                Location::Matrix => target_cell_block,
                Location::AccessStash(i) => access_stash.remove(i).0,
                Location::SwapStash(i) => {
                    swap_stash[i].take().ok_or_else(empty_slot_violation)?.0
                }
            };
            new_index = partner_binding;
            partner = Some(partner_block);
        }

        let result = apply_request(&mut fetched.data, &request);

        // Refill the vacated cell: the partner moves in when the target came
        // from the matrix or the access stash; when the target came from the
        // swap stash its cell gets a dummy and the partner takes over the
        // vacated queue slot instead, bound to that cell.
        let mut cell_replacement = Block::dummy();
        let mut partner_address = DUMMY_ADDRESS;
        if let Some(partner_block) = partner {
            partner_address = partner_block.address;
            match location {
                Location::Matrix | Location::AccessStash(_) => cell_replacement = partner_block,
                Location::SwapStash(i) => swap_stash[i] = Some((partner_block, target)),
            }
        }
        let mut vacated_write: Option<Block> = None;
        if target_in_column {
            matrix_column[target.row as usize] = cell_replacement;
        } else {
            vacated_write = Some(cell_replacement);
        }

        access_stash.push((fetched, new_index));

        // Two position-map writes per access, always. When no real partner
        // moved, the second write redundantly repeats the first, so the
        // inner-level traffic cannot reveal which branch was taken.
        self.map
            .replace(inner, store, crypto, rng, address, new_index.flat(m))?;
        if partner_address != DUMMY_ADDRESS {
            self.map
                .replace(inner, store, crypto, rng, partner_address, target.flat(m))?;
        } else {
            self.map
                .replace(inner, store, crypto, rng, address, new_index.flat(m))?;
        }

        self.maintain(&mut matrix_column, &mut access_stash, &mut swap_stash, column, rng)?;

        // One batch write mirroring the read shape.
        let mut write_slots = Vec::with_capacity(3 * m_us + 1);
        let mut write_blocks = Vec::with_capacity(3 * m_us + 1);
        for (row, block) in matrix_column.iter().enumerate() {
            let index = Index {
                row: row as u32,
                col: column,
            };
            write_slots.push(self.matrix_slot(index));
            write_blocks.push(seal_lookahead_block(crypto, block, index, self.block_size)?);
        }
        if access_stash.len() > m_us {
            return Err(OramError::Protocol(format!(
                "access stash holds {} blocks, beyond its {} cells",
                access_stash.len(),
                m_us
            )));
        }
        let mut stash_cells: Vec<Option<(Block, Index)>> =
            access_stash.drain(..).map(Some).collect();
        stash_cells.resize(m_us, None);
        permute(&mut stash_cells, rng);
        for (i, entry) in stash_cells.iter().enumerate() {
            write_slots.push(self.access_stash_slot(i as u32));
            write_blocks.push(self.seal_swap_entry(crypto, entry)?);
        }
        for (i, entry) in swap_stash.iter().enumerate() {
            write_slots.push(self.swap_stash_slot(i as u32));
            write_blocks.push(self.seal_swap_entry(crypto, entry)?);
        }
        if let Some(block) = vacated_write {
            write_slots.push(self.matrix_slot(target));
            write_blocks.push(seal_lookahead_block(crypto, &block, target, self.block_size)?);
        }
        store.write_batch(&write_slots, write_blocks)?;

        self.access_counter += 1;
        Ok(result)
    }

    /// The maintenance job for `column`: migrate access-stash blocks home,
    /// schedule one new swap partner, and pull every scheduled partner whose
    /// cell sits in this column into its queue slot.
    fn maintain<R: RngCore + CryptoRng>(
        &mut self,
        matrix_column: &mut [Block],
        access_stash: &mut Vec<(Block, Index)>,
        swap_stash: &mut [Option<(Block, Index)>],
        column: u32,
        rng: &mut R,
    ) -> Result<(), OramError> {
        let m = self.matrix_height;

        // (a) Blocks displaced into the access stash return to their home
        // cells when their column comes up for maintenance.
        let mut kept = Vec::with_capacity(access_stash.len());
        for (block, binding) in access_stash.drain(..) {
            if binding.col == column {
                let cell = &mut matrix_column[binding.row as usize];
                if !cell.is_dummy() {
                    return Err(OramError::Protocol(
                        "an access-stash block's home cell is not a dummy".to_string(),
                    ));
                }
                *cell = block;
            } else {
                kept.push((block, binding));
            }
        }
        *access_stash = kept;

        // (b) Schedule one new partner for the round one rotation from now.
        // It is appended before the pulls run: a partner whose cell sits in
        // the current column must be pulled this round, or it would still be
        // in the matrix when consumed.
        let mut excluded: Vec<Position> =
            self.scheduled.iter().map(|partner| partner.index.flat(m)).collect();
        excluded.extend(
            swap_stash
                .iter()
                .flatten()
                .map(|(_, binding)| binding.flat(m)),
        );
        let new_partner = Index::from_flat(
            random_slot_excluding(self.cell_count(), &excluded, rng),
            m,
        );
        self.scheduled.push(SwapPartner {
            index: new_partner,
            scheduled_round: self.access_counter + u64::from(m),
        });

        // (c) Pull due partners out of the matrix into their queue slots.
        let mut still_pending = Vec::with_capacity(self.scheduled.len());
        for partner in std::mem::take(&mut self.scheduled) {
            if partner.index.col == column {
                let queue_slot = (partner.scheduled_round % u64::from(m)) as usize;
                if swap_stash[queue_slot].is_some() {
                    return Err(OramError::Protocol(
                        "the queue slot for a scheduled swap partner is occupied".to_string(),
                    ));
                }
                let cell = &mut matrix_column[partner.index.row as usize];
                swap_stash[queue_slot] = Some((std::mem::take(cell), partner.index));
            } else {
                still_pending.push(partner);
            }
        }
        self.scheduled = still_pending;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        planner::OramKind,
        test_utils::{init_logger, test_session, test_session_with_counting_store},
    };
    use rand::{rngs::StdRng, Rng, SeedableRng};

    crate::test_utils::create_session_correctness_tests!(lookahead, &[OramKind::Lookahead], 9, 16, 200);
    crate::test_utils::create_session_correctness_tests!(lookahead, &[OramKind::Lookahead], 16, 8, 300);
    crate::test_utils::create_session_correctness_tests!(lookahead, &[OramKind::Lookahead], 13, 16, 200);

    #[test]
    fn read_after_write() {
        init_logger();
        let mut rng = StdRng::seed_from_u64(0);
        let mut session = test_session(&[OramKind::Lookahead], 16, 16, &mut rng);
        session.write(7, b"matrix", &mut rng).unwrap();
        assert_eq!(session.read(7, &mut rng).unwrap(), b"matrix");
        session.write(7, b"rotated", &mut rng).unwrap();
        assert_eq!(session.read(7, &mut rng).unwrap(), b"rotated");
    }

    #[test]
    fn every_access_reads_three_rows_or_one_more() {
        init_logger();
        let mut rng = StdRng::seed_from_u64(0);
        let capacity = 16u32;
        let m = 4u64;
        let mut session =
            test_session_with_counting_store(&[OramKind::Lookahead], capacity, 8, &mut rng);
        for _ in 0..200 {
            let reads_before = session.store().get_read_count();
            let writes_before = session.store().get_write_count();
            let address = rng.gen_range(1..=capacity);
            if rng.gen::<bool>() {
                session.read(address, &mut rng).unwrap();
            } else {
                session.write(address, b"io", &mut rng).unwrap();
            }
            let reads = session.store().get_read_count() - reads_before;
            let writes = session.store().get_write_count() - writes_before;
            assert!(reads == 3 * m || reads == 3 * m + 1, "read {reads} blocks");
            assert_eq!(reads, writes);
        }
    }

    #[test]
    fn long_run_on_the_smallest_matrix() {
        // A 2x2 matrix cycles its swap schedule every other access, which
        // exercises the target-is-partner degenerate case heavily.
        init_logger();
        let mut rng = StdRng::seed_from_u64(0);
        let capacity = 4u32;
        let mut session = test_session(&[OramKind::Lookahead], capacity, 8, &mut rng);
        let mut mirror: Vec<Vec<u8>> = vec![Vec::new(); capacity as usize + 1];
        for round in 0u32..500 {
            let address = rng.gen_range(1..=capacity);
            if rng.gen::<bool>() {
                assert_eq!(
                    session.read(address, &mut rng).unwrap(),
                    mirror[address as usize],
                    "round {round}"
                );
            } else {
                let data = round.to_le_bytes().to_vec();
                session.write(address, &data, &mut rng).unwrap();
                mirror[address as usize] = data;
            }
        }
    }

    #[test]
    fn out_of_bounds_addresses_are_rejected() {
        init_logger();
        let mut rng = StdRng::seed_from_u64(0);
        let mut session = test_session(&[OramKind::Lookahead], 9, 16, &mut rng);
        assert!(session.read(0, &mut rng).is_err());
        assert!(session.read(10, &mut rng).is_err());
    }
}
