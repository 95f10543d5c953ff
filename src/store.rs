// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Block store abstractions: the remote key-addressed storage the ORAM
//! client is obliviously accessing on behalf of its caller.

use crate::{block::EncryptedBlock, Address, OramError};
use std::time::{Duration, Instant};

/// Key-addressed encrypted-block storage.
///
/// Slots are physical store addresses; the recursive composition assigns each
/// ORAM level a disjoint slot range within one shared address space. All
/// failures are terminal for the session; the core never retries.
pub trait BlockStore {
    /// Reads the block stored at `slot`.
    fn read(&mut self, slot: Address) -> Result<EncryptedBlock, OramError>;

    /// Writes the block stored at `slot`.
    fn write(&mut self, slot: Address, block: EncryptedBlock) -> Result<(), OramError>;

    /// Reads one block per slot, in order. One round trip per access.
    fn read_batch(&mut self, slots: &[Address]) -> Result<Vec<EncryptedBlock>, OramError> {
        slots.iter().map(|slot| self.read(*slot)).collect()
    }

    /// Writes `blocks[i]` to `slots[i]`. One round trip per access.
    fn write_batch(
        &mut self,
        slots: &[Address],
        blocks: Vec<EncryptedBlock>,
    ) -> Result<(), OramError> {
        if slots.len() != blocks.len() {
            return Err(OramError::Protocol(format!(
                "write batch has {} slots but {} blocks",
                slots.len(),
                blocks.len()
            )));
        }
        for (slot, block) in slots.iter().zip(blocks) {
            self.write(*slot, block)?;
        }
        Ok(())
    }

    /// Signals the end of the session, triggering a server-side wipe.
    fn send_end_signal(&mut self) -> Result<(), OramError>;

    /// Measures the round-trip time of a minimal store operation.
    fn speed_test(&mut self) -> Result<Duration, OramError>;
}

/// A `BlockStore` backed by client memory, for tests and benchmarks.
#[derive(Debug)]
pub struct MemoryStore {
    slots: Vec<EncryptedBlock>,
}

impl MemoryStore {
    /// Returns a store with `capacity` empty slots.
    pub fn new(capacity: Address) -> Self {
        let capacity = capacity as usize;
        Self {
            slots: vec![EncryptedBlock::default(); capacity],
        }
    }

    /// The number of slots.
    pub fn capacity(&self) -> Address {
        self.slots.len() as Address
    }

    #[cfg(test)]
    pub(crate) fn slots(&self) -> &[EncryptedBlock] {
        &self.slots
    }

    fn slot_mut(&mut self, slot: Address) -> Result<&mut EncryptedBlock, OramError> {
        let capacity = self.capacity();
        self.slots
            .get_mut(slot as usize)
            .ok_or_else(|| OramError::Store(format!("slot {slot} beyond capacity {capacity}")))
    }
}

impl BlockStore for MemoryStore {
    fn read(&mut self, slot: Address) -> Result<EncryptedBlock, OramError> {
        Ok(self.slot_mut(slot)?.clone())
    }

    fn write(&mut self, slot: Address, block: EncryptedBlock) -> Result<(), OramError> {
        *self.slot_mut(slot)? = block;
        Ok(())
    }

    fn send_end_signal(&mut self) -> Result<(), OramError> {
        for slot in self.slots.iter_mut() {
            *slot = EncryptedBlock::default();
        }
        Ok(())
    }

    fn speed_test(&mut self) -> Result<Duration, OramError> {
        let started = Instant::now();
        if !self.slots.is_empty() {
            let probe = self.read(0)?;
            self.write(0, probe)?;
        }
        Ok(started.elapsed())
    }
}

/// A `BlockStore` that counts reads and writes, for instrumentation tests.
#[derive(Debug)]
pub struct CountAccessesStore {
    inner: MemoryStore,
    /// `reads[i]` tracks the total number of reads made to slot `i`.
    pub reads: Vec<u64>,
    /// `writes[i]` tracks the total number of writes made to slot `i`.
    pub writes: Vec<u64>,
}

impl CountAccessesStore {
    /// Returns a counting store with `capacity` empty slots.
    pub fn new(capacity: Address) -> Self {
        Self {
            inner: MemoryStore::new(capacity),
            reads: vec![0; capacity as usize],
            writes: vec![0; capacity as usize],
        }
    }

    /// Returns the total number of reads across all slots.
    pub fn get_read_count(&self) -> u64 {
        self.reads.iter().sum()
    }

    /// Returns the total number of writes across all slots.
    pub fn get_write_count(&self) -> u64 {
        self.writes.iter().sum()
    }
}

impl BlockStore for CountAccessesStore {
    fn read(&mut self, slot: Address) -> Result<EncryptedBlock, OramError> {
        log::debug!("Physical read -- {}", slot);
        if let Some(count) = self.reads.get_mut(slot as usize) {
            *count += 1;
        }
        self.inner.read(slot)
    }

    fn write(&mut self, slot: Address, block: EncryptedBlock) -> Result<(), OramError> {
        log::debug!("Physical write -- {}", slot);
        if let Some(count) = self.writes.get_mut(slot as usize) {
            *count += 1;
        }
        self.inner.write(slot, block)
    }

    fn send_end_signal(&mut self) -> Result<(), OramError> {
        self.inner.send_end_signal()
    }

    fn speed_test(&mut self) -> Result<Duration, OramError> {
        self.inner.speed_test()
    }
}
