//! In-core reference-counting space map
//!
//! Tracks how many tree nodes point at each metadata block. A count of zero
//! means free. Blocks that drop to zero while still reachable from the last
//! committed superblock are held back until the next commit, so a crash
//! before commit never finds them overwritten.

use crate::error::{MetadataError, Result};
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct SpaceMap {
    /// Reference count per block
    counts: Vec<u32>,

    /// Number of blocks that can be handed out right now
    nr_free: u64,

    /// Hint for next free block search
    search_hint: u64,

    /// Freed this transaction, reusable after commit
    pending: HashSet<u64>,
}

impl SpaceMap {
    /// Create a space map with every block free
    pub fn new(nr_blocks: u64) -> Self {
        SpaceMap {
            counts: vec![0; nr_blocks as usize],
            nr_free: nr_blocks,
            search_hint: 0,
            pending: HashSet::new(),
        }
    }

    pub fn nr_blocks(&self) -> u64 {
        self.counts.len() as u64
    }

    pub fn nr_free(&self) -> u64 {
        self.nr_free
    }

    pub fn count(&self, b: u64) -> Result<u32> {
        self.counts
            .get(b as usize)
            .copied()
            .ok_or(MetadataError::InvalidBlockId(b))
    }

    fn is_available(&self, b: u64) -> bool {
        self.counts[b as usize] == 0 && !self.pending.contains(&b)
    }

    /// Allocate a free block, giving it a reference count of one
    pub fn alloc(&mut self) -> Result<u64> {
        let nr_blocks = self.nr_blocks();
        if self.nr_free == 0 {
            return Err(MetadataError::OutOfSpace);
        }

        let hint = self.search_hint.min(nr_blocks);
        let found = (hint..nr_blocks)
            .chain(0..hint)
            .find(|&b| self.is_available(b))
            .ok_or(MetadataError::OutOfSpace)?;

        self.counts[found as usize] = 1;
        self.nr_free -= 1;
        self.search_hint = found + 1;
        Ok(found)
    }

    /// Take a reference on a block that is already in use
    pub fn inc(&mut self, b: u64) -> Result<()> {
        if b >= self.nr_blocks() {
            return Err(MetadataError::InvalidBlockId(b));
        }

        if self.is_available(b) {
            self.nr_free -= 1;
        }
        let count = &mut self.counts[b as usize];
        *count = count.saturating_add(1);
        Ok(())
    }

    /// Drop a reference
    ///
    /// With `defer` set, a block that reaches zero is only reusable after
    /// [`SpaceMap::commit`].
    pub fn dec(&mut self, b: u64, defer: bool) -> Result<()> {
        let count = self
            .counts
            .get_mut(b as usize)
            .ok_or(MetadataError::InvalidBlockId(b))?;

        if *count == 0 {
            tracing::warn!("Double-free detected for block {}", b);
            return Ok(());
        }

        *count -= 1;
        if *count == 0 {
            if defer {
                self.pending.insert(b);
            } else {
                self.nr_free += 1;
            }
        }
        Ok(())
    }

    /// Make blocks freed during the transaction available again
    pub fn commit(&mut self) {
        let released = self
            .pending
            .drain()
            .filter(|&b| self.counts[b as usize] == 0)
            .count();
        self.nr_free += released as u64;
    }
}
