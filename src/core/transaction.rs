//! Transaction manager: validated reads and copy-on-write block handles
//!
//! Every block written during a transaction is either newly allocated or a
//! shadow (copy) of an older block. A block may only be written in place
//! when it was created in the current transaction and nothing else refers
//! to it; otherwise `shadow` hands back a copy at a fresh location and the
//! caller re-points the parent.

use crate::core::block::{Block, BlockKind};
use crate::core::io::BlockIo;
use crate::core::space_map::SpaceMap;
use crate::error::{MetadataError, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Location of the superblock; never handed out by the allocator
pub const SUPERBLOCK_LOCATION: u64 = 0;

pub struct TransactionManager {
    io: Arc<dyn BlockIo>,
    sm: SpaceMap,

    /// Blocks allocated during the current transaction
    shadows: HashSet<u64>,

    read_only: bool,
}

impl TransactionManager {
    /// Writable transaction manager with every block but the superblock free
    pub fn new(io: Arc<dyn BlockIo>) -> Result<Self> {
        let mut sm = SpaceMap::new(io.nr_blocks());
        sm.inc(SUPERBLOCK_LOCATION)?;

        Ok(TransactionManager {
            io,
            sm,
            shadows: HashSet::new(),
            read_only: false,
        })
    }

    /// Transaction manager that refuses every mutation
    pub fn read_only(io: Arc<dyn BlockIo>) -> Self {
        TransactionManager {
            sm: SpaceMap::new(0),
            io,
            shadows: HashSet::new(),
            read_only: true,
        }
    }

    pub fn io(&self) -> &Arc<dyn BlockIo> {
        &self.io
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn nr_blocks(&self) -> u64 {
        self.io.nr_blocks()
    }

    /// Blocks that can still be allocated in this transaction
    pub fn nr_free(&self) -> u64 {
        self.sm.nr_free()
    }

    pub fn ref_count(&self, loc: u64) -> Result<u32> {
        self.sm.count(loc)
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(MetadataError::ReadOnly);
        }
        Ok(())
    }

    /// Read a block and verify its kind, location and checksum
    pub fn read(&self, loc: u64, kind: BlockKind) -> Result<Block> {
        let data = self.io.read_block(loc)?;
        let block = Block::from_bytes(loc, data)?;
        block.validate(kind)?;
        Ok(block)
    }

    /// Allocate a zeroed block owned by this transaction
    pub fn new_block(&mut self) -> Result<Block> {
        self.ensure_writable()?;
        let loc = self.sm.alloc()?;
        self.shadows.insert(loc);
        Ok(Block::new(loc))
    }

    /// Get a writable version of `loc`
    ///
    /// Returns the block together with a flag that is set when the original
    /// was shared; the caller must then take a reference on every block the
    /// copy points at, since both versions now refer to them.
    pub fn shadow(&mut self, loc: u64, kind: BlockKind) -> Result<(Block, bool)> {
        self.ensure_writable()?;

        let count = self.sm.count(loc)?;
        let fresh = self.shadows.contains(&loc);
        let mut block = self.read(loc, kind)?;

        if fresh && count == 1 {
            return Ok((block, false));
        }

        let new_loc = self.sm.alloc()?;
        self.sm.dec(loc, !fresh)?;
        block.relocate(new_loc);
        self.shadows.insert(new_loc);

        debug!(from = loc, to = new_loc, shared = count > 1, "shadowed block");
        Ok((block, count > 1))
    }

    /// Seal and write a block
    pub fn write(&self, block: &mut Block, kind: BlockKind) -> Result<()> {
        self.ensure_writable()?;
        block.seal(kind);
        self.io.write_block(block.loc(), block.data())
    }

    /// Take an extra reference on a block
    pub fn inc(&mut self, loc: u64) -> Result<()> {
        self.ensure_writable()?;
        self.sm.inc(loc)
    }

    /// Drop a reference on a block
    pub fn dec(&mut self, loc: u64) -> Result<()> {
        self.ensure_writable()?;
        let fresh = self.shadows.contains(&loc);
        self.sm.dec(loc, !fresh)
    }

    /// End the transaction: flush the device and make every block written
    /// so far immutable for the next one
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_writable()?;
        self.io.flush()?;
        self.shadows.clear();
        self.sm.commit();
        debug!(free = self.sm.nr_free(), "transaction committed");
        Ok(())
    }
}
