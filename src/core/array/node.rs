//! On-disk layout of array index nodes and leaves
//!
//! Index node payload: [level u32][nr_children u32][value_size u32]
//! [max_entries u32][children u64 ...]
//!
//! Leaf payload: [max_entries u32][nr_entries u32][value_size u32][pad u32]
//! [values ...]

use crate::core::block::{
    read_u32, read_u64, write_u32, write_u64, Block, BLOCK_HEADER_SIZE, BLOCK_SIZE,
};
use crate::error::{MetadataError, Result};

const NODE_HEADER_SIZE: usize = 16;

/// Bytes available for children or values after both headers
const NODE_BODY_SIZE: usize = BLOCK_SIZE - BLOCK_HEADER_SIZE - NODE_HEADER_SIZE;

/// Maximum number of children of an index node
pub const INDEX_FANOUT: usize = NODE_BODY_SIZE / 8;

/// Largest entry that fits in a single leaf
pub const MAX_ENTRY_WIDTH: usize = NODE_BODY_SIZE;

/// Deepest index level ever needed to address `u32::MAX` single-entry leaves
pub const MAX_INDEX_LEVEL: u32 = 3;

/// Number of entries a leaf holds for a given width
pub fn leaf_capacity(width: usize) -> Result<u32> {
    if width == 0 || width > MAX_ENTRY_WIDTH {
        return Err(MetadataError::InvalidWidth(width));
    }
    Ok((NODE_BODY_SIZE / width) as u32)
}

/// Number of leaves addressed by an index node at `level`
pub fn leaves_per_node(level: u32) -> u64 {
    (INDEX_FANOUT as u64).saturating_pow(level + 1)
}

/// Number of leaves addressed by each child of an index node at `level`
pub fn leaves_per_child(level: u32) -> u64 {
    (INDEX_FANOUT as u64).saturating_pow(level)
}

/// Lowest index level able to address `nr_leaves` leaves
pub fn level_for(nr_leaves: u64) -> u32 {
    let mut level = 0;
    while leaves_per_node(level) < nr_leaves {
        level += 1;
    }
    level
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexNode {
    pub level: u32,
    pub value_size: u32,
    pub max_entries: u32,
    pub children: Vec<u64>,
}

impl IndexNode {
    pub fn new(level: u32, value_size: u32, max_entries: u32) -> Self {
        IndexNode {
            level,
            value_size,
            max_entries,
            children: Vec::new(),
        }
    }

    /// Decode an index node from an already validated block
    pub fn from_block(block: &Block) -> Result<Self> {
        let payload = block.payload();
        let level = read_u32(payload, 0);
        let nr_children = read_u32(payload, 4) as usize;
        let value_size = read_u32(payload, 8);
        let max_entries = read_u32(payload, 12);

        if level > MAX_INDEX_LEVEL {
            return Err(MetadataError::Structure(format!(
                "index block {} has level {}",
                block.loc(),
                level
            )));
        }

        if nr_children > INDEX_FANOUT {
            return Err(MetadataError::Structure(format!(
                "index block {} has {} children (max {})",
                block.loc(),
                nr_children,
                INDEX_FANOUT
            )));
        }

        let children = (0..nr_children)
            .map(|i| read_u64(payload, NODE_HEADER_SIZE + i * 8))
            .collect();

        Ok(IndexNode {
            level,
            value_size,
            max_entries,
            children,
        })
    }

    /// Encode into the block payload; the caller seals the block
    pub fn write_to(&self, block: &mut Block) {
        let payload = block.payload_mut();
        payload.fill(0);
        write_u32(payload, 0, self.level);
        write_u32(payload, 4, self.children.len() as u32);
        write_u32(payload, 8, self.value_size);
        write_u32(payload, 12, self.max_entries);

        for (i, child) in self.children.iter().enumerate() {
            write_u64(payload, NODE_HEADER_SIZE + i * 8, *child);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode {
    pub max_entries: u32,
    pub value_size: u32,
    pub values: Vec<u8>,
}

impl LeafNode {
    pub fn new(value_size: u32, max_entries: u32) -> Self {
        LeafNode {
            max_entries,
            value_size,
            values: Vec::new(),
        }
    }

    pub fn nr_entries(&self) -> u32 {
        if self.value_size == 0 {
            return 0;
        }
        (self.values.len() / self.value_size as usize) as u32
    }

    pub fn entry(&self, slot: u32) -> Option<&[u8]> {
        let width = self.value_size as usize;
        let start = slot as usize * width;
        self.values.get(start..start + width)
    }

    pub fn set_entry(&mut self, slot: u32, bytes: &[u8]) -> Result<()> {
        let width = self.value_size as usize;
        let start = slot as usize * width;
        let dest = self
            .values
            .get_mut(start..start + width)
            .ok_or_else(|| {
                MetadataError::Structure(format!("leaf slot {} not populated", slot))
            })?;
        dest.copy_from_slice(bytes);
        Ok(())
    }

    /// Append copies of `fill` until the leaf holds `count` entries
    pub fn fill_to(&mut self, count: u32, fill: &[u8]) {
        while self.nr_entries() < count {
            self.values.extend_from_slice(fill);
        }
    }

    /// Decode a leaf from an already validated block
    pub fn from_block(block: &Block) -> Result<Self> {
        let payload = block.payload();
        let max_entries = read_u32(payload, 0);
        let nr_entries = read_u32(payload, 4) as usize;
        let value_size = read_u32(payload, 8);

        let len = nr_entries
            .checked_mul(value_size as usize)
            .filter(|&len| len <= NODE_BODY_SIZE && nr_entries <= max_entries as usize)
            .ok_or_else(|| {
                MetadataError::Structure(format!(
                    "leaf block {} claims {} entries of {} bytes (max {})",
                    block.loc(),
                    nr_entries,
                    value_size,
                    max_entries
                ))
            })?;

        Ok(LeafNode {
            max_entries,
            value_size,
            values: payload[NODE_HEADER_SIZE..NODE_HEADER_SIZE + len].to_vec(),
        })
    }

    pub fn write_to(&self, block: &mut Block) {
        let payload = block.payload_mut();
        payload.fill(0);
        write_u32(payload, 0, self.max_entries);
        write_u32(payload, 4, self.nr_entries());
        write_u32(payload, 8, self.value_size);
        payload[NODE_HEADER_SIZE..NODE_HEADER_SIZE + self.values.len()]
            .copy_from_slice(&self.values);
    }
}
