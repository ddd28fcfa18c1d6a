use crate::error::{MetadataError, Result};

/// Size of every metadata block in bytes
pub const BLOCK_SIZE: usize = 4096;

/// Sector size used by device-mapper when expressing sizes
pub const SECTOR_SIZE: usize = 512;

/// Metadata block size expressed in sectors
pub const BLOCK_SIZE_SECTORS: u32 = (BLOCK_SIZE / SECTOR_SIZE) as u32;

/// Bytes taken by the common block header (csum + kind + blocknr)
pub const BLOCK_HEADER_SIZE: usize = 16;

/// Block kinds stored in the metadata device
///
/// Each kind has its own tag, written into the block header, and its own
/// checksum salt, so a block of one kind never validates as another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BlockKind {
    /// Cache superblock (always block 0)
    Superblock = 0x5342_4331,
    /// Array index node
    ArrayIndex = 0x4149_4e31,
    /// Array leaf holding entries
    ArrayLeaf = 0x414c_4631,
}

impl BlockKind {
    pub fn tag(self) -> u32 {
        self as u32
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x5342_4331 => Some(BlockKind::Superblock),
            0x4149_4e31 => Some(BlockKind::ArrayIndex),
            0x414c_4631 => Some(BlockKind::ArrayLeaf),
            _ => None,
        }
    }

    fn salt(self) -> u32 {
        match self {
            BlockKind::Superblock => 9_031_977,
            BlockKind::ArrayIndex => 160_478,
            BlockKind::ArrayLeaf => 12_345_678,
        }
    }
}

/// A single metadata block
///
/// Structure: [csum u32][kind u32][blocknr u64][payload ...]
///
/// The checksum covers everything after the checksum field, salted by kind.
#[derive(Clone)]
pub struct Block {
    loc: u64,
    data: Vec<u8>,
}

impl Block {
    /// Create a zeroed block destined for `loc`
    pub fn new(loc: u64) -> Self {
        Block {
            loc,
            data: vec![0; BLOCK_SIZE],
        }
    }

    /// Wrap raw bytes read from `loc`
    pub fn from_bytes(loc: u64, data: Vec<u8>) -> Result<Self> {
        if data.len() != BLOCK_SIZE {
            return Err(MetadataError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "Block {} is {} bytes (expected {})",
                    loc,
                    data.len(),
                    BLOCK_SIZE
                ),
            )));
        }

        Ok(Block { loc, data })
    }

    pub fn loc(&self) -> u64 {
        self.loc
    }

    /// Move the block to a new location (used when shadowing)
    pub(crate) fn relocate(&mut self, loc: u64) {
        self.loc = loc;
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Bytes following the common header
    pub fn payload(&self) -> &[u8] {
        &self.data[BLOCK_HEADER_SIZE..]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.data[BLOCK_HEADER_SIZE..]
    }

    pub fn kind_tag(&self) -> u32 {
        read_u32(&self.data, 4)
    }

    pub fn stored_blocknr(&self) -> u64 {
        read_u64(&self.data, 8)
    }

    fn compute_checksum(&self, kind: BlockKind) -> u32 {
        crc32fast::hash(&self.data[4..]) ^ kind.salt()
    }

    /// Fill in kind, location and checksum ahead of a write
    pub fn seal(&mut self, kind: BlockKind) {
        write_u32(&mut self.data, 4, kind.tag());
        write_u64(&mut self.data, 8, self.loc);
        let csum = self.compute_checksum(kind);
        write_u32(&mut self.data, 0, csum);
    }

    /// Verify that the block is an intact block of the given kind living at
    /// its own location
    pub fn validate(&self, kind: BlockKind) -> Result<()> {
        let found = self.kind_tag();
        if found != kind.tag() {
            return Err(MetadataError::WrongBlockKind {
                block: self.loc,
                expected: kind,
                found,
            });
        }

        if read_u32(&self.data, 0) != self.compute_checksum(kind) {
            return Err(MetadataError::ChecksumMismatch { block: self.loc });
        }

        let blocknr = self.stored_blocknr();
        if blocknr != self.loc {
            return Err(MetadataError::WrongLocation {
                block: self.loc,
                found: blocknr,
            });
        }

        Ok(())
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("loc", &self.loc)
            .field("kind", &BlockKind::from_u32(self.kind_tag()))
            .finish()
    }
}

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

pub(crate) fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

pub(crate) fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
