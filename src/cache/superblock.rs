use crate::core::block::{
    read_u32, read_u64, write_u32, write_u64, Block, BlockKind, BLOCK_SIZE_SECTORS,
};
use crate::core::transaction::{TransactionManager, SUPERBLOCK_LOCATION};
use crate::error::{MetadataError, Result};
use serde::{Deserialize, Serialize};

pub const SUPERBLOCK_MAGIC: u64 = 0o6142003;

/// Oldest and newest on-disk versions this crate reads and writes
pub const MIN_METADATA_VERSION: u32 = 1;
pub const MAX_METADATA_VERSION: u32 = 2;

/// Superblock flag set once the cache target has shut down cleanly
pub const CLEAN_SHUTDOWN: u32 = 1;

pub const UUID_SIZE: usize = 16;

/// Policy names are NUL-terminated inside a 16-byte field
pub const POLICY_NAME_SIZE: usize = 16;

// Field offsets within the block payload
const MAGIC_OFFSET: usize = 0;
const VERSION_OFFSET: usize = 8;
const FLAGS_OFFSET: usize = 12;
const UUID_OFFSET: usize = 16;
const POLICY_NAME_OFFSET: usize = 32;
const POLICY_VERSION_OFFSET: usize = 48;
const POLICY_HINT_SIZE_OFFSET: usize = 60;
const METADATA_BLOCK_SIZE_OFFSET: usize = 64;
const DATA_BLOCK_SIZE_OFFSET: usize = 68;
const CACHE_BLOCKS_OFFSET: usize = 72;
const MAPPING_ROOT_OFFSET: usize = 80;
const HINT_ROOT_OFFSET: usize = 88;
const METADATA_NR_BLOCKS_OFFSET: usize = 96;

/// Cache metadata superblock (block 0)
///
/// Points at the roots of the mapping and hint arrays and records the
/// geometry and policy of the cache they describe. Written last on commit,
/// so a torn write leaves the previous transaction visible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    /// On-disk format version
    pub version: u32,

    /// CLEAN_SHUTDOWN and friends
    pub flags: u32,

    pub uuid: [u8; UUID_SIZE],

    /// Name of the cache policy owning the hints
    pub policy_name: String,

    pub policy_version: [u32; 3],

    /// Width in bytes of each hint; zero when the policy keeps none
    pub policy_hint_size: u32,

    /// Metadata block size in 512-byte sectors (always 8)
    pub metadata_block_size: u32,

    /// Cache block size in 512-byte sectors
    pub data_block_size: u32,

    /// Number of cache blocks, and entries in each array
    pub cache_blocks: u32,

    pub mapping_root: u64,

    /// Zero when `policy_hint_size` is zero
    pub hint_root: u64,

    /// Size of the metadata device in blocks
    pub metadata_nr_blocks: u64,
}

impl Superblock {
    pub fn new() -> Self {
        Superblock {
            version: MAX_METADATA_VERSION,
            flags: CLEAN_SHUTDOWN,
            uuid: [0; UUID_SIZE],
            policy_name: String::new(),
            policy_version: [0; 3],
            policy_hint_size: 0,
            metadata_block_size: BLOCK_SIZE_SECTORS,
            data_block_size: 0,
            cache_blocks: 0,
            mapping_root: 0,
            hint_root: 0,
            metadata_nr_blocks: 0,
        }
    }

    pub fn clean_shutdown(&self) -> bool {
        self.flags & CLEAN_SHUTDOWN != 0
    }

    pub fn set_clean_shutdown(&mut self, clean: bool) {
        if clean {
            self.flags |= CLEAN_SHUTDOWN;
        } else {
            self.flags &= !CLEAN_SHUTDOWN;
        }
    }

    /// UUID as text, up to the first NUL
    pub fn uuid_string(&self) -> String {
        let end = self.uuid.iter().position(|&b| b == 0).unwrap_or(UUID_SIZE);
        String::from_utf8_lossy(&self.uuid[..end]).into_owned()
    }

    pub fn set_uuid(&mut self, uuid: &str) -> Result<()> {
        let bytes = uuid.as_bytes();
        if bytes.len() > UUID_SIZE {
            return Err(MetadataError::InvalidMetadata(format!(
                "uuid '{}' longer than {} bytes",
                uuid, UUID_SIZE
            )));
        }
        self.uuid = [0; UUID_SIZE];
        self.uuid[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Validate field values that do not depend on the device
    pub fn validate(&self) -> Result<()> {
        if !(MIN_METADATA_VERSION..=MAX_METADATA_VERSION).contains(&self.version) {
            return Err(MetadataError::UnsupportedVersion(self.version));
        }

        if self.metadata_block_size != BLOCK_SIZE_SECTORS {
            return Err(MetadataError::BadSuperblock(format!(
                "metadata block size {} sectors, expected {}",
                self.metadata_block_size, BLOCK_SIZE_SECTORS
            )));
        }

        if self.policy_name.len() >= POLICY_NAME_SIZE {
            return Err(MetadataError::BadSuperblock(format!(
                "policy name '{}' too long",
                self.policy_name
            )));
        }

        Ok(())
    }

    /// Encode into a block destined for location 0; the caller seals it
    pub fn to_block(&self) -> Result<Block> {
        self.validate()?;

        let mut block = Block::new(SUPERBLOCK_LOCATION);
        let payload = block.payload_mut();

        write_u64(payload, MAGIC_OFFSET, SUPERBLOCK_MAGIC);
        write_u32(payload, VERSION_OFFSET, self.version);
        write_u32(payload, FLAGS_OFFSET, self.flags);
        payload[UUID_OFFSET..UUID_OFFSET + UUID_SIZE].copy_from_slice(&self.uuid);

        let name = self.policy_name.as_bytes();
        payload[POLICY_NAME_OFFSET..POLICY_NAME_OFFSET + name.len()].copy_from_slice(name);

        for (i, v) in self.policy_version.iter().enumerate() {
            write_u32(payload, POLICY_VERSION_OFFSET + i * 4, *v);
        }
        write_u32(payload, POLICY_HINT_SIZE_OFFSET, self.policy_hint_size);
        write_u32(payload, METADATA_BLOCK_SIZE_OFFSET, self.metadata_block_size);
        write_u32(payload, DATA_BLOCK_SIZE_OFFSET, self.data_block_size);
        write_u32(payload, CACHE_BLOCKS_OFFSET, self.cache_blocks);
        write_u64(payload, MAPPING_ROOT_OFFSET, self.mapping_root);
        write_u64(payload, HINT_ROOT_OFFSET, self.hint_root);
        write_u64(payload, METADATA_NR_BLOCKS_OFFSET, self.metadata_nr_blocks);

        Ok(block)
    }

    /// Decode from an already checksummed block
    pub fn from_block(block: &Block) -> Result<Self> {
        let payload = block.payload();

        let magic = read_u64(payload, MAGIC_OFFSET);
        if magic != SUPERBLOCK_MAGIC {
            return Err(MetadataError::BadSuperblock(format!(
                "bad magic {:#o}",
                magic
            )));
        }

        let mut uuid = [0u8; UUID_SIZE];
        uuid.copy_from_slice(&payload[UUID_OFFSET..UUID_OFFSET + UUID_SIZE]);

        let name = &payload[POLICY_NAME_OFFSET..POLICY_NAME_OFFSET + POLICY_NAME_SIZE];
        let name_len = name.iter().position(|&b| b == 0).unwrap_or(POLICY_NAME_SIZE);
        let policy_name = std::str::from_utf8(&name[..name_len])
            .map_err(|_| MetadataError::BadSuperblock("policy name is not UTF-8".to_string()))?
            .to_string();

        let sb = Superblock {
            version: read_u32(payload, VERSION_OFFSET),
            flags: read_u32(payload, FLAGS_OFFSET),
            uuid,
            policy_name,
            policy_version: [
                read_u32(payload, POLICY_VERSION_OFFSET),
                read_u32(payload, POLICY_VERSION_OFFSET + 4),
                read_u32(payload, POLICY_VERSION_OFFSET + 8),
            ],
            policy_hint_size: read_u32(payload, POLICY_HINT_SIZE_OFFSET),
            metadata_block_size: read_u32(payload, METADATA_BLOCK_SIZE_OFFSET),
            data_block_size: read_u32(payload, DATA_BLOCK_SIZE_OFFSET),
            cache_blocks: read_u32(payload, CACHE_BLOCKS_OFFSET),
            mapping_root: read_u64(payload, MAPPING_ROOT_OFFSET),
            hint_root: read_u64(payload, HINT_ROOT_OFFSET),
            metadata_nr_blocks: read_u64(payload, METADATA_NR_BLOCKS_OFFSET),
        };

        sb.validate()?;
        Ok(sb)
    }

    /// Read and validate the superblock of a metadata device
    pub fn read(tm: &TransactionManager) -> Result<Self> {
        if tm.nr_blocks() == 0 {
            return Err(MetadataError::DeviceTooSmall);
        }

        let block = tm.read(SUPERBLOCK_LOCATION, BlockKind::Superblock)?;
        Superblock::from_block(&block)
    }

    pub fn write(&self, tm: &TransactionManager) -> Result<()> {
        let mut block = self.to_block()?;
        tm.write(&mut block, BlockKind::Superblock)
    }
}

impl Default for Superblock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Superblock {
        let mut sb = Superblock::new();
        sb.set_uuid("0123-abcd").unwrap();
        sb.policy_name = "smq".to_string();
        sb.policy_version = [2, 0, 0];
        sb.policy_hint_size = 4;
        sb.data_block_size = 128;
        sb.cache_blocks = 1024;
        sb.mapping_root = 7;
        sb.hint_root = 9;
        sb.metadata_nr_blocks = 2048;
        sb
    }

    #[test]
    fn test_superblock_encoding() {
        let sb = sample();
        let mut block = sb.to_block().unwrap();
        block.seal(BlockKind::Superblock);
        block.validate(BlockKind::Superblock).unwrap();

        let decoded = Superblock::from_block(&block).unwrap();
        assert_eq!(decoded, sb);
        assert_eq!(decoded.uuid_string(), "0123-abcd");
        assert!(decoded.clean_shutdown());
    }

    #[test]
    fn test_zeroed_block_has_bad_magic() {
        let block = Block::new(0);
        assert!(matches!(
            Superblock::from_block(&block),
            Err(MetadataError::BadSuperblock(_))
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let mut sb = sample();
        sb.version = 3;
        assert!(matches!(sb.validate(), Err(MetadataError::UnsupportedVersion(3))));

        sb.version = 1;
        assert!(sb.validate().is_ok());
    }

    #[test]
    fn test_clean_shutdown_flag() {
        let mut sb = sample();
        sb.set_clean_shutdown(false);
        assert!(!sb.clean_shutdown());
        assert_eq!(sb.flags, 0);
    }

    #[test]
    fn test_long_uuid_and_policy_rejected() {
        let mut sb = sample();
        assert!(sb.set_uuid("this-uuid-is-far-too-long").is_err());

        sb.policy_name = "a-very-long-policy".to_string();
        assert!(sb.validate().is_err());
    }
}
