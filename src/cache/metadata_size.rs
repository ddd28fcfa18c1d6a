//! Estimate how large a metadata device must be

use crate::error::{MetadataError, Result};

pub const DEFAULT_MAX_HINT_WIDTH: u32 = 4;

const SECTOR_SIZE: u64 = 512;

/// Fixed overhead: superblock, space maps, index nodes and slack
const TRANSACTION_OVERHEAD: u64 = 4 * 1024 * 1024;

/// Mapping entry plus its share of index overhead
const BYTES_PER_BLOCK: u64 = 16 + 8;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SizeOptions {
    /// Size of the cache device in sectors
    pub device_size: Option<u64>,

    /// Cache block size in sectors
    pub block_size: Option<u64>,

    pub nr_blocks: Option<u64>,
    pub max_hint_width: Option<u32>,
}

impl SizeOptions {
    /// Number of cache blocks, however the caller chose to give it
    pub fn nr_blocks(&self) -> Result<u64> {
        let from_device = match (self.device_size, self.block_size) {
            (Some(device), Some(block)) => {
                if block == 0 {
                    return Err(invalid("Block size must be greater than zero."));
                }
                Some(device / block)
            }
            (Some(_), None) => {
                return Err(invalid(
                    "If you specify --device-size you must also give --block-size.",
                ))
            }
            (None, Some(_)) => {
                return Err(invalid(
                    "If you specify --block-size you must also give --device-size.",
                ))
            }
            (None, None) => None,
        };

        match (from_device, self.nr_blocks) {
            (Some(a), Some(b)) if a != b => Err(invalid(
                "Contradictory arguments given, --nr-blocks doesn't match the --device-size and --block-size.",
            )),
            (Some(n), _) | (None, Some(n)) => Ok(n),
            (None, None) => Err(invalid(
                "Please specify either --device-size and --block-size, or --nr-blocks.",
            )),
        }
    }

    pub fn max_hint_width(&self) -> u32 {
        self.max_hint_width.unwrap_or(DEFAULT_MAX_HINT_WIDTH)
    }

    pub fn sectors(&self) -> Result<u64> {
        metadata_size_sectors(self.nr_blocks()?, self.max_hint_width())
    }
}

fn invalid(msg: &str) -> MetadataError {
    MetadataError::InvalidArguments(msg.to_string())
}

/// Metadata device size in sectors for `nr_blocks` cache blocks
pub fn metadata_size_sectors(nr_blocks: u64, max_hint_width: u32) -> Result<u64> {
    nr_blocks
        .checked_mul(BYTES_PER_BLOCK + max_hint_width as u64)
        .and_then(|bytes| bytes.checked_add(TRANSACTION_OVERHEAD))
        .map(|bytes| bytes / SECTOR_SIZE)
        .ok_or_else(|| invalid("Metadata size overflows."))
}
