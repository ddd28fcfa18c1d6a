use crate::error::{MetadataError, Result};
use serde::{Deserialize, Serialize};

/// Entry refers to an origin block
pub const FLAG_VALID: u32 = 1;

/// Cache copy differs from the origin
pub const FLAG_DIRTY: u32 = 2;

const FLAGS_BITS: u32 = 16;
const FLAGS_MASK: u64 = (1 << FLAGS_BITS) - 1;
const KNOWN_FLAGS: u32 = FLAG_VALID | FLAG_DIRTY;

/// Largest origin block number an entry can hold
pub const MAX_ORIGIN_BLOCK: u64 = (1 << (64 - FLAGS_BITS)) - 1;

/// One mapping array entry: origin block in the top 48 bits, flags below
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub oblock: u64,
    pub flags: u32,
}

impl Mapping {
    pub fn unmapped() -> Self {
        Mapping {
            oblock: 0,
            flags: 0,
        }
    }

    pub fn mapped(oblock: u64, dirty: bool) -> Result<Self> {
        if oblock > MAX_ORIGIN_BLOCK {
            return Err(MetadataError::InvalidMetadata(format!(
                "origin block {} does not fit in a mapping",
                oblock
            )));
        }

        let mut flags = FLAG_VALID;
        if dirty {
            flags |= FLAG_DIRTY;
        }
        Ok(Mapping { oblock, flags })
    }

    pub fn is_valid(&self) -> bool {
        self.flags & FLAG_VALID != 0
    }

    pub fn is_dirty(&self) -> bool {
        self.flags & FLAG_DIRTY != 0
    }

    /// Why the entry is malformed, if it is
    pub fn defect(&self) -> Option<&'static str> {
        if self.flags & !KNOWN_FLAGS != 0 {
            Some("unknown mapping flags")
        } else if self.is_dirty() && !self.is_valid() {
            Some("dirty flag set on an unmapped entry")
        } else {
            None
        }
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        ((self.oblock << FLAGS_BITS) | (self.flags as u64 & FLAGS_MASK)).to_le_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; 8] = bytes.try_into().map_err(|_| MetadataError::WidthMismatch {
            expected: 8,
            actual: bytes.len(),
        })?;
        let value = u64::from_le_bytes(raw);

        Ok(Mapping {
            oblock: value >> FLAGS_BITS,
            flags: (value & FLAGS_MASK) as u32,
        })
    }
}

impl Default for Mapping {
    fn default() -> Self {
        Self::unmapped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_packing() {
        let m = Mapping::mapped(17, true).unwrap();
        let bytes = m.to_bytes();
        assert_eq!(u64::from_le_bytes(bytes), (17 << 16) | 3);
        assert_eq!(Mapping::from_bytes(&bytes).unwrap(), m);
    }

    #[test]
    fn test_unmapped_is_zero() {
        assert_eq!(Mapping::unmapped().to_bytes(), [0; 8]);
        assert!(Mapping::unmapped().defect().is_none());
    }

    #[test]
    fn test_defects() {
        let unknown = Mapping {
            oblock: 1,
            flags: FLAG_VALID | 8,
        };
        assert!(unknown.defect().is_some());

        let dirty_unmapped = Mapping {
            oblock: 0,
            flags: FLAG_DIRTY,
        };
        assert!(dirty_unmapped.defect().is_some());
        assert!(Mapping::mapped(5, false).unwrap().defect().is_none());
    }

    #[test]
    fn test_origin_block_limit() {
        assert!(Mapping::mapped(MAX_ORIGIN_BLOCK, false).is_ok());
        assert!(Mapping::mapped(MAX_ORIGIN_BLOCK + 1, false).is_err());
    }
}
