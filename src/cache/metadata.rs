use super::hint_array::HintArray;
use super::mapping::Mapping;
use super::mapping_array::MappingArray;
use super::superblock::Superblock;
use crate::core::io::BlockIo;
use crate::core::transaction::TransactionManager;
use crate::error::{MetadataError, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Superblock plus the mapping and hint arrays it points at
///
/// Mutations go to freshly shadowed blocks; nothing becomes visible on the
/// device until [`CacheMetadata::commit`] writes the superblock.
pub struct CacheMetadata {
    tm: TransactionManager,
    sb: Superblock,
    mappings: MappingArray,
    hints: Option<HintArray>,
}

impl CacheMetadata {
    /// Format a device
    ///
    /// `sb` supplies the policy and geometry; roots and device size are
    /// filled in here. Every cache block starts unmapped with a zeroed hint.
    pub fn create(io: Arc<dyn BlockIo>, mut sb: Superblock) -> Result<Self> {
        if io.nr_blocks() == 0 {
            return Err(MetadataError::DeviceTooSmall);
        }
        sb.validate()?;

        let mut tm = TransactionManager::new(io)?;

        let mut mappings = MappingArray::create(&mut tm)?;
        mappings.grow(&mut tm, sb.cache_blocks)?;

        let hints = match sb.policy_hint_size as usize {
            0 => None,
            width => {
                let mut hints = HintArray::create(&mut tm, width)?;
                hints.grow(&mut tm, sb.cache_blocks, &vec![0; width])?;
                Some(hints)
            }
        };

        sb.metadata_nr_blocks = tm.nr_blocks();
        info!(
            cache_blocks = sb.cache_blocks,
            hint_width = sb.policy_hint_size,
            metadata_blocks = sb.metadata_nr_blocks,
            "formatted cache metadata"
        );

        Ok(CacheMetadata {
            tm,
            sb,
            mappings,
            hints,
        })
    }

    /// Open existing metadata for update
    ///
    /// Reference counts are rebuilt from the blocks reachable from the
    /// superblock, so any damage fails the open.
    pub fn open(io: Arc<dyn BlockIo>) -> Result<Self> {
        let mut tm = TransactionManager::new(io)?;
        let (sb, mappings, hints) = open_arrays(&tm)?;

        let mut blocks = mappings.array().blocks(&tm)?;
        if let Some(hints) = &hints {
            blocks.extend(hints.array().blocks(&tm)?);
        }
        for block in blocks {
            tm.inc(block)?;
        }
        debug!(free = tm.nr_free(), "rebuilt space map");

        Ok(CacheMetadata {
            tm,
            sb,
            mappings,
            hints,
        })
    }

    pub fn open_read_only(io: Arc<dyn BlockIo>) -> Result<Self> {
        let tm = TransactionManager::read_only(io);
        let (sb, mappings, hints) = open_arrays(&tm)?;

        Ok(CacheMetadata {
            tm,
            sb,
            mappings,
            hints,
        })
    }

    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    pub fn superblock_mut(&mut self) -> &mut Superblock {
        &mut self.sb
    }

    pub fn tm(&self) -> &TransactionManager {
        &self.tm
    }

    pub fn mappings(&self) -> &MappingArray {
        &self.mappings
    }

    pub fn hints(&self) -> Option<&HintArray> {
        self.hints.as_ref()
    }

    pub fn nr_cache_blocks(&self) -> u32 {
        self.sb.cache_blocks
    }

    pub fn get_mapping(&self, cblock: u32) -> Result<Mapping> {
        self.mappings.get_mapping(&self.tm, cblock)
    }

    pub fn set_mapping(&mut self, cblock: u32, mapping: &Mapping) -> Result<()> {
        self.mappings.set_mapping(&mut self.tm, cblock, mapping)
    }

    pub fn get_hint(&self, cblock: u32) -> Result<Vec<u8>> {
        match &self.hints {
            Some(hints) => hints.get_hint(&self.tm, cblock),
            None => Err(no_hints()),
        }
    }

    pub fn set_hint(&mut self, cblock: u32, data: &[u8]) -> Result<()> {
        match &mut self.hints {
            Some(hints) => hints.set_hint(&mut self.tm, cblock, data),
            None => Err(no_hints()),
        }
    }

    /// Make every change durable
    ///
    /// Array blocks are flushed before the superblock naming their roots is
    /// written, and the superblock is flushed before frees are released.
    pub fn commit(&mut self) -> Result<()> {
        self.sb.mapping_root = self.mappings.root();
        self.sb.hint_root = self.hints.as_ref().map_or(0, |h| h.root());

        self.tm.io().flush()?;
        self.sb.write(&self.tm)?;
        self.tm.commit()?;

        debug!(
            mapping_root = self.sb.mapping_root,
            hint_root = self.sb.hint_root,
            "committed cache metadata"
        );
        Ok(())
    }
}

fn no_hints() -> MetadataError {
    MetadataError::InvalidMetadata("cache policy keeps no hints".to_string())
}

fn open_arrays(tm: &TransactionManager) -> Result<(Superblock, MappingArray, Option<HintArray>)> {
    let sb = Superblock::read(tm)?;
    let mappings = MappingArray::open(tm, sb.mapping_root, sb.cache_blocks)?;
    let hints = match sb.policy_hint_size as usize {
        0 => None,
        width => Some(HintArray::open(tm, width, sb.hint_root, sb.cache_blocks)?),
    };
    Ok((sb, mappings, hints))
}
