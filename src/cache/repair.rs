//! Salvage readable metadata onto a fresh device

use super::dump::dump_metadata;
use super::restore::{prepare_output, Restorer};
use super::superblock::Superblock;
use crate::core::io::{BlockIo, FileBlockIo};
use crate::core::transaction::TransactionManager;
use crate::error::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct RepairOptions {
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Rebuild metadata from `input_tm` through `out`
///
/// Damaged mapping ranges come out unmapped; damaged hint ranges come out
/// zeroed. The superblock of the source must be readable.
pub fn repair_metadata(input_tm: &TransactionManager, out: Arc<dyn BlockIo>) -> Result<()> {
    let sb = Superblock::read(input_tm)?;
    let mut restorer = Restorer::new(out, sb.version, true);
    dump_metadata(input_tm, true, &mut restorer)
}

/// Repair `opts.input` onto `opts.output`
///
/// The output superblock is zeroed before the input is opened, so any
/// failure leaves the output unmountable rather than stale.
pub fn repair(opts: &RepairOptions) -> Result<()> {
    let output = prepare_output(&opts.output)?;
    let input = Arc::new(FileBlockIo::open(&opts.input, false)?);
    let input_tm = TransactionManager::read_only(input);

    repair_metadata(&input_tm, output)?;

    info!(
        input = %opts.input.display(),
        output = %opts.output.display(),
        "repaired cache metadata"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::mapping::Mapping;
    use crate::cache::metadata::CacheMetadata;
    use crate::core::io::CoreBlockIo;

    fn damaged_source() -> Arc<CoreBlockIo> {
        let io = Arc::new(CoreBlockIo::new(64));
        let mut sb = Superblock::new();
        sb.policy_name = "smq".to_string();
        sb.policy_hint_size = 4;
        sb.data_block_size = 64;
        sb.cache_blocks = 1200;

        let mut md = CacheMetadata::create(io.clone(), sb).unwrap();
        for cblock in [1u32, 600, 1100] {
            md.set_mapping(cblock, &Mapping::mapped(cblock as u64, true).unwrap())
                .unwrap();
            md.set_hint(cblock, &[9, 9, 9, 9]).unwrap();
        }
        md.commit().unwrap();

        let md = CacheMetadata::open_read_only(io.clone()).unwrap();
        let mapping_blocks = md.mappings().array().blocks(md.tm()).unwrap();
        let hint_blocks = md.hints().unwrap().array().blocks(md.tm()).unwrap();
        // mappings [508, 1016) and hints [1016, 1200)
        io.fail_reads(mapping_blocks[2]);
        io.fail_reads(hint_blocks[2]);
        io
    }

    #[test]
    fn test_repair_salvages_readable_entries() {
        let source = damaged_source();
        let input_tm = TransactionManager::read_only(source);
        let target = Arc::new(CoreBlockIo::new(64));

        repair_metadata(&input_tm, target.clone()).unwrap();

        let md = CacheMetadata::open_read_only(target).unwrap();
        assert!(md.superblock().clean_shutdown());
        assert_eq!(md.nr_cache_blocks(), 1200);
        assert_eq!(md.get_mapping(1).unwrap(), Mapping::mapped(1, true).unwrap());
        assert_eq!(md.get_mapping(600).unwrap(), Mapping::unmapped());
        assert_eq!(md.get_mapping(1100).unwrap(), Mapping::mapped(1100, true).unwrap());

        assert_eq!(md.get_hint(1).unwrap(), vec![9, 9, 9, 9]);
        assert_eq!(md.get_hint(1100).unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_unreadable_superblock_leaves_target_blank() {
        let source = Arc::new(CoreBlockIo::new(8));
        let input_tm = TransactionManager::read_only(source);
        let target = Arc::new(CoreBlockIo::new(64));

        assert!(repair_metadata(&input_tm, target.clone()).is_err());
        assert!(CacheMetadata::open_read_only(target).is_err());
    }
}
