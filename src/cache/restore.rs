//! XML -> binary metadata

use super::ir::{self, Hint, Map, MetadataVisitor, Visit};
use super::mapping::Mapping;
use super::metadata::CacheMetadata;
use super::superblock::{Superblock, MAX_METADATA_VERSION};
use super::xml;
use crate::core::block::BLOCK_SIZE;
use crate::core::io::{BlockIo, FileBlockIo};
use crate::error::{MetadataError, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub input: PathBuf,
    pub output: PathBuf,

    /// Version recorded in the new superblock
    pub metadata_version: u32,

    /// Set the clean shutdown flag
    pub clean_shutdown: bool,
}

impl RestoreOptions {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(input: P, output: Q) -> Self {
        RestoreOptions {
            input: input.into(),
            output: output.into(),
            metadata_version: MAX_METADATA_VERSION,
            clean_shutdown: true,
        }
    }
}

/// Zero the superblock area of an output device and open it for writing
///
/// The zeroing happens first, so however a later step fails the device
/// never carries a stale superblock.
pub fn prepare_output(path: &Path) -> Result<Arc<FileBlockIo>> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let len = file.seek(SeekFrom::End(0))?;

    let zeroes = vec![0u8; len.min(BLOCK_SIZE as u64) as usize];
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&zeroes)?;
    file.sync_all()?;

    if len < BLOCK_SIZE as u64 {
        return Err(MetadataError::OutputTooSmall);
    }
    drop(file);

    Ok(Arc::new(FileBlockIo::open(path, true)?))
}

/// Builds metadata on a device from a stream of IR events
///
/// The superblock is only written when the `</superblock>` event arrives,
/// after every mapping and hint is in place.
pub struct Restorer {
    io: Arc<dyn BlockIo>,
    metadata_version: u32,
    clean_shutdown: bool,
    md: Option<CacheMetadata>,
    committed: bool,
}

impl Restorer {
    pub fn new(io: Arc<dyn BlockIo>, metadata_version: u32, clean_shutdown: bool) -> Self {
        Restorer {
            io,
            metadata_version,
            clean_shutdown,
            md: None,
            committed: false,
        }
    }

    fn md(&mut self) -> Result<&mut CacheMetadata> {
        self.md
            .as_mut()
            .ok_or_else(|| MetadataError::InvalidMetadata("missing superblock".to_string()))
    }
}

impl MetadataVisitor for Restorer {
    fn superblock_b(&mut self, sb: &ir::Superblock) -> Result<Visit> {
        if self.md.is_some() {
            return Err(MetadataError::InvalidMetadata(
                "more than one superblock".to_string(),
            ));
        }

        let mut disk_sb = Superblock::new();
        disk_sb.version = self.metadata_version;
        disk_sb.set_clean_shutdown(self.clean_shutdown);
        disk_sb.set_uuid(&sb.uuid)?;
        disk_sb.policy_name = sb.policy.clone();
        disk_sb.policy_hint_size = sb.hint_width;
        disk_sb.data_block_size = sb.block_size;
        disk_sb.cache_blocks = sb.nr_cache_blocks;

        self.md = Some(CacheMetadata::create(self.io.clone(), disk_sb)?);
        Ok(Visit::Continue)
    }

    fn superblock_e(&mut self) -> Result<Visit> {
        self.md()?.commit()?;
        self.committed = true;
        Ok(Visit::Continue)
    }

    fn mappings_b(&mut self) -> Result<Visit> {
        self.md()?;
        Ok(Visit::Continue)
    }

    fn mappings_e(&mut self) -> Result<Visit> {
        Ok(Visit::Continue)
    }

    fn mapping(&mut self, m: &Map) -> Result<Visit> {
        let mapping = Mapping::mapped(m.oblock, m.dirty)?;
        self.md()?.set_mapping(m.cblock, &mapping)?;
        Ok(Visit::Continue)
    }

    fn hints_b(&mut self) -> Result<Visit> {
        self.md()?;
        Ok(Visit::Continue)
    }

    fn hints_e(&mut self) -> Result<Visit> {
        Ok(Visit::Continue)
    }

    fn hint(&mut self, h: &Hint) -> Result<Visit> {
        self.md()?.set_hint(h.cblock, &h.data)?;
        Ok(Visit::Continue)
    }

    fn eof(&mut self) -> Result<Visit> {
        if !self.committed {
            return Err(MetadataError::InvalidMetadata(
                "no complete superblock in input".to_string(),
            ));
        }
        Ok(Visit::Continue)
    }
}

/// Write the metadata described by an XML file to a device
pub fn restore(opts: &RestoreOptions) -> Result<()> {
    let input = File::open(&opts.input)?;
    let io = prepare_output(&opts.output)?;

    let mut restorer = Restorer::new(io, opts.metadata_version, opts.clean_shutdown);
    xml::read(BufReader::new(input), &mut restorer)?;

    info!(
        input = %opts.input.display(),
        output = %opts.output.display(),
        "restored cache metadata"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::CoreBlockIo;
    use tempfile::NamedTempFile;

    const XML: &str = r#"<superblock uuid="abc" block_size="64" nr_cache_blocks="1000" policy="smq" hint_width="4">
  <mappings>
    <mapping cache_block="5" origin_block="500" dirty="true"/>
  </mappings>
  <hints>
    <hint cache_block="5" data="AQIDBA=="/>
  </hints>
</superblock>
"#;

    #[test]
    fn test_restorer_builds_metadata() {
        let io = Arc::new(CoreBlockIo::new(64));
        let mut restorer = Restorer::new(io.clone(), 2, true);
        xml::read(XML.as_bytes(), &mut restorer).unwrap();

        let md = CacheMetadata::open_read_only(io).unwrap();
        assert_eq!(md.superblock().uuid_string(), "abc");
        assert_eq!(md.superblock().data_block_size, 64);
        assert_eq!(md.get_mapping(5).unwrap(), Mapping::mapped(500, true).unwrap());
        assert_eq!(md.get_hint(5).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_mapping_out_of_range_leaves_no_superblock() {
        let xml = XML.replace("cache_block=\"5\" origin", "cache_block=\"1000\" origin");
        let io = Arc::new(CoreBlockIo::new(64));
        let mut restorer = Restorer::new(io.clone(), 2, true);

        assert!(matches!(
            xml::read(xml.as_bytes(), &mut restorer),
            Err(MetadataError::OutOfBounds { .. })
        ));
        assert!(CacheMetadata::open_read_only(io).is_err());
    }

    #[test]
    fn test_truncated_input_rejected() {
        let xml = r#"<superblock uuid="" block_size="64" nr_cache_blocks="10" policy="smq" hint_width="4">"#;
        let io = Arc::new(CoreBlockIo::new(64));
        let mut restorer = Restorer::new(io, 2, true);
        assert!(xml::read(xml.as_bytes(), &mut restorer).is_err());
    }

    #[test]
    fn test_prepare_output_zeroes_small_file() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(&[0xff; 100]).unwrap();

        assert!(matches!(
            prepare_output(temp.path()),
            Err(MetadataError::OutputTooSmall)
        ));
        assert_eq!(std::fs::read(temp.path()).unwrap(), vec![0; 100]);
    }
}
