//! Block I/O backends for metadata devices

use crate::core::block::BLOCK_SIZE;
use crate::error::{MetadataError, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Fixed-size block storage addressed by block number
///
/// Implementations report unreadable blocks as errors; checksum validation
/// is layered on top by the transaction manager.
pub trait BlockIo: Send + Sync {
    /// Number of whole blocks the device can hold
    fn nr_blocks(&self) -> u64;

    fn read_block(&self, loc: u64) -> Result<Vec<u8>>;

    fn write_block(&self, loc: u64, data: &[u8]) -> Result<()>;

    fn flush(&self) -> Result<()>;
}

/// Metadata stored in a regular file or block device
pub struct FileBlockIo {
    file: Mutex<File>,
    path: PathBuf,
    nr_blocks: u64,
}

impl FileBlockIo {
    /// Open an existing file or device
    pub fn open<P: AsRef<Path>>(path: P, writable: bool) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(&path)?;

        // Seeking to the end also works for block devices, where metadata()
        // reports a zero length.
        let len = file.seek(SeekFrom::End(0))?;

        Ok(FileBlockIo {
            file: Mutex::new(file),
            path: path.as_ref().to_path_buf(),
            nr_blocks: len / BLOCK_SIZE as u64,
        })
    }

    /// Get file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_loc(&self, loc: u64) -> Result<u64> {
        if loc >= self.nr_blocks {
            return Err(MetadataError::InvalidBlockId(loc));
        }
        Ok(loc * BLOCK_SIZE as u64)
    }
}

impl BlockIo for FileBlockIo {
    fn nr_blocks(&self) -> u64 {
        self.nr_blocks
    }

    fn read_block(&self, loc: u64) -> Result<Vec<u8>> {
        let offset = self.check_loc(loc)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; BLOCK_SIZE];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn write_block(&self, loc: u64, data: &[u8]) -> Result<()> {
        if data.len() != BLOCK_SIZE {
            return Err(MetadataError::InvalidMetadata(format!(
                "Block data must be exactly {} bytes, got {}",
                BLOCK_SIZE,
                data.len()
            )));
        }

        let offset = self.check_loc(loc)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;

        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let mut file = self.file.lock();
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }
}

/// In-core block store
///
/// Unwritten blocks read back as zeroes. Individual blocks can be marked
/// unreadable to simulate media errors.
pub struct CoreBlockIo {
    blocks: RwLock<Vec<Option<Vec<u8>>>>,
    unreadable: RwLock<HashSet<u64>>,
}

impl CoreBlockIo {
    pub fn new(nr_blocks: u64) -> Self {
        let mut blocks = Vec::new();
        blocks.resize_with(nr_blocks as usize, || None);

        CoreBlockIo {
            blocks: RwLock::new(blocks),
            unreadable: RwLock::new(HashSet::new()),
        }
    }

    /// Make subsequent reads of `loc` fail with an I/O error
    pub fn fail_reads(&self, loc: u64) {
        self.unreadable.write().insert(loc);
    }

    /// Undo [`CoreBlockIo::fail_reads`]
    pub fn heal(&self, loc: u64) {
        self.unreadable.write().remove(&loc);
    }

    /// Flip bits inside a stored block, bypassing checksums
    pub fn scribble(&self, loc: u64, offset: usize, bytes: &[u8]) -> Result<()> {
        let mut blocks = self.blocks.write();
        let slot = blocks
            .get_mut(loc as usize)
            .ok_or(MetadataError::InvalidBlockId(loc))?;
        let block = slot.get_or_insert_with(|| vec![0; BLOCK_SIZE]);

        let end = (offset + bytes.len()).min(BLOCK_SIZE);
        if offset >= end {
            return Ok(());
        }
        block[offset..end].copy_from_slice(&bytes[..end - offset]);
        Ok(())
    }
}

impl BlockIo for CoreBlockIo {
    fn nr_blocks(&self) -> u64 {
        self.blocks.read().len() as u64
    }

    fn read_block(&self, loc: u64) -> Result<Vec<u8>> {
        if self.unreadable.read().contains(&loc) {
            return Err(MetadataError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Simulated read failure at block {}", loc),
            )));
        }

        let blocks = self.blocks.read();
        match blocks.get(loc as usize) {
            Some(Some(data)) => Ok(data.clone()),
            Some(None) => Ok(vec![0; BLOCK_SIZE]),
            None => Err(MetadataError::InvalidBlockId(loc)),
        }
    }

    fn write_block(&self, loc: u64, data: &[u8]) -> Result<()> {
        if data.len() != BLOCK_SIZE {
            return Err(MetadataError::InvalidMetadata(format!(
                "Block data must be exactly {} bytes, got {}",
                BLOCK_SIZE,
                data.len()
            )));
        }

        let mut blocks = self.blocks.write();
        let slot = blocks
            .get_mut(loc as usize)
            .ok_or(MetadataError::InvalidBlockId(loc))?;
        *slot = Some(data.to_vec());
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_file_write_and_read_block() {
        let temp = NamedTempFile::new().unwrap();
        temp.as_file().set_len(16 * BLOCK_SIZE as u64).unwrap();

        let io = FileBlockIo::open(temp.path(), true).unwrap();
        assert_eq!(io.nr_blocks(), 16);

        let mut data = vec![0u8; BLOCK_SIZE];
        data[0..5].copy_from_slice(b"Hello");
        io.write_block(3, &data).unwrap();

        let read = io.read_block(3).unwrap();
        assert_eq!(&read[0..5], b"Hello");
    }

    #[test]
    fn test_file_rejects_out_of_range() {
        let temp = NamedTempFile::new().unwrap();
        temp.as_file().set_len(2 * BLOCK_SIZE as u64).unwrap();

        let io = FileBlockIo::open(temp.path(), true).unwrap();
        assert!(matches!(
            io.read_block(2),
            Err(MetadataError::InvalidBlockId(2))
        ));
    }

    #[test]
    fn test_partial_trailing_block_ignored() {
        let temp = NamedTempFile::new().unwrap();
        temp.as_file()
            .set_len(3 * BLOCK_SIZE as u64 + 100)
            .unwrap();

        let io = FileBlockIo::open(temp.path(), false).unwrap();
        assert_eq!(io.nr_blocks(), 3);
    }

    #[test]
    fn test_core_unwritten_reads_zero() {
        let io = CoreBlockIo::new(4);
        assert_eq!(io.read_block(1).unwrap(), vec![0; BLOCK_SIZE]);
    }

    #[test]
    fn test_core_fail_reads() {
        let io = CoreBlockIo::new(4);
        io.fail_reads(2);
        assert!(io.read_block(2).is_err());
        io.heal(2);
        assert!(io.read_block(2).is_ok());
    }

    #[test]
    fn test_core_scribble() {
        let io = CoreBlockIo::new(4);
        io.write_block(1, &vec![1u8; BLOCK_SIZE]).unwrap();
        io.scribble(1, 10, &[0xff, 0xff]).unwrap();

        let data = io.read_block(1).unwrap();
        assert_eq!(data[9], 1);
        assert_eq!(data[10], 0xff);
        assert_eq!(data[12], 1);
    }
}
