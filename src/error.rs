use crate::core::block::BlockKind;
use crate::core::run::Run;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Index {index} out of bounds (array holds {nr_entries} entries)")]
    OutOfBounds { index: u32, nr_entries: u32 },

    #[error("Entry width mismatch: expected {expected} bytes, got {actual}")]
    WidthMismatch { expected: usize, actual: usize },

    #[error("Invalid entry width: {0}")]
    InvalidWidth(usize),

    #[error("Array structure error: {0}")]
    Structure(String),

    #[error("Damaged entries {run}: {desc}")]
    Damaged { run: Run<u32>, desc: String },

    #[error("Checksum mismatch in block {block}")]
    ChecksumMismatch { block: u64 },

    #[error("Block {block} has kind {found:#x}, expected {expected:?}")]
    WrongBlockKind {
        block: u64,
        expected: BlockKind,
        found: u32,
    },

    #[error("Block {block} claims to live at {found}")]
    WrongLocation { block: u64, found: u64 },

    #[error("Out of space: no free metadata blocks available")]
    OutOfSpace,

    #[error("Invalid block ID: {0}")]
    InvalidBlockId(u64),

    #[error("Transaction manager is read-only")]
    ReadOnly,

    #[error("Bad superblock: {0}")]
    BadSuperblock(String),

    #[error("Unsupported metadata version: {0}")]
    UnsupportedVersion(u32),

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("Metadata device too small.")]
    DeviceTooSmall,

    #[error("Output file too small.")]
    OutputTooSmall,

    /// Bad command-line or tool arguments; the message is shown verbatim
    #[error("{0}")]
    InvalidArguments(String),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MetadataError {
    /// True for errors that describe unreadable or malformed on-disk blocks,
    /// as opposed to caller mistakes or environment failures.
    pub fn is_block_damage(&self) -> bool {
        matches!(
            self,
            MetadataError::ChecksumMismatch { .. }
                | MetadataError::WrongBlockKind { .. }
                | MetadataError::WrongLocation { .. }
                | MetadataError::Io(_)
                | MetadataError::InvalidBlockId(_)
        )
    }
}

impl From<quick_xml::Error> for MetadataError {
    fn from(e: quick_xml::Error) -> Self {
        MetadataError::Xml(e.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for MetadataError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        MetadataError::Xml(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MetadataError>;
