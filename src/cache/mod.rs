//! dm-cache metadata on top of the core array engine
//!
//! - [`superblock`] - the root record at block 0
//! - [`mapping`] / [`mapping_array`] - cache block to origin block mappings
//! - [`hint_array`] - opaque per-block policy hints
//! - [`metadata`] - the three tied together under one transaction manager
//! - [`ir`] / [`xml`] - the textual interchange format
//! - [`restore`], [`dump`], [`repair`], [`check`], [`metadata_size`] - tools

pub mod check;
pub mod dump;
pub mod hint_array;
pub mod ir;
pub mod mapping;
pub mod mapping_array;
pub mod metadata;
pub mod metadata_size;
pub mod repair;
pub mod restore;
pub mod superblock;
pub mod xml;

pub use check::{check, CheckOptions, CheckReport, DamageKind, DamageRecord};
pub use dump::{dump, dump_metadata, DumpOptions};
pub use hint_array::{HintArray, HintArrayDamage, HintDamageVisitor, HintVisitor};
pub use mapping::Mapping;
pub use mapping_array::{MappingArray, MappingArrayDamage, MappingDamageVisitor, MappingVisitor};
pub use metadata::CacheMetadata;
pub use metadata_size::{metadata_size_sectors, SizeOptions};
pub use repair::{repair, RepairOptions};
pub use restore::{restore, RestoreOptions, Restorer};
pub use superblock::Superblock;
