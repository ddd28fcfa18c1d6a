//! # dmcache-tools - device-mapper cache metadata engine and tools
//!
//! `dmcache-tools` reads, writes, checks and repairs the metadata of a
//! device-mapper cache target. The metadata lives on its own block device:
//!
//! - **Checksummed 4 KiB blocks** with a per-kind salt and a self location
//! - **Copy-on-write arrays** indexed by a shallow tree of index nodes
//! - **Damage-aware walks** that report unreadable regions as index ranges
//!   and keep going
//! - **An XML interchange format** for dumping and restoring
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dmcache_tools::cache::{CacheMetadata, Mapping, Superblock};
//! use dmcache_tools::core::io::FileBlockIo;
//! use std::sync::Arc;
//!
//! # fn main() -> dmcache_tools::Result<()> {
//! let io = Arc::new(FileBlockIo::open("/dev/mapper/cache-meta", true)?);
//!
//! let mut sb = Superblock::new();
//! sb.policy_name = "smq".to_string();
//! sb.policy_hint_size = 4;
//! sb.data_block_size = 128;
//! sb.cache_blocks = 1024;
//!
//! let mut md = CacheMetadata::create(io, sb)?;
//! md.set_mapping(0, &Mapping::mapped(4096, true)?)?;
//! md.commit()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Checking for damage
//!
//! ```rust,no_run
//! use dmcache_tools::cache::{check, CheckOptions};
//!
//! # fn main() -> dmcache_tools::Result<()> {
//! let report = check(&CheckOptions::new("/dev/mapper/cache-meta"))?;
//! for record in &report.damage {
//!     println!("{}", record);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod cli;
pub mod core;
pub mod error;

pub use crate::core::array::{Array, ArrayDamage, ArrayVisitor};
pub use crate::core::run::Run;
pub use crate::core::transaction::TransactionManager;
pub use crate::error::{MetadataError, Result};

/// Crate version, reported by every tool's `--version`
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
