//! Intermediate representation shared by the dump, restore and repair paths
//!
//! Producers (the XML reader, the metadata dumper) drive a
//! [`MetadataVisitor`]; consumers (the XML writer, the restorer) implement
//! it. Sections always arrive in order: superblock, mappings, hints.

use crate::error::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    pub uuid: String,
    /// Cache block size in sectors
    pub block_size: u32,
    pub nr_cache_blocks: u32,
    pub policy: String,
    pub hint_width: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Map {
    pub cblock: u32,
    pub oblock: u64,
    pub dirty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hint {
    pub cblock: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    Stop,
}

pub trait MetadataVisitor {
    fn superblock_b(&mut self, sb: &Superblock) -> Result<Visit>;
    fn superblock_e(&mut self) -> Result<Visit>;

    fn mappings_b(&mut self) -> Result<Visit>;
    fn mappings_e(&mut self) -> Result<Visit>;
    fn mapping(&mut self, m: &Map) -> Result<Visit>;

    fn hints_b(&mut self) -> Result<Visit>;
    fn hints_e(&mut self) -> Result<Visit>;
    fn hint(&mut self, h: &Hint) -> Result<Visit>;

    fn eof(&mut self) -> Result<Visit>;
}
