//! Consistency checking of cache metadata
//!
//! Collects every damage record from the mapping and hint arrays into a
//! [`CheckReport`]. The superblock must be readable; without it there is
//! nothing to walk.

use super::hint_array::{HintArray, HintDamageVisitor};
use super::mapping::Mapping;
use super::mapping_array::{MappingArray, MappingDamageVisitor};
use super::superblock::Superblock;
use crate::core::io::FileBlockIo;
use crate::core::run::Run;
use crate::core::transaction::TransactionManager;
use crate::error::Result;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    pub input: PathBuf,
    pub skip_mappings: bool,
    pub skip_hints: bool,
}

impl CheckOptions {
    pub fn new<P: Into<PathBuf>>(input: P) -> Self {
        CheckOptions {
            input: input.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageKind {
    MissingMappings,
    InvalidMapping,
    MissingHints,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DamageRecord {
    pub kind: DamageKind,
    pub desc: String,
    pub begin: u32,
    /// `None` when the damage runs past the last examined entry
    pub end: Option<u32>,
}

impl DamageRecord {
    fn new(kind: DamageKind, desc: &str, keys: Run<u32>) -> Self {
        DamageRecord {
            kind,
            desc: desc.to_string(),
            begin: keys.begin(),
            end: keys.end(),
        }
    }

    pub fn keys(&self) -> Run<u32> {
        match self.end {
            Some(end) => Run::new(self.begin, end),
            None => Run::new_open(self.begin),
        }
    }
}

impl fmt::Display for DamageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            DamageKind::MissingMappings => "missing mappings",
            DamageKind::InvalidMapping => "invalid mapping",
            DamageKind::MissingHints => "missing hints",
        };
        write!(f, "{} {}: {}", what, self.keys(), self.desc)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub version: u32,
    pub cache_blocks: u32,
    pub policy: String,
    pub hint_width: u32,
    pub clean_shutdown: bool,
    pub damage: Vec<DamageRecord>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.damage.is_empty()
    }
}

#[derive(Default)]
struct Recorder {
    damage: Vec<DamageRecord>,
}

impl MappingDamageVisitor for Recorder {
    fn visit_damage(&mut self, desc: &str, keys: Run<u32>) -> Result<()> {
        self.damage
            .push(DamageRecord::new(DamageKind::MissingMappings, desc, keys));
        Ok(())
    }

    fn visit_invalid_mapping(&mut self, desc: &str, cblock: u32, _mapping: &Mapping) -> Result<()> {
        self.damage.push(DamageRecord::new(
            DamageKind::InvalidMapping,
            desc,
            Run::single(cblock),
        ));
        Ok(())
    }
}

impl HintDamageVisitor for Recorder {
    fn visit_damage(&mut self, desc: &str, keys: Run<u32>) -> Result<()> {
        self.damage
            .push(DamageRecord::new(DamageKind::MissingHints, desc, keys));
        Ok(())
    }
}

/// Check the metadata behind `tm` without modifying it
pub fn check_metadata(tm: &TransactionManager, opts: &CheckOptions) -> Result<CheckReport> {
    let sb = Superblock::read(tm)?;
    let mut recorder = Recorder::default();

    if !opts.skip_mappings {
        let mappings = MappingArray::from_parts(sb.mapping_root, sb.cache_blocks)?;
        mappings.check(tm, &mut recorder)?;
        debug!(records = recorder.damage.len(), "checked mappings");
    }

    if !opts.skip_hints && sb.policy_hint_size > 0 {
        let hints = HintArray::from_parts(
            sb.policy_hint_size as usize,
            sb.hint_root,
            sb.cache_blocks,
        )?;
        hints.check(tm, &mut recorder)?;
        debug!(records = recorder.damage.len(), "checked hints");
    }

    Ok(CheckReport {
        version: sb.version,
        cache_blocks: sb.cache_blocks,
        policy: sb.policy_name.clone(),
        hint_width: sb.policy_hint_size,
        clean_shutdown: sb.clean_shutdown(),
        damage: recorder.damage,
    })
}

/// Check a metadata device
pub fn check(opts: &CheckOptions) -> Result<CheckReport> {
    let io = Arc::new(FileBlockIo::open(&opts.input, false)?);
    let tm = TransactionManager::read_only(io);
    let report = check_metadata(&tm, opts)?;

    info!(
        input = %opts.input.display(),
        damage = report.damage.len(),
        "checked cache metadata"
    );
    Ok(report)
}
