//! Binary metadata -> IR events (and so XML)

use super::hint_array::{HintArray, HintArrayDamage, HintVisitor};
use super::ir::{self, Hint, Map, MetadataVisitor, Visit};
use super::mapping::Mapping;
use super::mapping_array::{MappingArray, MappingArrayDamage, MappingVisitor};
use super::superblock::Superblock;
use super::xml::XmlWriter;
use crate::core::io::FileBlockIo;
use crate::core::run::Run;
use crate::core::transaction::TransactionManager;
use crate::error::{MetadataError, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct DumpOptions {
    pub input: PathBuf,

    /// Write here instead of stdout
    pub output: Option<PathBuf>,

    /// Skip damaged regions instead of failing
    pub repair: bool,
}

impl DumpOptions {
    pub fn new<P: Into<PathBuf>>(input: P) -> Self {
        DumpOptions {
            input: input.into(),
            output: None,
            repair: false,
        }
    }
}

macro_rules! visit {
    ($e:expr) => {
        if let Visit::Stop = $e? {
            return Ok(());
        }
    };
}

/// Cache blocks seen with a valid mapping
///
/// Grows as mappings arrive, so its size follows what the walk actually
/// found rather than the superblock's block count.
#[derive(Default)]
struct MappedSet {
    bits: Vec<u64>,
}

impl MappedSet {
    fn insert(&mut self, cblock: u32) {
        let word = cblock as usize / 64;
        if word >= self.bits.len() {
            self.bits.resize(word + 1, 0);
        }
        self.bits[word] |= 1 << (cblock % 64);
    }

    fn contains(&self, cblock: u32) -> bool {
        self.bits
            .get(cblock as usize / 64)
            .map_or(false, |word| word & (1 << (cblock % 64)) != 0)
    }
}

fn skip_or_fail(repair: bool, array: &str, keys: Run<u32>, desc: &str) -> Result<()> {
    if repair {
        warn!(%keys, %desc, "skipping damaged {}", array);
        Ok(())
    } else {
        Err(MetadataError::Damaged {
            run: keys,
            desc: desc.to_string(),
        })
    }
}

struct MappingEmitter<'a, V: MetadataVisitor + ?Sized> {
    out: &'a mut V,
    repair: bool,
    mapped: MappedSet,
    stopped: bool,
}

impl<V: MetadataVisitor + ?Sized> MappingVisitor for MappingEmitter<'_, V> {
    fn visit_mapping(&mut self, cblock: u32, mapping: Mapping) -> Result<()> {
        if self.stopped || !mapping.is_valid() {
            return Ok(());
        }

        self.mapped.insert(cblock);
        let m = Map {
            cblock,
            oblock: mapping.oblock,
            dirty: mapping.is_dirty(),
        };
        if let Visit::Stop = self.out.mapping(&m)? {
            self.stopped = true;
        }
        Ok(())
    }

    fn visit_damage(&mut self, damage: MappingArrayDamage) -> Result<()> {
        skip_or_fail(self.repair, "mappings", damage.keys(), damage.desc())
    }
}

struct HintEmitter<'a, V: MetadataVisitor + ?Sized> {
    out: &'a mut V,
    repair: bool,
    mapped: &'a MappedSet,
    stopped: bool,
}

impl<V: MetadataVisitor + ?Sized> HintVisitor for HintEmitter<'_, V> {
    fn visit_hint(&mut self, cblock: u32, data: &[u8]) -> Result<()> {
        if self.stopped || !self.mapped.contains(cblock) {
            return Ok(());
        }

        let h = Hint {
            cblock,
            data: data.to_vec(),
        };
        if let Visit::Stop = self.out.hint(&h)? {
            self.stopped = true;
        }
        Ok(())
    }

    fn visit_damage(&mut self, damage: HintArrayDamage) -> Result<()> {
        skip_or_fail(self.repair, "hints", damage.keys(), damage.desc())
    }
}

/// Walk the metadata behind `tm`, emitting mapped cache blocks and their
/// hints in ascending order
///
/// With `repair` set, damaged ranges are logged and left out; otherwise
/// the first damage aborts the dump. The superblock itself must be intact.
pub fn dump_metadata<V: MetadataVisitor + ?Sized>(
    tm: &TransactionManager,
    repair: bool,
    out: &mut V,
) -> Result<()> {
    let sb = Superblock::read(tm)?;

    visit!(out.superblock_b(&ir::Superblock {
        uuid: sb.uuid_string(),
        block_size: sb.data_block_size,
        nr_cache_blocks: sb.cache_blocks,
        policy: sb.policy_name.clone(),
        hint_width: sb.policy_hint_size,
    }));

    visit!(out.mappings_b());
    let mappings = MappingArray::from_parts(sb.mapping_root, sb.cache_blocks)?;
    let mut emitter = MappingEmitter {
        out: &mut *out,
        repair,
        mapped: MappedSet::default(),
        stopped: false,
    };
    mappings.walk(tm, &mut emitter)?;
    if emitter.stopped {
        return Ok(());
    }
    let mapped = emitter.mapped;
    visit!(out.mappings_e());

    visit!(out.hints_b());
    if sb.policy_hint_size > 0 {
        let hints = HintArray::from_parts(
            sb.policy_hint_size as usize,
            sb.hint_root,
            sb.cache_blocks,
        )?;
        let mut emitter = HintEmitter {
            out: &mut *out,
            repair,
            mapped: &mapped,
            stopped: false,
        };
        hints.walk(tm, &mut emitter)?;
        if emitter.stopped {
            return Ok(());
        }
    }
    visit!(out.hints_e());

    visit!(out.superblock_e());
    visit!(out.eof());
    Ok(())
}

fn dump_to<W: Write>(tm: &TransactionManager, repair: bool, out: W) -> Result<()> {
    let mut writer = XmlWriter::new(out);
    dump_metadata(tm, repair, &mut writer)
}

/// Dump a metadata device as XML
pub fn dump(opts: &DumpOptions) -> Result<()> {
    let io = Arc::new(FileBlockIo::open(&opts.input, false)?);
    let tm = TransactionManager::read_only(io);

    match &opts.output {
        Some(path) => dump_to(&tm, opts.repair, BufWriter::new(File::create(path)?))?,
        None => dump_to(&tm, opts.repair, BufWriter::new(std::io::stdout().lock()))?,
    }

    info!(input = %opts.input.display(), repair = opts.repair, "dumped cache metadata");
    Ok(())
}
