//! Cache block -> origin block mappings, one 8-byte entry per cache block

use super::mapping::Mapping;
use crate::core::array::{Array, ArrayDamage, ArrayVisitor};
use crate::core::run::Run;
use crate::core::transaction::TransactionManager;
use crate::error::Result;

pub const MAPPING_WIDTH: usize = 8;

/// Problems found while checking a mapping array
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingArrayDamage {
    /// Entries that could not be read at all
    MissingMappings { desc: String, keys: Run<u32> },

    /// A readable entry with an impossible flag combination
    InvalidMapping {
        desc: String,
        cblock: u32,
        mapping: Mapping,
    },
}

impl MappingArrayDamage {
    pub fn desc(&self) -> &str {
        match self {
            MappingArrayDamage::MissingMappings { desc, .. }
            | MappingArrayDamage::InvalidMapping { desc, .. } => desc,
        }
    }

    pub fn keys(&self) -> Run<u32> {
        match self {
            MappingArrayDamage::MissingMappings { keys, .. } => *keys,
            MappingArrayDamage::InvalidMapping { cblock, .. } => Run::single(*cblock),
        }
    }

    /// Dispatch to the visitor method for this variant
    pub fn accept<V: MappingDamageVisitor + ?Sized>(&self, visitor: &mut V) -> Result<()> {
        match self {
            MappingArrayDamage::MissingMappings { desc, keys } => {
                visitor.visit_missing_mappings(desc, *keys)
            }
            MappingArrayDamage::InvalidMapping {
                desc,
                cblock,
                mapping,
            } => visitor.visit_invalid_mapping(desc, *cblock, mapping),
        }
    }
}

/// Receives mapping array damage
///
/// Only `visit_damage` is required; the per-variant methods forward to it
/// unless overridden.
pub trait MappingDamageVisitor {
    fn visit_damage(&mut self, desc: &str, keys: Run<u32>) -> Result<()>;

    fn visit_missing_mappings(&mut self, desc: &str, keys: Run<u32>) -> Result<()> {
        self.visit_damage(desc, keys)
    }

    fn visit_invalid_mapping(&mut self, desc: &str, cblock: u32, _mapping: &Mapping) -> Result<()> {
        self.visit_damage(desc, Run::single(cblock))
    }
}

/// Receives every readable entry of a mapping array in ascending order,
/// interleaved with damage
pub trait MappingVisitor {
    fn visit_mapping(&mut self, cblock: u32, mapping: Mapping) -> Result<()>;

    fn visit_damage(&mut self, damage: MappingArrayDamage) -> Result<()>;
}

/// Turns raw array leaves into mappings
struct MappingDecoder<'a, V: MappingVisitor + ?Sized> {
    visitor: &'a mut V,
}

impl<V: MappingVisitor + ?Sized> ArrayVisitor for MappingDecoder<'_, V> {
    fn visit_leaf(&mut self, first_index: u32, values: &[u8]) -> Result<()> {
        for (i, raw) in values.chunks_exact(MAPPING_WIDTH).enumerate() {
            let cblock = first_index + i as u32;
            let mapping = Mapping::from_bytes(raw)?;

            match mapping.defect() {
                Some(desc) => self.visitor.visit_damage(MappingArrayDamage::InvalidMapping {
                    desc: desc.to_string(),
                    cblock,
                    mapping,
                })?,
                None => self.visitor.visit_mapping(cblock, mapping)?,
            }
        }
        Ok(())
    }

    fn visit_damage(&mut self, damage: ArrayDamage) -> Result<()> {
        self.visitor.visit_damage(MappingArrayDamage::MissingMappings {
            desc: damage.desc,
            keys: damage.run,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MappingArray {
    array: Array,
}

impl MappingArray {
    pub fn create(tm: &mut TransactionManager) -> Result<Self> {
        Ok(MappingArray {
            array: Array::create(tm, MAPPING_WIDTH)?,
        })
    }

    pub fn open(tm: &TransactionManager, root: u64, nr_entries: u32) -> Result<Self> {
        Ok(MappingArray {
            array: Array::open(tm, MAPPING_WIDTH, root, nr_entries)?,
        })
    }

    /// Bind to a possibly damaged array for checking or dumping
    pub fn from_parts(root: u64, nr_entries: u32) -> Result<Self> {
        Ok(MappingArray {
            array: Array::from_parts(MAPPING_WIDTH, root, nr_entries)?,
        })
    }

    pub fn root(&self) -> u64 {
        self.array.root()
    }

    pub fn nr_entries(&self) -> u32 {
        self.array.nr_entries()
    }

    pub fn array(&self) -> &Array {
        &self.array
    }

    pub fn get_mapping(&self, tm: &TransactionManager, cblock: u32) -> Result<Mapping> {
        Mapping::from_bytes(&self.array.get_entry(tm, cblock)?)
    }

    pub fn set_mapping(
        &mut self,
        tm: &mut TransactionManager,
        cblock: u32,
        mapping: &Mapping,
    ) -> Result<()> {
        self.array.set_entry(tm, cblock, &mapping.to_bytes())
    }

    /// Extend to `new_nr_entries`, new entries unmapped
    pub fn grow(&mut self, tm: &mut TransactionManager, new_nr_entries: u32) -> Result<()> {
        self.array
            .grow(tm, new_nr_entries, &Mapping::unmapped().to_bytes())
    }

    pub fn walk<V: MappingVisitor + ?Sized>(
        &self,
        tm: &TransactionManager,
        visitor: &mut V,
    ) -> Result<()> {
        self.array.walk(tm, &mut MappingDecoder { visitor })
    }

    /// Report structural damage and malformed entries, ascending
    pub fn check<V: MappingDamageVisitor + ?Sized>(
        &self,
        tm: &TransactionManager,
        visitor: &mut V,
    ) -> Result<()> {
        struct DamageOnly<'a, V: ?Sized>(&'a mut V);

        impl<V: MappingDamageVisitor + ?Sized> MappingVisitor for DamageOnly<'_, V> {
            fn visit_mapping(&mut self, _cblock: u32, _mapping: Mapping) -> Result<()> {
                Ok(())
            }

            fn visit_damage(&mut self, damage: MappingArrayDamage) -> Result<()> {
                damage.accept(&mut *self.0)
            }
        }

        self.walk(tm, &mut DamageOnly(visitor))
    }
}
