//! Per-cache-block policy hints
//!
//! Hints are opaque to the metadata: each is a fixed-width blob owned by
//! the cache policy, one per cache block. The width comes from the policy
//! and is fixed for the lifetime of the array.

use crate::core::array::{Array, ArrayDamage, ArrayVisitor};
use crate::core::run::Run;
use crate::core::transaction::TransactionManager;
use crate::error::Result;

/// Problems found while checking a hint array
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HintArrayDamage {
    /// Hints that could not be read
    MissingHints { desc: String, keys: Run<u32> },
}

impl HintArrayDamage {
    pub fn desc(&self) -> &str {
        match self {
            HintArrayDamage::MissingHints { desc, .. } => desc,
        }
    }

    pub fn keys(&self) -> Run<u32> {
        match self {
            HintArrayDamage::MissingHints { keys, .. } => *keys,
        }
    }

    pub fn accept<V: HintDamageVisitor + ?Sized>(&self, visitor: &mut V) -> Result<()> {
        match self {
            HintArrayDamage::MissingHints { desc, keys } => {
                visitor.visit_missing_hints(desc, *keys)
            }
        }
    }
}

/// Receives hint array damage
pub trait HintDamageVisitor {
    fn visit_damage(&mut self, desc: &str, keys: Run<u32>) -> Result<()>;

    fn visit_missing_hints(&mut self, desc: &str, keys: Run<u32>) -> Result<()> {
        self.visit_damage(desc, keys)
    }
}

/// Receives every readable hint in ascending order, interleaved with damage
pub trait HintVisitor {
    fn visit_hint(&mut self, cblock: u32, data: &[u8]) -> Result<()>;

    fn visit_damage(&mut self, damage: HintArrayDamage) -> Result<()>;
}

struct HintDecoder<'a, V: HintVisitor + ?Sized> {
    width: usize,
    visitor: &'a mut V,
}

impl<V: HintVisitor + ?Sized> ArrayVisitor for HintDecoder<'_, V> {
    fn visit_leaf(&mut self, first_index: u32, values: &[u8]) -> Result<()> {
        for (i, hint) in values.chunks_exact(self.width).enumerate() {
            self.visitor.visit_hint(first_index + i as u32, hint)?;
        }
        Ok(())
    }

    fn visit_damage(&mut self, damage: ArrayDamage) -> Result<()> {
        self.visitor.visit_damage(HintArrayDamage::MissingHints {
            desc: damage.desc,
            keys: damage.run,
        })
    }
}

#[derive(Debug, Clone)]
pub struct HintArray {
    array: Array,
}

impl HintArray {
    /// New, empty hint array for `width`-byte hints
    pub fn create(tm: &mut TransactionManager, width: usize) -> Result<Self> {
        Ok(HintArray {
            array: Array::create(tm, width)?,
        })
    }

    pub fn open(tm: &TransactionManager, width: usize, root: u64, nr_entries: u32) -> Result<Self> {
        Ok(HintArray {
            array: Array::open(tm, width, root, nr_entries)?,
        })
    }

    /// Bind to a possibly damaged array for checking or dumping
    pub fn from_parts(width: usize, root: u64, nr_entries: u32) -> Result<Self> {
        Ok(HintArray {
            array: Array::from_parts(width, root, nr_entries)?,
        })
    }

    pub fn width(&self) -> usize {
        self.array.width()
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

    pub fn get_hint(&self, tm: &TransactionManager, index: u32) -> Result<Vec<u8>> {
        self.array.get_entry(tm, index)
    }

    pub fn set_hint(&mut self, tm: &mut TransactionManager, index: u32, data: &[u8]) -> Result<()> {
        self.array.set_entry(tm, index, data)
    }

    /// Extend to `new_nr_entries`, new hints set to `default`
    pub fn grow(
        &mut self,
        tm: &mut TransactionManager,
        new_nr_entries: u32,
        default: &[u8],
    ) -> Result<()> {
        self.array.grow(tm, new_nr_entries, default)
    }

    pub fn walk<V: HintVisitor + ?Sized>(
        &self,
        tm: &TransactionManager,
        visitor: &mut V,
    ) -> Result<()> {
        let mut decoder = HintDecoder {
            width: self.width(),
            visitor,
        };
        self.array.walk(tm, &mut decoder)
    }

    /// Report every unreadable run of hints as `MissingHints`
    ///
    /// Runs are maximal and ascending; an intact array reports nothing.
    pub fn check<V: HintDamageVisitor + ?Sized>(
        &self,
        tm: &TransactionManager,
        visitor: &mut V,
    ) -> Result<()> {
        self.array.check(tm, |damage| {
            HintArrayDamage::MissingHints {
                desc: damage.desc,
                keys: damage.run,
            }
            .accept(&mut *visitor)
        })
    }
}
