//! Read-only traversal over possibly damaged arrays
//!
//! The walker visits leaves in ascending index order. Any block that cannot
//! be read, or that does not have the shape its position demands, is
//! reported as a run of indices instead of aborting the walk. Adjacent bad
//! runs are merged so the visitor sees each damaged region once.

use super::node::{leaves_per_child, IndexNode, LeafNode};
use super::Array;
use crate::core::block::BlockKind;
use crate::core::run::Run;
use crate::core::transaction::TransactionManager;
use crate::error::Result;
use tracing::debug;

/// A maximal run of unreadable or malformed entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayDamage {
    pub desc: String,
    pub run: Run<u32>,
}

/// Receives the contents of an array as it is walked
pub trait ArrayVisitor {
    /// Called for every intact leaf, `values` holding its entries back to back
    fn visit_leaf(&mut self, _first_index: u32, _values: &[u8]) -> Result<()> {
        Ok(())
    }

    fn visit_damage(&mut self, damage: ArrayDamage) -> Result<()>;
}

/// Visitor that only collects damage
#[derive(Debug, Default)]
pub struct DamageCollector {
    pub damage: Vec<ArrayDamage>,
}

impl ArrayVisitor for DamageCollector {
    fn visit_damage(&mut self, damage: ArrayDamage) -> Result<()> {
        self.damage.push(damage);
        Ok(())
    }
}

struct Walker<'a, V: ArrayVisitor + ?Sized> {
    array: &'a Array,
    tm: &'a TransactionManager,
    visitor: &'a mut V,
    pending: Option<ArrayDamage>,
}

impl<'a, V: ArrayVisitor + ?Sized> Walker<'a, V> {
    fn report(&mut self, run: Run<u32>, desc: String) -> Result<()> {
        if run.is_empty() {
            return Ok(());
        }
        debug!(%run, %desc, "array damage");

        if let Some(pending) = &mut self.pending {
            if pending.run.end() == Some(run.begin()) {
                if let Some(merged) = pending.run.merge(&run) {
                    pending.run = merged;
                    return Ok(());
                }
            }
        }

        self.flush()?;
        self.pending = Some(ArrayDamage { desc, run });
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        match self.pending.take() {
            Some(damage) => self.visitor.visit_damage(damage),
            None => Ok(()),
        }
    }

    fn walk_index(&mut self, loc: u64, level: u32, base: u64) -> Result<()> {
        let node = match self
            .tm
            .read(loc, BlockKind::ArrayIndex)
            .and_then(|block| IndexNode::from_block(&block))
            .and_then(|node| self.array.check_index(&node, level, base).map(|_| node))
        {
            Ok(node) => node,
            Err(e) => {
                let run = self.array.index_run(level, base);
                return self.report(run, e.to_string());
            }
        };

        for (i, child) in node.children.iter().enumerate() {
            let child_base = base + i as u64 * leaves_per_child(level);
            if level == 0 {
                self.walk_leaf(*child, child_base)?;
            } else {
                self.walk_index(*child, level - 1, child_base)?;
            }
        }
        Ok(())
    }

    fn walk_leaf(&mut self, loc: u64, leaf: u64) -> Result<()> {
        let node = match self
            .tm
            .read(loc, BlockKind::ArrayLeaf)
            .and_then(|block| LeafNode::from_block(&block))
            .and_then(|node| self.array.check_leaf(&node, leaf).map(|_| node))
        {
            Ok(node) => node,
            Err(e) => {
                let run = self.array.leaf_run(leaf);
                return self.report(run, e.to_string());
            }
        };

        self.flush()?;
        let first = self.array.leaf_run(leaf).begin();
        self.visitor.visit_leaf(first, &node.values)
    }
}

impl Array {
    /// Traverse every entry in ascending order
    ///
    /// Never writes and never stops at damage: each unreadable or malformed
    /// region is passed to [`ArrayVisitor::visit_damage`] as one run, and
    /// every intact leaf to [`ArrayVisitor::visit_leaf`]. Only an error
    /// returned by the visitor ends the walk early.
    pub fn walk<V: ArrayVisitor + ?Sized>(
        &self,
        tm: &TransactionManager,
        visitor: &mut V,
    ) -> Result<()> {
        let mut walker = Walker {
            array: self,
            tm,
            visitor,
            pending: None,
        };

        match self.read_root(tm) {
            Ok(root) => walker.walk_index(self.root(), root.level, 0)?,
            Err(e) => {
                let run = Run::new(0, self.nr_entries());
                walker.report(run, e.to_string())?;
            }
        }

        walker.flush()
    }

    /// Report damaged runs only
    pub fn check<F>(&self, tm: &TransactionManager, on_damage: F) -> Result<()>
    where
        F: FnMut(ArrayDamage) -> Result<()>,
    {
        struct DamageOnly<F>(F);

        impl<F: FnMut(ArrayDamage) -> Result<()>> ArrayVisitor for DamageOnly<F> {
            fn visit_damage(&mut self, damage: ArrayDamage) -> Result<()> {
                (self.0)(damage)
            }
        }

        self.walk(tm, &mut DamageOnly(on_damage))
    }
}
