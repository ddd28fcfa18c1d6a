//! Persistent array of fixed-width entries
//!
//! Entries are packed into leaf blocks, and leaves are addressed through a
//! shallow radix tree of index nodes. Entry `i` lives in leaf
//! `i / entries_per_leaf`; the path from the root follows the base-508
//! digits of that leaf number.
//!
//! Every mutation is copy-on-write through the [`TransactionManager`]: the
//! blocks on the path are shadowed, so a root captured by
//! [`Array::snapshot`] keeps seeing the old contents. Mutations may move the
//! root; callers persist [`Array::root`] afterwards.

pub mod node;
mod walk;

pub use node::{INDEX_FANOUT, MAX_ENTRY_WIDTH};
pub use walk::{ArrayDamage, ArrayVisitor, DamageCollector};

use crate::core::block::{Block, BlockKind};
use crate::core::run::Run;
use crate::core::transaction::TransactionManager;
use crate::error::{MetadataError, Result};
use node::{leaf_capacity, leaves_per_child, leaves_per_node, level_for, IndexNode, LeafNode};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Array {
    width: usize,
    entries_per_leaf: u32,
    root: u64,
    nr_entries: u32,
}

/// Parameters of one `grow` call, shared by the recursive extension
struct Growth<'a> {
    old_nr_entries: u32,
    new_nr_entries: u32,
    old_leaves: u64,
    new_leaves: u64,
    fill: &'a [u8],
}

impl Growth<'_> {
    fn partial_tail(&self, entries_per_leaf: u32) -> bool {
        self.old_nr_entries % entries_per_leaf != 0
    }
}

fn damaged(run: Run<u32>, e: MetadataError) -> MetadataError {
    MetadataError::Damaged {
        run,
        desc: e.to_string(),
    }
}

impl Array {
    /// Create an empty array with a fresh root
    pub fn create(tm: &mut TransactionManager, width: usize) -> Result<Self> {
        let entries_per_leaf = leaf_capacity(width)?;

        let mut block = tm.new_block()?;
        IndexNode::new(0, width as u32, entries_per_leaf).write_to(&mut block);
        tm.write(&mut block, BlockKind::ArrayIndex)?;

        debug!(root = block.loc(), width, "created array");
        Ok(Array {
            width,
            entries_per_leaf,
            root: block.loc(),
            nr_entries: 0,
        })
    }

    /// Handle on a stored array without touching the device
    ///
    /// Used where the root may be damaged and the caller wants
    /// [`Array::walk`] to report that rather than fail up front.
    pub fn from_parts(width: usize, root: u64, nr_entries: u32) -> Result<Self> {
        Ok(Array {
            width,
            entries_per_leaf: leaf_capacity(width)?,
            root,
            nr_entries,
        })
    }

    /// Open a stored array, verifying the root agrees with `width` and
    /// `nr_entries`
    pub fn open(
        tm: &TransactionManager,
        width: usize,
        root: u64,
        nr_entries: u32,
    ) -> Result<Self> {
        let array = Array::from_parts(width, root, nr_entries)?;
        array.read_root(tm).map_err(|e| {
            MetadataError::Structure(format!("cannot open array at block {}: {}", root, e))
        })?;
        Ok(array)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn root(&self) -> u64 {
        self.root
    }

    pub fn nr_entries(&self) -> u32 {
        self.nr_entries
    }

    pub fn entries_per_leaf(&self) -> u32 {
        self.entries_per_leaf
    }

    fn nr_leaves(&self) -> u64 {
        leaves_for(self.nr_entries, self.entries_per_leaf)
    }

    /// Entries held by `nr` leaves starting at `first`, clipped to the array
    fn leaves_run(&self, first: u64, nr: u64) -> Run<u32> {
        let per_leaf = self.entries_per_leaf as u64;
        let limit = self.nr_entries as u64;
        let begin = first.saturating_mul(per_leaf).min(limit);
        let end = first.saturating_add(nr).saturating_mul(per_leaf).min(limit);
        Run::new(begin as u32, end as u32)
    }

    pub(crate) fn leaf_run(&self, leaf: u64) -> Run<u32> {
        self.leaves_run(leaf, 1)
    }

    pub(crate) fn index_run(&self, level: u32, base: u64) -> Run<u32> {
        self.leaves_run(base, leaves_per_node(level))
    }

    /// Verify an index node has the shape its position in the tree demands
    pub(crate) fn check_index(&self, node: &IndexNode, level: u32, base: u64) -> Result<()> {
        if node.level != level {
            return Err(MetadataError::Structure(format!(
                "index node at level {}, expected {}",
                node.level, level
            )));
        }

        self.check_geometry(node.value_size, node.max_entries)?;

        let covered = self
            .nr_leaves()
            .saturating_sub(base)
            .min(leaves_per_node(level));
        let expected = covered.div_ceil(leaves_per_child(level));
        if node.children.len() as u64 != expected {
            return Err(MetadataError::Structure(format!(
                "index node has {} children, expected {}",
                node.children.len(),
                expected
            )));
        }

        Ok(())
    }

    pub(crate) fn check_leaf(&self, node: &LeafNode, leaf: u64) -> Result<()> {
        self.check_geometry(node.value_size, node.max_entries)?;

        let expected = self.leaf_run(leaf).len().unwrap_or(0);
        if node.nr_entries() != expected {
            return Err(MetadataError::Structure(format!(
                "leaf holds {} entries, expected {}",
                node.nr_entries(),
                expected
            )));
        }

        Ok(())
    }

    fn check_geometry(&self, value_size: u32, max_entries: u32) -> Result<()> {
        if value_size as usize != self.width {
            return Err(MetadataError::Structure(format!(
                "node stores {}-byte values, expected {}",
                value_size, self.width
            )));
        }
        if max_entries != self.entries_per_leaf {
            return Err(MetadataError::Structure(format!(
                "node claims {} entries per leaf, expected {}",
                max_entries, self.entries_per_leaf
            )));
        }
        Ok(())
    }

    pub(crate) fn read_root(&self, tm: &TransactionManager) -> Result<IndexNode> {
        let block = tm.read(self.root, BlockKind::ArrayIndex)?;
        let node = IndexNode::from_block(&block)?;
        self.check_index(&node, level_for(self.nr_leaves()), 0)?;
        Ok(node)
    }

    /// Read and validate every block from the root down to `leaf`
    ///
    /// A bad block turns into `Damaged` covering the entries below it.
    fn read_path(&self, tm: &TransactionManager, leaf: u64) -> Result<(Vec<IndexNode>, LeafNode)> {
        let root = self
            .read_root(tm)
            .map_err(|e| damaged(Run::new(0, self.nr_entries), e))?;

        let mut base = 0;
        let mut node = root;
        let mut path = Vec::new();
        loop {
            let level = node.level;
            let child_span = leaves_per_child(level);
            let slot = ((leaf - base) / child_span) as usize;
            let child = *node.children.get(slot).ok_or_else(|| {
                MetadataError::Structure(format!("no child {} for leaf {}", slot, leaf))
            })?;
            base += slot as u64 * child_span;
            path.push(node);

            if level == 0 {
                let leaf_node = tm
                    .read(child, BlockKind::ArrayLeaf)
                    .and_then(|block| LeafNode::from_block(&block))
                    .and_then(|n| self.check_leaf(&n, leaf).map(|_| n))
                    .map_err(|e| damaged(self.leaf_run(leaf), e))?;
                return Ok((path, leaf_node));
            }

            node = tm
                .read(child, BlockKind::ArrayIndex)
                .and_then(|block| IndexNode::from_block(&block))
                .and_then(|n| self.check_index(&n, level - 1, base).map(|_| n))
                .map_err(|e| damaged(self.index_run(level - 1, base), e))?;
        }
    }

    fn check_index_bounds(&self, index: u32) -> Result<()> {
        if index >= self.nr_entries {
            return Err(MetadataError::OutOfBounds {
                index,
                nr_entries: self.nr_entries,
            });
        }
        Ok(())
    }

    fn check_width(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.width {
            return Err(MetadataError::WidthMismatch {
                expected: self.width,
                actual: bytes.len(),
            });
        }
        Ok(())
    }

    /// Read one entry
    pub fn get_entry(&self, tm: &TransactionManager, index: u32) -> Result<Vec<u8>> {
        self.check_index_bounds(index)?;

        let leaf = (index / self.entries_per_leaf) as u64;
        let (_, node) = self.read_path(tm, leaf)?;
        node.entry(index % self.entries_per_leaf)
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| {
                let e = MetadataError::Structure("entry missing from leaf".to_string());
                damaged(self.leaf_run(leaf), e)
            })
    }

    /// Overwrite one entry
    ///
    /// The whole path is validated before anything is shadowed, so a damaged
    /// path leaves the array unchanged.
    pub fn set_entry(
        &mut self,
        tm: &mut TransactionManager,
        index: u32,
        bytes: &[u8],
    ) -> Result<()> {
        if tm.is_read_only() {
            return Err(MetadataError::ReadOnly);
        }
        self.check_index_bounds(index)?;
        self.check_width(bytes)?;

        let leaf = (index / self.entries_per_leaf) as u64;
        let (path, _) = self.read_path(tm, leaf)?;
        if tm.nr_free() < path.len() as u64 + 1 {
            return Err(MetadataError::OutOfSpace);
        }

        let (root, mut block) = self.shadow_spine(tm, leaf)?;
        let mut node = LeafNode::from_block(&block)?;
        node.set_entry(index % self.entries_per_leaf, bytes)?;
        node.write_to(&mut block);
        tm.write(&mut block, BlockKind::ArrayLeaf)?;

        self.root = root;
        Ok(())
    }

    /// Shadow every block from the root to `leaf`, re-pointing parents at
    /// the copies. Returns the new root and the writable leaf block.
    fn shadow_spine(&self, tm: &mut TransactionManager, leaf: u64) -> Result<(u64, Block)> {
        let (mut block, inc) = tm.shadow(self.root, BlockKind::ArrayIndex)?;
        let root = block.loc();
        let mut node = IndexNode::from_block(&block)?;
        if inc {
            inc_children(tm, &node)?;
        }

        let mut base = 0;
        loop {
            let child_span = leaves_per_child(node.level);
            let slot = ((leaf - base) / child_span) as usize;
            let child = *node.children.get(slot).ok_or_else(|| {
                MetadataError::Structure(format!("no child {} for leaf {}", slot, leaf))
            })?;
            base += slot as u64 * child_span;

            let kind = if node.level == 0 {
                BlockKind::ArrayLeaf
            } else {
                BlockKind::ArrayIndex
            };
            let (child_block, child_inc) = tm.shadow(child, kind)?;
            node.children[slot] = child_block.loc();
            node.write_to(&mut block);
            tm.write(&mut block, BlockKind::ArrayIndex)?;

            if node.level == 0 {
                return Ok((root, child_block));
            }

            block = child_block;
            node = IndexNode::from_block(&block)?;
            if child_inc {
                inc_children(tm, &node)?;
            }
        }
    }

    /// Extend the array to `new_nr_entries`, filling new entries with `fill`
    ///
    /// Either the array reaches the new length or nothing changes: the right
    /// edge of the tree is validated and the free space is counted before
    /// the first block is written.
    pub fn grow(
        &mut self,
        tm: &mut TransactionManager,
        new_nr_entries: u32,
        fill: &[u8],
    ) -> Result<()> {
        if new_nr_entries <= self.nr_entries {
            return Ok(());
        }
        if tm.is_read_only() {
            return Err(MetadataError::ReadOnly);
        }
        self.check_width(fill)?;

        let plan = Growth {
            old_nr_entries: self.nr_entries,
            new_nr_entries,
            old_leaves: self.nr_leaves(),
            new_leaves: leaves_for(new_nr_entries, self.entries_per_leaf),
            fill,
        };

        let old_level = if plan.old_leaves > 0 {
            let (path, _) = self.read_path(tm, plan.old_leaves - 1)?;
            path.first().map(|root| root.level).unwrap_or(0)
        } else {
            self.read_root(tm)
                .map_err(|e| damaged(Run::new(0, self.nr_entries), e))?
                .level
        };
        let new_level = level_for(plan.new_leaves).max(old_level);

        let needed = self.grow_cost(&plan, old_level, new_level);
        if tm.nr_free() < needed {
            debug!(needed, free = tm.nr_free(), "not enough space to grow array");
            return Err(MetadataError::OutOfSpace);
        }

        let mut root = self.root;
        for level in old_level + 1..=new_level {
            let mut block = tm.new_block()?;
            let mut node = IndexNode::new(level, self.width as u32, self.entries_per_leaf);
            node.children.push(root);
            node.write_to(&mut block);
            tm.write(&mut block, BlockKind::ArrayIndex)?;
            root = block.loc();
        }

        let root = self.extend_index(tm, &plan, Some(root), new_level, 0)?;

        debug!(
            from = self.nr_entries,
            to = new_nr_entries,
            root,
            level = new_level,
            "grew array"
        );
        self.root = root;
        self.nr_entries = new_nr_entries;
        Ok(())
    }

    /// Upper bound on the blocks a grow allocates
    fn grow_cost(&self, plan: &Growth, old_level: u32, new_level: u32) -> u64 {
        let mut cost = plan.new_leaves - plan.old_leaves;
        if plan.partial_tail(self.entries_per_leaf) {
            cost += 1;
        }

        for level in 0..=new_level {
            let wanted = if level == new_level {
                1
            } else {
                plan.new_leaves.div_ceil(leaves_per_node(level))
            };
            let existing = if level > old_level {
                0
            } else if level == old_level {
                1
            } else {
                plan.old_leaves.div_ceil(leaves_per_node(level))
            };

            cost += wanted.saturating_sub(existing);
            if existing > 0 {
                // right-edge node gets shadowed
                cost += 1;
            }
        }
        cost
    }

    /// Whether any of the `nr` leaves from `first` is touched by the growth
    fn grow_touches(&self, plan: &Growth, first: u64, nr: u64) -> bool {
        let end = first.saturating_add(nr);
        let new_leaves = first < plan.new_leaves && end > plan.old_leaves;
        let tail = plan.partial_tail(self.entries_per_leaf)
            && (first..end).contains(&(plan.old_leaves - 1));
        new_leaves || tail
    }

    fn extend_index(
        &self,
        tm: &mut TransactionManager,
        plan: &Growth,
        loc: Option<u64>,
        level: u32,
        base: u64,
    ) -> Result<u64> {
        let (mut block, mut node) = match loc {
            Some(loc) => {
                let (block, inc) = tm.shadow(loc, BlockKind::ArrayIndex)?;
                let node = IndexNode::from_block(&block)?;
                if inc {
                    inc_children(tm, &node)?;
                }
                (block, node)
            }
            None => (
                tm.new_block()?,
                IndexNode::new(level, self.width as u32, self.entries_per_leaf),
            ),
        };

        let child_span = leaves_per_child(level);
        let covered = (plan.new_leaves - base).min(leaves_per_node(level));
        let wanted = covered.div_ceil(child_span) as usize;

        for slot in 0..wanted {
            let child_base = base + slot as u64 * child_span;
            if !self.grow_touches(plan, child_base, child_span) {
                continue;
            }

            let existing = node.children.get(slot).copied();
            let child = if level == 0 {
                self.extend_leaf(tm, plan, existing, child_base)?
            } else {
                self.extend_index(tm, plan, existing, level - 1, child_base)?
            };

            if slot < node.children.len() {
                node.children[slot] = child;
            } else {
                node.children.push(child);
            }
        }

        node.write_to(&mut block);
        tm.write(&mut block, BlockKind::ArrayIndex)?;
        Ok(block.loc())
    }

    fn extend_leaf(
        &self,
        tm: &mut TransactionManager,
        plan: &Growth,
        loc: Option<u64>,
        leaf: u64,
    ) -> Result<u64> {
        let first = leaf * self.entries_per_leaf as u64;
        let count = (plan.new_nr_entries as u64 - first).min(self.entries_per_leaf as u64) as u32;

        let (mut block, mut node) = match loc {
            Some(loc) => {
                let (block, _) = tm.shadow(loc, BlockKind::ArrayLeaf)?;
                let node = LeafNode::from_block(&block)?;
                (block, node)
            }
            None => (
                tm.new_block()?,
                LeafNode::new(self.width as u32, self.entries_per_leaf),
            ),
        };

        node.fill_to(count, plan.fill);
        node.write_to(&mut block);
        tm.write(&mut block, BlockKind::ArrayLeaf)?;
        Ok(block.loc())
    }

    /// Independent handle on the current contents
    ///
    /// Both handles share every block; whichever is modified first copies
    /// the blocks it touches, so neither ever sees the other's writes.
    pub fn snapshot(&self, tm: &mut TransactionManager) -> Result<Array> {
        tm.inc(self.root)?;
        Ok(self.clone())
    }

    /// Every block reachable from the root, failing on the first damaged one
    pub fn blocks(&self, tm: &TransactionManager) -> Result<Vec<u64>> {
        let root = self.read_root(tm)?;
        let mut blocks = vec![self.root];
        self.collect_blocks(tm, &root, 0, &mut blocks)?;
        Ok(blocks)
    }

    fn collect_blocks(
        &self,
        tm: &TransactionManager,
        node: &IndexNode,
        base: u64,
        blocks: &mut Vec<u64>,
    ) -> Result<()> {
        let child_span = leaves_per_child(node.level);
        for (i, &child) in node.children.iter().enumerate() {
            let child_base = base + i as u64 * child_span;
            blocks.push(child);

            if node.level == 0 {
                let leaf = LeafNode::from_block(&tm.read(child, BlockKind::ArrayLeaf)?)?;
                self.check_leaf(&leaf, child_base)?;
            } else {
                let index = IndexNode::from_block(&tm.read(child, BlockKind::ArrayIndex)?)?;
                self.check_index(&index, node.level - 1, child_base)?;
                self.collect_blocks(tm, &index, child_base, blocks)?;
            }
        }
        Ok(())
    }
}

fn leaves_for(nr_entries: u32, entries_per_leaf: u32) -> u64 {
    (nr_entries as u64).div_ceil(entries_per_leaf as u64)
}

fn inc_children(tm: &mut TransactionManager, node: &IndexNode) -> Result<()> {
    for &child in &node.children {
        tm.inc(child)?;
    }
    Ok(())
}
