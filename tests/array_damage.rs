//! Damage localization tests for the persistent array
//!
//! Leaves are knocked out on an in-core device and the walk must report
//! exactly the affected index ranges, merged and ascending.

use dmcache_tools::core::array::{Array, DamageCollector};
use dmcache_tools::core::io::CoreBlockIo;
use dmcache_tools::{Run, TransactionManager};
use std::sync::Arc;

/// 406-byte entries pack ten to a leaf
const WIDTH: usize = 406;

fn build(nr_entries: u32) -> (Arc<CoreBlockIo>, TransactionManager, Array) {
    let io = Arc::new(CoreBlockIo::new(256));
    let mut tm = TransactionManager::new(io.clone()).unwrap();
    let mut array = Array::create(&mut tm, WIDTH).unwrap();
    array.grow(&mut tm, nr_entries, &[7; WIDTH]).unwrap();
    assert_eq!(array.entries_per_leaf(), 10);
    (io, tm, array)
}

fn leaf_block(tm: &TransactionManager, array: &Array, leaf: usize) -> u64 {
    // single-level tree: the root, then every leaf in order
    array.blocks(tm).unwrap()[1 + leaf]
}

fn damage(tm: &TransactionManager, array: &Array) -> Vec<Run<u32>> {
    let mut collector = DamageCollector::default();
    array.walk(tm, &mut collector).unwrap();
    collector.damage.into_iter().map(|d| d.run).collect()
}

#[test]
fn test_two_missing_ranges() {
    let (io, tm, array) = build(600);

    for leaf in (10..15).chain(50..52) {
        io.fail_reads(leaf_block(&tm, &array, leaf));
    }

    assert_eq!(damage(&tm, &array), vec![Run::new(100, 150), Run::new(500, 520)]);
}

#[test]
fn test_undamaged_array_reports_nothing() {
    let (_io, tm, array) = build(600);
    assert!(damage(&tm, &array).is_empty());
}

#[test]
fn test_damage_heals() {
    let (io, tm, array) = build(100);
    let block = leaf_block(&tm, &array, 3);

    io.fail_reads(block);
    assert_eq!(damage(&tm, &array), vec![Run::new(30, 40)]);

    io.heal(block);
    assert!(damage(&tm, &array).is_empty());
}

#[test]
fn test_last_partial_leaf_is_clipped() {
    let (io, tm, array) = build(95);
    io.fail_reads(leaf_block(&tm, &array, 9));

    assert_eq!(damage(&tm, &array), vec![Run::new(90, 95)]);
}

#[test]
fn test_corrupt_root_loses_everything() {
    let (io, tm, array) = build(600);
    io.scribble(array.root(), 100, &[0xaa; 32]).unwrap();

    assert_eq!(damage(&tm, &array), vec![Run::new(0, 600)]);
    assert!(array.get_entry(&tm, 0).is_err());
}

#[test]
fn test_good_entries_still_readable() {
    let (io, tm, array) = build(600);
    io.fail_reads(leaf_block(&tm, &array, 20));

    assert!(array.get_entry(&tm, 205).is_err());
    assert_eq!(array.get_entry(&tm, 215).unwrap(), vec![7; WIDTH]);
}

#[test]
fn test_empty_array_reports_nothing() {
    let io = Arc::new(CoreBlockIo::new(16));
    let mut tm = TransactionManager::new(io.clone()).unwrap();
    let array = Array::create(&mut tm, WIDTH).unwrap();
    assert_eq!(array.nr_entries(), 0);
    assert!(damage(&tm, &array).is_empty());

    io.fail_reads(array.root());
    assert!(damage(&tm, &array).is_empty());

    let mut checked = 0;
    array
        .check(&tm, |_| {
            checked += 1;
            Ok(())
        })
        .unwrap();
    assert_eq!(checked, 0);
}

#[test]
fn test_every_leaf_damaged() {
    let (io, tm, array) = build(600);
    let blocks = array.blocks(&tm).unwrap();
    assert_eq!(blocks.len(), 61);

    for &leaf in &blocks[1..] {
        io.fail_reads(leaf);
    }

    assert_eq!(damage(&tm, &array), vec![Run::new(0, 600)]);
}
