#![no_main]
use arbitrary::Arbitrary;
use dmcache_tools::core::array::{Array, DamageCollector};
use dmcache_tools::core::io::CoreBlockIo;
use dmcache_tools::TransactionManager;
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

#[derive(Arbitrary, Debug)]
struct Scribble {
    block: u8,
    offset: u16,
    bytes: Vec<u8>,
}

#[derive(Arbitrary, Debug)]
struct Input {
    width: u8,
    nr_entries: u16,
    scribbles: Vec<Scribble>,
}

// Corrupted blocks must show up as damage runs, never as panics
fuzz_target!(|input: Input| {
    let width = input.width.max(1) as usize;
    let io = Arc::new(CoreBlockIo::new(256));
    let mut tm = match TransactionManager::new(io.clone()) {
        Ok(tm) => tm,
        Err(_) => return,
    };
    let mut array = match Array::create(&mut tm, width) {
        Ok(a) => a,
        Err(_) => return,
    };
    if array.grow(&mut tm, input.nr_entries as u32, &vec![0; width]).is_err() {
        return;
    }

    for s in &input.scribbles {
        let _ = io.scribble(s.block as u64, s.offset as usize, &s.bytes);
    }

    let mut collector = DamageCollector::default();
    if array.walk(&tm, &mut collector).is_ok() {
        let mut last_end = 0;
        for damage in &collector.damage {
            assert!(damage.run.begin() >= last_end);
            last_end = damage.run.end().unwrap_or(u32::MAX);
        }
    }
});
