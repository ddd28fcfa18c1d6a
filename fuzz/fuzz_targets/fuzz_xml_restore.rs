#![no_main]
use dmcache_tools::cache::{xml, Restorer};
use dmcache_tools::core::io::CoreBlockIo;
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

// Malformed XML must come back as an error, never a panic
fuzz_target!(|data: &[u8]| {
    let io = Arc::new(CoreBlockIo::new(64));
    let mut restorer = Restorer::new(io, 2, true);
    let _ = xml::read(data, &mut restorer);
});
