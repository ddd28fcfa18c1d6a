//! Block-level machinery shared by every metadata structure
//!
//! - [`block`]: checksummed 4 KiB blocks and their common header
//! - [`io`]: file and in-core block stores
//! - [`space_map`]: in-core reference counts
//! - [`transaction`]: validated reads and copy-on-write shadowing
//! - [`array`]: the persistent array and its damage-reporting walk
//! - [`run`]: half-open index ranges

pub mod array;
pub mod block;
pub mod io;
pub mod run;
pub mod space_map;
pub mod transaction;
