//! cache_metadata_size
//!
//! Estimate the metadata device size needed for a cache

use clap::Parser;
use dmcache_tools::cache::SizeOptions;
use dmcache_tools::cli;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "cache_metadata_size", version = dmcache_tools::VERSION)]
#[command(about = "Estimate the size of the metadata device needed for a given configuration")]
struct Args {
    /// Size of the cache device in sectors
    #[arg(long, value_name = "SECTORS")]
    device_size: Option<u64>,

    /// Cache block size in sectors
    #[arg(long, value_name = "SECTORS")]
    block_size: Option<u64>,

    /// Number of cache blocks
    #[arg(long, value_name = "NUM")]
    nr_blocks: Option<u64>,

    /// Largest policy hint, in bytes
    #[arg(long, value_name = "BYTES")]
    max_hint_width: Option<u32>,
}

fn run(args: Args) -> anyhow::Result<()> {
    let opts = SizeOptions {
        device_size: args.device_size,
        block_size: args.block_size,
        nr_blocks: args.nr_blocks,
        max_hint_width: args.max_hint_width,
    };
    println!("{} sectors", opts.sectors()?);
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    cli::init_logging(false);
    cli::report(run(args))
}
