//! cache_repair
//!
//! Copy whatever is readable from damaged metadata onto a fresh device

use clap::Parser;
use dmcache_tools::cache::{repair, RepairOptions};
use dmcache_tools::cli;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "cache_repair", version = dmcache_tools::VERSION)]
#[command(about = "Repair binary cache metadata, writing the result to a new device")]
struct Args {
    /// Damaged metadata device or file
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Device or file to receive the repaired metadata
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Suppress log output
    #[arg(short, long)]
    quiet: bool,
}

fn run(args: Args) -> anyhow::Result<()> {
    let input = cli::require(args.input, "No input file provided.")?;
    let output = cli::require(args.output, "No output file provided.")?;
    cli::check_exists(&input, "path")?;
    cli::check_exists(&output, "path")?;

    repair(&RepairOptions { input, output })?;
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    cli::init_logging(args.quiet);
    cli::report(run(args))
}
