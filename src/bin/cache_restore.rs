//! cache_restore
//!
//! Build binary cache metadata on a device from an XML description

use clap::Parser;
use dmcache_tools::cache::superblock::MAX_METADATA_VERSION;
use dmcache_tools::cache::{restore, RestoreOptions};
use dmcache_tools::cli;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "cache_restore", version = dmcache_tools::VERSION)]
#[command(about = "Convert XML format metadata to binary")]
struct Args {
    /// XML file to read
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Metadata device or file to write
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Superblock version to write
    #[arg(long = "debug-override-metadata-version", value_name = "VERSION")]
    metadata_version: Option<u32>,

    /// Leave the clean shutdown flag unset
    #[arg(long)]
    omit_clean_shutdown: bool,

    /// Suppress log output
    #[arg(short, long)]
    quiet: bool,
}

fn run(args: Args) -> anyhow::Result<()> {
    let input = cli::require(args.input, "No input file provided.")?;
    let output = cli::require(args.output, "No output file provided.")?;
    cli::check_exists(&input, "file")?;
    cli::check_exists(&output, "file")?;

    let mut opts = RestoreOptions::new(input, output);
    opts.metadata_version = args.metadata_version.unwrap_or(MAX_METADATA_VERSION);
    opts.clean_shutdown = !args.omit_clean_shutdown;

    restore(&opts)?;
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    cli::init_logging(args.quiet);
    cli::report(run(args))
}
