//! cache_dump
//!
//! Print cache metadata as XML

use clap::Parser;
use dmcache_tools::cache::{dump, DumpOptions};
use dmcache_tools::cli;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "cache_dump", version = dmcache_tools::VERSION)]
#[command(about = "Dump cache metadata to stdout in XML format")]
struct Args {
    /// Metadata device or file to read
    input: Option<PathBuf>,

    /// Write to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Skip damaged regions instead of failing
    #[arg(short, long)]
    repair: bool,

    /// Suppress log output
    #[arg(short, long)]
    quiet: bool,
}

fn run(args: Args) -> anyhow::Result<()> {
    let input = cli::require(args.input, "No input file provided.")?;
    cli::check_exists(&input, "file")?;

    let opts = DumpOptions {
        input,
        output: args.output,
        repair: args.repair,
    };
    dump(&opts)?;
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    cli::init_logging(args.quiet);
    cli::report(run(args))
}
