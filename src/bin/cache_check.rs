//! cache_check
//!
//! Validate cache metadata and list every damaged range

use anyhow::Context;
use clap::Parser;
use dmcache_tools::cache::{check, CheckOptions};
use dmcache_tools::cli;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "cache_check", version = dmcache_tools::VERSION)]
#[command(about = "Validate cache metadata on a device or file")]
struct Args {
    /// Metadata device or file to check
    input: Option<PathBuf>,

    /// Only set the exit code
    #[arg(short, long)]
    quiet: bool,

    /// Print the report as JSON
    #[arg(long, conflicts_with = "quiet")]
    json: bool,

    /// Don't walk the mapping array
    #[arg(long)]
    skip_mappings: bool,

    /// Don't walk the hint array
    #[arg(long)]
    skip_hints: bool,
}

fn run(args: Args) -> anyhow::Result<bool> {
    let input = cli::require(args.input, "No input file provided.")?;
    cli::check_exists(&input, "file")?;

    let opts = CheckOptions {
        input,
        skip_mappings: args.skip_mappings,
        skip_hints: args.skip_hints,
    };
    let report = check(&opts)?;

    if args.json {
        let text = serde_json::to_string_pretty(&report).context("encoding report")?;
        println!("{}", text);
    } else if !args.quiet {
        for record in &report.damage {
            println!("{}", record);
        }
    }
    Ok(report.is_clean())
}

fn main() -> ExitCode {
    let args = Args::parse();
    let quiet = args.quiet;
    cli::init_logging(quiet);

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            if !quiet {
                eprintln!("{}", e);
            }
            ExitCode::FAILURE
        }
    }
}
