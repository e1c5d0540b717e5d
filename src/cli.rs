//! Command-line front ends shared by the `zip`/`zipa` and `unzip`/`unzipa`
//! binaries. The binaries differ only in the [`EncodingPolicy`] they pass in.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::collector::{self, SourceSpec};
use crate::encoding::{EncodingPolicy, EncodingResolver};
use crate::io::{LocalFileReader, ReadAt};
use crate::zip::{self as archive, ZipExtractor};

#[derive(Parser, Debug)]
#[command(version)]
#[command(about = "Compress files and directories into a ZIP archive", long_about = None)]
#[command(after_help = "Examples:\n  \
  zip out.zip docs              store docs/ and everything below it as docs/...\n  \
  zip out.zip 'docs/*'          store the contents of docs/ without the docs/ prefix\n  \
  zip out.zip 'src/*.rs' README add matching files from src/ plus README")]
pub struct ZipCli {
    /// ZIP file to create or overwrite
    #[arg(value_name = "ZIP_FILE")]
    pub archive: PathBuf,

    /// Source files or directories; `*` and `?` match names within one directory
    #[arg(value_name = "SOURCE", required = true)]
    pub sources: Vec<String>,

    /// Deflate level (0 = store only)
    #[arg(
        short = 'L',
        long,
        value_name = "0-9",
        default_value_t = archive::DEFAULT_LEVEL,
        value_parser = clap::value_parser!(u32).range(0..=9)
    )]
    pub level: u32,

    /// Quiet mode: -q hides progress and warnings, -qq also hides error logs
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Log debug details to stderr
    #[arg(long)]
    pub debug: bool,
}

#[derive(Parser, Debug)]
#[command(version)]
#[command(about = "Extract a ZIP archive into a directory", long_about = None)]
pub struct UnzipCli {
    /// ZIP file to read
    #[arg(value_name = "ZIP_FILE")]
    pub archive: PathBuf,

    /// Directory to extract into, created if missing (default: current directory)
    #[arg(value_name = "DEST_DIR")]
    pub dest: Option<PathBuf>,

    /// List files (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Quiet mode: -q hides progress and warnings, -qq also hides error logs
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Log debug details to stderr
    #[arg(long)]
    pub debug: bool,
}

/// Install the stderr log subscriber. `RUST_LOG` overrides the flags.
pub fn init_logging(quiet: u8, debug: bool) {
    let default = log_level(quiet, debug);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // A second init (tests) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn log_level(quiet: u8, debug: bool) -> &'static str {
    match (debug, quiet) {
        (true, _) => "debug",
        (false, 0) => "warn",
        (false, 1) => "error",
        (false, _) => "off",
    }
}

/// Collect `cli.sources` and write them to `cli.archive`.
pub async fn run_zip(cli: &ZipCli, policy: EncodingPolicy) -> Result<()> {
    let resolver = EncodingResolver::from_env(policy);
    let sources = cli.sources.join(" ");
    let failed = || {
        format!(
            "Failed to compress {} to {}",
            sources,
            cli.archive.display()
        )
    };

    let specs: Vec<SourceSpec> = cli.sources.iter().map(|s| SourceSpec::parse(s)).collect();
    let entries = collector::collect(&specs).with_context(failed)?;

    if cli.quiet == 0 {
        for entry in &entries {
            let suffix = if entry.is_dir() { "/" } else { "" };
            println!("  adding: {}{}", entry.relative_path, suffix);
        }
    }

    archive::write_archive(&cli.archive, &entries, resolver, cli.level)
        .await
        .with_context(failed)?;

    if cli.quiet == 0 {
        println!(
            "Compressed {} to {} successfully.",
            sources,
            cli.archive.display()
        );
    }
    Ok(())
}

/// List or extract `cli.archive`.
pub async fn run_unzip(cli: &UnzipCli, policy: EncodingPolicy) -> Result<()> {
    let resolver = EncodingResolver::from_env(policy);
    let dest = cli.dest.clone().unwrap_or_else(|| PathBuf::from("."));

    let reader = LocalFileReader::new(&cli.archive)
        .with_context(|| format!("Failed to open {}", cli.archive.display()))?;
    let extractor = ZipExtractor::new(Arc::new(reader), resolver);

    // List mode: display archive contents and exit
    if cli.list || cli.verbose {
        return list_files(&extractor, cli.verbose)
            .await
            .with_context(|| format!("Failed to list {}", cli.archive.display()));
    }

    let quiet = cli.quiet > 0;
    extractor
        .extract_all_with(&dest, |entry| {
            if !quiet {
                let action = if entry.is_directory { "creating" } else { "extracting" };
                println!("  {action}: {}", entry.file_name);
            }
        })
        .await
        .with_context(|| {
            format!(
                "Failed to extract {} to {}",
                cli.archive.display(),
                dest.display()
            )
        })?;

    if cli.quiet == 0 {
        println!(
            "Extracted {} to {} successfully.",
            cli.archive.display(),
            dest.display()
        );
    }
    Ok(())
}

/// List files in the ZIP archive.
///
/// Supports two output formats:
/// - Simple format (`-l`): Just file names, one per line
/// - Verbose format (`-v`): Detailed table with size, compression ratio, and timestamps
async fn list_files<R: ReadAt + 'static>(extractor: &ZipExtractor<R>, verbose: bool) -> crate::Result<()> {
    let entries = extractor.list_files().await?;

    if !verbose {
        for entry in &entries {
            println!("{}", entry.file_name);
        }
        return Ok(());
    }

    println!(
        "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
        "Length", "Size", "Cmpr", "Date", "Time"
    );
    println!("{}", "-".repeat(70));

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in &entries {
        let (year, month, day) = entry.mod_date();
        let (hour, minute, _second) = entry.mod_time();

        println!(
            "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {}",
            entry.uncompressed_size,
            entry.compressed_size,
            ratio(entry.compressed_size, entry.uncompressed_size),
            year,
            month,
            day,
            hour,
            minute,
            entry.file_name
        );

        // Accumulate totals (excluding directories)
        if !entry.is_directory {
            total_uncompressed += entry.uncompressed_size;
            total_compressed += entry.compressed_size;
            file_count += 1;
        }
    }

    println!("{}", "-".repeat(70));
    println!(
        "{:>10}  {:>10}  {}  {:>21}  {} files",
        total_uncompressed,
        total_compressed,
        ratio(total_compressed, total_uncompressed),
        "",
        file_count
    );

    Ok(())
}

/// Space saved as a right-aligned percentage.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed == 0 {
        return format!("{:>4}%", 0);
    }
    let kept = compressed.saturating_mul(100) / uncompressed;
    format!("{:>4}%", 100u64.saturating_sub(kept))
}
