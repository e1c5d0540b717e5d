//! Compress sources into a ZIP archive, storing names as UTF-8.

use clap::Parser;
use zipwrap::EncodingPolicy;
use zipwrap::cli::{self, ZipCli};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = ZipCli::parse();
    cli::init_logging(cli.quiet, cli.debug);
    cli::run_zip(&cli, EncodingPolicy::Utf8).await
}
