//! Extract a ZIP archive; unflagged names are read in the locale codepage.

use clap::Parser;
use zipwrap::EncodingPolicy;
use zipwrap::cli::{self, UnzipCli};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = UnzipCli::parse();
    cli::init_logging(cli.quiet, cli.debug);
    cli::run_unzip(&cli, EncodingPolicy::Legacy).await
}
