//! Extract a ZIP archive, writing names as UTF-8.

use clap::Parser;
use zipwrap::EncodingPolicy;
use zipwrap::cli::{self, UnzipCli};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = UnzipCli::parse();
    cli::init_logging(cli.quiet, cli.debug);
    cli::run_unzip(&cli, EncodingPolicy::Utf8).await
}
