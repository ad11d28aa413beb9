//! Binary crate for the `weatherlog` collector.
//!
//! Subcommands run the collection loop once or on an interval, report update statistics,
//! and summarize or export the stored history. The heavy lifting lives in `weatherlog-core`.

use clap::Parser;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cmd = cli::Cli::parse();
    cmd.run().await
}
