use anyhow::Context;
use clap::Parser;
use era5_warehouse::cli::{run, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run(cli).await.context("era5-warehouse failed")?;
    Ok(())
}
