//! admission-guard service binary.

use clap::Parser;
use std::path::PathBuf;

use admission_guard::config::load_config;
use admission_guard::lifecycle;
use admission_guard::GuardConfig;

#[derive(Parser)]
#[command(name = "admission-guard")]
#[command(about = "Admission control service: rate limiting, IP blocking and threat correlation", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };

    lifecycle::run(config, cli.config).await?;
    Ok(())
}
