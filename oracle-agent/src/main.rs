use std::path::PathBuf;

use clap::Parser;

use oracle_agent::{
    config::parse_config,
    daemon::Daemon,
    tracing::{init_journald_or_stdout, prelude::*, LogSettings},
};

#[derive(Debug, Parser)]
#[command(version, about = "Oracle mining and dispute-tracking agent")]
struct Args {
    /// Configuration file (default: configs/config.json)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let loaded = parse_config(args.config.as_deref())?;
    init_journald_or_stdout(&LogSettings::from(&loaded.config));
    loaded.log_outcome();
    debug!(config = ?loaded.config, "Configuration loaded");

    let daemon = Daemon::new(loaded.config);
    daemon.run().await
}
