//! Ground-station scanline cache and dispatcher binary.
//!
//! # Usage
//!
//! ```bash
//! orbrelay-server --config /etc/orbrelay/station.ini
//! ```

use std::path::PathBuf;

use clap::Parser;
use orbrelay_server::{StationConfig, Supervisor};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Ground-station scanline cache and dispatcher.
#[derive(Parser, Debug)]
#[command(name = "orbrelay-server")]
#[command(about = "Tails HRPT direct-readout files and serves scanlines to peers and clients")]
#[command(version)]
struct Args {
    /// Path to the station's INI configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = StationConfig::load(&args.config)?;
    tracing::info!(station = %config.station, data_dir = %config.data_dir.display(), "loading station configuration");

    let supervisor = Supervisor::start(config).await?;

    tracing::info!("orbrelay-server running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    supervisor.stop().await;
    Ok(())
}
