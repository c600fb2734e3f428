//! nokey-hub: runs the NoKey hub for one execution context on stdio.
//!
//! Envelopes arrive on stdin and leave on stdout, one JSON object per line.
//! Logs go to stderr.

#![forbid(unsafe_code)]

mod bridge;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::io::BufReader;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use nokey_core::{HubBuilder, HubConfig};
use nokey_proto::DeviceType;

#[derive(Parser, Debug)]
#[command(name = "nokey-hub")]
#[command(version, about = "NoKey hub - key custody and message relay for one device")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding persisted state and keys
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Directory exported files are written to
    #[arg(long)]
    export_dir: Option<PathBuf>,

    /// Log filter, e.g. `info` or `nokey_core=debug`
    #[arg(short, long)]
    log_level: Option<String>,

    /// Name this context is registered under
    #[arg(long, default_value = "stdio")]
    origin: String,
}

impl Args {
    /// Command-line values take precedence over file and environment.
    fn apply(&self, config: &mut HubConfig) {
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(dir) = &self.export_dir {
            config.export_dir = dir.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = HubConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(data_dir = %config.data_dir.display(), "starting nokey-hub");

    let buffer = config.channel_buffer;
    let hub = HubBuilder::new(config)
        .device_type(DeviceType::Desktop)
        .start()
        .await?;

    let reader = BufReader::new(tokio::io::stdin());
    let writer = tokio::io::stdout();

    tokio::select! {
        result = bridge::serve(hub, &args.origin, reader, writer, buffer) => {
            if let Err(e) = result {
                error!("bridge error: {}", e);
                return Err(e);
            }
            info!("input closed, shutting down");
        }
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("shutdown signal received");
        }
    }

    Ok(())
}
