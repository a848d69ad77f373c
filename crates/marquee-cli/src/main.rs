//! # marquee
//!
//! Upload GIF animations to a flexible 96x20 LED matrix over BLE.
//!
//! ## Usage
//!
//! ```bash
//! # Decode, re-encode for the panel, and upload
//! marquee animation.gif
//!
//! # Upload the file byte-for-byte
//! marquee animation.gif --raw
//!
//! # Print the packets instead of touching the radio
//! marquee animation.gif --dry-run
//!
//! # Run with environment overrides
//! MARQUEE_DEVICE__ADDRESS=AA:BB:CC:DD:EE:FF marquee animation.gif
//! ```

mod config;
mod handlers;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "marquee")]
#[command(about = "Upload GIF animations to a flexible LED matrix over BLE")]
#[command(version)]
pub struct Cli {
    /// GIF file to upload
    pub file: PathBuf,

    /// Config file (default: marquee.toml, then ~/.config/marquee/marquee.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Device address, overriding the config
    #[arg(short, long)]
    pub device: Option<String>,

    /// Upload the file as-is instead of re-encoding it
    #[arg(long)]
    pub raw: bool,

    /// Run against an in-memory device and print each packet in hex
    #[arg(long)]
    pub dry_run: bool,

    /// Override every frame's display time
    #[arg(long)]
    pub frame_delay_ms: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marquee=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = config::Config::load(cli.config.as_deref())?;
    if let Some(device) = &cli.device {
        config.device.address = device.clone();
    }

    marquee_core::metrics::describe_metrics();

    handlers::run_upload(&cli, config).await
}
