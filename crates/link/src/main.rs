//! Channel Link - Main Entry Point
//!
//! Feeds stdin (or `uart.source`) into the UART stream and `usb.source`, if
//! set, into the USB stream, printing JSON channel snapshots until every
//! source ends or Ctrl-C.

use anyhow::Context;
use link::{init_logging, Feeders, Link, LinkConfig};
use std::path::PathBuf;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = LinkConfig::load(config_path.as_deref()).context("loading configuration")?;
    init_logging(&config.logging);

    info!("=== Channel Link v{} ===", env!("CARGO_PKG_VERSION"));
    let link = Link::start(&config)?;

    let mut feeders = Feeders::default();
    match &config.uart.source {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening UART source {}", path.display()))?;
            feeders.attach_uart(&link, file, config.uart.overflow_policy());
        }
        None => feeders.attach_uart(&link, tokio::io::stdin(), config.uart.overflow_policy()),
    }
    if let Some(path) = &config.usb.source {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("opening USB source {}", path.display()))?;
        feeders.attach_usb(&link, file, config.usb.overflow_policy());
    }

    let mut ticker = tokio::time::interval(config.snapshot_interval());
    while !feeders.is_empty() {
        tokio::select! {
            _ = ticker.tick() => {
                println!("{}", serde_json::to_string(&link.snapshot())?);
            }
            Some((stream, fed)) = feeders.next_finished() => {
                info!("{} input finished: {:?}", stream, fed?);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }
    feeders.abort();

    // Let both pumps empty their rings before tearing them down
    let settle = config.uart.idle_yield().max(config.usb.poll_interval()) * 2;
    if !link.wait_idle(settle, 50).await {
        warn!("Stopping with undrained input");
    }

    let report = link.stop().await?;
    println!("{}", serde_json::to_string(&report.snapshot())?);
    Ok(())
}
