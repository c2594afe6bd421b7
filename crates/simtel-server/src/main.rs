//! Simulation telemetry relay.
//!
//! Reads NDJSON events from stdin, publishes them onto the in-process
//! event bus, keeps per-run live buffers, and (when enabled) forwards a
//! durable copy to the columnar sink in batches.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use simtel_core::{event, BufferConfig, BufferManager, EventBus};
use simtel_storage::{Batcher, BatcherConfig, HttpSink, RetryPolicy};

/// Events accumulated per `publish_batch` call while ingesting.
const INGEST_CHUNK: usize = 100;

/// Time budget for the batcher's final flush on shutdown.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// simtel - simulation telemetry fan-out relay
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Ring buffer capacity per run
    #[arg(long, default_value_t = 10_000)]
    buffer_capacity: usize,

    /// Maximum number of buffered runs (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    buffer_max_runs: usize,

    /// Buffer maintenance interval in seconds
    #[arg(long, default_value_t = 300)]
    buffer_cleanup_interval_secs: u64,

    /// Columnar sink URL (e.g. http://localhost:8123)
    #[arg(long)]
    sink_url: Option<String>,

    /// Enable the durable batcher path
    #[arg(long, default_value_t = false)]
    batcher_enabled: bool,

    /// Batch size for sink writes
    #[arg(long, default_value_t = 10_000)]
    batcher_batch_size: usize,

    /// Forced flush interval for the batcher in milliseconds
    #[arg(long, default_value_t = 500)]
    batcher_flush_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("simtel={}", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting simtel relay");
    info!("version: {}", env!("CARGO_PKG_VERSION"));

    let bus = Arc::new(EventBus::new());

    let mut buffers = BufferManager::new(
        &bus,
        BufferConfig {
            capacity: args.buffer_capacity,
            cleanup_interval: Duration::from_secs(args.buffer_cleanup_interval_secs),
            max_runs: args.buffer_max_runs,
        },
    )
    .context("failed to create buffer manager")?;

    let mut batcher = match (&args.sink_url, args.batcher_enabled) {
        (Some(url), true) => {
            let sink = Arc::new(HttpSink::new(url).context("invalid sink URL")?);
            let mut batcher = Batcher::new(
                Arc::clone(&bus),
                sink,
                BatcherConfig {
                    batch_size: args.batcher_batch_size,
                    flush_interval: Duration::from_millis(args.batcher_flush_interval_ms),
                    retry: RetryPolicy::new(3, Duration::from_millis(100)),
                    ..BatcherConfig::default()
                },
            );
            batcher.start().context("failed to start batcher")?;
            info!(sink = url.as_str(), "batcher started");
            Some(batcher)
        }
        _ => {
            info!("batcher disabled; events stay in live buffers only");
            None
        }
    };

    ingest_stdin(&bus).await?;

    info!("shutting down");
    if let Some(batcher) = batcher.as_mut() {
        if let Err(error) = batcher.stop(STOP_TIMEOUT).await {
            warn!(error = %error, "batcher stop failed");
        }
        let stats = batcher.stats();
        info!(
            batches = stats.total_batches,
            events = stats.total_events,
            errors = stats.total_errors,
            "batcher stopped"
        );
    }

    buffers.close().await;
    bus.close();

    let stats = bus.stats();
    info!(
        published = stats.total_published,
        dropped = stats.total_dropped,
        runs = buffers.run_count(),
        "relay stopped"
    );
    Ok(())
}

/// Reads NDJSON from stdin and publishes parsed events in chunks until EOF
/// or ctrl-c. A malformed line is logged and skipped; the stream continues.
async fn ingest_stdin(bus: &EventBus) -> Result<()> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut chunk = Vec::with_capacity(INGEST_CHUNK);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupt received");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    debug!("stdin closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }

                match event::parse_line(&line) {
                    Ok(mut parsed) => {
                        parsed.set_wall_time_now();
                        chunk.push(parsed);
                        if chunk.len() >= INGEST_CHUNK {
                            bus.publish_batch(std::mem::replace(
                                &mut chunk,
                                Vec::with_capacity(INGEST_CHUNK),
                            ))
                            .await;
                        }
                    }
                    Err(error) => debug!(error = %error, "dropped malformed line"),
                }
            }
        }
    }

    if !chunk.is_empty() {
        bus.publish_batch(chunk).await;
    }
    Ok(())
}
