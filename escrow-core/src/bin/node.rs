//! Escrow node binary
//!
//! Replays the create/advance/withdraw scenario against a manual clock and
//! prints the resulting snapshots as JSON, followed by the metrics in
//! Prometheus text format. With `keep_running` set, it then reports ledger
//! totals until Ctrl-C.
//!
//! Usage: `escrow-node [config.toml]`

use anyhow::Context;
use escrow_core::{AccountId, ClockSource, Config, ManualClock, PayoutBook, StreamLedger};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tokio::time::{interval, Duration};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("loading config from {}", path))?,
        None => Config::from_env().context("loading config from environment")?,
    };
    config.validate().context("invalid configuration")?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        "Starting escrow node"
    );

    let clock = Arc::new(ManualClock::new(chrono::Utc::now().timestamp()));
    let book = Arc::new(PayoutBook::new());
    let ledger = StreamLedger::new(&config, clock.clone(), book.clone())?;

    let sender = AccountId::new("owner");
    let recipient = AccountId::new("other-user");
    let sim = &config.simulation;

    let start_time = clock
        .now()
        .checked_add(sim.start_delay_secs)
        .context("simulation.start_delay_secs overflows the clock")?;
    let stop_time = start_time
        .checked_add(sim.duration_secs)
        .context("simulation.duration_secs overflows the clock")?;
    let stream_id = ledger.create_stream(
        &sender,
        &recipient,
        sim.deposit,
        start_time,
        stop_time,
        sim.deposit,
    )?;
    println!("{}", serde_json::to_string_pretty(&ledger.get_stream(stream_id)?)?);

    clock.advance(sim.advance_secs);

    let before = book.balance_of(&recipient);
    let paid = ledger.withdraw_max(stream_id, &recipient)?;
    let after = book.balance_of(&recipient);
    tracing::info!(stream_id, paid, gained = after - before, "Recipient withdrew");

    println!("{}", serde_json::to_string_pretty(&ledger.get_stream(stream_id)?)?);
    println!("{}", serde_json::to_string_pretty(&ledger.events(stream_id)?)?);

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&ledger.metrics().registry().gather(), &mut buffer)?;
    println!("{}", String::from_utf8(buffer)?);

    if !sim.keep_running {
        return Ok(());
    }

    let mut report = interval(Duration::from_millis(sim.report_interval_ms));
    loop {
        tokio::select! {
            _ = report.tick() => {
                tracing::info!(
                    streams = ledger.stream_count(),
                    locked = ledger.total_locked(),
                    withdrawals = ledger.metrics().withdrawals.get(),
                    "Ledger status"
                );
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
        }
    }

    tracing::info!("Shutting down escrow node");
    Ok(())
}
