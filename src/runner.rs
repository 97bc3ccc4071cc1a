// =============================================================================
// Runner — historical replay and realtime supervisor
// =============================================================================
//
// Both modes share one `Engine` behind a single `tokio::sync::Mutex`: the
// ingest loop and the periodic tick loop each take the lock only for the
// call they need, never holding it across an `.await`, so the two never
// interleave a partially-applied event with a stall check. Historical mode
// has no reconnect logic -- a CSV adapter error aborts the run. Realtime
// mode wraps the live adapter in a reconnect loop, rebuilding it from
// scratch on error; one loop covers the whole `Adapter` since the
// combined-stream endpoint carries every stream on one socket.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

use crate::adapters::csv_replay::CsvAdapter;
use crate::adapters::live_ws::LiveWsAdapter;
use crate::adapters::Adapter;
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::output::OutputWriter;

fn now_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64
}

fn data_dir(config: &EngineConfig) -> std::path::PathBuf {
    if config.paths.phase.is_empty() {
        config.paths.data_root.clone()
    } else {
        config.paths.data_root.join(&config.paths.phase)
    }
}

/// Spawn the periodic stall-check tick as its own task against the shared
/// engine handle. Aborted by the caller once the ingest loop ends.
fn spawn_ticker(engine: Arc<AsyncMutex<Engine>>, interval_ms: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            engine.lock().await.tick(now_us());
        }
    })
}

/// Replay a historical capture end to end. Exits as soon as the CSV adapter
/// is exhausted, or aborts immediately on the first adapter error -- there
/// is no reconnect concept for a bounded file replay.
pub async fn run_historical(config: &EngineConfig) -> Result<()> {
    let output = Arc::new(OutputWriter::open(&config.output_dir("historical"))?);
    let engine = Arc::new(AsyncMutex::new(Engine::new(config, output, now_us())));

    let mut adapter = CsvAdapter::open(&data_dir(config), &config.adapters.csv)
        .context("failed to open historical CSV adapter")?;

    let ticker = spawn_ticker(engine.clone(), config.engine.tick_interval_ms);

    let result = loop {
        match adapter.next_event().await {
            Ok(Some(ev)) => {
                engine.lock().await.ingest(ev, now_us());
            }
            Ok(None) => break Ok(()),
            Err(e) => {
                error!(error = %e, "historical replay aborted by adapter error");
                break Err(e);
            }
        }
    };

    adapter.close().await;
    ticker.abort();
    engine.lock().await.shutdown(now_us());

    result.context("historical replay failed")?;
    info!("historical replay complete");
    Ok(())
}

/// Run the live feed until ctrl-c. Adapter failures (connect errors, socket
/// drops, stream end) are logged and the adapter is rebuilt from scratch
/// after `reconnect_delay_ms`; only ctrl-c ends the loop cleanly.
pub async fn run_realtime(config: &EngineConfig) -> Result<()> {
    let output = Arc::new(OutputWriter::open(&config.output_dir("realtime"))?);
    let engine = Arc::new(AsyncMutex::new(Engine::new(config, output, now_us())));

    let ticker = spawn_ticker(engine.clone(), config.engine.tick_interval_ms);

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                stop.store(true, Ordering::SeqCst);
            }
        });
    }

    while !stop.load(Ordering::SeqCst) {
        let mut adapter = match LiveWsAdapter::open(&config.exchange, &config.symbol, &config.adapters.ws).await {
            Ok(a) => a,
            Err(e) => {
                warn!(error = %e, "live adapter failed to start, retrying");
                sleep_or_stop(&stop, config.adapters.ws.reconnect_delay_ms).await;
                continue;
            }
        };
        info!(exchange = %config.exchange, symbol = %config.symbol, "live adapter connected");

        loop {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            match adapter.next_event().await {
                Ok(Some(ev)) => {
                    engine.lock().await.ingest(ev, now_us());
                }
                Ok(None) => {
                    warn!("live adapter closed, reconnecting");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "live adapter error, reconnecting");
                    break;
                }
            }
        }
        adapter.close().await;

        if !stop.load(Ordering::SeqCst) {
            sleep_or_stop(&stop, config.adapters.ws.reconnect_delay_ms).await;
        }
    }

    ticker.abort();
    engine.lock().await.shutdown(now_us());
    info!("realtime engine shut down");
    Ok(())
}

async fn sleep_or_stop(stop: &Arc<AtomicBool>, delay_ms: u64) {
    let deadline = Duration::from_millis(delay_ms);
    let step = Duration::from_millis(200.min(delay_ms.max(1)));
    let mut waited = Duration::ZERO;
    while waited < deadline {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        let remaining = deadline - waited;
        tokio::time::sleep(step.min(remaining)).await;
        waited += step.min(remaining);
    }
}
