//! stressgen -- synthetic CPU and network load generator.
//!
//! This crate provides the load workers, their phase scheduling, the
//! heartbeat reporter and monitor, and the single-instance daemon lifecycle.

pub mod config;
pub mod daemon;
pub mod engine;
pub mod monitor;
pub mod payload;
pub mod platform;
pub mod pool;
pub mod rate;
pub mod schedule;
pub mod shutdown;
pub mod singleton;
pub mod units;

use std::fs::OpenOptions;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{anyhow, Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{LoggingConfig, StressConfig};
use crate::engine::WorkerContext;
use crate::platform::HostProbe;
use crate::pool::{JoinSummary, LoadPlan, WorkerPool};
use crate::shutdown::Shutdown;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file: {}", path.display()))?;
            let builder = builder.with_writer(Mutex::new(file)).with_ansi(false);
            if config.json {
                builder.json().try_init()
            } else {
                builder.try_init()
            }
        }
        None if config.json => builder.json().try_init(),
        None => builder.try_init(),
    };
    installed.map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))
}

/// Install SIGINT and SIGTERM handlers.
///
/// The handlers are live once this returns; the future resolves on the first
/// of either signal.  Must be called inside a tokio runtime.
pub fn shutdown_signal() -> Result<impl Future<Output = ()> + Send + 'static> {
    let mut interrupt = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => {},
            _ = terminate.recv() => {},
        }
    })
}

/// Run the configured load until every worker exits or `stop` resolves.
///
/// Workers live on plain OS threads; a supervisor thread launches and joins
/// them and reports back over a oneshot channel.  After `stop` fires the
/// workers get `daemon.drain_timeout_secs` to wind down before they are
/// abandoned.
pub async fn run_until<F>(config: StressConfig, shutdown: Shutdown, stop: F) -> Result<Option<JoinSummary>>
where
    F: Future<Output = ()>,
{
    let probe: Arc<dyn HostProbe> = Arc::from(platform::default_probe());
    let plan = LoadPlan::from_config(&config, probe.clone());
    if plan.is_empty() {
        info!("no load sources configured, nothing to do");
        return Ok(Some(JoinSummary::default()));
    }

    info!(
        workers = plan.len(),
        schedule = %plan.schedule,
        desync = ?plan.desync,
        serialize_sends = config.net.serialize_sends,
        "starting load"
    );

    let ctx = WorkerContext::new(config.net.serialize_sends, shutdown.clone());
    let (done_tx, mut done_rx) = oneshot::channel();
    thread::Builder::new()
        .name("stressgen-pool".to_string())
        .spawn(move || {
            let pool = WorkerPool::launch(plan, probe, ctx);
            let _ = done_tx.send(pool.join());
        })
        .context("failed to spawn worker pool thread")?;

    tokio::select! {
        joined = &mut done_rx => {
            let summary = joined.context("worker pool thread vanished")?;
            warn!(failed = summary.failed, "all workers exited");
            return Ok(Some(summary));
        }
        _ = stop => info!("termination requested, stopping workers"),
    }

    shutdown.cancel();
    let drain = config.daemon.drain_timeout();
    match tokio::time::timeout(drain, done_rx).await {
        Ok(Ok(summary)) => {
            info!(completed = summary.completed, failed = summary.failed, "workers stopped");
            Ok(Some(summary))
        }
        Ok(Err(_)) => Err(anyhow!("worker pool thread vanished")),
        Err(_) => {
            warn!(drain_ms = drain.as_millis() as u64, "drain timeout elapsed, abandoning workers");
            Ok(None)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
