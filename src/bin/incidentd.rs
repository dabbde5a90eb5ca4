//! incidentd - incident recording daemon
//!
//! This daemon:
//! 1. Ingests frames from the configured source (device, RTSP, file, stub)
//! 2. Keeps a rolling pre-roll window in memory
//! 3. Runs motion detection on the analysis cadence
//! 4. Records incidents (pre-roll + event frames) to the output directory
//! 5. Logs each artifact as JSON for downstream forwarding
//! 6. Enforces retention on the output directory

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use incident_recorder::{IncidentArtifact, IncidentContext, IncidentdConfig};

const RETENTION_INTERVAL: Duration = Duration::from_secs(60 * 60);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (.toml or .json). Defaults to $INCIDENTD_CONFIG.
    #[arg(long, env = "INCIDENTD_CONFIG")]
    config: Option<PathBuf>,
    /// Video source, overriding the config file.
    #[arg(long)]
    source: Option<String>,
    /// Fire one manual test recording after this many seconds.
    #[arg(long)]
    trigger_test_after: Option<u64>,
    /// Seconds between health log lines.
    #[arg(long, default_value_t = 5)]
    status_interval: u64,
    /// Start with detection paused (manual triggers only).
    #[arg(long)]
    no_detection: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.status_interval == 0 {
        return Err(anyhow!("--status-interval must be >= 1"));
    }

    let mut config = IncidentdConfig::load_from(args.config.as_deref())?;
    if let Some(source) = args.source {
        config.source.spec = source;
    }
    let finalize_budget = config.recorder.quiescence + config.recorder.settle + SHUTDOWN_GRACE;

    let handler = |artifact: &IncidentArtifact| -> Result<()> {
        log::info!("incident artifact: {}", serde_json::to_string(artifact)?);
        Ok(())
    };
    let ctx = IncidentContext::new(config, Arc::new(handler));
    if args.no_detection {
        ctx.set_detection_enabled(false);
    }

    ctx.start()?;
    log::info!(
        "incidentd running. camera {} source {} -> {}",
        ctx.config().camera_id,
        ctx.config().source.spec,
        ctx.config().recorder.output_dir.display()
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let started = Instant::now();
    let mut test_pending = args.trigger_test_after.map(Duration::from_secs);
    let mut last_sweep: Option<Instant> = None;
    let mut last_health = Instant::now();
    let interval = Duration::from_secs(args.status_interval);

    loop {
        if last_sweep.map_or(true, |at| at.elapsed() >= RETENTION_INTERVAL) {
            match ctx.sweep_retention() {
                Ok(report) if !report.removed.is_empty() => {
                    log::info!("retention removed {} artifact(s)", report.removed.len())
                }
                Ok(_) => {}
                Err(e) => log::warn!("retention sweep failed: {:#}", e),
            }
            last_sweep = Some(Instant::now());
        }

        if let Some(after) = test_pending {
            if started.elapsed() >= after {
                match ctx.trigger_test() {
                    Ok(true) => {
                        log::info!("manual test recording triggered");
                        test_pending = None;
                    }
                    Ok(false) => log::info!("recorder busy; retrying test trigger"),
                    Err(e) => log::info!("test trigger deferred: {:#}", e),
                }
            }
        }

        let wait = if test_pending.is_some() {
            interval.min(Duration::from_secs(1))
        } else {
            interval
        };
        match rx.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        if last_health.elapsed() >= interval {
            let status = ctx.status();
            log::info!("health: {}", status.summary());
            log::debug!("status: {}", serde_json::to_string(&status)?);
            last_health = Instant::now();
        }
    }

    log::info!("shutdown signal received, stopping capture...");
    if !ctx.shutdown(finalize_budget) {
        log::warn!("incident still finalizing after {:?}; exiting", finalize_budget);
    }
    Ok(())
}
