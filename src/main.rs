use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bottleline::{Factory, LineConfig, LogWriter, Subscribe, shutdown};

/// Bottling-line control simulation.
#[derive(Debug, Parser)]
#[command(name = "bottleline", version, about)]
struct Args {
    /// Simulation speed multiplier (2.0 = twice real time).
    #[arg(long, default_value_t = 1.0, value_parser = positive_secs)]
    speed: f64,

    /// Simulated seconds between two new bottles.
    #[arg(long, value_parser = positive_secs)]
    bottle_interval: Option<f64>,

    /// Stop after this many real seconds instead of waiting for a signal.
    #[arg(long)]
    run_for: Option<u64>,

    /// Real seconds between two status snapshots (0 disables them).
    #[arg(long, default_value_t = 5)]
    status_every: u64,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, default_value = "info")]
    log: String,
}

/// Accepts finite values greater than zero.
fn positive_secs(raw: &str) -> Result<f64, String> {
    let v: f64 = raw.parse().map_err(|e| format!("{e}"))?;
    if v.is_finite() && v > 0.0 {
        Ok(v)
    } else {
        Err(format!("expected a finite value > 0, got {raw}"))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut cfg = LineConfig::default();
    cfg.simulation.simulation_speed = args.speed;
    if let Some(interval) = args.bottle_interval {
        cfg.simulation.bottle_interval = interval;
    }

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let factory = Factory::builder(cfg).with_subscribers(subs).build();
    factory.start().await.context("starting the line")?;

    let run_for = async {
        match args.run_for {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        res = shutdown::wait_for_shutdown_signal() => {
            res.context("installing signal handlers")?;
            info!("termination signal received");
        }
        _ = run_for => info!("run time elapsed"),
        _ = report_status(&factory, args.status_every) => {}
    }

    let stopped = factory.stop().await;
    let status = factory.status().await;
    info!(
        status = %serde_json::to_string(&status).unwrap_or_default(),
        "final status"
    );
    if let Err(e) = stopped {
        warn!(label = e.as_label(), "{e}");
        return Err(e.into());
    }
    Ok(())
}

/// Logs a JSON status snapshot every `every_secs`; never returns.
async fn report_status(factory: &Factory, every_secs: u64) {
    if every_secs == 0 {
        return std::future::pending().await;
    }
    let mut ticker = tokio::time::interval(Duration::from_secs(every_secs));
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match serde_json::to_string(&factory.status().await) {
            Ok(json) => info!(status = %json, "line status"),
            Err(e) => warn!(error = %e, "status serialization failed"),
        }
    }
}
