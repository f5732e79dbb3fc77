use anyhow::Result;
use std::time::{Duration, Instant};

use dexwatch::core::{logging, Config};
use dexwatch::ledger::DedupLedger;
use dexwatch::pipeline::Pipeline;
use dexwatch::scheduler::Scheduler;
use dexwatch::source::WebDriverSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobKind {
    Discovery,
    Refresh,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    logging::init_logging(&config.monitoring.log_level);

    tracing::info!("dexwatch starting");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Listing: {}", config.source.listing_url());

    let mut source = WebDriverSource::new(&config.source);
    source.connect().await?;

    let ledger = DedupLedger::load(&config.storage.data_dir)?;
    let mut pipeline = Pipeline::new(source, ledger, &config);

    // Rows that never got a contract address get one more try at startup.
    match pipeline.backfill_missing_contracts().await {
        Ok(0) => {}
        Ok(n) => tracing::info!("backfilled {} contract addresses", n),
        Err(e) => tracing::warn!("contract backfill failed: {:#}", e),
    }

    let mut scheduler = Scheduler::new();
    scheduler.register(
        JobKind::Discovery,
        Duration::from_secs(config.scan.poll_interval_minutes * 60),
    );
    if config.scan.refresh_enabled {
        scheduler.register(
            JobKind::Refresh,
            Duration::from_secs(config.scan.refresh_interval_minutes * 60),
        );
    }

    // First discovery runs immediately; after that the scheduler decides.
    run_job(&mut pipeline, JobKind::Discovery).await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received, stopping at tick boundary");
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                for job in scheduler.tick(Instant::now()) {
                    run_job(&mut pipeline, job).await;
                }
            }
        }
    }

    let (mut source, ledger) = pipeline.into_parts();
    if let Err(e) = ledger.flush() {
        tracing::warn!("final ledger flush failed: {}", e);
    }
    if let Err(e) = source.quit().await {
        tracing::warn!("webdriver session teardown failed: {}", e);
    }
    tracing::info!("dexwatch stopped");
    Ok(())
}

/// Cycle failures are logged and absorbed; the process only stops on an
/// explicit signal.
async fn run_job(pipeline: &mut Pipeline<WebDriverSource>, job: JobKind) {
    let result = match job {
        JobKind::Discovery => pipeline.run_discovery_cycle().await.map(|_| ()),
        JobKind::Refresh => pipeline.run_refresh_cycle().await.map(|_| ()),
    };
    if let Err(e) = result {
        tracing::error!("{:?} cycle failed, waiting for next tick: {:#}", job, e);
    }
}
