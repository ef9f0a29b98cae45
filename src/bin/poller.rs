use clap::Parser;
use snmp_poller::config::{InventorySource, PollerConfig};
use snmp_poller::inventory::{DeviceInventory, FileInventory, HttpInventory};
use snmp_poller::snmp::SnmpCollector;
use snmp_poller::storage::{AnomalyFilter, InfluxSink, RateEngine};
use snmp_poller::version::VERSION;
use snmp_poller::worker::{CycleOrchestrator, CycleOutcome, DevicePipeline, WorkerPool};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "poller.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if std::env::args().any(|arg| arg == "--version") {
        println!("SNMP poller version: {VERSION}");
        return Ok(());
    }

    let args = Args::parse();

    // Logging needs the configured directory, so configuration errors go to stderr.
    let config = match PollerConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load poller configuration: {e}");
            return Err(e.into());
        }
    };

    init_logging(&config.log_dir);
    info!("Starting SNMP poller, version: {}", VERSION);
    for warning in &config.warnings {
        warn!("{}", warning);
    }

    // --- Collaborators ---
    let inventory: Arc<dyn DeviceInventory> = match &config.inventory {
        InventorySource::Http { url, token } => {
            info!(url = %url, "Using HTTP device inventory.");
            Arc::new(HttpInventory::new(url.clone(), token.clone()))
        }
        InventorySource::File { path } => {
            info!(path = %path.display(), "Using file device inventory.");
            Arc::new(FileInventory::new(path.clone()))
        }
    };
    let sink = Arc::new(InfluxSink::new(
        &config.influx_url,
        &config.influx_org,
        &config.influx_token,
        config.influx_bucket.clone(),
        config.influx_measurement.clone(),
        config.influx_write_timeout(),
    ));

    // --- Pipeline and worker pool ---
    let rates = Arc::new(RateEngine::new(config.max_valid_rate_mbps));
    let filter = AnomalyFilter::new(
        config.default_capacity_mbps,
        config.burst_tolerance,
        config.global_cap_mbps,
    );
    let collector = Arc::new(SnmpCollector::new(config.session_options()));
    let pipeline = Arc::new(DevicePipeline::new(collector, rates.clone(), filter, sink));
    let (queue, pool) = WorkerPool::start(config.worker_count, pipeline);

    let orchestrator = Arc::new(
        CycleOrchestrator::new(inventory, queue, rates, config.inventory_timeout())
            .with_state_retention(config.state_retention()),
    );

    // --- Cycle timer ---
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let mut ticker = interval(config.cycle_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut cycles = JoinSet::new();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = config.cycle_interval_secs,
        workers = pool.size(),
        "Polling scheduler started."
    );

    loop {
        tokio::select! {
            // First tick completes immediately.
            _ = ticker.tick() => {
                while cycles.try_join_next().is_some() {}
                let orchestrator = orchestrator.clone();
                let cancel = cancel_rx.clone();
                cycles.spawn(async move {
                    let outcome = orchestrator.run_cycle(cancel).await;
                    debug!(?outcome, "Cycle ended.");
                    outcome
                });
            }
            signal = &mut shutdown => {
                if let Err(e) = signal {
                    error!(error = %e, "Failed to listen for shutdown signal.");
                }
                info!("Shutdown requested, stopping dispatch.");
                break;
            }
        }
    }

    // Stop dispatching, then let the workers finish what is already queued.
    let _ = cancel_tx.send(true);
    while let Some(result) = cycles.join_next().await {
        match result {
            Ok(CycleOutcome::Cancelled { dispatched }) => {
                info!(dispatched, "In-flight cycle cancelled.")
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Cycle task failed."),
        }
    }
    drop(orchestrator);
    pool.join().await;

    info!("SNMP poller stopped.");
    Ok(())
}
