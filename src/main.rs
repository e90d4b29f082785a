//! resilience-probe
//!
//! Drives simulated calls through the toolkit and prints what happened.
//!
//! ```text
//!  call ids ──▶ BoundedQueue (pending) ──▶ workers ──▶ CallPipeline ──▶ flaky collaborator
//!                                                          │
//!                                           successes ──▶ BoundedCache (results)
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use tokio::time::Instant;

use bounded_resilience::bounded::{BoundedCache, BoundedQueue, CacheStats, QueueEvent, QueueMetrics};
use bounded_resilience::config::{load_config, ToolkitConfig};
use bounded_resilience::observability::{logging, metrics};
use bounded_resilience::resilience::{CallPipeline, PipelineStats};

#[derive(Parser)]
#[command(name = "resilience-probe")]
#[command(about = "Drive simulated calls through bounded-resilience primitives", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of calls to issue
    #[arg(short = 'n', long, default_value_t = 200)]
    calls: usize,

    /// Probability that a simulated call fails
    #[arg(short, long, default_value_t = 0.2)]
    failure_rate: f64,

    /// Base latency of a simulated call in milliseconds
    #[arg(short, long, default_value_t = 20)]
    latency_ms: u64,
}

/// Stand-in for a remote dependency with random latency and failures.
struct FlakyCollaborator {
    failure_rate: f64,
    latency: Duration,
}

impl FlakyCollaborator {
    async fn call(&self, id: usize) -> Result<u64, String> {
        let extra = rand::thread_rng().gen_range(0..=self.latency.as_millis() as u64);
        let latency = self.latency + Duration::from_millis(extra);
        tokio::time::sleep(latency).await;

        if rand::thread_rng().gen_bool(self.failure_rate) {
            Err(format!("call {} failed", id))
        } else {
            Ok(latency.as_millis() as u64)
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct Outcomes {
    succeeded: u64,
    failed: u64,
    timed_out: u64,
    rejected: u64,
    dropped_before_start: u64,
}

#[derive(Serialize)]
struct ProbeReport {
    calls: usize,
    elapsed_ms: u64,
    outcomes: Outcomes,
    pipeline: PipelineStats,
    results_cache: CacheStats,
    pending_queue: QueueMetrics,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ToolkitConfig::default(),
    };

    if let Err(e) = logging::init_logging(&config.observability) {
        eprintln!("Failed to initialise logging: {}", e);
    }

    tracing::info!(
        calls = cli.calls,
        failure_rate = cli.failure_rate,
        latency_ms = cli.latency_ms,
        "resilience-probe starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to install metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let pipeline = Arc::new(CallPipeline::from_config(&config)?);
    let results = Arc::new(BoundedCache::<usize, u64>::new(config.cache.clone())?);
    let (pending, mut events) = BoundedQueue::<usize>::with_events(config.queue.clone())?;
    let pending = Arc::new(pending);
    let collaborator = Arc::new(FlakyCollaborator {
        failure_rate: cli.failure_rate.clamp(0.0, 1.0),
        latency: Duration::from_millis(cli.latency_ms),
    });
    let outcomes = Arc::new(Mutex::new(Outcomes::default()));

    for id in 0..cli.calls {
        pending.enqueue(id);
    }
    while let Ok(event) = events.try_recv() {
        if let QueueEvent::Dropped(_) | QueueEvent::Rejected(_) = event {
            outcomes.lock().dropped_before_start += 1;
        }
    }

    let started = Instant::now();
    let workers = config.concurrency.max_concurrency * 2;
    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let pipeline = pipeline.clone();
        let results = results.clone();
        let pending = pending.clone();
        let collaborator = collaborator.clone();
        let outcomes = outcomes.clone();

        handles.push(tokio::spawn(async move {
            let collaborator = &*collaborator;
            while let Some(id) = pending.dequeue() {
                let result = pipeline.call(move || collaborator.call(id)).await;

                let mut tally = outcomes.lock();
                match result {
                    Ok(latency) => {
                        results.set(id, latency);
                        tally.succeeded += 1;
                    }
                    Err(e) if e.is_rejection() => tally.rejected += 1,
                    Err(e) if e.is_timeout() => tally.timed_out += 1,
                    Err(e) => {
                        tracing::debug!(call = id, error = %e, "Call failed");
                        tally.failed += 1;
                    }
                }
            }
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Worker task failed");
        }
    }

    let report = ProbeReport {
        calls: cli.calls,
        elapsed_ms: started.elapsed().as_millis() as u64,
        outcomes: std::mem::take(&mut *outcomes.lock()),
        pipeline: pipeline.stats(),
        results_cache: results.stats(),
        pending_queue: pending.metrics(),
    };
    results.destroy();
    pending.destroy();

    println!("{}", serde_json::to_string_pretty(&report)?);
    tracing::info!("resilience-probe finished");
    Ok(())
}
