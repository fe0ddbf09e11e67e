use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{self, SignalKind};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use dcrpt_miner::api::{self, AppState};
use dcrpt_miner::config::Config;
use dcrpt_miner::connection_manager::ConnectionManager;
use dcrpt_miner::job_source::{job_channel, solution_channel, AlgorithmPolicy, JobReceiver};
use dcrpt_miner::pool::{ConnectionContext, ProviderRegistry};
use dcrpt_miner::telemetry::Telemetry;
use dcrpt_miner::tracing::{self, prelude::*};

/// Pool connectivity daemon for the dcrpt mining client.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pool endpoint, replacing any configured list
    #[arg(long)]
    url: Option<String>,

    /// Pool login (usually a wallet address)
    #[arg(long)]
    user: Option<String>,

    #[arg(long)]
    password: Option<String>,
}

impl Args {
    fn overrides(&self) -> Vec<(&'static str, String)> {
        [
            ("url", &self.url),
            ("user", &self.user),
            ("password", &self.password),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.clone().map(|value| (key, value)))
        .collect()
    }
}

// Stands in for the hashing engines: follows the job stream so telemetry
// knows which algorithm is being mined.
async fn follow_jobs(mut jobs: JobReceiver, telemetry: Arc<Telemetry>, running: CancellationToken) {
    loop {
        let job = tokio::select! {
            _ = running.cancelled() => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        debug!(id = %job.id, kind = %job.kind, difficulty = %job.difficulty, "Job received");
        if let Some(algorithm) = job.algorithm {
            telemetry.register_algorithm(algorithm);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing::init_journald_or_stdout();

    let args = Args::parse();
    let config = Config::load_with_overrides(args.config.as_deref(), args.overrides())
        .context("loading configuration")?;
    let config = Arc::new(config);

    let cpu_threads = if config.cpu.enabled {
        std::thread::available_parallelism().map_or(1, |n| n.get())
    } else {
        0
    };
    let gpu_devices = usize::from(config.gpu.enabled);
    let telemetry = Arc::new(Telemetry::new(cpu_threads, gpu_devices));

    let running = CancellationToken::new();
    let (jobs_tx, jobs_rx) = job_channel();
    let (_solutions_tx, solutions_rx) = solution_channel();

    let context = ConnectionContext {
        config: config.clone(),
        jobs: jobs_tx,
        policy: AlgorithmPolicy::default(),
        shutdown: running.clone(),
    };
    let manager = ConnectionManager::new(context, ProviderRegistry::default(), telemetry.clone())
        .context("setting up pool connections")?;
    let manager = Arc::new(manager);

    let tracker = TaskTracker::new();
    tracker.spawn(telemetry.clone().run_collector(running.clone()));
    tracker.spawn(
        telemetry
            .clone()
            .run_reporter(config.periodic_report.clone(), running.clone()),
    );
    tracker.spawn(follow_jobs(jobs_rx, telemetry.clone(), running.clone()));
    if let Some(listen) = config.api.listen {
        let state = AppState::new(telemetry.clone());
        let running = running.clone();
        tracker.spawn(async move {
            if let Err(e) = api::serve(listen, state, running).await {
                error!(error = %e, "API server failed");
            }
        });
    }
    let mut connections = tokio::spawn(manager.run(solutions_rx));
    tracker.close();
    info!("Started.");

    let mut sigint = unix::signal(SignalKind::interrupt())?;
    let mut sigterm = unix::signal(SignalKind::terminate())?;
    let outcome = tokio::select! {
        _ = sigint.recv() => None,
        _ = sigterm.recv() => None,
        result = &mut connections => Some(result),
    };

    trace!("Shutting down.");
    running.cancel();

    let outcome = match outcome {
        Some(result) => result,
        None => connections.await,
    };
    tracker.wait().await;

    match outcome.context("connection manager panicked")? {
        Ok(()) => {
            info!("Exiting.");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Exiting.");
            Err(e.into())
        }
    }
}
