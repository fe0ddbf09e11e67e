//! Share counters and hashrate history.
//!
//! One [`Telemetry`] is built at startup and shared by reference. Hashing
//! engines feed per-device counters through [`HashCounters::add`]; the
//! connection manager records share outcomes. Two background loops sample
//! the counters into a [`SnapshotHistory`] and emit periodic reports.
//! Nothing here fails: bad data degrades to a zero rate.

mod report;
mod snapshot;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::PeriodicReportConfig;
use crate::job_source::Algorithm;
use crate::pool::{PoolConnection, PoolStatus};
use crate::shutdown::sleep_or_cancelled;
use crate::tracing::prelude::*;
use crate::types::HashRate;

pub use report::{RateRow, Report, ShareCounts, REPORT_WINDOWS};
pub use snapshot::{Snapshot, SnapshotHistory, Source, RETENTION};

/// Period of snapshot collection.
pub const COLLECT_INTERVAL: Duration = Duration::from_secs(10);

/// Cumulative hash counters, one per CPU thread and one per GPU.
#[derive(Debug)]
pub struct HashCounters {
    cpu: Vec<AtomicU64>,
    gpu: Vec<AtomicU64>,
}

impl HashCounters {
    pub fn new(cpu_threads: usize, gpu_devices: usize) -> Self {
        Self {
            cpu: (0..cpu_threads).map(|_| AtomicU64::new(0)).collect(),
            gpu: (0..gpu_devices).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Count `hashes` more for one device. Unknown devices are ignored.
    pub fn add(&self, source: Source, device: usize, hashes: u64) {
        let counters = match source {
            Source::Cpu => &self.cpu,
            Source::Gpu => &self.gpu,
            Source::Total => return,
        };
        if let Some(counter) = counters.get(device) {
            counter.fetch_add(hashes, Ordering::Relaxed);
        }
    }

    fn cpu_total(&self) -> u64 {
        self.cpu
            .iter()
            .fold(0, |sum, c| sum.saturating_add(c.load(Ordering::Relaxed)))
    }

    fn gpu(&self) -> impl Iterator<Item = u64> + '_ {
        self.gpu.iter().map(|c| c.load(Ordering::Relaxed))
    }

    fn total(&self) -> u64 {
        self.gpu().fold(self.cpu_total(), u64::saturating_add)
    }

    fn reset(&self) {
        for counter in self.cpu.iter().chain(&self.gpu) {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time summary for status queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    /// Hashes counted under the current algorithm
    pub hashes: u64,
    /// Seconds since startup
    pub uptime: u64,
    pub ver: String,
    pub accepted: u64,
    pub rejected: u64,
    pub algo: Option<String>,
}

pub struct Telemetry {
    started: Instant,
    hashes: HashCounters,
    submitted: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
    history: Mutex<SnapshotHistory>,
    algorithm: RwLock<Option<Algorithm>>,
    connection: RwLock<Option<Arc<dyn PoolConnection>>>,
}

impl Telemetry {
    pub fn new(cpu_threads: usize, gpu_devices: usize) -> Self {
        let started = Instant::now();
        Self {
            started,
            hashes: HashCounters::new(cpu_threads, gpu_devices),
            submitted: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            history: Mutex::new(SnapshotHistory::new(started)),
            algorithm: RwLock::new(None),
            connection: RwLock::new(None),
        }
    }

    pub fn hashes(&self) -> &HashCounters {
        &self.hashes
    }

    pub fn record_submitted(&self) -> u64 {
        self.submitted.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn shares(&self) -> ShareCounts {
        ShareCounts {
            submitted: self.submitted.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Prune expired snapshots and record the current counters.
    ///
    /// Readers see the history either before or after the whole collection.
    pub fn collect_snapshot(&self) {
        let now = Instant::now();
        let mut history = self.history.lock();
        history.prune(now);

        let snapshot = |source, device, hashes| Snapshot {
            timestamp: now,
            source,
            device,
            hashes,
        };

        if !self.hashes.cpu.is_empty() {
            history.push(snapshot(Source::Cpu, 0, self.hashes.cpu_total()));
        }
        for (device, hashes) in self.hashes.gpu().enumerate() {
            history.push(snapshot(Source::Gpu, device, hashes));
        }
        history.push(snapshot(Source::Total, 0, self.hashes.total()));
    }

    /// Hash rate of one device over the `window` ending now.
    pub fn windowed_rate(&self, source: Source, device: usize, window: Duration) -> HashRate {
        self.history
            .lock()
            .windowed_rate(source, device, window, Instant::now())
    }

    fn rate_row(&self, source: Source, device: usize) -> RateRow {
        RateRow {
            source,
            device,
            rates: REPORT_WINDOWS.map(|window| self.windowed_rate(source, device, window)),
        }
    }

    /// Collect a fresh snapshot and summarize every device.
    pub fn report(&self) -> Report {
        self.collect_snapshot();

        let mut rows = Vec::new();
        if !self.hashes.cpu.is_empty() {
            rows.push(self.rate_row(Source::Cpu, 0));
        }
        for device in 0..self.hashes.gpu.len() {
            rows.push(self.rate_row(Source::Gpu, device));
        }
        rows.push(self.rate_row(Source::Total, 0));

        Report {
            algorithm: *self.algorithm.read(),
            uptime: self.started.elapsed(),
            rows,
            shares: self.shares(),
        }
    }

    pub fn query_stats(&self) -> Stats {
        let shares = self.shares();
        Stats {
            hashes: self.hashes.total(),
            uptime: self.started.elapsed().as_secs(),
            ver: env!("CARGO_PKG_VERSION").to_string(),
            accepted: shares.accepted,
            rejected: shares.rejected,
            algo: self.algorithm.read().map(|a| a.name().to_string()),
        }
    }

    /// Note the algorithm being mined.
    ///
    /// A change of algorithm discards the hash history and counters, which
    /// are not comparable across algorithms.
    pub fn register_algorithm(&self, algorithm: Algorithm) {
        let mut current = self.algorithm.write();
        if *current == Some(algorithm) {
            return;
        }
        *current = Some(algorithm);

        let mut history = self.history.lock();
        self.hashes.reset();
        history.reset(Instant::now());
        info!(algorithm = %algorithm, "Hashing algorithm changed");
    }

    /// Record the active pool connection, for status output only.
    pub fn register_connection(&self, connection: Option<Arc<dyn PoolConnection>>) {
        *self.connection.write() = connection;
    }

    pub fn pool_status(&self) -> Option<PoolStatus> {
        self.connection.read().as_ref().map(|c| c.status())
    }

    /// Sample the counters every [`COLLECT_INTERVAL`] until cancelled.
    pub async fn run_collector(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            self.collect_snapshot();
            if sleep_or_cancelled(&shutdown, COLLECT_INTERVAL).await {
                break;
            }
        }
        trace!("Snapshot collector stopped");
    }

    /// Log a [`Report`] on the configured schedule until cancelled.
    pub async fn run_reporter(
        self: Arc<Self>,
        schedule: PeriodicReportConfig,
        shutdown: CancellationToken,
    ) {
        if sleep_or_cancelled(&shutdown, schedule.initial_delay()).await {
            return;
        }
        loop {
            info!("{}", self.report());
            if sleep_or_cancelled(&shutdown, schedule.report_interval()).await {
                break;
            }
        }
        trace!("Periodic reporter stopped");
    }
}
