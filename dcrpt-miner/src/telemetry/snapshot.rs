//! Hash-count history and windowed rate computation.

use std::time::Duration;

use serde::Serialize;
use strum::Display;
use tokio::time::Instant;

use crate::tracing::prelude::*;
use crate::types::HashRate;

/// Snapshots older than this are pruned on every collection.
pub const RETENTION: Duration = Duration::from_secs(30 * 60);

/// Where a hash count was measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Source {
    /// All CPU threads, aggregated as device 0
    Cpu,
    Gpu,
    /// Sum over all devices, device 0
    Total,
}

/// Cumulative hash count of one device at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub timestamp: Instant,
    pub source: Source,
    pub device: usize,
    pub hashes: u64,
}

/// Retained snapshots, in collection order.
///
/// For a fixed `(source, device)`, `hashes` never decreases as `timestamp`
/// increases as long as the counters feeding it only grow.
#[derive(Debug)]
pub struct SnapshotHistory {
    /// Timestamp of the implicit zero count every series starts from
    origin: Instant,
    snapshots: Vec<Snapshot>,
}

impl SnapshotHistory {
    pub fn new(origin: Instant) -> Self {
        Self {
            origin,
            snapshots: Vec::new(),
        }
    }

    /// Drop everything and restart all series from zero at `origin`.
    pub fn reset(&mut self, origin: Instant) {
        self.origin = origin;
        self.snapshots.clear();
    }

    /// Remove snapshots that are `RETENTION` or more older than `now`.
    pub fn prune(&mut self, now: Instant) {
        if let Some(horizon) = now.checked_sub(RETENTION) {
            self.snapshots.retain(|s| s.timestamp > horizon);
        }
    }

    pub fn push(&mut self, snapshot: Snapshot) {
        self.snapshots.push(snapshot);
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.snapshots.iter()
    }

    /// Hash rate of one series over the `window` ending at `now`.
    ///
    /// The rate is measured from the newest snapshot back to the last point
    /// where the count actually changed, rather than to the window edge:
    ///
    /// - If the count moved inside the window, the baseline is the oldest
    ///   snapshot still holding the count seen at the window start, which
    ///   may lie before the window.
    /// - If the count did not move inside the window, the baseline is the
    ///   newest snapshot with a smaller count, or zero hashes at the origin
    ///   when there is none.
    ///
    /// Returns zero for series with fewer than two snapshots, for an empty
    /// window, and when the baseline cannot be subtracted.
    pub fn windowed_rate(
        &self,
        source: Source,
        device: usize,
        window: Duration,
        now: Instant,
    ) -> HashRate {
        let series: Vec<&Snapshot> = self
            .snapshots
            .iter()
            .filter(|s| s.source == source && s.device == device)
            .collect();

        if series.len() < 2 {
            return HashRate::ZERO;
        }

        let Some(latest) = series.iter().max_by_key(|s| s.timestamp) else {
            return HashRate::ZERO;
        };

        let window_start = now.checked_sub(window).unwrap_or(self.origin);
        let Some(earliest) = series
            .iter()
            .filter(|s| s.timestamp >= window_start)
            .min_by_key(|s| s.timestamp)
        else {
            return HashRate::ZERO;
        };

        let baseline = if earliest.hashes == latest.hashes {
            series
                .iter()
                .filter(|s| s.hashes < latest.hashes)
                .max_by_key(|s| s.timestamp)
                .map(|s| (s.timestamp, s.hashes))
                .unwrap_or((self.origin, 0))
        } else {
            series
                .iter()
                .filter(|s| s.hashes == earliest.hashes)
                .min_by_key(|s| s.timestamp)
                .map(|s| (s.timestamp, s.hashes))
                .unwrap_or((earliest.timestamp, earliest.hashes))
        };

        let (Some(hashes), Some(elapsed)) = (
            latest.hashes.checked_sub(baseline.1),
            latest.timestamp.checked_duration_since(baseline.0),
        ) else {
            warn!(
                source = %source,
                device,
                "Hash count history is inconsistent, reporting zero rate"
            );
            return HashRate::ZERO;
        };

        HashRate::from_count(hashes, elapsed)
    }
}
