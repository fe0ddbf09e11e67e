//! Human-readable periodic hashrate report.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::job_source::Algorithm;
use crate::types::HashRate;

use super::snapshot::Source;

/// Lookback windows shown for every device, shortest first.
pub const REPORT_WINDOWS: [Duration; 3] = [
    Duration::from_secs(60),
    Duration::from_secs(5 * 60),
    Duration::from_secs(30 * 60),
];

/// Share outcome counters at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShareCounts {
    pub submitted: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub dropped: u64,
}

impl ShareCounts {
    /// Accepted shares as a percentage of those the pool ruled on.
    pub fn acceptance_pct(&self) -> Option<f64> {
        let ruled = self.accepted + self.rejected;
        (ruled > 0).then(|| self.accepted as f64 * 100.0 / ruled as f64)
    }
}

/// Rates of one device over [`REPORT_WINDOWS`].
#[derive(Debug, Clone, PartialEq)]
pub struct RateRow {
    pub source: Source,
    pub device: usize,
    pub rates: [HashRate; 3],
}

impl RateRow {
    fn label(&self) -> String {
        match self.source {
            Source::Gpu => format!("GPU #{}", self.device),
            source => source.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub algorithm: Option<Algorithm>,
    pub uptime: Duration,
    pub rows: Vec<RateRow>,
    pub shares: ShareCounts,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let uptime = self.uptime.as_secs();
        write!(
            f,
            "Hashrate report, uptime {}:{:02}:{:02}",
            uptime / 3600,
            uptime / 60 % 60,
            uptime % 60
        )?;
        if let Some(algorithm) = self.algorithm {
            write!(f, " ({algorithm})")?;
        }

        for row in &self.rows {
            write!(f, "\n  {:<8}", row.label())?;
            for (window, rate) in REPORT_WINDOWS.iter().zip(&row.rates) {
                write!(f, " {:>3}m: {:>12}", window.as_secs() / 60, rate.to_string())?;
            }
        }

        let shares = &self.shares;
        write!(
            f,
            "\n  Shares: {} submitted, {} accepted, {} rejected, {} dropped",
            shares.submitted, shares.accepted, shares.rejected, shares.dropped
        )?;
        if let Some(pct) = shares.acceptance_pct() {
            write!(f, " ({pct:.1}% accepted)")?;
        }
        Ok(())
    }
}
