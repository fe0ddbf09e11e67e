//! Hash rate type for expressing measured hashing throughput.

use serde::Serialize;

/// Hashing throughput in hashes per second.
///
/// Produced by the telemetry store from snapshot history. Never negative;
/// constructors clamp anything that is not a finite positive number to zero,
/// since a bad sample should read as "no hashing" rather than poison a
/// report.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize)]
pub struct HashRate(f64);

impl HashRate {
    pub const ZERO: HashRate = HashRate(0.0);

    /// Create a rate of N hashes per second.
    pub fn per_second(hashes: f64) -> Self {
        if hashes.is_finite() && hashes > 0.0 {
            Self(hashes)
        } else {
            Self::ZERO
        }
    }

    /// Create a rate from a hash count observed over an interval.
    ///
    /// Returns zero for an empty interval.
    pub fn from_count(hashes: u64, elapsed: std::time::Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            Self::per_second(hashes as f64 / secs)
        } else {
            Self::ZERO
        }
    }

    /// Get the rate as hashes per second.
    pub fn as_per_second(&self) -> f64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0.0
    }

    /// Scale into the largest unit the rate exceeds.
    ///
    /// Returns the scaled value and its unit label, H/s through TH/s.
    pub fn scaled(&self) -> (f64, &'static str) {
        const UNITS: [(f64, &str); 4] = [
            (1e12, "TH/s"),
            (1e9, "GH/s"),
            (1e6, "MH/s"),
            (1e3, "KH/s"),
        ];

        for (factor, unit) in UNITS {
            if self.0 > factor {
                return (self.0 / factor, unit);
            }
        }
        (self.0, "H/s")
    }
}

impl std::fmt::Display for HashRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (value, unit) = self.scaled();
        write!(f, "{:.2} {}", value, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use test_case::test_case;

    #[test_case(0.0, "0.00 H/s" ; "zero")]
    #[test_case(999.0, "999.00 H/s" ; "plain hashes")]
    #[test_case(1000.0, "1000.00 H/s" ; "unit boundary is exclusive")]
    #[test_case(1500.0, "1.50 KH/s" ; "kilo")]
    #[test_case(2_500_000.0, "2.50 MH/s" ; "mega")]
    #[test_case(3_000_000_001.0, "3.00 GH/s" ; "giga")]
    #[test_case(4.2e12, "4.20 TH/s" ; "tera")]
    fn test_display(rate: f64, expected: &str) {
        assert_eq!(HashRate::per_second(rate).to_string(), expected);
    }

    #[test]
    fn test_from_count() {
        let rate = HashRate::from_count(50, Duration::from_secs(20));
        assert!((rate.as_per_second() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_from_count_empty_interval() {
        assert!(HashRate::from_count(50, Duration::ZERO).is_zero());
    }

    #[test]
    fn test_invalid_values_clamp_to_zero() {
        assert!(HashRate::per_second(-1.0).is_zero());
        assert!(HashRate::per_second(f64::NAN).is_zero());
        assert!(HashRate::per_second(f64::INFINITY).is_zero());
    }
}
