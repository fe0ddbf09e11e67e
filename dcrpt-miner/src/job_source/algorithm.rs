//! Hashing algorithm variants and the policy that picks one per job.

use serde::Serialize;
use strum::{Display, EnumString, IntoStaticStr};

/// Payout address credited during the dev-fee window.
const DEV_WALLET: &str = "0059746EF3437645C567B414BA2866317418CE03BD36DA4B91";

/// Hashing algorithm a job must be mined with.
///
/// The engines live outside this crate; here an algorithm is only an
/// identity plus the dev-fee terms attached to it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize,
)]
pub enum Algorithm {
    #[strum(serialize = "pufferfish2bmb")]
    Pufferfish2Bmb,
    #[strum(serialize = "sha256bmb")]
    Sha256Bmb,
}

impl Algorithm {
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Fraction of mining time diverted to the developer (0.01 = 1%).
    pub fn dev_fee(&self) -> f64 {
        match self {
            Algorithm::Pufferfish2Bmb => 0.01,
            Algorithm::Sha256Bmb => 0.01,
        }
    }

    /// Address that receives the dev-fee work.
    pub fn dev_wallet(&self) -> &'static str {
        DEV_WALLET
    }
}

/// Chooses the algorithm for new work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmPolicy {
    /// Always use one algorithm
    Fixed(Algorithm),

    /// Switch algorithms at a block height
    ByHeight {
        threshold: u64,
        below: Algorithm,
        at_or_above: Algorithm,
    },
}

impl AlgorithmPolicy {
    pub fn select(&self, block_height: u64) -> Algorithm {
        match *self {
            AlgorithmPolicy::Fixed(algorithm) => algorithm,
            AlgorithmPolicy::ByHeight {
                threshold,
                below,
                at_or_above,
            } => {
                if block_height >= threshold {
                    at_or_above
                } else {
                    below
                }
            }
        }
    }
}

impl Default for AlgorithmPolicy {
    fn default() -> Self {
        AlgorithmPolicy::Fixed(Algorithm::Pufferfish2Bmb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use test_case::test_case;

    #[test]
    fn test_default_policy_is_fixed() {
        let policy = AlgorithmPolicy::default();
        assert_eq!(policy.select(0), Algorithm::Pufferfish2Bmb);
        assert_eq!(policy.select(u64::MAX), Algorithm::Pufferfish2Bmb);
    }

    #[test_case(124_499, Algorithm::Sha256Bmb ; "below threshold")]
    #[test_case(124_500, Algorithm::Pufferfish2Bmb ; "at threshold")]
    #[test_case(200_000, Algorithm::Pufferfish2Bmb ; "above threshold")]
    fn test_height_policy(height: u64, expected: Algorithm) {
        let policy = AlgorithmPolicy::ByHeight {
            threshold: 124_500,
            below: Algorithm::Sha256Bmb,
            at_or_above: Algorithm::Pufferfish2Bmb,
        };
        assert_eq!(policy.select(height), expected);
    }

    #[test]
    fn test_names_round_trip() {
        for algorithm in [Algorithm::Pufferfish2Bmb, Algorithm::Sha256Bmb] {
            assert_eq!(Algorithm::from_str(algorithm.name()).unwrap(), algorithm);
            assert_eq!(algorithm.to_string(), algorithm.name());
        }
    }

    #[test_case(Algorithm::Pufferfish2Bmb, "pufferfish2bmb" ; "pufferfish")]
    #[test_case(Algorithm::Sha256Bmb, "sha256bmb" ; "sha256")]
    fn test_name_matches_serialized_form(algorithm: Algorithm, expected: &str) {
        assert_eq!(algorithm.name(), expected);
        let name: &'static str = algorithm.into();
        assert_eq!(name, expected);
    }

    #[test]
    fn test_dev_fee_terms() {
        let algorithm = Algorithm::Pufferfish2Bmb;
        assert!(algorithm.dev_fee() > 0.0 && algorithm.dev_fee() < 1.0);
        assert!(!algorithm.dev_wallet().is_empty());
    }
}
