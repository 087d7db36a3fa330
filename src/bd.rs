//! Brownian dynamics association statistics for the bulk state

use crate::errors::*;
use rand::Rng;
use rand_distr::{Distribution, Gamma, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Draws of a truncated normal that are allowed before giving up
const MAX_POSITIVE_DRAWS: usize = 1000;

/// Where a BD trajectory started on an outer milestone ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BdDestination {
    /// First hit the milestone with this global index
    Milestone(usize),
    /// Escaped to infinite separation
    Escaped,
}

/// Association statistics of one BD milestone
///
/// `k_b` is the rate constant for reaching the outer milestone from infinite separation, and
/// `counts` records where trajectories launched from the outer milestone went next. Counts need
/// not be integers; analytical models supply probabilities directly.
#[derive(Debug, Clone, PartialEq)]
pub struct BdStatistics {
    /// Association rate constant to the outer milestone
    pub k_b: f64,
    /// Standard error of `k_b`; zero if unknown
    pub k_b_std_dev: f64,
    /// Observed first-hit destinations
    pub counts: BTreeMap<BdDestination, f64>,
}

impl BdStatistics {
    /// Statistics with an exactly known `k_b`
    pub fn new(k_b: f64, counts: BTreeMap<BdDestination, f64>) -> Self {
        Self {
            k_b,
            k_b_std_dev: 0.0,
            counts,
        }
    }

    /// Attach a standard error to `k_b`
    pub fn with_k_b_std_dev(mut self, k_b_std_dev: f64) -> Self {
        self.k_b_std_dev = k_b_std_dev;
        self
    }

    /// First-hit probabilities, including the probability of escaping
    pub fn probabilities(&self) -> Result<BTreeMap<BdDestination, f64>> {
        if let Some((_, &count)) = self.counts.iter().find(|(_, &c)| c < 0.0) {
            return Err(AnalysisError::NonPositiveStatistic {
                what: "BD transition count".to_string(),
                value: count,
            });
        }
        let total: f64 = self.counts.values().sum();
        if !(total > 0.0) {
            return Err(AnalysisError::NonPositiveStatistic {
                what: "total BD transition count".to_string(),
                value: total,
            });
        }
        Ok(self
            .counts
            .iter()
            .map(|(&dest, &count)| (dest, count / total))
            .collect())
    }

    /// Draw alternative statistics consistent with these ones
    ///
    /// `k_b` is drawn from a normal distribution truncated at zero, and the transition
    /// probabilities from a Dirichlet distribution over the counts.
    pub fn resample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Self> {
        let k_b = if self.k_b_std_dev > 0.0 {
            let normal = Normal::new(self.k_b, self.k_b_std_dev).map_err(|_| {
                AnalysisError::NonPositiveStatistic {
                    what: "k_b standard deviation".to_string(),
                    value: self.k_b_std_dev,
                }
            })?;
            (0..MAX_POSITIVE_DRAWS)
                .map(|_| normal.sample(rng))
                .find(|&k| k > 0.0)
                .ok_or(AnalysisError::NonPositiveStatistic {
                    what: "resampled k_b".to_string(),
                    value: self.k_b,
                })?
        } else {
            self.k_b
        };

        let mut draws = BTreeMap::new();
        for (&dest, &count) in &self.counts {
            let draw = if count > 0.0 {
                Gamma::new(count, 1.0)
                    .map_err(|_| AnalysisError::NonPositiveStatistic {
                        what: "BD transition count".to_string(),
                        value: count,
                    })?
                    .sample(rng)
            } else {
                0.0
            };
            draws.insert(dest, draw);
        }
        let total: f64 = draws.values().sum();
        if !(total > 0.0) {
            return Err(AnalysisError::NonFinite("resampled BD probabilities"));
        }
        for draw in draws.values_mut() {
            *draw /= total;
        }

        Ok(Self {
            k_b,
            k_b_std_dev: self.k_b_std_dev,
            counts: draws,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn stats() -> BdStatistics {
        let mut counts = BTreeMap::new();
        counts.insert(BdDestination::Milestone(4), 30.0);
        counts.insert(BdDestination::Escaped, 70.0);
        BdStatistics::new(2.5, counts)
    }

    #[test]
    fn probabilities_are_normalised() {
        let p = stats().probabilities().unwrap();
        assert_relative_eq!(p[&BdDestination::Milestone(4)], 0.3);
        assert_relative_eq!(p[&BdDestination::Escaped], 0.7);
    }

    #[test]
    fn empty_counts_are_an_error() {
        let empty = BdStatistics::new(1.0, BTreeMap::new());
        assert!(empty.probabilities().is_err());
    }

    #[test]
    fn resampling_stays_near_the_counts() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let stats = stats().with_k_b_std_dev(0.1);
        let draws: Vec<BdStatistics> = (0..2000)
            .map(|_| stats.resample(&mut rng).unwrap())
            .collect();

        assert!(draws.iter().all(|d| d.k_b > 0.0));
        let mean_k_b = draws.iter().map(|d| d.k_b).sum::<f64>() / draws.len() as f64;
        assert_relative_eq!(mean_k_b, 2.5, epsilon = 0.02);

        let mean_p = draws
            .iter()
            .map(|d| d.counts[&BdDestination::Milestone(4)])
            .sum::<f64>()
            / draws.len() as f64;
        assert_relative_eq!(mean_p, 0.3, epsilon = 0.01);
        for d in &draws {
            assert_relative_eq!(d.counts.values().sum::<f64>(), 1.0, epsilon = 1e-12);
        }
    }
}
