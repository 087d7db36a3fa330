//! Assembly of the global milestone rate matrix
//!
//! For MMVT the per-anchor statistics are combined with the anchor weights $\pi_\alpha$:
//!
//! $$ T = \left( \sum_\alpha \frac{\pi_\alpha}{T_\alpha} \right)^{-1} $$
//!
//! $$ N_{ij} = \sum_\alpha \frac{T \pi_\alpha N^\alpha_{ij}}{T_\alpha}, \quad
//!    R_i = \sum_\alpha \frac{T \pi_\alpha R^\alpha_i}{T_\alpha} $$
//!
//! and the rate matrix is $Q_{ij} = N_{ij} / R_i$ with diagonal $Q_{ii} = -\sum_{j \ne i} Q_{ij}$.

use crate::errors::*;
use crate::linalg;
use crate::model::{Model, ELBER_CENTRE_ALIAS};
use crate::stats::ElberAnchorStatistics;
use ndarray::{Array1, Array2};

/// Statistics of one MMVT anchor projected onto the global milestone indices
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorMatrices {
    /// Index of the anchor
    pub alpha: usize,
    /// Transition counts between milestones
    pub n_ij: Array2<f64>,
    /// Total incubation time after touching each milestone
    pub r_i: Array1<f64>,
    /// Total time spent in the anchor
    pub t_alpha: f64,
}

impl AnchorMatrices {
    /// Rate matrix of this anchor on its own
    pub fn rate_matrix(&self) -> Array2<f64> {
        rate_matrix(&self.n_ij, &self.r_i)
    }

    /// The same anchor with its counts replaced by `q`, keeping the incubation times
    pub fn with_rates(&self, q: &Array2<f64>) -> Self {
        Self {
            alpha: self.alpha,
            n_ij: n_from_rates(q, &self.r_i),
            r_i: self.r_i.clone(),
            t_alpha: self.t_alpha,
        }
    }
}

/// Global milestone transition statistics
#[derive(Debug, Clone, PartialEq)]
pub struct MilestoneStatistics {
    /// Weighted transition counts between milestones
    pub n_ij: Array2<f64>,
    /// Weighted incubation time after touching each milestone
    pub r_i: Array1<f64>,
    /// Overall time normalisation
    pub t: f64,
}

/// Combine anchor statistics, weighted by `pi_alpha`, into global milestone statistics
pub fn assemble(
    anchors: &[AnchorMatrices],
    pi_alpha: &Array1<f64>,
    num_milestones: usize,
) -> Result<MilestoneStatistics> {
    let mut inverse_t = 0.0;
    for anchor in anchors {
        if !(anchor.t_alpha > 0.0) {
            return Err(AnalysisError::NonPositiveStatistic {
                what: format!("T_alpha of anchor {}", anchor.alpha),
                value: anchor.t_alpha,
            });
        }
        let weight = pi_alpha.get(anchor.alpha).copied().ok_or(
            AnalysisError::ArrayLengthMismatch(pi_alpha.len(), anchor.alpha + 1),
        )?;
        inverse_t += weight / anchor.t_alpha;
    }
    if !(inverse_t > 0.0) {
        return Err(AnalysisError::NonPositiveStatistic {
            what: "time fraction".to_string(),
            value: inverse_t,
        });
    }
    let t = 1.0 / inverse_t;

    let mut n_ij = Array2::zeros((num_milestones, num_milestones));
    let mut r_i = Array1::zeros(num_milestones);
    for anchor in anchors {
        if anchor.n_ij.dim() != (num_milestones, num_milestones) {
            return Err(AnalysisError::ArrayLengthMismatch(
                anchor.n_ij.nrows(),
                num_milestones,
            ));
        }
        if anchor.r_i.len() != num_milestones {
            return Err(AnalysisError::ArrayLengthMismatch(
                anchor.r_i.len(),
                num_milestones,
            ));
        }
        let scale = t * pi_alpha[anchor.alpha] / anchor.t_alpha;

        for ((i, j), &count) in anchor.n_ij.indexed_iter() {
            if count == 0.0 {
                continue;
            }
            let contribution = scale * count;
            if !(contribution > 0.0) {
                return Err(AnalysisError::NonPositiveStatistic {
                    what: format!("N_{}_{} contribution of anchor {}", i, j, anchor.alpha),
                    value: contribution,
                });
            }
            n_ij[[i, j]] += contribution;
        }

        if anchor.r_i.iter().all(|&r| r == 0.0) {
            return Err(AnalysisError::MissingIncubationTimes {
                anchor: anchor.alpha,
            });
        }
        for (i, &time) in anchor.r_i.indexed_iter() {
            if time == 0.0 {
                continue;
            }
            let contribution = scale * time;
            if !(contribution > 0.0) {
                return Err(AnalysisError::NonPositiveStatistic {
                    what: format!("R_{} contribution of anchor {}", i, anchor.alpha),
                    value: contribution,
                });
            }
            r_i[i] += contribution;
        }
    }

    Ok(MilestoneStatistics { n_ij, r_i, t })
}

/// Rate matrix $Q_{ij} = N_{ij} / R_i$ with rows summing to zero
///
/// Rows with no incubation time are left empty.
pub fn rate_matrix(n_ij: &Array2<f64>, r_i: &Array1<f64>) -> Array2<f64> {
    let mut q = Array2::zeros(n_ij.dim());
    for ((i, j), &count) in n_ij.indexed_iter() {
        if i != j && r_i[i] > 0.0 {
            q[[i, j]] = count / r_i[i];
        }
    }
    linalg::set_diagonal_to_negative_row_sum(&mut q);
    q
}

/// Transition counts that reproduce the off-diagonal rates `q` given incubation times `r_i`
pub fn n_from_rates(q: &Array2<f64>, r_i: &Array1<f64>) -> Array2<f64> {
    let mut n_ij = Array2::zeros(q.dim());
    for ((i, j), &rate) in q.indexed_iter() {
        if i != j {
            n_ij[[i, j]] = rate * r_i[i];
        }
    }
    n_ij
}

/// Gather Elber anchor statistics into global milestone statistics
///
/// Every trajectory of an Elber anchor starts on its centre milestone, so each anchor fills one
/// row of $N$ and one entry of $R$. Anchors without statistics leave their row empty.
pub fn elber_statistics(
    model: &Model,
    stats: &[Option<ElberAnchorStatistics>],
) -> Result<MilestoneStatistics> {
    let n = model.num_milestones();
    let mut n_ij = Array2::zeros((n, n));
    let mut r_i = Array1::zeros(n);

    for (anchor, anchor_stats) in model.anchors.iter().zip(stats) {
        let anchor_stats = match anchor_stats {
            Some(s) => s,
            None => continue,
        };
        let src = anchor.require_id(ELBER_CENTRE_ALIAS)?;
        for (&alias, &count) in &anchor_stats.n_i_j {
            if count < 0.0 {
                return Err(AnalysisError::NonPositiveStatistic {
                    what: format!("transition count of anchor {}", anchor.index),
                    value: count,
                });
            }
            n_ij[[src, anchor.require_id(alias)?]] += count;
        }
        if !(anchor_stats.r_i_total > 0.0) {
            return Err(AnalysisError::MissingIncubationTimes {
                anchor: anchor.index,
            });
        }
        r_i[src] += anchor_stats.r_i_total;
    }

    // Elber anchors are not reweighted
    Ok(MilestoneStatistics { n_ij, r_i, t: 1.0 })
}
