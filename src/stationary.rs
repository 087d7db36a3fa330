//! Equilibrium weights of the MMVT anchors
//!
//! The anchors are weighted by the stationary distribution $\pi_\alpha$ of the anchor-level
//! process, whose rates $k_{\alpha\beta}$ are the bounce rates against each milestone. The
//! stationary distribution balances the flux in and out of each anchor,
//!
//! $$ \sum_{\beta} \pi_\alpha k_{\alpha\beta} = \sum_{\beta} \pi_\beta k_{\beta\alpha} $$
//!
//! and is found by a linear solve followed by a power iteration of the embedded jump chain.

use crate::errors::*;
use crate::linalg;
use crate::model::Model;
use log::debug;
use ndarray::{Array1, Array2};
use std::collections::BTreeMap;

/// Flux from the bulk anchor into its neighbours in the flux matrix
pub const BULK_SINK_PENALTY: f64 = 1.0e30;

/// Power of the jump chain applied to refine $\pi_\alpha$
pub const FLUX_MATRIX_K_EXPONENT: u32 = 1000;

/// Construct the anchor flux matrix $M$
///
/// Off-diagonal elements between non-bulk anchors are the bounce rates $k_{\alpha\beta}$, with
/// rates out of single-milestone anchors scaled by `dead_end_factor`. The diagonal balances the
/// rows over non-bulk neighbours. The bulk column is all ones and the bulk row is
/// [`BULK_SINK_PENALTY`] for each anchor that borders the bulk, so that $M^T x = e_{bulk}$ has a
/// unique solution proportional to the stationary distribution.
pub fn flux_matrix(
    model: &Model,
    k_alpha_beta: &BTreeMap<(usize, usize), f64>,
    dead_end_factor: f64,
) -> Result<Array2<f64>> {
    let n = model.num_anchors();
    let bulk = model.bulk_index()?;
    let mut m = Array2::zeros((n, n));

    for anchor in model.anchors.iter().filter(|a| a.index != bulk) {
        let alpha = anchor.index;
        let factor = if anchor.is_dead_end() {
            dead_end_factor
        } else {
            1.0
        };
        for milestone in &anchor.milestones {
            let beta = milestone.neighbor_anchor_index;
            if beta == bulk || beta == alpha {
                continue;
            }
            let k = k_alpha_beta.get(&(alpha, beta)).copied().unwrap_or(0.0) * factor;
            m[[alpha, beta]] = k;
            m[[alpha, alpha]] -= k;
        }
        m[[alpha, bulk]] = 1.0;
    }

    m[[bulk, bulk]] = 1.0;
    for milestone in &model.anchors[bulk].milestones {
        if milestone.neighbor_anchor_index != bulk {
            m[[bulk, milestone.neighbor_anchor_index]] = BULK_SINK_PENALTY;
        }
    }

    Ok(m)
}

/// Embedded jump chain of the non-bulk anchors of a flux matrix
///
/// Returns $K_{ij} = -M_{ij} / M_{ii}$ over the anchors in `keep`, with a zero diagonal.
pub fn flux_matrix_to_k(m: &Array2<f64>, keep: &[usize]) -> Result<Array2<f64>> {
    let mut k = Array2::zeros((keep.len(), keep.len()));
    for (a, &i) in keep.iter().enumerate() {
        let diagonal = m[[i, i]];
        if !(diagonal < 0.0) {
            return Err(AnalysisError::NoStatistics { anchor: i });
        }
        for (b, &j) in keep.iter().enumerate() {
            if a == b {
                continue;
            }
            let value = -m[[i, j]] / diagonal;
            if value < 0.0 {
                return Err(AnalysisError::NegativeTransitionProbability { i, j, value });
            }
            k[[a, b]] = value;
        }
    }
    Ok(k)
}

/// Compute the equilibrium weight $\pi_\alpha$ of every anchor
///
/// The result is normalised and has a zero entry for the bulk anchor.
pub fn calculate_pi_alpha(
    model: &Model,
    k_alpha_beta: &BTreeMap<(usize, usize), f64>,
    dead_end_factor: f64,
) -> Result<Array1<f64>> {
    let n = model.num_anchors();
    let bulk = model.bulk_index()?;
    let keep: Vec<usize> = (0..n).filter(|&i| i != bulk).collect();
    let mut pi_alpha = Array1::zeros(n);

    match keep.len() {
        0 => return Err(AnalysisError::InvalidModel("no anchors besides bulk".to_string())),
        1 => {
            pi_alpha[keep[0]] = 1.0;
            return Ok(pi_alpha);
        }
        _ => {}
    }

    let m = flux_matrix(model, k_alpha_beta, dead_end_factor)?;
    let mut e_bulk = Array1::zeros(n);
    e_bulk[bulk] = 1.0;
    let x = linalg::solve(&m.t().to_owned(), &e_bulk, "pi_alpha")?.mapv(f64::abs);

    // Stationary flux out of each anchor is a fixed point of the jump chain
    let slice: Array1<f64> = keep.iter().map(|&i| x[i] * -m[[i, i]]).collect();
    let k = flux_matrix_to_k(&m, &keep)?;
    let stationary = linalg::matrix_power(&k, FLUX_MATRIX_K_EXPONENT)
        .t()
        .dot(&slice);

    for (a, &i) in keep.iter().enumerate() {
        pi_alpha[i] = stationary[a] / -m[[i, i]];
    }
    let total = pi_alpha.sum();
    if !(total > 0.0) || !total.is_finite() {
        return Err(AnalysisError::NonFinite("pi_alpha"));
    }
    pi_alpha /= total;
    debug!("pi_alpha = {}", pi_alpha);

    Ok(pi_alpha)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::linear_model;
    use approx::assert_relative_eq;

    fn rates() -> BTreeMap<(usize, usize), f64> {
        let mut k = BTreeMap::new();
        k.insert((0, 1), 2.0);
        k.insert((1, 0), 1.0);
        k.insert((1, 2), 3.0);
        k.insert((2, 1), 6.0);
        k.insert((2, 3), 5.0);
        k
    }

    #[test]
    fn flux_matrix_layout() {
        let m = flux_matrix(&linear_model(), &rates(), 1.0).unwrap();
        assert_eq!(m[[0, 0]], -2.0);
        assert_eq!(m[[0, 1]], 2.0);
        assert_eq!(m[[1, 1]], -4.0);
        // Rates into the bulk are not part of the balance
        assert_eq!(m[[2, 2]], -6.0);
        assert_eq!(m[[2, 3]], 1.0);
        assert_eq!(m[[3, 2]], BULK_SINK_PENALTY);
        assert_eq!(m[[3, 3]], 1.0);
        assert_eq!(m[[3, 0]], 0.0);
    }

    #[test]
    fn dead_end_factor_scales_single_milestone_anchors() {
        let m = flux_matrix(&linear_model(), &rates(), 0.5).unwrap();
        assert_eq!(m[[0, 1]], 1.0);
        assert_eq!(m[[1, 0]], 1.0);
    }

    #[test]
    fn pi_alpha_balances_flux() {
        let pi = calculate_pi_alpha(&linear_model(), &rates(), 1.0).unwrap();
        // pi_0 k_01 = pi_1 k_10 and pi_1 k_12 = pi_2 k_21
        let expected = [1.0, 2.0, 1.0];
        let total: f64 = expected.iter().sum();
        for i in 0..3 {
            assert_relative_eq!(pi[i], expected[i] / total, epsilon = 1e-10);
        }
        assert_eq!(pi[3], 0.0);
        assert_relative_eq!(pi.sum(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn missing_rates_are_an_error() {
        let mut k = rates();
        k.remove(&(0, 1));
        assert!(matches!(
            calculate_pi_alpha(&linear_model(), &k, 1.0),
            Err(AnalysisError::NoStatistics { anchor: 0 })
        ));
    }

    #[test]
    fn negative_rates_are_rejected() {
        let m = ndarray::array![[-1.0, 2.0], [1.0, -1.0]];
        // A negative diagonal with a positive neighbour is fine; flip the sign to break it
        let mut broken = m.clone();
        broken[[0, 1]] = -2.0;
        assert!(flux_matrix_to_k(&m, &[0, 1]).is_ok());
        assert!(matches!(
            flux_matrix_to_k(&broken, &[0, 1]),
            Err(AnalysisError::NegativeTransitionProbability { i: 0, j: 1, .. })
        ));
    }
}
