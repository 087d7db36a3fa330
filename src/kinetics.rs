//! Observables of a milestone rate matrix
//!
//! Given the rate matrix $Q$, the milestone transition probabilities are
//! $K_{ij} = -Q_{ij} / Q_{ii}$. The stationary distribution $q$ of $K$ weighted by the
//! incubation times $-1/Q_{ii}$ gives the equilibrium milestone probabilities $p_i$, and mean
//! first passage times follow from solving $\hat{Q} \tau = -1$ on the rate matrix with the
//! destination milestones removed.

use crate::bd::{BdDestination, BdStatistics};
use crate::errors::*;
use crate::linalg;
use crate::model::Model;
use log::{debug, warn};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Molar gas constant in kcal/(mol K)
pub const GAS_CONSTANT: f64 = 0.0019872;

/// Conversion from inverse picoseconds to inverse seconds
pub const PER_PS_TO_PER_S: f64 = 1.0e12;

/// Row deficit of a transition matrix above which a node is treated as escaping
const ESCAPE_TOLERANCE: f64 = 1.0e-12;

/// One end of a mean first passage time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StateId {
    /// A milestone, by global index
    Milestone(usize),
    /// The bulk state
    Bulk,
}

/// Source and destination of a mean first passage time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MfptKey {
    #[allow(missing_docs)]
    pub src: StateId,
    #[allow(missing_docs)]
    pub dst: StateId,
}

impl MfptKey {
    #[allow(missing_docs)]
    pub fn new(src: StateId, dst: StateId) -> Self {
        Self { src, dst }
    }
}

/// Equilibrium properties of the milestones
#[derive(Debug, Clone, PartialEq)]
pub struct Thermodynamics {
    /// Milestone transition probability matrix
    pub k: Array2<f64>,
    /// Equilibrium probability of each milestone
    pub p_i: Array1<f64>,
    /// Free energy of each milestone relative to the most probable one, in kcal/mol
    pub free_energy_profile: Array1<f64>,
}

/// Kinetic properties of the milestones
#[derive(Debug, Clone, PartialEq)]
pub struct Kinetics {
    /// Mean first passage times between end states and to the bulk
    pub mfpts: BTreeMap<MfptKey, f64>,
    /// Dissociation rate constant in 1/s
    pub k_off: f64,
    /// Association rate constant into each end-state milestone
    pub k_ons: BTreeMap<usize, f64>,
}

/// Transition probability matrix $K_{ij} = -Q_{ij} / Q_{ii}$
///
/// Rows of milestones with no outgoing rates are left empty.
pub fn q_to_k(q: &Array2<f64>) -> Array2<f64> {
    let mut k = Array2::zeros(q.dim());
    for i in 0..q.nrows() {
        let diagonal = q[[i, i]];
        if diagonal == 0.0 {
            continue;
        }
        for j in 0..q.ncols() {
            if i != j {
                k[[i, j]] = -q[[i, j]] / diagonal;
            }
        }
    }
    k
}

fn check_rates(q: &Array2<f64>) -> Result<()> {
    for ((i, j), &value) in q.indexed_iter() {
        if !value.is_finite() {
            return Err(AnalysisError::NonFinite("rate matrix"));
        }
        if i != j && value < 0.0 {
            return Err(AnalysisError::NegativeRate {
                src: i,
                dst: j,
                value,
            });
        }
    }
    Ok(())
}

/// Compute the equilibrium milestone probabilities and free energy profile
///
/// Milestones with no outgoing rates act as sinks. They get zero probability and infinite free
/// energy, and the transitions from the remaining milestones are renormalised to exclude them.
pub fn calculate_thermodynamics(q: &Array2<f64>, temperature: f64) -> Result<Thermodynamics> {
    check_rates(q)?;
    let k = q_to_k(q);
    let n = q.nrows();
    let active: Vec<usize> = (0..n).filter(|&i| q[[i, i]] < 0.0).collect();
    if active.is_empty() {
        return Err(AnalysisError::NonFinite("milestone probabilities"));
    }
    if active.len() < n {
        debug!(
            "Milestones {:?} have no outgoing rates",
            (0..n).filter(|i| !active.contains(i)).collect::<Vec<_>>()
        );
    }

    let mut k_active = linalg::submatrix(&k, &active);
    for mut row in k_active.axis_iter_mut(Axis(0)) {
        let total = row.sum();
        if total > 0.0 {
            row /= total;
        }
    }

    // The chain over active milestones must be irreducible
    let m = active.len();
    let mut first = vec![false; m];
    first[0] = true;
    linalg::check_reachable(&k_active, &first, &active, "milestone probabilities")?;
    linalg::check_reachable(
        &k_active.t().to_owned(),
        &first,
        &active,
        "milestone probabilities",
    )?;

    // Stationary distribution: (I - K^T) q = 0 with sum(q) = 1 replacing the last equation
    let mut a = Array2::eye(m) - k_active.t();
    a.row_mut(m - 1).fill(1.0);
    let mut b = Array1::zeros(m);
    b[m - 1] = 1.0;
    let stationary = linalg::solve(&a, &b, "milestone probabilities")?;

    let mut p_i = Array1::zeros(n);
    for (a, &i) in active.iter().enumerate() {
        p_i[i] = stationary[a].abs() / -q[[i, i]];
    }
    let total = p_i.sum();
    if !(total > 0.0) || !total.is_finite() {
        return Err(AnalysisError::NonFinite("milestone probabilities"));
    }
    p_i /= total;

    let p_max = p_i.fold(0.0_f64, |acc, &p| acc.max(p));
    let rt = GAS_CONSTANT * temperature;
    let free_energy_profile = p_i.mapv(|p| {
        if p > 0.0 {
            -rt * (p / p_max).ln()
        } else {
            f64::INFINITY
        }
    });

    Ok(Thermodynamics {
        k,
        p_i,
        free_energy_profile,
    })
}

/// Mean first passage times from every milestone not in `dst` into `dst`
///
/// Returns the times indexed by the milestones in `src`, which must exclude `dst`.
fn mfpts_into(q: &Array2<f64>, src: &[usize], dst: &[bool]) -> Result<Array1<f64>> {
    let q_hat = linalg::submatrix(q, src);
    let absorbed: Vec<bool> = src
        .iter()
        .map(|&i| (0..q.ncols()).any(|j| dst[j] && q[[i, j]] > 0.0))
        .collect();
    linalg::check_reachable(&q_hat, &absorbed, src, "mean first passage times")?;
    let minus_ones = Array1::from_elem(src.len(), -1.0);
    linalg::solve(&q_hat, &minus_ones, "mean first passage times")
}

/// Compute mean first passage times and rate constants
///
/// Passage times are computed from every end-state milestone to the bulk, and from every
/// end-state milestone and from the bulk into every other end-state milestone. Milestones with
/// no outgoing rates are closed off for the latter; in Elber milestoning this makes the bulk
/// milestone reflecting, and the bulk is not a source of passage times.
///
/// `bd` maps the index of each BD milestone of the model to its statistics. The association
/// rates are only computed when the model has k-on settings and `bd` is not empty.
pub fn calculate_kinetics(
    model: &Model,
    q: &Array2<f64>,
    p_i: &Array1<f64>,
    bd: &BTreeMap<usize, BdStatistics>,
    pre_equilibrium_approx: bool,
) -> Result<Kinetics> {
    check_rates(q)?;
    let n = q.nrows();
    let bulk_milestones = model.bulk_milestones();
    let end_milestones = model.end_milestones();
    let is_bulk: Vec<bool> = (0..n).map(|i| bulk_milestones.contains(&i)).collect();
    let non_bulk: Vec<usize> = (0..n).filter(|&i| !is_bulk[i]).collect();
    if non_bulk.is_empty() {
        return Err(AnalysisError::InvalidModel(
            "every milestone belongs to the bulk state".to_string(),
        ));
    }

    let mut mfpts = BTreeMap::new();
    let to_bulk = mfpts_into(q, &non_bulk, &is_bulk)?;
    for (a, &i) in non_bulk.iter().enumerate() {
        if end_milestones.contains_key(&i) {
            mfpts.insert(
                MfptKey::new(StateId::Milestone(i), StateId::Bulk),
                to_bulk[a],
            );
        }
    }

    let k_off = if pre_equilibrium_approx {
        pre_equilibrium_k_off(q, p_i, &end_milestones)?
    } else {
        let p_total: f64 = non_bulk.iter().map(|&i| p_i[i]).sum();
        if !(p_total > 0.0) {
            return Err(AnalysisError::NonFinite("k_off"));
        }
        let mean_time: f64 = non_bulk
            .iter()
            .enumerate()
            .map(|(a, &i)| to_bulk[a] * p_i[i] / p_total)
            .sum();
        PER_PS_TO_PER_S / mean_time
    };
    if !k_off.is_finite() {
        return Err(AnalysisError::NonFinite("k_off"));
    }

    // Sinks cannot be left, so passage times into end states are taken with them closed off
    let (closed, active) = close_sinks(q);
    for &dst in end_milestones.keys() {
        if !active.contains(&dst) {
            debug!("End-state milestone {} has no outgoing rates", dst);
            continue;
        }
        let remaining: Vec<usize> = active.iter().copied().filter(|&i| i != dst).collect();
        let is_dst: Vec<bool> = (0..n).map(|i| i == dst).collect();
        let times = mfpts_into(&closed, &remaining, &is_dst)?;

        for &src in end_milestones.keys() {
            if let Some(a) = remaining.iter().position(|&i| i == src) {
                mfpts.insert(
                    MfptKey::new(StateId::Milestone(src), StateId::Milestone(dst)),
                    times[a],
                );
            }
        }

        // From the bulk, starting on its milestones in proportion to their probabilities
        let (weighted, weight) = remaining
            .iter()
            .enumerate()
            .filter(|&(_, &i)| is_bulk[i])
            .fold((0.0, 0.0), |(t, w), (a, &i)| (t + times[a] * p_i[i], w + p_i[i]));
        if weight > 0.0 {
            mfpts.insert(
                MfptKey::new(StateId::Bulk, StateId::Milestone(dst)),
                weighted / weight,
            );
        }
    }

    let k_ons = match &model.k_on_info {
        Some(info) if !bd.is_empty() && !info.bd_milestones.is_empty() => {
            calculate_k_ons(model, q, bd)?
        }
        _ => BTreeMap::new(),
    };

    Ok(Kinetics {
        mfpts,
        k_off,
        k_ons,
    })
}

/// Remove the transitions into sinks, and the milestones that can only reach sinks
///
/// The remaining transitions of each milestone are scaled up so that its incubation time is
/// unchanged. Returns the closed rate matrix and the milestones that still have outgoing rates.
fn close_sinks(q: &Array2<f64>) -> (Array2<f64>, Vec<usize>) {
    let n = q.nrows();
    let mut closed = q.clone();
    let mut is_sink: Vec<bool> = (0..n).map(|i| !(q[[i, i]] < 0.0)).collect();
    loop {
        let mut changed = false;
        for i in 0..n {
            if is_sink[i] {
                continue;
            }
            let open: f64 = (0..n)
                .filter(|&j| j != i && !is_sink[j])
                .map(|j| q[[i, j]])
                .sum();
            if !(open > 0.0) {
                is_sink[i] = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    for i in 0..n {
        let open: f64 = (0..n)
            .filter(|&j| j != i && !is_sink[j])
            .map(|j| q[[i, j]])
            .sum();
        for j in (0..n).filter(|&j| j != i) {
            closed[[i, j]] = if is_sink[i] || is_sink[j] {
                0.0
            } else {
                q[[i, j]] * -q[[i, i]] / open
            };
        }
        if is_sink[i] {
            closed[[i, i]] = 0.0;
        }
    }

    let active = (0..n).filter(|&i| !is_sink[i]).collect();
    (closed, active)
}

/// Dissociation rate assuming the bound state is in equilibrium with the first milestone out
fn pre_equilibrium_k_off(
    q: &Array2<f64>,
    p_i: &Array1<f64>,
    end_milestones: &BTreeMap<usize, usize>,
) -> Result<f64> {
    let low = *end_milestones.keys().next().ok_or_else(|| {
        AnalysisError::InvalidModel("the pre-equilibrium approximation needs an end state".into())
    })?;
    let n = q.nrows();
    let rate = if low + 1 < n {
        q[[low, low + 1]]
    } else if low > 0 {
        q[[low - 1, low]]
    } else {
        return Err(AnalysisError::InvalidModel(
            "the pre-equilibrium approximation needs more than one milestone".into(),
        ));
    };
    Ok(p_i[low] * rate * PER_PS_TO_PER_S)
}

/// Association rates into each end-state milestone from infinite separation
///
/// The rows of the outer BD milestones are replaced by the BD first-hit probabilities, where
/// escaping is the row deficit, and end-state milestones are made absorbing. The probability of
/// reaching each end state from each outer milestone then follows from
/// $(I - K_{TT}) H = K_{TE}$ over transient milestones $T$ and end states $E$.
fn calculate_k_ons(
    model: &Model,
    q: &Array2<f64>,
    bd: &BTreeMap<usize, BdStatistics>,
) -> Result<BTreeMap<usize, f64>> {
    let n = q.nrows();
    let mut k = q_to_k(q);
    let bd_milestones = model
        .k_on_info
        .as_ref()
        .map(|info| info.bd_milestones.as_slice())
        .unwrap_or(&[]);

    let mut sources = Vec::new();
    for bd_milestone in bd_milestones {
        let stats = match bd.get(&bd_milestone.index) {
            Some(stats) => stats,
            None => {
                warn!("No BD statistics for BD milestone {}", bd_milestone.index);
                continue;
            }
        };
        let outer = bd_milestone.outer_milestone;
        if outer >= n {
            return Err(AnalysisError::InvalidModel(format!(
                "BD milestone {} starts from milestone {}, which does not exist",
                bd_milestone.index, outer
            )));
        }
        k.row_mut(outer).fill(0.0);
        for (dest, probability) in stats.probabilities()? {
            if let BdDestination::Milestone(id) = dest {
                if id >= n {
                    return Err(AnalysisError::InvalidModel(format!(
                        "BD milestone {} reaches milestone {}, which does not exist",
                        bd_milestone.index, id
                    )));
                }
                k[[outer, id]] += probability;
            }
        }
        sources.push((outer, stats.k_b));
    }

    let ends: Vec<usize> = model
        .end_milestones()
        .keys()
        .copied()
        .filter(|&i| i < n)
        .collect();
    let transient: Vec<usize> = (0..n).filter(|i| !ends.contains(i)).collect();
    if ends.is_empty() {
        return Ok(BTreeMap::new());
    }

    let k_tt = k.select(Axis(0), &transient).select(Axis(1), &transient);
    let k_te = k.select(Axis(0), &transient).select(Axis(1), &ends);
    let exits: Vec<bool> = transient
        .iter()
        .enumerate()
        .map(|(a, _)| {
            k_te.row(a).iter().any(|&p| p > 0.0) || 1.0 - k_tt.row(a).sum() > ESCAPE_TOLERANCE
        })
        .collect();
    linalg::check_reachable(&k_tt, &exits, &transient, "k_on")?;

    let a = Array2::eye(transient.len()) - &k_tt;
    let h = linalg::solve_columns(&a, &k_te, "k_on")?;

    let mut k_ons = BTreeMap::new();
    for (e, &end) in ends.iter().enumerate() {
        let mut k_on = 0.0;
        for &(outer, k_b) in &sources {
            // An outer milestone that is itself an end state is reached directly
            let hit = match transient.iter().position(|&i| i == outer) {
                Some(t) => h[[t, e]],
                None if outer == end => 1.0,
                None => 0.0,
            };
            k_on += k_b * hit;
        }
        if !k_on.is_finite() {
            return Err(AnalysisError::NonFinite("k_on"));
        }
        k_ons.insert(end, k_on);
    }

    Ok(k_ons)
}
