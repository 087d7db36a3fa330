//! A complete set of statistics and the observables computed from them

use crate::bd::BdStatistics;
use crate::errors::*;
use crate::kinetics::{self, Kinetics, MfptKey, Thermodynamics};
use crate::model::Model;
use crate::rate_matrix::{self, AnchorMatrices, MilestoneStatistics};
use crate::stationary;
use crate::stats::AnchorStatistics;
use log::debug;
use ndarray::{Array1, Array2};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// MMVT statistics of every anchor, projected onto global anchor and milestone indices
#[derive(Debug, Clone, PartialEq)]
pub struct SampleStatistics {
    /// Bounce rate from each anchor into each neighbour
    pub k_alpha_beta: BTreeMap<(usize, usize), f64>,
    /// Bounce count from each anchor against each neighbour
    pub n_alpha_beta: BTreeMap<(usize, usize), f64>,
    /// Milestone statistics of each non-bulk anchor
    pub anchors: Vec<AnchorMatrices>,
}

impl SampleStatistics {
    /// Collect the statistics of every non-bulk anchor of `model`
    ///
    /// `stats` is indexed by anchor. Every non-bulk anchor must have statistics with some time
    /// recorded in it.
    pub fn from_anchor_statistics(
        model: &Model,
        stats: &[Option<AnchorStatistics>],
    ) -> Result<Self> {
        let bulk = model.bulk_index()?;
        let n = model.num_milestones();
        let mut k_alpha_beta = BTreeMap::new();
        let mut n_alpha_beta = BTreeMap::new();
        let mut anchors = Vec::new();

        for anchor in model.anchors.iter().filter(|a| a.index != bulk) {
            let alpha = anchor.index;
            let anchor_stats = stats
                .get(alpha)
                .and_then(Option::as_ref)
                .filter(|s| !s.is_empty())
                .ok_or(AnalysisError::NoStatistics { anchor: alpha })?;

            let rates = anchor_stats.k_alpha_beta(alpha)?;
            for ((&alias, &count), &rate) in anchor_stats.n_alpha_beta.iter().zip(rates.values()) {
                let beta = anchor.require_neighbor(alias)?;
                n_alpha_beta.insert((alpha, beta), count);
                k_alpha_beta.insert((alpha, beta), rate);
            }

            let mut n_ij = Array2::zeros((n, n));
            for (&(src, dst), &count) in &anchor_stats.n_i_j {
                n_ij[[anchor.require_id(src)?, anchor.require_id(dst)?]] += count;
            }
            let mut r_i = Array1::zeros(n);
            for (&alias, summary) in &anchor_stats.r_i {
                r_i[anchor.require_id(alias)?] += summary.total;
            }

            anchors.push(AnchorMatrices {
                alpha,
                n_ij,
                r_i,
                t_alpha: anchor_stats.t_alpha.total,
            });
        }

        Ok(Self {
            k_alpha_beta,
            n_alpha_beta,
            anchors,
        })
    }
}

/// Settings that affect how observables are computed from a rate matrix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservableSettings {
    /// Scale factor for the bounce rates of single-milestone anchors
    pub dead_end_factor: f64,
    /// Compute `k_off` from the first milestone out of the bound state only
    pub pre_equilibrium_approx: bool,
}

impl Default for ObservableSettings {
    fn default() -> Self {
        Self {
            dead_end_factor: 1.0,
            pre_equilibrium_approx: false,
        }
    }
}

/// The rate matrix of one set of statistics and everything computed from it
#[derive(Debug, Clone, PartialEq)]
pub struct DataSample {
    /// Equilibrium anchor weights; `None` for Elber milestoning
    pub pi_alpha: Option<Array1<f64>>,
    /// Global milestone statistics
    pub statistics: MilestoneStatistics,
    /// Milestone rate matrix
    pub q: Array2<f64>,
    #[allow(missing_docs)]
    pub thermodynamics: Thermodynamics,
    #[allow(missing_docs)]
    pub kinetics: Kinetics,
}

impl DataSample {
    /// Weight MMVT anchor statistics by $\pi_\alpha$ and compute the observables
    pub fn from_statistics(
        model: &Model,
        stats: &SampleStatistics,
        bd: &BTreeMap<usize, BdStatistics>,
        settings: ObservableSettings,
    ) -> Result<Self> {
        let pi_alpha =
            stationary::calculate_pi_alpha(model, &stats.k_alpha_beta, settings.dead_end_factor)?;
        let milestones =
            rate_matrix::assemble(&stats.anchors, &pi_alpha, model.num_milestones())?;
        Self::from_milestone_statistics(model, Some(pi_alpha), milestones, bd, settings)
    }

    /// Compute the observables of already assembled milestone statistics
    pub fn from_milestone_statistics(
        model: &Model,
        pi_alpha: Option<Array1<f64>>,
        statistics: MilestoneStatistics,
        bd: &BTreeMap<usize, BdStatistics>,
        settings: ObservableSettings,
    ) -> Result<Self> {
        let q = rate_matrix::rate_matrix(&statistics.n_ij, &statistics.r_i);
        Self::from_rate_matrix(model, pi_alpha, statistics, q, bd, settings)
    }

    /// Compute the observables of a rate matrix
    pub fn from_rate_matrix(
        model: &Model,
        pi_alpha: Option<Array1<f64>>,
        statistics: MilestoneStatistics,
        q: Array2<f64>,
        bd: &BTreeMap<usize, BdStatistics>,
        settings: ObservableSettings,
    ) -> Result<Self> {
        debug!("Q = {}", q);
        let thermodynamics = kinetics::calculate_thermodynamics(&q, model.temperature)?;
        let kinetics = kinetics::calculate_kinetics(
            model,
            &q,
            &thermodynamics.p_i,
            bd,
            settings.pre_equilibrium_approx,
        )?;
        Ok(Self {
            pi_alpha,
            statistics,
            q,
            thermodynamics,
            kinetics,
        })
    }

    /// The scalar and vector observables of this sample
    pub fn observables(&self) -> Observables {
        Observables {
            p_i: self.thermodynamics.p_i.to_vec(),
            free_energy_profile: self.thermodynamics.free_energy_profile.to_vec(),
            mfpts: self.kinetics.mfpts.clone(),
            k_off: self.kinetics.k_off,
            k_ons: self.kinetics.k_ons.clone(),
        }
    }
}

fn serialize_mfpts<S: Serializer>(
    mfpts: &BTreeMap<MfptKey, f64>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(mfpts.iter())
}

/// Observables of a sample, or their uncertainties
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observables {
    /// Equilibrium probability of each milestone
    pub p_i: Vec<f64>,
    /// Free energy of each milestone in kcal/mol
    pub free_energy_profile: Vec<f64>,
    /// Mean first passage times
    #[serde(serialize_with = "serialize_mfpts")]
    pub mfpts: BTreeMap<MfptKey, f64>,
    /// Dissociation rate constant in 1/s
    pub k_off: f64,
    /// Association rate constant into each end-state milestone
    pub k_ons: BTreeMap<usize, f64>,
}
