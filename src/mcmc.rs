//! Error estimates by Markov chain Monte Carlo over rate matrices
//!
//! Given transition counts $N_{ij}$ and incubation times $R_i$, the likelihood of a rate
//! matrix is
//!
//! $$ p(Q \mid N) \propto \prod_{i \ne j} q_{ij}^{N_{ij}} e^{-q_{ij} R_i} $$
//!
//! which is sampled one off-diagonal element at a time with log-normal Metropolis proposals,
//! keeping each diagonal at minus its row sum. For MMVT, both the anchor bounce rates and every
//! anchor's own rate matrix are sampled, and each retained state is reweighted into a global
//! rate matrix. For Elber milestoning the global rate matrix is sampled directly.
//!
//! See F. Noé, J. Chem. Phys. 2008, 128, 244103.

use crate::bd::BdStatistics;
use crate::errors::*;
use crate::linalg;
use crate::model::Model;
use crate::rate_matrix::{self, AnchorMatrices, MilestoneStatistics};
use crate::sample::{DataSample, ObservableSettings, Observables, SampleStatistics};
use crate::stationary;
use log::{debug, info};
use ndarray::{Array1, Array2};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use std::collections::BTreeMap;

/// Metropolis sampler for the off-diagonal elements of one rate matrix
#[derive(Debug, Clone, PartialEq)]
pub struct RateSampler {
    n: Array2<f64>,
    r: Array1<f64>,
    active: Vec<(usize, usize)>,
}

impl RateSampler {
    /// Sampler for counts `n` and per-row waiting times `r`
    ///
    /// Only elements with a positive count and a positive waiting time are sampled; all others
    /// stay fixed.
    pub fn new(n: Array2<f64>, r: Array1<f64>) -> Self {
        let active = n
            .indexed_iter()
            .filter(|&((i, j), &count)| i != j && count > 0.0 && r[i] > 0.0)
            .map(|(ij, _)| ij)
            .collect();
        Self { n, r, active }
    }

    /// Number of elements being sampled
    pub fn num_active(&self) -> usize {
        self.active.len()
    }

    /// The maximum-likelihood rate matrix $q_{ij} = N_{ij} / R_i$
    pub fn initial_rates(&self) -> Array2<f64> {
        rate_matrix::rate_matrix(&self.n, &self.r)
    }

    /// Propose a new value for one random element and accept or reject it
    ///
    /// Returns whether the move was accepted. `q` must have been produced by
    /// [`initial_rates`](Self::initial_rates) or by earlier steps.
    pub fn step<R: Rng + ?Sized>(&self, q: &mut Array2<f64>, rng: &mut R) -> bool {
        if self.active.is_empty() {
            return false;
        }
        let (i, j) = self.active[rng.gen_range(0..self.active.len())];
        let count = self.n[[i, j]];
        let old = q[[i, j]];
        if !(old > 0.0) {
            return false;
        }

        let sigma = (1.0 / count.sqrt()).min(1.0);
        let xi: f64 = StandardNormal.sample(rng);
        let new = old * (sigma * xi).exp();

        // With the Hastings factor of the log-normal proposal this samples q^(N-1) exp(-q R)
        let log_acceptance = count * (new / old).ln() - (new - old) * self.r[i];
        let u: f64 = rng.gen();
        if u.ln() < log_acceptance {
            q[[i, j]] = new;
            q[[i, i]] -= new - old;
            true
        } else {
            false
        }
    }
}

/// Rates of the chain at one step
#[derive(Debug, Clone, PartialEq)]
pub enum ChainRates {
    /// MMVT anchor bounce rates and per-anchor rate matrices
    Mmvt {
        /// Bounce rate matrix between anchors
        k_alpha_beta: Array2<f64>,
        /// Rate matrix of each non-bulk anchor, in the order of the sample's anchors
        anchor_q: Vec<Array2<f64>>,
    },
    /// Elber global rate matrix
    Elber {
        #[allow(missing_docs)]
        q: Array2<f64>,
    },
}

/// State of the Markov chain
#[derive(Debug, Clone, PartialEq)]
pub struct ChainState {
    #[allow(missing_docs)]
    pub rates: ChainRates,
    /// Number of element moves proposed so far
    pub proposed: usize,
    /// Number of element moves accepted so far
    pub accepted: usize,
}

impl ChainState {
    /// Fraction of proposed moves that were accepted
    pub fn acceptance_ratio(&self) -> f64 {
        if self.proposed == 0 {
            0.0
        } else {
            self.accepted as f64 / self.proposed as f64
        }
    }
}

/// Observables of every retained sample and their spread
#[derive(Debug, Clone, PartialEq)]
pub struct McmcResults {
    /// Observables of each retained sample
    pub samples: Vec<Observables>,
    /// Population standard deviation of each observable over the samples
    pub errors: Observables,
    /// Fraction of accepted moves
    pub acceptance_ratio: f64,
}

#[derive(Debug, Clone)]
enum Targets {
    Mmvt {
        anchors: RateSampler,
        cells: Vec<RateSampler>,
        matrices: Vec<AnchorMatrices>,
    },
    Elber {
        global: RateSampler,
        statistics: MilestoneStatistics,
    },
}

/// Draws rate matrices consistent with a main data sample and collects their observables
#[derive(Debug, Clone)]
pub struct McmcEstimator<'a> {
    model: &'a Model,
    main: &'a DataSample,
    targets: Targets,
    bd: &'a BTreeMap<usize, BdStatistics>,
    settings: ObservableSettings,
}

impl<'a> McmcEstimator<'a> {
    /// Sample around MMVT statistics
    pub fn mmvt(
        model: &'a Model,
        main: &'a DataSample,
        stats: &SampleStatistics,
        bd: &'a BTreeMap<usize, BdStatistics>,
        settings: ObservableSettings,
    ) -> Self {
        let n = model.num_anchors();
        let mut n_alpha_beta = Array2::zeros((n, n));
        let mut t_alpha = Array1::zeros(n);
        for (&(alpha, beta), &count) in &stats.n_alpha_beta {
            n_alpha_beta[[alpha, beta]] = count;
        }
        for anchor in &stats.anchors {
            t_alpha[anchor.alpha] = anchor.t_alpha;
        }

        let cells = stats
            .anchors
            .iter()
            .map(|a| RateSampler::new(a.n_ij.clone(), a.r_i.clone()))
            .collect();

        Self {
            model,
            main,
            targets: Targets::Mmvt {
                anchors: RateSampler::new(n_alpha_beta, t_alpha),
                cells,
                matrices: stats.anchors.clone(),
            },
            bd,
            settings,
        }
    }

    /// Sample around Elber statistics
    pub fn elber(
        model: &'a Model,
        main: &'a DataSample,
        bd: &'a BTreeMap<usize, BdStatistics>,
        settings: ObservableSettings,
    ) -> Self {
        let statistics = main.statistics.clone();
        Self {
            model,
            main,
            targets: Targets::Elber {
                global: RateSampler::new(statistics.n_ij.clone(), statistics.r_i.clone()),
                statistics,
            },
            bd,
            settings,
        }
    }

    /// The maximum-likelihood starting state
    pub fn initial_state(&self) -> ChainState {
        let rates = match &self.targets {
            Targets::Mmvt { anchors, cells, .. } => ChainRates::Mmvt {
                k_alpha_beta: anchors.initial_rates(),
                anchor_q: cells.iter().map(RateSampler::initial_rates).collect(),
            },
            Targets::Elber { global, .. } => ChainRates::Elber {
                q: global.initial_rates(),
            },
        };
        ChainState {
            rates,
            proposed: 0,
            accepted: 0,
        }
    }

    /// Advance every sampled matrix by one element move
    ///
    /// `state` must come from [`initial_state`](Self::initial_state) of an estimator for the same
    /// calculation type.
    pub fn step<R: Rng + ?Sized>(
        &self,
        mut state: ChainState,
        rng: &mut R,
    ) -> Result<ChainState> {
        match (&self.targets, &mut state.rates) {
            (
                Targets::Mmvt { anchors, cells, .. },
                ChainRates::Mmvt {
                    k_alpha_beta,
                    anchor_q,
                },
            ) => {
                state.proposed += 1;
                state.accepted += anchors.step(k_alpha_beta, rng) as usize;
                for (sampler, q) in cells.iter().zip(anchor_q.iter_mut()) {
                    state.proposed += 1;
                    state.accepted += sampler.step(q, rng) as usize;
                }
            }
            (Targets::Elber { global, .. }, ChainRates::Elber { q }) => {
                state.proposed += 1;
                state.accepted += global.step(q, rng) as usize;
            }
            _ => return Err(mismatched_state()),
        }
        Ok(state)
    }

    /// Compute the observables of a chain state, with freshly drawn BD statistics
    pub fn evaluate<R: Rng + ?Sized>(
        &self,
        state: &ChainState,
        rng: &mut R,
    ) -> Result<DataSample> {
        let mut bd = BTreeMap::new();
        for (&index, stats) in self.bd {
            bd.insert(index, stats.resample(rng)?);
        }

        match (&self.targets, &state.rates) {
            (
                Targets::Mmvt { matrices, .. },
                ChainRates::Mmvt {
                    k_alpha_beta,
                    anchor_q,
                },
            ) => {
                let k: BTreeMap<(usize, usize), f64> = k_alpha_beta
                    .indexed_iter()
                    .filter(|&((alpha, beta), &rate)| alpha != beta && rate > 0.0)
                    .map(|(ij, &rate)| (ij, rate))
                    .collect();
                let pi_alpha =
                    stationary::calculate_pi_alpha(self.model, &k, self.settings.dead_end_factor)?;
                let reweighted: Vec<AnchorMatrices> = matrices
                    .iter()
                    .zip(anchor_q)
                    .map(|(anchor, q)| anchor.with_rates(q))
                    .collect();
                let statistics =
                    rate_matrix::assemble(&reweighted, &pi_alpha, self.model.num_milestones())?;
                DataSample::from_milestone_statistics(
                    self.model,
                    Some(pi_alpha),
                    statistics,
                    &bd,
                    self.settings,
                )
            }
            (Targets::Elber { statistics, .. }, ChainRates::Elber { q }) => {
                DataSample::from_rate_matrix(
                    self.model,
                    None,
                    statistics.clone(),
                    q.clone(),
                    &bd,
                    self.settings,
                )
            }
            _ => Err(mismatched_state()),
        }
    }

    /// Default burn-in and stride for a model: $10 N^2$ and $N^2$ for $N$ milestones
    pub fn default_skip_and_stride(&self) -> (usize, usize) {
        let n = self.main.q.nrows();
        (10 * n * n, n * n)
    }

    /// Run the chain and collect `num` samples
    ///
    /// The first `skip` steps are discarded, then one sample is kept every `stride` steps.
    pub fn run<R: Rng + ?Sized>(
        &self,
        num: usize,
        skip: usize,
        stride: usize,
        rng: &mut R,
    ) -> Result<McmcResults> {
        if num == 0 || stride == 0 {
            return Err(AnalysisError::ZeroMcmcSamples);
        }
        info!(
            "Collecting {} MCMC samples from {} total moves",
            num,
            num * stride + skip
        );

        let mut state = self.initial_state();
        for _ in 0..skip {
            state = self.step(state, rng)?;
        }

        let mut samples = Vec::with_capacity(num);
        for _ in 0..num {
            for _ in 0..stride {
                state = self.step(state, rng)?;
            }
            samples.push(self.evaluate(&state, rng)?.observables());
        }
        debug!("MCMC acceptance ratio {}", state.acceptance_ratio());

        let errors = spread(&self.main.observables(), &samples);
        Ok(McmcResults {
            samples,
            errors,
            acceptance_ratio: state.acceptance_ratio(),
        })
    }
}

fn mismatched_state() -> AnalysisError {
    AnalysisError::InvalidModel("chain state does not match the calculation type".to_string())
}

/// Population standard deviation of each observable of `main` over `samples`
fn spread(main: &Observables, samples: &[Observables]) -> Observables {
    let column = |f: &dyn Fn(&Observables) -> Option<f64>| -> f64 {
        let values: Vec<f64> = samples.iter().filter_map(|s| f(s)).collect();
        linalg::std_dev(&values)
    };

    Observables {
        p_i: (0..main.p_i.len())
            .map(|i| column(&|s| s.p_i.get(i).copied()))
            .collect(),
        free_energy_profile: (0..main.free_energy_profile.len())
            .map(|i| column(&|s| s.free_energy_profile.get(i).copied()))
            .collect(),
        mfpts: main
            .mfpts
            .keys()
            .map(|key| (*key, column(&|s| s.mfpts.get(key).copied())))
            .collect(),
        k_off: column(&|s| Some(s.k_off)),
        k_ons: main
            .k_ons
            .keys()
            .map(|key| (*key, column(&|s| s.k_ons.get(key).copied())))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinetics::{MfptKey, StateId};
    use crate::model::tests::linear_model;
    use crate::model::{Anchor, CalculationType, Milestone};
    use crate::sample::tests::linear_statistics;
    use crate::stats::ElberAnchorStatistics;
    use approx::assert_relative_eq;
    use ndarray::{array, Axis};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// Two Elber anchors in front of the bulk, with rates 0->1 = 2, 1->0 = 0.375, 1->2 = 0.125
    fn elber_sample() -> (Model, DataSample) {
        let mut anchors = vec![
            Anchor::new(0, vec![Milestone::new(0, 2, 0), Milestone::new(1, 3, 1)]),
            Anchor::new(
                1,
                vec![
                    Milestone::new(0, 1, 0),
                    Milestone::new(1, 2, 1),
                    Milestone::new(2, 3, 2),
                ],
            ),
            Anchor::new(2, vec![Milestone::new(1, 1, 1), Milestone::new(2, 2, 2)]),
        ];
        anchors[0].endstate = true;
        anchors[2].endstate = true;
        anchors[2].bulkstate = true;
        let model = Model::builder()
            .calculation(CalculationType::Elber)
            .anchors(anchors)
            .build()
            .unwrap();

        let mut first = BTreeMap::new();
        first.insert(3, 100.0);
        let mut second = BTreeMap::new();
        second.insert(1, 300.0);
        second.insert(3, 100.0);
        let stats = vec![
            Some(ElberAnchorStatistics::new(first, 50.0)),
            Some(ElberAnchorStatistics::new(second, 800.0)),
            None,
        ];
        let statistics = rate_matrix::elber_statistics(&model, &stats).unwrap();
        let main = DataSample::from_milestone_statistics(
            &model,
            None,
            statistics,
            &BTreeMap::new(),
            ObservableSettings::default(),
        )
        .unwrap();
        (model, main)
    }

    fn single_rate() -> RateSampler {
        RateSampler::new(array![[0.0, 100.0], [0.0, 0.0]], array![10.0, 0.0])
    }

    fn chain_mean(sampler: &RateSampler, num: usize, stride: usize, seed: u64) -> f64 {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut q = sampler.initial_rates();
        let mut total = 0.0;
        for _ in 0..num {
            for _ in 0..stride {
                sampler.step(&mut q, &mut rng);
            }
            total += q[[0, 1]];
        }
        total / num as f64
    }

    #[test]
    fn single_rate_posterior() {
        let sampler = single_rate();
        assert_eq!(sampler.num_active(), 1);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut q = sampler.initial_rates();
        assert_eq!(q[[0, 1]], 10.0);

        let mut draws = Vec::new();
        for _ in 0..20_000 {
            for _ in 0..5 {
                sampler.step(&mut q, &mut rng);
            }
            assert_relative_eq!(q.row(0).sum(), 0.0, epsilon = 1e-10);
            draws.push(q[[0, 1]]);
        }
        // Gamma(N, R): mean N / R, standard deviation sqrt(N) / R
        assert_relative_eq!(linalg::mean(&draws), 10.0, max_relative = 0.05);
        assert_relative_eq!(linalg::std_dev(&draws), 1.0, max_relative = 0.2);
    }

    #[test]
    fn chain_means_converge() {
        let sampler = single_rate();
        let spread_of_means = |num: usize| {
            let means: Vec<f64> = (0..20)
                .map(|seed| chain_mean(&sampler, num, 20, seed))
                .collect();
            linalg::std_dev(&means)
        };
        let ratio = spread_of_means(100) / spread_of_means(1600);
        // Sixteen times more samples shrink the spread about four times
        assert!(ratio > 2.0 && ratio < 8.0, "ratio {}", ratio);
    }

    #[test]
    fn inactive_elements_stay_fixed() {
        let sampler = RateSampler::new(array![[0.0, 0.0], [3.0, 0.0]], array![1.0, 0.0]);
        assert_eq!(sampler.num_active(), 0);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut q = sampler.initial_rates();
        assert!(!sampler.step(&mut q, &mut rng));
        assert_eq!(q, Array2::<f64>::zeros((2, 2)));
    }

    #[test]
    fn mmvt_error_estimate() {
        let model = linear_model();
        let stats = SampleStatistics::from_anchor_statistics(&model, &linear_statistics()).unwrap();
        let bd = BTreeMap::new();
        let settings = ObservableSettings::default();
        let main = DataSample::from_statistics(&model, &stats, &bd, settings).unwrap();
        let estimator = McmcEstimator::mmvt(&model, &main, &stats, &bd, settings);

        let (skip, stride) = estimator.default_skip_and_stride();
        assert_eq!((skip, stride), (90, 9));

        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let results = estimator.run(50, skip, stride, &mut rng).unwrap();
        assert_eq!(results.samples.len(), 50);
        assert!(results.acceptance_ratio > 0.0);
        assert_eq!(results.errors.p_i.len(), 3);
        assert!(results.errors.k_off > 0.0);
        for sample in &results.samples {
            assert_relative_eq!(sample.p_i.iter().sum::<f64>(), 1.0, epsilon = 1e-10);
        }

        let state = estimator.step(estimator.initial_state(), &mut rng).unwrap();
        if let ChainRates::Mmvt { anchor_q, .. } = &state.rates {
            for q in anchor_q {
                for row in q.axis_iter(Axis(0)) {
                    assert_relative_eq!(row.sum(), 0.0, epsilon = 1e-10);
                }
            }
        } else {
            panic!("expected MMVT chain rates");
        }
    }

    #[test]
    fn zero_samples_is_an_error() {
        let model = linear_model();
        let stats = SampleStatistics::from_anchor_statistics(&model, &linear_statistics()).unwrap();
        let bd = BTreeMap::new();
        let settings = ObservableSettings::default();
        let main = DataSample::from_statistics(&model, &stats, &bd, settings).unwrap();
        let estimator = McmcEstimator::mmvt(&model, &main, &stats, &bd, settings);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert!(matches!(
            estimator.run(0, 10, 1, &mut rng),
            Err(AnalysisError::ZeroMcmcSamples)
        ));
    }

    #[test]
    fn elber_chain_samples_the_posterior() {
        let (model, main) = elber_sample();
        let bd = BTreeMap::new();
        let estimator = McmcEstimator::elber(&model, &main, &bd, ObservableSettings::default());
        let mut rng = ChaCha8Rng::seed_from_u64(5);

        let mut state = estimator.initial_state();
        let mut draws = Vec::new();
        for _ in 0..20_000 {
            for _ in 0..15 {
                state = estimator.step(state, &mut rng).unwrap();
            }
            match &state.rates {
                ChainRates::Elber { q } => {
                    for row in q.axis_iter(Axis(0)) {
                        assert_relative_eq!(row.sum(), 0.0, epsilon = 1e-10);
                    }
                    draws.push(q[[1, 2]]);
                }
                other => panic!("expected Elber chain rates, got {:?}", other),
            }
        }
        // Gamma(100, 800)
        assert_relative_eq!(linalg::mean(&draws), 0.125, max_relative = 0.05);
        assert_relative_eq!(linalg::std_dev(&draws), 0.0125, max_relative = 0.2);
        assert!(state.acceptance_ratio() > 0.0);
    }

    #[test]
    fn elber_error_estimate() {
        let (model, main) = elber_sample();
        let key = MfptKey::new(StateId::Milestone(0), StateId::Bulk);
        // tau_0 = Q_10 / (Q_12 Q_01) + 1 / Q_01 + 1 / Q_12
        assert_relative_eq!(main.kinetics.mfpts[&key], 10.0, epsilon = 1e-10);

        let bd = BTreeMap::new();
        let estimator = McmcEstimator::elber(&model, &main, &bd, ObservableSettings::default());
        let (skip, stride) = estimator.default_skip_and_stride();
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let results = estimator.run(50, skip, stride, &mut rng).unwrap();

        assert_eq!(results.samples.len(), 50);
        for sample in &results.samples {
            assert_eq!(sample.p_i[2], 0.0);
            assert_relative_eq!(sample.p_i.iter().sum::<f64>(), 1.0, epsilon = 1e-10);
        }
        assert_eq!(results.errors.p_i[2], 0.0);
        assert!(results.errors.k_off > 0.0);
        // Dominated by the 10% uncertainty of Q_12
        let error = results.errors.mfpts[&key];
        assert!(error > 0.2 && error < 5.0, "MFPT error {}", error);

        assert!(matches!(
            estimator.run(0, skip, stride, &mut rng),
            Err(AnalysisError::ZeroMcmcSamples)
        ));
        assert!(matches!(
            estimator.run(10, skip, 0, &mut rng),
            Err(AnalysisError::ZeroMcmcSamples)
        ));
    }

    #[test]
    fn chain_state_must_match_the_calculation() {
        let (elber_model, elber_main) = elber_sample();
        let bd = BTreeMap::new();
        let settings = ObservableSettings::default();
        let elber = McmcEstimator::elber(&elber_model, &elber_main, &bd, settings);

        let model = linear_model();
        let stats = SampleStatistics::from_anchor_statistics(&model, &linear_statistics()).unwrap();
        let main = DataSample::from_statistics(&model, &stats, &bd, settings).unwrap();
        let mmvt = McmcEstimator::mmvt(&model, &main, &stats, &bd, settings);

        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(matches!(
            mmvt.step(elber.initial_state(), &mut rng),
            Err(AnalysisError::InvalidModel(_))
        ));
        assert!(matches!(
            elber.evaluate(&mmvt.initial_state(), &mut rng),
            Err(AnalysisError::InvalidModel(_))
        ));
    }
}
