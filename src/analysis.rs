//! The analysis pipeline from event logs to observables with error bars

use crate::bd::BdStatistics;
use crate::errors::*;
use crate::logs::{LogFormat, TimeWindow};
use crate::mcmc::{McmcEstimator, McmcResults};
use crate::model::{CalculationType, Model};
use crate::rate_matrix;
use crate::sample::{DataSample, ObservableSettings, Observables, SampleStatistics};
use crate::stats::{AnchorAccumulator, AnchorStatistics, ElberAnchorStatistics};
use log::info;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Settings of an [`Analysis`]
///
/// # Examples
///
/// ```
/// use mmvt_rs::analysis::AnalysisOptions;
///
/// let options = AnalysisOptions::builder()
///     .num_error_samples(100)
///     .seed(42)
///     .build()
///     .unwrap();
/// assert_eq!(options.stride, None);
/// ```
#[derive(Builder, Debug, Clone, PartialEq)]
#[builder(build_fn(validate = "Self::validate", name = "build_inner", private))]
pub struct AnalysisOptions {
    /// Number of MCMC samples used to estimate errors
    #[builder(default = "1000")]
    pub num_error_samples: usize,

    /// MCMC burn-in; defaults to $10 N^2$ for $N$ milestones
    #[builder(setter(strip_option), default)]
    pub skip: Option<usize>,

    /// Steps between retained MCMC samples; defaults to $N^2$ for $N$ milestones
    #[builder(setter(strip_option), default)]
    pub stride: Option<usize>,

    /// Seed for the MCMC random number generator; drawn from the OS if not given
    #[builder(setter(strip_option), default)]
    pub seed: Option<u64>,

    /// Ignore log records before this time
    #[builder(setter(strip_option), default)]
    pub min_time: Option<f64>,

    /// Ignore log records after this time
    #[builder(setter(strip_option), default)]
    pub max_time: Option<f64>,

    /// Keep log records that overlap the start of the following file
    #[builder(default = "false")]
    pub skip_restart_check: bool,

    /// Scale factor for the bounce rates of single-milestone anchors
    #[builder(default = "1.0")]
    pub dead_end_factor: f64,

    /// Compute `k_off` from the first milestone out of the bound state only
    #[builder(default = "false")]
    pub pre_equilibrium_approx: bool,
}

impl AnalysisOptionsBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if let Some(Some(0)) = self.stride {
            return Err("stride must be at least 1".to_string());
        }
        if let Some(factor) = self.dead_end_factor {
            if !(factor > 0.0) {
                return Err(format!("dead_end_factor must be positive, not {}", factor));
            }
        }
        if let (Some(Some(min)), Some(Some(max))) = (self.min_time, self.max_time) {
            if min > max {
                return Err(format!("min_time {} is after max_time {}", min, max));
            }
        }

        Ok(())
    }

    /// Build and validate the options
    pub fn build(&self) -> Result<AnalysisOptions> {
        Ok(self.build_inner()?)
    }
}

impl AnalysisOptions {
    /// Get a new builder for the `AnalysisOptions` struct
    pub fn builder() -> AnalysisOptionsBuilder {
        AnalysisOptionsBuilder::default()
    }

    /// The time window applied to every anchor's logs
    pub fn window(&self) -> TimeWindow {
        TimeWindow {
            min_time: self.min_time,
            max_time: self.max_time,
        }
    }

    fn observable_settings(&self) -> ObservableSettings {
        ObservableSettings {
            dead_end_factor: self.dead_end_factor,
            pre_equilibrium_approx: self.pre_equilibrium_approx,
        }
    }
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            num_error_samples: 1000,
            skip: None,
            stride: None,
            seed: None,
            min_time: None,
            max_time: None,
            skip_restart_check: false,
            dead_end_factor: 1.0,
            pre_equilibrium_approx: false,
        }
    }
}

/// Observables of the main sample and, if estimated, their errors
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResults {
    #[allow(missing_docs)]
    pub observables: Observables,
    /// Standard deviation of each observable over the MCMC samples
    pub errors: Option<Observables>,
}

/// Statistics and results of a milestoning calculation
#[derive(Debug)]
pub struct Analysis<'a> {
    model: &'a Model,
    options: AnalysisOptions,
    accumulators: BTreeMap<usize, AnchorAccumulator>,
    anchor_stats: Vec<Option<AnchorStatistics>>,
    elber_stats: Vec<Option<ElberAnchorStatistics>>,
    bd_stats: BTreeMap<usize, BdStatistics>,
    sample_stats: Option<SampleStatistics>,
    main: Option<DataSample>,
    errors: Option<McmcResults>,
}

impl<'a> Analysis<'a> {
    /// Start an analysis of `model`
    pub fn new(model: &'a Model, options: AnalysisOptions) -> Result<Self> {
        model.bulk_index()?;
        let n = model.num_anchors();
        Ok(Self {
            model,
            options,
            accumulators: BTreeMap::new(),
            anchor_stats: vec![None; n],
            elber_stats: vec![None; n],
            bd_stats: BTreeMap::new(),
            sample_stats: None,
            main: None,
            errors: None,
        })
    }

    #[allow(missing_docs)]
    pub fn model(&self) -> &Model {
        self.model
    }

    #[allow(missing_docs)]
    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    fn invalidate(&mut self) {
        self.sample_stats = None;
        self.main = None;
        self.errors = None;
    }

    fn check_anchor_index(&self, alpha: usize) -> Result<()> {
        if alpha >= self.model.num_anchors() {
            return Err(AnalysisError::InvalidModel(format!(
                "anchor {} does not exist",
                alpha
            )));
        }
        Ok(())
    }

    /// Read the MMVT event logs of anchor `alpha`, in chronological order
    ///
    /// Files that were read by an earlier call and have not changed since are not parsed again.
    pub fn read_output_files<P: AsRef<Path>>(
        &mut self,
        alpha: usize,
        format: LogFormat,
        files: &[P],
    ) -> Result<()> {
        self.check_anchor_index(alpha)?;
        let model = self.model;
        let anchor = &model.anchors[alpha];
        if anchor.bulkstate {
            info!("Skipping output files of bulk anchor {}", alpha);
            return Ok(());
        }

        let accumulator = self
            .accumulators
            .entry(alpha)
            .or_insert_with(|| AnchorAccumulator::new(anchor.clone(), format));
        if accumulator.format() != format {
            *accumulator = AnchorAccumulator::new(anchor.clone(), format);
        }
        let stats = accumulator.read(
            files,
            self.options.window(),
            self.options.skip_restart_check,
        )?;

        self.anchor_stats[alpha] = Some(stats);
        self.invalidate();
        Ok(())
    }

    /// Supply the MMVT statistics of anchor `alpha` directly
    pub fn set_anchor_statistics(&mut self, alpha: usize, stats: AnchorStatistics) -> Result<()> {
        self.check_anchor_index(alpha)?;
        self.anchor_stats[alpha] = Some(stats);
        self.invalidate();
        Ok(())
    }

    /// Supply the Elber statistics of anchor `alpha`
    pub fn set_elber_statistics(
        &mut self,
        alpha: usize,
        stats: ElberAnchorStatistics,
    ) -> Result<()> {
        self.check_anchor_index(alpha)?;
        self.elber_stats[alpha] = Some(stats);
        self.invalidate();
        Ok(())
    }

    /// Supply the statistics of the BD milestone with this index
    pub fn set_bd_statistics(&mut self, bd_index: usize, stats: BdStatistics) {
        self.bd_stats.insert(bd_index, stats);
        self.invalidate();
    }

    /// Current statistics of anchor `alpha`, if any
    pub fn anchor_statistics(&self, alpha: usize) -> Option<&AnchorStatistics> {
        self.anchor_stats.get(alpha).and_then(Option::as_ref)
    }

    /// Check that every non-bulk anchor has statistics
    pub fn check_anchor_stats(&self) -> Result<()> {
        for anchor in self.model.anchors.iter().filter(|a| !a.bulkstate) {
            let present = match self.model.calculation {
                CalculationType::Mmvt => self.anchor_stats[anchor.index]
                    .as_ref()
                    .map_or(false, |s| !s.is_empty()),
                CalculationType::Elber => self.elber_stats[anchor.index].is_some(),
            };
            if !present {
                return Err(AnalysisError::NoStatistics {
                    anchor: anchor.index,
                });
            }
        }
        Ok(())
    }

    /// Compute the observables of the collected statistics
    pub fn process_main_sample(&mut self) -> Result<&DataSample> {
        self.check_anchor_stats()?;
        let settings = self.options.observable_settings();
        let main = match self.model.calculation {
            CalculationType::Mmvt => {
                let stats =
                    SampleStatistics::from_anchor_statistics(self.model, &self.anchor_stats)?;
                let main = DataSample::from_statistics(self.model, &stats, &self.bd_stats, settings)?;
                self.sample_stats = Some(stats);
                main
            }
            CalculationType::Elber => {
                let statistics = rate_matrix::elber_statistics(self.model, &self.elber_stats)?;
                DataSample::from_milestone_statistics(
                    self.model,
                    None,
                    statistics,
                    &self.bd_stats,
                    settings,
                )?
            }
        };
        self.errors = None;
        Ok(self.main.insert(main))
    }

    /// Estimate the errors of the main sample's observables by MCMC
    ///
    /// Processes the main sample first if that has not been done yet.
    pub fn estimate_errors(&mut self) -> Result<&McmcResults> {
        if self.main.is_none() {
            self.process_main_sample()?;
        }
        let settings = self.options.observable_settings();
        let estimator = match (
            self.model.calculation,
            self.main.as_ref(),
            self.sample_stats.as_ref(),
        ) {
            (CalculationType::Mmvt, Some(main), Some(stats)) => {
                McmcEstimator::mmvt(self.model, main, stats, &self.bd_stats, settings)
            }
            (CalculationType::Elber, Some(main), _) => {
                McmcEstimator::elber(self.model, main, &self.bd_stats, settings)
            }
            _ => {
                return Err(AnalysisError::InvalidModel(
                    "main sample not processed".to_string(),
                ))
            }
        };

        let (default_skip, default_stride) = estimator.default_skip_and_stride();
        let skip = self.options.skip.unwrap_or(default_skip);
        let stride = self.options.stride.unwrap_or(default_stride);
        let mut rng = match self.options.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let results = estimator.run(self.options.num_error_samples, skip, stride, &mut rng)?;

        Ok(self.errors.insert(results))
    }

    /// The main sample, if it has been processed
    pub fn main_sample(&self) -> Option<&DataSample> {
        self.main.as_ref()
    }

    /// The MCMC results, if errors have been estimated
    pub fn mcmc_results(&self) -> Option<&McmcResults> {
        self.errors.as_ref()
    }

    /// Observables of the main sample and their errors, if estimated
    pub fn results(&self) -> Result<AnalysisResults> {
        let main = self
            .main
            .as_ref()
            .ok_or_else(|| AnalysisError::InvalidModel("main sample not processed".into()))?;
        Ok(AnalysisResults {
            observables: main.observables(),
            errors: self.errors.as_ref().map(|e| e.errors.clone()),
        })
    }
}

/// Read the MMVT logs of every anchor, compute the observables and estimate their errors
///
/// `output_files` maps anchor indices to their log files in chronological order. Error
/// estimation is skipped when `options.num_error_samples` is zero.
pub fn analyze<'a>(
    model: &'a Model,
    output_files: &BTreeMap<usize, Vec<PathBuf>>,
    format: LogFormat,
    options: AnalysisOptions,
) -> Result<Analysis<'a>> {
    let num_error_samples = options.num_error_samples;
    let mut analysis = Analysis::new(model, options)?;
    for (&alpha, files) in output_files {
        analysis.read_output_files(alpha, format, files)?;
    }
    analysis.process_main_sample()?;
    if num_error_samples > 0 {
        analysis.estimate_errors()?;
    }
    Ok(analysis)
}
