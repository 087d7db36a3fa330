//! Per-anchor transition statistics

use crate::errors::*;
use crate::linalg;
use crate::logs::{self, LogFormat, ParsedFile, TimeWindow};
use crate::model::Anchor;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Summary of a list of time intervals
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSummary {
    /// Sum of the intervals
    pub total: f64,
    /// Mean of the intervals
    pub average: f64,
    /// Population standard deviation of the intervals
    pub std_dev: f64,
    /// Number of intervals
    pub count: usize,
}

impl TimeSummary {
    /// Summarise a list of intervals
    pub fn from_samples(samples: &[f64]) -> Self {
        Self {
            total: samples.iter().sum(),
            average: linalg::mean(samples),
            std_dev: linalg::std_dev(samples),
            count: samples.len(),
        }
    }

    /// A summary known only by its total, as produced by analytical models
    pub fn from_total(total: f64) -> Self {
        Self {
            total,
            average: total,
            std_dev: 0.0,
            count: 1,
        }
    }
}

/// Transition statistics of one anchor, keyed by milestone alias
///
/// `n_i_j[(i, j)]` counts transitions from the milestone with alias `i` to the milestone with
/// alias `j`, `r_i[i]` summarises the incubation times spent after touching `i`,
/// `n_alpha_beta[i]` counts bounces against `i` and `t_alpha` summarises the intervals between
/// bounces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnchorStatistics {
    #[allow(missing_docs)]
    pub n_i_j: BTreeMap<(usize, usize), f64>,
    #[allow(missing_docs)]
    pub r_i: BTreeMap<usize, TimeSummary>,
    #[allow(missing_docs)]
    pub n_alpha_beta: BTreeMap<usize, f64>,
    #[allow(missing_docs)]
    pub t_alpha: TimeSummary,
}

impl AnchorStatistics {
    /// Build statistics from totals rather than from recorded events
    pub fn from_totals(
        n_i_j: BTreeMap<(usize, usize), f64>,
        r_i_totals: BTreeMap<usize, f64>,
        n_alpha_beta: BTreeMap<usize, f64>,
        t_alpha_total: f64,
    ) -> Self {
        Self {
            n_i_j,
            r_i: r_i_totals
                .into_iter()
                .map(|(alias, total)| (alias, TimeSummary::from_total(total)))
                .collect(),
            n_alpha_beta,
            t_alpha: TimeSummary::from_total(t_alpha_total),
        }
    }

    /// Whether any time was recorded in this anchor
    pub fn is_empty(&self) -> bool {
        self.t_alpha.total <= 0.0
    }

    /// Rate of bounces against each milestone alias per unit time in the anchor
    pub fn k_alpha_beta(&self, anchor: usize) -> Result<BTreeMap<usize, f64>> {
        if self.is_empty() {
            return Err(AnalysisError::NoStatistics { anchor });
        }
        Ok(self
            .n_alpha_beta
            .iter()
            .map(|(&alias, &count)| (alias, count / self.t_alpha.total))
            .collect())
    }

    fn log_summary(&self, anchor: usize) {
        debug!(
            "Anchor {}: N_i_j = {:?}, R_i totals = {:?}, N_alpha_beta = {:?}, T_alpha = {}",
            anchor,
            self.n_i_j,
            self.r_i.iter().map(|(k, v)| (*k, v.total)).collect::<Vec<_>>(),
            self.n_alpha_beta,
            self.t_alpha.total
        );
    }
}

/// Transition statistics of one Elber anchor
///
/// All trajectories start on the centre milestone, so only the destination alias of each
/// transition and the total incubation time need to be kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElberAnchorStatistics {
    /// Number of trajectories ending on each milestone alias
    pub n_i_j: BTreeMap<usize, f64>,
    /// Total duration of all trajectories
    pub r_i_total: f64,
}

impl ElberAnchorStatistics {
    #[allow(missing_docs)]
    pub fn new(n_i_j: BTreeMap<usize, f64>, r_i_total: f64) -> Self {
        Self { n_i_j, r_i_total }
    }
}

#[derive(Debug, Clone)]
struct CachedFile {
    len: u64,
    modified: Option<SystemTime>,
    parsed: ParsedFile,
}

/// Reads the event logs of one anchor, reusing files that have already been parsed
///
/// Files are cached by path, length and modification time, so calling
/// [`read`](Self::read) again after a simulation has appended to its logs only parses the
/// files that changed.
#[derive(Debug, Clone)]
pub struct AnchorAccumulator {
    anchor: Anchor,
    format: LogFormat,
    cache: HashMap<PathBuf, CachedFile>,
}

impl AnchorAccumulator {
    /// Create an accumulator for logs written by `anchor` in the given format
    pub fn new(anchor: Anchor, format: LogFormat) -> Self {
        Self {
            anchor,
            format,
            cache: HashMap::new(),
        }
    }

    /// Index of the anchor
    pub fn alpha(&self) -> usize {
        self.anchor.index
    }

    /// Format of the logs being read
    pub fn format(&self) -> LogFormat {
        self.format
    }

    /// Number of files currently cached
    pub fn cached_files(&self) -> usize {
        self.cache.len()
    }

    fn refresh(&mut self, path: &Path) -> Result<()> {
        let metadata = std::fs::metadata(path).map_err(|source| AnalysisError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let len = metadata.len();
        let modified = metadata.modified().ok();

        let fresh = matches!(
            self.cache.get(path),
            Some(cached) if cached.len == len && cached.modified == modified
        );
        if !fresh {
            debug!("Parsing {}", path.display());
            let parsed = logs::parse_file(self.format, &self.anchor, path)?;
            self.cache.insert(
                path.to_path_buf(),
                CachedFile {
                    len,
                    modified,
                    parsed,
                },
            );
        }

        Ok(())
    }

    /// Read the anchor's log files, in chronological order, into statistics
    pub fn read<P: AsRef<Path>>(
        &mut self,
        paths: &[P],
        window: TimeWindow,
        skip_restart_check: bool,
    ) -> Result<AnchorStatistics> {
        let paths: Vec<PathBuf> = paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
        self.cache.retain(|path, _| paths.contains(path));
        for path in &paths {
            self.refresh(path)?;
        }

        let files: Vec<&ParsedFile> = paths
            .iter()
            .filter_map(|p| self.cache.get(p).map(|cached| &cached.parsed))
            .collect();
        let entries = logs::merge_files(&files, skip_restart_check);
        let stats = logs::reduce(&entries, &paths, window, skip_restart_check)?;
        stats.log_summary(self.anchor.index);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Milestone;
    use approx::assert_relative_eq;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    fn anchor() -> Anchor {
        Anchor::new(
            1,
            vec![Milestone::new(0, 1, 0), Milestone::new(1, 2, 2)],
        )
    }

    #[test]
    fn rates_from_counts() {
        let mut n_alpha_beta = BTreeMap::new();
        n_alpha_beta.insert(1, 10.0);
        n_alpha_beta.insert(2, 30.0);
        let stats =
            AnchorStatistics::from_totals(BTreeMap::new(), BTreeMap::new(), n_alpha_beta, 20.0);
        let k = stats.k_alpha_beta(1).unwrap();
        assert_relative_eq!(k[&1], 0.5);
        assert_relative_eq!(k[&2], 1.5);
    }

    #[test]
    fn zero_time_has_no_statistics() {
        let stats = AnchorStatistics::default();
        assert!(matches!(
            stats.k_alpha_beta(4),
            Err(AnalysisError::NoStatistics { anchor: 4 })
        ));
    }

    #[test]
    fn rereading_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("mmvt1.out");
        let second = dir.path().join("mmvt2.out");
        std::fs::write(&first, "1,0,1.0\n2,1,2.5\n1,2,3.0\n").unwrap();
        std::fs::write(&second, "2,3,4.0\n1,4,6.0\n").unwrap();
        let paths = vec![first.clone(), second.clone()];

        let mut accumulator = AnchorAccumulator::new(anchor(), LogFormat::OpenMm);
        let once = accumulator
            .read(&paths, TimeWindow::default(), false)
            .unwrap();
        let twice = accumulator
            .read(&paths, TimeWindow::default(), false)
            .unwrap();
        assert_eq!(once, twice);
        assert_eq!(accumulator.cached_files(), 2);

        let mut fresh = AnchorAccumulator::new(anchor(), LogFormat::OpenMm);
        assert_eq!(
            fresh.read(&paths, TimeWindow::default(), false).unwrap(),
            once
        );
    }

    #[test]
    fn appended_records_are_merged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mmvt1.out");
        std::fs::write(&path, "1,0,1.0\n2,1,2.0\n").unwrap();

        let mut accumulator = AnchorAccumulator::new(anchor(), LogFormat::OpenMm);
        let before = accumulator
            .read(&[&path], TimeWindow::default(), false)
            .unwrap();
        assert_relative_eq!(before.t_alpha.total, 1.0);

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"1,2,5.0\n").unwrap();
        drop(file);

        let after = accumulator
            .read(&[&path], TimeWindow::default(), false)
            .unwrap();
        assert_relative_eq!(after.t_alpha.total, 4.0);
        assert_eq!(after.n_i_j.get(&(2, 1)), Some(&1.0));
    }
}
