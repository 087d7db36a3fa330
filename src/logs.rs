//! Readers for the event logs written by the MD engines
//!
//! Each engine writes one line per milestone bounce. The readers turn those lines into a
//! canonical stream of [`Crossing`]s, which [`reduce`] turns into [`AnchorStatistics`].

use crate::errors::*;
use crate::model::Anchor;
use crate::stats::{AnchorStatistics, TimeSummary};
use log::debug;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default NAMD integration timestep in picoseconds
pub const DEFAULT_NAMD_TIMESTEP: f64 = 0.002;

/// The textual convention of an engine's event log
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogFormat {
    /// Comma separated `boundary_alias,bounce_index,time` records
    OpenMm,
    /// `SEEKR: Cell Collision` and `SEEKR: Milestone Transition` lines, timed in steps
    Namd {
        /// Length of one step in picoseconds
        timestep: f64,
    },
}

impl LogFormat {
    /// NAMD logs with the given timestep
    pub fn namd(timestep: f64) -> Self {
        Self::Namd { timestep }
    }
}

impl FromStr for LogFormat {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openmm" => Ok(Self::OpenMm),
            "namd" => Ok(Self::namd(DEFAULT_NAMD_TIMESTEP)),
            _ => Err(AnalysisError::UnsupportedEngine(s.to_string())),
        }
    }
}

/// One bounce against a milestone
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossing {
    /// Alias of the milestone that was touched
    pub alias: usize,
    /// Time of the bounce in picoseconds
    pub time: f64,
    /// Incubation time reported by the engine, if it reports one
    pub incubation: Option<f64>,
    /// One-based line number in the source file
    pub line: usize,
}

/// The parsed contents of one log file
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFile {
    /// Path the records were read from
    pub path: PathBuf,
    /// Swarm replicate this file belongs to, if it is part of a swarm
    pub swarm_index: Option<usize>,
    /// Records in file order
    pub crossings: Vec<Crossing>,
}

impl ParsedFile {
    fn start_time(&self) -> Option<f64> {
        self.crossings.first().map(|c| c.time)
    }
}

/// An entry in the merged stream of records for one anchor
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogEntry {
    /// The following records come from an independent replicate
    NewSwarm,
    /// A record from the file at this position of the file list
    Crossing {
        #[allow(missing_docs)]
        file: usize,
        #[allow(missing_docs)]
        crossing: Crossing,
    },
}

/// Bounds on the times of the records that are reduced
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeWindow {
    /// Records before this time are skipped
    pub min_time: Option<f64>,
    /// Reading stops at the first record after this time
    pub max_time: Option<f64>,
}

/// Read the swarm index out of a file name like `mmvt.swarm_3.out`
pub fn swarm_index(path: &Path) -> Result<Option<usize>> {
    let basename = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return Ok(None),
    };
    if !basename.contains("swarm") {
        return Ok(None);
    }

    basename
        .split('.')
        .nth(1)
        .and_then(|tag| tag.split('_').nth(1))
        .and_then(|index| index.parse().ok())
        .map(Some)
        .ok_or_else(|| AnalysisError::MalformedLine {
            path: path.to_path_buf(),
            line: 0,
            message: "cannot read a swarm index from the file name".to_string(),
        })
}

/// Parse one log file into canonical records
///
/// NAMD logs refer to neighbouring anchors and global milestone indices, so the anchor that
/// wrote the log is needed to convert them to aliases.
pub fn parse_file(format: LogFormat, anchor: &Anchor, path: &Path) -> Result<ParsedFile> {
    let io_err = |source| AnalysisError::Io {
        path: path.to_path_buf(),
        source,
    };
    let reader = BufReader::new(File::open(path).map_err(io_err)?);

    let mut crossings = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.map_err(io_err)?;
        let parsed = match format {
            LogFormat::OpenMm => parse_openmm_line(&line),
            LogFormat::Namd { timestep } => parse_namd_line(&line, anchor, timestep),
        };
        let crossing = match parsed {
            Ok(Some(c)) => Crossing { line: i + 1, ..c },
            Ok(None) => continue,
            Err(LineError::Malformed(message)) => {
                return Err(AnalysisError::MalformedLine {
                    path: path.to_path_buf(),
                    line: i + 1,
                    message,
                })
            }
            Err(LineError::Analysis(e)) => return Err(e),
        };

        // NAMD reports a change of milestone with a second line at the same step
        match (format, crossings.last_mut()) {
            (LogFormat::Namd { .. }, Some(last)) if is_same_bounce(last, &crossing) => {
                last.incubation = crossing.incubation.or(last.incubation);
            }
            _ => crossings.push(crossing),
        }
    }

    Ok(ParsedFile {
        path: path.to_path_buf(),
        swarm_index: swarm_index(path)?,
        crossings,
    })
}

fn is_same_bounce(a: &Crossing, b: &Crossing) -> bool {
    a.alias == b.alias && a.time == b.time
}

enum LineError {
    Malformed(String),
    Analysis(AnalysisError),
}

impl From<AnalysisError> for LineError {
    fn from(e: AnalysisError) -> Self {
        Self::Analysis(e)
    }
}

fn parse_token<T: FromStr>(
    tokens: &[&str],
    position: usize,
    name: &str,
) -> std::result::Result<T, LineError> {
    tokens
        .get(position)
        .map(|t| t.trim().trim_end_matches(','))
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| LineError::Malformed(format!("could not read {}", name)))
}

fn parse_openmm_line(line: &str) -> std::result::Result<Option<Crossing>, LineError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let tokens: Vec<&str> = line.split(',').collect();
    if tokens.len() != 3 {
        return Err(LineError::Malformed(format!(
            "expected 3 comma separated fields, found {}",
            tokens.len()
        )));
    }

    let alias = parse_token(&tokens, 0, "boundary alias")?;
    let _bounce_index: u64 = parse_token(&tokens, 1, "bounce index")?;
    let time = parse_token(&tokens, 2, "time")?;

    Ok(Some(Crossing {
        alias,
        time,
        incubation: None,
        line: 0,
    }))
}

fn parse_namd_line(
    line: &str,
    anchor: &Anchor,
    timestep: f64,
) -> std::result::Result<Option<Crossing>, LineError> {
    if !line.starts_with("SEEKR") || line.trim().is_empty() {
        return Ok(None);
    }
    let tokens: Vec<&str> = line.split_whitespace().collect();

    if line.starts_with("SEEKR: Cell") {
        let current: i64 = parse_token(&tokens, 4, "current anchor")?;
        let new: i64 = parse_token(&tokens, 6, "new anchor")?;
        let stepnum: u64 = parse_token(&tokens, 8, "stepnum")?;

        let neighbor = anchor.index as i64 + (new - current);
        let alias = if neighbor < 0 {
            None
        } else {
            anchor.alias_from_neighbor_id(neighbor as usize)
        };
        let alias = alias.ok_or(AnalysisError::UnknownAlias {
            anchor: anchor.index,
            what: "bordering anchor",
            value: neighbor.max(0) as usize,
        })?;

        Ok(Some(Crossing {
            alias,
            time: stepnum as f64 * timestep,
            incubation: None,
            line: 0,
        }))
    } else if line.starts_with("SEEKR: Milestone") {
        let source = tokens
            .get(6)
            .map(|t| t.trim_end_matches(','))
            .ok_or_else(|| LineError::Malformed("could not read source".to_string()))?;
        let destination: usize = parse_token(&tokens, 8, "destination")?;
        let stepnum: u64 = parse_token(&tokens, 10, "stepnum")?;

        let incubation = if source == "none" {
            None
        } else {
            let _source: usize = parse_token(&tokens, 6, "source")?;
            let steps: u64 = parse_token(&tokens, 13, "incubation steps")?;
            Some(steps as f64 * timestep)
        };
        let alias = anchor
            .alias_from_id(destination)
            .ok_or(AnalysisError::UnknownAlias {
                anchor: anchor.index,
                what: "index",
                value: destination,
            })?;

        Ok(Some(Crossing {
            alias,
            time: stepnum as f64 * timestep,
            incubation,
            line: 0,
        }))
    } else {
        Err(LineError::Malformed(format!(
            "unable to handle line: {}",
            line.trim()
        )))
    }
}

/// Merge the records of consecutive files into one stream
///
/// A file that starts a new swarm replicate is preceded by [`LogEntry::NewSwarm`]. Unless
/// `skip_restart_check` is set, trailing records of a file at or after the first record of the
/// next file in the same swarm are discarded; those were overwritten by a restart from a
/// checkpoint.
pub fn merge_files(files: &[&ParsedFile], skip_restart_check: bool) -> Vec<LogEntry> {
    let mut current_swarm = 0;
    let starts_new_swarm: Vec<bool> = files
        .iter()
        .map(|file| match file.swarm_index {
            Some(index) => {
                let changed = index != current_swarm;
                current_swarm = index;
                changed
            }
            None => false,
        })
        .collect();

    let mut entries = Vec::new();
    for (i, file) in files.iter().enumerate() {
        if starts_new_swarm[i] {
            debug!("New swarm in {}", file.path.display());
            entries.push(LogEntry::NewSwarm);
        }

        let restart_time = match files.get(i + 1) {
            Some(next) if !skip_restart_check && !starts_new_swarm[i + 1] => next.start_time(),
            _ => None,
        };
        let keep = match restart_time {
            Some(t) => file
                .crossings
                .iter()
                .rposition(|c| c.time < t)
                .map_or(0, |last| last + 1),
            None => file.crossings.len(),
        };
        if keep < file.crossings.len() {
            debug!(
                "Discarding {} records of {} overwritten by a restart",
                file.crossings.len() - keep,
                file.path.display()
            );
        }

        entries.extend(
            file.crossings[..keep]
                .iter()
                .map(|&crossing| LogEntry::Crossing { file: i, crossing }),
        );
    }

    entries
}

/// Reduce a merged stream of records to transition counts and times
///
/// `paths` are only used for error messages.
pub fn reduce(
    entries: &[LogEntry],
    paths: &[PathBuf],
    window: TimeWindow,
    skip_restart_check: bool,
) -> Result<AnchorStatistics> {
    let mut n_i_j = BTreeMap::new();
    let mut r_i_lists: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
    let mut n_alpha_beta = BTreeMap::new();
    let mut t_alpha_list = Vec::new();

    let mut src: Option<usize> = None;
    let mut src_time = 0.0;
    let mut last_bounce_time = 0.0;

    for entry in entries {
        let (file, crossing) = match entry {
            LogEntry::NewSwarm => {
                src = None;
                continue;
            }
            LogEntry::Crossing { file, crossing } => (*file, crossing),
        };
        let negative = |kind, interval| AnalysisError::NegativeTimeInterval {
            path: paths.get(file).cloned().unwrap_or_default(),
            line: crossing.line,
            kind,
            interval,
        };

        if let Some(min_time) = window.min_time {
            if crossing.time < min_time {
                continue;
            }
        }
        if let Some(max_time) = window.max_time {
            if crossing.time > max_time {
                break;
            }
        }

        let source = match src {
            None => {
                src = Some(crossing.alias);
                src_time = crossing.time;
                last_bounce_time = crossing.time;
                continue;
            }
            Some(source) => source,
        };

        if source != crossing.alias {
            let incubation = crossing
                .incubation
                .unwrap_or(crossing.time - src_time);
            if !skip_restart_check && incubation < 0.0 {
                return Err(negative("incubation", incubation));
            }
            *n_i_j.entry((source, crossing.alias)).or_insert(0.0) += 1.0;
            r_i_lists.entry(source).or_default().push(incubation);
            src = Some(crossing.alias);
            src_time = crossing.time;
        }

        let interval = crossing.time - last_bounce_time;
        if interval < 0.0 {
            return Err(negative("inter-bounce", interval));
        }
        *n_alpha_beta.entry(crossing.alias).or_insert(0.0) += 1.0;
        t_alpha_list.push(interval);
        last_bounce_time = crossing.time;
    }

    let t_alpha = TimeSummary::from_samples(&t_alpha_list);
    let mut r_i: BTreeMap<usize, TimeSummary> = r_i_lists
        .iter()
        .map(|(&alias, times)| (alias, TimeSummary::from_samples(times)))
        .collect();
    if r_i.is_empty() {
        if let Some(source) = src {
            r_i.insert(source, t_alpha);
        }
    }

    Ok(AnchorStatistics {
        n_i_j,
        r_i,
        n_alpha_beta,
        t_alpha,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Milestone;
    use approx::assert_relative_eq;
    use std::io::Write;
    use tempfile::TempDir;

    fn middle_anchor() -> Anchor {
        Anchor::new(
            1,
            vec![Milestone::new(0, 1, 0), Milestone::new(1, 2, 2)],
        )
    }

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn read(
        format: LogFormat,
        paths: &[PathBuf],
        window: TimeWindow,
        skip_restart_check: bool,
    ) -> Result<AnchorStatistics> {
        let anchor = middle_anchor();
        let parsed = paths
            .iter()
            .map(|p| parse_file(format, &anchor, p))
            .collect::<Result<Vec<_>>>()?;
        let refs: Vec<&ParsedFile> = parsed.iter().collect();
        let entries = merge_files(&refs, skip_restart_check);
        reduce(&entries, paths, window, skip_restart_check)
    }

    #[test]
    fn engine_labels() {
        assert_eq!("openmm".parse::<LogFormat>().unwrap(), LogFormat::OpenMm);
        assert_eq!(
            "NAMD".parse::<LogFormat>().unwrap(),
            LogFormat::namd(DEFAULT_NAMD_TIMESTEP)
        );
        assert!(matches!(
            "gromacs".parse::<LogFormat>(),
            Err(AnalysisError::UnsupportedEngine(_))
        ));
    }

    #[test]
    fn openmm_counts_and_times() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "mmvt1.out",
            "#\"Bounced boundary ID\",\"bounce index\",\"total time (ps)\"\n\
             1,0,1.0\n\
             1,1,1.5\n\
             2,2,3.0\n\
             \n\
             2,3,3.5\n\
             1,4,6.0\n",
        );
        let stats = read(LogFormat::OpenMm, &[path], TimeWindow::default(), false).unwrap();

        assert_eq!(stats.n_i_j.get(&(1, 2)), Some(&1.0));
        assert_eq!(stats.n_i_j.get(&(2, 1)), Some(&1.0));
        assert_eq!(stats.n_alpha_beta.get(&1), Some(&2.0));
        assert_eq!(stats.n_alpha_beta.get(&2), Some(&2.0));
        assert_relative_eq!(stats.t_alpha.total, 5.0);
        assert_eq!(stats.t_alpha.count, 4);
        assert_relative_eq!(stats.r_i[&1].total, 2.0);
        assert_relative_eq!(stats.r_i[&2].total, 3.0);
        assert_relative_eq!(stats.t_alpha.average, 1.25);
        // Population standard deviation of [0.5, 1.5, 0.5, 2.5]
        assert_relative_eq!(stats.t_alpha.std_dev, (0.6875f64).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn openmm_keeps_repeated_bounces() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "mmvt1.out", "1,0,1.0\n2,1,2.0\n2,2,2.0\n1,3,3.0\n");
        let stats = read(LogFormat::OpenMm, &[path], TimeWindow::default(), false).unwrap();

        assert_eq!(stats.n_alpha_beta.get(&1), Some(&1.0));
        assert_eq!(stats.n_alpha_beta.get(&2), Some(&2.0));
        assert_eq!(stats.t_alpha.count, 3);
        assert_relative_eq!(stats.t_alpha.total, 2.0);
        assert_eq!(stats.n_i_j.get(&(1, 2)), Some(&1.0));
        assert_eq!(stats.n_i_j.get(&(2, 1)), Some(&1.0));
    }

    #[test]
    fn malformed_openmm_line() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "mmvt1.out", "1,0,1.0\n1,0\n");
        match read(LogFormat::OpenMm, &[path], TimeWindow::default(), false) {
            Err(AnalysisError::MalformedLine { line: 2, .. }) => {}
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn no_transitions_falls_back_to_total_time() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "mmvt1.out", "1,0,1.0\n1,1,2.0\n1,2,4.0\n");
        let stats = read(LogFormat::OpenMm, &[path], TimeWindow::default(), false).unwrap();
        assert!(stats.n_i_j.is_empty());
        assert_relative_eq!(stats.r_i[&1].total, 3.0);
        assert_eq!(stats.r_i[&1], stats.t_alpha);
    }

    #[test]
    fn time_window() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "mmvt1.out",
            "1,0,1.0\n2,1,2.0\n1,2,4.0\n2,3,7.0\n1,4,11.0\n",
        );
        let window = TimeWindow {
            min_time: Some(1.5),
            max_time: Some(8.0),
        };
        let stats = read(LogFormat::OpenMm, &[path], window, false).unwrap();
        // First record in the window is 2.0; reading stops at 11.0
        assert_relative_eq!(stats.t_alpha.total, 5.0);
        assert_eq!(stats.n_i_j.get(&(2, 1)), Some(&1.0));
        assert_eq!(stats.n_i_j.get(&(1, 2)), Some(&1.0));
    }

    #[test]
    fn restart_discards_overwritten_records() {
        let dir = TempDir::new().unwrap();
        let first = write(&dir, "mmvt1.out", "1,0,1.0\n2,1,2.0\n1,2,3.0\n2,3,4.0\n");
        let second = write(&dir, "mmvt2.out", "1,3,3.0\n2,4,5.0\n");
        let stats = read(
            LogFormat::OpenMm,
            &[first.clone(), second.clone()],
            TimeWindow::default(),
            false,
        )
        .unwrap();
        // Records at 3.0 and 4.0 of the first file are dropped
        assert_relative_eq!(stats.t_alpha.total, 4.0);
        assert_eq!(stats.t_alpha.count, 3);

        let second_path = second.clone();
        match read(
            LogFormat::OpenMm,
            &[first, second],
            TimeWindow::default(),
            true,
        ) {
            Err(AnalysisError::NegativeTimeInterval { path, line, kind, .. }) => {
                assert_eq!(kind, "inter-bounce");
                // The first record of the second file goes back in time
                assert_eq!(path, second_path);
                assert_eq!(line, 1);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn swarms_reset_timing_but_not_counts() {
        let dir = TempDir::new().unwrap();
        let first = write(&dir, "mmvt.swarm_0.out", "1,0,1.0\n2,1,2.0\n");
        let second = write(&dir, "mmvt.swarm_1.out", "2,0,1.0\n1,1,4.0\n");
        assert_eq!(swarm_index(&second).unwrap(), Some(1));

        let stats = read(
            LogFormat::OpenMm,
            &[first, second],
            TimeWindow::default(),
            false,
        )
        .unwrap();
        assert_eq!(stats.n_i_j.get(&(1, 2)), Some(&1.0));
        assert_eq!(stats.n_i_j.get(&(2, 1)), Some(&1.0));
        assert_relative_eq!(stats.t_alpha.total, 4.0);
        assert_relative_eq!(stats.r_i[&2].total, 3.0);
    }

    #[test]
    fn namd_lines() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "namdmmvt1.out",
            "Info: some unrelated output\n\
             SEEKR: Milestone Transition: anchor: 1, source: none, destination: 0, stepnum: 10, incubation steps: 0\n\
             SEEKR: Cell Collision: current: 1, new: 0, stepnum: 10\n\
             SEEKR: Cell Collision: current: 1, new: 0, stepnum: 30\n\
             SEEKR: Milestone Transition: anchor: 1, source: 0, destination: 1, stepnum: 80, incubation steps: 70\n\
             SEEKR: Cell Collision: current: 1, new: 2, stepnum: 80\n\
             SEEKR: Cell Collision: current: 1, new: 0, stepnum: 100\n\
             SEEKR: Milestone Transition: anchor: 1, source: 1, destination: 0, stepnum: 100, incubation steps: 20\n",
        );
        let stats = read(LogFormat::namd(0.5), &[path], TimeWindow::default(), false).unwrap();

        assert_eq!(stats.n_i_j.get(&(1, 2)), Some(&1.0));
        assert_eq!(stats.n_i_j.get(&(2, 1)), Some(&1.0));
        assert_relative_eq!(stats.r_i[&1].total, 35.0);
        assert_relative_eq!(stats.r_i[&2].total, 10.0);
        assert_eq!(stats.n_alpha_beta.get(&1), Some(&2.0));
        assert_eq!(stats.n_alpha_beta.get(&2), Some(&1.0));
        assert_relative_eq!(stats.t_alpha.total, 45.0);
    }

    #[test]
    fn namd_unknown_neighbor() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "namdmmvt1.out",
            "SEEKR: Cell Collision: current: 4, new: 7, stepnum: 10\n",
        );
        assert!(matches!(
            read(LogFormat::namd(0.002), &[path], TimeWindow::default(), false),
            Err(AnalysisError::UnknownAlias { .. })
        ));
    }
}
