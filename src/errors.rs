use std::path::PathBuf;
use thiserror::Error;

/// Enum for errors in this crate
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Error returned when a builder's `build()` was called improperly
    #[error("Could not build: {0}")]
    BuilderError(String),

    /// Error returned when an event log could not be opened or read
    #[error("Could not read {}: {source}", .path.display())]
    Io {
        #[allow(missing_docs)]
        path: PathBuf,
        #[allow(missing_docs)]
        source: std::io::Error,
    },

    /// Error returned when a line of an event log has an unexpected shape
    #[error("Malformed line {line} in {}: {message}", .path.display())]
    MalformedLine {
        #[allow(missing_docs)]
        path: PathBuf,
        #[allow(missing_docs)]
        line: usize,
        #[allow(missing_docs)]
        message: String,
    },

    /// Error returned when two consecutive records go backwards in time
    ///
    /// This usually means that an output file has been concatenated incorrectly or that a
    /// restart was not detected.
    #[error(
        "{kind} times cannot be negative ({interval}); has an output file been concatenated \
         incorrectly? file: {}, line: {line}",
        .path.display()
    )]
    NegativeTimeInterval {
        #[allow(missing_docs)]
        path: PathBuf,
        /// One-based line number of the later record
        line: usize,
        #[allow(missing_docs)]
        kind: &'static str,
        #[allow(missing_docs)]
        interval: f64,
    },

    /// Error returned when a milestone alias or index does not belong to an anchor
    #[error("Anchor {anchor} has no milestone {what} {value}")]
    UnknownAlias {
        #[allow(missing_docs)]
        anchor: usize,
        #[allow(missing_docs)]
        what: &'static str,
        #[allow(missing_docs)]
        value: usize,
    },

    /// Error returned when an anchor that must have statistics has none
    #[error("Missing statistics for anchor {anchor}")]
    NoStatistics {
        #[allow(missing_docs)]
        anchor: usize,
    },

    /// Error returned when an anchor contributes transitions but no incubation times
    #[error("Anchor {anchor} has no incubation times")]
    MissingIncubationTimes {
        #[allow(missing_docs)]
        anchor: usize,
    },

    /// Error returned when a statistic that must be strictly positive is not
    #[error("{what} should be positive, not {value}")]
    NonPositiveStatistic {
        #[allow(missing_docs)]
        what: String,
        #[allow(missing_docs)]
        value: f64,
    },

    /// Error returned when a linear system has no unique solution
    #[error("Singular matrix while computing {0}")]
    SingularMatrix(&'static str),

    /// Error returned when a rate comes out negative
    #[error("Negative rate {value} from {src} to {dst}")]
    NegativeRate {
        #[allow(missing_docs)]
        src: usize,
        #[allow(missing_docs)]
        dst: usize,
        #[allow(missing_docs)]
        value: f64,
    },

    /// Error returned when a transition probability comes out negative
    #[error("Negative value {value} in K matrix at ({i}, {j}) is not allowed")]
    NegativeTransitionProbability {
        #[allow(missing_docs)]
        i: usize,
        #[allow(missing_docs)]
        j: usize,
        #[allow(missing_docs)]
        value: f64,
    },

    /// Error returned when a milestone cannot reach the absorbing states of a calculation
    #[error("Milestone {milestone} cannot reach the absorbing states while computing {context}")]
    Unreachable {
        #[allow(missing_docs)]
        milestone: usize,
        #[allow(missing_docs)]
        context: &'static str,
    },

    /// Error returned when a computed quantity is NaN or infinite
    #[error("Non-finite value while computing {0}")]
    NonFinite(&'static str),

    /// Error returned when an engine label is not recognised
    #[error("Engine not allowed: {0}. Must be 'openmm' or 'namd'")]
    UnsupportedEngine(String),

    /// Error returned when the model has no bulk anchor
    #[error("A bulk state has not been defined, but is required")]
    MissingBulkAnchor,

    /// Error returned when the model has more than one bulk anchor
    #[error("Only one bulk state is allowed in model (anchors {0} and {1} are both bulk)")]
    MultipleBulkAnchors(usize, usize),

    /// Error returned when the model topology is inconsistent
    #[error("Invalid model: {0}")]
    InvalidModel(String),

    /// Error returned when the MCMC parameters would retain no samples
    #[error(
        "Nothing sampled in Monte Carlo milestoning procedure; choose a different arrangement \
         of num, skip and stride"
    )]
    ZeroMcmcSamples,

    /// Error returned when an array is the wrong length
    #[error("Array of length {0} is incorrect; length should be {1}")]
    ArrayLengthMismatch(usize, usize),

    /// Error returned when a model or result fails to (de)serialise
    #[error("JSON error: {source}")]
    Json {
        #[allow(missing_docs)]
        #[from]
        source: serde_json::Error,
    },
}

impl From<String> for AnalysisError {
    fn from(s: String) -> Self {
        Self::BuilderError(s)
    }
}

/// Result type for the mmvt-rs crate
pub type Result<T> = std::result::Result<T, AnalysisError>;
