use thiserror::Error;

/// Error taxonomy of the mapmaking pipeline.
///
/// Configuration errors are fatal and abort the run before the Monte
/// Carlo loop starts. Errors raised inside a realization are equally
/// fatal: no operation in this layer is retried, and the documented
/// recovery path is re-running the failed realization index (noise
/// regeneration is deterministic in the index).
#[derive(Error, Debug)]
pub enum TodmcError {
    #[error("process grouping of size {group} does not evenly divide {world} processes")]
    InvalidProcessGrouping { world: usize, group: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("focalplane contains no detectors")]
    EmptyFocalplane,

    #[error("schedule contains no entries")]
    EmptySchedule,

    #[error("failed to parse focalplane table: {0}")]
    FocalplaneParse(String),

    #[error("failed to parse schedule table: {0}")]
    ScheduleParse(String),

    #[error("timestream '{0}' not found in observation cache")]
    SignalNotFound(String),

    #[error("timestream '{name}' has {actual} samples, expected {expected}")]
    SignalShapeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("gain table has no entry for detector '{0}'")]
    MissingGain(String),

    #[error("process {rank} has no hit pixels; fewer detectors than processes in the group?")]
    NoHitPixels { rank: usize },

    #[error("destriping solver failed: {0}")]
    SolverDiverged(String),

    #[error("unable to perform file operation: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}
