use thiserror::Error;

/// Error taxonomy for the benchmarking core.
///
/// Granularity matters to callers: `QueryExecution` is recovered per
/// query, `StatsApplication` per trial (retry/fallback), everything else
/// is surfaced before any trial starts or fails the trial outright.
#[derive(Debug, Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unknown stats source: {0}")]
    UnknownSource(String),

    #[error("unknown config '{config}' for source '{source_name}'")]
    UnknownConfig { source_name: String, config: String },

    #[error("config not found: {0}")]
    ConfigNotFound(String),

    #[error("config parse error: {0}")]
    ConfigParse(String),

    #[error("stats application failed: {0}")]
    StatsApplication(String),

    #[error("query execution failed: {0}")]
    QueryExecution(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("estimator error: {0}")]
    Estimator(String),

    #[error("experiment cancelled")]
    Cancelled,

    #[error("persistence error: {0}")]
    Store(String),
}

impl Error {
    /// True for failures the trial executor may answer with a one-shot
    /// fallback to native statistics.
    pub fn is_stats_application(&self) -> bool {
        matches!(self, Error::StatsApplication(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
