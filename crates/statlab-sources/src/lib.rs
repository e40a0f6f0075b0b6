pub mod client;
mod common;
pub mod configs;
pub mod empty;
pub mod estimated;
pub mod native;
pub mod random;
pub mod registry;

pub use client::HttpEstimator;
pub use configs::ConfigStore;
pub use empty::EmptyStats;
pub use estimated::EstimatedStats;
pub use native::NativeAnalyze;
pub use random::RandomStats;
pub use registry::Registry;

use statlab_core::{CatalogAccess, Result, StatsSourceConfig};

/// What a strategy reports back after a successful application.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyOutcome {
    /// Columns whose catalog statistics were written or targeted.
    pub columns_written: usize,
    /// Columns skipped because of validation or per-column failures.
    pub columns_skipped: usize,
    /// Whether the strategy finished with an ANALYZE pass.
    pub analyzed: bool,
}

/// A pluggable way of producing PostgreSQL planner statistics.
///
/// Implementations must be idempotent-safe to retry and must never commit
/// or roll back the enclosing transaction; that boundary belongs to the
/// trial executor.
pub trait StatsSource: Send + Sync {
    /// Stable unique name, used as the registry key.
    fn identify(&self) -> &'static str;

    /// True when the strategy depends on an external estimation service.
    /// The trial executor falls back to native statistics when such a
    /// strategy fails irrecoverably.
    fn requires_estimator(&self) -> bool {
        false
    }

    /// Loads a named configuration bundle for this strategy.
    fn load_config(&self, variant: &str) -> Result<StatsSourceConfig>;

    /// Mutates the statistics catalog according to the strategy, inside a
    /// transaction/session boundary owned by the caller.
    fn apply_statistics(
        &self,
        db: &mut dyn CatalogAccess,
        config: &StatsSourceConfig,
    ) -> Result<ApplyOutcome>;
}
