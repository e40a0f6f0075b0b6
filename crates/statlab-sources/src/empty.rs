use crate::common::prepare_session;
use crate::configs::ConfigStore;
use crate::{ApplyOutcome, StatsSource};
use statlab_core::{CatalogAccess, Result, StatsSourceConfig};
use tracing::info;

pub const EMPTY: &str = "empty";

/// Clears caches and counters without applying any new statistics,
/// leaving the planner with whatever defaults the catalog falls back to.
pub struct EmptyStats {
    configs: ConfigStore,
}

impl EmptyStats {
    pub fn new(configs: ConfigStore) -> Self {
        Self { configs }
    }
}

impl StatsSource for EmptyStats {
    fn identify(&self) -> &'static str {
        EMPTY
    }

    fn load_config(&self, variant: &str) -> Result<StatsSourceConfig> {
        self.configs.load(EMPTY, variant)
    }

    fn apply_statistics(
        &self,
        db: &mut dyn CatalogAccess,
        config: &StatsSourceConfig,
    ) -> Result<ApplyOutcome> {
        info!(target: "stats_source", config = %config.name, "clearing statistics state only");
        prepare_session(db, &config.settings)?;
        Ok(ApplyOutcome::default())
    }
}
