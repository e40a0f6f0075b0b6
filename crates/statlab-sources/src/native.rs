use crate::common::{prepare_session, run_analyze};
use crate::configs::ConfigStore;
use crate::{ApplyOutcome, StatsSource};
use statlab_core::{CatalogAccess, Result, StatsSourceConfig};
use tracing::info;

pub const NATIVE_ANALYZE: &str = "native_analyze";

/// PostgreSQL's built-in statistics: clear caches, then ANALYZE. Also the
/// fallback target when an estimator-backed strategy fails irrecoverably.
pub struct NativeAnalyze {
    configs: ConfigStore,
}

impl NativeAnalyze {
    pub fn new(configs: ConfigStore) -> Self {
        Self { configs }
    }
}

impl StatsSource for NativeAnalyze {
    fn identify(&self) -> &'static str {
        NATIVE_ANALYZE
    }

    fn load_config(&self, variant: &str) -> Result<StatsSourceConfig> {
        self.configs.load(NATIVE_ANALYZE, variant)
    }

    fn apply_statistics(
        &self,
        db: &mut dyn CatalogAccess,
        config: &StatsSourceConfig,
    ) -> Result<ApplyOutcome> {
        info!(target: "stats_source", config = %config.name, "applying native statistics");
        prepare_session(db, &config.settings)?;
        run_analyze(db, &config.settings)?;
        Ok(ApplyOutcome {
            analyzed: true,
            ..ApplyOutcome::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::RecordingCatalog;

    #[test]
    fn clears_caches_then_analyzes() {
        let source = NativeAnalyze::new(ConfigStore::embedded());
        let config = source.load_config("default").expect("config");
        let mut db = RecordingCatalog::default();
        let outcome = source.apply_statistics(&mut db, &config).expect("apply");
        assert!(outcome.analyzed);
        assert_eq!(db.executed.first().map(String::as_str), Some("DISCARD ALL"));
        assert_eq!(db.executed.last().map(String::as_str), Some("ANALYZE VERBOSE"));
    }

    #[test]
    fn fast_variant_skips_cache_clear_and_verbose() {
        let source = NativeAnalyze::new(ConfigStore::embedded());
        let config = source.load_config("fast").expect("config");
        let mut db = RecordingCatalog::default();
        source.apply_statistics(&mut db, &config).expect("apply");
        assert_eq!(db.executed, vec!["ANALYZE".to_string()]);
    }

    #[test]
    fn analyze_failure_is_stats_application() {
        let source = NativeAnalyze::new(ConfigStore::embedded());
        let config = source.load_config("default").expect("config");
        let mut db = RecordingCatalog {
            fail_on: vec!["ANALYZE".to_string()],
            ..RecordingCatalog::default()
        };
        let err = source.apply_statistics(&mut db, &config).expect_err("fail");
        assert!(err.is_stats_application());
    }
}
