use crate::common::{prepare_session, run_analyze, stats_err};
use crate::configs::ConfigStore;
use crate::{ApplyOutcome, StatsSource};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statlab_core::{CatalogAccess, Error, Result, SchemaOverview, StatsSourceConfig};
use tracing::{info, warn};

pub const RANDOM: &str = "random";

/// Sets every user column's statistics target to a random value before
/// ANALYZE, producing deliberately arbitrary planner input. A `seed` in
/// the bundle's data makes the targets reproducible.
pub struct RandomStats {
    configs: ConfigStore,
}

impl RandomStats {
    pub fn new(configs: ConfigStore) -> Self {
        Self { configs }
    }
}

/// Deterministic expansion of (table, column, target) triples for a
/// schema; column order follows the captured overview.
fn column_targets(
    overview: &SchemaOverview,
    min_stats: u32,
    max_stats: u32,
    rng: &mut StdRng,
) -> Vec<(String, String, String, u32)> {
    let mut targets = Vec::new();
    for table in &overview.tables {
        for column in &table.columns {
            let value = rng.gen_range(min_stats..=max_stats);
            targets.push((
                table.schema.clone(),
                table.name.clone(),
                column.name.clone(),
                value,
            ));
        }
    }
    targets
}

impl StatsSource for RandomStats {
    fn identify(&self) -> &'static str {
        RANDOM
    }

    fn load_config(&self, variant: &str) -> Result<StatsSourceConfig> {
        self.configs.load(RANDOM, variant)
    }

    fn apply_statistics(
        &self,
        db: &mut dyn CatalogAccess,
        config: &StatsSourceConfig,
    ) -> Result<ApplyOutcome> {
        let min_stats = config.data_u64("min_stats_value").unwrap_or(1) as u32;
        let max_stats = config.data_u64("max_stats_value").unwrap_or(10_000) as u32;
        if min_stats == 0 || min_stats > max_stats {
            return Err(Error::StatsApplication(format!(
                "invalid statistics range: {min_stats}..{max_stats}"
            )));
        }
        prepare_session(db, &config.settings)?;

        let overview = db.schema_overview().map_err(stats_err)?;
        let mut rng = match config.data_u64("seed") {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let targets = column_targets(&overview, min_stats, max_stats, &mut rng);
        info!(
            target: "stats_source",
            columns = targets.len(),
            min = min_stats,
            max = max_stats,
            "applying random statistics targets"
        );

        let mut written = 0usize;
        let mut skipped = 0usize;
        for (schema, table, column, value) in &targets {
            let sql = format!(
                "ALTER TABLE {schema}.{table} ALTER COLUMN {column} SET STATISTICS {value}"
            );
            match db.execute(&sql) {
                Ok(()) => written += 1,
                Err(e) => {
                    // Per-column failures are tolerated; the remaining
                    // columns still get their targets.
                    warn!(
                        target: "stats_source",
                        %schema, %table, %column,
                        "failed to set statistics target: {e}"
                    );
                    skipped += 1;
                }
            }
        }
        run_analyze(db, &config.settings)?;
        info!(
            target: "stats_source",
            written, skipped, "random statistics application finished"
        );
        Ok(ApplyOutcome {
            columns_written: written,
            columns_skipped: skipped,
            analyzed: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{overview, RecordingCatalog};
    use serde_json::json;

    fn seeded_config(seed: u64) -> StatsSourceConfig {
        let mut config = RandomStats::new(ConfigStore::embedded())
            .load_config("default")
            .expect("config");
        config.data.insert("seed".to_string(), json!(seed));
        config
    }

    #[test]
    fn fixed_seed_produces_identical_targets() {
        let schema = overview(&[("orders", 100, &["id", "total"]), ("items", 50, &["sku"])]);
        let mut rng_a = StdRng::seed_from_u64(42);
        let mut rng_b = StdRng::seed_from_u64(42);
        let a = column_targets(&schema, 1, 10_000, &mut rng_a);
        let b = column_targets(&schema, 1, 10_000, &mut rng_b);
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
        assert!(a.iter().all(|(_, _, _, v)| (1..=10_000).contains(v)));
    }

    #[test]
    fn per_column_failure_does_not_abort_the_rest() {
        let source = RandomStats::new(ConfigStore::embedded());
        let config = seeded_config(7);
        let mut db = RecordingCatalog::with_overview(overview(&[(
            "orders",
            100,
            &["id", "broken", "total"],
        )]));
        db.fail_on = vec!["ALTER COLUMN broken".to_string()];
        let outcome = source.apply_statistics(&mut db, &config).expect("apply");
        assert_eq!(outcome.columns_written, 2);
        assert_eq!(outcome.columns_skipped, 1);
        assert!(outcome.analyzed);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let source = RandomStats::new(ConfigStore::embedded());
        let mut config = seeded_config(7);
        config
            .data
            .insert("min_stats_value".to_string(), json!(500));
        config
            .data
            .insert("max_stats_value".to_string(), json!(10));
        let mut db = RecordingCatalog::default();
        let err = source.apply_statistics(&mut db, &config).expect_err("range");
        assert!(err.is_stats_application());
    }
}
