use crate::client::HttpEstimator;
use crate::common::{prepare_session, stats_err};
use crate::configs::ConfigStore;
use crate::{ApplyOutcome, StatsSource};
use statlab_core::{
    CatalogAccess, ColumnEstimate, ColumnStatsUpdate, Error, Estimator, Result, SchemaOverview,
    StatsSourceConfig,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

pub const ESTIMATED: &str = "estimated";

const DEFAULT_MAX_RETRIES: u64 = 3;
const DEFAULT_RETRY_DELAY_SECONDS: u64 = 2;

/// Statistics estimated by an external (AI) service and written straight
/// into the catalog. Estimates are validated and clamped against the
/// actual captured schema before any write; a call that yields zero valid
/// estimates counts as a strategy failure.
pub struct EstimatedStats {
    configs: ConfigStore,
    estimator: Option<Arc<dyn Estimator>>,
}

impl EstimatedStats {
    /// Production form: the estimator client is built from the bundle's
    /// `data` section at apply time.
    pub fn new(configs: ConfigStore) -> Self {
        Self {
            configs,
            estimator: None,
        }
    }

    /// Injects a pre-built estimator, bypassing the HTTP client.
    pub fn with_estimator(configs: ConfigStore, estimator: Arc<dyn Estimator>) -> Self {
        Self {
            configs,
            estimator: Some(estimator),
        }
    }

    fn estimate_with_retries(
        &self,
        estimator: &dyn Estimator,
        schema: &SchemaOverview,
        max_retries: u64,
        delay: Duration,
    ) -> Result<Vec<ColumnEstimate>> {
        let mut last_error = String::new();
        for attempt in 1..=max_retries {
            info!(target: "stats_source", attempt, max_retries, "requesting estimation");
            match estimator.estimate(schema) {
                Ok(estimates) => return Ok(estimates),
                Err(e) => {
                    warn!(target: "stats_source", attempt, "estimation attempt failed: {e}");
                    last_error = e.to_string();
                    if attempt < max_retries {
                        thread::sleep(delay);
                    }
                }
            }
        }
        Err(Error::StatsApplication(format!(
            "estimator failed after {max_retries} attempts: {last_error}"
        )))
    }
}

/// Validates one raw estimate against the captured schema. Returns the
/// clamped catalog write, or `None` when the estimate must be discarded
/// (unknown table/column, or no usable numeric content).
pub fn validate_estimate(
    estimate: &ColumnEstimate,
    schema: &SchemaOverview,
) -> Option<ColumnStatsUpdate> {
    if !schema.has_column(&estimate.schema, &estimate.table, &estimate.column) {
        warn!(
            target: "stats_source",
            table = %estimate.table,
            column = %estimate.column,
            "discarding estimate for column absent from captured schema"
        );
        return None;
    }
    let row_count = schema
        .table(&estimate.schema, &estimate.table)
        .map(|t| t.row_count)
        .unwrap_or(0);

    let null_frac = estimate.null_frac.and_then(|v| clamp_null_frac(v));
    let n_distinct = estimate.n_distinct.and_then(|v| clamp_n_distinct(v, row_count));
    let correlation = estimate.correlation.and_then(|v| clamp_correlation(v));
    if null_frac.is_none() && n_distinct.is_none() && estimate.most_common_vals.is_empty() {
        warn!(
            target: "stats_source",
            table = %estimate.table,
            column = %estimate.column,
            "discarding estimate with no usable values"
        );
        return None;
    }

    let (most_common_vals, most_common_freqs) =
        align_common_values(&estimate.most_common_vals, &estimate.most_common_freqs);

    Some(ColumnStatsUpdate {
        schema: estimate.schema.clone(),
        table: estimate.table.clone(),
        column: estimate.column.clone(),
        null_frac,
        n_distinct,
        most_common_vals,
        most_common_freqs,
        histogram_bounds: estimate.histogram_bounds.clone(),
        correlation,
    })
}

/// Null fractions live in [0, 1]; out-of-range estimates are clamped, not
/// discarded. Non-finite input is unusable.
pub fn clamp_null_frac(value: f64) -> Option<f64> {
    if !value.is_finite() {
        return None;
    }
    Some(value.clamp(0.0, 1.0))
}

/// Positive distinct counts are capped at the actual row count; negative
/// values are the fractional form and must lie in [-1, 0].
pub fn clamp_n_distinct(value: f64, row_count: u64) -> Option<f64> {
    if !value.is_finite() {
        return None;
    }
    if value > 0.0 {
        Some(value.min(row_count as f64))
    } else {
        Some(value.clamp(-1.0, 0.0))
    }
}

pub fn clamp_correlation(value: f64) -> Option<f64> {
    if !value.is_finite() {
        return None;
    }
    Some(value.clamp(-1.0, 1.0))
}

/// Truncates value/frequency arrays to a common length and drops both
/// when the frequencies cannot describe a distribution.
fn align_common_values(vals: &[String], freqs: &[f64]) -> (Vec<String>, Vec<f64>) {
    let len = vals.len().min(freqs.len());
    let vals = vals[..len].to_vec();
    let freqs = freqs[..len].to_vec();
    let sum: f64 = freqs.iter().sum();
    if freqs.iter().any(|f| !f.is_finite() || *f < 0.0 || *f > 1.0) || sum > 1.0 + 1e-9 {
        return (Vec::new(), Vec::new());
    }
    (vals, freqs)
}

impl StatsSource for EstimatedStats {
    fn identify(&self) -> &'static str {
        ESTIMATED
    }

    fn requires_estimator(&self) -> bool {
        true
    }

    fn load_config(&self, variant: &str) -> Result<StatsSourceConfig> {
        self.configs.load(ESTIMATED, variant)
    }

    fn apply_statistics(
        &self,
        db: &mut dyn CatalogAccess,
        config: &StatsSourceConfig,
    ) -> Result<ApplyOutcome> {
        prepare_session(db, &config.settings)?;
        let schema = db.schema_overview().map_err(stats_err)?;
        if schema.tables.is_empty() {
            return Err(Error::StatsApplication(
                "no tables visible in target schema".to_string(),
            ));
        }

        let max_retries = config.data_u64("max_retries").unwrap_or(DEFAULT_MAX_RETRIES).max(1);
        let delay = Duration::from_secs(
            config
                .data_u64("retry_delay_seconds")
                .unwrap_or(DEFAULT_RETRY_DELAY_SECONDS),
        );

        let built;
        let estimator: &dyn Estimator = match self.estimator.as_deref() {
            Some(e) => e,
            None => {
                built = HttpEstimator::from_config(config)
                    .map_err(|e| Error::StatsApplication(e.to_string()))?;
                &built
            }
        };
        let estimates = self.estimate_with_retries(estimator, &schema, max_retries, delay)?;
        info!(
            target: "stats_source",
            received = estimates.len(),
            "validating estimator output against captured schema"
        );

        let mut written = 0usize;
        let mut skipped = 0usize;
        for estimate in &estimates {
            let Some(update) = validate_estimate(estimate, &schema) else {
                skipped += 1;
                continue;
            };
            match db.write_column_stats(&update) {
                Ok(()) => written += 1,
                Err(e) => {
                    warn!(
                        target: "stats_source",
                        table = %update.table,
                        column = %update.column,
                        "catalog write failed: {e}"
                    );
                    skipped += 1;
                }
            }
        }
        if written == 0 {
            return Err(Error::StatsApplication(format!(
                "no valid estimates out of {} received",
                estimates.len()
            )));
        }
        info!(target: "stats_source", written, skipped, "estimated statistics written");
        Ok(ApplyOutcome {
            columns_written: written,
            columns_skipped: skipped,
            analyzed: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{overview, RecordingCatalog};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedEstimator {
        failures_before_success: AtomicUsize,
        estimates: Mutex<Vec<ColumnEstimate>>,
        calls: AtomicUsize,
    }

    impl ScriptedEstimator {
        fn new(failures: usize, estimates: Vec<ColumnEstimate>) -> Self {
            Self {
                failures_before_success: AtomicUsize::new(failures),
                estimates: Mutex::new(estimates),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Estimator for ScriptedEstimator {
        fn estimate(&self, _schema: &SchemaOverview) -> Result<Vec<ColumnEstimate>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures_before_success.load(Ordering::SeqCst) > 0 {
                self.failures_before_success.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::Estimator("service unavailable".to_string()));
            }
            Ok(self.estimates.lock().expect("lock").clone())
        }
    }

    fn estimate(table: &str, column: &str) -> ColumnEstimate {
        ColumnEstimate {
            schema: "public".to_string(),
            table: table.to_string(),
            column: column.to_string(),
            null_frac: Some(0.25),
            n_distinct: Some(10.0),
            most_common_vals: vec![],
            most_common_freqs: vec![],
            histogram_bounds: vec![],
            correlation: None,
        }
    }

    fn fast_config(source: &EstimatedStats) -> StatsSourceConfig {
        let mut config = source.load_config("default").expect("config");
        config
            .data
            .insert("retry_delay_seconds".to_string(), serde_json::json!(0));
        config
    }

    #[test]
    fn null_frac_clamps_to_unit_interval() {
        assert_eq!(clamp_null_frac(1.7), Some(1.0));
        assert_eq!(clamp_null_frac(-0.3), Some(0.0));
        assert_eq!(clamp_null_frac(0.4), Some(0.4));
        assert_eq!(clamp_null_frac(f64::NAN), None);
    }

    #[test]
    fn n_distinct_caps_positive_at_row_count() {
        assert_eq!(clamp_n_distinct(250.0, 100), Some(100.0));
        assert_eq!(clamp_n_distinct(80.0, 100), Some(80.0));
    }

    #[test]
    fn n_distinct_fraction_clamps_to_minus_one_zero() {
        assert_eq!(clamp_n_distinct(-1.5, 100), Some(-1.0));
        assert_eq!(clamp_n_distinct(-0.4, 100), Some(-0.4));
    }

    #[test]
    fn estimate_for_unknown_column_is_discarded() {
        let schema = overview(&[("orders", 100, &["id"])]);
        assert!(validate_estimate(&estimate("orders", "ghost"), &schema).is_none());
        assert!(validate_estimate(&estimate("ghost_table", "id"), &schema).is_none());
        assert!(validate_estimate(&estimate("orders", "id"), &schema).is_some());
    }

    #[test]
    fn mismatched_common_value_arrays_are_truncated() {
        let (vals, freqs) = align_common_values(
            &["a".to_string(), "b".to_string(), "c".to_string()],
            &[0.5, 0.3],
        );
        assert_eq!(vals.len(), 2);
        assert_eq!(freqs, vec![0.5, 0.3]);
    }

    #[test]
    fn overweight_frequencies_drop_both_arrays() {
        let (vals, freqs) =
            align_common_values(&["a".to_string(), "b".to_string()], &[0.8, 0.7]);
        assert!(vals.is_empty());
        assert!(freqs.is_empty());
    }

    #[test]
    fn retries_then_succeeds_within_budget() {
        let configs = ConfigStore::embedded();
        let scripted = Arc::new(ScriptedEstimator::new(2, vec![estimate("orders", "id")]));
        let source = EstimatedStats::with_estimator(configs, scripted.clone());
        let config = fast_config(&source);
        let mut db = RecordingCatalog::with_overview(overview(&[("orders", 100, &["id"])]));
        let outcome = source.apply_statistics(&mut db, &config).expect("apply");
        assert_eq!(outcome.columns_written, 1);
        assert_eq!(scripted.calls.load(Ordering::SeqCst), 3);
        assert_eq!(db.writes.len(), 1);
    }

    #[test]
    fn exhausted_retries_surface_as_stats_application() {
        let configs = ConfigStore::embedded();
        let scripted = Arc::new(ScriptedEstimator::new(usize::MAX, vec![]));
        let source = EstimatedStats::with_estimator(configs, scripted.clone());
        let config = fast_config(&source);
        let mut db = RecordingCatalog::with_overview(overview(&[("orders", 100, &["id"])]));
        let err = source.apply_statistics(&mut db, &config).expect_err("fail");
        assert!(err.is_stats_application());
        assert_eq!(scripted.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn zero_valid_estimates_is_a_failure() {
        let configs = ConfigStore::embedded();
        let scripted = Arc::new(ScriptedEstimator::new(0, vec![estimate("ghost", "id")]));
        let source = EstimatedStats::with_estimator(configs, scripted);
        let config = fast_config(&source);
        let mut db = RecordingCatalog::with_overview(overview(&[("orders", 100, &["id"])]));
        let err = source.apply_statistics(&mut db, &config).expect_err("fail");
        assert!(err.to_string().contains("no valid estimates"));
    }

    #[test]
    fn single_invalid_estimate_is_skipped_not_fatal() {
        let configs = ConfigStore::embedded();
        let scripted = Arc::new(ScriptedEstimator::new(
            0,
            vec![estimate("orders", "id"), estimate("orders", "ghost")],
        ));
        let source = EstimatedStats::with_estimator(configs, scripted);
        let config = fast_config(&source);
        let mut db = RecordingCatalog::with_overview(overview(&[("orders", 100, &["id"])]));
        let outcome = source.apply_statistics(&mut db, &config).expect("apply");
        assert_eq!(outcome.columns_written, 1);
        assert_eq!(outcome.columns_skipped, 1);
    }

    #[test]
    fn clamped_values_reach_the_catalog_write() {
        let schema = overview(&[("orders", 100, &["id"])]);
        let mut raw = estimate("orders", "id");
        raw.null_frac = Some(1.7);
        raw.n_distinct = Some(9999.0);
        let update = validate_estimate(&raw, &schema).expect("valid");
        assert_eq!(update.null_frac, Some(1.0));
        assert_eq!(update.n_distinct, Some(100.0));
    }
}
