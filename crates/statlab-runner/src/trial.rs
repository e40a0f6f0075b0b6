use crate::progress::ProgressTracker;
use crate::CancelToken;
use chrono::Utc;
use statlab_capture::{capture_catalog_snapshot, capture_plan};
use statlab_core::{
    CatalogAccess, Error, QueryGroup, Result, SnapshotPhase, SnapshotScope, StatsSourceConfig,
    TransactionHandling, Trial, TrialPhase, TrialRecord, TrialStatus,
};
use statlab_sources::native::NATIVE_ANALYZE;
use statlab_sources::{Registry, StatsSource};
use tracing::{info, warn};

/// Drives one trial through its state machine:
/// preparing -> applying_stats -> executing_queries -> capturing, ending
/// in succeeded or failed. Per-query failures are recorded and do not
/// fail the trial; stats-application failures do, after at most one
/// fallback to native statistics for estimator-backed strategies.
pub struct TrialExecutor<'a> {
    registry: &'a Registry,
    progress: &'a ProgressTracker,
    cancel: &'a CancelToken,
    scope: &'a SnapshotScope,
    transaction_handling: TransactionHandling,
    query_groups: &'a [QueryGroup],
}

impl<'a> TrialExecutor<'a> {
    pub fn new(
        registry: &'a Registry,
        progress: &'a ProgressTracker,
        cancel: &'a CancelToken,
        scope: &'a SnapshotScope,
        transaction_handling: TransactionHandling,
        query_groups: &'a [QueryGroup],
    ) -> Self {
        Self {
            registry,
            progress,
            cancel,
            scope,
            transaction_handling,
            query_groups,
        }
    }

    /// Runs the trial to a terminal status. The outcome lands on the
    /// trial itself; the caller persists it afterwards.
    pub fn execute(
        &self,
        trial: &mut Trial,
        db: &mut dyn CatalogAccess,
        source: &dyn StatsSource,
        config: &StatsSourceConfig,
    ) {
        trial.status = TrialStatus::Running;
        trial.started_at = Some(Utc::now());
        self.publish(trial, TrialPhase::Preparing, "trial starting");

        let mut record = TrialRecord {
            queries: Vec::new(),
            before_stats: None,
            after_stats: None,
            post_execution: None,
            fallback_used: false,
            failure: None,
        };

        match self.run_body(trial, db, source, config, &mut record) {
            Ok(()) => {
                trial.status = TrialStatus::Succeeded;
                info!(
                    target: "trial",
                    experiment = %trial.experiment_id,
                    trial = trial.number,
                    queries_ok = record.succeeded_queries(),
                    queries_failed = record.failed_queries(),
                    fallback = record.fallback_used,
                    "trial succeeded"
                );
                self.publish(trial, TrialPhase::Succeeded, "trial succeeded");
            }
            Err(e) => {
                // Leave no half-applied state behind a failed trial.
                let _ = db.rollback();
                warn!(
                    target: "trial",
                    experiment = %trial.experiment_id,
                    trial = trial.number,
                    "trial failed: {e}"
                );
                record.failure = Some(e.to_string());
                trial.status = TrialStatus::Failed;
                self.publish(trial, TrialPhase::Failed, e.to_string());
            }
        }

        trial.finished_at = Some(Utc::now());
        trial.record = Some(record);
    }

    fn run_body(
        &self,
        trial: &Trial,
        db: &mut dyn CatalogAccess,
        source: &dyn StatsSource,
        config: &StatsSourceConfig,
        record: &mut TrialRecord,
    ) -> Result<()> {
        db.begin()?;
        record.before_stats = Some(capture_catalog_snapshot(
            db,
            self.scope,
            SnapshotPhase::BeforeStats,
        )?);

        self.publish(trial, TrialPhase::ApplyingStats, "applying statistics");
        self.apply_with_fallback(trial, db, source, config, record)?;
        record.after_stats = Some(capture_catalog_snapshot(
            db,
            self.scope,
            SnapshotPhase::AfterStats,
        )?);

        self.publish(trial, TrialPhase::ExecutingQueries, "executing workload");
        for group in self.query_groups {
            for query in &group.queries {
                if self.cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                record
                    .queries
                    .push(capture_plan(db, &group.name, &query.id, &query.sql));
            }
        }

        self.publish(trial, TrialPhase::Capturing, "capturing final state");
        record.post_execution = Some(capture_catalog_snapshot(
            db,
            self.scope,
            SnapshotPhase::PostExecution,
        )?);

        match self.transaction_handling {
            TransactionHandling::Commit => db.commit()?,
            TransactionHandling::Rollback => db.rollback()?,
        }
        Ok(())
    }

    /// Applies the strategy. Estimator-backed strategies that fail at the
    /// stats-application level get exactly one fallback run with native
    /// statistics so the trial still yields a comparable measurement.
    fn apply_with_fallback(
        &self,
        trial: &Trial,
        db: &mut dyn CatalogAccess,
        source: &dyn StatsSource,
        config: &StatsSourceConfig,
        record: &mut TrialRecord,
    ) -> Result<()> {
        match source.apply_statistics(db, config) {
            Ok(_) => Ok(()),
            Err(e) if e.is_stats_application() && source.requires_estimator() => {
                warn!(
                    target: "trial",
                    experiment = %trial.experiment_id,
                    trial = trial.number,
                    source = source.identify(),
                    "strategy failed, falling back to native statistics: {e}"
                );
                self.publish(
                    trial,
                    TrialPhase::ApplyingStats,
                    "falling back to native statistics",
                );
                let (fallback, fallback_config) = self.registry.resolve(NATIVE_ANALYZE, "default")?;
                fallback.apply_statistics(db, &fallback_config)?;
                record.fallback_used = true;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn publish(&self, trial: &Trial, phase: TrialPhase, message: impl Into<String>) {
        self.progress
            .publish(&trial.experiment_id, Some(trial.number), phase, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{CatalogScript, FlakyEstimated, ScriptedCatalog};
    use statlab_core::{QuerySpec, Trial};
    use statlab_sources::ConfigStore;

    fn groups(queries: &[&str]) -> Vec<QueryGroup> {
        vec![QueryGroup {
            name: "workload".to_string(),
            queries: queries
                .iter()
                .enumerate()
                .map(|(i, sql)| QuerySpec {
                    id: format!("q{}", i + 1),
                    sql: sql.to_string(),
                })
                .collect(),
        }]
    }

    struct Fixture {
        registry: Registry,
        progress: ProgressTracker,
        cancel: CancelToken,
        scope: SnapshotScope,
        groups: Vec<QueryGroup>,
    }

    impl Fixture {
        fn new(queries: &[&str]) -> Self {
            Self {
                registry: Registry::with_defaults(ConfigStore::embedded()),
                progress: ProgressTracker::new(),
                cancel: CancelToken::new(),
                scope: SnapshotScope::default(),
                groups: groups(queries),
            }
        }

        fn executor(&self, handling: TransactionHandling) -> TrialExecutor<'_> {
            TrialExecutor::new(
                &self.registry,
                &self.progress,
                &self.cancel,
                &self.scope,
                handling,
                &self.groups,
            )
        }
    }

    fn run_native(fixture: &Fixture, script: CatalogScript, handling: TransactionHandling) -> (Trial, CatalogScript) {
        let mut trial = Trial::new("exp_1", 1, "native_analyze", "default", 0);
        let mut db = ScriptedCatalog::new(script.clone());
        let (source, config) = fixture
            .registry
            .resolve("native_analyze", "default")
            .expect("resolve");
        fixture
            .executor(handling)
            .execute(&mut trial, &mut db, source.as_ref(), &config);
        (trial, script)
    }

    #[test]
    fn successful_trial_rolls_back_by_default_and_records_everything() {
        let fixture = Fixture::new(&["SELECT 1", "SELECT 2"]);
        let (trial, script) =
            run_native(&fixture, CatalogScript::default(), TransactionHandling::Rollback);
        assert_eq!(trial.status, TrialStatus::Succeeded);
        assert!(trial.started_at.is_some() && trial.finished_at.is_some());
        let record = trial.record.expect("record");
        assert_eq!(record.queries.len(), 2);
        assert_eq!(record.succeeded_queries(), 2);
        assert!(record.before_stats.is_some());
        assert!(record.after_stats.is_some());
        assert!(record.post_execution.is_some());
        assert!(!record.fallback_used);
        let log = script.log();
        assert_eq!(log.first().map(String::as_str), Some("BEGIN"));
        assert_eq!(log.last().map(String::as_str), Some("ROLLBACK"));
        assert!(!log.contains(&"COMMIT".to_string()));
    }

    #[test]
    fn commit_handling_commits_on_success() {
        let fixture = Fixture::new(&["SELECT 1"]);
        let (trial, script) =
            run_native(&fixture, CatalogScript::default(), TransactionHandling::Commit);
        assert_eq!(trial.status, TrialStatus::Succeeded);
        assert_eq!(script.log().last().map(String::as_str), Some("COMMIT"));
    }

    #[test]
    fn query_failures_are_recorded_but_do_not_fail_the_trial() {
        let fixture = Fixture::new(&[
            "SELECT 1",
            "SELECT broken",
            "SELECT 2",
            "SELECT 3",
            "SELECT 4",
        ]);
        let script = CatalogScript {
            explain_fail_on: vec!["broken".to_string()],
            ..CatalogScript::default()
        };
        let (trial, _) = run_native(&fixture, script, TransactionHandling::Rollback);
        assert_eq!(trial.status, TrialStatus::Succeeded);
        let record = trial.record.expect("record");
        assert_eq!(record.succeeded_queries(), 4);
        assert_eq!(record.failed_queries(), 1);
        assert!(record.failure.is_none());
    }

    #[test]
    fn stats_failure_fails_the_trial_and_rolls_back() {
        let fixture = Fixture::new(&["SELECT 1"]);
        let script = CatalogScript {
            fail_on: vec!["ANALYZE".to_string()],
            ..CatalogScript::default()
        };
        let (trial, script) = run_native(&fixture, script, TransactionHandling::Commit);
        assert_eq!(trial.status, TrialStatus::Failed);
        let record = trial.record.expect("record");
        assert!(record
            .failure
            .as_deref()
            .expect("failure")
            .contains("stats application failed"));
        assert!(record.queries.is_empty());
        let log = script.log();
        assert_eq!(log.last().map(String::as_str), Some("ROLLBACK"));
        assert!(!log.contains(&"COMMIT".to_string()));
    }

    #[test]
    fn estimator_strategy_falls_back_to_native_once() {
        let fixture = Fixture::new(&["SELECT 1"]);
        let script = CatalogScript::default();
        let mut trial = Trial::new("exp_1", 1, "flaky_estimated", "default", 0);
        let mut db = ScriptedCatalog::new(script.clone());
        let source = FlakyEstimated;
        let config = source.load_config("default").expect("config");
        fixture
            .executor(TransactionHandling::Rollback)
            .execute(&mut trial, &mut db, &source, &config);
        assert_eq!(trial.status, TrialStatus::Succeeded);
        let record = trial.record.expect("record");
        assert!(record.fallback_used);
        assert!(script.log().iter().any(|s| s.starts_with("ANALYZE")));
    }

    #[test]
    fn non_estimator_stats_failure_gets_no_fallback() {
        let fixture = Fixture::new(&["SELECT 1"]);
        let script = CatalogScript {
            fail_on: vec!["ANALYZE".to_string()],
            ..CatalogScript::default()
        };
        let (trial, _) = run_native(&fixture, script, TransactionHandling::Rollback);
        assert_eq!(trial.status, TrialStatus::Failed);
        assert!(!trial.record.expect("record").fallback_used);
    }

    #[test]
    fn cancellation_aborts_remaining_queries() {
        let fixture = Fixture::new(&["SELECT 1", "SELECT 2", "SELECT 3"]);
        let script = CatalogScript {
            cancel_after_explains: Some((1, fixture.cancel.clone())),
            ..CatalogScript::default()
        };
        let (trial, _) = run_native(&fixture, script, TransactionHandling::Rollback);
        assert_eq!(trial.status, TrialStatus::Failed);
        let record = trial.record.expect("record");
        assert_eq!(record.queries.len(), 1);
        assert!(record
            .failure
            .as_deref()
            .expect("failure")
            .contains("cancelled"));
    }

    #[test]
    fn progress_events_walk_the_state_machine() {
        let fixture = Fixture::new(&["SELECT 1"]);
        let rx = fixture.progress.subscribe();
        run_native(&fixture, CatalogScript::default(), TransactionHandling::Rollback);
        let phases: Vec<TrialPhase> = rx.try_iter().map(|e| e.phase).collect();
        assert_eq!(
            phases,
            vec![
                TrialPhase::Preparing,
                TrialPhase::ApplyingStats,
                TrialPhase::ExecutingQueries,
                TrialPhase::Capturing,
                TrialPhase::Succeeded,
            ]
        );
    }
}
