//! Experiment orchestration: plans trials from a validated request,
//! drives them sequentially through the trial executor, and persists
//! results through the store collaborator.

pub mod diff;
pub mod progress;
pub mod trial;

pub use diff::ConfigDiffTracker;
pub use progress::{ProgressEvent, ProgressTracker};
pub use trial::TrialExecutor;

use chrono::Utc;
use statlab_core::{
    CatalogAccess, DbProvisioner, Error, Experiment, ExperimentRequest, ExperimentStatus,
    ExperimentStore, Result, SnapshotScope, StatsResetStrategy, StatsSourceConfig, Trial,
    TrialPhase, TrialRecord, TrialStatus,
};
use statlab_sources::{Registry, StatsSource};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// Cooperative cancellation flag shared between an experiment handle and
/// the worker thread. Checked before every trial and before every query.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Expands a request into its full trial plan: sources in request order,
/// repetitions within each source, trial numbers contiguous from 1.
pub fn plan_trials(experiment_id: &str, request: &ExperimentRequest) -> Vec<Trial> {
    let mut trials =
        Vec::with_capacity(request.sources.len() * request.trial_count as usize);
    let mut number = 0u32;
    for selection in &request.sources {
        for repetition in 0..request.trial_count {
            number += 1;
            trials.push(Trial::new(
                experiment_id,
                number,
                &selection.source,
                &selection.config,
                repetition,
            ));
        }
    }
    trials
}

/// Releases the database session back to the provisioner on every exit
/// path, including panics and early returns.
struct SessionGuard<'a> {
    provisioner: &'a dyn DbProvisioner,
    session: Option<Box<dyn CatalogAccess>>,
}

impl<'a> SessionGuard<'a> {
    fn acquire(provisioner: &'a dyn DbProvisioner) -> Result<Self> {
        Ok(Self {
            provisioner,
            session: Some(provisioner.acquire()?),
        })
    }

    fn session_mut(&mut self) -> Result<&mut (dyn CatalogAccess + 'static)> {
        self.session
            .as_deref_mut()
            .ok_or_else(|| Error::Database("session already released".to_string()))
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.provisioner.release(session);
        }
    }
}

/// Handle to an experiment running on a worker thread.
pub struct ExperimentHandle {
    cancel: CancelToken,
    join: thread::JoinHandle<Result<Experiment>>,
}

impl ExperimentHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn join(self) -> Result<Experiment> {
        match self.join.join() {
            Ok(result) => result,
            Err(_) => Err(Error::Store("experiment worker panicked".to_string())),
        }
    }
}

static EXPERIMENT_SEQ: AtomicU64 = AtomicU64::new(1);

fn next_experiment_id() -> String {
    format!(
        "exp_{}_{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        EXPERIMENT_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

/// Runs experiments end to end: validation, trial planning, sequential
/// execution, persistence, and finalization. Trials that fail are
/// recorded and the run continues; the experiment ends FAILED only when
/// every trial failed or the run was cancelled.
pub struct ExperimentRunner {
    registry: Arc<Registry>,
    store: Arc<dyn ExperimentStore>,
    provisioner: Arc<dyn DbProvisioner>,
    progress: Arc<ProgressTracker>,
    scope: SnapshotScope,
}

impl ExperimentRunner {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<dyn ExperimentStore>,
        provisioner: Arc<dyn DbProvisioner>,
    ) -> Self {
        Self {
            registry,
            store,
            provisioner,
            progress: Arc::new(ProgressTracker::new()),
            scope: SnapshotScope::default(),
        }
    }

    pub fn with_scope(mut self, scope: SnapshotScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    /// The deterministic trial plan a request expands into, without
    /// running anything.
    pub fn plan(&self, request: &ExperimentRequest) -> Result<Vec<Trial>> {
        request.validate()?;
        Ok(plan_trials("planned", request))
    }

    /// Spawns the experiment on a worker thread and returns a handle for
    /// cancellation and result retrieval.
    pub fn start(self: Arc<Self>, request: ExperimentRequest) -> ExperimentHandle {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let join = thread::spawn(move || self.run(request, token));
        ExperimentHandle { cancel, join }
    }

    pub fn run(&self, request: ExperimentRequest, cancel: CancelToken) -> Result<Experiment> {
        request.validate()?;

        // Resolve every selection before any state is created, so a bad
        // source or config name fails the request, not the experiment.
        let mut resolved: Vec<(Arc<dyn StatsSource>, StatsSourceConfig)> = Vec::new();
        for selection in &request.sources {
            let (source, stored) = self.registry.resolve(&selection.source, &selection.config)?;
            let config = match &selection.config_yaml {
                Some(raw) => StatsSourceConfig::from_yaml_str(raw)?,
                None => stored,
            };
            resolved.push((source, config));
        }

        let experiment_id = next_experiment_id();
        let mut experiment = Experiment::new(&experiment_id, &request.name);
        experiment.stats_reset_strategy = request.stats_reset_strategy;
        experiment.transaction_handling = request.transaction_handling;

        // Config lineage is tracked for single-strategy runs, where one
        // bundle unambiguously describes the experiment. Sources without
        // stored bundle content simply go untracked.
        if let [selection] = request.sources.as_slice() {
            match self
                .registry
                .config_content(&selection.source, &selection.config)
            {
                Ok(original) => ConfigDiffTracker::track(
                    &mut experiment,
                    &selection.config,
                    &original,
                    selection.config_yaml.as_deref(),
                )?,
                Err(e) => debug!(
                    target: "experiment",
                    source = %selection.source,
                    config = %selection.config,
                    "no stored bundle content, skipping config tracking: {e}"
                ),
            }
        }

        self.store.create_experiment(&experiment)?;
        experiment.status = ExperimentStatus::Running;
        self.store.update_experiment(&experiment)?;
        info!(
            target: "experiment",
            experiment = %experiment_id,
            name = %request.name,
            sources = request.sources.len(),
            trial_count = request.trial_count,
            "experiment started"
        );
        self.progress
            .publish(&experiment_id, None, TrialPhase::Preparing, "experiment started");

        let mut trials = plan_trials(&experiment_id, &request);
        for trial in &trials {
            self.store.create_trial(trial)?;
        }

        let executor = TrialExecutor::new(
            self.registry.as_ref(),
            self.progress.as_ref(),
            &cancel,
            &self.scope,
            request.transaction_handling,
            &request.query_groups,
        );

        let mut shared: Option<SessionGuard<'_>> = None;
        let mut cancelled = false;
        for trial in trials.iter_mut() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let selection_index = ((trial.number - 1) / request.trial_count) as usize;
            let (source, config) = &resolved[selection_index];
            let outcome = match request.stats_reset_strategy {
                StatsResetStrategy::Once => {
                    if shared.is_none() {
                        shared = match SessionGuard::acquire(self.provisioner.as_ref()) {
                            Ok(guard) => Some(guard),
                            Err(e) => {
                                self.fail_trial(trial, e);
                                self.store.record_trial(trial)?;
                                continue;
                            }
                        };
                    }
                    match shared.as_mut() {
                        Some(guard) => guard.session_mut().map(|session| {
                            executor.execute(trial, session, source.as_ref(), config)
                        }),
                        None => Err(Error::Database("session unavailable".to_string())),
                    }
                }
                StatsResetStrategy::PerTrial => SessionGuard::acquire(self.provisioner.as_ref())
                    .and_then(|mut guard| {
                        guard.session_mut().map(|session| {
                            executor.execute(trial, session, source.as_ref(), config)
                        })
                    }),
            };
            if let Err(e) = outcome {
                self.fail_trial(trial, e);
            }
            self.store.record_trial(trial)?;
        }
        drop(shared);

        let all_failed = trials
            .iter()
            .filter(|t| t.status.is_terminal())
            .all(|t| t.status == TrialStatus::Failed);
        let status = if cancelled || all_failed {
            ExperimentStatus::Failed
        } else {
            ExperimentStatus::Completed
        };
        self.store.finalize_experiment(&experiment_id, status)?;
        experiment.status = status;

        let phase = match status {
            ExperimentStatus::Completed => TrialPhase::Succeeded,
            _ => TrialPhase::Failed,
        };
        let message = if cancelled {
            "experiment cancelled"
        } else {
            "experiment finished"
        };
        info!(
            target: "experiment",
            experiment = %experiment_id,
            status = ?status,
            cancelled,
            "{message}"
        );
        self.progress.publish(&experiment_id, None, phase, message);
        Ok(experiment)
    }

    /// Session acquisition and other infrastructure errors fail the
    /// trial without touching the executor.
    fn fail_trial(&self, trial: &mut Trial, error: Error) {
        warn!(
            target: "trial",
            experiment = %trial.experiment_id,
            trial = trial.number,
            "trial failed before execution: {error}"
        );
        trial.status = TrialStatus::Failed;
        trial.finished_at = Some(Utc::now());
        trial.record = Some(TrialRecord {
            queries: Vec::new(),
            before_stats: None,
            after_stats: None,
            post_execution: None,
            fallback_used: false,
            failure: Some(error.to_string()),
        });
        self.progress.publish(
            &trial.experiment_id,
            Some(trial.number),
            TrialPhase::Failed,
            error.to_string(),
        );
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use crate::CancelToken;
    use serde_json::{json, Value};
    use statlab_core::{
        CatalogAccess, ColumnInfo, ColumnStats, ColumnStatsUpdate, DbProvisioner, Error, Result,
        SchemaOverview, SnapshotScope, StatsSourceConfig, TableInfo,
    };
    use statlab_sources::{ApplyOutcome, StatsSource};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Shared scripting state for fake catalog sessions. Cloning shares
    /// the log and counters, so tests can inspect activity after the
    /// session has been released.
    #[derive(Clone, Default)]
    pub struct CatalogScript {
        pub log: Arc<Mutex<Vec<String>>>,
        pub fail_on: Vec<String>,
        pub explain_fail_on: Vec<String>,
        pub explain_count: Arc<AtomicUsize>,
        pub cancel_after_explains: Option<(usize, CancelToken)>,
    }

    impl CatalogScript {
        pub fn log(&self) -> Vec<String> {
            self.log.lock().map(|l| l.clone()).unwrap_or_default()
        }
    }

    pub struct ScriptedCatalog {
        script: CatalogScript,
    }

    impl ScriptedCatalog {
        pub fn new(script: CatalogScript) -> Self {
            Self { script }
        }

        fn record(&self, entry: impl Into<String>) {
            if let Ok(mut log) = self.script.log.lock() {
                log.push(entry.into());
            }
        }
    }

    fn plan_document() -> Value {
        json!([{
            "Plan": {"Total Cost": 100.0, "Plan Rows": 10, "Actual Rows": 10},
            "Execution Time": 1.5
        }])
    }

    impl CatalogAccess for ScriptedCatalog {
        fn execute(&mut self, sql: &str) -> Result<()> {
            if self.script.fail_on.iter().any(|f| sql.contains(f.as_str())) {
                return Err(Error::Database(format!("scripted failure for: {sql}")));
            }
            self.record(sql);
            Ok(())
        }

        fn explain_analyze(&mut self, sql: &str) -> Result<Value> {
            if self
                .script
                .explain_fail_on
                .iter()
                .any(|f| sql.contains(f.as_str()))
            {
                return Err(Error::QueryExecution(format!("scripted failure for: {sql}")));
            }
            self.record(format!("EXPLAIN {sql}"));
            let count = self.script.explain_count.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((limit, token)) = &self.script.cancel_after_explains {
                if count >= *limit {
                    token.cancel();
                }
            }
            Ok(plan_document())
        }

        fn read_column_stats(&mut self, _scope: &SnapshotScope) -> Result<Vec<ColumnStats>> {
            Ok(vec![ColumnStats {
                schema: "public".to_string(),
                table: "orders".to_string(),
                column: "id".to_string(),
                null_frac: Some(0.0),
                n_distinct: Some(-1.0),
                most_common_vals: vec![],
                most_common_freqs: vec![],
                histogram_bounds: vec![],
                correlation: Some(1.0),
            }])
        }

        fn schema_overview(&mut self) -> Result<SchemaOverview> {
            Ok(SchemaOverview {
                tables: vec![TableInfo {
                    schema: "public".to_string(),
                    name: "orders".to_string(),
                    row_count: 100,
                    columns: vec![ColumnInfo {
                        name: "id".to_string(),
                        data_type: "bigint".to_string(),
                    }],
                }],
                database_size_bytes: 4096,
            })
        }

        fn write_column_stats(&mut self, update: &ColumnStatsUpdate) -> Result<()> {
            self.record(format!(
                "WRITE {}.{}.{}",
                update.schema, update.table, update.column
            ));
            Ok(())
        }

        fn begin(&mut self) -> Result<()> {
            self.record("BEGIN");
            Ok(())
        }

        fn commit(&mut self) -> Result<()> {
            self.record("COMMIT");
            Ok(())
        }

        fn rollback(&mut self) -> Result<()> {
            self.record("ROLLBACK");
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct ScriptedProvisioner {
        script: CatalogScript,
        pub acquired: AtomicUsize,
        pub released: AtomicUsize,
    }

    impl ScriptedProvisioner {
        pub fn new(script: CatalogScript) -> Self {
            Self {
                script,
                ..Self::default()
            }
        }

        pub fn counts(&self) -> (usize, usize) {
            (
                self.acquired.load(Ordering::SeqCst),
                self.released.load(Ordering::SeqCst),
            )
        }
    }

    impl DbProvisioner for ScriptedProvisioner {
        fn acquire(&self) -> Result<Box<dyn CatalogAccess>> {
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedCatalog::new(self.script.clone())))
        }

        fn release(&self, _session: Box<dyn CatalogAccess>) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Estimator-backed strategy that always fails at the application
    /// level, for exercising the native-statistics fallback.
    pub struct FlakyEstimated;

    impl StatsSource for FlakyEstimated {
        fn identify(&self) -> &'static str {
            "flaky_estimated"
        }

        fn requires_estimator(&self) -> bool {
            true
        }

        fn load_config(&self, _variant: &str) -> Result<StatsSourceConfig> {
            StatsSourceConfig::from_yaml_str("name: default\nsettings: {}\n")
        }

        fn apply_statistics(
            &self,
            _db: &mut dyn CatalogAccess,
            _config: &StatsSourceConfig,
        ) -> Result<ApplyOutcome> {
            Err(Error::StatsApplication(
                "estimator failed after 3 attempts".to_string(),
            ))
        }
    }
}
