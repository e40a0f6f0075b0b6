use crate::util::canonical_json_digest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExperimentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExperimentStatus::Completed | ExperimentStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrialStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TrialStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TrialStatus::Succeeded | TrialStatus::Failed)
    }
}

/// Per-trial state machine states, published as progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialPhase {
    Pending,
    Preparing,
    ApplyingStats,
    ExecutingQueries,
    Capturing,
    Succeeded,
    Failed,
}

impl TrialPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrialPhase::Pending => "pending",
            TrialPhase::Preparing => "preparing",
            TrialPhase::ApplyingStats => "applying_stats",
            TrialPhase::ExecutingQueries => "executing_queries",
            TrialPhase::Capturing => "capturing",
            TrialPhase::Succeeded => "succeeded",
            TrialPhase::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatsResetStrategy {
    /// Restore the target database once and reuse it for every trial.
    #[default]
    Once,
    /// Fresh database session per trial.
    PerTrial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionHandling {
    Commit,
    /// Always roll back the trial body so no trial's writes leak into the
    /// next. This is the default the original tool shipped with.
    #[default]
    Rollback,
}

/// One benchmarking run. Aggregates trials and carries the configuration
/// tracking fields: the effective bundle, the stored original, and the
/// modified flag maintained by the diff tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    pub name: String,
    pub status: ExperimentStatus,
    pub stats_reset_strategy: StatsResetStrategy,
    pub transaction_handling: TransactionHandling,
    pub config_name: Option<String>,
    pub config_yaml: Option<String>,
    pub original_config_yaml: Option<String>,
    pub config_modified: bool,
    pub config_modified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Experiment {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: ExperimentStatus::Pending,
            stats_reset_strategy: StatsResetStrategy::default(),
            transaction_handling: TransactionHandling::default(),
            config_name: None,
            config_yaml: None,
            original_config_yaml: None,
            config_modified: false,
            config_modified_at: None,
            created_at: Utc::now(),
        }
    }
}

/// One (strategy-variant, repetition) execution within an experiment.
/// Mutated only by the trial executor that owns it; frozen once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trial {
    pub experiment_id: String,
    pub number: u32,
    pub source: String,
    pub config: String,
    pub repetition: u32,
    pub status: TrialStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub record: Option<TrialRecord>,
}

impl Trial {
    pub fn new(experiment_id: &str, number: u32, source: &str, config: &str, repetition: u32) -> Self {
        Self {
            experiment_id: experiment_id.to_string(),
            number,
            source: source.to_string(),
            config: config.to_string(),
            repetition,
            status: TrialStatus::Pending,
            started_at: None,
            finished_at: None,
            record: None,
        }
    }
}

/// Assembled result bundle for one trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialRecord {
    pub queries: Vec<QueryResult>,
    pub before_stats: Option<Snapshot>,
    pub after_stats: Option<Snapshot>,
    pub post_execution: Option<Snapshot>,
    pub fallback_used: bool,
    pub failure: Option<String>,
}

impl TrialRecord {
    pub fn succeeded_queries(&self) -> usize {
        self.queries.iter().filter(|q| q.error.is_none()).count()
    }

    pub fn failed_queries(&self) -> usize {
        self.queries.iter().filter(|q| q.error.is_some()).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotPhase {
    BeforeStats,
    AfterStats,
    PostExecution,
}

/// Point-in-time capture of statistics-catalog rows for one trial phase.
/// Columns are kept sorted by (schema, table, column) so two captures of
/// the same logical state compare equal regardless of row-fetch order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub phase: SnapshotPhase,
    pub captured_at: DateTime<Utc>,
    pub columns: Vec<ColumnStats>,
}

impl Snapshot {
    pub fn new(phase: SnapshotPhase, mut columns: Vec<ColumnStats>) -> Self {
        columns.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Self {
            phase,
            captured_at: Utc::now(),
            columns,
        }
    }

    /// Digest over column content only; the capture timestamp is excluded
    /// so unchanged catalogs compare equal across captures.
    pub fn content_digest(&self) -> String {
        let value = serde_json::to_value(&self.columns).unwrap_or_default();
        canonical_json_digest(&value)
    }
}

/// One `pg_stats` row, normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub schema: String,
    pub table: String,
    pub column: String,
    pub null_frac: Option<f64>,
    pub n_distinct: Option<f64>,
    #[serde(default)]
    pub most_common_vals: Vec<String>,
    #[serde(default)]
    pub most_common_freqs: Vec<f64>,
    #[serde(default)]
    pub histogram_bounds: Vec<String>,
    pub correlation: Option<f64>,
}

impl ColumnStats {
    pub fn sort_key(&self) -> (String, String, String) {
        (
            self.schema.clone(),
            self.table.clone(),
            self.column.clone(),
        )
    }
}

/// Parsed plan metrics for one executed query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanMetrics {
    pub total_cost: f64,
    pub startup_cost: Option<f64>,
    pub estimated_rows: Option<f64>,
    pub actual_rows: Option<f64>,
    pub planning_time_ms: Option<f64>,
    pub execution_time_ms: Option<f64>,
    pub shared_hit_blocks: Option<u64>,
    pub shared_read_blocks: Option<u64>,
}

/// One executed query's outcome within a trial. A populated `error`
/// marks a recorded per-query failure; the trial continues regardless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub group: String,
    pub query_id: String,
    pub duration_ms: f64,
    pub plan: Option<PlanMetrics>,
    pub error: Option<String>,
}
