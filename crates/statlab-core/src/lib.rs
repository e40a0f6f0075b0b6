pub mod config;
pub mod db;
pub mod error;
pub mod estimator;
pub mod model;
pub mod request;
pub mod store;
pub mod util;

pub use config::{RunSettings, StatsSourceConfig};
pub use db::{
    CatalogAccess, ColumnInfo, ColumnStatsUpdate, DbProvisioner, SchemaOverview, SnapshotScope,
    TableInfo,
};
pub use error::{Error, Result};
pub use estimator::{ColumnEstimate, Estimator};
pub use model::{
    ColumnStats, Experiment, ExperimentStatus, PlanMetrics, QueryResult, Snapshot, SnapshotPhase,
    StatsResetStrategy, TransactionHandling, Trial, TrialPhase, TrialRecord, TrialStatus,
};
pub use request::{ExperimentRequest, QueryGroup, QuerySpec, SourceSelection};
pub use store::{ExperimentStore, MemoryStore};
pub use util::{canonical_json, canonical_json_digest};
