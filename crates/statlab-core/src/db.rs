use crate::error::Result;
use crate::model::ColumnStats;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which catalog rows a snapshot should cover. The default skips the
/// system schemas, matching what the planner-visible workload touches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotScope {
    pub excluded_schemas: Vec<String>,
}

impl Default for SnapshotScope {
    fn default() -> Self {
        Self {
            excluded_schemas: vec!["pg_catalog".to_string(), "information_schema".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
    pub row_count: u64,
    pub columns: Vec<ColumnInfo>,
}

/// Structural description of the restored database, as captured from the
/// actual instance. Estimates referencing anything absent here are
/// discarded during validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaOverview {
    pub tables: Vec<TableInfo>,
    pub database_size_bytes: u64,
}

impl SchemaOverview {
    pub fn table(&self, schema: &str, name: &str) -> Option<&TableInfo> {
        self.tables
            .iter()
            .find(|t| t.schema == schema && t.name == name)
    }

    pub fn has_column(&self, schema: &str, table: &str, column: &str) -> bool {
        self.table(schema, table)
            .map(|t| t.columns.iter().any(|c| c.name == column))
            .unwrap_or(false)
    }
}

/// A validated per-column statistics write, produced by estimate
/// validation and consumed by the catalog-write capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStatsUpdate {
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

/// Session-scoped access to one database instance. Implementations wrap
/// whatever driver the hosting service uses; the core only needs these
/// operations. Transaction boundaries are owned by the caller: strategies
/// never commit or roll back themselves.
pub trait CatalogAccess {
    fn execute(&mut self, sql: &str) -> Result<()>;

    /// Runs the statement wrapped in `EXPLAIN (ANALYZE, BUFFERS, FORMAT
    /// JSON)` and returns the parsed plan document.
    fn explain_analyze(&mut self, sql: &str) -> Result<Value>;

    fn read_column_stats(&mut self, scope: &SnapshotScope) -> Result<Vec<ColumnStats>>;

    fn schema_overview(&mut self) -> Result<SchemaOverview>;

    fn write_column_stats(&mut self, update: &ColumnStatsUpdate) -> Result<()>;

    fn begin(&mut self) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;
}

/// Supplies a ready database instance per trial; restore-from-dump,
/// temp-instance creation, and connection pooling are collaborator-owned.
/// Callers must guarantee `release` on every exit path.
pub trait DbProvisioner: Send + Sync {
    fn acquire(&self) -> Result<Box<dyn CatalogAccess>>;
    fn release(&self, session: Box<dyn CatalogAccess>);
}
