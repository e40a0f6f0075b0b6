use crate::db::SchemaOverview;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// One raw per-column estimate from an external estimator, before
/// validation and clamping. Missing table qualification or out-of-range
/// values are the validator's problem, not the transport's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnEstimate {
    #[serde(default = "default_schema")]
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

fn default_schema() -> String {
    "public".to_string()
}

/// External estimation capability (AI-backed in practice). Consumed only
/// by the estimated-statistics strategy; transient failures surface as
/// `Error::Estimator` and are retried by that strategy's bounded policy.
pub trait Estimator: Send + Sync {
    fn estimate(&self, schema: &SchemaOverview) -> Result<Vec<ColumnEstimate>>;
}
