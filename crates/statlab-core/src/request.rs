use crate::error::{Error, Result};
use crate::model::{StatsResetStrategy, TransactionHandling};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySpec {
    pub id: String,
    pub sql: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryGroup {
    pub name: String,
    pub queries: Vec<QuerySpec>,
}

/// One requested strategy variant. `config_yaml`, when present, is a
/// user-edited bundle that replaces the stored variant content for this
/// run; the runner diffs it against the original and records the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSelection {
    pub source: String,
    #[serde(default = "default_config_name")]
    pub config: String,
    #[serde(default)]
    pub config_yaml: Option<String>,
}

fn default_config_name() -> String {
    "default".to_string()
}

/// A validated experiment request, as handed over by the hosting service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentRequest {
    pub name: String,
    pub sources: Vec<SourceSelection>,
    #[serde(default = "default_trial_count")]
    pub trial_count: u32,
    pub query_groups: Vec<QueryGroup>,
    #[serde(default)]
    pub stats_reset_strategy: StatsResetStrategy,
    #[serde(default)]
    pub transaction_handling: TransactionHandling,
}

fn default_trial_count() -> u32 {
    1
}

impl ExperimentRequest {
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| Error::Validation(e.to_string()))
    }

    /// Precondition the runner enforces before entering RUNNING: at least
    /// one strategy variant and one non-empty query workload.
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(Error::Validation(
                "at least one stats source must be selected".to_string(),
            ));
        }
        if self.trial_count == 0 {
            return Err(Error::Validation("trial_count must be positive".to_string()));
        }
        if self.query_groups.is_empty() || self.query_groups.iter().all(|g| g.queries.is_empty()) {
            return Err(Error::Validation(
                "at least one non-empty query group is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn total_queries(&self) -> usize {
        self.query_groups.iter().map(|g| g.queries.len()).sum()
    }
}
