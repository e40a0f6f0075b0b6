use chrono::Utc;
use serde_json::Value;
use statlab_core::{canonical_json, Error, Experiment, Result};
use tracing::info;

/// Compares a user-edited configuration bundle against the stored
/// original and stamps the outcome onto the experiment. Comparison is
/// structural: key order, whitespace, and YAML styling differences do
/// not count as modifications.
pub struct ConfigDiffTracker;

impl ConfigDiffTracker {
    /// True when the candidate bundle differs from the original in
    /// content, not merely in formatting.
    pub fn is_modified(original_yaml: &str, candidate_yaml: &str) -> Result<bool> {
        let original = parse_yaml(original_yaml)?;
        let candidate = parse_yaml(candidate_yaml)?;
        Ok(canonical_json(&original) != canonical_json(&candidate))
    }

    /// Records the config lineage on the experiment: the stored original,
    /// the effective bundle, and the modified flag with its timestamp.
    pub fn track(
        experiment: &mut Experiment,
        config_name: &str,
        original_yaml: &str,
        effective_yaml: Option<&str>,
    ) -> Result<()> {
        experiment.config_name = Some(config_name.to_string());
        experiment.original_config_yaml = Some(original_yaml.to_string());
        match effective_yaml {
            Some(effective) => {
                experiment.config_yaml = Some(effective.to_string());
                if Self::is_modified(original_yaml, effective)? {
                    experiment.config_modified = true;
                    experiment.config_modified_at = Some(Utc::now());
                    info!(
                        target: "experiment",
                        experiment = %experiment.id,
                        config = config_name,
                        "configuration modified from stored original"
                    );
                }
            }
            None => {
                experiment.config_yaml = Some(original_yaml.to_string());
            }
        }
        Ok(())
    }
}

fn parse_yaml(raw: &str) -> Result<Value> {
    serde_yaml::from_str(raw).map_err(|e| Error::ConfigParse(e.to_string()))
}
