use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Runtime knobs shared by every strategy. Defaults mirror the shipped
/// `default.yaml` bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub analyze_verbose: bool,
    pub analyze_timeout_seconds: u64,
    pub clear_caches: bool,
    pub reset_counters: bool,
    pub work_mem: String,
    pub maintenance_work_mem: String,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            analyze_verbose: true,
            analyze_timeout_seconds: 300,
            clear_caches: true,
            reset_counters: true,
            work_mem: "16MB".to_string(),
            maintenance_work_mem: "16MB".to_string(),
        }
    }
}

/// A named configuration bundle for one strategy variant. Immutable once
/// loaded; a user-edited copy is parsed into a distinct value and compared
/// against the original by the diff tracker, never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSourceConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub settings: RunSettings,
    /// Strategy-specific payload (estimator endpoint, random ranges, ...),
    /// kept opaque here and interpreted by `apply_statistics`.
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
}

impl StatsSourceConfig {
    /// Parses a YAML bundle. The schema requires `name` and `settings`;
    /// anything else malformed is a `ConfigParse` error.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let value: serde_yaml::Value =
            serde_yaml::from_str(raw).map_err(|e| Error::ConfigParse(e.to_string()))?;
        let mapping = value
            .as_mapping()
            .ok_or_else(|| Error::ConfigParse("bundle is not a mapping".to_string()))?;
        if !mapping.contains_key(serde_yaml::Value::from("name")) {
            return Err(Error::ConfigParse("missing required field: name".to_string()));
        }
        if !mapping.contains_key(serde_yaml::Value::from("settings")) {
            return Err(Error::ConfigParse(
                "missing required field: settings".to_string(),
            ));
        }
        serde_yaml::from_value(value).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    pub fn data_u64(&self, key: &str) -> Option<u64> {
        self.data.get(key).and_then(|v| v.as_u64())
    }

    pub fn data_f64(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(|v| v.as_f64())
    }

    pub fn data_bool(&self, key: &str) -> Option<bool> {
        self.data.get(key).and_then(|v| v.as_bool())
    }

    /// Structured form used for normalized comparison and digesting.
    pub fn normalized(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
