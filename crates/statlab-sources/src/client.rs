use serde_json::{json, Value};
use statlab_core::{ColumnEstimate, Error, Estimator, Result, SchemaOverview, StatsSourceConfig};
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;

/// Blocking HTTP client for the external estimation service. One request
/// per apply attempt; the bounded-retry policy lives in the strategy, not
/// here.
#[derive(Debug)]
pub struct HttpEstimator {
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f64,
    session_id: String,
    client: reqwest::blocking::Client,
}

impl HttpEstimator {
    pub fn from_config(config: &StatsSourceConfig) -> Result<Self> {
        let endpoint = config
            .data_str("api_endpoint")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Estimator("api_endpoint not configured".to_string()))?
            .to_string();
        let timeout = Duration::from_secs(
            config
                .data_u64("request_timeout_seconds")
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECONDS),
        );
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Estimator(e.to_string()))?;
        Ok(Self {
            endpoint,
            api_key: config.data_str("api_key").unwrap_or_default().to_string(),
            model: config
                .data_str("model")
                .unwrap_or("claude-3-haiku")
                .to_string(),
            temperature: config.data_f64("temperature").unwrap_or(0.3),
            session_id: config
                .data_str("session_id")
                .unwrap_or("statlab_estimation")
                .to_string(),
            client,
        })
    }

    fn request_payload(&self, schema: &SchemaOverview) -> Value {
        json!({
            "model": self.model,
            "temperature": self.temperature,
            "session_id": self.session_id,
            "schema": schema,
        })
    }
}

impl Estimator for HttpEstimator {
    fn estimate(&self, schema: &SchemaOverview) -> Result<Vec<ColumnEstimate>> {
        info!(
            target: "stats_source",
            endpoint = %self.endpoint,
            tables = schema.tables.len(),
            "requesting statistics estimation"
        );
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .json(&self.request_payload(schema))
            .send()
            .map_err(|e| Error::Estimator(format!("request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Estimator(format!(
                "estimation service returned {status}"
            )));
        }
        let body: Value = response
            .json()
            .map_err(|e| Error::Estimator(format!("invalid response body: {e}")))?;
        let estimates = body
            .pointer("/estimates")
            .cloned()
            .ok_or_else(|| Error::Estimator("response missing /estimates".to_string()))?;
        let parsed: Vec<ColumnEstimate> = serde_json::from_value(estimates)
            .map_err(|e| Error::Estimator(format!("malformed estimate rows: {e}")))?;
        debug!(target: "stats_source", rows = parsed.len(), "estimation response parsed");
        Ok(parsed)
    }
}
