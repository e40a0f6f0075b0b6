use crate::configs::ConfigStore;
use crate::{EmptyStats, EstimatedStats, NativeAnalyze, RandomStats, StatsSource};
use statlab_core::{Error, Estimator, Result, StatsSourceConfig};
use std::sync::Arc;

/// Static strategy registry. Registration happens once at startup; the
/// registry is read-only afterwards and safely shared across experiments.
pub struct Registry {
    configs: ConfigStore,
    sources: Vec<Arc<dyn StatsSource>>,
}

impl Registry {
    /// All built-in strategies. The estimated strategy builds its HTTP
    /// client from bundle data at apply time, so it is always selectable.
    pub fn with_defaults(configs: ConfigStore) -> Self {
        let mut registry = Self {
            configs: configs.clone(),
            sources: Vec::new(),
        };
        registry.register(Arc::new(NativeAnalyze::new(configs.clone())));
        registry.register(Arc::new(EmptyStats::new(configs.clone())));
        registry.register(Arc::new(RandomStats::new(configs.clone())));
        registry.register(Arc::new(EstimatedStats::new(configs)));
        registry
    }

    /// Like `with_defaults`, but the estimated strategy uses the supplied
    /// estimator instead of an HTTP client.
    pub fn with_estimator(configs: ConfigStore, estimator: Arc<dyn Estimator>) -> Self {
        let mut registry = Self {
            configs: configs.clone(),
            sources: Vec::new(),
        };
        registry.register(Arc::new(NativeAnalyze::new(configs.clone())));
        registry.register(Arc::new(EmptyStats::new(configs.clone())));
        registry.register(Arc::new(RandomStats::new(configs.clone())));
        registry.register(Arc::new(EstimatedStats::with_estimator(configs, estimator)));
        registry
    }

    pub fn register(&mut self, source: Arc<dyn StatsSource>) {
        self.sources.push(source);
    }

    pub fn list_sources(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.identify()).collect()
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn StatsSource>> {
        self.sources
            .iter()
            .find(|s| s.identify() == name)
            .cloned()
            .ok_or_else(|| Error::UnknownSource(name.to_string()))
    }

    pub fn list_configs(&self, source: &str) -> Result<Vec<String>> {
        self.get(source)?;
        Ok(self.configs.list(source))
    }

    /// Raw bundle content, for display and for original-config tracking.
    pub fn config_content(&self, source: &str, config: &str) -> Result<String> {
        self.get(source)?;
        self.configs
            .content(source, config)
            .map_err(|e| unknown_config(e, source, config))
    }

    pub fn resolve(
        &self,
        source: &str,
        config: &str,
    ) -> Result<(Arc<dyn StatsSource>, StatsSourceConfig)> {
        let instance = self.get(source)?;
        let loaded = instance
            .load_config(config)
            .map_err(|e| unknown_config(e, source, config))?;
        Ok((instance, loaded))
    }
}

/// Resolution through the registry reports unresolvable variant names as
/// `UnknownConfig`; parse failures keep their own identity.
fn unknown_config(err: Error, source: &str, config: &str) -> Error {
    match err {
        Error::ConfigNotFound(_) => Error::UnknownConfig {
            source_name: source.to_string(),
            config: config.to_string(),
        },
        other => other,
    }
}
