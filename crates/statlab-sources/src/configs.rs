use include_dir::{include_dir, Dir};
use statlab_core::{Error, Result, StatsSourceConfig};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

static EMBEDDED_CONFIGS: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/configs");

/// Loads named configuration bundles for strategies. A bundle lives at
/// `<root>/<source>/<variant>.yaml`; when no root is configured or the
/// file is absent, the bundles compiled into the binary are used. Bundles
/// are treated as immutable: edits always flow through the diff tracker
/// as separate candidate content.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    root: Option<PathBuf>,
}

impl ConfigStore {
    /// Embedded defaults only.
    pub fn embedded() -> Self {
        Self { root: None }
    }

    /// Prefer bundles under `root`, falling back to embedded defaults.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    /// Raw YAML content of a bundle, exactly as stored. This is what the
    /// diff tracker compares user edits against.
    pub fn content(&self, source: &str, variant: &str) -> Result<String> {
        let rel = format!("{source}/{variant}.yaml");
        if let Some(root) = self.root.as_ref() {
            let path = root.join(&rel);
            if path.exists() {
                return fs::read_to_string(&path)
                    .map_err(|e| Error::ConfigParse(format!("{}: {e}", path.display())));
            }
        }
        EMBEDDED_CONFIGS
            .get_file(&rel)
            .and_then(|f| f.contents_utf8())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::ConfigNotFound(rel))
    }

    pub fn load(&self, source: &str, variant: &str) -> Result<StatsSourceConfig> {
        let raw = self.content(source, variant)?;
        StatsSourceConfig::from_yaml_str(&raw)
    }

    /// Variant names available for one source, sorted and deduplicated
    /// across the on-disk root and the embedded defaults.
    pub fn list(&self, source: &str) -> Vec<String> {
        let mut names = BTreeSet::new();
        if let Some(dir) = EMBEDDED_CONFIGS.get_dir(source) {
            for file in dir.files() {
                if let Some(stem) = yaml_stem(file.path().file_name().and_then(|n| n.to_str())) {
                    names.insert(stem);
                }
            }
        }
        if let Some(root) = self.root.as_ref() {
            if let Ok(entries) = fs::read_dir(root.join(source)) {
                for entry in entries.flatten() {
                    if let Some(stem) = yaml_stem(entry.file_name().to_str()) {
                        names.insert(stem);
                    }
                }
            }
        }
        names.into_iter().collect()
    }
}

fn yaml_stem(file_name: Option<&str>) -> Option<String> {
    file_name
        .and_then(|n| n.strip_suffix(".yaml"))
        .map(|s| s.to_string())
}
