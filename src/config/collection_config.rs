use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::artifact_types::PathType;
use crate::constants::{DEFAULT_MAX_FILE_SIZE, HEAVYWEIGHT_LABEL};

fn default_true() -> bool {
    true
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

/// Per-collection knobs exposed to callers of `collect_artifacts`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CollectionOptions {
    #[serde(default = "default_true")]
    pub apply_parsers: bool,
    #[serde(default)]
    pub ignore_interpolation_errors: bool,
    /// Fail the whole collection when a requested artifact does not complete.
    #[serde(default)]
    pub require_complete: bool,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default)]
    pub path_type: PathType,
    /// Read file-like sources through the raw filesystem parser.
    #[serde(default)]
    pub use_tsk: bool,
    /// Bootstrap only: skip heavyweight knowledge base artifacts.
    #[serde(default = "default_true")]
    pub lightweight: bool,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            apply_parsers: true,
            ignore_interpolation_errors: false,
            require_complete: false,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            path_type: PathType::Os,
            use_tsk: false,
            lightweight: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EngineConfig {
    pub version: String,
    pub description: String,
    /// Definition files or directories loaded in addition to the built-ins.
    #[serde(default)]
    pub definition_paths: Vec<PathBuf>,
    #[serde(default = "default_true")]
    pub use_builtin_definitions: bool,
    /// Explicit bootstrap list; empty means every knowledge base provider.
    #[serde(default)]
    pub knowledge_base_artifacts: Vec<String>,
    /// Artifacts skipped by a lightweight bootstrap, on top of those
    /// labelled heavyweight.
    #[serde(default)]
    pub heavyweight_artifacts: Vec<String>,
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,
    #[serde(default)]
    pub collection: CollectionOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: "1.0".into(),
            description: "Default artifact engine configuration".into(),
            definition_paths: Vec::new(),
            use_builtin_definitions: true,
            knowledge_base_artifacts: Vec::new(),
            heavyweight_artifacts: Vec::new(),
            snapshot_dir: None,
            collection: CollectionOptions::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        let config: EngineConfig = serde_yaml::from_str(&content)
            .context("Failed to parse YAML config")?;

        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save_to_yaml_file(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self)
            .context("Failed to serialize config to YAML")?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .context(format!("Failed to create directory {}", parent.display()))?;
        }
        fs::write(path, yaml)
            .context(format!("Failed to write config to {}", path.display()))?;

        info!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Whether a lightweight bootstrap should skip this artifact.
    pub fn is_heavyweight(&self, name: &str, labels: &[String]) -> bool {
        self.heavyweight_artifacts.iter().any(|a| a == name)
            || labels.iter().any(|l| l == HEAVYWEIGHT_LABEL)
    }
}

/// Load a configuration file or create a default one.
///
/// With a path, the file is loaded if it exists; otherwise defaults are
/// written there and returned. Without a path the defaults are returned.
pub fn load_or_create_config(config_path: Option<&Path>) -> Result<EngineConfig> {
    match config_path {
        Some(path) if path.exists() => EngineConfig::from_yaml_file(path),
        Some(path) => {
            info!("Creating default config at {}", path.display());
            let default_config = EngineConfig::default();
            default_config.save_to_yaml_file(path)?;
            Ok(default_config)
        }
        None => {
            debug!("No config path given, using defaults");
            Ok(EngineConfig::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_collection_options_defaults() {
        let options = CollectionOptions::default();
        assert!(options.apply_parsers);
        assert!(!options.require_complete);
        assert_eq!(options.max_file_size, 500 * 1024 * 1024);
        assert_eq!(options.path_type, PathType::Os);

        let parsed: CollectionOptions = serde_yaml::from_str("require_complete: true\n").unwrap();
        assert!(parsed.require_complete);
        assert!(parsed.apply_parsers);
        assert!(parsed.lightweight);
    }

    #[test]
    fn test_load_or_create_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("engine.yaml");

        let created = load_or_create_config(Some(&path)).unwrap();
        assert!(path.exists());
        assert_eq!(created, EngineConfig::default());

        let mut modified = created.clone();
        modified.heavyweight_artifacts.push("LinuxHomeDirectories".to_string());
        modified.collection.use_tsk = true;
        modified.save_to_yaml_file(&path).unwrap();

        let loaded = load_or_create_config(Some(&path)).unwrap();
        assert_eq!(loaded, modified);
        assert_eq!(load_or_create_config(None).unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.yaml");
        fs::write(&path, "version: [").unwrap();
        assert!(load_or_create_config(Some(&path)).is_err());
    }

    #[test]
    fn test_is_heavyweight() {
        let mut config = EngineConfig::default();
        config.heavyweight_artifacts.push("Big".to_string());
        assert!(config.is_heavyweight("Big", &[]));
        assert!(config.is_heavyweight("Other", &["Heavyweight".to_string()]));
        assert!(!config.is_heavyweight("Other", &[]));
    }
}
