use include_dir::{include_dir, Dir};
use log::debug;

use crate::config::definitions::{load_definitions_from_yaml, ArtifactDefinition};
use crate::errors::{ArtifactError, ArtifactResult};
use crate::registry::DefinitionStore;

// Built-in definitions are embedded at compile time
static BUILTIN_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/config/artifacts");

/// Definitions shipped with the binary, one file per OS family.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinDefinitionStore;

impl BuiltinDefinitionStore {
    pub fn new() -> Self {
        Self
    }

    /// Names of the embedded definition files.
    pub fn files() -> Vec<String> {
        let mut names: Vec<String> = BUILTIN_DIR
            .files()
            .map(|file| file.path().display().to_string())
            .collect();
        names.sort();
        names
    }
}

impl DefinitionStore for BuiltinDefinitionStore {
    fn describe(&self) -> String {
        "builtin".to_string()
    }

    fn load(&self) -> ArtifactResult<Vec<ArtifactDefinition>> {
        let mut files: Vec<_> = BUILTIN_DIR
            .files()
            .filter(|f| f.path().extension().and_then(|e| e.to_str()) == Some("yaml"))
            .collect();
        files.sort_by(|a, b| a.path().cmp(b.path()));

        let mut definitions = Vec::new();
        for file in files {
            let origin = format!("builtin:{}", file.path().display());
            let content = file
                .contents_utf8()
                .ok_or_else(|| ArtifactError::definition(origin.clone(), "embedded file is not UTF-8"))?;
            definitions.extend(load_definitions_from_yaml(content, &origin)?);
        }
        debug!("Loaded {} built-in artifact definitions", definitions.len());
        Ok(definitions)
    }
}
