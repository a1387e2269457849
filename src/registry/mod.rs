//! Catalog of artifact definitions.
//!
//! The registry is constructed once and shared by reference. Readers take an
//! `Arc` snapshot of the definition map; `reload` and `register_definition`
//! build a new map and swap it in under the write lock, so in-flight
//! sessions keep the snapshot they started with.

mod dependencies;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{
    dump_definitions_to_yaml, load_definitions_from_file, ArtifactDefinition, BuiltinDefinitionStore, EngineConfig,
};
use crate::errors::{ArtifactError, ArtifactResult};

use dependencies::DefinitionMap;

/// A backing store definitions are (re)loaded from.
pub trait DefinitionStore: Send + Sync {
    /// Human readable origin, used in logs.
    fn describe(&self) -> String;

    fn load(&self) -> ArtifactResult<Vec<ArtifactDefinition>>;
}

/// YAML files, or directories searched recursively for `*.yaml`/`*.yml`.
#[derive(Debug, Clone)]
pub struct YamlDefinitionStore {
    paths: Vec<PathBuf>,
}

impl YamlDefinitionStore {
    pub fn new<P: Into<PathBuf>>(paths: impl IntoIterator<Item = P>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    fn is_yaml(path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        )
    }
}

impl DefinitionStore for YamlDefinitionStore {
    fn describe(&self) -> String {
        let paths: Vec<String> = self.paths.iter().map(|p| p.display().to_string()).collect();
        format!("yaml:{}", paths.join(","))
    }

    fn load(&self) -> ArtifactResult<Vec<ArtifactDefinition>> {
        let mut definitions = Vec::new();
        for root in &self.paths {
            if root.is_file() {
                definitions.extend(load_definitions_from_file(root)?);
                continue;
            }
            if !root.exists() {
                return Err(ArtifactError::definition(
                    root.display().to_string(),
                    "definition path does not exist",
                ));
            }

            let mut files: Vec<PathBuf> = WalkDir::new(root)
                .follow_links(false)
                .into_iter()
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!("Skipping unreadable definition entry: {}", e);
                        None
                    }
                })
                .filter(|entry| entry.file_type().is_file() && Self::is_yaml(entry.path()))
                .map(|entry| entry.into_path())
                .collect();
            files.sort();

            for file in files {
                definitions.extend(load_definitions_from_file(&file)?);
            }
        }
        Ok(definitions)
    }
}

/// Definitions held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticDefinitionStore {
    definitions: Vec<ArtifactDefinition>,
}

impl StaticDefinitionStore {
    pub fn new(definitions: Vec<ArtifactDefinition>) -> Self {
        Self { definitions }
    }
}

impl DefinitionStore for StaticDefinitionStore {
    fn describe(&self) -> String {
        format!("static:{} definitions", self.definitions.len())
    }

    fn load(&self) -> ArtifactResult<Vec<ArtifactDefinition>> {
        Ok(self.definitions.clone())
    }
}

/// Criteria for `get_artifact_names`. Unset fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct ArtifactFilter {
    pub os_name: Option<String>,
    pub name_list: Option<Vec<String>>,
    /// Keep only artifacts with no attribute dependencies.
    pub exclude_dependents: bool,
    /// Keep only artifacts providing any of these attributes.
    pub provides: Vec<String>,
    /// Keep only artifacts carrying any of these labels.
    pub labels: Vec<String>,
}

impl ArtifactFilter {
    pub fn for_os(os: impl Into<String>) -> Self {
        Self {
            os_name: Some(os.into()),
            ..Default::default()
        }
    }
}

pub struct ArtifactRegistry {
    stores: Vec<Box<dyn DefinitionStore>>,
    /// Definitions added at runtime; survive reloads.
    registered: RwLock<Vec<ArtifactDefinition>>,
    definitions: RwLock<Arc<DefinitionMap>>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self {
            stores: Vec::new(),
            registered: RwLock::new(Vec::new()),
            definitions: RwLock::new(Arc::new(DefinitionMap::new())),
        }
    }

    /// Add a backing store. Nothing is loaded until `reload`.
    pub fn with_store(mut self, store: impl DefinitionStore + 'static) -> Self {
        self.stores.push(Box::new(store));
        self
    }

    /// Registry over a fixed set of definitions, validated and loaded.
    pub fn from_definitions(definitions: Vec<ArtifactDefinition>) -> ArtifactResult<Self> {
        let registry = Self::new().with_store(StaticDefinitionStore::new(definitions));
        registry.reload()?;
        Ok(registry)
    }

    /// Registry over the built-in definitions and the configured paths.
    pub fn from_config(config: &EngineConfig) -> ArtifactResult<Self> {
        let mut registry = Self::new();
        if config.use_builtin_definitions {
            registry = registry.with_store(BuiltinDefinitionStore::new());
        }
        if !config.definition_paths.is_empty() {
            registry = registry.with_store(YamlDefinitionStore::new(config.definition_paths.clone()));
        }
        registry.reload()?;
        Ok(registry)
    }

    /// Reload every store, validate the union and swap it in. The previous
    /// definitions stay in place if validation fails.
    pub fn reload(&self) -> ArtifactResult<usize> {
        let mut loaded = Vec::new();
        for store in &self.stores {
            let definitions = store.load()?;
            debug!("Loaded {} definitions from {}", definitions.len(), store.describe());
            loaded.extend(definitions);
        }
        loaded.extend(self.registered.read().unwrap_or_else(|e| e.into_inner()).iter().cloned());

        let map = build_definition_map(loaded)?;
        let count = map.len();
        *self.definitions.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(map);
        info!("Artifact registry holds {} definitions", count);
        Ok(count)
    }

    /// Add one definition at runtime.
    pub fn register_definition(&self, definition: ArtifactDefinition) -> ArtifactResult<()> {
        let mut guard = self.definitions.write().unwrap_or_else(|e| e.into_inner());
        if guard.contains_key(&definition.name) {
            return Err(ArtifactError::definition(
                definition.name,
                "artifact is already registered",
            ));
        }
        let mut definitions: Vec<ArtifactDefinition> = guard.values().map(|d| d.as_ref().clone()).collect();
        definitions.push(definition.clone());
        *guard = Arc::new(build_definition_map(definitions)?);
        self.registered
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(definition);
        Ok(())
    }

    /// Current definition map. Cheap; later reloads do not affect it.
    pub(crate) fn snapshot(&self) -> Arc<DefinitionMap> {
        self.definitions.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Look up a definition, reloading the backing stores once on a miss.
    pub fn get_artifact(&self, name: &str) -> ArtifactResult<Arc<ArtifactDefinition>> {
        if let Some(definition) = self.snapshot().get(name) {
            return Ok(definition.clone());
        }
        if !self.stores.is_empty() {
            debug!("Artifact {} not found, reloading registry", name);
            if let Err(e) = self.reload() {
                warn!("Registry reload failed: {}", e);
            }
        }
        self.snapshot()
            .get(name)
            .cloned()
            .ok_or_else(|| ArtifactError::NotRegistered(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.snapshot().keys().cloned().collect()
    }

    pub fn get_artifact_names(&self, filter: &ArtifactFilter) -> ArtifactResult<BTreeSet<String>> {
        let map = self.snapshot();
        let candidates: Vec<&Arc<ArtifactDefinition>> = match &filter.name_list {
            Some(names) => names
                .iter()
                .map(|name| {
                    map.get(name)
                        .ok_or_else(|| ArtifactError::NotRegistered(name.clone()))
                })
                .collect::<ArtifactResult<_>>()?,
            None => map.values().collect(),
        };

        let mut names = BTreeSet::new();
        for definition in candidates {
            if let Some(os) = &filter.os_name {
                if !definition.supports_os(os) {
                    continue;
                }
            }
            if !filter.provides.is_empty()
                && !filter.provides.iter().any(|attr| definition.provides_attribute(attr))
            {
                continue;
            }
            if !filter.labels.is_empty() && !filter.labels.iter().any(|l| definition.labels.contains(l)) {
                continue;
            }
            if filter.exclude_dependents && !dependencies::path_dependencies(&map, &definition.name)?.is_empty() {
                continue;
            }
            names.insert(definition.name.clone());
        }
        Ok(names)
    }

    /// Artifacts providing `attribute`, restricted to `os` when given.
    pub fn providers_of(&self, attribute: &str, os: Option<&str>) -> Vec<String> {
        dependencies::providers(&self.snapshot(), attribute, os)
    }

    /// Attributes `name` needs before it can be collected.
    pub fn artifact_dependencies(&self, name: &str) -> ArtifactResult<BTreeSet<String>> {
        dependencies::path_dependencies(&self.snapshot(), name)
    }

    /// Transitive closure of artifacts and attributes needed for `names`.
    pub fn search_dependencies(
        &self,
        os: &str,
        names: &[String],
    ) -> ArtifactResult<(BTreeSet<String>, BTreeSet<String>)> {
        self.search_unresolved_dependencies(os, names, |_| false)
    }

    /// Like `search_dependencies`, but attributes for which `is_known` holds
    /// are treated as already provided: their providers are only included
    /// when named in `names`.
    pub fn search_unresolved_dependencies(
        &self,
        os: &str,
        names: &[String],
        is_known: impl Fn(&str) -> bool,
    ) -> ArtifactResult<(BTreeSet<String>, BTreeSet<String>)> {
        let map = self.snapshot();
        for name in names {
            if !map.contains_key(name) {
                // Triggers the reload-once path for unknown names
                self.get_artifact(name)?;
                return dependencies::search_dependencies(&self.snapshot(), os, names, &is_known);
            }
        }
        dependencies::search_dependencies(&map, os, names, &is_known)
    }

    /// All definitions as YAML documents in name order.
    pub fn dump_yaml(&self) -> ArtifactResult<String> {
        let definitions: Vec<ArtifactDefinition> =
            self.snapshot().values().map(|d| d.as_ref().clone()).collect();
        dump_definitions_to_yaml(&definitions)
    }
}

impl Default for ArtifactRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a full definition set and index it by name.
fn build_definition_map(definitions: Vec<ArtifactDefinition>) -> ArtifactResult<DefinitionMap> {
    let mut map = DefinitionMap::new();
    for definition in definitions {
        definition.validate()?;
        if map.contains_key(&definition.name) {
            return Err(ArtifactError::definition(
                definition.name,
                "duplicate artifact name",
            ));
        }
        map.insert(definition.name.clone(), Arc::new(definition));
    }

    for definition in map.values() {
        for member in definition.referenced_artifacts() {
            if !map.contains_key(&member) {
                return Err(ArtifactError::definition(
                    definition.name.clone(),
                    format!("references unknown artifact {}", member),
                ));
            }
        }
    }

    if let Some(cycle) = dependencies::find_group_cycle(&map) {
        let first = cycle.first().cloned().unwrap_or_default();
        return Err(ArtifactError::definition(
            first,
            format!("artifact group cycle: {}", cycle.join(" -> ")),
        ));
    }

    Ok(map)
}
