use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::artifacts::conditions::parse_condition;
use crate::artifacts::interpolation::placeholders;
use crate::config::artifact_types::{SourceKind, SourceSpec};
use crate::constants::SUPPORTED_OS;
use crate::errors::{ArtifactError, ArtifactResult};

/// One collection mechanism of an artifact.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ArtifactSource {
    #[serde(rename = "type")]
    pub kind: SourceKind,
    #[serde(default, skip_serializing_if = "Mapping::is_empty")]
    pub attributes: Mapping,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_os: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub returned_types: Vec<String>,
}

impl ArtifactSource {
    pub fn new(kind: SourceKind, attributes: Mapping) -> Self {
        Self {
            kind,
            attributes,
            conditions: Vec::new(),
            supported_os: Vec::new(),
            returned_types: Vec::new(),
        }
    }

    /// Decode the typed attribute view for this source's kind.
    pub fn spec(&self) -> Result<SourceSpec, String> {
        SourceSpec::decode(self.kind, &self.attributes)
    }

    pub fn supports_os(&self, os: &str) -> bool {
        self.supported_os.is_empty() || self.supported_os.iter().any(|o| o == os)
    }

    /// Every string value found anywhere in the attribute map.
    pub fn string_values(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (_, value) in self.attributes.iter() {
            collect_strings(value, &mut out);
        }
        out
    }
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Sequence(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Mapping(map) => map.iter().for_each(|(_, v)| collect_strings(v, out)),
        Value::Tagged(tagged) => collect_strings(&tagged.value, out),
        _ => {}
    }
}

/// Declarative recipe for collecting one kind of information from a host.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ArtifactDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub doc: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<ArtifactSource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provides: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_os: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
}

impl ArtifactDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            doc: String::new(),
            sources: Vec::new(),
            conditions: Vec::new(),
            provides: Vec::new(),
            supported_os: Vec::new(),
            labels: Vec::new(),
            urls: Vec::new(),
        }
    }

    /// An empty `supported_os` list means every OS.
    pub fn supports_os(&self, os: &str) -> bool {
        self.supported_os.is_empty() || self.supported_os.iter().any(|o| o == os)
    }

    /// Whether this artifact can supply the (possibly dotted) attribute.
    ///
    /// Providing `users` covers `users.homedir`; providing `users.homedir`
    /// does not cover `users.sid`.
    pub fn provides_attribute(&self, attribute: &str) -> bool {
        self.provides.iter().any(|provided| {
            provided == attribute
                || attribute
                    .strip_prefix(provided.as_str())
                    .map_or(false, |rest| rest.starts_with('.'))
        })
    }

    /// Artifacts named by ARTIFACT_GROUP and ARTIFACT_FILES sources.
    pub fn referenced_artifacts(&self) -> Vec<String> {
        let mut names = Vec::new();
        for source in self.sources.iter().filter(|s| s.kind.is_group()) {
            if let Ok(spec) = source.spec() {
                names.extend(spec.referenced_artifacts().iter().cloned());
            }
        }
        names
    }

    /// Attributes referenced by `%%attr%%` placeholders in this artifact's
    /// own sources and conditions. Group members are not included.
    pub fn placeholder_attributes(&self) -> BTreeSet<String> {
        let mut attributes = BTreeSet::new();
        for condition in &self.conditions {
            attributes.extend(placeholders(condition));
        }
        for source in &self.sources {
            for template in source.string_values() {
                attributes.extend(placeholders(&template));
            }
            for condition in &source.conditions {
                attributes.extend(placeholders(condition));
            }
        }
        attributes
    }

    /// Self-contained checks. Cross-artifact references are checked by the
    /// registry.
    pub fn validate(&self) -> ArtifactResult<()> {
        let err = |reason: String| ArtifactError::definition(self.name.clone(), reason);

        if self.name.is_empty() || !self.name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(err(format!("invalid artifact name {:?}", self.name)));
        }

        for os in self.supported_os.iter().chain(self.sources.iter().flat_map(|s| s.supported_os.iter())) {
            if !SUPPORTED_OS.contains(&os.as_str()) {
                return Err(err(format!("unknown supported_os value {:?}", os)));
            }
        }

        for provided in &self.provides {
            let valid = !provided.is_empty()
                && provided
                    .split('.')
                    .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
            if !valid {
                return Err(err(format!("invalid provides entry {:?}", provided)));
            }
        }

        let all_conditions = self
            .conditions
            .iter()
            .chain(self.sources.iter().flat_map(|s| s.conditions.iter()));
        for condition in all_conditions {
            parse_condition(condition).map_err(|e| err(e.to_string()))?;
        }

        for (index, source) in self.sources.iter().enumerate() {
            source
                .spec()
                .map_err(|reason| err(format!("source {}: {}", index, reason)))?;
        }

        Ok(())
    }
}

/// Parse one or more `---` separated YAML documents into definitions.
pub fn load_definitions_from_yaml(content: &str, origin: &str) -> ArtifactResult<Vec<ArtifactDefinition>> {
    let mut definitions = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = Value::deserialize(document)
            .map_err(|e| ArtifactError::definition(origin, format!("invalid YAML: {}", e)))?;
        if value.is_null() {
            continue;
        }
        let definition: ArtifactDefinition = serde_yaml::from_value(value)
            .map_err(|e| ArtifactError::definition(origin, format!("invalid artifact: {}", e)))?;
        definitions.push(definition);
    }
    debug!("Parsed {} artifact definitions from {}", definitions.len(), origin);
    Ok(definitions)
}

/// Read a definition file from disk.
pub fn load_definitions_from_file(path: &Path) -> ArtifactResult<Vec<ArtifactDefinition>> {
    let origin = path.display().to_string();
    let content = fs::read_to_string(path)
        .map_err(|e| ArtifactError::definition(origin.clone(), format!("failed to read: {}", e)))?;
    load_definitions_from_yaml(&content, &origin)
}

/// Serialize definitions as `---` separated YAML documents.
pub fn dump_definitions_to_yaml(definitions: &[ArtifactDefinition]) -> ArtifactResult<String> {
    let mut documents = Vec::with_capacity(definitions.len());
    for definition in definitions {
        let yaml = serde_yaml::to_string(definition)
            .map_err(|e| ArtifactError::definition(definition.name.clone(), format!("failed to serialize: {}", e)))?;
        documents.push(yaml);
    }
    Ok(documents.join("---\n"))
}
