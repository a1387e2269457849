use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

/// Source type tag of an artifact source, as written in definition files.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceKind {
    Command,
    File,
    Directory,
    Grep,
    RegistryKey,
    RegistryValue,
    Wmi,
    RekallPlugin,
    ArtifactGroup,
    ArtifactFiles,
    GrrClientAction,
    Path,
}

impl SourceKind {
    /// Sources that read the filesystem and honour the requested path type.
    pub fn is_file_like(&self) -> bool {
        matches!(
            self,
            SourceKind::File | SourceKind::Directory | SourceKind::Grep | SourceKind::Path
        )
    }

    pub fn is_registry(&self) -> bool {
        matches!(self, SourceKind::RegistryKey | SourceKind::RegistryValue)
    }

    /// Sources that reference other artifacts by name.
    pub fn is_group(&self) -> bool {
        matches!(self, SourceKind::ArtifactGroup | SourceKind::ArtifactFiles)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            SourceKind::Command => "COMMAND",
            SourceKind::File => "FILE",
            SourceKind::Directory => "DIRECTORY",
            SourceKind::Grep => "GREP",
            SourceKind::RegistryKey => "REGISTRY_KEY",
            SourceKind::RegistryValue => "REGISTRY_VALUE",
            SourceKind::Wmi => "WMI",
            SourceKind::RekallPlugin => "REKALL_PLUGIN",
            SourceKind::ArtifactGroup => "ARTIFACT_GROUP",
            SourceKind::ArtifactFiles => "ARTIFACT_FILES",
            SourceKind::GrrClientAction => "GRR_CLIENT_ACTION",
            SourceKind::Path => "PATH",
        };
        write!(f, "{}", tag)
    }
}

/// How the client should access paths for file-like sources.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PathType {
    #[default]
    #[serde(rename = "OS")]
    Os,
    #[serde(rename = "TSK")]
    Tsk,
    #[serde(rename = "REGISTRY")]
    Registry,
}

impl fmt::Display for PathType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathType::Os => write!(f, "OS"),
            PathType::Tsk => write!(f, "TSK"),
            PathType::Registry => write!(f, "REGISTRY"),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PathsAttributes {
    pub paths: Vec<String>,
    #[serde(default)]
    pub separator: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct GrepAttributes {
    pub paths: Vec<String>,
    pub content_regex_list: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CommandAttributes {
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RegistryKeyAttributes {
    pub keys: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct KeyValuePair {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RegistryValueAttributes {
    pub key_value_pairs: Vec<KeyValuePair>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct WmiAttributes {
    pub query: String,
    #[serde(default)]
    pub base_object: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RekallPluginAttributes {
    pub plugin: String,
    #[serde(default)]
    pub args: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct GroupAttributes {
    pub names: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ArtifactFilesAttributes {
    pub artifact_list: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ClientActionAttributes {
    pub client_action: String,
    #[serde(default)]
    pub action_args: BTreeMap<String, Value>,
}

/// Typed view of a source's attribute map, one variant per source kind.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSpec {
    Command(CommandAttributes),
    File(PathsAttributes),
    Directory(PathsAttributes),
    Path(PathsAttributes),
    Grep(GrepAttributes),
    RegistryKey(RegistryKeyAttributes),
    RegistryValue(RegistryValueAttributes),
    Wmi(WmiAttributes),
    RekallPlugin(RekallPluginAttributes),
    ArtifactGroup(GroupAttributes),
    ArtifactFiles(ArtifactFilesAttributes),
    ClientAction(ClientActionAttributes),
}

fn decode<T: serde::de::DeserializeOwned>(kind: SourceKind, attributes: &Mapping) -> Result<T, String> {
    serde_yaml::from_value(Value::Mapping(attributes.clone()))
        .map_err(|e| format!("invalid {} attributes: {}", kind, e))
}

fn require_non_empty<T>(kind: SourceKind, field: &str, items: &[T]) -> Result<(), String> {
    if items.is_empty() {
        return Err(format!("{} source requires a non-empty {} list", kind, field));
    }
    Ok(())
}

impl SourceSpec {
    /// Decode and check the attribute map for the given source kind.
    pub fn decode(kind: SourceKind, attributes: &Mapping) -> Result<Self, String> {
        let spec = match kind {
            SourceKind::Command => {
                let attrs: CommandAttributes = decode(kind, attributes)?;
                if attrs.cmd.trim().is_empty() {
                    return Err("COMMAND source requires a non-empty cmd".to_string());
                }
                SourceSpec::Command(attrs)
            }
            SourceKind::File | SourceKind::Directory | SourceKind::Path => {
                let attrs: PathsAttributes = decode(kind, attributes)?;
                require_non_empty(kind, "paths", &attrs.paths)?;
                match kind {
                    SourceKind::File => SourceSpec::File(attrs),
                    SourceKind::Directory => SourceSpec::Directory(attrs),
                    _ => SourceSpec::Path(attrs),
                }
            }
            SourceKind::Grep => {
                let attrs: GrepAttributes = decode(kind, attributes)?;
                require_non_empty(kind, "paths", &attrs.paths)?;
                require_non_empty(kind, "content_regex_list", &attrs.content_regex_list)?;
                SourceSpec::Grep(attrs)
            }
            SourceKind::RegistryKey => {
                let attrs: RegistryKeyAttributes = decode(kind, attributes)?;
                require_non_empty(kind, "keys", &attrs.keys)?;
                SourceSpec::RegistryKey(attrs)
            }
            SourceKind::RegistryValue => {
                let attrs: RegistryValueAttributes = decode(kind, attributes)?;
                require_non_empty(kind, "key_value_pairs", &attrs.key_value_pairs)?;
                SourceSpec::RegistryValue(attrs)
            }
            SourceKind::Wmi => {
                let attrs: WmiAttributes = decode(kind, attributes)?;
                if attrs.query.trim().is_empty() {
                    return Err("WMI source requires a non-empty query".to_string());
                }
                SourceSpec::Wmi(attrs)
            }
            SourceKind::RekallPlugin => SourceSpec::RekallPlugin(decode(kind, attributes)?),
            SourceKind::ArtifactGroup => {
                let attrs: GroupAttributes = decode(kind, attributes)?;
                require_non_empty(kind, "names", &attrs.names)?;
                SourceSpec::ArtifactGroup(attrs)
            }
            SourceKind::ArtifactFiles => {
                let attrs: ArtifactFilesAttributes = decode(kind, attributes)?;
                require_non_empty(kind, "artifact_list", &attrs.artifact_list)?;
                SourceSpec::ArtifactFiles(attrs)
            }
            SourceKind::GrrClientAction => SourceSpec::ClientAction(decode(kind, attributes)?),
        };
        Ok(spec)
    }

    /// Names of artifacts referenced by group-like sources.
    pub fn referenced_artifacts(&self) -> &[String] {
        match self {
            SourceSpec::ArtifactGroup(attrs) => &attrs.names,
            SourceSpec::ArtifactFiles(attrs) => &attrs.artifact_list,
            _ => &[],
        }
    }
}

/// Render a YAML scalar as the string a client action or plugin expects.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}
