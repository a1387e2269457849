use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::knowledge_base::{AttributeValue, User};

/// Filesystem metadata returned for a globbed or stat'ed path.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatEntry {
    pub path: String,
    pub size: u64,
    pub is_dir: bool,
    pub modified_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FileContent {
    pub path: String,
    pub data: String,
    pub truncated: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExecuteResponse {
    pub cmd: String,
    pub args: Vec<String>,
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
    pub time_used_ms: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RegistryEntry {
    pub key: String,
    pub value_name: Option<String>,
    pub data: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GrepMatch {
    pub path: String,
    pub line_number: u64,
    pub line: String,
}

/// Raw data returned by a client for one collection request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", content = "data")]
pub enum ResponsePayload {
    Stat(StatEntry),
    File(FileContent),
    Command(ExecuteResponse),
    Registry(RegistryEntry),
    Grep(GrepMatch),
    Dict(BTreeMap<String, serde_json::Value>),
}

/// Payload discriminant used by parsers to declare accepted inputs.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseType {
    Stat,
    File,
    Command,
    Registry,
    Grep,
    Dict,
}

impl ResponsePayload {
    pub fn response_type(&self) -> ResponseType {
        match self {
            ResponsePayload::Stat(_) => ResponseType::Stat,
            ResponsePayload::File(_) => ResponseType::File,
            ResponsePayload::Command(_) => ResponseType::Command,
            ResponsePayload::Registry(_) => ResponseType::Registry,
            ResponsePayload::Grep(_) => ResponseType::Grep,
            ResponsePayload::Dict(_) => ResponseType::Dict,
        }
    }

    /// Filesystem path this payload refers to, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            ResponsePayload::Stat(stat) => Some(&stat.path),
            ResponsePayload::File(file) => Some(&file.path),
            ResponsePayload::Grep(grep) => Some(&grep.path),
            _ => None,
        }
    }
}

/// A flagged parsing or logical problem. Not an error.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Anomaly {
    pub anomaly_type: String,
    pub symptom: String,
    #[serde(default)]
    pub finding: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub generated_by: String,
}

impl Anomaly {
    pub fn parser_anomaly(generated_by: &str, symptom: impl Into<String>) -> Self {
        Self {
            anomaly_type: "PARSER_ANOMALY".to_string(),
            symptom: symptom.into(),
            finding: Vec::new(),
            explanation: None,
            generated_by: generated_by.to_string(),
        }
    }

    pub fn with_finding(mut self, finding: impl Into<String>) -> Self {
        self.finding.push(finding.into());
        self
    }
}

/// Typed value yielded by a parser.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", content = "data")]
pub enum ParsedValue {
    User(User),
    /// Dict-shaped result, one entry per provided attribute.
    Attributes(BTreeMap<String, AttributeValue>),
    Value(AttributeValue),
    Record(serde_json::Value),
    Anomaly(Anomaly),
}

impl ParsedValue {
    pub fn is_anomaly(&self) -> bool {
        matches!(self, ParsedValue::Anomaly(_))
    }
}

/// A result delivered to the caller of a collection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "layer", content = "value")]
pub enum CollectionResult {
    Raw(ResponsePayload),
    Parsed(ParsedValue),
    Anomaly(Anomaly),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CollectedResult {
    pub artifact: String,
    pub result: CollectionResult,
}

impl CollectedResult {
    pub fn new(artifact: impl Into<String>, result: CollectionResult) -> Self {
        Self {
            artifact: artifact.into(),
            result,
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
