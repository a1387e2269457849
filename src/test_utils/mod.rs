//! Test utilities for artifact-engine
//!
//! Definition builders, canned payloads, a parser with predictable output
//! and a scripted transport standing in for a host.

#![cfg(test)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_yaml::{Mapping, Value};

use crate::collectors::transport::{CollectionRequest, CollectionTransport};
use crate::config::{ArtifactDefinition, ArtifactSource, SourceKind};
use crate::constants::PLATFORM_INFO_ACTION;
use crate::knowledge_base::{AttributeValue, KnowledgeBase};
use crate::models::{ExecuteResponse, FileContent, ParsedValue, ResponsePayload, ResponseType, StatEntry};
use crate::parsers::ResponseParser;

fn string_list(items: &[&str]) -> Value {
    Value::Sequence(items.iter().map(|s| Value::String(s.to_string())).collect())
}

/// A FILE artifact reading `paths` and providing `provides`.
pub fn definition(name: &str, paths: &[&str], provides: &[&str]) -> ArtifactDefinition {
    let mut attributes = Mapping::new();
    attributes.insert(Value::String("paths".to_string()), string_list(paths));

    let mut def = ArtifactDefinition::new(name);
    def.sources.push(ArtifactSource::new(SourceKind::File, attributes));
    def.provides = provides.iter().map(|p| p.to_string()).collect();
    def
}

/// An ARTIFACT_GROUP over `members`.
pub fn group(name: &str, members: &[&str]) -> ArtifactDefinition {
    let mut attributes = Mapping::new();
    attributes.insert(Value::String("names".to_string()), string_list(members));

    let mut def = ArtifactDefinition::new(name);
    def.sources.push(ArtifactSource::new(SourceKind::ArtifactGroup, attributes));
    def
}

/// A COMMAND artifact.
pub fn command(name: &str, cmd: &str, args: &[&str], provides: &[&str]) -> ArtifactDefinition {
    let mut attributes = Mapping::new();
    attributes.insert(Value::String("cmd".to_string()), Value::String(cmd.to_string()));
    attributes.insert(Value::String("args".to_string()), string_list(args));

    let mut def = ArtifactDefinition::new(name);
    def.sources.push(ArtifactSource::new(SourceKind::Command, attributes));
    def.provides = provides.iter().map(|p| p.to_string()).collect();
    def
}

pub fn file_payload(path: &str, data: &str) -> ResponsePayload {
    ResponsePayload::File(FileContent {
        path: path.to_string(),
        data: data.to_string(),
        truncated: false,
    })
}

pub fn dir_payload(path: &str) -> ResponsePayload {
    ResponsePayload::Stat(StatEntry {
        path: path.to_string(),
        size: 0,
        is_dir: true,
        modified_time: None,
        sha256: None,
    })
}

fn stat_payload(path: &str, size: u64) -> ResponsePayload {
    ResponsePayload::Stat(StatEntry {
        path: path.to_string(),
        size,
        is_dir: false,
        modified_time: None,
        sha256: None,
    })
}

/// Knowledge base for `os` with one user per `(name, homedir)`.
pub fn kb_with_users(os: &str, users: &[(&str, &str)]) -> KnowledgeBase {
    let mut kb = KnowledgeBase::with_os(os);
    for (name, homedir) in users {
        kb.merge_or_add_user(crate::knowledge_base::User::new(*name).with_homedir(*homedir));
    }
    kb
}

/// Immediate parser turning each file response into its path.
pub struct PathValueParser {
    artifacts: Vec<String>,
}

impl PathValueParser {
    pub fn new(artifacts: &[&str]) -> Self {
        Self {
            artifacts: artifacts.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl ResponseParser for PathValueParser {
    fn name(&self) -> &str {
        "PathValueParser"
    }

    fn supported_artifacts(&self) -> Vec<String> {
        self.artifacts.clone()
    }

    fn input_types(&self) -> Vec<ResponseType> {
        vec![ResponseType::File]
    }

    fn output_types(&self) -> Vec<String> {
        vec!["Value".to_string()]
    }

    fn parse(&self, response: &ResponsePayload, _kb: &KnowledgeBase) -> Result<Vec<ParsedValue>> {
        match response {
            ResponsePayload::File(file) => Ok(vec![ParsedValue::Value(AttributeValue::Text(file.path.clone()))]),
            _ => Ok(Vec::new()),
        }
    }
}

/// In-memory host answering requests from a fixed table.
///
/// Paths ending in `/*` list the scripted files and directories directly
/// below the prefix. Unscripted paths match nothing.
#[derive(Default)]
pub struct ScriptedTransport {
    platform: Option<String>,
    files: BTreeMap<String, String>,
    dirs: BTreeSet<String>,
    commands: BTreeMap<String, String>,
    denied: BTreeSet<String>,
    requests: Mutex<Vec<CollectionRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_platform(mut self, system: &str) -> Self {
        self.platform = Some(system.to_string());
        self
    }

    pub fn with_file(mut self, path: &str, data: &str) -> Self {
        self.files.insert(path.to_string(), data.to_string());
        self
    }

    pub fn with_dir(mut self, path: &str) -> Self {
        self.dirs.insert(path.to_string());
        self
    }

    /// Stdout for `cmd` run with `args` joined by spaces.
    pub fn with_command(mut self, command_line: &str, stdout: &str) -> Self {
        self.commands.insert(command_line.to_string(), stdout.to_string());
        self
    }

    /// Any glob touching `path` fails with a permission error.
    pub fn with_denied(mut self, path: &str) -> Self {
        self.denied.insert(path.to_string());
        self
    }

    pub fn requests(&self) -> Vec<CollectionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests().len()
    }

    fn matches(&self, pattern: &str) -> Vec<String> {
        match pattern.strip_suffix("/*") {
            Some(prefix) => self
                .files
                .keys()
                .chain(self.dirs.iter())
                .filter(|path| {
                    path.strip_prefix(prefix)
                        .and_then(|rest| rest.strip_prefix('/'))
                        .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
                })
                .cloned()
                .collect(),
            None if self.files.contains_key(pattern) || self.dirs.contains(pattern) => vec![pattern.to_string()],
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl CollectionTransport for ScriptedTransport {
    async fn send(&self, request: &CollectionRequest) -> Result<Vec<ResponsePayload>> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        match request {
            CollectionRequest::FileGlob {
                paths, fetch_content, ..
            } => {
                let mut out = Vec::new();
                for pattern in paths {
                    if self.denied.contains(pattern) {
                        bail!("Permission denied: {}", pattern);
                    }
                    for path in self.matches(pattern) {
                        match self.files.get(&path) {
                            Some(data) => {
                                out.push(stat_payload(&path, data.len() as u64));
                                if *fetch_content {
                                    out.push(file_payload(&path, data));
                                }
                            }
                            None => out.push(dir_payload(&path)),
                        }
                    }
                }
                Ok(out)
            }
            CollectionRequest::Command { cmd, args } => {
                let line = std::iter::once(cmd.clone()).chain(args.iter().cloned()).collect::<Vec<_>>().join(" ");
                let Some(stdout) = self.commands.get(&line) else {
                    bail!("command not found: {}", cmd);
                };
                Ok(vec![ResponsePayload::Command(ExecuteResponse {
                    cmd: cmd.clone(),
                    args: args.clone(),
                    stdout: stdout.clone(),
                    stderr: String::new(),
                    exit_status: 0,
                    time_used_ms: 1,
                })])
            }
            CollectionRequest::ClientAction { action, .. } if action == PLATFORM_INFO_ACTION => {
                let Some(system) = &self.platform else {
                    bail!("platform information unavailable");
                };
                let mut info = BTreeMap::new();
                info.insert("system".to_string(), serde_json::json!(system));
                info.insert("fqdn".to_string(), serde_json::json!("host.example.com"));
                info.insert("release".to_string(), serde_json::json!("test"));
                info.insert("version".to_string(), serde_json::json!("10.2"));
                Ok(vec![ResponsePayload::Dict(info)])
            }
            other => bail!("{} requests are not scripted", other.kind()),
        }
    }
}
