//! Typed requests to the action layer and the transport seam.
//!
//! The flow never talks to a host directly. It emits `Dispatch` values,
//! each tagged with a `Correlation` so the response can be routed back to
//! the artifact source that asked for it.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::config::PathType;
use crate::knowledge_base::KnowledgeBase;
use crate::models::{CollectedResult, ResponsePayload};

pub type RequestId = u64;

/// Which part of an artifact a request was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceSlot {
    /// Index of the source in its definition.
    Source(usize),
    /// The single fallback attempt of the artifact.
    Fallback,
}

/// Routing metadata recorded for every outstanding request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correlation {
    Source { artifact: String, slot: SourceSlot },
    /// Platform discovery ahead of a knowledge base bootstrap.
    PlatformInfo,
    /// Knowledge base bootstrap ahead of a collection.
    Bootstrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RequestKind {
    Command,
    FileGlob,
    FileGrep,
    RegistryKey,
    RegistryValue,
    WmiQuery,
    RekallPlugin,
    ClientAction,
    SubArtifactCollection,
    InitializeKnowledgeBase,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            RequestKind::Command => "COMMAND",
            RequestKind::FileGlob => "FILE_GLOB",
            RequestKind::FileGrep => "FILE_GREP",
            RequestKind::RegistryKey => "REGISTRY_KEY",
            RequestKind::RegistryValue => "REGISTRY_VALUE",
            RequestKind::WmiQuery => "WMI_QUERY",
            RequestKind::RekallPlugin => "REKALL_PLUGIN",
            RequestKind::ClientAction => "CLIENT_ACTION",
            RequestKind::SubArtifactCollection => "SUB_ARTIFACT_COLLECTION",
            RequestKind::InitializeKnowledgeBase => "INITIALIZE_KNOWLEDGE_BASE",
        };
        write!(f, "{}", tag)
    }
}

/// One registry value to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryValueRequest {
    pub key: String,
    pub value: String,
}

/// A fully interpolated request for the action layer.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionRequest {
    Command {
        cmd: String,
        args: Vec<String>,
    },
    /// Stat everything matching `paths`; with `fetch_content` regular files
    /// are also read up to `max_file_size` bytes.
    FileGlob {
        paths: Vec<String>,
        path_type: PathType,
        max_file_size: u64,
        fetch_content: bool,
    },
    FileGrep {
        paths: Vec<String>,
        path_type: PathType,
        regexes: Vec<String>,
        max_file_size: u64,
    },
    RegistryKey {
        keys: Vec<String>,
    },
    RegistryValue {
        values: Vec<RegistryValueRequest>,
    },
    WmiQuery {
        query: String,
        base_object: Option<String>,
    },
    RekallPlugin {
        plugin: String,
        args: BTreeMap<String, String>,
    },
    ClientAction {
        action: String,
        args: BTreeMap<String, String>,
    },
    /// Collect other artifacts against a copy of the knowledge base. With
    /// `fetch_files` the paths they report are downloaded afterwards.
    SubArtifactCollection {
        names: Vec<String>,
        knowledge_base: KnowledgeBase,
        fetch_files: bool,
    },
    InitializeKnowledgeBase {
        lightweight: bool,
    },
}

impl CollectionRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            CollectionRequest::Command { .. } => RequestKind::Command,
            CollectionRequest::FileGlob { .. } => RequestKind::FileGlob,
            CollectionRequest::FileGrep { .. } => RequestKind::FileGrep,
            CollectionRequest::RegistryKey { .. } => RequestKind::RegistryKey,
            CollectionRequest::RegistryValue { .. } => RequestKind::RegistryValue,
            CollectionRequest::WmiQuery { .. } => RequestKind::WmiQuery,
            CollectionRequest::RekallPlugin { .. } => RequestKind::RekallPlugin,
            CollectionRequest::ClientAction { .. } => RequestKind::ClientAction,
            CollectionRequest::SubArtifactCollection { .. } => RequestKind::SubArtifactCollection,
            CollectionRequest::InitializeKnowledgeBase { .. } => RequestKind::InitializeKnowledgeBase,
        }
    }

    /// Handled by the collector itself rather than sent to a transport.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            CollectionRequest::SubArtifactCollection { .. } | CollectionRequest::InitializeKnowledgeBase { .. }
        )
    }
}

/// A request emitted by the flow, waiting for its response.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub id: RequestId,
    pub correlation: Correlation,
    pub request: CollectionRequest,
}

/// Successful outcome of a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionResponse {
    Payloads(Vec<ResponsePayload>),
    /// Outcome of a nested collection: results already attributed to the
    /// member artifacts, files fetched from their paths (ARTIFACT_FILES
    /// only) and the knowledge base as the nested session left it.
    SubCollection {
        results: Vec<CollectedResult>,
        files: Option<Vec<ResponsePayload>>,
        knowledge_base: KnowledgeBase,
    },
    KnowledgeBase(KnowledgeBase),
}

/// The action layer reaching a host.
///
/// Implementations only see the external request kinds; sub-collections
/// and knowledge base bootstraps are resolved by the collector.
#[async_trait]
pub trait CollectionTransport: Send + Sync {
    async fn send(&self, request: &CollectionRequest) -> Result<Vec<ResponsePayload>>;
}
