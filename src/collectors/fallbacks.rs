//! Alternative collection strategies tried once when an artifact fails.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::collectors::transport::CollectionRequest;
use crate::config::PathType;
use crate::knowledge_base::KnowledgeBase;
use crate::models::ResponsePayload;

pub trait ArtifactFallback: Send + Sync {
    /// Artifact this fallback stands in for.
    fn artifact(&self) -> &str;

    /// Requests replacing the failed sources. An empty list means the
    /// fallback does not apply to this host.
    fn requests(&self, kb: &KnowledgeBase) -> Vec<CollectionRequest>;

    /// Narrow the responses to those the artifact's parsers should see.
    fn select(&self, payloads: Vec<ResponsePayload>) -> Vec<ResponsePayload> {
        payloads
    }
}

/// Locates the system root by probing the usual install directories when
/// the registry value cannot be read.
pub struct SystemRootFallback;

const SYSTEM_ROOT_CANDIDATES: &[&str] = &["C:\\Windows", "C:\\WinNT"];

impl ArtifactFallback for SystemRootFallback {
    fn artifact(&self) -> &str {
        "WindowsEnvironmentVariableSystemRoot"
    }

    fn requests(&self, kb: &KnowledgeBase) -> Vec<CollectionRequest> {
        if kb.os.as_deref().is_some_and(|os| os != "Windows") {
            return Vec::new();
        }
        vec![CollectionRequest::FileGlob {
            paths: SYSTEM_ROOT_CANDIDATES.iter().map(|p| p.to_string()).collect(),
            path_type: PathType::Os,
            max_file_size: 0,
            fetch_content: false,
        }]
    }

    /// The system root is a single directory: keep the first candidate
    /// that exists.
    fn select(&self, payloads: Vec<ResponsePayload>) -> Vec<ResponsePayload> {
        let directories: Vec<ResponsePayload> = payloads
            .into_iter()
            .filter(|p| matches!(p, ResponsePayload::Stat(stat) if stat.is_dir))
            .collect();
        let rank = |payload: &ResponsePayload| {
            payload
                .path()
                .and_then(|path| {
                    SYSTEM_ROOT_CANDIDATES
                        .iter()
                        .position(|candidate| candidate.eq_ignore_ascii_case(path))
                })
                .unwrap_or(SYSTEM_ROOT_CANDIDATES.len())
        };
        directories.into_iter().min_by_key(rank).into_iter().collect()
    }
}

#[derive(Clone, Default)]
pub struct FallbackRegistry {
    fallbacks: BTreeMap<String, Arc<dyn ArtifactFallback>>,
}

impl FallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin_fallbacks() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SystemRootFallback));
        registry
    }

    /// Replaces any fallback already registered for the same artifact.
    pub fn register(&mut self, fallback: Arc<dyn ArtifactFallback>) {
        self.fallbacks.insert(fallback.artifact().to_string(), fallback);
    }

    pub fn get(&self, artifact: &str) -> Option<Arc<dyn ArtifactFallback>> {
        self.fallbacks.get(artifact).cloned()
    }

    pub fn len(&self) -> usize {
        self.fallbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fallbacks.is_empty()
    }
}
