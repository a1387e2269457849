//! Versioned persistence of knowledge bases per host.
//!
//! Every write produces a new version; reads return the latest one.

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::SNAPSHOT_FILE_PREFIX;
use crate::errors::{ArtifactError, ArtifactResult};
use crate::knowledge_base::KnowledgeBase;

/// Storage for knowledge base snapshots keyed by host identifier.
pub trait KnowledgeBaseStore: Send + Sync {
    /// Latest snapshot for `host`, if any was written.
    fn read(&self, host: &str) -> ArtifactResult<Option<KnowledgeBase>>;

    /// Persist a new snapshot and return its version number (starting at 1).
    fn write(&self, host: &str, kb: &KnowledgeBase) -> ArtifactResult<u64>;
}

#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Mutex<HashMap<String, Vec<KnowledgeBase>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of versions written for `host`.
    pub fn version_count(&self, host: &str) -> usize {
        let snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        snapshots.get(host).map(Vec::len).unwrap_or(0)
    }
}

impl KnowledgeBaseStore for InMemorySnapshotStore {
    fn read(&self, host: &str) -> ArtifactResult<Option<KnowledgeBase>> {
        let snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        Ok(snapshots.get(host).and_then(|versions| versions.last().cloned()))
    }

    fn write(&self, host: &str, kb: &KnowledgeBase) -> ArtifactResult<u64> {
        let mut snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        let versions = snapshots.entry(host.to_string()).or_default();
        versions.push(kb.clone());
        Ok(versions.len() as u64)
    }
}

/// On-disk record of one snapshot version.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRecord {
    version: u64,
    written_at: DateTime<Utc>,
    /// SHA-256 of the serialized knowledge base.
    digest: String,
    knowledge_base: KnowledgeBase,
}

/// Stores snapshots as `<root>/<host>/kb-<version>.json`.
#[derive(Debug, Clone)]
pub struct JsonSnapshotStore {
    root: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn host_dir(&self, host: &str) -> ArtifactResult<PathBuf> {
        let candidate = Path::new(host);
        let single_component = candidate.components().count() == 1
            && matches!(candidate.components().next(), Some(Component::Normal(_)));
        if host.is_empty() || host.contains('\0') || !single_component || host.contains('\\') {
            return Err(ArtifactError::Snapshot(format!("invalid host identifier {:?}", host)));
        }
        Ok(self.root.join(host))
    }

    fn versions(&self, dir: &Path) -> ArtifactResult<Vec<(u64, PathBuf)>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(dir)
            .map_err(|e| ArtifactError::Snapshot(format!("failed to list {}: {}", dir.display(), e)))?;

        let mut versions = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let version = name
                .strip_prefix(SNAPSHOT_FILE_PREFIX)
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(|number| number.parse::<u64>().ok());
            if let Some(version) = version {
                versions.push((version, entry.path()));
            }
        }
        versions.sort();
        Ok(versions)
    }
}

fn digest(kb: &KnowledgeBase) -> ArtifactResult<String> {
    let bytes = serde_json::to_vec(kb)
        .map_err(|e| ArtifactError::Snapshot(format!("failed to serialize knowledge base: {}", e)))?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

impl KnowledgeBaseStore for JsonSnapshotStore {
    fn read(&self, host: &str) -> ArtifactResult<Option<KnowledgeBase>> {
        let dir = self.host_dir(host)?;
        let Some((version, path)) = self.versions(&dir)?.pop() else {
            return Ok(None);
        };

        let content = fs::read_to_string(&path)
            .map_err(|e| ArtifactError::Snapshot(format!("failed to read {}: {}", path.display(), e)))?;
        let record: SnapshotRecord = serde_json::from_str(&content)
            .map_err(|e| ArtifactError::Snapshot(format!("failed to parse {}: {}", path.display(), e)))?;

        if digest(&record.knowledge_base)? != record.digest {
            return Err(ArtifactError::Snapshot(format!(
                "digest mismatch in snapshot version {} for {}",
                version, host
            )));
        }
        debug!("Loaded knowledge base version {} for {}", version, host);
        Ok(Some(record.knowledge_base))
    }

    fn write(&self, host: &str, kb: &KnowledgeBase) -> ArtifactResult<u64> {
        let dir = self.host_dir(host)?;
        fs::create_dir_all(&dir)
            .map_err(|e| ArtifactError::Snapshot(format!("failed to create {}: {}", dir.display(), e)))?;

        let version = self.versions(&dir)?.last().map(|(v, _)| v + 1).unwrap_or(1);
        let record = SnapshotRecord {
            version,
            written_at: Utc::now(),
            digest: digest(kb)?,
            knowledge_base: kb.clone(),
        };
        let json = serde_json::to_string_pretty(&record)
            .map_err(|e| ArtifactError::Snapshot(format!("failed to serialize snapshot: {}", e)))?;

        let path = dir.join(format!("{}{:06}.json", SNAPSHOT_FILE_PREFIX, version));
        fs::write(&path, json)
            .map_err(|e| ArtifactError::Snapshot(format!("failed to write {}: {}", path.display(), e)))?;
        info!("Wrote knowledge base version {} for {} to {}", version, host, path.display());
        Ok(version)
    }
}
