//! Condition-filtered, option-bound views of artifacts ready for dispatch.

use log::debug;

use crate::artifacts::conditions::evaluate_all;
use crate::config::{ArtifactDefinition, CollectionOptions, PathType, SourceKind, SourceSpec};
use crate::errors::{ArtifactError, ArtifactResult};
use crate::knowledge_base::KnowledgeBase;

#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedSource {
    /// Position of the source within its definition.
    pub index: usize,
    pub kind: SourceKind,
    pub spec: SourceSpec,
    pub path_type: PathType,
    pub max_file_size: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedArtifact {
    pub name: String,
    pub sources: Vec<ExpandedSource>,
    /// Requested by the caller rather than pulled in as a dependency.
    pub requested_by_user: bool,
}

fn path_type_for(kind: SourceKind, options: &CollectionOptions) -> PathType {
    if kind.is_registry() {
        PathType::Registry
    } else if kind.is_file_like() && options.use_tsk {
        PathType::Tsk
    } else if kind.is_file_like() && options.path_type != PathType::Registry {
        options.path_type
    } else {
        PathType::Os
    }
}

impl ExpandedArtifact {
    /// Bind the sources of `definition` whose conditions hold against `kb`.
    pub fn expand(
        definition: &ArtifactDefinition,
        kb: &KnowledgeBase,
        options: &CollectionOptions,
        requested_by_user: bool,
    ) -> ArtifactResult<Self> {
        let mut sources = Vec::new();
        for (index, source) in definition.sources.iter().enumerate() {
            if !evaluate_all(&source.conditions, &source.supported_os, kb) {
                debug!("{} source {} skipped, conditions not met", definition.name, index);
                continue;
            }
            let spec = source
                .spec()
                .map_err(|reason| ArtifactError::definition(definition.name.clone(), reason))?;
            sources.push(ExpandedSource {
                index,
                kind: source.kind,
                spec,
                path_type: path_type_for(source.kind, options),
                max_file_size: options.max_file_size,
            });
        }
        Ok(Self {
            name: definition.name.clone(),
            sources,
            requested_by_user,
        })
    }
}
