//! Error taxonomy for artifact definition, resolution and collection.
//!
//! Validation-time errors (`Definition`, `ConditionSyntax`) abort before any
//! collection activity begins. Per-source failures never show up here: they
//! are recorded on the session and logged. Only session-level failures
//! (`KnowledgeBaseUninitialized`, `IncompleteCollection`) terminate a whole
//! collection.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArtifactError {
    /// Malformed or inconsistent artifact/source definition.
    #[error("artifact definition error in {artifact}: {reason}")]
    Definition { artifact: String, reason: String },

    /// Requested name unknown even after a registry reload.
    #[error("artifact {0} is not registered")]
    NotRegistered(String),

    /// Unresolved `%%attr%%` placeholder.
    #[error("unable to interpolate {template}: {reason}")]
    Interpolation { template: String, reason: String },

    #[error("knowledge base is not initialized: {0}")]
    KnowledgeBaseUninitialized(String),

    /// One or more explicitly requested artifacts did not complete.
    #[error("collection incomplete, missing artifacts: {}", format_missing(.0))]
    IncompleteCollection(Vec<(String, String)>),

    #[error("invalid condition {expression:?}: {reason}")]
    ConditionSyntax { expression: String, reason: String },

    #[error("knowledge base snapshot error: {0}")]
    Snapshot(String),
}

impl ArtifactError {
    pub fn definition(artifact: impl Into<String>, reason: impl Into<String>) -> Self {
        ArtifactError::Definition {
            artifact: artifact.into(),
            reason: reason.into(),
        }
    }

    pub fn interpolation(template: impl Into<String>, reason: impl Into<String>) -> Self {
        ArtifactError::Interpolation {
            template: template.into(),
            reason: reason.into(),
        }
    }
}

fn format_missing(missing: &[(String, String)]) -> String {
    missing
        .iter()
        .map(|(name, reason)| format!("{} ({})", name, reason))
        .collect::<Vec<_>>()
        .join(", ")
}

pub type ArtifactResult<T> = std::result::Result<T, ArtifactError>;
