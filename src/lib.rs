//! # artifact-engine
//!
//! A forensic artifact collection engine: it loads declarative artifact
//! definitions, works out what a host must provide before each artifact
//! can be collected, and drives the collection through a pluggable
//! transport while building up a knowledge base about the host.
//!
//! ## Overview
//!
//! An artifact names something worth collecting (a file, a command's
//! output, a registry value) and may reference facts about the host with
//! `%%placeholders%%`, such as `%%users.homedir%%`. Facts live in the
//! knowledge base and are themselves supplied by artifacts that declare
//! `provides`. The engine orders collection so providers run first,
//! interpolates paths once facts are known, applies parsers and merges
//! their output back into the knowledge base.
//!
//! ## Features
//!
//! - **YAML definitions**: built-in set embedded in the binary, plus any
//!   number of files or directories
//! - **Dependency arrangement**: providers scheduled before dependents,
//!   unreachable artifacts reported
//! - **Knowledge base bootstrap**: platform discovery followed by every
//!   knowledge base provider, persisted as versioned snapshots
//! - **Parsers**: immediate and batched, results split into raw, parsed
//!   and anomaly layers
//! - **Fallbacks**: one alternative strategy per artifact when collection
//!   fails
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use artifact_engine::collectors::collector::ArtifactCollector;
//! use artifact_engine::collectors::local::LocalTransport;
//! use artifact_engine::config::{CollectionOptions, EngineConfig};
//! use artifact_engine::registry::ArtifactRegistry;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let registry = Arc::new(ArtifactRegistry::from_config(&EngineConfig::default())?);
//! let collector = ArtifactCollector::new(registry, Arc::new(LocalTransport::new()));
//!
//! let names = vec!["UserSshAuthorizedKeys".to_string()];
//! let output = collector
//!     .collect_artifacts("localhost", &names, &CollectionOptions::default())
//!     .await?;
//!
//! println!("Collected {} results", output.results.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`cli`]: Command-line interface definitions and argument parsing
//! - [`config`]: Artifact definitions and engine configuration
//! - [`registry`]: Definition catalog and dependency lookups
//! - [`artifacts`]: Conditions, interpolation and collection ordering
//! - [`knowledge_base`]: Host facts, merging and snapshots
//! - [`parsers`]: Response parsers and their application
//! - [`collectors`]: Collection flow, driver and transports
//! - [`models`]: Responses and results
//! - [`errors`]: Error taxonomy
//! - [`utils`]: Hashing and summaries
//! - [`constants`]: Application-wide constants

/// Command-line interface definitions and argument parsing
pub mod cli;

/// Core data models and structures used throughout the application
pub mod models;

/// Error types returned by the engine
pub mod errors;

/// Configuration management and artifact definitions
pub mod config;

/// Artifact definition catalog
pub mod registry;

/// Condition evaluation, interpolation and dependency ordering
pub mod artifacts;

/// Facts about the collected host
pub mod knowledge_base;

/// Response parsers
pub mod parsers;

/// Collection flow, driver and transports
pub mod collectors;

/// Utility functions for hashing and reporting
pub mod utils;

/// Application constants and configuration values
pub mod constants;

/// Test utilities and helpers
#[cfg(test)]
pub mod test_utils;
