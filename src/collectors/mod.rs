//! Artifact collection.
//!
//! A collection is split between a synchronous flow, which owns all
//! scheduling state, and an async driver that talks to the host through a
//! transport.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        ArtifactCollector (driver)       │
//! │   snapshots · failure tracking · limit  │
//! ├─────────────────────────────────────────┤
//! │        ArtifactCollectionFlow           │
//! │  ┌──────────┬───────────┬───────────┐   │
//! │  │ Session  │ Fallbacks │  Parsers  │   │
//! │  └──────────┴───────────┴───────────┘   │
//! ├─────────────────────────────────────────┤
//! │         CollectionTransport             │
//! │  ┌──────────┬───────────────────────┐   │
//! │  │  Local   │  any remote transport │   │
//! │  └──────────┴───────────────────────┘   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The flow turns events (start, responses) into effects (dispatches,
//! results, completion). It never blocks, so it can be driven by tests
//! one response at a time.
//!
//! ## Usage Example
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
//! let output = collector
//!     .collect_artifacts("localhost", &["SshdConfigFile".to_string()], &CollectionOptions::default())
//!     .await?;
//! println!("Collected {} results", output.results.len());
//! # Ok(())
//! # }
//! ```

/// Async driver running flows against a transport
pub mod collector;

/// Failed artifact tracking and reporting
pub mod failure_tracker;

/// Alternative strategies for artifacts that failed
pub mod fallbacks;

/// Event-driven collection state machine
pub mod flow;

/// Transport for the machine the engine runs on
pub mod local;

/// Scheduler bookkeeping
pub mod session;

/// Requests, responses and the transport trait
pub mod transport;
