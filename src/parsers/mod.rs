//! Response parsers and their registry.
//!
//! A parser declares which artifacts it handles, which payload types it
//! accepts and whether it must see every response of a source at once.

pub mod applicator;
pub mod linux;
pub mod windows;

use std::sync::Arc;

use anyhow::Result;

use crate::knowledge_base::KnowledgeBase;
use crate::models::{ParsedValue, ResponsePayload, ResponseType};

pub use applicator::{apply_parsers, ParsedResponses};

/// Declared contract of a parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserDescriptor {
    pub name: String,
    pub input_types: Vec<ResponseType>,
    pub output_types: Vec<String>,
    pub batched: bool,
}

pub trait ResponseParser: Send + Sync {
    fn name(&self) -> &str;

    fn supported_artifacts(&self) -> Vec<String>;

    fn input_types(&self) -> Vec<ResponseType>;

    fn output_types(&self) -> Vec<String>;

    /// Batched parsers get all responses of a source in one call.
    fn process_together(&self) -> bool {
        false
    }

    /// Parse a single response. Used by immediate parsers.
    fn parse(&self, _response: &ResponsePayload, _kb: &KnowledgeBase) -> Result<Vec<ParsedValue>> {
        Ok(Vec::new())
    }

    /// Parse every response of a source. Used by batched parsers; the
    /// default parses them one by one.
    fn parse_multiple(&self, responses: &[ResponsePayload], kb: &KnowledgeBase) -> Result<Vec<ParsedValue>> {
        let mut out = Vec::new();
        for response in responses {
            out.extend(self.parse(response, kb)?);
        }
        Ok(out)
    }

    fn accepts(&self, response: &ResponsePayload) -> bool {
        self.input_types().contains(&response.response_type())
    }

    fn descriptor(&self) -> ParserDescriptor {
        ParserDescriptor {
            name: self.name().to_string(),
            input_types: self.input_types(),
            output_types: self.output_types(),
            batched: self.process_together(),
        }
    }
}

/// Parsers indexed by the artifacts they support.
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: Vec<Arc<dyn ResponseParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every parser shipped with the crate.
    pub fn with_builtin_parsers() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(linux::PasswdParser));
        registry.register(Arc::new(linux::HomeDirectoryParser));
        registry.register(Arc::new(linux::OsReleaseParser));
        registry.register(Arc::new(windows::RegistryValueParser));
        registry.register(Arc::new(windows::ProfileListParser));
        registry
    }

    pub fn register(&mut self, parser: Arc<dyn ResponseParser>) {
        self.parsers.push(parser);
    }

    /// Parsers for `artifact`, in registration order.
    pub fn get_parsers_for_artifact(&self, artifact: &str) -> Vec<Arc<dyn ResponseParser>> {
        self.parsers
            .iter()
            .filter(|p| p.supported_artifacts().iter().any(|a| a == artifact))
            .cloned()
            .collect()
    }

    pub fn descriptors_for_artifact(&self, artifact: &str) -> Vec<ParserDescriptor> {
        self.get_parsers_for_artifact(artifact)
            .iter()
            .map(|p| p.descriptor())
            .collect()
    }

    pub fn has_parsers(&self, artifact: &str) -> bool {
        self.parsers
            .iter()
            .any(|p| p.supported_artifacts().iter().any(|a| a == artifact))
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }
}
