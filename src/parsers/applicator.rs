//! Routing raw responses through the parsers registered for an artifact.

use log::{debug, warn};

use crate::knowledge_base::KnowledgeBase;
use crate::models::{Anomaly, CollectedResult, CollectionResult, ParsedValue, ResponsePayload};
use crate::parsers::ParserRegistry;

/// Results of one source, split by layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedResponses {
    /// Every response as received, kept whatever the parsers did.
    pub raw: Vec<ResponsePayload>,
    pub parsed: Vec<ParsedValue>,
    pub anomalies: Vec<Anomaly>,
    pub parsers_applied: Vec<String>,
}

impl ParsedResponses {
    fn push(&mut self, value: ParsedValue) {
        match value {
            ParsedValue::Anomaly(anomaly) => self.anomalies.push(anomaly),
            other => self.parsed.push(other),
        }
    }

    /// Results for the caller: parsed values and anomalies when a parser
    /// ran, otherwise the raw responses.
    pub fn into_results(self, artifact: &str) -> Vec<CollectedResult> {
        if self.parsers_applied.is_empty() {
            return self
                .raw
                .into_iter()
                .map(|raw| CollectedResult::new(artifact, CollectionResult::Raw(raw)))
                .collect();
        }
        let parsed = self
            .parsed
            .into_iter()
            .map(|value| CollectedResult::new(artifact, CollectionResult::Parsed(value)));
        let anomalies = self
            .anomalies
            .into_iter()
            .map(|anomaly| CollectedResult::new(artifact, CollectionResult::Anomaly(anomaly)));
        parsed.chain(anomalies).collect()
    }
}

/// Apply every parser registered for `artifact` to the responses of one
/// source. Outputs of several parsers are concatenated, never deduplicated.
/// A parser error is reported as an anomaly.
pub fn apply_parsers(
    registry: &ParserRegistry,
    artifact: &str,
    responses: Vec<ResponsePayload>,
    kb: &KnowledgeBase,
) -> ParsedResponses {
    let mut out = ParsedResponses::default();

    for parser in registry.get_parsers_for_artifact(artifact) {
        let accepted: Vec<ResponsePayload> = responses
            .iter()
            .filter(|response| parser.accepts(response))
            .cloned()
            .collect();
        out.parsers_applied.push(parser.name().to_string());

        if parser.process_together() {
            match parser.parse_multiple(&accepted, kb) {
                Ok(values) => values.into_iter().for_each(|v| out.push(v)),
                Err(e) => {
                    warn!("Parser {} failed on {}: {}", parser.name(), artifact, e);
                    out.anomalies.push(Anomaly::parser_anomaly(parser.name(), e.to_string()));
                }
            }
            continue;
        }

        for response in &accepted {
            match parser.parse(response, kb) {
                Ok(values) => values.into_iter().for_each(|v| out.push(v)),
                Err(e) => {
                    warn!("Parser {} failed on {}: {}", parser.name(), artifact, e);
                    let mut anomaly = Anomaly::parser_anomaly(parser.name(), e.to_string());
                    if let Some(path) = response.path() {
                        anomaly = anomaly.with_finding(path);
                    }
                    out.anomalies.push(anomaly);
                }
            }
        }
    }

    debug!(
        "{}: {} responses, {} parsed, {} anomalies",
        artifact,
        responses.len(),
        out.parsed.len(),
        out.anomalies.len()
    );
    out.raw = responses;
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge_base::AttributeValue;
    use crate::models::{FileContent, ResponseType};
    use crate::parsers::ResponseParser;
    use anyhow::{bail, Result};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct EchoParser {
        name: &'static str,
        anomaly: bool,
    }

    impl ResponseParser for EchoParser {
        fn name(&self) -> &str {
            self.name
        }
        fn supported_artifacts(&self) -> Vec<String> {
            vec!["Target".to_string()]
        }
        fn input_types(&self) -> Vec<ResponseType> {
            vec![ResponseType::File]
        }
        fn output_types(&self) -> Vec<String> {
            vec!["Value".to_string()]
        }
        fn parse(&self, response: &ResponsePayload, _kb: &KnowledgeBase) -> Result<Vec<ParsedValue>> {
            let path = response.path().unwrap_or_default().to_string();
            if self.anomaly {
                return Ok(vec![ParsedValue::Anomaly(Anomaly::parser_anomaly(self.name, path))]);
            }
            Ok(vec![ParsedValue::Value(AttributeValue::Text(path))])
        }
    }

    struct CountingBatchParser {
        calls: AtomicUsize,
        seen: AtomicUsize,
    }

    impl ResponseParser for CountingBatchParser {
        fn name(&self) -> &str {
            "CountingBatchParser"
        }
        fn supported_artifacts(&self) -> Vec<String> {
            vec!["Target".to_string()]
        }
        fn input_types(&self) -> Vec<ResponseType> {
            vec![ResponseType::File]
        }
        fn output_types(&self) -> Vec<String> {
            vec!["Value".to_string()]
        }
        fn process_together(&self) -> bool {
            true
        }
        fn parse_multiple(&self, responses: &[ResponsePayload], _kb: &KnowledgeBase) -> Result<Vec<ParsedValue>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.fetch_add(responses.len(), Ordering::SeqCst);
            Ok(vec![ParsedValue::Value(AttributeValue::Integer(responses.len() as i64))])
        }
    }

    struct FailingParser;

    impl ResponseParser for FailingParser {
        fn name(&self) -> &str {
            "FailingParser"
        }
        fn supported_artifacts(&self) -> Vec<String> {
            vec!["Target".to_string()]
        }
        fn input_types(&self) -> Vec<ResponseType> {
            vec![ResponseType::File]
        }
        fn output_types(&self) -> Vec<String> {
            Vec::new()
        }
        fn parse(&self, _response: &ResponsePayload, _kb: &KnowledgeBase) -> Result<Vec<ParsedValue>> {
            bail!("corrupt input")
        }
    }

    fn file(path: &str) -> ResponsePayload {
        ResponsePayload::File(FileContent {
            path: path.to_string(),
            data: String::new(),
            truncated: false,
        })
    }

    #[test]
    fn test_two_responses_two_parsers_four_results() {
        let mut registry = ParserRegistry::new();
        registry.register(Arc::new(EchoParser { name: "Values", anomaly: false }));
        registry.register(Arc::new(EchoParser { name: "Flags", anomaly: true }));

        let out = apply_parsers(&registry, "Target", vec![file("/a"), file("/b")], &KnowledgeBase::new());
        assert_eq!(out.parsed.len() + out.anomalies.len(), 4);
        assert_eq!(out.parsed.len(), 2);
        assert_eq!(out.anomalies.len(), 2);
        assert_eq!(out.raw.len(), 2);
        assert_eq!(out.into_results("Target").len(), 4);
    }

    #[test]
    fn test_batched_parser_called_once_with_everything() {
        let parser = Arc::new(CountingBatchParser {
            calls: AtomicUsize::new(0),
            seen: AtomicUsize::new(0),
        });
        let mut registry = ParserRegistry::new();
        registry.register(parser.clone());

        let responses = vec![file("/a"), file("/b"), file("/c")];
        let out = apply_parsers(&registry, "Target", responses, &KnowledgeBase::new());
        assert_eq!(parser.calls.load(Ordering::SeqCst), 1);
        assert_eq!(parser.seen.load(Ordering::SeqCst), 3);
        assert_eq!(out.parsed, vec![ParsedValue::Value(AttributeValue::Integer(3))]);
    }

    #[test]
    fn test_parser_error_becomes_anomaly() {
        let mut registry = ParserRegistry::new();
        registry.register(Arc::new(FailingParser));
        let out = apply_parsers(&registry, "Target", vec![file("/a")], &KnowledgeBase::new());
        assert!(out.parsed.is_empty());
        assert_eq!(out.anomalies.len(), 1);
        assert_eq!(out.anomalies[0].finding, vec!["/a".to_string()]);
        assert!(out.anomalies[0].symptom.contains("corrupt input"));
    }

    #[test]
    fn test_no_parsers_keeps_raw_results() {
        let registry = ParserRegistry::new();
        let out = apply_parsers(&registry, "Other", vec![file("/a")], &KnowledgeBase::new());
        assert!(out.parsers_applied.is_empty());
        let results = out.into_results("Other");
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].result, CollectionResult::Raw(_)));
    }
}
