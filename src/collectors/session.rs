//! Working state of one collection session.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::collectors::transport::SourceSlot;
use crate::config::ArtifactDefinition;
use crate::knowledge_base::KnowledgeBase;
use crate::models::{CollectedResult, ParsedValue, ResponsePayload};

/// Scheduler bookkeeping. Owned by exactly one flow and mutated only by it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionSession {
    pub knowledge_base: KnowledgeBase,
    /// Attributes every provider has finished with.
    pub fulfilled_deps: BTreeSet<String>,
    /// Attributes some, but not all, providers have supplied.
    pub partial_fulfilled_deps: BTreeSet<String>,
    /// Attributes whose providers all finished without supplying a value.
    pub unmet_deps: BTreeSet<String>,
    pub in_flight_artifacts: BTreeSet<String>,
    pub awaiting_deps_artifacts: BTreeSet<String>,
    pub completed_artifacts: BTreeSet<String>,
    /// Failed artifacts and why.
    pub artifacts_failed: BTreeMap<String, String>,
    /// Artifacts whose conditions did not hold, or excluded from a
    /// lightweight bootstrap.
    pub skipped_artifacts: BTreeSet<String>,
    pub called_fallbacks: BTreeSet<String>,
    pub failure_count: usize,
    /// Partial attributes promoted to break a stall, in promotion order.
    pub promoted_deps: Vec<String>,
    /// Attributes each artifact waits on.
    pub requirements: BTreeMap<String, BTreeSet<String>>,
    /// Providers of each required attribute within this session.
    pub providers: BTreeMap<String, BTreeSet<String>>,
}

impl CollectionSession {
    pub fn new(knowledge_base: KnowledgeBase) -> Self {
        Self {
            knowledge_base,
            ..Default::default()
        }
    }

    /// Completed, failed or skipped.
    pub fn is_done(&self, artifact: &str) -> bool {
        self.completed_artifacts.contains(artifact)
            || self.artifacts_failed.contains_key(artifact)
            || self.skipped_artifacts.contains(artifact)
    }

    pub fn requirements_of(&self, artifact: &str) -> impl Iterator<Item = &String> {
        self.requirements.get(artifact).into_iter().flatten()
    }

    /// Attributes still needed by artifacts that have not been dispatched.
    pub fn awaited_attributes(&self) -> BTreeSet<String> {
        self.awaiting_deps_artifacts
            .iter()
            .flat_map(|artifact| self.requirements_of(artifact).cloned())
            .collect()
    }
}

/// Outstanding work of one dispatched artifact.
#[derive(Debug, Clone)]
pub(crate) struct ArtifactProgress {
    pub definition: Arc<ArtifactDefinition>,
    /// Outstanding request count per slot.
    pub pending: BTreeMap<SourceSlot, usize>,
    pub payloads: BTreeMap<SourceSlot, Vec<ResponsePayload>>,
    /// Slots that received at least one transport response.
    pub payload_slots: BTreeSet<SourceSlot>,
    pub sub_results: BTreeMap<SourceSlot, Vec<CollectedResult>>,
    pub errors: Vec<String>,
    /// Parsed values waiting to be merged into the knowledge base.
    pub parsed: Vec<ParsedValue>,
    pub in_fallback: bool,
    /// Responses received since the fallback started.
    pub fallback_received: usize,
}

impl ArtifactProgress {
    pub fn new(definition: Arc<ArtifactDefinition>) -> Self {
        Self {
            definition,
            pending: BTreeMap::new(),
            payloads: BTreeMap::new(),
            payload_slots: BTreeSet::new(),
            sub_results: BTreeMap::new(),
            errors: Vec::new(),
            parsed: Vec::new(),
            in_fallback: false,
            fallback_received: 0,
        }
    }

    pub fn expect(&mut self, slot: SourceSlot) {
        *self.pending.entry(slot).or_insert(0) += 1;
    }

    /// Mark one request of `slot` answered; returns how many remain.
    pub fn answered(&mut self, slot: SourceSlot) -> usize {
        let Some(count) = self.pending.get_mut(&slot) else {
            return 0;
        };
        *count = count.saturating_sub(1);
        let remaining = *count;
        if remaining == 0 {
            self.pending.remove(&slot);
        }
        remaining
    }

    pub fn is_settled(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_counts_per_slot() {
        let mut progress = ArtifactProgress::new(Arc::new(ArtifactDefinition::new("A")));
        progress.expect(SourceSlot::Source(0));
        progress.expect(SourceSlot::Source(0));
        progress.expect(SourceSlot::Source(1));

        assert_eq!(progress.answered(SourceSlot::Source(0)), 1);
        assert_eq!(progress.answered(SourceSlot::Source(1)), 0);
        assert!(!progress.is_settled());
        assert_eq!(progress.answered(SourceSlot::Source(0)), 0);
        assert!(progress.is_settled());
        // Unknown slots never underflow.
        assert_eq!(progress.answered(SourceSlot::Fallback), 0);
    }

    #[test]
    fn test_session_done_and_awaited() {
        let mut session = CollectionSession::new(KnowledgeBase::with_os("Linux"));
        session.completed_artifacts.insert("A".to_string());
        session.artifacts_failed.insert("B".to_string(), "boom".to_string());
        assert!(session.is_done("A"));
        assert!(session.is_done("B"));
        assert!(!session.is_done("C"));

        session.awaiting_deps_artifacts.insert("C".to_string());
        session
            .requirements
            .insert("C".to_string(), ["users.homedir".to_string()].into_iter().collect());
        assert_eq!(
            session.awaited_attributes().into_iter().collect::<Vec<_>>(),
            vec!["users.homedir".to_string()]
        );
    }
}
