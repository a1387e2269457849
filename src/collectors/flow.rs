//! The collection scheduler as an explicit state machine.
//!
//! `ArtifactCollectionFlow` never performs IO. Each call to `handle_event`
//! consumes one event (the start signal or one response) and returns the
//! effects the driver must carry out: requests to dispatch, results to
//! hand to the caller, and finally the session report. Responses may arrive
//! in any order and duplicates are ignored, so the same flow can be driven
//! by the async collector, by a test, or by a remote message loop.
//!
//! ```text
//! Start ──► DiscoveringPlatform ──┐        (knowledge base bootstrap)
//!   │                             ▼
//!   ├──► Bootstrapping ─────► Collecting ──► Finished
//!   └─────────────────────────────┘
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::artifacts::{arrange, cartesian_product, evaluate_all, interpolate, interpolate_path, ExpandedArtifact, ExpandedSource};
use crate::collectors::fallbacks::FallbackRegistry;
use crate::collectors::session::{ArtifactProgress, CollectionSession};
use crate::collectors::transport::{
    CollectionRequest, CollectionResponse, Correlation, Dispatch, RegistryValueRequest, RequestId, SourceSlot,
};
use crate::config::artifact_types::value_to_string;
use crate::config::{CollectionOptions, EngineConfig, SourceSpec};
use crate::constants::{HEAVYWEIGHT_LABEL, PLATFORM_INFO_ACTION, SUPPORTED_OS};
use crate::errors::{ArtifactError, ArtifactResult};
use crate::knowledge_base::{merge_results, KnowledgeBase};
use crate::models::{CollectedResult, CollectionResult, ResponsePayload};
use crate::parsers::{apply_parsers, ParserRegistry};
use crate::registry::ArtifactRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Start,
    /// Waiting for the platform of the host.
    DiscoveringPlatform,
    /// Waiting for a knowledge base bootstrap.
    Bootstrapping,
    Collecting,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowMode {
    /// Collect the requested artifacts.
    Collect,
    /// Build a knowledge base from every provider.
    KnowledgeBase { lightweight: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowEvent {
    Start,
    Response {
        id: RequestId,
        outcome: Result<CollectionResponse, String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowEffect {
    Dispatch(Dispatch),
    Emit(CollectedResult),
    Finished(CollectionReport),
}

/// Which artifacts a knowledge base bootstrap collects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BootstrapSettings {
    /// Explicit list; empty means every provider for the host OS.
    pub knowledge_base_artifacts: Vec<String>,
    pub heavyweight_artifacts: Vec<String>,
}

impl BootstrapSettings {
    pub fn is_heavyweight(&self, name: &str, labels: &[String]) -> bool {
        self.heavyweight_artifacts.iter().any(|a| a == name) || labels.iter().any(|l| l == HEAVYWEIGHT_LABEL)
    }
}

impl From<&EngineConfig> for BootstrapSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            knowledge_base_artifacts: config.knowledge_base_artifacts.clone(),
            heavyweight_artifacts: config.heavyweight_artifacts.clone(),
        }
    }
}

/// Outcome of a finished session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionReport {
    pub knowledge_base: KnowledgeBase,
    pub requested: Vec<String>,
    pub completed: BTreeSet<String>,
    pub failed: BTreeMap<String, String>,
    pub skipped: BTreeSet<String>,
    pub called_fallbacks: BTreeSet<String>,
    pub promoted_dependencies: Vec<String>,
    pub failure_count: usize,
    pub require_complete: bool,
}

impl CollectionReport {
    /// Requested artifacts that neither completed nor were skipped, with
    /// the reason.
    pub fn missing_requested(&self) -> Vec<(String, String)> {
        self.requested
            .iter()
            .filter(|name| !self.completed.contains(*name) && !self.skipped.contains(*name))
            .map(|name| {
                let reason = self
                    .failed
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| "not collected".to_string());
                (name.clone(), reason)
            })
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_requested().is_empty()
    }

    /// Fails with `IncompleteCollection` when completeness was required.
    pub fn into_result(self) -> ArtifactResult<Self> {
        if self.require_complete {
            let missing = self.missing_requested();
            if !missing.is_empty() {
                return Err(ArtifactError::IncompleteCollection(missing));
            }
        }
        Ok(self)
    }
}

pub struct ArtifactCollectionFlow {
    registry: Arc<ArtifactRegistry>,
    parsers: Arc<ParserRegistry>,
    fallbacks: Arc<FallbackRegistry>,
    options: CollectionOptions,
    bootstrap: BootstrapSettings,
    mode: FlowMode,
    state: FlowState,
    requested: Vec<String>,
    session: CollectionSession,
    progress: BTreeMap<String, ArtifactProgress>,
    pending: HashMap<RequestId, Correlation>,
    next_id: RequestId,
}

impl ArtifactCollectionFlow {
    /// Flow collecting `names`. Without an initialized knowledge base the
    /// flow first asks for a bootstrap.
    pub fn new(
        registry: Arc<ArtifactRegistry>,
        parsers: Arc<ParserRegistry>,
        fallbacks: Arc<FallbackRegistry>,
        names: Vec<String>,
        knowledge_base: Option<KnowledgeBase>,
        options: CollectionOptions,
    ) -> Self {
        Self {
            registry,
            parsers,
            fallbacks,
            options,
            bootstrap: BootstrapSettings::default(),
            mode: FlowMode::Collect,
            state: FlowState::Start,
            requested: dedup(names),
            session: CollectionSession::new(knowledge_base.unwrap_or_default()),
            progress: BTreeMap::new(),
            pending: HashMap::new(),
            next_id: 1,
        }
    }

    /// Flow building a knowledge base, starting from platform discovery
    /// when the OS is not known yet.
    pub fn for_knowledge_base(
        registry: Arc<ArtifactRegistry>,
        parsers: Arc<ParserRegistry>,
        fallbacks: Arc<FallbackRegistry>,
        knowledge_base: Option<KnowledgeBase>,
        bootstrap: BootstrapSettings,
        options: CollectionOptions,
    ) -> Self {
        let lightweight = options.lightweight;
        let mut flow = Self::new(registry, parsers, fallbacks, Vec::new(), knowledge_base, options);
        flow.bootstrap = bootstrap;
        flow.mode = FlowMode::KnowledgeBase { lightweight };
        flow
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn mode(&self) -> FlowMode {
        self.mode
    }

    pub fn session(&self) -> &CollectionSession {
        &self.session
    }

    pub fn knowledge_base(&self) -> &KnowledgeBase {
        &self.session.knowledge_base
    }

    pub fn outstanding_requests(&self) -> usize {
        self.pending.len()
    }

    pub fn is_finished(&self) -> bool {
        self.state == FlowState::Finished
    }

    /// Feed one event. An `Err` is fatal for the whole session.
    pub fn handle_event(&mut self, event: FlowEvent) -> ArtifactResult<Vec<FlowEffect>> {
        if self.is_finished() {
            debug!("Ignoring event for a finished collection");
            return Ok(Vec::new());
        }
        let result = match event {
            FlowEvent::Start => self.on_start(),
            FlowEvent::Response { id, outcome } => self.on_response(id, outcome),
        };
        if result.is_err() {
            self.state = FlowState::Finished;
            self.pending.clear();
        }
        result
    }

    pub fn report(&self) -> CollectionReport {
        CollectionReport {
            knowledge_base: self.session.knowledge_base.clone(),
            requested: self.requested.clone(),
            completed: self.session.completed_artifacts.clone(),
            failed: self.session.artifacts_failed.clone(),
            skipped: self.session.skipped_artifacts.clone(),
            called_fallbacks: self.session.called_fallbacks.clone(),
            promoted_dependencies: self.session.promoted_deps.clone(),
            failure_count: self.session.failure_count,
            require_complete: self.options.require_complete && self.mode == FlowMode::Collect,
        }
    }

    fn on_start(&mut self) -> ArtifactResult<Vec<FlowEffect>> {
        if self.state != FlowState::Start {
            return Ok(Vec::new());
        }
        let initialized = self.session.knowledge_base.is_initialized();
        match self.mode {
            FlowMode::Collect if initialized => {
                let names = self.requested.clone();
                self.start_collection(names)
            }
            FlowMode::Collect => {
                info!("Knowledge base not initialized, bootstrapping first");
                self.state = FlowState::Bootstrapping;
                let request = CollectionRequest::InitializeKnowledgeBase {
                    lightweight: self.options.lightweight,
                };
                Ok(vec![FlowEffect::Dispatch(self.register_dispatch(Correlation::Bootstrap, request))])
            }
            FlowMode::KnowledgeBase { .. } if initialized => self.start_bootstrap(),
            FlowMode::KnowledgeBase { .. } => {
                self.state = FlowState::DiscoveringPlatform;
                let request = CollectionRequest::ClientAction {
                    action: PLATFORM_INFO_ACTION.to_string(),
                    args: BTreeMap::new(),
                };
                Ok(vec![FlowEffect::Dispatch(self.register_dispatch(Correlation::PlatformInfo, request))])
            }
        }
    }

    fn on_response(&mut self, id: RequestId, outcome: Result<CollectionResponse, String>) -> ArtifactResult<Vec<FlowEffect>> {
        let Some(correlation) = self.pending.remove(&id) else {
            debug!("Ignoring response {} with no outstanding request", id);
            return Ok(Vec::new());
        };

        match correlation {
            Correlation::Bootstrap => match outcome {
                Ok(CollectionResponse::KnowledgeBase(kb)) if kb.is_initialized() => {
                    self.session.knowledge_base = kb;
                    let names = self.requested.clone();
                    self.start_collection(names)
                }
                Ok(_) => Err(ArtifactError::KnowledgeBaseUninitialized(
                    "bootstrap did not determine the host OS".to_string(),
                )),
                Err(reason) => Err(ArtifactError::KnowledgeBaseUninitialized(format!(
                    "bootstrap failed: {}",
                    reason
                ))),
            },
            Correlation::PlatformInfo => match outcome {
                Ok(CollectionResponse::Payloads(payloads)) => {
                    apply_platform_info(&mut self.session.knowledge_base, &payloads);
                    if !self.session.knowledge_base.is_initialized() {
                        return Err(ArtifactError::KnowledgeBaseUninitialized(
                            "platform discovery did not report a supported OS".to_string(),
                        ));
                    }
                    self.start_bootstrap()
                }
                Ok(_) => Err(ArtifactError::KnowledgeBaseUninitialized(
                    "unexpected platform discovery response".to_string(),
                )),
                Err(reason) => Err(ArtifactError::KnowledgeBaseUninitialized(format!(
                    "platform discovery failed: {}",
                    reason
                ))),
            },
            Correlation::Source { artifact, slot } => {
                let mut effects = self.on_source_response(&artifact, slot, outcome)?;
                effects.extend(self.advance()?);
                Ok(effects)
            }
        }
    }

    fn start_bootstrap(&mut self) -> ArtifactResult<Vec<FlowEffect>> {
        let os = self.os()?;
        let candidates = if self.bootstrap.knowledge_base_artifacts.is_empty() {
            let mut names = Vec::new();
            for name in self.registry.names() {
                let definition = self.registry.get_artifact(&name)?;
                if definition.supports_os(&os) && !definition.provides.is_empty() {
                    names.push(name);
                }
            }
            names
        } else {
            self.bootstrap.knowledge_base_artifacts.clone()
        };

        let mut names = Vec::new();
        for name in candidates {
            if !self.is_excluded(&name)? {
                names.push(name);
            }
        }
        info!("Bootstrapping {} knowledge base from {} artifacts", os, names.len());
        self.start_collection(names)
    }

    fn start_collection(&mut self, names: Vec<String>) -> ArtifactResult<Vec<FlowEffect>> {
        self.state = FlowState::Collecting;
        let os = self.os()?;
        self.requested = dedup(names);

        let kb = &self.session.knowledge_base;
        let arranged = arrange(&self.registry, &os, &self.requested, |attribute| kb.has_attribute(attribute))?;

        let in_session: BTreeSet<&String> = arranged
            .order
            .iter()
            .chain(arranged.unreachable_artifacts.iter())
            .collect();
        let mut providers: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for attribute in arranged.requirements.values().flatten() {
            if providers.contains_key(attribute) {
                continue;
            }
            let found = self
                .registry
                .providers_of(attribute, Some(&os))
                .into_iter()
                .filter(|provider| in_session.contains(provider))
                .collect();
            providers.insert(attribute.clone(), found);
        }
        self.session.providers = providers;
        self.session.requirements = arranged.requirements;

        let unreachable_attributes: BTreeSet<String> = arranged.unreachable_attributes.into_iter().collect();
        for artifact in &arranged.unreachable_artifacts {
            let missing: Vec<String> = self
                .session
                .requirements_of(artifact)
                .filter(|attribute| unreachable_attributes.contains(*attribute))
                .cloned()
                .collect();
            self.fail(artifact, format!("unmet dependency: {}", missing.join(", ")));
        }

        for artifact in arranged.order {
            if self.is_excluded(&artifact)? {
                info!("Skipping heavyweight artifact {}", artifact);
                self.session.skipped_artifacts.insert(artifact);
                continue;
            }
            self.session.awaiting_deps_artifacts.insert(artifact);
        }

        self.advance()
    }

    /// Dispatch whatever became ready, fail what can never run, and break
    /// stalls. Emits `Finished` once nothing is awaiting or in flight.
    fn advance(&mut self) -> ArtifactResult<Vec<FlowEffect>> {
        let mut effects = Vec::new();
        loop {
            self.update_fulfillment();

            let blocked: Vec<(String, String)> = self
                .session
                .awaiting_deps_artifacts
                .iter()
                .filter_map(|artifact| {
                    self.session
                        .requirements_of(artifact)
                        .find(|attribute| self.session.unmet_deps.contains(*attribute))
                        .map(|attribute| (artifact.clone(), attribute.clone()))
                })
                .collect();
            if !blocked.is_empty() {
                for (artifact, attribute) in blocked {
                    self.fail(&artifact, format!("unmet dependency: {}", attribute));
                }
                continue;
            }

            let ready: Vec<String> = self
                .session
                .awaiting_deps_artifacts
                .iter()
                .filter(|artifact| {
                    self.session
                        .requirements_of(artifact)
                        .all(|attribute| self.session.fulfilled_deps.contains(attribute))
                })
                .cloned()
                .collect();
            if !ready.is_empty() {
                for artifact in ready {
                    effects.extend(self.start_artifact(&artifact)?);
                }
                continue;
            }

            if !self.session.in_flight_artifacts.is_empty() {
                break;
            }
            if self.session.awaiting_deps_artifacts.is_empty() {
                self.state = FlowState::Finished;
                self.log_summary();
                effects.push(FlowEffect::Finished(self.report()));
                break;
            }

            // Stalled: accept the data of the providers that did report.
            let candidate = self
                .session
                .awaited_attributes()
                .into_iter()
                .find(|attribute| self.session.partial_fulfilled_deps.contains(attribute));
            match candidate {
                Some(attribute) => {
                    warn!(
                        "Collection stalled, accepting partially fulfilled dependency {}",
                        attribute
                    );
                    self.session.partial_fulfilled_deps.remove(&attribute);
                    self.session.fulfilled_deps.insert(attribute.clone());
                    self.session.promoted_deps.push(attribute);
                }
                None => {
                    let stuck: Vec<String> = self.session.awaiting_deps_artifacts.iter().cloned().collect();
                    for artifact in stuck {
                        self.fail(&artifact, "unmet dependency: no progress possible".to_string());
                    }
                }
            }
        }
        Ok(effects)
    }

    fn update_fulfillment(&mut self) {
        for attribute in self.session.awaited_attributes() {
            if self.session.fulfilled_deps.contains(&attribute) || self.session.unmet_deps.contains(&attribute) {
                continue;
            }
            let finished = self
                .session
                .providers
                .get(&attribute)
                .map_or(true, |providers| providers.iter().all(|p| self.session.is_done(p)));
            let known = self.session.knowledge_base.has_attribute(&attribute);

            if finished {
                self.session.partial_fulfilled_deps.remove(&attribute);
                if known {
                    debug!("Dependency {} fulfilled", attribute);
                    self.session.fulfilled_deps.insert(attribute);
                } else {
                    info!("No provider supplied {}", attribute);
                    self.session.unmet_deps.insert(attribute);
                }
            } else if known {
                self.session.partial_fulfilled_deps.insert(attribute);
            }
        }
    }

    fn start_artifact(&mut self, artifact: &str) -> ArtifactResult<Vec<FlowEffect>> {
        self.session.awaiting_deps_artifacts.remove(artifact);
        self.session.in_flight_artifacts.insert(artifact.to_string());

        let definition = match self.registry.get_artifact(artifact) {
            Ok(definition) => definition,
            Err(e) => {
                self.fail(artifact, e.to_string());
                return Ok(Vec::new());
            }
        };
        if !evaluate_all(&definition.conditions, &definition.supported_os, &self.session.knowledge_base) {
            info!("Skipping {}: conditions not met", artifact);
            self.session.in_flight_artifacts.remove(artifact);
            self.session.skipped_artifacts.insert(artifact.to_string());
            return Ok(Vec::new());
        }

        let requested_by_user = self.is_requested(artifact);
        let expanded = match ExpandedArtifact::expand(
            &definition,
            &self.session.knowledge_base,
            &self.options,
            requested_by_user,
        ) {
            Ok(expanded) => expanded,
            Err(e) => {
                self.fail(artifact, e.to_string());
                return Ok(Vec::new());
            }
        };

        let mut progress = ArtifactProgress::new(definition);
        let mut planned = Vec::new();
        for source in &expanded.sources {
            match self.build_requests(source) {
                Ok(requests) if requests.is_empty() => {
                    debug!("{} source {} expanded to nothing", artifact, source.index);
                }
                Ok(requests) => {
                    for request in requests {
                        progress.expect(SourceSlot::Source(source.index));
                        planned.push((SourceSlot::Source(source.index), request));
                    }
                }
                Err(e) => {
                    warn!("{} source {} failed: {}", artifact, source.index, e);
                    progress.errors.push(e.to_string());
                }
            }
        }
        self.progress.insert(artifact.to_string(), progress);

        if planned.is_empty() {
            return self.finalize_artifact(artifact);
        }
        debug!("Dispatching {} requests for {}", planned.len(), artifact);
        let effects = planned
            .into_iter()
            .map(|(slot, request)| {
                let correlation = Correlation::Source {
                    artifact: artifact.to_string(),
                    slot,
                };
                FlowEffect::Dispatch(self.register_dispatch(correlation, request))
            })
            .collect();
        Ok(effects)
    }

    fn build_requests(&self, source: &ExpandedSource) -> ArtifactResult<Vec<CollectionRequest>> {
        let kb = &self.session.knowledge_base;
        let ignore = self.options.ignore_interpolation_errors;

        let requests = match &source.spec {
            SourceSpec::Command(attrs) => {
                let mut lists = vec![interpolate(&attrs.cmd, kb, ignore)?];
                for arg in &attrs.args {
                    lists.push(interpolate(arg, kb, ignore)?);
                }
                cartesian_product(&lists)
                    .into_iter()
                    .filter_map(|mut combination| {
                        if combination.is_empty() {
                            return None;
                        }
                        let cmd = combination.remove(0);
                        Some(CollectionRequest::Command { cmd, args: combination })
                    })
                    .collect()
            }
            SourceSpec::File(attrs) | SourceSpec::Directory(attrs) | SourceSpec::Path(attrs) => {
                let paths = self.interpolate_paths(&attrs.paths)?;
                if paths.is_empty() {
                    return Ok(Vec::new());
                }
                vec![CollectionRequest::FileGlob {
                    paths,
                    path_type: source.path_type,
                    max_file_size: source.max_file_size,
                    fetch_content: matches!(source.spec, SourceSpec::File(_)),
                }]
            }
            SourceSpec::Grep(attrs) => {
                let paths = self.interpolate_paths(&attrs.paths)?;
                if paths.is_empty() {
                    return Ok(Vec::new());
                }
                vec![CollectionRequest::FileGrep {
                    paths,
                    path_type: source.path_type,
                    regexes: attrs.content_regex_list.clone(),
                    max_file_size: source.max_file_size,
                }]
            }
            SourceSpec::RegistryKey(attrs) => {
                let keys = self.interpolate_paths(&attrs.keys)?;
                if keys.is_empty() {
                    return Ok(Vec::new());
                }
                vec![CollectionRequest::RegistryKey { keys }]
            }
            SourceSpec::RegistryValue(attrs) => {
                let mut values = Vec::new();
                for pair in &attrs.key_value_pairs {
                    let keys = interpolate_path(&pair.key, kb, ignore)?;
                    let names = interpolate(&pair.value, kb, ignore)?;
                    for key in &keys {
                        for value in &names {
                            values.push(RegistryValueRequest {
                                key: key.clone(),
                                value: value.clone(),
                            });
                        }
                    }
                }
                if values.is_empty() {
                    return Ok(Vec::new());
                }
                vec![CollectionRequest::RegistryValue { values }]
            }
            SourceSpec::Wmi(attrs) => interpolate(&attrs.query, kb, ignore)?
                .into_iter()
                .map(|query| CollectionRequest::WmiQuery {
                    query,
                    base_object: attrs.base_object.clone(),
                })
                .collect(),
            SourceSpec::RekallPlugin(attrs) => vec![CollectionRequest::RekallPlugin {
                plugin: attrs.plugin.clone(),
                args: attrs
                    .args
                    .iter()
                    .map(|(key, value)| (key.clone(), value_to_string(value)))
                    .collect(),
            }],
            SourceSpec::ClientAction(attrs) => vec![CollectionRequest::ClientAction {
                action: attrs.client_action.clone(),
                args: attrs
                    .action_args
                    .iter()
                    .map(|(key, value)| (key.clone(), value_to_string(value)))
                    .collect(),
            }],
            SourceSpec::ArtifactGroup(attrs) => vec![CollectionRequest::SubArtifactCollection {
                names: attrs.names.clone(),
                knowledge_base: kb.clone(),
                fetch_files: false,
            }],
            SourceSpec::ArtifactFiles(attrs) => vec![CollectionRequest::SubArtifactCollection {
                names: attrs.artifact_list.clone(),
                knowledge_base: kb.clone(),
                fetch_files: true,
            }],
        };
        Ok(requests)
    }

    fn interpolate_paths(&self, templates: &[String]) -> ArtifactResult<Vec<String>> {
        let mut paths: Vec<String> = Vec::new();
        for template in templates {
            for path in interpolate_path(template, &self.session.knowledge_base, self.options.ignore_interpolation_errors)? {
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }
        Ok(paths)
    }

    fn on_source_response(
        &mut self,
        artifact: &str,
        slot: SourceSlot,
        outcome: Result<CollectionResponse, String>,
    ) -> ArtifactResult<Vec<FlowEffect>> {
        let Some(progress) = self.progress.get_mut(artifact) else {
            debug!("Ignoring response for {} which is no longer in flight", artifact);
            return Ok(Vec::new());
        };

        match outcome {
            Ok(CollectionResponse::Payloads(payloads)) => {
                if slot == SourceSlot::Fallback {
                    progress.fallback_received += payloads.len();
                }
                progress.payload_slots.insert(slot);
                progress.payloads.entry(slot).or_default().extend(payloads);
            }
            Ok(CollectionResponse::SubCollection {
                results,
                files,
                knowledge_base,
            }) => {
                for conflict in self.session.knowledge_base.absorb(&knowledge_base) {
                    warn!("{}", conflict);
                }
                if slot == SourceSlot::Fallback {
                    progress.fallback_received += results.len() + files.as_ref().map_or(0, Vec::len);
                }
                if let Some(files) = files {
                    progress.payload_slots.insert(slot);
                    progress.payloads.entry(slot).or_default().extend(files);
                }
                progress.sub_results.entry(slot).or_default().extend(results);
            }
            Ok(CollectionResponse::KnowledgeBase(_)) => {
                progress.errors.push("unexpected knowledge base response".to_string());
            }
            Err(reason) => {
                warn!("Collection request for {} failed: {}", artifact, reason);
                progress.errors.push(reason);
            }
        }

        let mut effects = Vec::new();
        // All responses of a slot are in: parse them together.
        if progress.answered(slot) == 0 {
            effects.extend(self.process_slot(artifact, slot));
        }
        if self.progress.get(artifact).is_some_and(|p| p.is_settled()) {
            effects.extend(self.finalize_artifact(artifact)?);
        }
        Ok(effects)
    }

    fn process_slot(&mut self, artifact: &str, slot: SourceSlot) -> Vec<FlowEffect> {
        let Some(progress) = self.progress.get_mut(artifact) else {
            return Vec::new();
        };
        let mut payloads = progress.payloads.remove(&slot).unwrap_or_default();
        if slot == SourceSlot::Fallback {
            if let Some(fallback) = self.fallbacks.get(artifact) {
                payloads = fallback.select(payloads);
            }
        }
        let sub_results = progress.sub_results.remove(&slot).unwrap_or_default();
        let had_payloads = progress.payload_slots.remove(&slot);

        let mut effects = Vec::new();
        for result in sub_results {
            if let CollectionResult::Parsed(value) = &result.result {
                progress.parsed.push(value.clone());
            }
            effects.push(FlowEffect::Emit(result));
        }

        if had_payloads {
            let parsed = apply_parsers(&self.parsers, artifact, payloads, &self.session.knowledge_base);
            progress.parsed.extend(parsed.parsed.iter().cloned());
            let results = if self.options.apply_parsers {
                parsed.into_results(artifact)
            } else {
                parsed
                    .raw
                    .into_iter()
                    .map(|raw| CollectedResult::new(artifact, CollectionResult::Raw(raw)))
                    .collect()
            };
            effects.extend(results.into_iter().map(FlowEffect::Emit));
        }
        effects
    }

    /// Called once every request of the artifact has been answered.
    fn finalize_artifact(&mut self, artifact: &str) -> ArtifactResult<Vec<FlowEffect>> {
        let Some(progress) = self.progress.get_mut(artifact) else {
            return Ok(Vec::new());
        };
        if progress.in_fallback && progress.errors.is_empty() && progress.fallback_received == 0 {
            progress.errors.push("fallback found nothing".to_string());
        }

        if !progress.errors.is_empty() && !progress.in_fallback && !self.session.called_fallbacks.contains(artifact) {
            let requests = self
                .fallbacks
                .get(artifact)
                .map(|fallback| fallback.requests(&self.session.knowledge_base))
                .unwrap_or_default();
            if !requests.is_empty() {
                info!("{} failed ({}), trying fallback", artifact, progress.errors.join("; "));
                progress.errors.clear();
                progress.in_fallback = true;
                progress.pending.insert(SourceSlot::Fallback, requests.len());
                self.session.called_fallbacks.insert(artifact.to_string());

                let effects = requests
                    .into_iter()
                    .map(|request| {
                        let correlation = Correlation::Source {
                            artifact: artifact.to_string(),
                            slot: SourceSlot::Fallback,
                        };
                        FlowEffect::Dispatch(self.register_dispatch(correlation, request))
                    })
                    .collect();
                return Ok(effects);
            }
        }

        let Some(mut progress) = self.progress.remove(artifact) else {
            return Ok(Vec::new());
        };
        let definition = progress.definition.clone();
        if !definition.provides.is_empty() && !progress.parsed.is_empty() {
            match merge_results(&mut self.session.knowledge_base, &definition, &progress.parsed) {
                Ok(report) if !report.updated.is_empty() => {
                    let updated: Vec<String> = report.updated.into_iter().collect();
                    debug!("{} updated {}", artifact, updated.join(", "));
                }
                Ok(_) => {}
                Err(e) => progress.errors.push(e.to_string()),
            }
        }

        if progress.errors.is_empty() {
            self.session.in_flight_artifacts.remove(artifact);
            self.session.completed_artifacts.insert(artifact.to_string());
            debug!("Completed {}", artifact);
        } else {
            self.fail(artifact, progress.errors.join("; "));
        }
        Ok(Vec::new())
    }

    fn register_dispatch(&mut self, correlation: Correlation, request: CollectionRequest) -> Dispatch {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(id, correlation.clone());
        Dispatch {
            id,
            correlation,
            request,
        }
    }

    fn fail(&mut self, artifact: &str, reason: String) {
        self.session.in_flight_artifacts.remove(artifact);
        self.session.awaiting_deps_artifacts.remove(artifact);
        if self.is_requested(artifact) {
            warn!("Artifact {} failed: {}", artifact, reason);
        } else {
            info!("Dependency {} failed: {}", artifact, reason);
        }
        self.session.failure_count += 1;
        self.session.artifacts_failed.insert(artifact.to_string(), reason);
    }

    fn is_requested(&self, artifact: &str) -> bool {
        self.requested.iter().any(|name| name == artifact)
    }

    /// Heavyweight artifacts are left out of a lightweight bootstrap.
    fn is_excluded(&self, artifact: &str) -> ArtifactResult<bool> {
        if self.mode != (FlowMode::KnowledgeBase { lightweight: true }) {
            return Ok(false);
        }
        let definition = self.registry.get_artifact(artifact)?;
        Ok(self.bootstrap.is_heavyweight(artifact, &definition.labels))
    }

    fn os(&self) -> ArtifactResult<String> {
        self.session
            .knowledge_base
            .os
            .clone()
            .ok_or_else(|| ArtifactError::KnowledgeBaseUninitialized("os is not set".to_string()))
    }

    fn log_summary(&self) {
        info!(
            "Collection finished: {} completed, {} failed, {} skipped",
            self.session.completed_artifacts.len(),
            self.session.artifacts_failed.len(),
            self.session.skipped_artifacts.len()
        );
    }
}

fn dedup(names: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in names {
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

fn normalize_os(system: &str) -> Option<&'static str> {
    let system = system.trim();
    if let Some(os) = SUPPORTED_OS.iter().find(|os| os.eq_ignore_ascii_case(system)) {
        return Some(os);
    }
    match system.to_ascii_lowercase().as_str() {
        "macos" | "mac os x" | "osx" => Some("Darwin"),
        _ => None,
    }
}

/// Fill the fixed knowledge base fields from a platform info response.
/// Fields already set are kept.
fn apply_platform_info(kb: &mut KnowledgeBase, payloads: &[ResponsePayload]) {
    for payload in payloads {
        let ResponsePayload::Dict(info) = payload else {
            continue;
        };
        let text = |key: &str| info.get(key).and_then(|v| v.as_str()).map(str::to_string);

        if kb.os.is_none() {
            kb.os = text("system").as_deref().and_then(normalize_os).map(str::to_string);
        }
        if kb.fqdn.is_none() {
            kb.fqdn = text("fqdn");
        }
        if kb.os_release.is_none() {
            kb.os_release = text("release");
        }
        if let Some(version) = text("version") {
            let mut parts = version.split('.').map(|p| p.trim().parse::<u32>().ok());
            let major = parts.next().flatten();
            let minor = parts.next().flatten();
            kb.os_major_version = kb.os_major_version.or(major);
            kb.os_minor_version = kb.os_minor_version.or(minor);
        }
    }
}
