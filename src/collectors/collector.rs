use std::sync::Arc;

use anyhow::{Context, Result};
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, info, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::collectors::failure_tracker::FailureTracker;
use crate::collectors::fallbacks::FallbackRegistry;
use crate::collectors::flow::{ArtifactCollectionFlow, BootstrapSettings, CollectionReport, FlowEffect, FlowEvent};
use crate::collectors::transport::{
    CollectionRequest, CollectionResponse, CollectionTransport, Dispatch, RequestId,
};
use crate::config::{CollectionOptions, PathType};
use crate::constants::DEFAULT_MAX_CONCURRENT_REQUESTS;
use crate::errors::{ArtifactError, ArtifactResult};
use crate::knowledge_base::{KnowledgeBase, KnowledgeBaseStore};
use crate::models::{CollectedResult, CollectionResult, ResponsePayload};
use crate::parsers::ParserRegistry;
use crate::registry::ArtifactRegistry;

/// Everything a finished collection produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionOutput {
    pub results: Vec<CollectedResult>,
    pub report: CollectionReport,
}

/// Drives collection flows against a transport.
///
/// Requests of one flow run concurrently, bounded by a semaphore; the flow
/// itself only ever sees one event at a time. Sub-artifact collections and
/// knowledge base bootstraps are run here as nested flows.
pub struct ArtifactCollector {
    registry: Arc<ArtifactRegistry>,
    parsers: Arc<ParserRegistry>,
    fallbacks: Arc<FallbackRegistry>,
    transport: Arc<dyn CollectionTransport>,
    snapshots: Option<Arc<dyn KnowledgeBaseStore>>,
    bootstrap: BootstrapSettings,
    failures: FailureTracker,
    limiter: Arc<Semaphore>,
}

impl ArtifactCollector {
    /// Collector with the built-in parsers and fallbacks.
    pub fn new(registry: Arc<ArtifactRegistry>, transport: Arc<dyn CollectionTransport>) -> Self {
        Self {
            registry,
            parsers: Arc::new(ParserRegistry::with_builtin_parsers()),
            fallbacks: Arc::new(FallbackRegistry::with_builtin_fallbacks()),
            transport,
            snapshots: None,
            bootstrap: BootstrapSettings::default(),
            failures: FailureTracker::new(),
            limiter: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_REQUESTS)),
        }
    }

    pub fn with_parsers(mut self, parsers: ParserRegistry) -> Self {
        self.parsers = Arc::new(parsers);
        self
    }

    pub fn with_fallbacks(mut self, fallbacks: FallbackRegistry) -> Self {
        self.fallbacks = Arc::new(fallbacks);
        self
    }

    pub fn with_snapshot_store(mut self, store: Arc<dyn KnowledgeBaseStore>) -> Self {
        self.snapshots = Some(store);
        self
    }

    pub fn with_bootstrap_settings(mut self, bootstrap: BootstrapSettings) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    pub fn with_max_concurrent_requests(mut self, max_concurrent: usize) -> Self {
        self.limiter = Arc::new(Semaphore::new(max_concurrent.max(1)));
        self
    }

    pub fn failure_tracker(&self) -> &FailureTracker {
        &self.failures
    }

    /// Collect `names` from `host_id` and wait for every result.
    pub async fn collect_artifacts(
        &self,
        host_id: &str,
        names: &[String],
        options: &CollectionOptions,
    ) -> ArtifactResult<CollectionOutput> {
        let (sender, receiver) = mpsc::unbounded();
        let report = self
            .run_collection(host_id, names.to_vec(), options.clone(), sender)
            .await?;
        let results: Vec<CollectedResult> = receiver.collect().await;
        info!("Collected {} results from {}", results.len(), host_id);
        Ok(CollectionOutput { results, report })
    }

    /// Collect in a background task, streaming results as each source is
    /// processed. The handle resolves to the session report.
    pub fn collect_artifacts_stream(
        self: &Arc<Self>,
        host_id: String,
        names: Vec<String>,
        options: CollectionOptions,
    ) -> (UnboundedReceiver<CollectedResult>, JoinHandle<ArtifactResult<CollectionReport>>) {
        let (sender, receiver) = mpsc::unbounded();
        let collector = Arc::clone(self);
        let handle = tokio::spawn(async move { collector.run_collection(&host_id, names, options, sender).await });
        (receiver, handle)
    }

    /// Discover the platform of `host_id` and collect its knowledge base.
    /// The result is persisted when a snapshot store is configured.
    pub async fn initialize_knowledge_base(
        &self,
        host_id: &str,
        options: &CollectionOptions,
    ) -> ArtifactResult<KnowledgeBase> {
        self.bootstrap_knowledge_base(host_id, options.clone()).await
    }

    async fn run_collection(
        &self,
        host_id: &str,
        names: Vec<String>,
        options: CollectionOptions,
        sender: UnboundedSender<CollectedResult>,
    ) -> ArtifactResult<CollectionReport> {
        let seed = self.load_snapshot(host_id);
        let flow = ArtifactCollectionFlow::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.parsers),
            Arc::clone(&self.fallbacks),
            names,
            seed.clone(),
            options.clone(),
        );
        let report = self.drive(flow, host_id, &options, sender).await?;
        self.record_failures(&report).await;

        if seed.as_ref() != Some(&report.knowledge_base) && report.knowledge_base.is_initialized() {
            self.save_snapshot(host_id, &report.knowledge_base);
        }
        report.into_result()
    }

    fn bootstrap_knowledge_base<'a>(
        &'a self,
        host_id: &'a str,
        options: CollectionOptions,
    ) -> BoxFuture<'a, ArtifactResult<KnowledgeBase>> {
        async move {
            info!("Initializing knowledge base for {}", host_id);
            let flow = ArtifactCollectionFlow::for_knowledge_base(
                Arc::clone(&self.registry),
                Arc::clone(&self.parsers),
                Arc::clone(&self.fallbacks),
                None,
                self.bootstrap.clone(),
                options.clone(),
            );
            // Bootstrap results only feed the knowledge base.
            let (sender, _receiver) = mpsc::unbounded();
            let report = self.drive(flow, host_id, &options, sender).await?;
            self.record_failures(&report).await;

            let kb = report.knowledge_base;
            if !kb.is_initialized() {
                return Err(ArtifactError::KnowledgeBaseUninitialized(format!(
                    "bootstrap of {} did not determine the OS",
                    host_id
                )));
            }
            self.save_snapshot(host_id, &kb);
            Ok(kb)
        }
        .boxed()
    }

    /// Run `flow` to completion, executing its dispatches concurrently.
    fn drive<'a>(
        &'a self,
        mut flow: ArtifactCollectionFlow,
        host_id: &'a str,
        options: &'a CollectionOptions,
        sender: UnboundedSender<CollectedResult>,
    ) -> BoxFuture<'a, ArtifactResult<CollectionReport>> {
        async move {
            let mut in_flight = FuturesUnordered::new();
            let mut effects = flow.handle_event(FlowEvent::Start)?;
            loop {
                for effect in effects.drain(..) {
                    match effect {
                        FlowEffect::Dispatch(dispatch) => in_flight.push(self.execute(dispatch, host_id, options)),
                        FlowEffect::Emit(result) => {
                            // A dropped receiver only means nobody wants the results.
                            let _ = sender.unbounded_send(result);
                        }
                        FlowEffect::Finished(report) => return Ok(report),
                    }
                }
                let Some((id, outcome)) = in_flight.next().await else {
                    warn!("Collection flow stopped with no outstanding requests");
                    return Ok(flow.report());
                };
                effects = flow.handle_event(FlowEvent::Response { id, outcome })?;
            }
        }
        .boxed()
    }

    fn execute<'a>(
        &'a self,
        dispatch: Dispatch,
        host_id: &'a str,
        options: &'a CollectionOptions,
    ) -> BoxFuture<'a, (RequestId, Result<CollectionResponse, String>)> {
        async move {
            let Dispatch { id, request, .. } = dispatch;
            let outcome = match request {
                CollectionRequest::SubArtifactCollection {
                    names,
                    knowledge_base,
                    fetch_files,
                } => {
                    self.collect_sub_artifacts(names, knowledge_base, fetch_files, host_id, options)
                        .await
                }
                CollectionRequest::InitializeKnowledgeBase { lightweight } => {
                    let options = CollectionOptions {
                        lightweight,
                        ..options.clone()
                    };
                    self.bootstrap_knowledge_base(host_id, options)
                        .await
                        .map(CollectionResponse::KnowledgeBase)
                        .map_err(|e| e.to_string())
                }
                request => self
                    .send(&request)
                    .await
                    .map(CollectionResponse::Payloads)
                    .map_err(|e| format!("{:#}", e)),
            };
            (id, outcome)
        }
        .boxed()
    }

    fn collect_sub_artifacts<'a>(
        &'a self,
        names: Vec<String>,
        knowledge_base: KnowledgeBase,
        fetch_files: bool,
        host_id: &'a str,
        options: &'a CollectionOptions,
    ) -> BoxFuture<'a, Result<CollectionResponse, String>> {
        async move {
            debug!("Collecting sub-artifacts {}", names.join(", "));
            let sub_options = CollectionOptions {
                require_complete: false,
                ..options.clone()
            };
            let flow = ArtifactCollectionFlow::new(
                Arc::clone(&self.registry),
                Arc::clone(&self.parsers),
                Arc::clone(&self.fallbacks),
                names,
                Some(knowledge_base),
                sub_options.clone(),
            );
            let (sender, receiver) = mpsc::unbounded();
            let report = self
                .drive(flow, host_id, &sub_options, sender)
                .await
                .map_err(|e| e.to_string())?;
            let results: Vec<CollectedResult> = receiver.collect().await;

            if report.completed.is_empty() && !report.failed.is_empty() {
                let reasons: Vec<String> = report
                    .failed
                    .iter()
                    .map(|(name, reason)| format!("{}: {}", name, reason))
                    .collect();
                return Err(format!("every sub-artifact failed ({})", reasons.join("; ")));
            }
            let knowledge_base = report.knowledge_base;
            if !fetch_files {
                return Ok(CollectionResponse::SubCollection {
                    results,
                    files: None,
                    knowledge_base,
                });
            }

            let paths = paths_from_results(&results);
            let files = if paths.is_empty() {
                Vec::new()
            } else {
                let request = CollectionRequest::FileGlob {
                    paths,
                    path_type: if options.use_tsk { PathType::Tsk } else { options.path_type },
                    max_file_size: options.max_file_size,
                    fetch_content: true,
                };
                self.send(&request).await.map_err(|e| format!("{:#}", e))?
            };
            Ok(CollectionResponse::SubCollection {
                results: Vec::new(),
                files: Some(files),
                knowledge_base,
            })
        }
        .boxed()
    }

    async fn send(&self, request: &CollectionRequest) -> Result<Vec<ResponsePayload>> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .context("Request limiter closed")?;
        debug!("Sending {} request", request.kind());
        self.transport
            .send(request)
            .await
            .with_context(|| format!("{} request failed", request.kind()))
    }

    async fn record_failures(&self, report: &CollectionReport) {
        for (artifact, reason) in &report.failed {
            self.failures.record_failure(artifact, reason).await;
        }
    }

    fn load_snapshot(&self, host_id: &str) -> Option<KnowledgeBase> {
        let store = self.snapshots.as_ref()?;
        match store.read(host_id) {
            Ok(Some(kb)) => {
                debug!("Seeding knowledge base of {} from snapshot", host_id);
                Some(kb)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Ignoring knowledge base snapshot of {}: {}", host_id, e);
                None
            }
        }
    }

    fn save_snapshot(&self, host_id: &str, kb: &KnowledgeBase) {
        let Some(store) = self.snapshots.as_ref() else {
            return;
        };
        match store.write(host_id, kb) {
            Ok(version) => info!("Saved knowledge base snapshot {} for {}", version, host_id),
            Err(e) => warn!("Failed to save knowledge base snapshot for {}: {}", host_id, e),
        }
    }
}

/// File paths reported by a nested collection, for download.
fn paths_from_results(results: &[CollectedResult]) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for result in results {
        let CollectionResult::Raw(payload) = &result.result else {
            continue;
        };
        let path = match payload {
            ResponsePayload::Stat(stat) if !stat.is_dir => Some(stat.path.clone()),
            ResponsePayload::File(file) => Some(file.path.clone()),
            ResponsePayload::Grep(grep) => Some(grep.path.clone()),
            ResponsePayload::Registry(entry) => entry
                .data
                .clone()
                .filter(|data| data.contains('\\') || data.starts_with('/')),
            _ => None,
        };
        if let Some(path) = path {
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
    }
    paths
}
