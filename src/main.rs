use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use log::{info, warn, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use tokio::runtime::Runtime;

use artifact_engine::artifacts::arrange;
use artifact_engine::cli::{Args, CollectOpts, Commands, DefinitionOpts};
use artifact_engine::collectors::collector::{ArtifactCollector, CollectionOutput};
use artifact_engine::collectors::flow::BootstrapSettings;
use artifact_engine::collectors::local::LocalTransport;
use artifact_engine::config::{load_or_create_config, CollectionOptions, EngineConfig};
use artifact_engine::knowledge_base::JsonSnapshotStore;
use artifact_engine::registry::ArtifactRegistry;
use artifact_engine::utils::summary;

fn main() -> Result<()> {
    // Parse arguments
    let args = Args::parse();

    // Initialize logging
    initialize_logging(args.verbose)?;

    if let Commands::InitConfig { path } = &args.command {
        return init_config(path);
    }

    let config = load_or_create_config(args.config.as_deref())?;

    match args.command {
        Commands::Collect(opts) => collect(&config, opts),
        Commands::Validate { definitions } => {
            let registry = build_registry(&config, &definitions)?;
            info!("{} artifact definitions are valid", registry.len());
            Ok(())
        }
        Commands::Order {
            artifacts,
            os,
            definitions,
        } => {
            let registry = build_registry(&config, &definitions)?;
            let arranged = arrange(&registry, &os.to_string(), &artifacts, |_| false)?;
            for (index, name) in arranged.order.iter().enumerate() {
                println!("{:>3}. {}", index + 1, name);
            }
            for name in &arranged.unreachable_artifacts {
                warn!("Dropped {}: dependencies cannot be provided on {}", name, os);
            }
            if !arranged.unreachable_attributes.is_empty() {
                warn!(
                    "Attributes without a provider: {}",
                    arranged.unreachable_attributes.join(", ")
                );
            }
            Ok(())
        }
        Commands::Dump { definitions } => {
            let registry = build_registry(&config, &definitions)?;
            print!("{}", registry.dump_yaml()?);
            Ok(())
        }
        Commands::KnowledgeBase {
            host_id,
            full,
            definitions,
        } => {
            let registry = build_registry(&config, &definitions)?;
            let collector = build_collector(&config, registry);
            let host_id = resolve_host_id(host_id)?;
            let options = CollectionOptions {
                lightweight: !full,
                ..config.collection.clone()
            };

            let runtime = Runtime::new().context("Failed to create async runtime")?;
            let kb = runtime.block_on(collector.initialize_knowledge_base(&host_id, &options))?;
            runtime.block_on(collector.failure_tracker().report_failures());
            println!(
                "{}",
                serde_json::to_string_pretty(&kb).context("Failed to serialize knowledge base")?
            );
            Ok(())
        }
        Commands::InitConfig { .. } => Ok(()),
    }
}

/// Initialize logging with the specified verbosity level
fn initialize_logging(verbose: bool) -> Result<()> {
    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context("Failed to initialize logger")?;
    Ok(())
}

fn init_config(path: &Path) -> Result<()> {
    info!("Creating default configuration file at {}", path.display());
    EngineConfig::default().save_to_yaml_file(path)?;
    info!("Configuration created successfully");
    Ok(())
}

/// Registry over the configured definitions plus those given on the command line
fn build_registry(config: &EngineConfig, opts: &DefinitionOpts) -> Result<Arc<ArtifactRegistry>> {
    let mut config = config.clone();
    config.definition_paths.extend(opts.definitions.iter().cloned());
    if opts.no_builtin {
        config.use_builtin_definitions = false;
    }
    let registry = ArtifactRegistry::from_config(&config).context("Failed to load artifact definitions")?;
    Ok(Arc::new(registry))
}

fn build_collector(config: &EngineConfig, registry: Arc<ArtifactRegistry>) -> ArtifactCollector {
    let mut collector = ArtifactCollector::new(registry, Arc::new(LocalTransport::new()))
        .with_bootstrap_settings(BootstrapSettings::from(config));
    if let Some(dir) = &config.snapshot_dir {
        collector = collector.with_snapshot_store(Arc::new(JsonSnapshotStore::new(dir)));
    }
    collector
}

fn resolve_host_id(host_id: Option<String>) -> Result<String> {
    match host_id {
        Some(id) => Ok(id),
        None => Ok(hostname::get()
            .context("Failed to read hostname")?
            .to_string_lossy()
            .into_owned()),
    }
}

fn collect(config: &EngineConfig, opts: CollectOpts) -> Result<()> {
    let registry = build_registry(config, &opts.definitions)?;
    let collector = build_collector(config, registry);
    let host_id = resolve_host_id(opts.host_id.clone())?;

    let mut options = config.collection.clone();
    options.require_complete |= opts.require_complete;
    options.ignore_interpolation_errors |= opts.ignore_interpolation_errors;
    options.use_tsk |= opts.use_tsk;
    if opts.no_parsers {
        options.apply_parsers = false;
    }
    if let Some(max_file_size) = opts.max_file_size {
        options.max_file_size = max_file_size;
    }

    info!("Collecting {} artifact(s) from {}", opts.artifacts.len(), host_id);
    let started = Utc::now();
    let runtime = Runtime::new().context("Failed to create async runtime")?;
    let outcome = runtime.block_on(collector.collect_artifacts(&host_id, &opts.artifacts, &options));
    runtime.block_on(collector.failure_tracker().report_failures());
    let CollectionOutput { results, report } = outcome?;

    match &opts.output {
        Some(path) => {
            let json = serde_json::to_string_pretty(&results).context("Failed to serialize results")?;
            fs::write(path, json).context(format!("Failed to write results to {}", path.display()))?;
            info!("Wrote {} results to {}", results.len(), path.display());
        }
        None => {
            for (artifact, counts) in summary::count_results(&results) {
                println!(
                    "{}: {} raw, {} parsed, {} anomalies",
                    artifact, counts.raw, counts.parsed, counts.anomalies
                );
            }
        }
    }

    if let Some(path) = &opts.summary {
        let json = summary::create_collection_summary(&host_id, started, &report, &results)?;
        fs::write(path, json).context(format!("Failed to write summary to {}", path.display()))?;
        info!("Wrote collection summary to {}", path.display());
    }

    info!(
        "Collection finished: {} completed, {} failed, {} skipped",
        report.completed.len(),
        report.failed.len(),
        report.skipped.len()
    );
    Ok(())
}
