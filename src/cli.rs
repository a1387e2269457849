use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use crate::constants::DEFAULT_CONFIG_FILE;

/// Command-line arguments for the artifact engine.
///
/// Global options control logging and the engine configuration file; the
/// work itself is selected with a subcommand.
#[derive(Parser, Debug)]
#[clap(name = "artifact-engine", about = "Forensic artifact collection engine")]
pub struct Args {
    /// Verbose logging
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Path to engine configuration YAML file
    #[clap(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommands
    #[clap(subcommand)]
    pub command: Commands,
}

/// Operating systems artifact definitions can target.
#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub enum TargetOS {
    /// Microsoft Windows
    Windows,
    /// Linux distributions
    Linux,
    /// Apple macOS
    Darwin,
}

impl std::fmt::Display for TargetOS {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetOS::Windows => write!(f, "Windows"),
            TargetOS::Linux => write!(f, "Linux"),
            TargetOS::Darwin => write!(f, "Darwin"),
        }
    }
}

/// Extra definition sources, shared by every subcommand reading the registry.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct DefinitionOpts {
    /// Artifact definition files or directories (repeatable)
    #[clap(short = 'd', long = "definitions")]
    pub definitions: Vec<PathBuf>,

    /// Do not load the built-in definitions
    #[clap(long)]
    pub no_builtin: bool,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Collect artifacts from the local host
    Collect(CollectOpts),

    /// Load and validate artifact definitions
    Validate {
        #[clap(flatten)]
        definitions: DefinitionOpts,
    },

    /// Print the order artifacts would be collected in
    Order {
        /// Artifacts to arrange (repeatable)
        #[clap(short = 'a', long = "artifact", required = true)]
        artifacts: Vec<String>,

        /// Target OS
        #[clap(long, value_enum)]
        os: TargetOS,

        #[clap(flatten)]
        definitions: DefinitionOpts,
    },

    /// Print every loaded definition as YAML
    Dump {
        #[clap(flatten)]
        definitions: DefinitionOpts,
    },

    /// Create a default configuration file
    InitConfig {
        /// Path to output configuration file
        #[clap(default_value = DEFAULT_CONFIG_FILE)]
        path: PathBuf,
    },

    /// Build and print the knowledge base of the local host
    KnowledgeBase {
        /// Identifier the snapshot is stored under (default: hostname)
        #[clap(long)]
        host_id: Option<String>,

        /// Include heavyweight knowledge base artifacts
        #[clap(long)]
        full: bool,

        #[clap(flatten)]
        definitions: DefinitionOpts,
    },
}

/// Options for the collect subcommand.
#[derive(ClapArgs, Debug)]
pub struct CollectOpts {
    /// Artifacts to collect (repeatable)
    #[clap(short = 'a', long = "artifact", required = true)]
    pub artifacts: Vec<String>,

    /// Identifier the knowledge base snapshot is stored under (default: hostname)
    #[clap(long)]
    pub host_id: Option<String>,

    #[clap(flatten)]
    pub definitions: DefinitionOpts,

    /// Fail when a requested artifact could not be collected
    #[clap(long)]
    pub require_complete: bool,

    /// Return raw responses instead of parsed values
    #[clap(long)]
    pub no_parsers: bool,

    /// Skip paths whose interpolation fails instead of failing the source
    #[clap(long)]
    pub ignore_interpolation_errors: bool,

    /// Maximum bytes fetched per file
    #[clap(long)]
    pub max_file_size: Option<u64>,

    /// Read file-like sources through the raw filesystem parser
    #[clap(long)]
    pub use_tsk: bool,

    /// Write collected results as JSON to this file
    #[clap(short, long)]
    pub output: Option<PathBuf>,

    /// Write the collection summary as JSON to this file
    #[clap(long)]
    pub summary: Option<PathBuf>,
}
