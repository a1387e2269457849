// Re-export all items from the submodules
pub mod artifact_types;
mod collection_config;
mod default_configs;
pub mod definitions;
mod env_vars;

// Re-export artifact types
pub use artifact_types::{PathType, SourceKind, SourceSpec};

// Re-export definitions and their YAML format
pub use definitions::{
    dump_definitions_to_yaml,
    load_definitions_from_file,
    load_definitions_from_yaml,
    ArtifactDefinition,
    ArtifactSource,
};

// Re-export engine config
pub use collection_config::{
    CollectionOptions,
    EngineConfig,
    load_or_create_config,
};

pub use default_configs::BuiltinDefinitionStore;

// Re-export environment variable functions
pub use env_vars::{expand_windows_env_vars, normalize_path_for_os};
