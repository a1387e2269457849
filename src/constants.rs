//! Global constants for the artifact engine.
//!
//! This module centralizes hardcoded values so that limits and well-known
//! names stay in one place.

/// OS tags accepted in `supported_os` lists and in the knowledge base `os` field
pub const SUPPORTED_OS: &[&str] = &["Windows", "Linux", "Darwin"];

/// Default maximum number of bytes fetched per collected file (500MB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// Client action used to learn the platform of a host before bootstrap
pub const PLATFORM_INFO_ACTION: &str = "GetPlatformInfo";

/// Client action enumerating running processes
pub const LIST_PROCESSES_ACTION: &str = "ListProcesses";

/// Label marking artifacts that are expensive to collect
pub const HEAVYWEIGHT_LABEL: &str = "Heavyweight";

/// Prefix of knowledge base attributes holding Windows environment variables
pub const ENVIRON_PREFIX: &str = "environ_";

/// Maximum number of matches returned per grep request
pub const MAX_GREP_MATCHES: usize = 1000;

/// Buffer size for hashing collected files (1MB)
pub const HASH_BUFFER_SIZE: usize = 1024 * 1024;

/// File name of the default engine configuration
pub const DEFAULT_CONFIG_FILE: &str = "artifact_engine.yaml";

/// File name prefix of versioned knowledge base snapshots
pub const SNAPSHOT_FILE_PREFIX: &str = "kb-";

/// Default number of transport requests in flight at once
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 8;
