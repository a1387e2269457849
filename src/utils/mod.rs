//! Utility functions shared by the transports and the binary.
//!
//! ## Components
//!
//! - **Hashing**: SHA-256 calculation for collected files
//! - **Summary**: JSON report of a finished collection
//!
//! ### Generating File Hashes
//!
//! ```no_run
//! use artifact_engine::utils::hash::calculate_sha256;
//! use std::path::Path;
//!
//! # fn example() -> anyhow::Result<()> {
//! let file_path = Path::new("/etc/passwd");
//! let max_size = 1024 * 1024 * 1024; // 1GB limit
//!
//! match calculate_sha256(file_path, max_size)? {
//!     Some(hash) => println!("SHA-256: {}", hash),
//!     None => println!("File exceeds size limit"),
//! }
//! # Ok(())
//! # }
//! ```

/// Collection summary generation and reporting
pub mod summary;

/// Cryptographic hash calculation utilities
pub mod hash;
