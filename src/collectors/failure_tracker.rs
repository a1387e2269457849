//! Failed artifact tracking and end-of-session reporting
//!
//! Collects the artifacts a session could not collect together with the
//! reason, and prints a summary with guidance when the failures look like
//! missing privileges.

use log::warn;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Tracks artifacts that failed across one or more collection sessions
#[derive(Debug, Clone, Default)]
pub struct FailureTracker {
    failures: Arc<Mutex<BTreeMap<String, String>>>,
}

impl FailureTracker {
    /// Create a new failure tracker
    pub fn new() -> Self {
        Self {
            failures: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Record a failure for an artifact. A later reason replaces an earlier one.
    pub async fn record_failure(&self, artifact_name: &str, reason: &str) {
        let mut failures = self.failures.lock().await;
        failures.insert(artifact_name.to_string(), reason.to_string());
    }

    /// Check if an error message indicates a permission problem
    pub fn is_permission_error(error_msg: &str) -> bool {
        error_msg.contains("Permission denied")
            || error_msg.contains("PermissionDenied")
            || error_msg.contains("Access is denied")
            || error_msg.contains("elevated privileges")
    }

    pub async fn failure_count(&self) -> usize {
        self.failures.lock().await.len()
    }

    pub async fn failures(&self) -> BTreeMap<String, String> {
        self.failures.lock().await.clone()
    }

    /// Artifacts whose failure looks like missing privileges
    pub async fn permission_failures(&self) -> Vec<String> {
        let failures = self.failures.lock().await;
        failures
            .iter()
            .filter(|(_, reason)| Self::is_permission_error(reason))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Report failures and, for permission problems, how to fix them
    pub async fn report_failures(&self) {
        let failures = self.failures.lock().await;

        if failures.is_empty() {
            return;
        }

        warn!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        warn!("⚠️  Collection Failures Summary");
        warn!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        warn!("");
        warn!("The following {} artifact(s) could not be collected:", failures.len());
        warn!("");

        for (artifact, reason) in failures.iter() {
            warn!("  • {}: {}", artifact, reason);
        }

        let needs_elevation = failures.values().any(|reason| Self::is_permission_error(reason));
        if needs_elevation {
            warn!("");
            warn!("Some failures were caused by insufficient permissions.");

            #[cfg(any(target_os = "linux", target_os = "macos"))]
            {
                warn!(
                    "  Run with sudo: sudo {}",
                    std::env::args().collect::<Vec<_>>().join(" ")
                );
            }

            #[cfg(target_os = "windows")]
            {
                warn!("  Run as Administrator (right-click and 'Run as administrator')");
            }
        }

        warn!("");
        warn!("Note: Collection continued for the remaining artifacts.");
        warn!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }
}
