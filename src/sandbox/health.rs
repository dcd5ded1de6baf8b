//! Sandbox liveness probing.

use super::{SandboxClient, SandboxError, SandboxHandle};
use crate::models::ErrorKind;
use std::time::Duration;
use tracing::debug;

/// Snippet executed to check that the environment still answers.
pub const PROBE_SNIPPET: &str = "print('health_check')";

/// Result of a liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unresponsive,
    NotFound,
}

impl HealthStatus {
    /// Failure kind to recover from, if unhealthy.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            HealthStatus::Healthy => None,
            HealthStatus::Unresponsive => Some(ErrorKind::Timeout),
            HealthStatus::NotFound => Some(ErrorKind::NotFound),
        }
    }
}

/// Probes a sandbox with a trivial snippet under a timeout.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    probe_timeout: Duration,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl HealthMonitor {
    pub fn new(probe_timeout: Duration) -> Self {
        Self { probe_timeout }
    }

    /// Check whether the environment behind `handle` answers.
    ///
    /// Does not change the handle; the caller decides what to do with an
    /// unhealthy result.
    pub async fn probe(&self, client: &dyn SandboxClient, handle: &SandboxHandle) -> HealthStatus {
        if !handle.is_usable() {
            return HealthStatus::NotFound;
        }

        let status = match tokio::time::timeout(self.probe_timeout, client.execute(handle, PROBE_SNIPPET)).await {
            Err(_) => {
                debug!("Health probe timed out after {:?}", self.probe_timeout);
                HealthStatus::Unresponsive
            }
            Ok(Ok(_)) => HealthStatus::Healthy,
            Ok(Err(SandboxError::NotFound(message))) => {
                debug!("Health probe: {}", message);
                HealthStatus::NotFound
            }
            Ok(Err(e)) => {
                debug!("Health probe failed: {}", e);
                HealthStatus::Unresponsive
            }
        };

        debug!(
            "Sandbox {} (generation {}) is {:?}",
            handle.id().unwrap_or("-"),
            handle.generation(),
            status
        );
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::fake::ScriptedSandbox;

    #[tokio::test]
    async fn test_healthy_probe() {
        let sandbox = ScriptedSandbox::new();
        let handle = SandboxHandle::active("sbx-1");
        let status = HealthMonitor::default().probe(&sandbox, &handle).await;
        assert_eq!(status, HealthStatus::Healthy);
        assert_eq!(sandbox.calls(), vec!["probe:sbx-1".to_string()]);
    }

    #[tokio::test]
    async fn test_uninitialized_handle_is_not_found() {
        let sandbox = ScriptedSandbox::new();
        let status = HealthMonitor::default()
            .probe(&sandbox, &SandboxHandle::uninitialized())
            .await;
        assert_eq!(status, HealthStatus::NotFound);
        assert!(sandbox.calls().is_empty());
    }

    #[tokio::test]
    async fn test_not_found_error() {
        let sandbox = ScriptedSandbox::new();
        sandbox.push_probe(Err(SandboxError::NotFound("sandbox was not found".into())));
        let status = HealthMonitor::default()
            .probe(&sandbox, &SandboxHandle::active("sbx-1"))
            .await;
        assert_eq!(status, HealthStatus::NotFound);
        assert_eq!(status.error_kind(), Some(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_probe_that_raised_is_unresponsive() {
        let sandbox = ScriptedSandbox::new();
        sandbox.push_probe(Err(SandboxError::Other("kernel died".into())));
        let status = HealthMonitor::default()
            .probe(&sandbox, &SandboxHandle::active("sbx-1"))
            .await;
        assert_eq!(status, HealthStatus::Unresponsive);
    }

    #[tokio::test]
    async fn test_slow_probe_times_out() {
        let sandbox = ScriptedSandbox::new();
        sandbox.delay_probes(Duration::from_secs(5));
        let monitor = HealthMonitor::new(Duration::from_millis(20));
        let status = monitor.probe(&sandbox, &SandboxHandle::active("sbx-1")).await;
        assert_eq!(status, HealthStatus::Unresponsive);
        assert_eq!(status.error_kind(), Some(ErrorKind::Timeout));
    }
}
