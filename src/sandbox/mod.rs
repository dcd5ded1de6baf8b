//! Remote sandbox abstraction.
//!
//! A sandbox is a remote, isolated code-execution environment. This module
//! holds the engine-owned [`SandboxHandle`] with its lifecycle, the error
//! taxonomy for sandbox calls, and the [`SandboxClient`] trait that concrete
//! services implement.

pub mod health;
pub mod http;

pub use health::{HealthMonitor, HealthStatus};
pub use http::{HttpSandboxClient, HttpSandboxConfig};

use crate::models::{DatasetRef, ErrorKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Lifecycle of a sandbox handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Uninitialized,
    Active,
    Degraded,
    Reinitializing,
    Failed,
}

impl Lifecycle {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: Lifecycle) -> bool {
        use Lifecycle::*;
        matches!(
            (self, next),
            (Uninitialized, Active)
                | (Uninitialized, Failed)
                | (Active, Degraded)
                | (Degraded, Reinitializing)
                | (Reinitializing, Active)
                | (Reinitializing, Failed)
        )
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Lifecycle::Uninitialized => "uninitialized",
            Lifecycle::Active => "active",
            Lifecycle::Degraded => "degraded",
            Lifecycle::Reinitializing => "reinitializing",
            Lifecycle::Failed => "failed",
        };
        write!(f, "{}", label)
    }
}

/// Reference to one remote environment.
///
/// The id is opaque. `generation` counts how many times the environment
/// behind this handle has been re-created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxHandle {
    id: Option<String>,
    lifecycle: Lifecycle,
    generation: u32,
}

impl Default for SandboxHandle {
    fn default() -> Self {
        Self::uninitialized()
    }
}

impl SandboxHandle {
    /// A handle with no environment behind it yet.
    pub fn uninitialized() -> Self {
        Self {
            id: None,
            lifecycle: Lifecycle::Uninitialized,
            generation: 0,
        }
    }

    /// A handle for a freshly created environment.
    pub fn active(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            lifecycle: Lifecycle::Active,
            generation: 0,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Whether code can be sent to this handle.
    pub fn is_usable(&self) -> bool {
        self.id.is_some() && matches!(self.lifecycle, Lifecycle::Active | Lifecycle::Degraded)
    }

    fn transition(&mut self, next: Lifecycle) -> bool {
        if self.lifecycle == next {
            return true;
        }
        if !self.lifecycle.can_transition_to(next) {
            warn!(
                "Ignoring sandbox transition {} -> {} (generation {})",
                self.lifecycle, next, self.generation
            );
            return false;
        }
        self.lifecycle = next;
        true
    }

    pub fn mark_degraded(&mut self) -> bool {
        self.transition(Lifecycle::Degraded)
    }

    pub fn begin_reinitialize(&mut self) -> bool {
        self.transition(Lifecycle::Reinitializing)
    }

    pub fn mark_failed(&mut self) -> bool {
        let moved = self.transition(Lifecycle::Failed);
        if moved {
            self.id = None;
        }
        moved
    }

    /// Take over a newly created environment.
    ///
    /// From `Uninitialized` this is the first provisioning. From
    /// `Reinitializing` it completes a re-creation and bumps the generation.
    pub fn adopt(&mut self, fresh: SandboxHandle) -> bool {
        let reinitializing = self.lifecycle == Lifecycle::Reinitializing;
        if fresh.id.is_none() || !self.transition(Lifecycle::Active) {
            return false;
        }
        self.id = fresh.id;
        if reinitializing {
            self.generation += 1;
        }
        true
    }
}

/// Errors returned by sandbox calls, already classified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SandboxError {
    #[error("sandbox not found: {0}")]
    NotFound(String),

    #[error("sandbox timeout: {0}")]
    Timeout(String),

    #[error("missing dependency: {0}")]
    Import(String),

    #[error("data access error: {0}")]
    DataAccess(String),

    #[error("execution error: {0}")]
    Other(String),
}

impl SandboxError {
    /// Build an error from raw text, classifying it by content.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        match classify_error_message(&message) {
            ErrorKind::NotFound => SandboxError::NotFound(message),
            ErrorKind::Timeout => SandboxError::Timeout(message),
            ErrorKind::Import => SandboxError::Import(message),
            ErrorKind::DataAccess => SandboxError::DataAccess(message),
            ErrorKind::AssistantUnavailable | ErrorKind::Other => SandboxError::Other(message),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SandboxError::NotFound(_) => ErrorKind::NotFound,
            SandboxError::Timeout(_) => ErrorKind::Timeout,
            SandboxError::Import(_) => ErrorKind::Import,
            SandboxError::DataAccess(_) => ErrorKind::DataAccess,
            SandboxError::Other(_) => ErrorKind::Other,
        }
    }

    /// The raw message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            SandboxError::NotFound(m)
            | SandboxError::Timeout(m)
            | SandboxError::Import(m)
            | SandboxError::DataAccess(m)
            | SandboxError::Other(m) => m,
        }
    }
}

/// Map raw error text from the execution service to an [`ErrorKind`].
///
/// Never returns `AssistantUnavailable`.
pub fn classify_error_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();

    if lower.contains("sandbox was not found") || lower.contains("sandbox not found") {
        return ErrorKind::NotFound;
    }

    if ["modulenotfounderror", "importerror", "no module named", "cannot import name"]
        .iter()
        .any(|s| lower.contains(s))
    {
        return ErrorKind::Import;
    }

    if lower.contains("timeout") || lower.contains("timed out") {
        return ErrorKind::Timeout;
    }

    if ["no such file", "file not found", "filenotfounderror"]
        .iter()
        .any(|s| lower.contains(s))
    {
        return ErrorKind::DataAccess;
    }

    if lower.contains("sandbox") && lower.contains("not found") {
        return ErrorKind::NotFound;
    }

    ErrorKind::Other
}

/// Image format of an execution artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Png,
    Jpeg,
}

impl ArtifactKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Png => "png",
            ArtifactKind::Jpeg => "jpg",
        }
    }
}

/// Rich result (an image) produced by executed code, base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub data: String,
}

/// Successful execution result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutput {
    pub stdout: String,
    pub stderr: String,
    pub artifacts: Vec<Artifact>,
}

impl ExecutionOutput {
    #[cfg(test)]
    pub fn from_stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    /// Text recorded as the step output.
    pub fn combined_text(&self) -> String {
        let stdout = self.stdout.trim_end();
        let stderr = self.stderr.trim_end();
        match (stdout.is_empty(), stderr.is_empty()) {
            (_, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (false, false) => format!("{}\n{}", stdout, stderr),
        }
    }
}

/// Remote execution service.
///
/// Code that raised inside the sandbox comes back as an `Err` classified
/// from its error text.
#[async_trait]
pub trait SandboxClient: Send + Sync {
    /// Create a new environment for the dataset. Does not upload it.
    async fn create(&self, dataset: &DatasetRef) -> Result<SandboxHandle, SandboxError>;

    /// Upload the dataset into the environment.
    async fn upload(&self, handle: &SandboxHandle, dataset: &DatasetRef) -> Result<(), SandboxError>;

    /// Run code in the environment.
    async fn execute(&self, handle: &SandboxHandle, code: &str) -> Result<ExecutionOutput, SandboxError>;

    /// Tear the environment down. Missing environments are not an error.
    async fn destroy(&self, handle: &SandboxHandle) -> Result<(), SandboxError>;
}
