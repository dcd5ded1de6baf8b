//! Session snapshots.
//!
//! A snapshot is the full [`AnalysisSession`] wrapped with a format version,
//! written as JSON. Saves are atomic: the data goes to a temporary file in
//! the same directory, which is then renamed over the target.

use crate::models::AnalysisSession;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// Errors that can occur while saving or loading snapshots.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// On-disk snapshot envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub session: AnalysisSession,
}

impl SessionSnapshot {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(session: AnalysisSession) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            saved_at: Utc::now(),
            session,
        }
    }
}

/// Write `session` to `path` atomically.
pub fn save(path: &Path, session: &AnalysisSession) -> SnapshotResult<()> {
    let snapshot = SessionSnapshot::new(session.clone());
    let json = serde_json::to_string_pretty(&snapshot)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("json.tmp");
    let mut file = fs::File::create(&temp_path)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;

    fs::rename(&temp_path, path)?;

    info!("Saved session with {} steps to {}", session.len(), path.display());
    Ok(())
}

/// Read a session back.
///
/// Coverage is rebuilt from the step history; a stored coverage that does
/// not match the replay is replaced and logged.
pub fn load(path: &Path) -> SnapshotResult<AnalysisSession> {
    let content = fs::read_to_string(path)?;
    let snapshot: SessionSnapshot = serde_json::from_str(&content)?;

    if snapshot.version > SessionSnapshot::CURRENT_VERSION {
        return Err(SnapshotError::VersionMismatch {
            expected: SessionSnapshot::CURRENT_VERSION,
            found: snapshot.version,
        });
    }

    let mut session = snapshot.session;
    if session.repair_coverage() {
        warn!(
            "Stored coverage in {} did not match the step history; rebuilt it",
            path.display()
        );
    }

    info!(
        "Loaded session with {} steps saved at {}",
        session.len(),
        snapshot.saved_at
    );
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::{ok, step};
    use crate::models::{CompletionMode, ErrorKind, ExecutionOutcome, StopReason, TopicCategory};
    use tempfile::TempDir;

    fn sample_session() -> AnalysisSession {
        let mut session = AnalysisSession::new("churn drivers", CompletionMode::Summary, "churn.csv");
        session.set_dataset_overview("7043 rows x 21 columns");
        session.append_step(step(1, "overview", &[TopicCategory::DataExploration], ok()));
        session.append_step(step(
            2,
            "correlations and plot",
            &[TopicCategory::Correlations, TopicCategory::Visualizations],
            ExecutionOutcome::Failure {
                kind: ErrorKind::Import,
                message: "No module named 'seaborn'".to_string(),
            },
        ));
        session.append_step(step(3, "thinking", &[], ExecutionOutcome::NotExecuted));
        session.finish(StopReason::ExplicitSignal {
            phrase: "analysis complete".to_string(),
        });
        session
    }

    #[test]
    fn test_round_trip_preserves_session() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        let session = sample_session();

        save(&path, &session).unwrap();
        let loaded = load(&path).unwrap();

        assert_eq!(loaded, session);
        let indices: Vec<usize> = loaded.steps().iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(&loaded.recompute_coverage(), loaded.coverage());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("run").join("session.json");
        save(&path, &sample_session()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_tampered_coverage_is_rebuilt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        let session = sample_session();
        save(&path, &session).unwrap();

        let mut value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        value["session"]["coverage"] = serde_json::json!({ "patterns": 9 });
        fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.coverage(), session.coverage());
        assert_eq!(loaded.coverage().count(TopicCategory::Patterns), 0);
    }

    #[test]
    fn test_newer_version_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        save(&path, &sample_session()).unwrap();

        let mut value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        value["version"] = serde_json::json!(99);
        fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();

        assert!(matches!(
            load(&path),
            Err(SnapshotError::VersionMismatch {
                expected: 1,
                found: 99
            })
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            load(&dir.path().join("absent.json")),
            Err(SnapshotError::Io(_))
        ));
    }
}
