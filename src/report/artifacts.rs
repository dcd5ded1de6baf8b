//! Image artifact export.

use crate::sandbox::Artifact;
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Decode a step's images into `dir` as `step_{index}_{n}.{ext}`.
///
/// `n` starts at 1. Returns the written paths in artifact order.
pub fn save_artifacts(dir: &Path, step_index: usize, artifacts: &[Artifact]) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create artifacts directory {}", dir.display()))?;

    let mut written = Vec::with_capacity(artifacts.len());
    for (n, artifact) in artifacts.iter().enumerate() {
        let bytes = STANDARD
            .decode(artifact.data.trim())
            .with_context(|| format!("Artifact {} of step {} is not valid base64", n + 1, step_index))?;

        let path = dir.join(format!(
            "step_{}_{}.{}",
            step_index,
            n + 1,
            artifact.kind.extension()
        ));
        fs::write(&path, &bytes)
            .with_context(|| format!("Failed to write artifact {}", path.display()))?;

        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        written.push(path);
    }

    Ok(written)
}
