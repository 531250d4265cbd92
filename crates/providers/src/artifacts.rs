//! Filesystem storage for generated scene artifacts.
//!
//! Layout:
//!
//! ```text
//! {root}/
//! └── {project_id}/
//!     ├── images/scene_{index}.{ext}
//!     └── videos/scene_{index}.{ext}
//! ```
//!
//! Artifact references are paths relative to the root, so the same string
//! works as a checkpoint value and as a URL suffix under `/artifacts/`.

use std::path::{Component, Path, PathBuf};

use shorts_core::stage::Stage;
use shorts_core::types::{ProjectId, SceneIndex};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Artifact I/O failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid artifact reference '{0}'")]
    InvalidRef(String),

    #[error("Invalid artifact extension '{0}'")]
    InvalidExtension(String),
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative reference for a scene artifact.
    pub fn artifact_ref(
        project_id: ProjectId,
        stage: Stage,
        index: SceneIndex,
        extension: &str,
    ) -> String {
        format!(
            "{project_id}/{}/scene_{index}.{extension}",
            stage.artifact_dir()
        )
    }

    /// Write bytes for a scene, replacing any previous artifact.
    ///
    /// The file appears atomically: bytes go to a temp file in the same
    /// directory which is then renamed into place.
    #[tracing::instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn write(
        &self,
        project_id: ProjectId,
        stage: Stage,
        index: SceneIndex,
        extension: &str,
        bytes: &[u8],
    ) -> Result<String, ArtifactError> {
        if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ArtifactError::InvalidExtension(extension.to_string()));
        }
        let reference = Self::artifact_ref(project_id, stage, index, extension);
        let path = self.root.join(&reference);
        let dir = path
            .parent()
            .ok_or_else(|| ArtifactError::InvalidRef(reference.clone()))?;
        tokio::fs::create_dir_all(dir).await.map_err(|e| io(dir, e))?;

        let temp = dir.join(format!(".{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&temp, bytes).await.map_err(|e| io(&temp, e))?;
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(io(&path, e));
        }

        tracing::debug!(artifact = %reference, "Stored artifact");
        Ok(reference)
    }

    pub async fn read(&self, reference: &str) -> Result<Vec<u8>, ArtifactError> {
        let path = self.resolve(reference)?;
        tokio::fs::read(&path).await.map_err(|e| io(&path, e))
    }

    /// Absolute path for a reference. Rejects anything escaping the root.
    pub fn resolve(&self, reference: &str) -> Result<PathBuf, ArtifactError> {
        let relative = Path::new(reference);
        let safe = !reference.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(ArtifactError::InvalidRef(reference.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

fn io(path: &Path, source: std::io::Error) -> ArtifactError {
    ArtifactError::Io {
        path: path.display().to_string(),
        source,
    }
}
