use std::path::PathBuf;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::info;

use crate::domain::AppError;
use crate::utils::sanitize_filename;

/// Destination of a "save as" action for a finished payload.
pub trait SaveSink: Send + Sync {
    fn save(&self, filename: &str, payload: Bytes) -> BoxFuture<'static, Result<PathBuf, AppError>>;
}

/// Writes payloads into a fixed download directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SaveSink for DirectorySink {
    fn save(&self, filename: &str, payload: Bytes) -> BoxFuture<'static, Result<PathBuf, AppError>> {
        let dir = self.dir.clone();
        let path = dir.join(sanitize_filename(filename));
        async move {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| AppError::Io(format!("Failed to create {}: {}", dir.display(), e)))?;
            tokio::fs::write(&path, &payload)
                .await
                .map_err(|e| AppError::Io(format!("Failed to write {}: {}", path.display(), e)))?;
            info!(path = %path.display(), bytes = payload.len(), "Saved package");
            Ok(path)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_directory_sink_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path().join("nested"));

        let path = sink
            .save("a.b-1.0.0.vsix", Bytes::from_static(b"payload"))
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("nested").join("a.b-1.0.0.vsix"));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_directory_sink_sanitizes_name() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path());

        let path = sink.save("../evil.vsix", Bytes::new()).await.unwrap();
        assert_eq!(path, dir.path().join(".._evil.vsix"));
    }
}
