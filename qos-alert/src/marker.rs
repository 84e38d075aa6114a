use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tokio::io::AsyncWriteExt as _;

use crate::{AlertChannel, Result};

/// An alert channel backed by the existence of a file.
///
/// The file exists if and only if the alert is raised. Its content is the `detail` passed to
/// the assert that created it.
#[derive(Debug, Clone)]
pub struct MarkerFile {
    path: PathBuf,
}

impl MarkerFile {
    /// A channel signalled by the file at `path`. Nothing is touched until the first operation.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the diagnostic content of the marker, if present.
    pub async fn detail(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait::async_trait]
impl AlertChannel for MarkerFile {
    async fn assert_alert(&self, detail: &str) -> Result<()> {
        let file = tokio::fs::OpenOptions::new().write(true).create_new(true).open(&self.path).await;

        let mut file = match file {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = ?self.path, detail, "created alert marker");
        file.write_all(detail.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    async fn clear_alert(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::debug!(path = ?self.path, "removed alert marker");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn is_alert_active(&self) -> Result<bool> {
        Ok(tokio::fs::try_exists(&self.path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker_in(dir: &tempfile::TempDir) -> MarkerFile {
        MarkerFile::new(dir.path().join("latency.alert"))
    }

    #[tokio::test]
    async fn assert_and_clear() {
        let _ = tracing_subscriber::fmt::try_init();
        let dir = tempfile::tempdir().unwrap();
        let marker = marker_in(&dir);

        assert!(!marker.is_alert_active().await.unwrap());

        marker.assert_alert("7.00").await.unwrap();
        assert!(marker.is_alert_active().await.unwrap());
        assert_eq!(marker.detail().await.unwrap().as_deref(), Some("7.00"));

        marker.clear_alert().await.unwrap();
        assert!(!marker.is_alert_active().await.unwrap());
        assert_eq!(marker.detail().await.unwrap(), None);
    }

    #[tokio::test]
    async fn operations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let marker = marker_in(&dir);

        marker.clear_alert().await.unwrap();

        marker.assert_alert("7.00").await.unwrap();
        marker.assert_alert("9.00").await.unwrap();
        // The second assert is a no-op and keeps the first detail.
        assert_eq!(marker.detail().await.unwrap().as_deref(), Some("7.00"));

        marker.clear_alert().await.unwrap();
        marker.clear_alert().await.unwrap();
        assert!(!marker.is_alert_active().await.unwrap());
    }

    #[tokio::test]
    async fn writer_and_reader_share_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let writer = marker_in(&dir);
        let reader = marker_in(&dir);

        writer.assert_alert("6.10").await.unwrap();
        assert!(reader.is_alert_active().await.unwrap());

        writer.clear_alert().await.unwrap();
        assert!(!reader.is_alert_active().await.unwrap());
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let marker = MarkerFile::new(dir.path().join("missing").join("latency.alert"));
        assert!(marker.assert_alert("7.00").await.is_err());
    }
}
