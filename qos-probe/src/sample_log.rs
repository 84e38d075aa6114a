use std::path::{Path, PathBuf};

use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
};

use crate::LatencyMeasurement;

/// Append-only log of every sample, one `<unix_millis> <latency_ms|timeout>` line each.
#[derive(Debug)]
pub struct SampleLog {
    path: PathBuf,
    file: File,
}

impl SampleLog {
    /// Opens `path` for appending, creating it if needed.
    pub async fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one line for `sample`, stamped with the current wall-clock time.
    pub async fn record(&mut self, sample: &LatencyMeasurement) -> std::io::Result<()> {
        let line = format_line(qos_common::unix_millis(), sample);
        self.file.write_all(line.as_bytes()).await?;
        self.file.flush().await
    }
}

fn format_line(millis: u64, sample: &LatencyMeasurement) -> String {
    match sample.latency_ms() {
        Some(ms) => format!("{millis} {ms:.2}\n"),
        None => format!("{millis} timeout\n"),
    }
}
