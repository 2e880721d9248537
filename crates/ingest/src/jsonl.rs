use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Append-only log of JSON objects, one per line.
///
/// Only newline-terminated lines count. The number of such lines is the
/// resume cursor of whatever stage owns the log, so a line is written in a
/// single call and a torn tail left by a crash can be cut with [`JsonlLog::repair`].
#[derive(Debug, Clone)]
pub struct JsonlLog {
    path: PathBuf,
}

impl JsonlLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_content(&self) -> Result<String> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e).context(format!("Failed to read log: {:?}", self.path)),
        }
    }

    /// Number of complete records. A missing file counts as zero.
    pub async fn count(&self) -> Result<usize> {
        let content = self.read_content().await?;
        Ok(complete_lines(&content).count())
    }

    pub async fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let content = self.read_content().await?;

        complete_lines(&content)
            .enumerate()
            .map(|(idx, line)| {
                serde_json::from_str(line)
                    .context(format!("Malformed record {} in {:?}", idx + 1, self.path))
            })
            .collect()
    }

    /// Cut an unterminated trailing line. Returns true if the file was changed.
    pub async fn repair(&self) -> Result<bool> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e).context(format!("Failed to read log: {:?}", self.path)),
        };

        if bytes.is_empty() || bytes.ends_with(b"\n") {
            return Ok(false);
        }

        let keep = bytes
            .iter()
            .rposition(|&b| b == b'\n')
            .map(|pos| pos + 1)
            .unwrap_or(0);

        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .await
            .context(format!("Failed to open log for repair: {:?}", self.path))?;
        file.set_len(keep as u64).await?;

        tracing::warn!(
            path = %self.path.display(),
            dropped_bytes = bytes.len() - keep,
            "Truncated torn tail of log"
        );
        Ok(true)
    }

    pub async fn append<T: Serialize>(&self, records: &[T]) -> Result<()> {
        self.write_records(records, true).await
    }

    /// Replace the file contents with `records`.
    pub async fn write_all<T: Serialize>(&self, records: &[T]) -> Result<()> {
        self.write_records(records, false).await
    }

    async fn write_records<T: Serialize>(&self, records: &[T], append: bool) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut options = OpenOptions::new();
        options.create(true);
        if append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }

        let mut file = options
            .open(&self.path)
            .await
            .context(format!("Failed to open log: {:?}", self.path))?;

        for record in records {
            let mut line = serde_json::to_string(record)?;
            line.push('\n');
            file.write_all(line.as_bytes())
                .await
                .context(format!("Failed to write to log: {:?}", self.path))?;
        }
        file.flush().await?;

        Ok(())
    }
}

fn complete_lines(content: &str) -> impl Iterator<Item = &str> {
    content
        .split_inclusive('\n')
        .filter(|line| line.ends_with('\n'))
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
}
