use anyhow::Result;
use ingest::JsonlLog;
use std::path::{Path, PathBuf};

use crate::schema::ExtractionRecord;

/// Append-only log of raw extraction responses. Its length is the resume cursor.
#[derive(Debug, Clone)]
pub struct ExtractionStore {
    log: JsonlLog,
}

impl ExtractionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            log: JsonlLog::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        self.log.path()
    }

    /// Drop a torn trailing record and return how many complete records exist.
    pub async fn resume_cursor(&self) -> Result<usize> {
        self.log.repair().await?;
        let count = self.log.count().await?;
        tracing::info!(path = %self.path().display(), processed = count, "Found processed reviews");
        Ok(count)
    }

    pub async fn append(&self, records: &[ExtractionRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.log.append(records).await?;
        tracing::debug!(path = %self.path().display(), lines = records.len(), "Appended extraction records");
        Ok(())
    }

    pub async fn read_all(&self) -> Result<Vec<ExtractionRecord>> {
        self.log.read_all().await
    }
}
