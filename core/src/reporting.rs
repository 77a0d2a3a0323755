use crate::engine::{SortConfig, SortResult};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

#[derive(Debug, Error)]
pub enum ReportingError {
    #[error("io error for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Final counters of a sorting run, as written next to the run log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub generated_at: String,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub min_score: f32,
    pub limit: Option<usize>,
    pub total: usize,
    pub processed: usize,
    pub accepted: usize,
    pub copied: usize,
    pub failed: usize,
}

impl RunReport {
    pub fn new(config: &SortConfig, result: &SortResult) -> Self {
        Self {
            generated_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_else(|_| String::from("unknown")),
            source: config.source.clone(),
            destination: config.destination.clone(),
            min_score: config.min_score,
            limit: config.limit,
            total: result.total,
            processed: result.processed,
            accepted: result.accepted,
            copied: result.copied,
            failed: result.failed,
        }
    }

    /// One-line summary printed and logged at the end of a run.
    pub fn summary_line(&self) -> String {
        format!(
            "Total: {}, processed: {}, found: {}",
            self.total, self.processed, self.accepted
        )
    }
}

pub fn write_report<P: AsRef<Path>>(report: &RunReport, path: P) -> Result<(), ReportingError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ReportingError::Io {
            source,
            path: parent.to_path_buf(),
        })?;
    }
    let file = File::create(path).map_err(|source| ReportingError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)?;
    Ok(())
}
