//! Append-only run log with timestamped entries.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::macros::format_description;
use time::OffsetDateTime;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("log io error for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// File log that is truncated when created and appended to afterwards.
#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, LogError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| LogError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        File::create(&path).map_err(|source| LogError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `text` under a timestamp line, optionally echoing it to stdout.
    pub fn log(&self, text: &str, echo: bool) -> Result<(), LogError> {
        let entry = format!("{}\n{}", timestamp(), text);
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|source| self.io_error(source))?;
        writeln!(file, "{}", entry).map_err(|source| self.io_error(source))?;
        if echo {
            println!("{}", entry);
        }
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> LogError {
        LogError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_else(|_| String::from("unknown"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_truncates_existing_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("result").join("log.txt");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "stale entry\n").unwrap();

        let log = RunLog::create(&path).unwrap();
        assert_eq!(fs::read_to_string(log.path()).unwrap(), "");
    }

    #[test]
    fn entries_are_appended_under_timestamps() {
        let dir = tempdir().unwrap();
        let log = RunLog::create(dir.path().join("nested/log.txt")).unwrap();
        log.log("first", false).unwrap();
        log.log("second", false).unwrap();

        let content = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "first");
        assert_eq!(lines[3], "second");
        assert_eq!(lines[0].len(), "2024-01-01 00:00:00".len());
    }
}
