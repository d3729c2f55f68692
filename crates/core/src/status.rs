use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const STATUS_FILE_NAME: &str = "status.json";
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const INITIAL_STATUS: &str = "Project initialized";

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("failed to read status file `{path}`: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse status file `{path}`: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write status file `{path}`: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to serialize status file `{path}`: {source}")]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    #[serde(rename = "Time")]
    pub time: String,
    #[serde(rename = "Status")]
    pub status: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct StatusDocument {
    #[serde(
        rename = "Current status",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    current: Option<StatusEntry>,
    #[serde(flatten)]
    history: BTreeMap<String, String>,
}

/// Project progress persisted as `output/status.json`: one current slot plus
/// an append-only history keyed by timestamp.
#[derive(Clone, Debug)]
pub struct ProjectStatus {
    path: PathBuf,
    document: StatusDocument,
}

impl ProjectStatus {
    /// Reads the status file in `output_dir` without creating it.
    pub fn load(output_dir: impl AsRef<Path>) -> Result<Option<Self>, StatusError> {
        let path = output_dir.as_ref().join(STATUS_FILE_NAME);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StatusError::Read { path, source }),
        };
        let document = if contents.trim().is_empty() {
            StatusDocument::default()
        } else {
            serde_json::from_str(&contents).map_err(|source| StatusError::Parse {
                path: path.clone(),
                source,
            })?
        };
        Ok(Some(Self { path, document }))
    }

    /// Loads the status file in `output_dir`, initialising it when absent.
    pub fn load_or_init(output_dir: impl AsRef<Path>) -> Result<Self, StatusError> {
        let output_dir = output_dir.as_ref();
        if let Some(status) = Self::load(output_dir)? {
            return Ok(status);
        }
        let mut status = Self {
            path: output_dir.join(STATUS_FILE_NAME),
            document: StatusDocument::default(),
        };
        status.set_current(INITIAL_STATUS);
        status.save()?;
        Ok(status)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> Option<&StatusEntry> {
        self.document.current.as_ref()
    }

    /// Past statuses in chronological order.
    pub fn history(&self) -> impl Iterator<Item = (&str, &str)> {
        self.document
            .history
            .iter()
            .map(|(time, status)| (time.as_str(), status.as_str()))
    }

    pub fn set_current(&mut self, status: impl Into<String>) {
        self.set_current_at(status, Local::now().naive_local());
    }

    /// Moves the current status into history and replaces it.
    pub fn set_current_at(&mut self, status: impl Into<String>, time: NaiveDateTime) {
        if let Some(previous) = self.document.current.take() {
            self.document
                .history
                .entry(previous.time)
                .and_modify(|existing| {
                    existing.push_str("; ");
                    existing.push_str(&previous.status);
                })
                .or_insert(previous.status);
        }
        self.document.current = Some(StatusEntry {
            time: time.format(TIME_FORMAT).to_string(),
            status: status.into(),
        });
    }

    pub fn save(&self) -> Result<(), StatusError> {
        let serialized = serde_json::to_string_pretty(&self.document).map_err(|source| {
            StatusError::Serialize {
                path: self.path.clone(),
                source,
            }
        })?;
        fs::write(&self.path, serialized).map_err(|source| StatusError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn at(hour: u32, minute: u32, second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|date| date.and_hms_opt(hour, minute, second))
            .unwrap()
    }

    #[test]
    fn missing_file_is_initialised() {
        let dir = tempdir().unwrap();
        let status = ProjectStatus::load_or_init(dir.path()).unwrap();
        assert!(status.path().exists());
        assert_eq!(status.current().unwrap().status, "Project initialized");
        assert_eq!(status.history().count(), 0);
    }

    #[test]
    fn load_leaves_missing_file_absent() {
        let dir = tempdir().unwrap();
        assert!(ProjectStatus::load(dir.path()).unwrap().is_none());
        assert!(!dir.path().join(STATUS_FILE_NAME).exists());

        ProjectStatus::load_or_init(dir.path()).unwrap();
        let loaded = ProjectStatus::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.current().unwrap().status, "Project initialized");
    }

    #[test]
    fn transitions_move_current_into_history() {
        let dir = tempdir().unwrap();
        let mut status = ProjectStatus::load_or_init(dir.path()).unwrap();
        status.set_current_at("Started Determine title", at(10, 0, 0));
        status.set_current_at("Completed Determine title", at(10, 0, 5));
        status.save().unwrap();

        let reloaded = ProjectStatus::load_or_init(dir.path()).unwrap();
        let current = reloaded.current().unwrap();
        assert_eq!(current.time, "2024-03-01 10:00:05");
        assert_eq!(current.status, "Completed Determine title");
        let history: Vec<_> = reloaded.history().map(|(_, s)| s.to_string()).collect();
        assert!(history.contains(&"Started Determine title".to_string()));
        assert!(history.contains(&"Project initialized".to_string()));
    }

    #[test]
    fn same_second_entries_are_kept() {
        let dir = tempdir().unwrap();
        let mut status = ProjectStatus::load_or_init(dir.path()).unwrap();
        status.set_current_at("Started A", at(9, 0, 0));
        status.set_current_at("Completed A", at(9, 0, 0));
        status.set_current_at("Started B", at(9, 0, 1));

        let entry = status
            .history()
            .find(|(time, _)| *time == "2024-03-01 09:00:00")
            .map(|(_, s)| s.to_string())
            .unwrap();
        assert_eq!(entry, "Started A; Completed A");
    }

    #[test]
    fn file_layout_uses_current_status_slot() {
        let dir = tempdir().unwrap();
        let mut status = ProjectStatus::load_or_init(dir.path()).unwrap();
        status.set_current_at("Started Assemble book", at(12, 30, 0));
        status.save().unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(status.path()).unwrap()).unwrap();
        assert_eq!(raw["Current status"]["Status"], "Started Assemble book");
        assert_eq!(raw["Current status"]["Time"], "2024-03-01 12:30:00");
    }
}
