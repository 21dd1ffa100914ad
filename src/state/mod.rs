use std::collections::HashSet;
use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Number of most recent message IDs kept on disk.
pub const MAX_PROCESSED_IDS: usize = 1000;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("json serialization: {0}")]
    Json(#[from] serde_json::Error),

    #[error("filesystem: {0}")]
    Io(#[from] std::io::Error),
}

/// Message IDs already appended to the sheet, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessedIds {
    order: Vec<String>,
    index: HashSet<String>,
}

impl ProcessedIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    /// Returns false when the ID was already present; its position is kept.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.index.contains(&id) {
            return false;
        }
        self.index.insert(id.clone());
        self.order.push(id);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Drop the oldest entries until at most `cap` remain.
    pub fn retain_recent(&mut self, cap: usize) {
        let excess = self.order.len().saturating_sub(cap);
        for dropped in self.order.drain(..excess) {
            self.index.remove(&dropped);
        }
    }

    fn recent(&self, cap: usize) -> &[String] {
        let skip = self.order.len().saturating_sub(cap);
        &self.order[skip..]
    }
}

impl FromIterator<String> for ProcessedIds {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut ids = Self::new();
        for id in iter {
            ids.insert(id);
        }
        ids
    }
}

#[derive(Debug, Serialize)]
struct StateFileOut<'a> {
    processed_ids: &'a [String],
}

#[derive(Debug, Deserialize)]
struct StateFileIn {
    #[serde(default)]
    processed_ids: Vec<String>,
}

/// JSON file holding the processed-ID set between runs.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Never fails: a missing or unreadable file yields an empty set.
    pub fn load(&self) -> ProcessedIds {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no state file yet");
                return ProcessedIds::new();
            }
            Err(error) => {
                warn!(
                    path = %self.path.display(),
                    error = %error,
                    "unable to read state file; starting with empty state"
                );
                return ProcessedIds::new();
            }
        };

        match serde_json::from_str::<StateFileIn>(&raw) {
            Ok(state) => state.processed_ids.into_iter().collect(),
            Err(error) => {
                warn!(
                    path = %self.path.display(),
                    error = %error,
                    "state file is corrupt; starting with empty state"
                );
                ProcessedIds::new()
            }
        }
    }

    /// Persist the most recent [`MAX_PROCESSED_IDS`] entries.
    ///
    /// Writes a sibling temp file and renames it over the target, so readers
    /// see either the old or the new content.
    pub fn save(&self, ids: &ProcessedIds) -> Result<(), StateError> {
        let payload = serde_json::to_vec(&StateFileOut {
            processed_ids: ids.recent(MAX_PROCESSED_IDS),
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let temp_path = self.temp_path();
        let written = File::create(&temp_path).and_then(|mut file| {
            file.write_all(&payload)?;
            file.sync_all()
        });
        let renamed = written.and_then(|()| std::fs::rename(&temp_path, &self.path));
        if let Err(error) = renamed {
            let _ = std::fs::remove_file(&temp_path);
            return Err(error.into());
        }

        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("state.json");
        self.path
            .with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4().as_simple()))
    }
}
