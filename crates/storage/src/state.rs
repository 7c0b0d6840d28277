//! Process state that must survive restarts: when the last drain finished.
//!
//! Loaded at the start of each cycle and saved after a successful drain.
//! Nothing else in the crate keeps this in ambient state.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::DrainError;

pub const DEFAULT_STATE_FILE: &str = ".drain_state.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainState {
    pub last_drain_at: Option<DateTime<Utc>>,
}

/// JSON file holding a [`DrainState`].
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `{export_dir}/.drain_state.json`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(DEFAULT_STATE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file is a fresh process. An unreadable file is logged and
    /// treated the same, which makes the next cycle drain.
    pub fn load(&self) -> DrainState {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return DrainState::default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read drain state, starting fresh");
                return DrainState::default();
            }
        };
        serde_json::from_slice(&raw).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "Corrupt drain state, starting fresh");
            DrainState::default()
        })
    }

    pub fn save(&self, state: &DrainState) -> Result<(), DrainError> {
        let bytes = serde_json::to_vec_pretty(state).map_err(|e| DrainError::State(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| DrainError::State(e.to_string()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        };
        write().map_err(|e| {
            fs::remove_file(&tmp).ok();
            DrainError::State(format!("{}: {e}", self.path.display()))
        })
    }
}
