//! Persistence of per-site working state.
//!
//! The executor saves its state after every round so a restarted site
//! process can resume, and so the submit-final-model task can republish the
//! last contribution without recomputation.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::core::{now, Error, Result, Timestamp};
use crate::optimizer::{Method, SiteContribution, SiteState};

/// Snapshot of a site's progress after one round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistedState {
    /// Identifier of the federation run this snapshot belongs to.
    pub run_id: Uuid,
    /// Optimization method in use.
    pub method: Method,
    /// Round the snapshot was taken after.
    pub round: u64,
    /// Cross-round working state.
    pub state: SiteState,
    /// Last emitted contribution, republished by submit-final-model.
    pub contribution: SiteContribution,
    /// When the snapshot was written.
    pub saved_at: Timestamp,
}

/// File-backed store for a site's working state.
#[derive(Clone, Debug)]
pub struct LocalStateStore {
    dir: PathBuf,
    file_name: String,
}

impl LocalStateStore {
    /// Store rooted at `dir`, using the default file name.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file_name: "local_model.json".to_string(),
        }
    }

    /// Override the snapshot file name.
    pub fn with_file_name(mut self, name: &str) -> Self {
        self.file_name = name.to_string();
        self
    }

    fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }

    /// Write a snapshot, creating the directory if needed.
    pub fn save(&self, state: &PersistedState) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string(state)?;
        fs::write(self.path(), json)?;
        debug!(path = %self.path().display(), round = state.round, "saved local state");
        Ok(())
    }

    /// Read the last snapshot, if one was ever written.
    pub fn load(&self) -> Result<PersistedState> {
        let path = self.path();
        if !path.exists() {
            return Err(Error::Configuration(format!(
                "no local model found at {}",
                path.display()
            )));
        }
        let json = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Whether a snapshot exists on disk.
    pub fn exists(&self) -> bool {
        self.path().exists()
    }

    /// Directory the store writes into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
