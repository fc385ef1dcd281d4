//! Accumulator state persistence.
//!
//! The state is one JSON document. Saves go through a temp file in the same
//! directory that is synced and renamed over the old file.

use crate::metrics::accumulator::AccumulatorState;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// State store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// JSON file holding the accumulator state.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved state.
    ///
    /// Returns `None` when there is no file. A file that cannot be read or
    /// parsed is logged and also yields `None`, so a corrupt file never keeps
    /// the bridge from starting.
    pub fn load(&self) -> Result<Option<AccumulatorState>, StoreError> {
        if !self.path.exists() {
            tracing::info!("No state file at {:?}, starting fresh", self.path);
            return Ok(None);
        }

        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::warn!("Failed to read state file {:?}: {}. Starting fresh.", self.path, e);
                return Ok(None);
            }
        };

        match serde_json::from_str::<AccumulatorState>(&contents) {
            Ok(state) => {
                tracing::info!(
                    "Restored state from {:?}: {:.2} km today, {:.2} km total",
                    self.path,
                    state.daily.distance_km,
                    state.total.distance_km
                );
                Ok(Some(state))
            }
            Err(e) => {
                tracing::warn!("Failed to parse state file {:?}: {}. Starting fresh.", self.path, e);
                Ok(None)
            }
        }
    }

    /// Save the state atomically.
    pub fn save(&self, state: &AccumulatorState) -> Result<(), StoreError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;

        let mut temp = NamedTempFile::new_in(parent)?;
        {
            let mut writer = std::io::BufWriter::new(temp.as_file_mut());
            serde_json::to_writer(&mut writer, state)?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;

        temp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;

        tracing::debug!("Saved state to {:?}", self.path);
        Ok(())
    }
}
