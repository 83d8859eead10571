//! # Persistent Upload State
//!
//! What has been uploaded, what has failed and which target id each external
//! key received. The state is a single pretty-printed JSON document that is
//! overwritten on every save, so an operator can inspect it between runs.

use crate::config::UploadConfig;
use crate::model::{ExternalKey, IdMap, TargetId};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Progress of an upload run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadState {
    pub succeeded: BTreeSet<ExternalKey>,
    pub failed: BTreeSet<ExternalKey>,
    pub id_map: IdMap,
    /// `false` for trial runs against fabricated ids; disables persistence.
    pub wet_run: bool,
    pub threads: usize,
    pub max_errors: usize,
}

impl Default for UploadState {
    fn default() -> Self {
        Self {
            succeeded: BTreeSet::new(),
            failed: BTreeSet::new(),
            id_map: IdMap::new(),
            wet_run: true,
            threads: crate::config::DEFAULT_THREADS,
            max_errors: crate::config::DEFAULT_MAX_ERRORS,
        }
    }
}

impl UploadState {
    /// Fresh state for a run configured by `config`.
    pub fn for_config(config: &UploadConfig) -> Self {
        Self {
            wet_run: config.wet_run,
            threads: config.threads,
            max_errors: config.max_errors,
            ..Self::default()
        }
    }

    pub fn is_succeeded(&self, key: &ExternalKey) -> bool {
        self.succeeded.contains(key)
    }

    pub fn is_failed(&self, key: &ExternalKey) -> bool {
        self.failed.contains(key)
    }

    pub fn target_id(&self, key: &ExternalKey) -> Option<&TargetId> {
        self.id_map.get(key)
    }

    pub fn mark_succeeded(&mut self, key: ExternalKey, id: TargetId) {
        self.failed.remove(&key);
        self.id_map.insert(key.clone(), id);
        self.succeeded.insert(key);
    }

    pub fn mark_failed(&mut self, key: ExternalKey) {
        self.succeeded.remove(&key);
        self.failed.insert(key);
    }
}

/// Where the upload state is kept on disk.
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

    /// Load the saved state, or a fresh one for `config` if none exists.
    ///
    /// A saved state keeps its progress; the run settings (`threads`,
    /// `max_errors`, `wet_run`) always come from `config`.
    pub fn load(&self, config: &UploadConfig) -> Result<UploadState> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no saved upload state; starting fresh");
            return Ok(UploadState::for_config(config));
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading uploader from {}", self.path.display()))?;
        let mut state: UploadState = serde_json::from_str(&raw)
            .with_context(|| format!("unmarshalling uploader from {}", self.path.display()))?;
        state.wet_run = config.wet_run;
        state.threads = config.threads;
        state.max_errors = config.max_errors;
        Ok(state)
    }

    /// Overwrite the saved state. Does nothing for dry runs.
    ///
    /// The document is written to a temporary file next to the destination
    /// and renamed over it, so a crash never leaves a truncated state.
    pub fn save(&self, state: &UploadState) -> Result<()> {
        if !state.wet_run {
            return Ok(());
        }
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating state directory {}", dir.display()))?;
        let bytes = serde_json::to_vec_pretty(state).context("marshalling uploader")?;
        let mut file = NamedTempFile::new_in(&dir)
            .with_context(|| format!("creating temp state file in {}", dir.display()))?;
        file.write_all(&bytes)?;
        file.as_file().sync_all()?;
        file.persist(&self.path)
            .with_context(|| format!("writing uploader to {}", self.path.display()))?;
        Ok(())
    }
}
