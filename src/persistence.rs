//! Saved engine state
//!
//! The whole engine (window, id counter, feedback entries) serializes to one
//! JSON document under the data directory. Each write goes to its own temp
//! file in the same directory, which is then renamed over the target, so a
//! crash mid-save leaves the previous state intact.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::config::Config;
use crate::engine::NutriEngine;
use crate::feedback::FeedbackEntry;
use crate::types::MealRecord;

/// Current on-disk format
pub const STATE_VERSION: u32 = 1;

const STATE_FILE_NAME: &str = "state.json";

/// Everything needed to rebuild an engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineState {
    pub version: u32,
    pub next_id: u64,
    #[serde(default)]
    pub revision: u64,
    /// Oldest first
    pub records: Vec<MealRecord>,
    #[serde(default)]
    pub feedback: Vec<FeedbackEntry>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            next_id: 1,
            revision: 0,
            records: Vec::new(),
            feedback: Vec::new(),
        }
    }
}

/// JSON state file on disk
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `state.json` in the application data directory
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(crate::config::data_dir()?.join(STATE_FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` if nothing has been saved yet
    pub async fn load(&self) -> Result<Option<EngineState>> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            debug!("No saved state at {:?}", self.path);
            return Ok(None);
        }
        let json = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read state file {:?}", self.path))?;
        let state: EngineState = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse state file {:?}", self.path))?;
        info!("Loaded {} meal(s) from {:?}", state.records.len(), self.path);
        Ok(Some(state))
    }

    pub async fn save(&self, state: &EngineState) -> Result<()> {
        let json = serde_json::to_string_pretty(state).context("Failed to serialize state")?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_replacing(&path, json.as_bytes()))
            .await
            .context("State save task failed")??;

        debug!("Saved state to {:?}", self.path);
        Ok(())
    }
}

fn write_replacing(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;

    let mut tmp = NamedTempFile::new_in(dir).with_context(|| format!("Failed to create temp file in {:?}", dir))?;
    tmp.write_all(contents)
        .and_then(|_| tmp.as_file().sync_all())
        .with_context(|| format!("Failed to write {:?}", tmp.path()))?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to replace {:?}", path))?;
    Ok(())
}

/// Engine restored from `file`, or a fresh one if nothing was saved
pub async fn open_engine(config: Config, file: &StateFile) -> Result<NutriEngine> {
    match file.load().await? {
        Some(state) => NutriEngine::restore(config, state)
            .with_context(|| format!("Failed to restore state from {:?}", file.path())),
        None => Ok(NutriEngine::new(config)),
    }
}
