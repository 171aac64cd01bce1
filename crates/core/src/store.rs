//! Catalog persistence.
//!
//! The supervisor persists its full catalog — process descriptions plus
//! per-process and system metadata — as one unit through an opaque
//! [`Store`]. Stored configs keep the user's original strings; placeholder
//! and reference resolution are re-applied on every load.

use crate::process::Process;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Arbitrary user metadata attached to a process or the supervisor.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error reading or writing the catalog.
    #[error("store IO error: {0}")]
    Io(#[from] io::Error),

    /// The persisted catalog could not be parsed.
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Metadata maps persisted alongside the catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoreMetadata {
    #[serde(default)]
    pub system: Metadata,
    #[serde(default)]
    pub process: HashMap<String, Metadata>,
}

/// The complete persisted state of a supervisor.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoreData {
    #[serde(default)]
    pub process: HashMap<String, Process>,
    #[serde(default)]
    pub metadata: StoreMetadata,
}

/// Load/store of the full catalog.
pub trait Store: Send + Sync {
    fn load(&self) -> Result<StoreData, StoreError>;
    fn store(&self, data: &StoreData) -> Result<(), StoreError>;
}

/// File-backed store keeping the catalog as one pretty-printed JSON file.
///
/// A missing file loads as an empty catalog.
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl Store for JsonStore {
    fn load(&self) -> Result<StoreData, StoreError> {
        if !self.path.exists() {
            return Ok(StoreData::default());
        }

        let content = fs::read_to_string(&self.path)?;
        let data = serde_json::from_str(&content)?;

        Ok(data)
    }

    fn store(&self, data: &StoreData) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, json)?;

        Ok(())
    }
}

/// In-memory store, the default when no persistence is configured.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<StoreData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn load(&self) -> Result<StoreData, StoreError> {
        Ok(self.data.lock().unwrap().clone())
    }

    fn store(&self, data: &StoreData) -> Result<(), StoreError> {
        *self.data.lock().unwrap() = data.clone();
        Ok(())
    }
}
