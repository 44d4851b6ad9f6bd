//! Session configuration, loadable from a JSON file.

use crate::error::{SessionError, SessionResult};
use ot_engine::AlgorithmConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for a document session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Settings forwarded to the transformation engine
    pub engine: AlgorithmConfig,
    /// Maximum number of remote requests held back until they become ready
    pub max_pending_requests: usize,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            engine: AlgorithmConfig::default(),
            max_pending_requests: 1024,
            event_capacity: 256,
        }
    }
}

impl SessionConfig {
    /// Parse a configuration, reporting any error
    pub fn from_json_str(json: &str) -> SessionResult<Self> {
        serde_json::from_str(json).map_err(|e| SessionError::Config(e.to_string()))
    }

    /// Load a configuration file.
    ///
    /// A missing file yields the defaults. So does a file that fails to
    /// parse, after logging a warning. Only I/O failures on an existing file
    /// are reported.
    pub fn load(path: &Path) -> SessionResult<Self> {
        if !path.exists() {
            tracing::debug!("No session config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| SessionError::Config(e.to_string()))?;

        match serde_json::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!("Failed to parse session config, using defaults: {}", e);
                Ok(Self::default())
            }
        }
    }

    /// Write the configuration as pretty-printed JSON
    pub fn save(&self, path: &Path) -> SessionResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SessionError::Config(e.to_string()))?;
        }
        let content =
            serde_json::to_string_pretty(self).map_err(|e| SessionError::Config(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| SessionError::Config(e.to_string()))
    }
}
