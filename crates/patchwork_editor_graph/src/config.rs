// SPDX-License-Identifier: MIT OR Apache-2.0
//! Editor tuning constants.
//!
//! None of these values are load-bearing for correctness; they control how
//! routes look and how forgiving pointer interaction is. Stored as RON:
//!
//! ```ron
//! (
//!     routing: (increment: 10.0, turn_penalty: 5.0),
//!     hit_tolerance: 3.0,
//!     update_interval_ms: 50,
//! )
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Current config format version
pub const CONFIG_FORMAT_VERSION: u32 = 1;

/// Errors while loading a config
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// RON syntax or type error
    #[error("Parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(#[from] ron::Error),

    /// A value is out of range
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Lattice pathfinder settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Lattice step in canvas units, independent of zoom
    pub increment: f32,
    /// Extra cost charged for every change of direction
    pub turn_penalty: f32,
    /// Free space around the endpoints and obstacles the search may use,
    /// in lattice steps
    pub margin_cells: u32,
    /// Upper bound on lattice nodes the search may expand
    pub max_explored: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            increment: 10.0,
            turn_penalty: 5.0,
            margin_cells: 3,
            max_explored: 50_000,
        }
    }
}

/// Editor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Format version
    pub version: u32,
    /// Pathfinder settings
    pub routing: RoutingConfig,
    /// Half-width of the band around a connection that counts as a hit
    pub hit_tolerance: f32,
    /// Side length of the reconnection handles at each end of a connection
    pub handle_size: f32,
    /// Slack used when testing connections against selection rectangles
    pub intersect_accuracy: f32,
    /// Batching window of the path update queue
    pub update_interval_ms: u64,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_FORMAT_VERSION,
            routing: RoutingConfig::default(),
            hit_tolerance: 3.0,
            handle_size: 8.0,
            intersect_accuracy: 4.0,
            update_interval_ms: 50,
        }
    }
}

impl EditorConfig {
    /// Parse a RON document
    pub fn from_ron_str(text: &str) -> Result<Self, ConfigError> {
        let config: EditorConfig = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_ron_str(&content)
    }

    /// Save the config to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let pretty = ron::ser::PrettyConfig::default().struct_names(false);
        let content = ron::ser::to_string_pretty(self, pretty)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Batching window as a duration
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    /// Reject values the editor cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version > CONFIG_FORMAT_VERSION {
            return Err(ConfigError::Invalid(format!(
                "Config version {} is newer than supported version {}",
                self.version, CONFIG_FORMAT_VERSION
            )));
        }
        if !(self.routing.increment.is_finite() && self.routing.increment > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "routing.increment must be positive, got {}",
                self.routing.increment
            )));
        }
        if self.routing.turn_penalty < 0.0 {
            return Err(ConfigError::Invalid("routing.turn_penalty must not be negative".into()));
        }
        if self.update_interval_ms == 0 {
            return Err(ConfigError::Invalid("update_interval_ms must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EditorConfig::default();
        assert_eq!(config.update_interval(), Duration::from_millis(50));
        assert_eq!(config.routing.increment, 10.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_document() {
        let config =
            EditorConfig::from_ron_str("(routing: (increment: 5.0), hit_tolerance: 6.0)").unwrap();
        assert_eq!(config.routing.increment, 5.0);
        assert_eq!(config.routing.max_explored, RoutingConfig::default().max_explored);
        assert_eq!(config.hit_tolerance, 6.0);
        assert_eq!(config.update_interval_ms, 50);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            EditorConfig::from_ron_str("(routing: (increment: 0.0))"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EditorConfig::from_ron_str("(update_interval_ms: 0)"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EditorConfig::from_ron_str("(routing: 3)"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_serialization() {
        let mut config = EditorConfig::default();
        config.routing.turn_penalty = 1.5;
        let text = ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::default()).unwrap();
        let loaded = EditorConfig::from_ron_str(&text).unwrap();
        assert_eq!(loaded, config);
    }
}
