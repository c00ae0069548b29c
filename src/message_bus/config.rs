//! Bus configuration for development and production environments
//!
//! Provides pre-configured settings optimized for different deployment
//! scenarios with validation and builder pattern support.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::domain_types::{ChannelCapacity, HistoryCapacity};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field failed a cross-check
    #[error("Invalid configuration: {field} - {reason}")]
    ValidationError {
        /// Offending field
        field: String,
        /// Why it was rejected
        reason: String,
    },

    /// Config file could not be read or written
    #[error("I/O error: {source}")]
    IoError {
        /// Underlying I/O failure
        #[from]
        source: std::io::Error,
    },

    /// Config file was not valid JSON
    #[error("Serialization error: {source}")]
    SerializationError {
        /// Underlying serde failure
        #[from]
        source: serde_json::Error,
    },
}

/// Complete bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Ring-buffer cap for the message and response histories
    pub history_capacity: HistoryCapacity,
    /// Capacity of the bus event broadcast channel
    pub event_channel_capacity: ChannelCapacity,
    /// Log individual dispatches at debug level instead of trace
    pub enable_detailed_logs: bool,
}

impl BusConfig {
    /// Creates a development configuration optimized for debugging
    ///
    /// Smaller histories for faster inspection, detailed per-dispatch logs.
    ///
    /// # Panics
    /// Panics if any of the hardcoded values are out of range for their
    /// domain types
    #[must_use]
    pub fn development() -> Self {
        Self {
            history_capacity: HistoryCapacity::try_new(1_000).unwrap(),
            event_channel_capacity: ChannelCapacity::try_new(256).unwrap(),
            enable_detailed_logs: true,
        }
    }

    /// Creates a production configuration optimized for sustained traffic
    ///
    /// # Panics
    /// Panics if any of the hardcoded values are out of range for their
    /// domain types
    #[must_use]
    pub fn production() -> Self {
        Self {
            history_capacity: HistoryCapacity::try_new(100_000).unwrap(),
            event_channel_capacity: ChannelCapacity::try_new(4_096).unwrap(),
            enable_detailed_logs: false,
        }
    }

    /// Creates a configuration suitable for tests
    ///
    /// # Panics
    /// Panics if any of the hardcoded values are out of range for their
    /// domain types
    #[must_use]
    pub fn testing() -> Self {
        Self {
            history_capacity: HistoryCapacity::try_new(10_000).unwrap(),
            event_channel_capacity: ChannelCapacity::try_new(1_024).unwrap(),
            enable_detailed_logs: false,
        }
    }

    /// Creates a configuration builder for custom settings
    #[must_use]
    pub fn builder() -> BusConfigBuilder {
        BusConfigBuilder::new()
    }

    /// Validates the configuration for consistency and reasonable values
    ///
    /// # Errors
    /// Returns `ConfigError` if any configuration values are inconsistent
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_capacity.as_usize() < 10 {
            return Err(ConfigError::ValidationError {
                field: "history_capacity".to_string(),
                reason: "Must be at least 10".to_string(),
            });
        }

        if self.event_channel_capacity.as_usize() < 16 {
            return Err(ConfigError::ValidationError {
                field: "event_channel_capacity".to_string(),
                reason: "Must be at least 16".to_string(),
            });
        }

        Ok(())
    }

    /// Saves configuration to a JSON file
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be written
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Loads and validates configuration from a JSON file
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed or
    /// validated
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::development()
    }
}

/// Builder for custom bus configurations
#[derive(Debug)]
pub struct BusConfigBuilder {
    config: BusConfig,
}

impl BusConfigBuilder {
    /// Creates a new builder starting with development defaults
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: BusConfig::development(),
        }
    }

    /// Sets the history ring-buffer capacity
    #[must_use]
    pub fn history_capacity(mut self, capacity: HistoryCapacity) -> Self {
        self.config.history_capacity = capacity;
        self
    }

    /// Sets the event channel capacity
    #[must_use]
    pub fn event_channel_capacity(mut self, capacity: ChannelCapacity) -> Self {
        self.config.event_channel_capacity = capacity;
        self
    }

    /// Enables or disables detailed per-dispatch logging
    #[must_use]
    pub fn enable_detailed_logs(mut self, enable: bool) -> Self {
        self.config.enable_detailed_logs = enable;
        self
    }

    /// Builds and validates the configuration
    ///
    /// # Errors
    /// Returns `ConfigError` if the configuration fails validation
    pub fn build(self) -> Result<BusConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for BusConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
