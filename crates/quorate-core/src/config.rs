// Copyright 2024 The Quorate Authors
// SPDX-License-Identifier: Apache-2.0

//! Configuration management for Quorate.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default timeout for a reachability or status probe (ms).
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2_000;

/// Default timeout for opening a session to a member (ms).
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 5_000;

/// Default timeout for one rejoin attempt (ms).
pub const DEFAULT_REJOIN_TIMEOUT_MS: u64 = 60_000;

/// Default number of rejoin attempts dispatched at once.
pub const DEFAULT_MAX_CONCURRENT_REJOINS: usize = 4;

/// Default time an unreachable member must stay unreachable, while the rest of
/// the group holds quorum, before it is reported as missing (ms).
pub const DEFAULT_MISSING_AFTER_MS: u64 = 5_000;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Engine behaviour.
    pub engine: EngineConfig,
    /// Metadata storage.
    pub metadata: MetadataConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed or the result is invalid.
    pub fn parse(content: &str) -> crate::Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| crate::Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `path` if given, otherwise use defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] naming the first invalid setting.
    pub fn validate(&self) -> crate::Result<()> {
        self.engine.validate()
    }
}

/// Engine timeouts and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Timeout for reachability and status probes in milliseconds.
    pub probe_timeout_ms: u64,
    /// Timeout for opening a session to a member in milliseconds.
    pub session_timeout_ms: u64,
    /// Timeout for one rejoin attempt in milliseconds.
    pub rejoin_timeout_ms: u64,
    /// Maximum rejoin attempts dispatched concurrently during a reboot.
    pub max_concurrent_rejoins: usize,
    /// How long an unreachable member must stay unreachable, while the rest
    /// of the group holds quorum, before it is reported as missing.
    pub missing_after_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            session_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
            rejoin_timeout_ms: DEFAULT_REJOIN_TIMEOUT_MS,
            max_concurrent_rejoins: DEFAULT_MAX_CONCURRENT_REJOINS,
            missing_after_ms: DEFAULT_MISSING_AFTER_MS,
        }
    }
}

impl EngineConfig {
    /// Sets the probe timeout.
    #[must_use]
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the rejoin timeout.
    #[must_use]
    pub fn rejoin_timeout(mut self, timeout: Duration) -> Self {
        self.rejoin_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the maximum number of concurrent rejoins.
    #[must_use]
    pub fn max_concurrent_rejoins(mut self, max: usize) -> Self {
        self.max_concurrent_rejoins = max;
        self
    }

    /// Sets the unreachable-to-missing delay.
    #[must_use]
    pub fn missing_after(mut self, delay: Duration) -> Self {
        self.missing_after_ms = delay.as_millis() as u64;
        self
    }

    /// Returns the probe timeout as a Duration.
    pub fn probe_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Returns the session timeout as a Duration.
    pub fn session_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    /// Returns the rejoin timeout as a Duration.
    pub fn rejoin_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.rejoin_timeout_ms)
    }

    /// Returns the unreachable-to-missing delay as a Duration.
    pub fn missing_after_duration(&self) -> Duration {
        Duration::from_millis(self.missing_after_ms)
    }

    fn validate(&self) -> crate::Result<()> {
        if self.probe_timeout_ms == 0 {
            return Err(crate::Error::Config("engine.probe_timeout_ms must be positive".into()));
        }
        if self.session_timeout_ms == 0 {
            return Err(crate::Error::Config("engine.session_timeout_ms must be positive".into()));
        }
        if self.rejoin_timeout_ms == 0 {
            return Err(crate::Error::Config("engine.rejoin_timeout_ms must be positive".into()));
        }
        if self.max_concurrent_rejoins == 0 {
            return Err(crate::Error::Config(
                "engine.max_concurrent_rejoins must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Metadata storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Path of the redb metadata file.
    pub path: PathBuf,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self { path: PathBuf::from("quorate-metadata.redb") }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format.
    #[default]
    Pretty,
    /// JSON format.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Log output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Pretty }
    }
}
