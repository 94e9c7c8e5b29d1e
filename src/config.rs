//! Ambient application configuration.
//!
//! Persisted settings that apply across runs (default mount point, lock
//! file location, default worker count). Per-run behavior (which files to
//! ingest, quality, force flags) comes from CLI arguments, not this file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top level configuration, loaded from `<config_dir>/gpod-cp/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub ingest: IngestDefaults,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            ingest: IngestDefaults::default(),
        }
    }
}

/// Device-related defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    /// Default mount point, used when `--mount-point` is not given.
    #[serde(default)]
    pub mount_point: Option<PathBuf>,

    /// Directory containing the advisory process lock file.
    #[serde(default = "default_lock_dir")]
    pub lock_dir: PathBuf,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            mount_point: None,
            lock_dir: default_lock_dir(),
        }
    }
}

fn default_lock_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

/// Defaults for the ingest orchestrator, overridable per-run via CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestDefaults {
    #[serde(default = "default_threads")]
    pub max_threads: usize,

    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,

    #[serde(default)]
    pub sanitize: bool,

    #[serde(default)]
    pub checksum: bool,
}

impl Default for IngestDefaults {
    fn default() -> Self {
        Self {
            max_threads: default_threads(),
            recent_limit: default_recent_limit(),
            sanitize: false,
            checksum: false,
        }
    }
}

fn default_threads() -> usize {
    4
}

fn default_recent_limit() -> usize {
    25
}

/// Configuration-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("no config directory available on this platform")]
    NoConfigDir,
}

impl Config {
    /// Default config file path: `<os config dir>/gpod-cp/config.toml`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(dir.join("gpod-cp").join("config.toml"))
    }

    /// Load configuration from the default path, falling back to built-in
    /// defaults (and logging) on any read/parse failure. Mirrors the
    /// "never fail the run over a bad config file" posture used throughout
    /// this tool's ambient stack.
    pub fn load() -> Self {
        match Self::default_path() {
            Ok(path) => Self::load_from(&path).unwrap_or_else(|err| {
                tracing::warn!(?path, %err, "falling back to default config");
                Self::default()
            }),
            Err(err) => {
                tracing::warn!(%err, "no config directory available, using defaults");
                Self::default()
            }
        }
    }

    /// Load from an explicit path, propagating errors for callers (tests)
    /// that want to distinguish "missing" from "corrupt".
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Save configuration atomically: write to a temp file in the same
    /// directory, then rename over the target.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::default_path()?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self)?;
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrips_through_toml() {
        let cfg = Config::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(cfg, parsed);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let text = "[ingest]\nmax_threads = 8\n";
        let parsed: Config = toml::from_str(text).unwrap();
        assert_eq!(parsed.ingest.max_threads, 8);
        assert_eq!(parsed.ingest.recent_limit, default_recent_limit());
        assert!(parsed.device.mount_point.is_none());
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let cfg = Config::load_from(&path).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut cfg = Config::default();
        cfg.ingest.max_threads = 16;
        cfg.save_to(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, cfg);
    }
}
