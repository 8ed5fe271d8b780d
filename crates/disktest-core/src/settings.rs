//! Persistent user settings for disktest
//!
//! A TOML file in the platform config directory
//! (`dirs_next::config_dir()/disktest/disktest_config.toml`) supplies the
//! defaults that `disktest run` uses when an option is not given:
//!
//! ```toml
//! [test]
//! file_size = "1G"
//! chunk_size = "32M"
//! patterns = "00,FF,AA,55,RND"
//!
//! [logging]
//! log_dir = "/var/tmp/disktest-logs"
//!
//! [behavior]
//! skip_confirmation = false
//! quiet = false
//! ```
//!
//! Loading never fails. A missing file gives the defaults, an unparsable file
//! gives the defaults with a warning, and a `[test]` value that does not
//! parse is replaced by its default on its own so the rest of the file still
//! applies.

use crate::pattern::{parse_pattern_list, PatternKind};
use crate::size::parse_size;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "disktest_config.toml";
const APP_NAME: &str = "disktest";

/// User settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Defaults for new runs
    pub test: TestSettings,

    /// Where the log file goes when the target is not writable
    pub logging: LoggingSettings,

    /// Prompt and output behaviour
    pub behavior: BehaviorSettings,
}

/// Defaults applied to new runs. Values are kept as the user wrote them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TestSettings {
    /// Per-file size, e.g. "1G"
    pub file_size: String,

    /// Chunk size, e.g. "32M"
    pub chunk_size: String,

    /// Comma separated patterns, e.g. "00,FF,RND"
    pub patterns: String,
}

impl Default for TestSettings {
    fn default() -> Self {
        Self {
            file_size: "1G".to_string(),
            chunk_size: "32M".to_string(),
            patterns: "00,FF,AA,55,RND".to_string(),
        }
    }
}

impl TestSettings {
    /// Parsed per-file size
    pub fn file_size_bytes(&self) -> crate::Result<u64> {
        parse_size(&self.file_size)
    }

    /// Parsed chunk size
    pub fn chunk_size_bytes(&self) -> crate::Result<usize> {
        let size = parse_size(&self.chunk_size)?;
        usize::try_from(size).map_err(|_| {
            crate::Error::InvalidConfig(format!("chunk size '{}' is too large", self.chunk_size))
        })
    }

    /// Parsed pattern selection
    pub fn pattern_list(&self) -> crate::Result<Vec<PatternKind>> {
        parse_pattern_list(&self.patterns)
    }

    /// Replace every value that does not parse with its default.
    /// Returns one message per replaced value.
    fn sanitize(&mut self) -> Vec<String> {
        let defaults = Self::default();
        let mut replaced = Vec::new();

        if let Err(e) = self.file_size_bytes() {
            replaced.push(format!("test.file_size: {}", e));
            self.file_size = defaults.file_size;
        }
        if let Err(e) = self.chunk_size_bytes() {
            replaced.push(format!("test.chunk_size: {}", e));
            self.chunk_size = defaults.chunk_size;
        }
        if let Err(e) = self.pattern_list() {
            replaced.push(format!("test.patterns: {}", e));
            self.patterns = defaults.patterns;
        }
        replaced
    }
}

/// Log file settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    /// Fallback directory for the log file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

/// Prompt and output behaviour
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BehaviorSettings {
    /// Answer yes to every confirmation
    pub skip_confirmation: bool,

    /// Only print errors
    pub quiet: bool,
}

impl Settings {
    /// Settings from the default location
    pub fn load() -> Self {
        Self::load_from_path(Self::config_path())
    }

    /// Settings from `path`, falling back to defaults
    pub fn load_from_path(path: Option<PathBuf>) -> Self {
        let Some(path) = path.filter(|p| p.exists()) else {
            tracing::debug!("No settings file, using defaults");
            return Self::default();
        };

        let parsed = fs::read_to_string(&path)
            .map_err(|source| SettingsError::Io {
                path: path.clone(),
                source,
            })
            .and_then(|contents| Self::from_toml(&contents));

        match parsed {
            Ok(mut settings) => {
                for problem in settings.test.sanitize() {
                    tracing::warn!("{}: {}; using the default", path.display(), problem);
                }
                tracing::debug!("Loaded settings from {}", path.display());
                settings
            }
            Err(e) => {
                tracing::warn!("Ignoring {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Write the settings to `path`.
    ///
    /// The file is written next to its destination and renamed over it, so an
    /// interrupted save leaves the previous file intact.
    pub fn save_to_path(&self, path: Option<PathBuf>) -> Result<PathBuf, SettingsError> {
        let path = path.ok_or(SettingsError::NoConfigDir)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        let contents = toml::to_string_pretty(self).map_err(SettingsError::Serialize)?;
        let tmp = path.with_extension("toml.tmp");
        fs::write(&tmp, contents).map_err(io_err(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_err(&path))?;

        tracing::info!("Saved settings to {}", path.display());
        Ok(path)
    }

    /// Parse settings from TOML text without sanitizing
    pub fn from_toml(contents: &str) -> Result<Self, SettingsError> {
        toml::from_str(contents).map_err(SettingsError::Deserialize)
    }

    /// Default settings file location
    pub fn config_path() -> Option<PathBuf> {
        dirs_next::config_dir().map(|p| p.join(APP_NAME).join(CONFIG_FILE_NAME))
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SettingsError {
    let path = path.to_path_buf();
    move |source| SettingsError::Io { path, source }
}

/// Settings file errors
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The platform has no config directory
    #[error("No configuration directory on this system")]
    NoConfigDir,

    /// Reading or writing failed
    #[error("Cannot access {path}: {source}")]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// Cause
        source: std::io::Error,
    },

    /// TOML encoding failed
    #[error("Cannot encode settings: {0}")]
    Serialize(toml::ser::Error),

    /// TOML decoding failed
    #[error("Invalid settings file: {0}")]
    Deserialize(toml::de::Error),
}
