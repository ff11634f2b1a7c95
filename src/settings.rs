//! Layered configuration.
//!
//! Values are resolved from the built-in defaults, then an optional TOML file, then environment
//! variables prefixed with `FILESERVE` (nested keys separated by `__`, e.g.
//! `FILESERVE__SERVER__PORT=9000`).

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{logging::LogFormat, reader::DEFAULT_BUFFER_CAPACITY};

/// The configuration file read by [`Settings::load`] when present.
pub const DEFAULT_CONFIG_FILE: &str = "fileserve.toml";

/// Prefix of the environment variables that override configuration values.
pub const ENV_PREFIX: &str = "FILESERVE";

/// The image bundled with the crate and served by default.
const BUNDLED_RESOURCE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/assets/parallel.png");

/// Errors raised while loading settings.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// A source could not be read or the merged values did not deserialize.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A value deserialized but is not usable.
    #[error("invalid setting `{key}`: {reason}")]
    Invalid {
        /// The dotted key of the offending value.
        key: &'static str,
        /// Why the value was rejected.
        reason: &'static str,
    },
}

/// All settings of the server binary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Where to listen.
    pub server: ServerSettings,
    /// What `/download` serves.
    pub download: DownloadSettings,
    /// Chunked reader tuning.
    pub reader: ReaderSettings,
    /// Logging output.
    pub log: LogSettings,
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Host or IP address to bind.
    pub host: String,
    /// TCP port to bind, `0` picks a free one.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// The resource served on `/download`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSettings {
    /// Path of the file to send.
    pub resource: PathBuf,
    /// File name announced in `Content-Disposition`.
    pub filename: String,
    /// Value of the `Content-Type` header.
    pub content_type: String,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            resource: PathBuf::from(BUNDLED_RESOURCE),
            filename: "parallel.png".to_string(),
            content_type: "image/png".to_string(),
        }
    }
}

/// Settings of the chunked reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderSettings {
    /// Size of the reusable read buffer in bytes.
    pub buffer_capacity: usize,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `info` or `fileserve=debug`.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl Settings {
    /// Loads settings using [`DEFAULT_CONFIG_FILE`] from the working directory.
    ///
    /// # Errors
    ///
    /// Returns a `SettingsError` if a source is malformed or a value is invalid.
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Loads settings, reading `path` as an optional TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `SettingsError` if a source is malformed or a value is invalid.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let settings: Self = Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.reader.buffer_capacity == 0 {
            return Err(SettingsError::Invalid {
                key: "reader.buffer_capacity",
                reason: "must be greater than zero",
            });
        }
        if self.download.filename.is_empty() {
            return Err(SettingsError::Invalid {
                key: "download.filename",
                reason: "must not be empty",
            });
        }
        Ok(())
    }
}
