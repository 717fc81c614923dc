//! Application configuration
//!
//! `config.yaml` holds the Paperless connection and at most one AI provider
//! key. It is looked up in the working directory first, then in the user's
//! config directory. Environment variables (also read from `.env`) take
//! precedence over file values.

use crate::ai::ProviderSelection;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

const CONFIG_FILE_NAME: &str = "config.yaml";
const APP_DIR_NAME: &str = "paperless-scan";

pub const ENV_API_URL: &str = "PAPERLESS_API_URL";
pub const ENV_API_TOKEN: &str = "PAPERLESS_API_TOKEN";
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_GEMINI_API_KEY: &str = "GEMINI_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_yaml::Error),

    #[error("`{0}` is not configured")]
    Missing(&'static str),
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api_url: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gemini_api_key: Option<String>,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |value: &Option<String>| value.as_ref().map(|_| "<redacted>");
        f.debug_struct("AppConfig")
            .field("api_url", &self.api_url)
            .field("api_token", &"<redacted>")
            .field("openai_api_key", &redact(&self.openai_api_key))
            .field("gemini_api_key", &redact(&self.gemini_api_key))
            .finish()
    }
}

/// Candidate config files, in lookup order
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME));
    }
    paths
}

/// Where a new config file is written when none exists yet
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

impl AppConfig {
    /// Load the first config file found, then apply environment overrides
    ///
    /// Returns the config and the file it came from; a missing file is not
    /// an error.
    pub fn load() -> Result<(Self, Option<PathBuf>), ConfigError> {
        let found = search_paths().into_iter().find(|p| p.is_file());
        let config = match &found {
            Some(path) => Self::from_file(path)?,
            None => {
                debug!("No config file found; using environment only");
                Self::default()
            }
        };
        Ok((config.with_overrides(|key| std::env::var(key).ok()), found))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        // An empty file parses as YAML null
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Replace values with non-empty entries from `lookup`
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = get(ENV_API_URL) {
            self.api_url = url;
        }
        if let Some(token) = get(ENV_API_TOKEN) {
            self.api_token = token;
        }
        if let Some(key) = get(ENV_OPENAI_API_KEY) {
            self.openai_api_key = Some(key);
        }
        if let Some(key) = get(ENV_GEMINI_API_KEY) {
            self.gemini_api_key = Some(key);
        }
        self
    }

    /// Paperless connection details must be present before uploading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_url.trim().is_empty() {
            return Err(ConfigError::Missing("api_url"));
        }
        if self.api_token.trim().is_empty() {
            return Err(ConfigError::Missing("api_token"));
        }
        Ok(())
    }

    /// Provider for filename recommendations; OpenAI wins when both keys are set
    pub fn provider(&self) -> ProviderSelection {
        if let Some(key) = non_empty(self.openai_api_key.as_ref()) {
            return ProviderSelection::openai(key);
        }
        if let Some(key) = non_empty(self.gemini_api_key.as_ref()) {
            return ProviderSelection::gemini(key);
        }
        ProviderSelection::None
    }

    /// Keep exactly the key of `selection`, dropping the other provider's
    pub fn set_provider(&mut self, selection: &ProviderSelection) {
        self.openai_api_key = None;
        self.gemini_api_key = None;
        match selection {
            ProviderSelection::OpenAi { api_key } => self.openai_api_key = Some(api_key.clone()),
            ProviderSelection::Gemini { api_key } => self.gemini_api_key = Some(api_key.clone()),
            ProviderSelection::None => {}
        }
    }

    /// Write the config to `path` (temp file, then rename)
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let yaml = serde_yaml::to_string(self)?;
        let tmp_path = path.with_extension("yaml.tmp");
        fs::write(&tmp_path, yaml.as_bytes()).map_err(write_err)?;
        fs::rename(&tmp_path, path).map_err(write_err)?;

        info!(path = %path.display(), provider = self.provider().as_str(), "Wrote config");
        Ok(())
    }
}
