use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::ServiceError;

/// Environment variable naming the remote location of the model artifact.
pub const MODEL_URL_ENV: &str = "MODEL_URL";
/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "CRACKSCOPE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ModelConfig {
    /// Local artifact location, relative to the working directory.
    pub path: PathBuf,
    pub url: Option<String>,
    pub download_timeout_secs: u64,
    /// Vocabulary entry whose probability is reported as the confidence.
    pub positive_class: String,
    /// Use vocabulary index 1 when `positive_class` is missing instead of
    /// refusing to start.
    pub positive_fallback: bool,
    pub intra_threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("models").join("crack_classifier.tar.gz"),
            url: None,
            download_timeout_secs: 300,
            positive_class: "Positive".to_string(),
            positive_fallback: false,
            intra_threads: 4,
        }
    }
}

impl AppConfig {
    /// Reads the config file named by `CRACKSCOPE_CONFIG` (or `config.yaml`)
    /// and applies environment overrides. A missing file yields defaults.
    pub fn load() -> Result<Self, ServiceError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let mut config = Self::from_file(&path)?;
        config.apply_env_overrides(std::env::var(MODEL_URL_ENV).ok());
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ServiceError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|e| {
            ServiceError::Configuration(format!("{}: {}", path.display(), e))
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// `MODEL_URL` wins over the file; an empty value is ignored.
    pub fn apply_env_overrides(&mut self, model_url: Option<String>) {
        if let Some(url) = model_url.filter(|u| !u.trim().is_empty()) {
            self.model.url = Some(url);
        }
    }
}
