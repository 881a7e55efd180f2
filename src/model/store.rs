use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::config::{ModelConfig, MODEL_URL_ENV};
use crate::error::ServiceError;

/// Local home of the model artifact, filled from a remote URL on first use.
#[derive(Clone, Debug)]
pub struct ModelStore {
    path: PathBuf,
    url: Option<String>,
    timeout: Duration,
}

impl ModelStore {
    pub fn new(path: impl Into<PathBuf>, url: Option<String>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            url,
            timeout,
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(
            config.path.clone(),
            config.url.clone(),
            Duration::from_secs(config.download_timeout_secs),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_present(&self) -> bool {
        self.path.is_file()
    }

    /// Makes sure the artifact exists locally, downloading it if needed.
    /// A no-op once the file is there.
    pub async fn ensure_available(&self) -> Result<&Path, ServiceError> {
        if self.is_present() {
            debug!(path = %self.path.display(), "model already present");
            return Ok(&self.path);
        }

        let url = self
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                ServiceError::Configuration(format!(
                    "{} env var not set and no model at {}",
                    MODEL_URL_ENV,
                    self.path.display()
                ))
            })?;

        info!(url, path = %self.path.display(), "Downloading model");
        let bytes = self.download(url).await?;
        self.persist(&bytes)?;
        info!(bytes = bytes.len(), path = %self.path.display(), "Model stored");

        Ok(&self.path)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ServiceError> {
        let fetch_err = |source: reqwest::Error| ServiceError::ModelFetch {
            url: url.to_string(),
            source,
        };

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10).min(self.timeout))
            .timeout(self.timeout)
            .build()
            .map_err(fetch_err)?;

        let response = client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(fetch_err)?;

        let bytes = response.bytes().await.map_err(fetch_err)?;
        Ok(bytes.to_vec())
    }

    /// Writes to a temp file beside the target and renames it into place, so
    /// the artifact path never holds a partial download.
    fn persist(&self, bytes: &[u8]) -> Result<(), ServiceError> {
        let store_err = |source: std::io::Error| ServiceError::ModelStore {
            path: self.path.display().to_string(),
            source,
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(store_err)?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(store_err)?;
        tmp.write_all(bytes).map_err(store_err)?;
        tmp.as_file().sync_all().map_err(store_err)?;
        tmp.persist(&self.path).map_err(|e| store_err(e.error))?;

        Ok(())
    }
}
