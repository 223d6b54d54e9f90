//! Model artifact provisioning.
//!
//! [`AssetProvisioner::provision`] acts on the user's [`AssetChoice`]:
//!
//! - download the required artifacts now, then the optional voice archive,
//!   extracting it once
//! - record a local model folder in `model_config.json` without inspecting it
//! - defer, leaving the server to fetch artifacts on first start

pub mod integrity;
mod source;
mod voices;

pub use integrity::{verify_models, VerifyReport, MODEL_FILES};
pub use source::{classify_download_error, ArtifactSource, HfHubSource};
pub use voices::{ensure_extracted, resolve_voice_dir, VoiceOutcome, VOICES_DIR};

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{AssetsConfig, ModelPathConfig};
use crate::credentials::Secret;
use crate::error::Result;

/// Why an artifact could not be provisioned.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("registry refused the access token for {file}")]
    Unauthorized { file: String },

    #[error("model license not accepted for {file}")]
    LicenseNotAccepted { file: String, license_url: String },

    #[error("rate limited by the registry while fetching {file} ({attempts} attempt(s))")]
    RateLimited { file: String, attempts: u32 },

    #[error("{file} not found in {repo}")]
    NotFound { repo: String, file: String },

    #[error("failed to download {file}: {cause}")]
    Download { file: String, cause: String },

    #[error("failed to extract {}: {cause}", archive.display())]
    Extract { archive: PathBuf, cause: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AssetError {
    /// What the user can do about it.
    #[must_use]
    pub fn next_action(&self) -> String {
        match self {
            Self::Unauthorized { .. } => {
                "Run `plexlaunch token` to enter a valid access token, then `plexlaunch models`."
                    .to_owned()
            }
            Self::LicenseNotAccepted { license_url, .. } => {
                format!("Accept the model license at {license_url}, then run `plexlaunch models`.")
            }
            Self::RateLimited { .. } => {
                "Wait a few minutes, then run `plexlaunch models` again.".to_owned()
            }
            Self::NotFound { repo, .. } => {
                format!("Check that the repository `{repo}` in the config file is correct.")
            }
            Self::Download { .. } | Self::Io(_) => {
                "Check your network connection and free disk space, then run `plexlaunch models`."
                    .to_owned()
            }
            Self::Extract { archive, .. } => format!(
                "Delete {} and run `plexlaunch models` to fetch it again.",
                archive.display()
            ),
        }
    }
}

/// How the user wants artifacts obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetChoice {
    DownloadNow,
    UseLocalPath(PathBuf),
    Defer,
}

impl fmt::Display for AssetChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DownloadNow => f.write_str("download now"),
            Self::UseLocalPath(path) => write!(f, "local folder {}", path.display()),
            Self::Defer => f.write_str("defer to first launch"),
        }
    }
}

/// Result of a provisioning run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionReport {
    Downloaded {
        files: Vec<PathBuf>,
        /// `None` when the optional voice archive was unavailable.
        voices: Option<VoiceOutcome>,
    },
    LocalPathRecorded(PathBuf),
    Deferred,
}

/// Fetches model artifacts ahead of launch.
pub struct AssetProvisioner<'a> {
    source: &'a dyn ArtifactSource,
    config: &'a AssetsConfig,
    repo_id: &'a str,
    install_dir: PathBuf,
    backoff: Duration,
}

impl<'a> AssetProvisioner<'a> {
    pub fn new(
        source: &'a dyn ArtifactSource,
        config: &'a AssetsConfig,
        repo_id: &'a str,
        install_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            config,
            repo_id,
            install_dir: install_dir.into(),
            backoff: Duration::from_secs(config.rate_limit_backoff_secs),
        }
    }

    /// Override the per-attempt rate-limit backoff step.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Act on `choice`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SetupError::AssetProvisionFailed`] when a required
    /// artifact cannot be fetched, or a config error when the local path
    /// record cannot be written.
    pub fn provision(&self, choice: &AssetChoice, token: Option<&Secret>) -> Result<ProvisionReport> {
        info!(%choice, repo = self.repo_id, "provisioning model artifacts");
        match choice {
            AssetChoice::DownloadNow => {
                let mut files = Vec::new();
                for file in integrity::required_files() {
                    files.push(self.fetch_with_retry(file.name, token)?);
                }
                let voices = self.fetch_voices(token);
                Ok(ProvisionReport::Downloaded { files, voices })
            }
            AssetChoice::UseLocalPath(path) => {
                ModelPathConfig {
                    custom_model_path: Some(path.clone()),
                }
                .save(&self.install_dir)?;
                info!(path = %path.display(), "custom model folder recorded");
                Ok(ProvisionReport::LocalPathRecorded(path.clone()))
            }
            AssetChoice::Defer => {
                info!("model download deferred; the server fetches artifacts on first start");
                Ok(ProvisionReport::Deferred)
            }
        }
    }

    /// Fetch and extract the voice archive. Failures only warn: the server
    /// can still fetch voices itself.
    pub fn fetch_voices(&self, token: Option<&Secret>) -> Option<VoiceOutcome> {
        let archive = match self.fetch_with_retry(&self.config.voices_archive, token) {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "voice prompts unavailable; the server will fetch them on first use");
                return None;
            }
        };
        match ensure_extracted(&archive) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(error = %e, next_action = %e.next_action(), "voice prompt extraction failed");
                None
            }
        }
    }

    /// Cached voice directory, if the archive was fetched and extracted before.
    #[must_use]
    pub fn cached_voice_dir(&self) -> Option<PathBuf> {
        let archive = self.source.cached(self.repo_id, &self.config.voices_archive)?;
        resolve_voice_dir(&archive.parent()?.join(VOICES_DIR))
    }

    fn fetch_with_retry(
        &self,
        filename: &str,
        token: Option<&Secret>,
    ) -> std::result::Result<PathBuf, AssetError> {
        let max_attempts = self.config.rate_limit_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.source.fetch(self.repo_id, filename, token) {
                Err(AssetError::RateLimited { file, .. }) if attempt < max_attempts => {
                    let wait = self.backoff.saturating_mul(attempt);
                    warn!(
                        file = %file,
                        attempt,
                        max_attempts,
                        wait_secs = wait.as_secs(),
                        "rate limited, waiting before retry"
                    );
                    std::thread::sleep(wait);
                    attempt += 1;
                }
                Err(AssetError::RateLimited { file, .. }) => {
                    return Err(AssetError::RateLimited {
                        file,
                        attempts: attempt,
                    });
                }
                other => return other,
            }
        }
    }
}
