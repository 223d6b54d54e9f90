//! Where model artifacts come from.

use std::path::PathBuf;

use hf_hub::api::sync::ApiError;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use super::AssetError;
use crate::credentials::Secret;

/// A token-gated artifact store with a local cache.
pub trait ArtifactSource {
    /// Local path of an already-downloaded artifact.
    fn cached(&self, repo_id: &str, filename: &str) -> Option<PathBuf>;

    /// Download an artifact (or reuse the cache) and return its local path.
    ///
    /// # Errors
    ///
    /// Returns a classified [`AssetError`].
    fn fetch(
        &self,
        repo_id: &str,
        filename: &str,
        token: Option<&Secret>,
    ) -> Result<PathBuf, AssetError>;
}

/// The Hugging Face hub through `hf-hub`'s blocking client.
pub struct HfHubSource {
    api_base: String,
}

impl HfHubSource {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_owned(),
        }
    }
}

impl ArtifactSource for HfHubSource {
    fn cached(&self, repo_id: &str, filename: &str) -> Option<PathBuf> {
        hf_hub::Cache::from_env()
            .model(repo_id.to_owned())
            .get(filename)
    }

    fn fetch(
        &self,
        repo_id: &str,
        filename: &str,
        token: Option<&Secret>,
    ) -> Result<PathBuf, AssetError> {
        if let Some(path) = self.cached(repo_id, filename) {
            println!("  {repo_id}/{filename}  [cached]");
            return Ok(path);
        }

        let api = hf_hub::api::sync::ApiBuilder::from_env()
            .with_endpoint(self.api_base.clone())
            .with_token(token.map(|t| t.expose().to_owned()))
            .build()
            .map_err(|e| AssetError::Download {
                file: filename.to_owned(),
                cause: format!("failed to create registry client: {e}"),
            })?;

        let pb = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::with_template(
            "  {msg} [{bar:30}] {bytes}/{total_bytes} {bytes_per_sec} ETA {eta}",
        ) {
            pb.set_style(style);
        }
        pb.set_message(filename.to_owned());

        debug!(repo = repo_id, file = filename, "downloading");
        api.model(repo_id.to_owned())
            .download_with_progress(filename, pb)
            .map_err(|e| {
                classify_download_error(
                    &self.api_base,
                    repo_id,
                    filename,
                    http_status(&e),
                    &e.to_string(),
                )
            })
    }
}

/// HTTP status the registry answered with, if the failure was one.
fn http_status(err: &ApiError) -> Option<u16> {
    match err {
        ApiError::RequestError(inner) => match inner.as_ref() {
            ureq::Error::Status(code, _) => Some(*code),
            ureq::Error::Transport(_) => None,
        },
        ApiError::TooManyRetries(inner) => http_status(inner),
        _ => None,
    }
}

/// Map a download failure onto the error taxonomy by its HTTP status.
/// Failures without a status are plain download errors.
#[must_use]
pub fn classify_download_error(
    api_base: &str,
    repo_id: &str,
    filename: &str,
    status: Option<u16>,
    message: &str,
) -> AssetError {
    let file = filename.to_owned();
    match status {
        Some(401) => AssetError::Unauthorized { file },
        Some(403) => AssetError::LicenseNotAccepted {
            file,
            license_url: format!("{api_base}/{repo_id}"),
        },
        Some(429) => AssetError::RateLimited { file, attempts: 1 },
        Some(404) => AssetError::NotFound {
            repo: repo_id.to_owned(),
            file,
        },
        _ => AssetError::Download {
            file,
            cause: message.to_owned(),
        },
    }
}
