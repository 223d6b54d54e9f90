//! Minimal model registry client (blocking): token identity lookup and
//! license-gate probing.
//!
//! Both calls are advisory. Callers log failures and keep going, because a
//! probe can fail for network reasons unrelated to the token.

use serde::Deserialize;
use std::time::Duration;

use crate::credentials::Secret;

const USER_AGENT: &str = concat!("plexlaunch/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry returned HTTP {status}")]
    Status { status: u16 },
    #[error("http error: {0}")]
    Transport(String),
    #[error("json error: {0}")]
    Json(String),
}

/// Whether an artifact can be fetched with the given credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessStatus {
    Granted,
    /// No token, or the registry rejected it.
    Unauthenticated,
    /// The token is valid but the model license has not been accepted.
    LicenseRequired,
    NotFound,
}

/// Registry operations the orchestrator depends on.
pub trait RegistryClient {
    /// Account name the token belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Status`] for a rejected token and
    /// [`RegistryError::Transport`] when the registry is unreachable.
    fn whoami(&self, token: &Secret) -> Result<String, RegistryError>;

    /// Probe whether `filename` in `repo_id` is downloadable.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Transport`] when the registry is unreachable,
    /// or [`RegistryError::Status`] for statuses without an [`AccessStatus`].
    fn check_access(
        &self,
        repo_id: &str,
        filename: &str,
        token: Option<&Secret>,
    ) -> Result<AccessStatus, RegistryError>;
}

#[derive(Debug, Deserialize)]
struct WhoAmIWire {
    name: String,
}

/// HTTP client for a Hugging Face compatible registry.
pub struct HfRegistry {
    agent: ureq::Agent,
    base_url: String,
}

impl HfRegistry {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: http_agent(timeout),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }
}

// No redirects: a 3xx on `resolve/` means the file is served from the CDN,
// which is all the access probe needs to know.
fn http_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(timeout)
        .timeout_read(timeout.saturating_mul(2))
        .redirects(0)
        .build()
}

fn bearer(token: &Secret) -> String {
    format!("Bearer {}", token.expose())
}

impl RegistryClient for HfRegistry {
    fn whoami(&self, token: &Secret) -> Result<String, RegistryError> {
        let url = format!("{}/api/whoami-v2", self.base_url);
        let resp = self
            .agent
            .get(&url)
            .set("User-Agent", USER_AGENT)
            .set("Authorization", &bearer(token))
            .call()
            .map_err(|e| match e {
                ureq::Error::Status(status, _) => RegistryError::Status { status },
                ureq::Error::Transport(t) => RegistryError::Transport(t.to_string()),
            })?;
        let body = resp
            .into_string()
            .map_err(|e| RegistryError::Transport(e.to_string()))?;
        let wire: WhoAmIWire =
            serde_json::from_str(&body).map_err(|e| RegistryError::Json(e.to_string()))?;
        Ok(wire.name)
    }

    fn check_access(
        &self,
        repo_id: &str,
        filename: &str,
        token: Option<&Secret>,
    ) -> Result<AccessStatus, RegistryError> {
        let url = format!("{}/{repo_id}/resolve/main/{filename}", self.base_url);
        let mut request = self.agent.head(&url).set("User-Agent", USER_AGENT);
        if let Some(token) = token {
            request = request.set("Authorization", &bearer(token));
        }
        match request.call() {
            Ok(resp) if resp.status() < 400 => Ok(AccessStatus::Granted),
            Ok(resp) => access_from_status(resp.status()),
            Err(ureq::Error::Status(status, _)) => access_from_status(status),
            Err(ureq::Error::Transport(t)) => Err(RegistryError::Transport(t.to_string())),
        }
    }
}

fn access_from_status(status: u16) -> Result<AccessStatus, RegistryError> {
    match status {
        401 => Ok(AccessStatus::Unauthenticated),
        403 => Ok(AccessStatus::LicenseRequired),
        404 => Ok(AccessStatus::NotFound),
        other => Err(RegistryError::Status { status: other }),
    }
}
