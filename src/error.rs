//! Error types for the setup and launch orchestrator.
//!
//! [`SetupError`] is the crate-wide taxonomy. Subsystems with their own
//! failure vocabulary ([`crate::credentials::CredentialError`],
//! [`crate::registry::RegistryError`], [`crate::assets::AssetError`],
//! [`crate::prompt::PromptError`]) convert into it at the orchestrator seam.

use std::path::PathBuf;

/// Top-level error type for the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// No language runtime was found on `PATH`.
    #[error("no supported language runtime found (tried: {})", tried.join(", "))]
    RuntimeNotFound {
        /// Command names that were probed, in order.
        tried: Vec<String>,
        minimum: String,
        /// Where the user can download a runtime.
        install_url: String,
    },

    /// A runtime was found but is older than the required minimum.
    #[error("runtime {found} is older than the required minimum {minimum}")]
    UnsupportedRuntime {
        found: String,
        minimum: String,
        install_url: String,
    },

    /// The user declined to continue after an advisory check failed.
    #[error("setup stopped by user: {reason}")]
    Declined { reason: String },

    /// The sandbox could not be created with a working interpreter.
    #[error("could not create sandbox at {}: {cause}", root.display())]
    SandboxCreationFailed { root: PathBuf, cause: String },

    /// No sandbox exists where one is required (e.g. launching before install).
    #[error("no sandbox found at {}", root.display())]
    SandboxMissing { root: PathBuf },

    /// Every install variant of a dependency failed verification.
    #[error("could not install {dependency} after {} attempt(s): {last_error}", attempts.len())]
    DependencyInstallExhausted {
        dependency: String,
        /// Descriptions of the variants attempted, in order.
        attempts: Vec<String>,
        /// Tail of the last failing attempt's output.
        last_error: String,
    },

    /// The web client build failed; the server falls back to reduced functionality.
    #[error("web client build degraded: {cause}")]
    BuildDegraded { cause: String, remediation: String },

    /// No registry credential is available.
    #[error("no registry access token available")]
    CredentialMissing { token_url: String },

    /// Model artifacts could not be provisioned ahead of launch.
    #[error("asset provisioning failed: {0}")]
    AssetProvisionFailed(#[from] crate::assets::AssetError),

    /// The server process could not be started or stopped abnormally.
    #[error("launch failed: {cause}")]
    LaunchFailed { cause: String, next_action: String },

    /// An operation was attempted from the wrong launch state.
    #[error("invalid launch transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Interactive input failed.
    #[error("prompt error: {0}")]
    Prompt(#[from] crate::prompt::PromptError),

    /// Credential storage error.
    #[error("credential error: {0}")]
    Credential(#[from] crate::credentials::CredentialError),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SetupError {
    /// Whether this failure stops orchestration.
    ///
    /// Required early stages (runtime detection, sandbox creation, required
    /// dependency installation) and launch are terminal; optional and late
    /// stages degrade and continue.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Self::BuildDegraded { .. }
                | Self::CredentialMissing { .. }
                | Self::AssetProvisionFailed(_)
        )
    }

    /// Concrete next action for the user: a command to run or a URL to visit.
    #[must_use]
    pub fn next_action(&self) -> Option<String> {
        match self {
            Self::RuntimeNotFound {
                minimum,
                install_url,
                ..
            } => Some(format!(
                "Install Python {minimum} or newer from {install_url} and make sure it is on PATH."
            )),
            Self::UnsupportedRuntime {
                minimum,
                install_url,
                ..
            } => Some(format!(
                "Install Python {minimum} or newer from {install_url}, then re-run the installer."
            )),
            Self::Declined { .. } => None,
            Self::SandboxCreationFailed { root, .. } => Some(format!(
                "Remove {} manually and run `plexlaunch install --fresh`.",
                root.display()
            )),
            Self::SandboxMissing { .. } => {
                Some("Run `plexlaunch install` before launching.".to_owned())
            }
            Self::DependencyInstallExhausted { dependency, .. } => Some(format!(
                "Check your network connection, then run `plexlaunch install --repair` to retry {dependency}."
            )),
            Self::BuildDegraded { remediation, .. } => Some(remediation.clone()),
            Self::CredentialMissing { token_url } => Some(format!(
                "Create a read token at {token_url} and run `plexlaunch token`."
            )),
            Self::AssetProvisionFailed(err) => Some(err.next_action()),
            Self::LaunchFailed { next_action, .. } => Some(next_action.clone()),
            Self::InvalidTransition { .. } | Self::Prompt(_) => None,
            Self::Credential(_) => Some("Run `plexlaunch token` to enter a token again.".to_owned()),
            Self::Config(_) => {
                Some("Fix or remove the config file named in the message above.".to_owned())
            }
            Self::Io(_) => None,
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SetupError>;
