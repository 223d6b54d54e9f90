//! Configuration types for the orchestrator.
//!
//! [`SetupConfig`] is read from TOML; every section falls back to defaults so
//! an empty or partial file is valid. [`ModelPathConfig`] is the small JSON
//! record of a user-supplied model folder, kept in the install directory where
//! the server's own tooling also reads it.

use crate::error::{Result, SetupError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the custom model path record inside the install directory.
pub const MODEL_CONFIG_FILE: &str = "model_config.json";

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupConfig {
    /// Language runtime discovery.
    pub runtime: RuntimeConfig,
    /// Sandbox location.
    pub sandbox: SandboxConfig,
    /// Model registry endpoints and credential conventions.
    pub registry: RegistryConfig,
    /// Server process invocation.
    pub server: ServerConfig,
    /// Web client build.
    pub client: ClientConfig,
    /// Model artifact provisioning.
    pub assets: AssetsConfig,
}

/// Language runtime discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Command names tried in order; first one that answers wins.
    pub commands: Vec<String>,
    /// Minimum `major.minor` version.
    pub min_version: String,
    /// Download page shown when no usable runtime is found.
    pub install_url: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let commands = if cfg!(windows) {
            vec!["python".to_owned(), "py".to_owned()]
        } else {
            vec!["python3".to_owned(), "python".to_owned()]
        };
        Self {
            commands,
            min_version: "3.10".to_owned(),
            install_url: "https://www.python.org/downloads/".to_owned(),
        }
    }
}

/// Sandbox location settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Explicit sandbox root. `None` uses `<install_dir>/<dir_name>`.
    pub path: Option<PathBuf>,
    /// Directory name under the install directory.
    pub dir_name: String,
    /// Pause before retrying a failed sandbox removal, in milliseconds.
    pub remove_retry_delay_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            path: None,
            dir_name: "venv".to_owned(),
            remove_retry_delay_ms: 2_000,
        }
    }
}

impl SandboxConfig {
    /// Resolve the sandbox root for an install directory.
    #[must_use]
    pub fn root(&self, install_dir: &Path) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| install_dir.join(&self.dir_name))
    }
}

/// Model registry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Model repository holding the server's weights.
    pub repo_id: String,
    /// Registry base URL.
    pub api_base: String,
    /// Environment variable holding an access token.
    pub token_env: String,
    /// Expected prefix of a well-formed token.
    pub token_prefix: String,
    /// Page where users create tokens.
    pub token_url: String,
    /// Page where users accept the model license.
    pub license_url: String,
    /// Keyring service name for persisted tokens.
    pub keyring_service: String,
    /// Keyring account name for persisted tokens.
    pub keyring_account: String,
    /// HTTP timeout for identity and license probes, in seconds.
    pub timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            repo_id: "nvidia/personaplex-7b-v1".to_owned(),
            api_base: "https://huggingface.co".to_owned(),
            token_env: "HF_TOKEN".to_owned(),
            token_prefix: "hf_".to_owned(),
            token_url: "https://huggingface.co/settings/tokens".to_owned(),
            license_url: "https://huggingface.co/nvidia/personaplex-7b-v1".to_owned(),
            keyring_service: "plexlaunch".to_owned(),
            keyring_account: "huggingface-token".to_owned(),
            timeout_secs: 10,
        }
    }
}

/// Server process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Module run with `<interpreter> -m`.
    pub module: String,
    /// Server package source directory, relative to the install directory.
    pub package_dir: String,
    pub host: String,
    pub port: u16,
    /// Value for `PYTORCH_CUDA_ALLOC_CONF` in the child environment.
    pub cuda_alloc_conf: String,
    /// Set `NO_TORCH_COMPILE` and `TORCHDYNAMO_DISABLE` in the child environment.
    pub disable_compile: bool,
    /// Parent directory for ephemeral TLS work directories. `None` uses the
    /// system temp directory.
    pub ssl_root: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            module: "moshi.server".to_owned(),
            package_dir: "moshi".to_owned(),
            host: "localhost".to_owned(),
            port: 8998,
            cuda_alloc_conf: "expandable_segments:True".to_owned(),
            disable_compile: true,
            ssl_root: None,
        }
    }
}

/// Web client build settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Client source directory, relative to the install directory.
    pub dir_name: String,
    /// Build output directory, relative to the client directory.
    pub dist_dir: String,
    /// Package manager command.
    pub package_manager: String,
    /// Flag added on the retry of a failed dependency install.
    pub relaxed_install_flag: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            dir_name: "client".to_owned(),
            dist_dir: "dist".to_owned(),
            package_manager: "npm".to_owned(),
            relaxed_install_flag: "--legacy-peer-deps".to_owned(),
        }
    }
}

/// Model artifact settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    /// Voice prompt archive in the model repository.
    pub voices_archive: String,
    /// Total download attempts per file while the registry rate limits,
    /// counting the first.
    pub rate_limit_attempts: u32,
    /// Base backoff between rate-limit retries, multiplied by the attempt number.
    pub rate_limit_backoff_secs: u64,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            voices_archive: "voices.tgz".to_owned(),
            rate_limit_attempts: 3,
            rate_limit_backoff_secs: 60,
        }
    }
}

impl SetupConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| SetupError::Config(format!("{}: {e}", path.display())))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| SetupError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        crate::plex_dirs::config_file()
    }

    /// Load from an explicit path, else the default path if it exists, else defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read or parsed.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        let default_path = Self::default_config_path();
        if default_path.is_file() {
            Self::from_file(&default_path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Record of a user-supplied model folder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPathConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_model_path: Option<PathBuf>,
}

impl ModelPathConfig {
    /// Read the record, treating a missing file as "no custom path".
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is not valid JSON.
    pub fn load(install_dir: &Path) -> Result<Self> {
        let path = install_dir.join(MODEL_CONFIG_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content)
            .map_err(|e| SetupError::Config(format!("{}: {e}", path.display())))
    }

    /// Write the record into the install directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, install_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(install_dir)?;
        let content =
            serde_json::to_string_pretty(self).map_err(|e| SetupError::Config(e.to_string()))?;
        std::fs::write(install_dir.join(MODEL_CONFIG_FILE), content)?;
        Ok(())
    }
}
