//! Centralized directory paths for plexlaunch.
//!
//! Uses the [`dirs`] crate for platform-appropriate resolution.
//!
//! | Purpose | Linux | macOS |
//! |---------|-------|-------|
//! | Config | `~/.config/plexlaunch/` | `~/Library/Application Support/plexlaunch/` |
//! | Logs | `~/.local/share/plexlaunch/logs/` | `~/Library/Application Support/plexlaunch/logs/` |
//!
//! # Environment Overrides
//!
//! - `PLEXLAUNCH_CONFIG_DIR` overrides [`config_dir`]
//! - `PLEXLAUNCH_LOG_DIR` overrides [`logs_dir`]
//! - `PLEXLAUNCH_INSTALL_DIR` overrides the default of [`install_dir`]
//! - `HF_HOME` relocates [`hf_token_file`], matching the registry CLI

use std::path::{Path, PathBuf};

/// Application config directory.
///
/// Resolves to `dirs::config_dir()/plexlaunch/` by default.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("PLEXLAUNCH_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("plexlaunch"))
        .unwrap_or_else(|| std::env::temp_dir().join("plexlaunch-config"))
}

/// Log file directory.
#[must_use]
pub fn logs_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("PLEXLAUNCH_LOG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("plexlaunch").join("logs"))
        .unwrap_or_else(|| std::env::temp_dir().join("plexlaunch-logs"))
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Installation root holding the server sources, web client, sandbox and
/// `model_config.json`.
///
/// An explicit path wins, then `PLEXLAUNCH_INSTALL_DIR`, then the current
/// working directory.
#[must_use]
pub fn install_dir(explicit: Option<&Path>) -> PathBuf {
    resolve_install_dir(
        explicit,
        std::env::var_os("PLEXLAUNCH_INSTALL_DIR").map(PathBuf::from),
    )
}

fn resolve_install_dir(explicit: Option<&Path>, from_env: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Some(path) = from_env {
        return path;
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Token file written by the registry's own login command.
///
/// `$HF_HOME/token` when `HF_HOME` is set, otherwise
/// `~/.cache/huggingface/token`.
#[must_use]
pub fn hf_token_file() -> Option<PathBuf> {
    if let Some(home) = std::env::var_os("HF_HOME") {
        return Some(PathBuf::from(home).join("token"));
    }
    dirs::home_dir().map(|h| h.join(".cache").join("huggingface").join("token"))
}
