//! plexlaunch: set up and launch a local GPU speech model server.
//!
//! The installer walks a fixed sequence of stages:
//!
//! - **Probe**: runtime, GPU and build toolchain detection
//! - **Sandbox**: create or reuse the isolated interpreter environment
//! - **Dependencies**: ordered fallback chains per package
//! - **Client build**: optional web client, degrading to a status page
//! - **Credentials**: registry token from env, saved login, or prompt
//! - **Assets**: download, point at a local folder, or defer
//! - **Launch**: choose a mode, assemble the server command, supervise it
//!
//! Subprocesses, prompts, credential storage and the registry sit behind
//! traits so the whole flow can be scripted.

pub mod assets;
pub mod client;
pub mod config;
pub mod credentials;
pub mod doctor;
pub mod error;
pub mod exec;
pub mod launch;
pub mod logging;
pub mod menu;
pub mod orchestrator;
pub mod plex_dirs;
pub mod probe;
pub mod prompt;
pub mod registry;
pub mod resolver;
pub mod sandbox;
pub mod supervisor;

#[cfg(test)]
mod test_utils;

pub use config::SetupConfig;
pub use error::{Result, SetupError};
pub use orchestrator::{InstallMode, InstallOptions, Orchestrator, Services};
