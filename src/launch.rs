//! Launch selection and server invocation assembly.
//!
//! [`LaunchSelector`] walks a one-way state machine:
//!
//! ```text
//! Idle → ModeSelected → ConfigBuilt → Launched
//! ```
//!
//! Selecting a mode is always an explicit caller choice. Building the config
//! resolves the static client path (a built client, else the `none`
//! sentinel) and allocates a uniquely named TLS work directory. Launching
//! hands the config to the [`ProcessSupervisor`]; the selector cannot be
//! re-entered afterwards.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::assets::MODEL_FILES;
use crate::config::{ClientConfig, ServerConfig};
use crate::credentials::Secret;
use crate::error::{Result, SetupError};
use crate::exec::{CommandRunner, CommandSpec};
use crate::probe::EnvironmentReport;
use crate::sandbox::SandboxHandle;
use crate::supervisor::{ExitClassification, ProcessSupervisor};

/// Static path sentinel for the reduced-functionality status page.
pub const STATIC_NONE: &str = "none";

/// Module that must import for a public tunnel launch.
pub const TUNNEL_MODULE: &str = "gradio";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    Normal,
    /// Split the model between GPU and CPU memory.
    CpuOffload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exposure {
    Local,
    /// Reachable from outside through a relay.
    PublicTunnel,
}

/// One of the four mode × exposure combinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchSelection {
    pub mode: LaunchMode,
    pub exposure: Exposure,
}

impl LaunchSelection {
    pub const fn new(mode: LaunchMode, exposure: Exposure) -> Self {
        Self { mode, exposure }
    }

    /// Every combination, in menu order.
    #[must_use]
    pub fn all() -> [Self; 4] {
        [
            Self::new(LaunchMode::Normal, Exposure::Local),
            Self::new(LaunchMode::CpuOffload, Exposure::Local),
            Self::new(LaunchMode::Normal, Exposure::PublicTunnel),
            Self::new(LaunchMode::CpuOffload, Exposure::PublicTunnel),
        ]
    }

    /// Advisory default: CPU offload when no GPU was detected.
    #[must_use]
    pub fn recommended(report: &EnvironmentReport) -> Self {
        let mode = if report.gpu_present {
            LaunchMode::Normal
        } else {
            LaunchMode::CpuOffload
        };
        Self::new(mode, Exposure::Local)
    }
}

impl fmt::Display for LaunchSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode {
            LaunchMode::Normal => "normal",
            LaunchMode::CpuOffload => "CPU offload",
        };
        let exposure = match self.exposure {
            Exposure::Local => "local",
            Exposure::PublicTunnel => "public tunnel",
        };
        write!(f, "{mode}, {exposure}")
    }
}

/// Launch selector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    Idle,
    ModeSelected,
    ConfigBuilt,
    Launched,
}

impl LaunchState {
    /// - `Idle → ModeSelected`
    /// - `ModeSelected → ModeSelected` (changing the choice before building)
    /// - `ModeSelected → ConfigBuilt`
    /// - `ConfigBuilt → Launched`
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Idle | Self::ModeSelected, Self::ModeSelected)
                | (Self::ModeSelected, Self::ConfigBuilt)
                | (Self::ConfigBuilt, Self::Launched)
        )
    }
}

impl fmt::Display for LaunchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::ModeSelected => "mode_selected",
            Self::ConfigBuilt => "config_built",
            Self::Launched => "launched",
        };
        f.write_str(label)
    }
}

/// Scratch directory for the server's self-signed TLS material. Removed when
/// dropped.
#[derive(Debug)]
pub struct SslWorkDir {
    path: PathBuf,
}

impl SslWorkDir {
    /// Create `plexlaunch-ssl-<uuid>` under `root` (the system temp dir when
    /// `None`).
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn create(root: Option<&Path>) -> std::io::Result<Self> {
        let base = root.map_or_else(std::env::temp_dir, Path::to_path_buf);
        let path = base.join(format!("plexlaunch-ssl-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path)?;
        debug!(path = %path.display(), "allocated TLS work directory");
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SslWorkDir {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed TLS work directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "could not remove TLS work directory"),
        }
    }
}

/// Variables handed to the server process, and only to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchEnvironment {
    pub token_env: String,
    pub token: Option<Secret>,
    pub cuda_alloc_conf: String,
    pub disable_compile: bool,
}

impl LaunchEnvironment {
    pub fn new(server: &ServerConfig, token_env: &str, token: Option<Secret>) -> Self {
        Self {
            token_env: token_env.to_owned(),
            token,
            cuda_alloc_conf: server.cuda_alloc_conf.clone(),
            disable_compile: server.disable_compile,
        }
    }

    /// Add the variables to `spec`.
    #[must_use]
    pub fn apply(&self, mut spec: CommandSpec) -> CommandSpec {
        if let Some(token) = &self.token {
            spec = spec.env(&self.token_env, token.expose());
        }
        if !self.cuda_alloc_conf.is_empty() {
            spec = spec.env("PYTORCH_CUDA_ALLOC_CONF", &self.cuda_alloc_conf);
        }
        if self.disable_compile {
            spec = spec
                .env("NO_TORCH_COMPILE", "1")
                .env("TORCHDYNAMO_DISABLE", "1");
        }
        spec
    }
}

/// Everything needed to start the server.
#[derive(Debug)]
pub struct LaunchConfig {
    pub selection: LaunchSelection,
    /// Built web client; `None` serves the status page.
    pub static_asset_path: Option<PathBuf>,
    pub ssl_work_dir: SslWorkDir,
    pub voice_dir: Option<PathBuf>,
    /// Folder holding the model files instead of the registry cache.
    pub custom_model_path: Option<PathBuf>,
    pub interpreter: PathBuf,
    pub server: ServerConfig,
    pub environment: LaunchEnvironment,
}

impl LaunchConfig {
    /// The server invocation.
    #[must_use]
    pub fn command(&self) -> CommandSpec {
        let static_arg = self
            .static_asset_path
            .as_ref()
            .map_or_else(|| STATIC_NONE.to_owned(), |p| p.display().to_string());

        let mut spec = CommandSpec::new(&self.interpreter)
            .args(["-m", self.server.module.as_str()])
            .args(["--host", self.server.host.as_str()])
            .args(["--port".to_owned(), self.server.port.to_string()])
            .args(["--ssl".to_owned(), self.ssl_work_dir.path().display().to_string()])
            .args(["--static".to_owned(), static_arg]);

        if let Some(dir) = &self.voice_dir {
            spec = spec.args(["--voice-prompt-dir".to_owned(), dir.display().to_string()]);
        }
        if self.selection.mode == LaunchMode::CpuOffload {
            spec = spec.arg("--cpu-offload");
        }
        if self.selection.exposure == Exposure::PublicTunnel {
            spec = spec.arg("--gradio-tunnel");
        }
        if let Some(folder) = &self.custom_model_path {
            for file in &MODEL_FILES {
                if let Some(flag) = file.server_flag {
                    spec = spec.args([flag.to_owned(), folder.join(file.name).display().to_string()]);
                }
            }
        }
        self.environment.apply(spec)
    }

    /// Local URL the server listens on.
    #[must_use]
    pub fn url(&self) -> String {
        format!("https://{}:{}", self.server.host, self.server.port)
    }
}

/// Inputs resolved by the caller before the config is built.
#[derive(Debug)]
pub struct LaunchContext<'a> {
    pub interpreter: &'a Path,
    pub install_dir: &'a Path,
    pub server: &'a ServerConfig,
    pub client: &'a ClientConfig,
    pub voice_dir: Option<PathBuf>,
    pub custom_model_path: Option<PathBuf>,
    pub environment: LaunchEnvironment,
}

/// The launch state machine.
#[derive(Debug)]
pub struct LaunchSelector {
    state: LaunchState,
    selection: Option<LaunchSelection>,
    config: Option<LaunchConfig>,
}

impl Default for LaunchSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl LaunchSelector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: LaunchState::Idle,
            selection: None,
            config: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> LaunchState {
        self.state
    }

    #[must_use]
    pub fn config(&self) -> Option<&LaunchConfig> {
        self.config.as_ref()
    }

    fn advance(&mut self, target: LaunchState) -> Result<()> {
        if !self.state.can_transition_to(target) {
            return Err(SetupError::InvalidTransition {
                from: self.state.to_string(),
                to: target.to_string(),
            });
        }
        debug!(from = %self.state, to = %target, "launch state");
        self.state = target;
        Ok(())
    }

    /// Record the caller's mode choice.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::InvalidTransition`] once a config is built.
    pub fn select(&mut self, selection: LaunchSelection) -> Result<()> {
        self.advance(LaunchState::ModeSelected)?;
        info!(%selection, "launch mode selected");
        self.selection = Some(selection);
        Ok(())
    }

    /// Resolve the static path and allocate the TLS work directory.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::InvalidTransition`] unless a mode is selected,
    /// or an I/O error if the work directory cannot be created.
    pub fn build_config(&mut self, ctx: LaunchContext<'_>) -> Result<&LaunchConfig> {
        let selection = match (self.state, self.selection) {
            (LaunchState::ModeSelected, Some(selection)) => selection,
            _ => {
                return Err(SetupError::InvalidTransition {
                    from: self.state.to_string(),
                    to: LaunchState::ConfigBuilt.to_string(),
                });
            }
        };

        let static_asset_path = crate::client::built_client_dir(ctx.install_dir, ctx.client);
        if static_asset_path.is_none() {
            warn!("no built web client found; the server will show a status page only");
        }
        let ssl_work_dir = SslWorkDir::create(ctx.server.ssl_root.as_deref())?;

        self.advance(LaunchState::ConfigBuilt)?;
        Ok(self.config.insert(LaunchConfig {
            selection,
            static_asset_path,
            ssl_work_dir,
            voice_dir: ctx.voice_dir,
            custom_model_path: ctx.custom_model_path,
            interpreter: ctx.interpreter.to_path_buf(),
            server: ctx.server.clone(),
            environment: ctx.environment,
        }))
    }

    /// Hand the config to the supervisor and block until the server exits.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::InvalidTransition`] without a built config, or
    /// [`SetupError::LaunchFailed`] if the server cannot be started.
    pub fn launch(&mut self, supervisor: &ProcessSupervisor<'_>) -> Result<ExitClassification> {
        self.advance(LaunchState::Launched)?;
        let config = self.config.take().ok_or_else(|| SetupError::InvalidTransition {
            from: LaunchState::ConfigBuilt.to_string(),
            to: LaunchState::Launched.to_string(),
        })?;
        supervisor.run(config)
    }
}

/// Checks run before a launch. Returns advisory warnings.
///
/// # Errors
///
/// Returns [`SetupError::LaunchFailed`] when the sandbox is missing or the
/// server package does not import.
pub fn preflight(
    runner: &dyn CommandRunner,
    sandbox: &SandboxHandle,
    server: &ServerConfig,
    selection: LaunchSelection,
    report: &EnvironmentReport,
) -> Result<Vec<String>> {
    if !sandbox.exists {
        return Err(SetupError::LaunchFailed {
            cause: format!("no environment found at {}", sandbox.root_path.display()),
            next_action: "Run `plexlaunch install` first.".to_owned(),
        });
    }

    let package = server.module.split('.').next().unwrap_or(&server.module);
    if !imports(runner, &sandbox.interpreter_path, package) {
        return Err(SetupError::LaunchFailed {
            cause: format!("the `{package}` package does not import in the environment"),
            next_action: "Run `plexlaunch install --repair` to reinstall dependencies.".to_owned(),
        });
    }

    let mut warnings = Vec::new();
    if selection.exposure == Exposure::PublicTunnel
        && !imports(runner, &sandbox.interpreter_path, TUNNEL_MODULE)
    {
        warnings.push(format!(
            "`{TUNNEL_MODULE}` is not installed; the public tunnel may fail. Install it with: {} -m pip install {TUNNEL_MODULE}",
            sandbox.interpreter_path.display()
        ));
    }
    if !report.gpu_present && selection.mode == LaunchMode::Normal {
        warnings.push(
            "No GPU detected. If the server runs out of memory, relaunch with CPU offload."
                .to_owned(),
        );
    }
    for warning in &warnings {
        warn!("{warning}");
    }
    Ok(warnings)
}

fn imports(runner: &dyn CommandRunner, interpreter: &Path, module: &str) -> bool {
    let spec = CommandSpec::new(interpreter).args(["-c".to_owned(), format!("import {module}")]);
    runner.output(&spec).is_ok_and(|out| out.success())
}
