//! Stage sequencing.
//!
//! Install runs the stages strictly in order, one at a time:
//!
//! ```text
//! probe → sandbox → dependencies → client build → credentials → assets
//! ```
//!
//! Runtime detection, sandbox creation and required dependencies stop the
//! run; the client build, credentials and assets degrade and continue.
//! Launch re-probes the host, checks the sandbox, and hands a freshly built
//! config to the supervisor.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::assets::{verify_models, ArtifactSource, AssetChoice, AssetProvisioner, ProvisionReport, VerifyReport};
use crate::client::{BuildOutcome, ClientBuilder};
use crate::config::{ModelPathConfig, SetupConfig};
use crate::credentials::{CredentialConfigurator, CredentialState, CredentialStore, Secret};
use crate::doctor::{DoctorReport, HostFacts};
use crate::error::{Result, SetupError};
use crate::exec::CommandRunner;
use crate::launch::{
    preflight, LaunchContext, LaunchEnvironment, LaunchSelection, LaunchSelector,
};
use crate::probe::{validate_runtime, EnvironmentProber, EnvironmentReport};
use crate::prompt::Prompter;
use crate::registry::RegistryClient;
use crate::resolver::{default_catalog, DependencyResolver, InstallOutcome};
use crate::sandbox::{SandboxHandle, SandboxManager};
use crate::supervisor::{ExitClassification, ProcessSupervisor};

/// How much of the installation to (re)do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstallMode {
    /// Delete the sandbox and start over.
    Fresh,
    /// Offer to reuse the sandbox; reinstall only what is broken.
    #[default]
    Repair,
    /// Credentials and model files only.
    ModelsOnly,
}

impl fmt::Display for InstallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Fresh => "fresh",
            Self::Repair => "repair",
            Self::ModelsOnly => "models only",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallOptions {
    pub mode: InstallMode,
    /// `None` asks the user.
    pub assets: Option<AssetChoice>,
}

/// What an install run did, stage by stage.
#[derive(Debug, Clone)]
pub struct InstallSummary {
    pub report: Option<EnvironmentReport>,
    pub sandbox: Option<SandboxHandle>,
    pub dependencies: Vec<InstallOutcome>,
    pub build: Option<BuildOutcome>,
    pub credentials: CredentialState,
    pub assets: Option<ProvisionReport>,
}

/// External collaborators, injected so every stage can be scripted.
pub struct Services<'a> {
    pub runner: &'a dyn CommandRunner,
    pub prompter: &'a dyn Prompter,
    pub registry: &'a dyn RegistryClient,
    /// Opt-in token persistence.
    pub credential_store: &'a dyn CredentialStore,
    /// Read-only saved tokens consulted after `credential_store`.
    pub cached_stores: Vec<&'a dyn CredentialStore>,
    pub artifacts: &'a dyn ArtifactSource,
}

pub struct Orchestrator<'a> {
    config: SetupConfig,
    install_dir: PathBuf,
    services: Services<'a>,
    env_token: Option<Secret>,
    remove_retry_delay: Duration,
    rate_limit_backoff: Duration,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: SetupConfig, install_dir: impl Into<PathBuf>, services: Services<'a>) -> Self {
        let remove_retry_delay = Duration::from_millis(config.sandbox.remove_retry_delay_ms);
        let rate_limit_backoff = Duration::from_secs(config.assets.rate_limit_backoff_secs);
        Self {
            config,
            install_dir: install_dir.into(),
            services,
            env_token: None,
            remove_retry_delay,
            rate_limit_backoff,
        }
    }

    /// Token read from the process environment by the caller.
    #[must_use]
    pub fn with_env_token(mut self, token: Option<Secret>) -> Self {
        self.env_token = token;
        self
    }

    /// Override the sandbox removal retry pause and the rate-limit backoff.
    #[must_use]
    pub fn with_delays(mut self, remove_retry: Duration, rate_limit_backoff: Duration) -> Self {
        self.remove_retry_delay = remove_retry;
        self.rate_limit_backoff = rate_limit_backoff;
        self
    }

    #[must_use]
    pub fn config(&self) -> &SetupConfig {
        &self.config
    }

    #[must_use]
    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    pub fn probe(&self) -> EnvironmentReport {
        EnvironmentProber::new(self.services.runner, &self.config.runtime, &self.config.client)
            .probe()
    }

    fn sandbox_manager(&self, runtime_command: &str) -> SandboxManager<'_> {
        SandboxManager::new(
            self.services.runner,
            self.services.prompter,
            runtime_command,
            self.config.sandbox.root(&self.install_dir),
        )
        .with_remove_retry_delay(self.remove_retry_delay)
    }

    fn credentials(&self) -> CredentialConfigurator<'_> {
        self.services.cached_stores.iter().fold(
            CredentialConfigurator::new(
                &self.config.registry,
                self.services.credential_store,
                self.services.registry,
                self.services.prompter,
            ),
            |configurator, store| configurator.with_cached_source(*store),
        )
    }

    fn provisioner(&self) -> AssetProvisioner<'_> {
        AssetProvisioner::new(
            self.services.artifacts,
            &self.config.assets,
            &self.config.registry.repo_id,
            &self.install_dir,
        )
        .with_backoff(self.rate_limit_backoff)
    }

    /// Run the install stages.
    ///
    /// # Errors
    ///
    /// Returns the first terminal failure: runtime missing or too old, GPU
    /// warning declined, sandbox creation, a required dependency, or a prompt
    /// failure. Client, credential and asset problems only warn.
    pub fn install(&self, options: &InstallOptions) -> Result<InstallSummary> {
        info!(mode = %options.mode, install_dir = %self.install_dir.display(), "install started");

        let mut summary = InstallSummary {
            report: None,
            sandbox: None,
            dependencies: Vec::new(),
            build: None,
            credentials: CredentialState::none(),
            assets: None,
        };

        if options.mode != InstallMode::ModelsOnly {
            println!("Checking system...");
            let report = self.probe();
            for line in report.summary_lines() {
                println!("  {line}");
            }
            validate_runtime(&report, &self.config.runtime)?;
            self.confirm_without_gpu(&report)?;

            println!("Preparing environment...");
            let sandbox = self
                .sandbox_manager(&report.runtime_command)
                .ensure(options.mode == InstallMode::Fresh)?;

            println!("Installing dependencies...");
            let resolver = DependencyResolver::new(self.services.runner, &sandbox);
            let catalog = default_catalog(&self.install_dir.join(&self.config.server.package_dir));
            summary.dependencies = resolver.install_all(&catalog)?;
            match resolver.stack_summary() {
                Some(lines) => lines.iter().for_each(|l| println!("  {l}")),
                None => warn!("installed stack could not be verified"),
            }

            println!("Building web client...");
            let build = ClientBuilder::new(
                self.services.runner,
                self.services.prompter,
                &self.config.client,
                &self.install_dir,
            )
            .build(&report);
            if let BuildOutcome::FailedDegraded { cause, remediation } = &build {
                report_degraded(&SetupError::BuildDegraded {
                    cause: cause.clone(),
                    remediation: remediation.clone(),
                });
            } else {
                println!("  {build}");
            }

            summary.report = Some(report);
            summary.sandbox = Some(sandbox);
            summary.build = Some(build);
        }

        println!("Configuring registry access...");
        summary.credentials = self.credentials().ensure(self.env_token.as_ref());
        if summary.credentials.token.is_none() {
            report_degraded(&SetupError::CredentialMissing {
                token_url: self.config.registry.token_url.clone(),
            });
        }

        println!("Provisioning model files...");
        let choice = match &options.assets {
            Some(choice) => choice.clone(),
            None => self.choose_assets()?,
        };
        match self
            .provisioner()
            .provision(&choice, summary.credentials.token.as_ref())
        {
            Ok(report) => summary.assets = Some(report),
            Err(e) if !e.is_terminal() => report_degraded(&e),
            Err(e) => return Err(e),
        }

        info!("install finished");
        println!("Installation complete. Start the server with `plexlaunch launch`.");
        Ok(summary)
    }

    fn confirm_without_gpu(&self, report: &EnvironmentReport) -> Result<()> {
        if report.gpu_present {
            return Ok(());
        }
        warn!("no GPU detected");
        let proceed = self.services.prompter.confirm(
            "No NVIDIA GPU detected. The server will be slow and may need CPU offload. Continue anyway?",
            true,
        )?;
        if proceed {
            Ok(())
        } else {
            Err(SetupError::Declined {
                reason: "no GPU detected".to_owned(),
            })
        }
    }

    fn choose_assets(&self) -> Result<AssetChoice> {
        let items = [
            "Download the model now (about 16 GB)",
            "Use a model folder already on this computer",
            "Download on first launch",
        ];
        match self
            .services
            .prompter
            .select("How should the model files be obtained?", &items, 0)?
        {
            0 => Ok(AssetChoice::DownloadNow),
            1 => {
                let path = self.services.prompter.input("Path to the model folder")?;
                let path = path.trim();
                if path.is_empty() {
                    warn!("no folder entered, deferring model download");
                    Ok(AssetChoice::Defer)
                } else {
                    Ok(AssetChoice::UseLocalPath(PathBuf::from(path)))
                }
            }
            _ => Ok(AssetChoice::Defer),
        }
    }

    fn choose_launch(&self, report: &EnvironmentReport) -> Result<LaunchSelection> {
        let options = LaunchSelection::all();
        let recommended = LaunchSelection::recommended(report);
        let labels: Vec<String> = options
            .iter()
            .map(|s| {
                if *s == recommended {
                    format!("{s} (recommended)")
                } else {
                    s.to_string()
                }
            })
            .collect();
        let items: Vec<&str> = labels.iter().map(String::as_str).collect();
        let default = options.iter().position(|s| *s == recommended).unwrap_or(0);
        let index = self
            .services
            .prompter
            .select("Launch mode", &items, default)?;
        Ok(options.get(index).copied().unwrap_or(recommended))
    }

    /// Start the server and block until it exits.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::LaunchFailed`] when pre-flight fails or the
    /// server cannot be spawned, or a prompt error while choosing a mode.
    pub fn launch(&self, selection: Option<LaunchSelection>) -> Result<ExitClassification> {
        let report = self.probe();
        let sandbox = self.sandbox_manager(&report.runtime_command).inspect();
        let selection = match selection {
            Some(selection) => selection,
            None => self.choose_launch(&report)?,
        };
        for warning in preflight(
            self.services.runner,
            &sandbox,
            &self.config.server,
            selection,
            &report,
        )? {
            println!("Warning: {warning}");
        }

        let token = self
            .credentials()
            .existing(self.env_token.as_ref())
            .and_then(|state| state.token);
        if token.is_none() {
            report_degraded(&SetupError::CredentialMissing {
                token_url: self.config.registry.token_url.clone(),
            });
        }

        let custom_model_path = ModelPathConfig::load(&self.install_dir)
            .map_err(|e| warn!(error = %e, "ignoring unreadable model path record"))
            .ok()
            .and_then(|c| c.custom_model_path);

        let mut selector = LaunchSelector::new();
        selector.select(selection)?;
        selector.build_config(LaunchContext {
            interpreter: &sandbox.interpreter_path,
            install_dir: &self.install_dir,
            server: &self.config.server,
            client: &self.config.client,
            voice_dir: self.provisioner().cached_voice_dir(),
            custom_model_path,
            environment: LaunchEnvironment::new(
                &self.config.server,
                &self.config.registry.token_env,
                token,
            ),
        })?;
        selector.launch(&ProcessSupervisor::new(self.services.runner))
    }

    /// The `models` entry point: credentials, then provisioning.
    ///
    /// # Errors
    ///
    /// Returns the provisioning failure.
    pub fn provision_assets(&self, choice: Option<AssetChoice>) -> Result<ProvisionReport> {
        let choice = match choice {
            Some(choice) => choice,
            None => self.choose_assets()?,
        };
        let token = if choice == AssetChoice::DownloadNow {
            self.credentials().ensure(self.env_token.as_ref()).token
        } else {
            None
        };
        self.provisioner().provision(&choice, token.as_ref())
    }

    /// Ask for a new token, ignoring any existing one, and validate it.
    pub fn configure_token(&self) -> CredentialState {
        let credentials = self.credentials();
        let state = credentials.enter_new();
        if let Some(token) = &state.token {
            credentials.validate(token);
        }
        state
    }

    /// Host readiness report.
    pub fn check(&self) -> DoctorReport {
        let report = self.probe();
        let facts = HostFacts::gather(&self.install_dir);
        let token = self
            .credentials()
            .existing(self.env_token.as_ref())
            .and_then(|state| state.token);
        crate::doctor::run_all(
            &report,
            &facts,
            &self.config.runtime,
            &self.config.registry,
            token.as_ref(),
            Some(self.services.registry),
        )
    }

    /// Verify model files in the custom folder or the registry cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the model path record is unreadable.
    pub fn verify(&self) -> Result<VerifyReport> {
        let custom = ModelPathConfig::load(&self.install_dir)?.custom_model_path;
        Ok(verify_models(
            self.services.artifacts,
            &self.config.registry.repo_id,
            custom.as_deref(),
        ))
    }
}

/// Lines printed for a failure: what failed and why, then what to do.
#[must_use]
pub fn failure_lines(err: &SetupError) -> Vec<String> {
    let mut lines = vec![format!("Error: {err}")];
    if let SetupError::DependencyInstallExhausted { attempts, .. } = err {
        lines.push(format!("Tried: {}", attempts.join(", ")));
    }
    if let Some(action) = err.next_action() {
        lines.push(format!("Next step: {action}"));
    }
    lines
}

/// Print a non-terminal failure and keep going.
pub fn report_degraded(err: &SetupError) {
    warn!(error = %err, "continuing with reduced functionality");
    println!("Warning: {err}");
    if let Some(action) = err.next_action() {
        println!("  {action}");
    }
}
