//! Web client build. Every failure here degrades to the server's reduced
//! functionality mode; none aborts installation.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::exec::{CommandRunner, CommandSpec};
use crate::probe::EnvironmentReport;
use crate::prompt::Prompter;

/// How the client build step ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Succeeded,
    SkippedNoToolchain,
    SkippedUserDeclined,
    FailedDegraded {
        /// One-line cause.
        cause: String,
        /// Command the user can run to build manually.
        remediation: String,
    },
}

impl BuildOutcome {
    /// Whether the server will have to run without the full client.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !matches!(self, Self::Succeeded)
    }
}

impl fmt::Display for BuildOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "web client built"),
            Self::SkippedNoToolchain => {
                write!(f, "web client skipped: Node.js not found (status page only)")
            }
            Self::SkippedUserDeclined => write!(f, "web client skipped by user (status page only)"),
            Self::FailedDegraded { cause, remediation } => {
                write!(f, "web client build failed: {cause}. To retry: {remediation}")
            }
        }
    }
}

/// Built client output, if a previous build left one.
#[must_use]
pub fn built_client_dir(install_dir: &Path, config: &ClientConfig) -> Option<PathBuf> {
    let dist = install_dir.join(&config.dir_name).join(&config.dist_dir);
    dist.join("index.html").is_file().then_some(dist)
}

/// Runs the package manager's install-then-build two step.
pub struct ClientBuilder<'a> {
    runner: &'a dyn CommandRunner,
    prompter: &'a dyn Prompter,
    config: &'a ClientConfig,
    install_dir: &'a Path,
}

impl<'a> ClientBuilder<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        prompter: &'a dyn Prompter,
        config: &'a ClientConfig,
        install_dir: &'a Path,
    ) -> Self {
        Self {
            runner,
            prompter,
            config,
            install_dir,
        }
    }

    /// Build the client if the toolchain is present and the user agrees.
    ///
    /// A prompt failure counts as a decline.
    pub fn build(&self, report: &EnvironmentReport) -> BuildOutcome {
        if !report.build_toolchain_present {
            info!("build toolchain absent, skipping web client build");
            return BuildOutcome::SkippedNoToolchain;
        }

        let client_dir = self.install_dir.join(&self.config.dir_name);
        let pm = &self.config.package_manager;
        let manual = format!(
            "cd {} && {pm} install && {pm} run build",
            client_dir.display()
        );

        if !client_dir.join("package.json").is_file() {
            let outcome = BuildOutcome::FailedDegraded {
                cause: format!("no package.json in {}", client_dir.display()),
                remediation: manual,
            };
            warn!(%outcome, "web client sources missing");
            return outcome;
        }

        let existing = built_client_dir(self.install_dir, self.config);
        let question = if existing.is_some() {
            "A built web client already exists. Rebuild it?"
        } else {
            "Build the web client now? (requires network access)"
        };
        match self.prompter.confirm(question, existing.is_none()) {
            Ok(true) => {}
            Ok(false) if existing.is_some() => return BuildOutcome::Succeeded,
            Ok(false) => return BuildOutcome::SkippedUserDeclined,
            Err(e) => {
                warn!(error = %e, "no answer, skipping web client build");
                return BuildOutcome::SkippedUserDeclined;
            }
        }

        if let Err(cause) = self.install_dependencies(&client_dir) {
            let outcome = BuildOutcome::FailedDegraded {
                cause,
                remediation: format!(
                    "cd {} && {pm} install {} && {pm} run build",
                    client_dir.display(),
                    self.config.relaxed_install_flag
                ),
            };
            warn!(%outcome, "web client dependencies failed");
            return outcome;
        }

        let build = CommandSpec::new(pm)
            .args(["run", "build"])
            .current_dir(&client_dir);
        let cause = match self.runner.output(&build) {
            Ok(out) if out.success() => {
                if built_client_dir(self.install_dir, self.config).is_some() {
                    info!("web client built");
                    return BuildOutcome::Succeeded;
                }
                format!("build finished but {} has no index.html", self.config.dist_dir)
            }
            Ok(out) => format!(
                "{pm} run build exited with {}: {}",
                exit_label(out.code),
                out.tail(1)
            ),
            Err(e) => format!("{pm} could not start: {e}"),
        };
        let outcome = BuildOutcome::FailedDegraded {
            cause,
            remediation: manual,
        };
        warn!(%outcome, "web client build failed");
        outcome
    }

    /// `install`, retried once with the relaxed compatibility flag.
    fn install_dependencies(&self, client_dir: &Path) -> Result<(), String> {
        let pm = &self.config.package_manager;
        let strict = CommandSpec::new(pm).arg("install").current_dir(client_dir);
        match self.runner.output(&strict) {
            Ok(out) if out.success() => return Ok(()),
            Ok(out) => warn!(code = ?out.code, "client dependency install failed, retrying relaxed"),
            Err(e) => return Err(format!("{pm} could not start: {e}")),
        }

        let relaxed = strict.arg(&self.config.relaxed_install_flag);
        match self.runner.output(&relaxed) {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(format!(
                "{pm} install failed even with {}: {}",
                self.config.relaxed_install_flag,
                out.tail(1)
            )),
            Err(e) => Err(format!("{pm} could not start: {e}")),
        }
    }
}

fn exit_label(code: Option<i32>) -> String {
    code.map_or_else(|| "a signal".to_owned(), |c| format!("status {c}"))
}
