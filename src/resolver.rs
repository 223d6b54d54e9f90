//! Dependency installation into the sandbox.
//!
//! Each dependency is a [`DependencySpec`] holding an ordered fallback chain of
//! [`InstallVariant`]s. [`DependencyResolver::install`] is the one routine that
//! walks any chain: variants are tried strictly in order and the walk stops at
//! the first *verified* success, meaning the installer exited cleanly and the
//! smoke import (when the dependency declares one) also succeeds.

use std::fmt;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{Result, SetupError};
use crate::exec::{CommandRunner, CommandSpec};
use crate::sandbox::SandboxHandle;

/// Accelerated build indexes for the tensor library, most preferred first.
const TORCH_INDEXES: &[(&str, &str)] = &[
    ("https://download.pytorch.org/whl/cu124", "CUDA 12.4 build"),
    ("https://download.pytorch.org/whl/cu118", "CUDA 11.8 build"),
];

const TORCH_PACKAGES: &[&str] = &[
    "torch>=2.4.0,<2.5",
    "torchvision>=0.19,<0.20",
    "torchaudio>=2.4,<2.5",
];

/// Whether exhausting a chain stops the installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Required,
    Optional,
}

/// One way of installing a dependency: arguments passed to the sandbox
/// interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallVariant {
    pub args: Vec<String>,
    pub description: String,
}

impl InstallVariant {
    pub fn new<I, S>(description: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            description: description.into(),
        }
    }
}

/// Static description of one dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySpec {
    pub name: String,
    pub requirement: Requirement,
    pub fallback_chain: Vec<InstallVariant>,
    /// Packages removed before the first attempt; stale versions of these
    /// conflict with fresh installs.
    pub uninstall_first: Vec<String>,
    /// Module imported after installation to prove the install is usable.
    pub smoke_import: Option<String>,
}

/// Result of resolving one dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub dependency: String,
    /// Index of the last variant attempted; `None` when nothing was attempted
    /// because the dependency was already satisfied.
    pub variant_index: Option<usize>,
    pub succeeded: bool,
}

impl InstallOutcome {
    #[must_use]
    pub fn already_satisfied(&self) -> bool {
        self.succeeded && self.variant_index.is_none()
    }
}

impl fmt::Display for InstallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.succeeded, self.variant_index) {
            (true, None) => write!(f, "{}: already installed", self.dependency),
            (true, Some(i)) => write!(f, "{}: installed (variant {})", self.dependency, i + 1),
            (false, _) => write!(f, "{}: not installed", self.dependency),
        }
    }
}

/// Installs dependencies into one sandbox.
pub struct DependencyResolver<'a> {
    runner: &'a dyn CommandRunner,
    sandbox: &'a SandboxHandle,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(runner: &'a dyn CommandRunner, sandbox: &'a SandboxHandle) -> Self {
        Self { runner, sandbox }
    }

    /// Resolve every spec in order.
    ///
    /// # Errors
    ///
    /// Stops at the first required dependency whose chain is exhausted.
    pub fn install_all(&self, specs: &[DependencySpec]) -> Result<Vec<InstallOutcome>> {
        specs.iter().map(|spec| self.ensure(spec)).collect()
    }

    /// Install unless a reused sandbox already satisfies the dependency.
    ///
    /// On a reused sandbox a dependency counts as satisfied when its smoke
    /// import passes or it has none.
    ///
    /// # Errors
    ///
    /// See [`DependencyResolver::install`].
    pub fn ensure(&self, spec: &DependencySpec) -> Result<InstallOutcome> {
        if self.sandbox.reused && self.is_satisfied(spec) {
            info!(dependency = %spec.name, "already satisfied, skipping");
            return Ok(InstallOutcome {
                dependency: spec.name.clone(),
                variant_index: None,
                succeeded: true,
            });
        }
        self.install(spec)
    }

    /// Walk the fallback chain.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::DependencyInstallExhausted`] when every variant of
    /// a required dependency fails. Optional dependencies never error.
    pub fn install(&self, spec: &DependencySpec) -> Result<InstallOutcome> {
        if !spec.uninstall_first.is_empty() {
            self.uninstall(&spec.uninstall_first);
        }

        let mut attempts = Vec::with_capacity(spec.fallback_chain.len());
        let mut last_error = String::from("no install variants configured");

        for (index, variant) in spec.fallback_chain.iter().enumerate() {
            info!(
                dependency = %spec.name,
                variant = index + 1,
                of = spec.fallback_chain.len(),
                description = %variant.description,
                "installing"
            );
            attempts.push(variant.description.clone());

            let command = self.interpreter().args(variant.args.iter().cloned());
            match self.runner.output(&command) {
                Ok(out) if out.success() => match self.verify(spec) {
                    Ok(()) => {
                        info!(dependency = %spec.name, variant = index + 1, "installed");
                        return Ok(InstallOutcome {
                            dependency: spec.name.clone(),
                            variant_index: Some(index),
                            succeeded: true,
                        });
                    }
                    Err(cause) => {
                        warn!(dependency = %spec.name, cause = %cause, "installed but not importable");
                        last_error = cause;
                    }
                },
                Ok(out) => {
                    last_error = out.tail(5);
                    warn!(dependency = %spec.name, code = ?out.code, "install attempt failed");
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(dependency = %spec.name, error = %e, "installer could not start");
                }
            }
        }

        match spec.requirement {
            Requirement::Required => Err(SetupError::DependencyInstallExhausted {
                dependency: spec.name.clone(),
                attempts,
                last_error,
            }),
            Requirement::Optional => {
                warn!(
                    dependency = %spec.name,
                    "optional dependency unavailable, continuing without it"
                );
                Ok(InstallOutcome {
                    dependency: spec.name.clone(),
                    variant_index: spec.fallback_chain.len().checked_sub(1),
                    succeeded: false,
                })
            }
        }
    }

    /// Whether the smoke import passes (vacuously true without one).
    #[must_use]
    pub fn is_satisfied(&self, spec: &DependencySpec) -> bool {
        self.verify(spec).is_ok()
    }

    /// Versions of the installed stack, one line each; `None` when the stack
    /// does not import.
    #[must_use]
    pub fn stack_summary(&self) -> Option<Vec<String>> {
        let command = self.interpreter().args([
            "-c",
            "import moshi, torch; print(f'PyTorch: {torch.__version__}'); print(f'CUDA available: {torch.cuda.is_available()}')",
        ]);
        let out = self.runner.output(&command).ok()?;
        out.success()
            .then(|| out.stdout.lines().map(str::to_owned).collect())
    }

    fn verify(&self, spec: &DependencySpec) -> std::result::Result<(), String> {
        let Some(module) = &spec.smoke_import else {
            return Ok(());
        };
        let command = self.interpreter().args(["-c".to_owned(), format!("import {module}")]);
        match self.runner.output(&command) {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(format!("import {module} failed: {}", out.tail(3))),
            Err(e) => Err(format!("import {module} could not run: {e}")),
        }
    }

    fn uninstall(&self, packages: &[String]) {
        let command = self
            .interpreter()
            .args(["-m", "pip", "uninstall", "-y"])
            .args(packages.iter().cloned());
        match self.runner.output(&command) {
            Ok(out) if out.success() => debug!(?packages, "removed prior versions"),
            Ok(out) => debug!(?packages, code = ?out.code, "nothing to uninstall"),
            Err(e) => warn!(?packages, error = %e, "uninstall could not run"),
        }
    }

    fn interpreter(&self) -> CommandSpec {
        CommandSpec::new(&self.sandbox.interpreter_path)
    }
}

fn pip_install(packages: &[&str], extra: &[&str], quiet: bool) -> Vec<String> {
    let mut args: Vec<String> = ["-m", "pip", "install"]
        .iter()
        .chain(packages)
        .chain(extra)
        .map(|s| (*s).to_owned())
        .collect();
    if quiet {
        args.push("--quiet".to_owned());
    }
    args
}

/// The dependencies of the speech server, in installation order.
#[must_use]
pub fn default_catalog(server_package_dir: &Path) -> Vec<DependencySpec> {
    let mut torch_chain: Vec<InstallVariant> = TORCH_INDEXES
        .iter()
        .map(|(index, description)| {
            InstallVariant::new(
                *description,
                pip_install(TORCH_PACKAGES, &["--index-url", index], true),
            )
        })
        .collect();
    torch_chain.push(InstallVariant::new(
        "generic CPU build",
        pip_install(TORCH_PACKAGES, &[], true),
    ));

    let package = server_package_dir.to_string_lossy();
    let server_source = package.as_ref();

    vec![
        DependencySpec {
            name: "pip".to_owned(),
            requirement: Requirement::Optional,
            fallback_chain: vec![InstallVariant::new(
                "upgrade installer",
                pip_install(&["--upgrade", "pip"], &[], true),
            )],
            uninstall_first: Vec::new(),
            smoke_import: None,
        },
        DependencySpec {
            name: "torch".to_owned(),
            requirement: Requirement::Required,
            fallback_chain: torch_chain,
            uninstall_first: vec![
                "torch".to_owned(),
                "torchvision".to_owned(),
                "torchaudio".to_owned(),
            ],
            smoke_import: Some("torch".to_owned()),
        },
        DependencySpec {
            name: "moshi".to_owned(),
            requirement: Requirement::Required,
            fallback_chain: vec![
                InstallVariant::new("server package", pip_install(&[server_source], &[], true)),
                InstallVariant::new(
                    "server package (verbose)",
                    pip_install(&[server_source], &[], false),
                ),
            ],
            uninstall_first: Vec::new(),
            smoke_import: Some("moshi".to_owned()),
        },
        DependencySpec {
            name: "accelerate".to_owned(),
            requirement: Requirement::Optional,
            fallback_chain: vec![InstallVariant::new(
                "accelerate",
                pip_install(&["accelerate"], &[], true),
            )],
            uninstall_first: Vec::new(),
            smoke_import: Some("accelerate".to_owned()),
        },
    ]
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::exec::{CommandOutput, ScriptedRunner};
    use std::path::PathBuf;

    fn sandbox(reused: bool) -> SandboxHandle {
        SandboxHandle {
            root_path: PathBuf::from("/opt/plex/venv"),
            exists: true,
            interpreter_path: PathBuf::from("/opt/plex/venv/bin/python"),
            reused,
        }
    }

    fn chain_spec(requirement: Requirement) -> DependencySpec {
        DependencySpec {
            name: "widget".into(),
            requirement,
            fallback_chain: vec![
                InstallVariant::new("A", ["-m", "pip", "install", "widget", "--index-url", "A"]),
                InstallVariant::new("B", ["-m", "pip", "install", "widget", "--index-url", "B"]),
                InstallVariant::new("generic", ["-m", "pip", "install", "widget"]),
            ],
            uninstall_first: Vec::new(),
            smoke_import: Some("widget".into()),
        }
    }

    fn attempted_indexes(runner: &ScriptedRunner) -> Vec<String> {
        runner
            .calls()
            .iter()
            .filter(|c| c.has_arg("install"))
            .map(|c| c.arg_after("--index-url").unwrap_or("generic").to_owned())
            .collect()
    }

    #[test]
    fn stops_at_first_verified_variant() {
        let runner = ScriptedRunner::new(|spec| {
            if spec.arg_after("--index-url") == Some("A") {
                Ok(CommandOutput::failed(1, "no matching distribution"))
            } else {
                Ok(CommandOutput::ok(""))
            }
        });
        let handle = sandbox(false);
        let outcome = DependencyResolver::new(&runner, &handle)
            .install(&chain_spec(Requirement::Required))
            .unwrap();

        assert_eq!(outcome.variant_index, Some(1));
        assert!(outcome.succeeded);
        assert_eq!(attempted_indexes(&runner), vec!["A", "B"]);
    }

    #[test]
    fn clean_exit_with_failed_import_moves_on() {
        let runner = ScriptedRunner::new(|spec| {
            if spec.args.iter().any(|a| a == "import widget") {
                Ok(CommandOutput::failed(1, "ModuleNotFoundError"))
            } else {
                Ok(CommandOutput::ok(""))
            }
        });
        let handle = sandbox(false);
        let err = DependencyResolver::new(&runner, &handle)
            .install(&chain_spec(Requirement::Required))
            .unwrap_err();

        assert_eq!(attempted_indexes(&runner), vec!["A", "B", "generic"]);
        match err {
            SetupError::DependencyInstallExhausted {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(attempts, vec!["A", "B", "generic"]);
                assert!(last_error.contains("ModuleNotFoundError"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn variant_attempted_only_after_previous_failed() {
        let runner = ScriptedRunner::new(|_| Ok(CommandOutput::ok("")));
        let handle = sandbox(false);
        DependencyResolver::new(&runner, &handle)
            .install(&chain_spec(Requirement::Required))
            .unwrap();
        assert_eq!(attempted_indexes(&runner), vec!["A"]);
    }

    #[test]
    fn optional_exhaustion_is_soft() {
        let runner = ScriptedRunner::new(|_| Ok(CommandOutput::failed(1, "boom")));
        let handle = sandbox(false);
        let outcome = DependencyResolver::new(&runner, &handle)
            .install(&chain_spec(Requirement::Optional))
            .unwrap();
        assert!(!outcome.succeeded);
        assert_eq!(outcome.variant_index, Some(2));
    }

    #[test]
    fn uninstall_runs_before_first_install() {
        let runner = ScriptedRunner::new(|_| Ok(CommandOutput::ok("")));
        let handle = sandbox(false);
        let mut spec = chain_spec(Requirement::Required);
        spec.uninstall_first = vec!["widget".into(), "widget-extras".into()];

        DependencyResolver::new(&runner, &handle).install(&spec).unwrap();

        let lines = runner.call_lines();
        assert_eq!(
            lines[0],
            "/opt/plex/venv/bin/python -m pip uninstall -y widget widget-extras"
        );
        assert!(lines[1].contains("pip install widget"));
    }

    #[test]
    fn reused_sandbox_skips_satisfied_dependency() {
        let runner = ScriptedRunner::new(|_| Ok(CommandOutput::ok("")));
        let handle = sandbox(true);
        let outcome = DependencyResolver::new(&runner, &handle)
            .ensure(&chain_spec(Requirement::Required))
            .unwrap();

        assert!(outcome.already_satisfied());
        assert!(attempted_indexes(&runner).is_empty());
    }

    #[test]
    fn reused_sandbox_repairs_broken_dependency() {
        let runner = ScriptedRunner::new(|spec| {
            if spec.has_arg("-c") {
                Ok(CommandOutput::failed(1, "ModuleNotFoundError"))
            } else {
                Ok(CommandOutput::ok(""))
            }
        });
        let handle = sandbox(true);
        let mut spec = chain_spec(Requirement::Optional);
        spec.smoke_import = Some("widget".into());
        let outcome = DependencyResolver::new(&runner, &handle)
            .ensure(&spec)
            .unwrap();
        assert!(!outcome.succeeded);
        assert_eq!(attempted_indexes(&runner), vec!["A", "B", "generic"]);
    }

    #[test]
    fn catalog_orders_torch_variants() {
        let catalog = default_catalog(Path::new("/opt/plex/moshi"));
        let names: Vec<&str> = catalog.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["pip", "torch", "moshi", "accelerate"]);

        let torch = &catalog[1];
        assert_eq!(torch.requirement, Requirement::Required);
        let indexes: Vec<Option<String>> = torch
            .fallback_chain
            .iter()
            .map(|v| {
                v.args
                    .iter()
                    .position(|a| a == "--index-url")
                    .map(|i| v.args[i + 1].clone())
            })
            .collect();
        assert_eq!(
            indexes,
            vec![
                Some("https://download.pytorch.org/whl/cu124".to_owned()),
                Some("https://download.pytorch.org/whl/cu118".to_owned()),
                None,
            ]
        );
        assert_eq!(torch.uninstall_first.len(), 3);
    }

    #[test]
    fn server_package_retries_verbose() {
        let catalog = default_catalog(Path::new("/opt/plex/moshi"));
        let moshi = &catalog[2];
        assert!(moshi.fallback_chain[0].args.contains(&"--quiet".to_owned()));
        assert!(!moshi.fallback_chain[1].args.contains(&"--quiet".to_owned()));
        assert!(moshi.fallback_chain[0].args.contains(&"/opt/plex/moshi".to_owned()));
    }

    #[test]
    fn outcome_display() {
        let done = InstallOutcome {
            dependency: "torch".into(),
            variant_index: Some(2),
            succeeded: true,
        };
        assert_eq!(done.to_string(), "torch: installed (variant 3)");
    }
}
