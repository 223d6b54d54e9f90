//! Environment probing: language runtime, GPU driver utility, client build
//! toolchain.
//!
//! [`EnvironmentProber::probe`] never fails. A missing tool is recorded as
//! `false` / `None` in the [`EnvironmentReport`]; deciding whether that blocks
//! progress is left to [`validate_runtime`] and the orchestrator.

use std::fmt;

use tracing::{debug, info};

use crate::config::{ClientConfig, RuntimeConfig};
use crate::error::{Result, SetupError};
use crate::exec::{CommandRunner, CommandSpec};

/// GPU driver utility queried for device presence.
pub const GPU_PROBE_COMMAND: &str = "nvidia-smi";

/// JavaScript runtime whose presence implies the client build toolchain.
pub const NODE_COMMAND: &str = "node";

/// A parsed `major.minor.patch` runtime version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RuntimeVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl RuntimeVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse version output such as `"Python 3.11.4"`, `"3.10"` or `"3.13.0rc2"`.
    ///
    /// Returns `None` unless at least `major.minor` is present.
    pub fn parse(text: &str) -> Option<Self> {
        let token = text
            .split_whitespace()
            .find(|t| t.starts_with(|c: char| c.is_ascii_digit()))?;
        let mut parts = token.split('.');
        let major = leading_number(parts.next()?)?;
        let minor = leading_number(parts.next()?)?;
        let patch = parts.next().and_then(leading_number).unwrap_or(0);
        Some(Self::new(major, minor, patch))
    }

    /// `major.minor` comparison; the patch level never matters.
    #[must_use]
    pub fn is_sufficient(&self, minimum: &RuntimeVersion) -> bool {
        self.major > minimum.major
            || (self.major == minimum.major && self.minor >= minimum.minor)
    }
}

fn leading_number(part: &str) -> Option<u32> {
    let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Snapshot of the host, taken once per invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentReport {
    pub runtime_version: Option<RuntimeVersion>,
    /// Command that answered the version probe; empty when none did.
    pub runtime_command: String,
    pub gpu_present: bool,
    pub gpu_name: Option<String>,
    pub gpu_memory_mb: Option<u64>,
    pub build_toolchain_present: bool,
    pub build_toolchain_version: Option<String>,
}

impl EnvironmentReport {
    /// Human-readable summary, one line per probed tool.
    #[must_use]
    pub fn summary_lines(&self) -> Vec<String> {
        let runtime = match &self.runtime_version {
            Some(v) => format!("Python {v} ({})", self.runtime_command),
            None => "not found".to_owned(),
        };
        let gpu = match (&self.gpu_name, self.gpu_memory_mb) {
            (Some(name), Some(mb)) => format!("{name} ({mb} MB)"),
            (Some(name), None) => name.clone(),
            _ if self.gpu_present => "present".to_owned(),
            _ => "not detected (CPU offload recommended)".to_owned(),
        };
        let toolchain = match &self.build_toolchain_version {
            Some(v) if self.build_toolchain_present => format!("Node.js {v}"),
            _ => "not found (web client build will be skipped)".to_owned(),
        };
        vec![
            format!("Runtime:   {runtime}"),
            format!("GPU:       {gpu}"),
            format!("Toolchain: {toolchain}"),
        ]
    }
}

/// Read-only host probe.
pub struct EnvironmentProber<'a> {
    runner: &'a dyn CommandRunner,
    runtime: &'a RuntimeConfig,
    client: &'a ClientConfig,
}

impl<'a> EnvironmentProber<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        runtime: &'a RuntimeConfig,
        client: &'a ClientConfig,
    ) -> Self {
        Self {
            runner,
            runtime,
            client,
        }
    }

    /// Probe every tool. Never fails.
    pub fn probe(&self) -> EnvironmentReport {
        let mut report = EnvironmentReport::default();

        if let Some((command, version)) = self.probe_runtime() {
            report.runtime_command = command;
            report.runtime_version = Some(version);
        }

        if let Some((name, memory_mb)) = self.probe_gpu() {
            report.gpu_present = true;
            report.gpu_name = Some(name);
            report.gpu_memory_mb = memory_mb;
        }

        if let Some(version) = self.probe_toolchain() {
            report.build_toolchain_present = true;
            report.build_toolchain_version = Some(version);
        }

        info!(
            runtime = %report.runtime_command,
            gpu = report.gpu_present,
            toolchain = report.build_toolchain_present,
            "environment probed"
        );
        report
    }

    /// Try each configured command name in order; the first that reports a
    /// parseable version wins.
    fn probe_runtime(&self) -> Option<(String, RuntimeVersion)> {
        for command in &self.runtime.commands {
            let spec = CommandSpec::new(command).arg("--version");
            let Ok(out) = self.runner.output(&spec) else {
                debug!(command = %command, "runtime candidate not found");
                continue;
            };
            if !out.success() {
                debug!(command = %command, code = ?out.code, "runtime candidate failed");
                continue;
            }
            // Older interpreters print the version on stderr.
            let text = if out.stdout.trim().is_empty() {
                &out.stderr
            } else {
                &out.stdout
            };
            if let Some(version) = RuntimeVersion::parse(text) {
                return Some((command.clone(), version));
            }
        }
        None
    }

    fn probe_gpu(&self) -> Option<(String, Option<u64>)> {
        let spec = CommandSpec::new(GPU_PROBE_COMMAND).args([
            "--query-gpu=name,memory.total",
            "--format=csv,noheader,nounits",
        ]);
        let out = self.runner.output(&spec).ok()?;
        if !out.success() {
            return None;
        }
        parse_gpu_line(&out.stdout)
    }

    fn probe_toolchain(&self) -> Option<String> {
        let node = self
            .runner
            .output(&CommandSpec::new(NODE_COMMAND).arg("--version"))
            .ok()?;
        if !node.success() {
            return None;
        }
        let package_manager = self
            .runner
            .output(&CommandSpec::new(&self.client.package_manager).arg("--version"))
            .ok()?;
        if !package_manager.success() {
            return None;
        }
        let version = node.stdout.trim().trim_start_matches('v').to_owned();
        (!version.is_empty()).then_some(version)
    }
}

/// Parse the first line of `name, memory` CSV output.
fn parse_gpu_line(stdout: &str) -> Option<(String, Option<u64>)> {
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
    let mut fields = line.split(',').map(str::trim);
    let name = fields.next().filter(|n| !n.is_empty())?.to_owned();
    let memory_mb = fields.next().and_then(|m| m.parse().ok());
    Some((name, memory_mb))
}

/// Gate for stage 1: a runtime must be present and recent enough.
///
/// # Errors
///
/// - [`SetupError::RuntimeNotFound`] when no command answered.
/// - [`SetupError::UnsupportedRuntime`] when the version is below the minimum.
/// - [`SetupError::Config`] when the configured minimum is unparseable.
pub fn validate_runtime(
    report: &EnvironmentReport,
    runtime: &RuntimeConfig,
) -> Result<RuntimeVersion> {
    let minimum = RuntimeVersion::parse(&runtime.min_version).ok_or_else(|| {
        SetupError::Config(format!(
            "invalid runtime.min_version \"{}\"",
            runtime.min_version
        ))
    })?;

    let Some(found) = report.runtime_version else {
        return Err(SetupError::RuntimeNotFound {
            tried: runtime.commands.clone(),
            minimum: runtime.min_version.clone(),
            install_url: runtime.install_url.clone(),
        });
    };

    if found.is_sufficient(&minimum) {
        Ok(found)
    } else {
        Err(SetupError::UnsupportedRuntime {
            found: found.to_string(),
            minimum: runtime.min_version.clone(),
            install_url: runtime.install_url.clone(),
        })
    }
}
