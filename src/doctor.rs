//! Host readiness checks (`plexlaunch check`).
//!
//! Each check yields a [`CheckResult`] with a status, a one-line message and,
//! where something can be done about it, a fix hint. Checks are pure over
//! gathered facts so they can be tested without touching the host.

use std::fmt;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::config::{RegistryConfig, RuntimeConfig};
use crate::credentials::Secret;
use crate::probe::{EnvironmentReport, RuntimeVersion};
use crate::registry::RegistryClient;

/// Free space needed for the environment and model files.
pub const MIN_DISK_BYTES: u64 = 20 * GIB;
/// Memory below which CPU offload is likely to struggle.
pub const MIN_RAM_BYTES: u64 = 8 * GIB;
/// Per-host connection timeout for the internet check.
pub const INTERNET_TIMEOUT: Duration = Duration::from_secs(5);
/// Hosts tried in order by the internet check.
pub const INTERNET_HOSTS: [&str; 3] = ["huggingface.co", "github.com", "google.com"];

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
    Unknown,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::Ok => "[OK]",
            Self::Warning => "[WARN]",
            Self::Error => "[ERROR]",
            Self::Unknown => "[?]",
        };
        f.write_str(tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: &'static str,
    pub status: CheckStatus,
    pub message: String,
    pub fix_hint: Option<String>,
}

impl CheckResult {
    fn new(name: &'static str, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            name,
            status,
            message: message.into(),
            fix_hint: None,
        }
    }

    fn with_fix(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }
}

/// All check results of one run.
#[derive(Debug, Clone, Default)]
pub struct DoctorReport {
    pub checks: Vec<CheckResult>,
}

impl DoctorReport {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.checks.iter().any(|c| c.status == CheckStatus::Error)
    }

    #[must_use]
    pub fn has_warnings(&self) -> bool {
        self.checks.iter().any(|c| c.status == CheckStatus::Warning)
    }

    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for check in &self.checks {
            lines.push(format!("{} {}: {}", check.status, check.name, check.message));
            if let Some(hint) = &check.fix_hint {
                lines.push(format!("       Fix: {hint}"));
            }
        }
        lines.push(self.verdict().to_owned());
        lines
    }

    #[must_use]
    pub fn verdict(&self) -> &'static str {
        if self.has_errors() {
            "Status: ISSUES FOUND - resolve the errors above before installing"
        } else if self.has_warnings() {
            "Status: READY (with warnings)"
        } else {
            "Status: ALL CHECKS PASSED"
        }
    }
}

/// Host measurements the checks work from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostFacts {
    pub free_disk_bytes: Option<u64>,
    pub total_memory_bytes: Option<u64>,
    /// First host that accepted a connection.
    pub reachable_host: Option<String>,
}

impl HostFacts {
    /// Measure the real host. The internet check can take up to
    /// `INTERNET_HOSTS.len() * INTERNET_TIMEOUT`.
    #[must_use]
    pub fn gather(install_dir: &Path) -> Self {
        Self {
            free_disk_bytes: available_disk_space(install_dir)
                .inspect_err(|e| debug!(error = %e, "disk space unavailable"))
                .ok(),
            total_memory_bytes: total_memory_bytes(),
            reachable_host: first_reachable(&INTERNET_HOSTS, INTERNET_TIMEOUT),
        }
    }
}

pub fn check_runtime(report: &EnvironmentReport, config: &RuntimeConfig) -> CheckResult {
    let name = "Python";
    let Some(found) = report.runtime_version else {
        return CheckResult::new(name, CheckStatus::Error, "not found")
            .with_fix(format!("Install Python {}+ from {}", config.min_version, config.install_url));
    };
    match RuntimeVersion::parse(&config.min_version) {
        Some(min) if !found.is_sufficient(&min) => CheckResult::new(
            name,
            CheckStatus::Error,
            format!("{found} found, {} or newer required", config.min_version),
        )
        .with_fix(format!("Install Python {}+ from {}", config.min_version, config.install_url)),
        _ => CheckResult::new(name, CheckStatus::Ok, format!("{found} ({})", report.runtime_command)),
    }
}

pub fn check_gpu(report: &EnvironmentReport) -> CheckResult {
    let name = "GPU";
    if !report.gpu_present {
        return CheckResult::new(name, CheckStatus::Warning, "no NVIDIA GPU detected")
            .with_fix("Install the NVIDIA driver, or launch with CPU offload");
    }
    let gpu = report.gpu_name.as_deref().unwrap_or("NVIDIA GPU");
    let message = match report.gpu_memory_mb {
        Some(mb) => format!("{gpu} ({mb} MB)"),
        None => gpu.to_owned(),
    };
    CheckResult::new(name, CheckStatus::Ok, message)
}

pub fn check_toolchain(report: &EnvironmentReport) -> CheckResult {
    let name = "Node.js";
    match (
        report.build_toolchain_present,
        report.build_toolchain_version.as_deref(),
    ) {
        (true, Some(version)) => CheckResult::new(name, CheckStatus::Ok, version),
        (true, None) => CheckResult::new(name, CheckStatus::Ok, "present"),
        (false, _) => CheckResult::new(
            name,
            CheckStatus::Warning,
            "not found; the web client will not be built",
        )
        .with_fix("Install Node.js LTS from https://nodejs.org/ to build the full web client"),
    }
}

#[allow(clippy::cast_precision_loss)]
fn gib(bytes: u64) -> f64 {
    bytes as f64 / GIB as f64
}

pub fn check_disk(free_bytes: Option<u64>) -> CheckResult {
    let name = "Disk Space";
    match free_bytes {
        None => CheckResult::new(name, CheckStatus::Unknown, "could not check"),
        Some(free) if free < MIN_DISK_BYTES => CheckResult::new(
            name,
            CheckStatus::Warning,
            format!("{:.1} GB free (need ~{:.0} GB)", gib(free), gib(MIN_DISK_BYTES)),
        )
        .with_fix("Free up disk space or install to a different drive"),
        Some(free) => CheckResult::new(name, CheckStatus::Ok, format!("{:.1} GB free", gib(free))),
    }
}

pub fn check_ram(total_bytes: Option<u64>) -> CheckResult {
    let name = "RAM";
    match total_bytes {
        None => CheckResult::new(name, CheckStatus::Unknown, "could not check"),
        Some(total) if total < MIN_RAM_BYTES => CheckResult::new(
            name,
            CheckStatus::Warning,
            format!("{:.1} GB total ({:.0} GB recommended)", gib(total), gib(MIN_RAM_BYTES)),
        )
        .with_fix("Use CPU offload mode if memory issues occur"),
        Some(total) => CheckResult::new(name, CheckStatus::Ok, format!("{:.1} GB total", gib(total))),
    }
}

pub fn check_internet(reachable_host: Option<&str>) -> CheckResult {
    let name = "Internet";
    match reachable_host {
        Some(host) => CheckResult::new(name, CheckStatus::Ok, format!("can reach {host}")),
        None => CheckResult::new(name, CheckStatus::Error, "no internet connection").with_fix(
            "Check your network connection, or point `plexlaunch models --path` at a local model folder",
        ),
    }
}

/// Token presence and format, plus an identity lookup when a registry is
/// given. A failed lookup is only a warning.
pub fn check_token(
    token: Option<&Secret>,
    config: &RegistryConfig,
    registry: Option<&dyn RegistryClient>,
) -> CheckResult {
    let name = "Registry Token";
    let Some(token) = token else {
        return CheckResult::new(name, CheckStatus::Warning, "no token configured")
            .with_fix(format!("Create a token at {} and run `plexlaunch token`", config.token_url));
    };
    if !token.has_prefix(&config.token_prefix) {
        return CheckResult::new(
            name,
            CheckStatus::Warning,
            format!("token format may be invalid (expected prefix `{}`)", config.token_prefix),
        );
    }
    let Some(registry) = registry else {
        return CheckResult::new(name, CheckStatus::Unknown, "token set but not verified");
    };
    match registry.whoami(token) {
        Ok(user) => CheckResult::new(name, CheckStatus::Ok, format!("authenticated as {user}")),
        Err(e) => CheckResult::new(name, CheckStatus::Warning, format!("token may be invalid: {e}"))
            .with_fix("Run `plexlaunch token` to enter a new token"),
    }
}

/// Run every check.
pub fn run_all(
    report: &EnvironmentReport,
    facts: &HostFacts,
    runtime: &RuntimeConfig,
    registry_config: &RegistryConfig,
    token: Option<&Secret>,
    registry: Option<&dyn RegistryClient>,
) -> DoctorReport {
    DoctorReport {
        checks: vec![
            check_runtime(report, runtime),
            check_gpu(report),
            check_toolchain(report),
            check_disk(facts.free_disk_bytes),
            check_ram(facts.total_memory_bytes),
            check_internet(facts.reachable_host.as_deref()),
            check_token(token, registry_config, registry),
        ],
    }
}

/// First of `hosts` accepting a TCP connection on port 443.
pub fn first_reachable(hosts: &[&str], timeout: Duration) -> Option<String> {
    hosts.iter().find_map(|host| {
        let addrs = (*host, 443).to_socket_addrs().ok()?;
        addrs
            .into_iter()
            .any(|addr| TcpStream::connect_timeout(&addr, timeout).is_ok())
            .then(|| (*host).to_owned())
    })
}

/// Bytes available to unprivileged users on the filesystem holding `path`.
///
/// # Errors
///
/// Returns an error if the path is invalid or `statvfs` fails.
#[cfg(unix)]
pub fn available_disk_space(path: &Path) -> std::io::Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }

    // Field widths differ by platform.
    let bavail: u64 = stat.f_bavail as _;
    let frsize: u64 = stat.f_frsize as _;
    Ok(bavail.wrapping_mul(frsize))
}

/// Not measured on this platform.
#[cfg(not(unix))]
pub fn available_disk_space(_path: &Path) -> std::io::Result<u64> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "disk space check not supported on this platform",
    ))
}

/// Installed physical memory.
#[must_use]
pub fn total_memory_bytes() -> Option<u64> {
    if cfg!(target_os = "macos") {
        let out = std::process::Command::new("sysctl")
            .args(["-n", "hw.memsize"])
            .output()
            .ok()?;
        return String::from_utf8_lossy(&out.stdout).trim().parse().ok();
    }
    if cfg!(target_os = "linux") {
        let content = std::fs::read_to_string("/proc/meminfo").ok()?;
        return parse_meminfo_total(&content);
    }
    None
}

fn parse_meminfo_total(content: &str) -> Option<u64> {
    content.lines().find_map(|line| {
        let rest = line.strip_prefix("MemTotal:")?;
        let kb: u64 = rest.split_whitespace().next()?.parse().ok()?;
        Some(kb.saturating_mul(1024))
    })
}
