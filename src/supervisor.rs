//! Server process supervision and exit classification.
//!
//! The server runs attached to the terminal; this process blocks until it
//! exits. Exit codes carry no agreed meaning beyond `0`, so any other code
//! is [`ExitCategory::Unknown`] and the remediation covers every failure
//! category the server is known to hit.
//!
//! The terminal delivers Ctrl+C to the whole foreground process group.
//! While a server runs, [`install_interrupt_handler`] makes this process
//! absorb the interrupt so the server's exit is still classified and the
//! TLS work directory is removed. Outside a run an interrupt exits as usual.

use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{info, warn};

use crate::error::{Result, SetupError};
use crate::exec::CommandRunner;
use crate::launch::{Exposure, LaunchConfig, LaunchMode, LaunchSelection};

/// Code recorded when the server was terminated by a signal.
pub const SIGNAL_EXIT_CODE: i32 = -1;

/// Conventional exit status for a process stopped by SIGINT.
const INTERRUPTED_EXIT_STATUS: i32 = 130;

static ACTIVE_RUNS: AtomicUsize = AtomicUsize::new(0);
static INTERRUPTS: AtomicUsize = AtomicUsize::new(0);

/// Route Ctrl+C through this process. Safe to call more than once; only
/// the first call installs the handler.
///
/// # Errors
///
/// Returns the handler installation failure as text.
pub fn install_interrupt_handler() -> std::result::Result<(), String> {
    static INSTALLED: OnceLock<std::result::Result<(), String>> = OnceLock::new();
    INSTALLED
        .get_or_init(|| ctrlc::set_handler(on_interrupt).map_err(|e| e.to_string()))
        .clone()
}

fn on_interrupt() {
    INTERRUPTS.fetch_add(1, Ordering::SeqCst);
    if ACTIVE_RUNS.load(Ordering::SeqCst) == 0 {
        std::process::exit(INTERRUPTED_EXIT_STATUS);
    }
}

/// Marks a server run in progress; interrupts are absorbed while one lives.
struct ActiveRun {
    interrupts_at_start: usize,
}

impl ActiveRun {
    fn enter() -> Self {
        ACTIVE_RUNS.fetch_add(1, Ordering::SeqCst);
        Self {
            interrupts_at_start: INTERRUPTS.load(Ordering::SeqCst),
        }
    }

    fn interrupted(&self) -> bool {
        INTERRUPTS.load(Ordering::SeqCst) != self.interrupts_at_start
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        ACTIVE_RUNS.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCategory {
    Clean,
    GpuMemory,
    MissingAssets,
    PortConflict,
    NetworkSsl,
    Dependency,
    Unknown,
}

impl ExitCategory {
    /// Failure categories with remediation text, in display order.
    pub const FAILURES: [Self; 5] = [
        Self::GpuMemory,
        Self::MissingAssets,
        Self::PortConflict,
        Self::NetworkSsl,
        Self::Dependency,
    ];
}

impl fmt::Display for ExitCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Clean => "clean",
            Self::GpuMemory => "gpu_memory",
            Self::MissingAssets => "missing_assets",
            Self::PortConflict => "port_conflict",
            Self::NetworkSsl => "network_ssl",
            Self::Dependency => "dependency",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitClassification {
    pub code: i32,
    pub category: ExitCategory,
}

impl ExitClassification {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.category == ExitCategory::Clean
    }
}

/// `0` is clean; everything else, including a signal, is unknown.
#[must_use]
pub fn classify(code: Option<i32>) -> ExitClassification {
    match code {
        Some(0) => ExitClassification {
            code: 0,
            category: ExitCategory::Clean,
        },
        Some(code) => ExitClassification {
            code,
            category: ExitCategory::Unknown,
        },
        None => ExitClassification {
            code: SIGNAL_EXIT_CODE,
            category: ExitCategory::Unknown,
        },
    }
}

/// Guidance for one failure category, worded for the launch that failed.
#[must_use]
pub fn category_hint(category: ExitCategory, selection: LaunchSelection, port: u16) -> Option<String> {
    let hint = match category {
        ExitCategory::GpuMemory => match selection.mode {
            LaunchMode::Normal => {
                "GPU out of memory: relaunch with CPU offload (`plexlaunch launch --cpu-offload`)."
                    .to_owned()
            }
            LaunchMode::CpuOffload => {
                "GPU out of memory even with CPU offload: close other GPU applications and check `nvidia-smi`."
                    .to_owned()
            }
        },
        ExitCategory::MissingAssets => {
            "Missing model files: run `plexlaunch models` to download them, or `plexlaunch verify` to check a local copy."
                .to_owned()
        }
        ExitCategory::PortConflict => {
            let inspect = if cfg!(windows) {
                format!("netstat -ano | findstr :{port}")
            } else {
                format!("lsof -i :{port}")
            };
            format!("Port {port} in use: find the process with `{inspect}` and stop it.")
        }
        ExitCategory::NetworkSsl => match selection.exposure {
            Exposure::Local => {
                "Network or TLS failure: check firewall and VPN settings, and that the registry is reachable."
                    .to_owned()
            }
            Exposure::PublicTunnel => {
                "Network or TLS failure: the public tunnel needs outbound access; check firewall and VPN settings."
                    .to_owned()
            }
        },
        ExitCategory::Dependency => {
            "Broken dependencies: run `plexlaunch install --repair`.".to_owned()
        }
        ExitCategory::Clean | ExitCategory::Unknown => return None,
    };
    Some(hint)
}

/// Remediation lines for an exit. Unknown exits get every category.
#[must_use]
pub fn remediation_lines(
    classification: ExitClassification,
    selection: LaunchSelection,
    port: u16,
) -> Vec<String> {
    match classification.category {
        ExitCategory::Clean => Vec::new(),
        ExitCategory::Unknown => ExitCategory::FAILURES
            .iter()
            .filter_map(|c| category_hint(*c, selection, port))
            .collect(),
        known => category_hint(known, selection, port).into_iter().collect(),
    }
}

/// Runs the server to completion.
pub struct ProcessSupervisor<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> ProcessSupervisor<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Start the server attached to the terminal and wait for it to exit.
    /// The TLS work directory is released when `config` drops, on every
    /// path out of this function, including a Ctrl+C stop once
    /// [`install_interrupt_handler`] has run.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::LaunchFailed`] if the process cannot be spawned.
    pub fn run(&self, config: LaunchConfig) -> Result<ExitClassification> {
        let active = ActiveRun::enter();
        // `config` is consumed and dropped inside, while `active` still lives.
        self.run_attached(config, &active)
    }

    fn run_attached(&self, config: LaunchConfig, active: &ActiveRun) -> Result<ExitClassification> {
        let command = config.command();
        info!(selection = %config.selection, url = %config.url(), "starting server");
        println!("Starting server at {} ({})", config.url(), config.selection);
        println!("Press Ctrl+C to stop.");

        let code = self.runner.status(&command).map_err(|e| SetupError::LaunchFailed {
            cause: format!("could not start {}: {e}", command.program.display()),
            next_action: "Run `plexlaunch install --repair` to rebuild the environment.".to_owned(),
        })?;

        let classification = classify(code);
        if classification.is_clean() {
            info!("server stopped cleanly");
        } else if active.interrupted() {
            info!(code = classification.code, "server stopped by Ctrl+C");
            println!("Server stopped.");
        } else {
            warn!(code = classification.code, category = %classification.category, "server exited abnormally");
            println!("The server exited with code {}. Possible causes:", classification.code);
            for line in remediation_lines(classification, config.selection, config.server.port) {
                println!("  - {line}");
            }
        }
        Ok(classification)
    }
}
