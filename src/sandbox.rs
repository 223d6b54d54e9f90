//! Runtime sandbox lifecycle: create, reuse, or destroy the isolated
//! interpreter environment under the install directory.
//!
//! The sandbox root is a single-writer resource; one orchestrator instance per
//! install directory is assumed.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{Result, SetupError};
use crate::exec::{CommandRunner, CommandSpec};
use crate::prompt::Prompter;

/// Creation attempts before giving up (the first try plus one retry).
const CREATE_ATTEMPTS: u32 = 2;

/// Handle to an on-disk sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxHandle {
    pub root_path: PathBuf,
    /// Whether a working interpreter exists under `root_path`.
    pub exists: bool,
    pub interpreter_path: PathBuf,
    /// The sandbox was kept from a previous run rather than created now.
    pub reused: bool,
}

/// Interpreter location inside a sandbox root.
#[must_use]
pub fn interpreter_path(root: &Path) -> PathBuf {
    if cfg!(windows) {
        root.join("Scripts").join("python.exe")
    } else {
        root.join("bin").join("python")
    }
}

/// Whether `path` is a file the current user can execute.
#[must_use]
pub fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Owns the sandbox directory.
pub struct SandboxManager<'a> {
    runner: &'a dyn CommandRunner,
    prompter: &'a dyn Prompter,
    runtime_command: String,
    root: PathBuf,
    remove_retry_delay: Duration,
    remove_tree: Box<dyn Fn(&Path) -> io::Result<()> + 'a>,
}

impl<'a> SandboxManager<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        prompter: &'a dyn Prompter,
        runtime_command: impl Into<String>,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            prompter,
            runtime_command: runtime_command.into(),
            root: root.into(),
            remove_retry_delay: Duration::from_secs(2),
            remove_tree: Box::new(|path| std::fs::remove_dir_all(path)),
        }
    }

    #[cfg(test)]
    fn with_remover(mut self, remove: impl Fn(&Path) -> io::Result<()> + 'a) -> Self {
        self.remove_tree = Box::new(remove);
        self
    }

    /// Pause before the second removal attempt.
    #[must_use]
    pub fn with_remove_retry_delay(mut self, delay: Duration) -> Self {
        self.remove_retry_delay = delay;
        self
    }

    /// Current state of the sandbox, without side effects.
    #[must_use]
    pub fn inspect(&self) -> SandboxHandle {
        let interpreter = interpreter_path(&self.root);
        SandboxHandle {
            exists: is_executable(&interpreter),
            root_path: self.root.clone(),
            interpreter_path: interpreter,
            reused: false,
        }
    }

    /// Make sure a working sandbox exists.
    ///
    /// An existing sandbox is offered for reuse unless `reset_requested`;
    /// reuse performs no creation at all. Otherwise the old tree is removed and
    /// a new one is created.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::SandboxCreationFailed`] when no executable
    /// interpreter exists after one retry, or a prompt error.
    pub fn ensure(&self, reset_requested: bool) -> Result<SandboxHandle> {
        let current = self.inspect();

        if current.exists && !reset_requested {
            let question = format!(
                "Existing environment found at {}. Reuse it?",
                self.root.display()
            );
            if self.prompter.confirm(&question, true)? {
                info!(root = %self.root.display(), "reusing sandbox");
                return Ok(SandboxHandle {
                    reused: true,
                    ..current
                });
            }
        } else if self.root.exists() && !current.exists {
            warn!(root = %self.root.display(), "sandbox has no working interpreter, recreating");
        }

        if let Err(e) = self.destroy() {
            warn!(root = %self.root.display(), error = %e, "could not fully remove old sandbox");
        }
        self.create()
    }

    /// Best-effort recursive removal, retried once after a pause to ride out
    /// transient file locks.
    ///
    /// # Errors
    ///
    /// Returns the second removal error if both attempts fail.
    pub fn destroy(&self) -> Result<()> {
        if !self.root.exists() {
            return Ok(());
        }
        info!(root = %self.root.display(), "removing sandbox");
        match (self.remove_tree)(&self.root) {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!(error = %first, "sandbox removal failed, retrying");
                std::thread::sleep(self.remove_retry_delay);
                match (self.remove_tree)(&self.root) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    fn create(&self) -> Result<SandboxHandle> {
        let spec = CommandSpec::new(&self.runtime_command)
            .args(["-m", "venv"])
            .arg(self.root.to_string_lossy());
        let mut cause = String::new();

        for attempt in 1..=CREATE_ATTEMPTS {
            info!(root = %self.root.display(), attempt, "creating sandbox");
            match self.runner.output(&spec) {
                Ok(out) if out.success() => {}
                Ok(out) => cause = out.tail(5),
                Err(e) => cause = e.to_string(),
            }

            let handle = self.inspect();
            if handle.exists {
                info!(interpreter = %handle.interpreter_path.display(), "sandbox ready");
                return Ok(handle);
            }
            if cause.is_empty() {
                cause = format!(
                    "interpreter missing at {}",
                    handle.interpreter_path.display()
                );
            }
            warn!(attempt, cause = %cause, "sandbox creation did not yield an interpreter");
            if attempt < CREATE_ATTEMPTS {
                if let Err(e) = self.destroy() {
                    warn!(root = %self.root.display(), error = %e, "could not remove failed sandbox before retry");
                }
            }
        }

        Err(SetupError::SandboxCreationFailed {
            root: self.root.clone(),
            cause,
        })
    }
}
