//! Subprocess invocation boundary.
//!
//! Every external program the orchestrator touches (runtime probes, package
//! installers, the client build toolchain, the server itself) is described by a
//! [`CommandSpec`] and executed through a [`CommandRunner`]. Environment
//! variables for a child live on its `CommandSpec` only; the orchestrator never
//! mutates its own process environment.

use std::cell::RefCell;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

/// A fully described subprocess invocation.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Variables added to the inherited environment of the child.
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Value of an environment entry, if set.
    #[must_use]
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether `flag` appears among the arguments.
    #[must_use]
    pub fn has_arg(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }

    /// Argument following `flag`, if any.
    #[must_use]
    pub fn arg_after(&self, flag: &str) -> Option<&str> {
        let pos = self.args.iter().position(|a| a == flag)?;
        self.args.get(pos + 1).map(String::as_str)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

// Environment values can carry credentials; only keys are printed.
impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &env_keys)
            .field("cwd", &self.cwd)
            .finish()
    }
}

/// Captured result of a finished subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Last `lines` non-empty lines of stderr (or stdout when stderr is empty).
    #[must_use]
    pub fn tail(&self, lines: usize) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let kept: Vec<&str> = source
            .lines()
            .filter(|l| !l.trim().is_empty())
            .collect();
        let start = kept.len().saturating_sub(lines);
        kept[start..].join("\n")
    }
}

/// Executes subprocesses synchronously.
pub trait CommandRunner {
    /// Run to completion with captured stdout/stderr.
    ///
    /// # Errors
    ///
    /// Returns `io::ErrorKind::NotFound` when the program does not exist, or
    /// any other spawn error.
    fn output(&self, spec: &CommandSpec) -> io::Result<CommandOutput>;

    /// Run to completion with inherited stdio, returning the exit code
    /// (`None` when terminated by a signal).
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned.
    fn status(&self, spec: &CommandSpec) -> io::Result<Option<i32>>;
}

/// Runner backed by [`std::process::Command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    fn command(spec: &CommandSpec) -> io::Result<Command> {
        let program = resolve_program(&spec.program)?;
        let mut cmd = Command::new(program);
        cmd.args(&spec.args);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        Ok(cmd)
    }
}

impl CommandRunner for SystemRunner {
    fn output(&self, spec: &CommandSpec) -> io::Result<CommandOutput> {
        debug!(command = %spec, "running");
        let out = Self::command(spec)?.output()?;
        Ok(CommandOutput {
            code: out.status.code(),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        })
    }

    fn status(&self, spec: &CommandSpec) -> io::Result<Option<i32>> {
        debug!(command = %spec, "running attached");
        let status = Self::command(spec)?.status()?;
        Ok(status.code())
    }
}

/// Resolve bare command names through `PATH` (this also finds `npm.cmd` on
/// Windows); paths are used as-is.
fn resolve_program(program: &Path) -> io::Result<PathBuf> {
    if program.components().count() > 1 || program.is_absolute() {
        return Ok(program.to_path_buf());
    }
    which::which(program).map_err(|e| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} not found on PATH: {e}", program.display()),
        )
    })
}

type Handler = Box<dyn Fn(&CommandSpec) -> io::Result<CommandOutput>>;

/// Runner that answers from a closure and records every invocation.
///
/// Used to drive the orchestrator deterministically without real
/// subprocesses.
pub struct ScriptedRunner {
    handler: Handler,
    calls: RefCell<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new(handler: impl Fn(&CommandSpec) -> io::Result<CommandOutput> + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Every invocation so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.borrow().clone()
    }

    /// Display form of every invocation so far.
    #[must_use]
    pub fn call_lines(&self) -> Vec<String> {
        self.calls.borrow().iter().map(ToString::to_string).collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn output(&self, spec: &CommandSpec) -> io::Result<CommandOutput> {
        self.calls.borrow_mut().push(spec.clone());
        (self.handler)(spec)
    }

    fn status(&self, spec: &CommandSpec) -> io::Result<Option<i32>> {
        self.calls.borrow_mut().push(spec.clone());
        (self.handler)(spec).map(|out| out.code)
    }
}

/// Shorthand for a "program not found" spawn error.
#[must_use]
pub fn not_found(spec: &CommandSpec) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} not found", spec.program.display()),
    )
}
