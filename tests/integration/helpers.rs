//! Shared fakes for integration tests: a scripted host, an in-memory
//! registry and an artifact source backed by a temp directory.

use std::cell::RefCell;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use plexlaunch::assets::{ArtifactSource, AssetError};
use plexlaunch::config::SetupConfig;
use plexlaunch::credentials::{CredentialError, CredentialStore, Secret};
use plexlaunch::exec::{CommandOutput, CommandSpec, ScriptedRunner, not_found};
use plexlaunch::prompt::Prompter;
use plexlaunch::registry::{AccessStatus, RegistryClient, RegistryError};
use plexlaunch::sandbox::interpreter_path;
use plexlaunch::{Orchestrator, Services};

/// What the scripted host has installed and how its tools behave.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FakeHost {
    /// `python3 --version` answer; `None` means not installed.
    pub runtime_version: Option<&'static str>,
    pub gpu: bool,
    pub node: bool,
    pub client_build_ok: bool,
    /// Every `pip install` naming torch fails.
    pub torch_broken: bool,
    /// Exit status of the server process; `None` is a signal.
    pub server_exit: Option<i32>,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self {
            runtime_version: Some("3.11.4"),
            gpu: true,
            node: true,
            client_build_ok: true,
            torch_broken: false,
            server_exit: Some(0),
        }
    }
}

impl FakeHost {
    pub(crate) fn runner(self) -> ScriptedRunner {
        ScriptedRunner::new(move |spec| self.answer(spec))
    }

    fn answer(self, spec: &CommandSpec) -> std::io::Result<CommandOutput> {
        let program = spec.program.to_string_lossy().into_owned();
        let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();

        match (program.as_str(), args.as_slice()) {
            ("python3", ["--version"]) => match self.runtime_version {
                Some(v) => Ok(CommandOutput::ok(format!("Python {v}\n"))),
                None => Err(not_found(spec)),
            },
            ("python3", ["-m", "venv", root]) => {
                write_interpreter(&interpreter_path(Path::new(root)));
                Ok(CommandOutput::ok(""))
            }
            ("nvidia-smi", _) if self.gpu => {
                Ok(CommandOutput::ok("NVIDIA GeForce RTX 4090, 24564\n"))
            }
            ("nvidia-smi", _) => Err(not_found(spec)),
            ("node" | "npm", _) if !self.node => Err(not_found(spec)),
            ("node", ["--version"]) => Ok(CommandOutput::ok("v20.11.0\n")),
            ("npm", ["--version"]) => Ok(CommandOutput::ok("10.2.4\n")),
            ("npm", ["run", "build"]) => {
                if !self.client_build_ok {
                    return Ok(CommandOutput::failed(1, "error during build: vite exited"));
                }
                if let Some(cwd) = &spec.cwd {
                    let dist = cwd.join("dist");
                    std::fs::create_dir_all(&dist)?;
                    std::fs::write(dist.join("index.html"), "<html></html>")?;
                }
                Ok(CommandOutput::ok(""))
            }
            (_, ["-m", "pip", "install", rest @ ..])
                if self.torch_broken && rest.contains(&"torch") =>
            {
                Ok(CommandOutput::failed(1, "ERROR: No matching distribution found for torch"))
            }
            (_, ["-c", import]) if self.torch_broken && import.contains("torch") => {
                Ok(CommandOutput::failed(1, "ModuleNotFoundError: No module named 'torch'"))
            }
            (_, ["-m", "moshi.server", ..]) => Ok(CommandOutput {
                code: self.server_exit,
                stdout: String::new(),
                stderr: String::new(),
            }),
            _ => Ok(CommandOutput::ok("")),
        }
    }
}

/// Executable placeholder standing in for a sandbox interpreter.
pub(crate) fn write_interpreter(path: &Path) {
    std::fs::create_dir_all(path.parent().expect("interpreter has a parent")).expect("mkdir");
    std::fs::write(path, "#!/bin/sh\n").expect("write interpreter");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    }
}

/// Every `pip install` invocation the runner saw.
pub(crate) fn pip_installs(runner: &ScriptedRunner) -> Vec<String> {
    runner
        .call_lines()
        .into_iter()
        .filter(|line| line.contains("-m pip install"))
        .collect()
}

/// The server invocation, if one was made.
pub(crate) fn server_call(runner: &ScriptedRunner) -> Option<CommandSpec> {
    runner
        .calls()
        .into_iter()
        .find(|spec| spec.args.iter().any(|a| a == "moshi.server"))
}

/// Registry that accepts every token and grants every file.
#[derive(Debug, Default)]
pub(crate) struct FakeRegistry {
    pub access: Option<AccessStatus>,
}

impl RegistryClient for FakeRegistry {
    fn whoami(&self, _token: &Secret) -> Result<String, RegistryError> {
        Ok("speech-tester".to_owned())
    }

    fn check_access(
        &self,
        _repo_id: &str,
        _filename: &str,
        _token: Option<&Secret>,
    ) -> Result<AccessStatus, RegistryError> {
        Ok(self.access.unwrap_or(AccessStatus::Granted))
    }
}

type FetchHook = Box<dyn Fn(&str) -> Option<AssetError>>;

/// Artifact source that materialises files under a directory on fetch.
pub(crate) struct DirSource {
    dir: PathBuf,
    fail: Option<FetchHook>,
    pub fetched: RefCell<Vec<String>>,
}

impl DirSource {
    pub(crate) fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            fail: None,
            fetched: RefCell::new(Vec::new()),
        }
    }

    /// Fail fetches for which `hook` returns an error.
    pub(crate) fn failing(
        dir: &Path,
        hook: impl Fn(&str) -> Option<AssetError> + 'static,
    ) -> Self {
        Self {
            fail: Some(Box::new(hook)),
            ..Self::new(dir)
        }
    }

    pub(crate) fn fetch_count(&self, file: &str) -> usize {
        self.fetched.borrow().iter().filter(|f| *f == file).count()
    }
}

impl ArtifactSource for DirSource {
    fn cached(&self, _repo_id: &str, filename: &str) -> Option<PathBuf> {
        let path = self.dir.join(filename);
        path.is_file().then_some(path)
    }

    fn fetch(
        &self,
        _repo_id: &str,
        filename: &str,
        _token: Option<&Secret>,
    ) -> Result<PathBuf, AssetError> {
        self.fetched.borrow_mut().push(filename.to_owned());
        if let Some(err) = self.fail.as_ref().and_then(|hook| hook(filename)) {
            return Err(err);
        }
        let path = self.dir.join(filename);
        if !path.exists() {
            if filename.ends_with(".tgz") && filename.starts_with("voices") {
                write_voice_archive(&path, &["NATF0.pt", "NATM1.pt"]);
            } else {
                std::fs::write(&path, b"placeholder").map_err(AssetError::Io)?;
            }
        }
        Ok(path)
    }
}

/// Gzipped tar holding `voices/<name>` entries.
pub(crate) fn write_voice_archive(path: &Path, names: &[&str]) {
    let file = File::create(path).expect("create archive");
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for name in names {
        let data = b"voice-embedding";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("voices/{name}"), &data[..])
            .expect("append voice");
    }
    builder
        .into_inner()
        .expect("finish tar")
        .finish()
        .expect("finish gzip");
}

/// Config pinned to the scripted host: one runtime command, TLS work
/// directories under `ssl_root`.
pub(crate) fn test_config(ssl_root: &Path) -> SetupConfig {
    let mut config = SetupConfig::default();
    config.runtime.commands = vec!["python3".to_owned()];
    config.server.ssl_root = Some(ssl_root.to_path_buf());
    config
}

/// Durable token slot that lives only as long as the test.
#[derive(Default)]
pub(crate) struct SavedTokens {
    value: RefCell<Option<Secret>>,
}

impl CredentialStore for SavedTokens {
    fn label(&self) -> &str {
        "test store"
    }

    fn store(&self, value: &Secret) -> Result<(), CredentialError> {
        *self.value.borrow_mut() = Some(value.clone());
        Ok(())
    }

    fn retrieve(&self) -> Result<Option<Secret>, CredentialError> {
        Ok(self.value.borrow().clone())
    }
}

/// Collaborators for one orchestrator under test.
pub(crate) struct Harness {
    pub runner: ScriptedRunner,
    pub registry: FakeRegistry,
    pub store: SavedTokens,
    pub source: DirSource,
}

impl Harness {
    pub(crate) fn new(host: FakeHost, cache_dir: &Path) -> Self {
        Self::with_source(host, DirSource::new(cache_dir))
    }

    pub(crate) fn with_source(host: FakeHost, source: DirSource) -> Self {
        Self {
            runner: host.runner(),
            registry: FakeRegistry::default(),
            store: SavedTokens::default(),
            source,
        }
    }

    pub(crate) fn orchestrator<'a>(
        &'a self,
        config: SetupConfig,
        install_dir: &Path,
        prompter: &'a dyn Prompter,
    ) -> Orchestrator<'a> {
        Orchestrator::new(
            config,
            install_dir,
            Services {
                runner: &self.runner,
                prompter,
                registry: &self.registry,
                credential_store: &self.store,
                cached_stores: Vec::new(),
                artifacts: &self.source,
            },
        )
        .with_env_token(Some(Secret::new("hf_integration")))
        .with_delays(Duration::ZERO, Duration::ZERO)
    }
}

/// Whether a directory is empty or absent.
pub(crate) fn is_empty_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir).map_or(true, |mut entries| entries.next().is_none())
}
