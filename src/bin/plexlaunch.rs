//! CLI binary for plexlaunch.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use plexlaunch::assets::{AssetChoice, HfHubSource};
use plexlaunch::credentials::{CredentialStore, KeyringStore, LoginFileStore, Secret};
use plexlaunch::exec::SystemRunner;
use plexlaunch::launch::{Exposure, LaunchMode, LaunchSelection};
use plexlaunch::orchestrator::failure_lines;
use plexlaunch::prompt::{DefaultsPrompter, Prompter, TerminalPrompter};
use plexlaunch::registry::HfRegistry;
use plexlaunch::{InstallMode, InstallOptions, Orchestrator, Services, SetupConfig, SetupError};

/// Set up and launch a local speech model server.
#[derive(Parser)]
#[command(name = "plexlaunch", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Installation directory (server sources, web client, environment).
    #[arg(long, global = true)]
    install_dir: Option<PathBuf>,

    /// Front-end to use.
    #[arg(long, value_enum, default_value_t = Frontend::Console, global = true)]
    frontend: Frontend,

    /// Answer every confirmation with its default and never ask for input.
    #[arg(short = 'y', long = "yes", global = true)]
    yes: bool,

    /// Debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Frontend {
    Console,
    Gui,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive menu (default).
    Menu,

    /// Install or repair the environment, web client, token and model files.
    Install {
        /// Delete the existing environment first.
        #[arg(long, conflicts_with_all = ["repair", "models_only"])]
        fresh: bool,

        /// Reuse the environment and reinstall only what is broken.
        #[arg(long, conflicts_with = "models_only")]
        repair: bool,

        /// Only configure the token and model files.
        #[arg(long)]
        models_only: bool,

        /// Model files: `now`, `defer`, or `local:<path>`.
        #[arg(long, value_parser = parse_asset_choice)]
        assets: Option<AssetChoice>,
    },

    /// Start the server and wait for it to exit.
    Launch {
        /// Split the model between GPU and CPU memory.
        #[arg(long)]
        cpu_offload: bool,

        /// Expose the server through a public tunnel.
        #[arg(long)]
        public: bool,
    },

    /// Download the model files, or record where they already are.
    Models {
        /// Use model files from this folder.
        #[arg(long, conflicts_with = "defer")]
        path: Option<PathBuf>,

        /// Let the server download the files on first start.
        #[arg(long)]
        defer: bool,
    },

    /// Enter and validate a new registry access token.
    Token,

    /// Check whether this computer is ready.
    Check,

    /// Verify downloaded model files.
    Verify,
}

fn parse_asset_choice(value: &str) -> Result<AssetChoice, String> {
    match value {
        "now" => Ok(AssetChoice::DownloadNow),
        "defer" => Ok(AssetChoice::Defer),
        other => match other.strip_prefix("local:") {
            Some(path) if !path.is_empty() => Ok(AssetChoice::UseLocalPath(PathBuf::from(path))),
            _ => Err(format!(
                "expected `now`, `defer` or `local:<path>`, got `{other}`"
            )),
        },
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _log_guard = plexlaunch::logging::init(&plexlaunch::plex_dirs::logs_dir(), cli.verbose);
    if let Err(e) = plexlaunch::supervisor::install_interrupt_handler() {
        warn!(error = %e, "could not install Ctrl+C handler");
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            match e.downcast_ref::<SetupError>() {
                Some(err) => failure_lines(err).iter().for_each(|l| eprintln!("{l}")),
                None => eprintln!("Error: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    println!("plexlaunch v{}", env!("CARGO_PKG_VERSION"));
    if cli.frontend == Frontend::Gui {
        info!("graphical front-end is not available in this build; using the console");
        println!("The graphical front-end is not available; continuing in the console.");
    }

    let config = SetupConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let install_dir = plexlaunch::plex_dirs::install_dir(cli.install_dir.as_deref());

    let runner = SystemRunner;
    let prompter: Box<dyn Prompter> = if cli.yes {
        Box::new(DefaultsPrompter)
    } else {
        Box::new(TerminalPrompter::new())
    };
    let registry = HfRegistry::new(
        config.registry.api_base.clone(),
        Duration::from_secs(config.registry.timeout_secs),
    );
    let keyring = KeyringStore::new(
        config.registry.keyring_service.clone(),
        config.registry.keyring_account.clone(),
    );
    let login_file = plexlaunch::plex_dirs::hf_token_file().map(LoginFileStore::new);
    let artifacts = HfHubSource::new(config.registry.api_base.clone());
    let env_token = std::env::var(&config.registry.token_env)
        .ok()
        .map(Secret::new);

    let services = Services {
        runner: &runner,
        prompter: prompter.as_ref(),
        registry: &registry,
        credential_store: &keyring,
        cached_stores: login_file
            .iter()
            .map(|store| store as &dyn CredentialStore)
            .collect(),
        artifacts: &artifacts,
    };
    let orchestrator = Orchestrator::new(config, install_dir, services).with_env_token(env_token);

    let code = match cli.command.unwrap_or(Command::Menu) {
        Command::Menu => {
            plexlaunch::menu::run(&orchestrator, prompter.as_ref())?;
            ExitCode::SUCCESS
        }
        Command::Install {
            fresh,
            repair: _,
            models_only,
            assets,
        } => {
            let mode = if fresh {
                InstallMode::Fresh
            } else if models_only {
                InstallMode::ModelsOnly
            } else {
                InstallMode::Repair
            };
            orchestrator.install(&InstallOptions { mode, assets })?;
            ExitCode::SUCCESS
        }
        Command::Launch {
            cpu_offload,
            public,
        } => {
            let selection = (cpu_offload || public).then(|| {
                LaunchSelection::new(
                    if cpu_offload {
                        LaunchMode::CpuOffload
                    } else {
                        LaunchMode::Normal
                    },
                    if public {
                        Exposure::PublicTunnel
                    } else {
                        Exposure::Local
                    },
                )
            });
            let classification = orchestrator.launch(selection)?;
            if classification.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Command::Models { path, defer } => {
            let choice = match (path, defer) {
                (Some(path), _) => AssetChoice::UseLocalPath(path),
                (None, true) => AssetChoice::Defer,
                (None, false) => AssetChoice::DownloadNow,
            };
            orchestrator.provision_assets(Some(choice))?;
            ExitCode::SUCCESS
        }
        Command::Token => {
            let state = orchestrator.configure_token();
            if state.token.is_some() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Command::Check => {
            let report = orchestrator.check();
            for line in report.lines() {
                println!("{line}");
            }
            if report.has_errors() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Command::Verify => {
            let report = orchestrator.verify()?;
            for line in report.lines() {
                println!("{line}");
            }
            if report.all_required_ok() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
    };
    Ok(code)
}
