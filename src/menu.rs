//! Numbered action menu over the orchestrator entry points.

use tracing::warn;

use crate::error::Result;
use crate::orchestrator::{failure_lines, InstallMode, InstallOptions, Orchestrator};

/// Menu entries, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    Install,
    FreshInstall,
    Launch,
    DownloadModels,
    ConfigureToken,
    SystemCheck,
    VerifyModels,
    Quit,
}

impl MenuAction {
    pub const ALL: [Self; 8] = [
        Self::Install,
        Self::FreshInstall,
        Self::Launch,
        Self::DownloadModels,
        Self::ConfigureToken,
        Self::SystemCheck,
        Self::VerifyModels,
        Self::Quit,
    ];

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Install => "Install or repair",
            Self::FreshInstall => "Fresh install (delete the environment first)",
            Self::Launch => "Launch the server",
            Self::DownloadModels => "Download or locate model files",
            Self::ConfigureToken => "Set registry access token",
            Self::SystemCheck => "System check",
            Self::VerifyModels => "Verify model files",
            Self::Quit => "Quit",
        }
    }
}

/// Show the menu until the user quits or input fails. Failed actions are
/// reported and the menu is shown again.
///
/// # Errors
///
/// Returns a prompt error when the menu itself cannot be shown.
pub fn run(orchestrator: &Orchestrator<'_>, prompter: &dyn crate::prompt::Prompter) -> Result<()> {
    let labels: Vec<&str> = MenuAction::ALL.iter().map(|a| a.label()).collect();
    let quit = MenuAction::ALL.len() - 1;

    loop {
        let index = prompter.select("What would you like to do?", &labels, quit)?;
        let action = MenuAction::ALL.get(index).copied().unwrap_or(MenuAction::Quit);
        if action == MenuAction::Quit {
            return Ok(());
        }
        if let Err(e) = dispatch(orchestrator, action) {
            warn!(error = %e, action = action.label(), "menu action failed");
            for line in failure_lines(&e) {
                println!("{line}");
            }
        }
        println!();
    }
}

fn dispatch(orchestrator: &Orchestrator<'_>, action: MenuAction) -> Result<()> {
    match action {
        MenuAction::Install | MenuAction::FreshInstall => {
            let mode = if action == MenuAction::FreshInstall {
                InstallMode::Fresh
            } else {
                InstallMode::Repair
            };
            orchestrator.install(&InstallOptions { mode, assets: None })?;
        }
        MenuAction::Launch => {
            orchestrator.launch(None)?;
        }
        MenuAction::DownloadModels => {
            orchestrator.provision_assets(None)?;
        }
        MenuAction::ConfigureToken => {
            orchestrator.configure_token();
        }
        MenuAction::SystemCheck => {
            for line in orchestrator.check().lines() {
                println!("{line}");
            }
        }
        MenuAction::VerifyModels => {
            for line in orchestrator.verify()?.lines() {
                println!("{line}");
            }
        }
        MenuAction::Quit => {}
    }
    Ok(())
}
