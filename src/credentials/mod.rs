//! Registry credential resolution.
//!
//! [`CredentialConfigurator::ensure`] settles the token for the run in a fixed
//! order:
//!
//! 1. the token environment variable, used as-is
//! 2. a token saved by an earlier session (keyring, then the registry's own
//!    login file)
//! 3. an interactive prompt, bounded to [`MAX_TOKEN_PROMPTS`] entries
//!
//! A token entered at the prompt stays in memory unless the user opts in to
//! saving it. Registry validation afterwards is advisory and never blocks.

mod store;
mod types;

pub use store::{CredentialStore, KeyringStore, LoginFileStore};
pub use types::{CredentialError, CredentialState, Secret, TokenSource};

use tracing::{info, warn};

use crate::config::RegistryConfig;
use crate::registry::{AccessStatus, RegistryClient};
use crate::prompt::Prompter;

/// Token entries accepted before the prompt gives up.
pub const MAX_TOKEN_PROMPTS: usize = 5;

/// Small file in the model repository used to probe the license gate.
pub const LICENSE_PROBE_FILE: &str = "tokenizer_spm_32k_3.model";

/// Establishes and validates the registry token.
pub struct CredentialConfigurator<'a> {
    config: &'a RegistryConfig,
    /// Opt-in persistence target, also read as a cached source.
    durable: &'a dyn CredentialStore,
    /// Additional read-only cached sources, in order.
    cached: Vec<&'a dyn CredentialStore>,
    registry: &'a dyn RegistryClient,
    prompter: &'a dyn Prompter,
}

impl<'a> CredentialConfigurator<'a> {
    pub fn new(
        config: &'a RegistryConfig,
        durable: &'a dyn CredentialStore,
        registry: &'a dyn RegistryClient,
        prompter: &'a dyn Prompter,
    ) -> Self {
        Self {
            config,
            durable,
            cached: Vec::new(),
            registry,
            prompter,
        }
    }

    /// Add a read-only cached source consulted after the durable store.
    #[must_use]
    pub fn with_cached_source(mut self, store: &'a dyn CredentialStore) -> Self {
        self.cached.push(store);
        self
    }

    /// Resolve the token for this run. Never fails; the worst case is a
    /// state with no token.
    pub fn ensure(&self, env_token: Option<&Secret>) -> CredentialState {
        let state = self
            .existing(env_token)
            .unwrap_or_else(|| self.enter_new());

        if let Some(token) = &state.token {
            self.validate(token);
        }
        state
    }

    /// The environment token, else a saved one. Never prompts.
    pub fn existing(&self, env_token: Option<&Secret>) -> Option<CredentialState> {
        if let Some(token) = env_token.filter(|t| !t.expose().trim().is_empty()) {
            info!(variable = %self.config.token_env, "using token from environment");
            return Some(CredentialState {
                token: Some(token.clone()),
                source: TokenSource::Env,
                persisted: false,
            });
        }
        self.cached_token()
    }

    /// Skip the environment and caches and ask for a new token.
    pub fn enter_new(&self) -> CredentialState {
        println!(
            "A registry access token is needed to download the model. Create a read token at {}",
            self.config.token_url
        );
        let Some(token) = self.prompt_for_token() else {
            warn!(
                token_url = %self.config.token_url,
                "continuing without a registry token; downloads will likely be refused"
            );
            return CredentialState::none();
        };

        let persisted = self.offer_to_persist(&token);
        CredentialState {
            token: Some(token),
            source: TokenSource::Entered,
            persisted,
        }
    }

    fn cached_token(&self) -> Option<CredentialState> {
        let sources = std::iter::once(self.durable).chain(self.cached.iter().copied());
        for store in sources {
            match store.retrieve() {
                Ok(Some(token)) => {
                    info!(store = store.label(), "using saved token");
                    return Some(CredentialState {
                        token: Some(token),
                        source: TokenSource::Cached,
                        persisted: true,
                    });
                }
                Ok(None) => {}
                Err(e) => warn!(store = store.label(), error = %e, "could not read saved token"),
            }
        }
        None
    }

    /// Bounded entry loop. `None` means the user gave up or input is
    /// unavailable.
    fn prompt_for_token(&self) -> Option<Secret> {
        let prefix = &self.config.token_prefix;

        for _ in 0..MAX_TOKEN_PROMPTS {
            let entered = match self.prompter.secret("Registry access token (input hidden)") {
                Ok(value) => value.trim().to_owned(),
                Err(e) => {
                    warn!(error = %e, "token prompt unavailable");
                    return None;
                }
            };

            if entered.is_empty() {
                match self.prompter.confirm("No token entered. Try again?", true) {
                    Ok(true) => continue,
                    _ => return None,
                }
            }

            let token = Secret::new(entered);
            if token.has_prefix(prefix) {
                return Some(token);
            }

            warn!(expected_prefix = %prefix, "token does not have the expected prefix");
            let question = format!("Token does not start with \"{prefix}\". Use it anyway?");
            match self.prompter.confirm(&question, false) {
                Ok(true) => return Some(token),
                Ok(false) => continue,
                Err(_) => return None,
            }
        }

        warn!(attempts = MAX_TOKEN_PROMPTS, "no usable token after repeated attempts");
        None
    }

    fn offer_to_persist(&self, token: &Secret) -> bool {
        let question = format!(
            "Save this token in the {} for future sessions?",
            self.durable.label()
        );
        match self.prompter.confirm(&question, false) {
            Ok(true) => match self.durable.store(token) {
                Ok(()) => {
                    info!(store = self.durable.label(), "token saved");
                    true
                }
                Err(e) => {
                    warn!(error = %e, "could not save token; it is kept for this session only");
                    false
                }
            },
            _ => {
                info!("token kept for this session only");
                false
            }
        }
    }

    /// Advisory identity and license-gate check; only logs and prints.
    pub fn validate(&self, token: &Secret) {
        match self.registry.whoami(token) {
            Ok(name) => info!(account = %name, "token accepted by registry"),
            Err(e) => warn!(error = %e, "could not validate token; continuing"),
        }

        match self
            .registry
            .check_access(&self.config.repo_id, LICENSE_PROBE_FILE, Some(token))
        {
            Ok(AccessStatus::Granted) => {}
            Ok(AccessStatus::LicenseRequired) => println!(
                "The model license has not been accepted for this account. Accept it at {}",
                self.config.license_url
            ),
            Ok(AccessStatus::Unauthenticated) => println!(
                "The registry rejected this token. Create a read token at {}",
                self.config.token_url
            ),
            Ok(AccessStatus::NotFound) => {
                warn!(repo = %self.config.repo_id, "model repository not found");
            }
            Err(e) => warn!(error = %e, "could not check model access; continuing"),
        }
    }
}
