//! Durable credential backends.

#[cfg(test)]
use std::cell::RefCell;
use std::path::PathBuf;

use super::{CredentialError, Secret};

/// A single durable slot for the registry token.
pub trait CredentialStore {
    /// Short name for log lines.
    fn label(&self) -> &str;

    /// Save the token, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write.
    fn store(&self, value: &Secret) -> Result<(), CredentialError>;

    /// Read the token; `Ok(None)` when nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn retrieve(&self) -> Result<Option<Secret>, CredentialError>;
}

/// Platform keyring (macOS Keychain, Windows Credential Manager, Linux
/// keyutils cache backed by the Secret Service, so tokens survive reboots).
pub struct KeyringStore {
    service: String,
    account: String,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, CredentialError> {
        keyring::Entry::new(&self.service, &self.account)
            .map_err(|e| CredentialError::KeyringAccess(e.to_string()))
    }
}

impl CredentialStore for KeyringStore {
    fn label(&self) -> &str {
        "system keyring"
    }

    fn store(&self, value: &Secret) -> Result<(), CredentialError> {
        self.entry()?
            .set_password(value.expose())
            .map_err(|e| CredentialError::KeyringAccess(format!("failed to store token: {e}")))
    }

    fn retrieve(&self) -> Result<Option<Secret>, CredentialError> {
        match self.entry()?.get_password() {
            Ok(value) if value.trim().is_empty() => Ok(None),
            Ok(value) => Ok(Some(Secret::new(value.trim()))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(CredentialError::KeyringAccess(format!(
                "failed to read token: {e}"
            ))),
        }
    }
}

/// Token file left by the registry's own login command. Read-only here; this
/// tool persists to the keyring instead.
pub struct LoginFileStore {
    path: PathBuf,
}

impl LoginFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialStore for LoginFileStore {
    fn label(&self) -> &str {
        "registry login file"
    }

    fn store(&self, _value: &Secret) -> Result<(), CredentialError> {
        Err(CredentialError::ReadOnly(self.path.display().to_string()))
    }

    fn retrieve(&self) -> Result<Option<Secret>, CredentialError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => {
                let token = content.trim();
                Ok((!token.is_empty()).then(|| Secret::new(token)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process store for unit tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    value: RefCell<Option<Secret>>,
}

#[cfg(test)]
impl MemoryStore {
    pub(crate) fn with_value(value: &str) -> Self {
        Self {
            value: RefCell::new(Some(Secret::new(value))),
        }
    }

    pub(crate) fn current(&self) -> Option<Secret> {
        self.value.borrow().clone()
    }
}

#[cfg(test)]
impl CredentialStore for MemoryStore {
    fn label(&self) -> &str {
        "memory"
    }

    fn store(&self, value: &Secret) -> Result<(), CredentialError> {
        *self.value.borrow_mut() = Some(value.clone());
        Ok(())
    }

    fn retrieve(&self) -> Result<Option<Secret>, CredentialError> {
        Ok(self.current())
    }
}
