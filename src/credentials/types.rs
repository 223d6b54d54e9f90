//! Core types for credential management.

use std::fmt;

/// A secret string whose `Debug` and `Display` never reveal the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value. Only pass this to the registry or a child environment.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

/// Where the session's token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    None,
    /// Process environment variable.
    Env,
    /// Durable storage from an earlier session.
    Cached,
    /// Typed in at the prompt during this run.
    Entered,
}

impl fmt::Display for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Env => "environment",
            Self::Cached => "saved login",
            Self::Entered => "entered",
        };
        f.write_str(s)
    }
}

/// The registry credential for this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialState {
    pub token: Option<Secret>,
    pub source: TokenSource,
    /// The token lives in durable user-level storage.
    pub persisted: bool,
}

impl CredentialState {
    #[must_use]
    pub fn none() -> Self {
        Self {
            token: None,
            source: TokenSource::None,
            persisted: false,
        }
    }
}

/// Errors that can occur during credential operations.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Platform keyring access failed.
    #[error("keyring access error: {0}")]
    KeyringAccess(String),

    /// Token file could not be read or written.
    #[error("token file error: {0}")]
    File(#[from] std::io::Error),

    /// The store does not accept writes.
    #[error("{0} is read-only")]
    ReadOnly(String),
}
