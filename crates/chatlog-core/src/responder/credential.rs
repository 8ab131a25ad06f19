//! Credentials for the remote responder

use std::fmt;

use zeroize::Zeroizing;

/// API credential that is wiped from memory on drop
#[derive(Clone)]
pub struct Credential(Zeroizing<String>);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Supplies the credential at call time.
///
/// `None` means no credential is available; the remote responder reports
/// that as an authentication failure.
pub trait CredentialProvider: Send + Sync {
    fn credential(&self) -> Option<Credential>;
}

/// Fixed credential, typically taken from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticCredential(Option<Credential>);

impl StaticCredential {
    pub fn new(secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if secret.trim().is_empty() {
            Self(None)
        } else {
            Self(Some(Credential::new(secret)))
        }
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl CredentialProvider for StaticCredential {
    fn credential(&self) -> Option<Credential> {
        self.0.clone()
    }
}

/// Reads the credential from an environment variable on every call
#[derive(Debug, Clone)]
pub struct EnvCredential {
    var: String,
}

impl EnvCredential {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl CredentialProvider for EnvCredential {
    fn credential(&self) -> Option<Credential> {
        std::env::var(&self.var)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(Credential::new)
    }
}
