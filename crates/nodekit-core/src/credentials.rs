//! Secure API-key storage using the OS keyring.
//!
//! The API key never touches the plain settings file: it is written to the
//! platform keystore and only handed around wrapped in [`SecretString`].
//! Tests use the in-memory mode, which keeps the same interface without
//! touching the host keyring.

use std::sync::RwLock;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

/// Keyring entry name for the branding API key.
const API_KEY_ENTRY: &str = "api_key";

/// Errors from credential storage.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CredentialError {
    /// Underlying keyring failure.
    #[error("keyring error: {0}")]
    Keyring(String),

    /// No credential stored under the requested entry.
    #[error("credential not found")]
    NotFound,

    /// Internal lock poisoned.
    #[error("credential store lock poisoned")]
    LockPoisoned,
}

enum Backend {
    Keyring { service_name: String },
    InMemory { secret: RwLock<Option<SecretString>> },
}

/// API-key store backed by the OS keyring.
pub struct ApiKeyStore {
    backend: Backend,
}

impl ApiKeyStore {
    /// Creates a store writing to the OS keyring under `service_name`.
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            backend: Backend::Keyring {
                service_name: service_name.into(),
            },
        }
    }

    /// Creates an in-memory store (tests and hosts without a keyring).
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::InMemory {
                secret: RwLock::new(None),
            },
        }
    }

    /// Stores the API key, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Keyring`] if the keystore write fails.
    pub fn store(&self, api_key: SecretString) -> Result<(), CredentialError> {
        match &self.backend {
            Backend::Keyring { service_name } => {
                let entry = keyring::Entry::new(service_name, API_KEY_ENTRY)
                    .map_err(|e| CredentialError::Keyring(e.to_string()))?;
                entry
                    .set_password(api_key.expose_secret())
                    .map_err(|e| CredentialError::Keyring(e.to_string()))?;
                Ok(())
            },
            Backend::InMemory { secret } => {
                let mut guard = secret.write().map_err(|_| CredentialError::LockPoisoned)?;
                *guard = Some(api_key);
                Ok(())
            },
        }
    }

    /// Retrieves the stored API key.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::NotFound`] when no key has been stored,
    /// or [`CredentialError::Keyring`] on keystore failure.
    pub fn get(&self) -> Result<SecretString, CredentialError> {
        match &self.backend {
            Backend::Keyring { service_name } => {
                let entry = keyring::Entry::new(service_name, API_KEY_ENTRY)
                    .map_err(|e| CredentialError::Keyring(e.to_string()))?;
                match entry.get_password() {
                    Ok(password) => Ok(SecretString::from(password)),
                    Err(keyring::Error::NoEntry) => Err(CredentialError::NotFound),
                    Err(e) => Err(CredentialError::Keyring(e.to_string())),
                }
            },
            Backend::InMemory { secret } => {
                let guard = secret.read().map_err(|_| CredentialError::LockPoisoned)?;
                guard.clone().ok_or(CredentialError::NotFound)
            },
        }
    }

    /// Removes the stored API key, if any.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Keyring`] on keystore failure. Removing a
    /// missing key is not an error.
    pub fn remove(&self) -> Result<(), CredentialError> {
        match &self.backend {
            Backend::Keyring { service_name } => {
                let entry = keyring::Entry::new(service_name, API_KEY_ENTRY)
                    .map_err(|e| CredentialError::Keyring(e.to_string()))?;
                match entry.delete_credential() {
                    Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                    Err(e) => Err(CredentialError::Keyring(e.to_string())),
                }
            },
            Backend::InMemory { secret } => {
                let mut guard = secret.write().map_err(|_| CredentialError::LockPoisoned)?;
                *guard = None;
                Ok(())
            },
        }
    }
}

impl std::fmt::Debug for ApiKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match &self.backend {
            Backend::Keyring { service_name } => format!("keyring({service_name})"),
            Backend::InMemory { .. } => "in-memory".to_string(),
        };
        f.debug_struct("ApiKeyStore")
            .field("backend", &backend)
            .finish()
    }
}
