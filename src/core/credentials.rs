//! Credential storage and resolution.
//!
//! Credentials live in the session secret store under the profile name.
//! `OpenVPN` additionally keeps a plaintext auth file (mode 600) next to the
//! config, which the daemon reads through `--auth-user-pass`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use crate::error::{Result, VpnError};

/// A username/password pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Contents of an `OpenVPN` `--auth-user-pass` file.
    #[must_use]
    pub fn to_auth_file(&self) -> String {
        format!("{}\n{}", self.username, self.password)
    }

    /// Parses an auth file: first line username, second line password.
    #[must_use]
    pub fn from_auth_file(content: &str) -> Option<Self> {
        let mut lines = content.lines();
        let username = lines.next()?.trim_end();
        let password = lines.next()?.trim_end();
        Some(Self::new(username, password))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where resolved credentials came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Explicit,
    SecretStore,
    AuthFile,
}

/// Session secret store keyed by profile name.
pub trait SecretStore: Send + Sync {
    /// # Errors
    ///
    /// Returns [`VpnError::SecretStore`] if the store cannot be queried.
    fn get(&self, profile: &str) -> Result<Option<Credentials>>;

    /// # Errors
    ///
    /// Returns [`VpnError::SecretStore`] if the store rejects the write.
    fn set(&self, profile: &str, credentials: &Credentials) -> Result<()>;

    /// Deletes stored credentials; deleting a missing entry succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`VpnError::SecretStore`] if the store rejects the delete.
    fn delete(&self, profile: &str) -> Result<()>;
}

/// Secret Service backed store (GNOME Keyring, `KWallet`, ...).
///
/// Entries hold `{"username": ..., "password": ...}` as JSON.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, profile: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, profile).map_err(|e| VpnError::SecretStore(e.to_string()))
    }
}

impl SecretStore for KeyringStore {
    fn get(&self, profile: &str) -> Result<Option<Credentials>> {
        match self.entry(profile)?.get_password() {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(VpnError::SecretStore(e.to_string())),
        }
    }

    fn set(&self, profile: &str, credentials: &Credentials) -> Result<()> {
        let json = serde_json::to_string(credentials)?;
        self.entry(profile)?
            .set_password(&json)
            .map_err(|e| VpnError::SecretStore(e.to_string()))
    }

    fn delete(&self, profile: &str) -> Result<()> {
        match self.entry(profile)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(VpnError::SecretStore(e.to_string())),
        }
    }
}

/// In-process store, for front ends without a session keyring.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Credentials>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemoryStore {
    fn get(&self, profile: &str) -> Result<Option<Credentials>> {
        Ok(self.lock()?.get(profile).cloned())
    }

    fn set(&self, profile: &str, credentials: &Credentials) -> Result<()> {
        self.lock()?.insert(profile.to_string(), credentials.clone());
        Ok(())
    }

    fn delete(&self, profile: &str) -> Result<()> {
        self.lock()?.remove(profile);
        Ok(())
    }
}

impl MemoryStore {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Credentials>>> {
        self.entries
            .lock()
            .map_err(|_| VpnError::SecretStore("memory store poisoned".to_string()))
    }
}

/// Picks credentials in order: explicit, secret store, auth file.
///
/// `auth_file` is only passed for `OpenVPN` profiles. Secret store errors
/// are logged and treated as "nothing stored".
pub fn resolve_credentials(
    explicit: Option<Credentials>,
    store: &dyn SecretStore,
    profile: &str,
    auth_file: Option<&Path>,
) -> Option<(Credentials, CredentialSource)> {
    if let Some(creds) = explicit {
        return Some((creds, CredentialSource::Explicit));
    }

    match store.get(profile) {
        Ok(Some(creds)) => return Some((creds, CredentialSource::SecretStore)),
        Ok(None) => {}
        Err(e) => log::error!("Failed to get credentials for '{profile}': {e}"),
    }

    let path = auth_file?;
    if !path.exists() {
        return None;
    }
    match fs::read_to_string(path) {
        Ok(content) => Credentials::from_auth_file(&content).map(|c| (c, CredentialSource::AuthFile)),
        Err(e) => {
            log::error!("Failed to read auth file {}: {e}", path.display());
            None
        }
    }
}

/// Writes an `OpenVPN` auth file readable only by its owner.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be written or restricted.
pub fn write_auth_file(path: &Path, credentials: &Credentials) -> Result<()> {
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        file.write_all(credentials.to_auth_file().as_bytes())?;
    }
    crate::utils::set_private_permissions(path)?;
    Ok(())
}
