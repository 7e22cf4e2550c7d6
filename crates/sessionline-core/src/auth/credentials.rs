use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use keyring::Entry;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Durable slot holding the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Durable slot holding the id of the signed-in user.
pub const SESSION_USER_KEY: &str = "session_user";

/// Short-lived bearer token attached to every request.
///
/// `expires_in` is advisory: the server rejecting the token is the only
/// authoritative expiry signal.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCredential {
    token: String,
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub issued_at: DateTime<Utc>,
}

impl AccessCredential {
    pub fn new(token: impl Into<String>, token_type: Option<String>, expires_in: Option<u64>) -> Self {
        Self {
            token: token.into(),
            token_type: token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_in,
            issued_at: Utc::now(),
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self::new(token, None, None)
    }

    pub fn secret(&self) -> &str {
        &self.token
    }

    /// Authorization header value for this token
    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// Client-side guess at expiry, skewed by the local clock
    pub fn expires_hint(&self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.expires_in?).ok()?;
        Some(self.issued_at + Duration::seconds(secs))
    }

    pub fn likely_expired(&self) -> bool {
        self.expires_hint().map(|at| Utc::now() >= at).unwrap_or(false)
    }
}

impl fmt::Debug for AccessCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessCredential")
            .field("token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Authorization header for an optional credential; no header when absent.
pub fn format_token(credential: Option<&AccessCredential>) -> Option<String> {
    credential.map(AccessCredential::header_value)
}

/// Long-lived token used only to obtain a new [`AccessCredential`].
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshCredential(String);

impl RefreshCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RefreshCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RefreshCredential(<redacted>)")
    }
}

/// String-valued key/value storage that survives a process restart.
pub trait DurableStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// OS keychain storage.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key).context("Failed to create keyring entry")
    }
}

impl DurableStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve secret from keychain"),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .context("Failed to store secret in keychain")
    }

    fn remove(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete secret from keychain"),
        }
    }
}

/// JSON file storage, for hosts without a usable keychain.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> Result<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)
            .context("Failed to read credential file")?;
        serde_json::from_str(&contents).context("Failed to parse credential file")
    }

    fn write_all(&self, slots: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(slots)?;
        write_private(&self.path, contents.as_bytes()).context("Failed to write credential file")?;
        Ok(())
    }
}

/// Write a file readable by the owning user only.
#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies on creation
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

impl DurableStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock();
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut slots = self.read_all()?;
        slots.insert(key.to_string(), value.to_string());
        self.write_all(&slots)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut slots = self.read_all()?;
        if slots.remove(key).is_some() {
            self.write_all(&slots)?;
        }
        Ok(())
    }
}

/// Process-local storage.
#[derive(Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.slots.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.slots.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.slots.lock().remove(key);
        Ok(())
    }
}

/// Holds the access credential in memory and the refresh credential in
/// durable storage.
pub struct CredentialStore {
    access: RwLock<Option<AccessCredential>>,
    durable: Arc<dyn DurableStore>,
}

impl CredentialStore {
    pub fn new(durable: Arc<dyn DurableStore>) -> Self {
        Self {
            access: RwLock::new(None),
            durable,
        }
    }

    pub fn access(&self) -> Option<AccessCredential> {
        self.access.read().clone()
    }

    pub fn set_access(&self, credential: AccessCredential) {
        *self.access.write() = Some(credential);
    }

    pub fn take_access(&self) -> Option<AccessCredential> {
        self.access.write().take()
    }

    pub fn has_access(&self) -> bool {
        self.access.read().is_some()
    }

    /// Read the refresh credential. A storage failure reads as absent.
    pub fn refresh(&self) -> Option<RefreshCredential> {
        match self.durable.get(REFRESH_TOKEN_KEY) {
            Ok(value) => value.filter(|v| !v.is_empty()).map(RefreshCredential::new),
            Err(e) => {
                warn!(error = %e, "Failed to read refresh token");
                None
            }
        }
    }

    pub fn set_refresh(&self, credential: &RefreshCredential) -> Result<()> {
        self.durable.set(REFRESH_TOKEN_KEY, credential.secret())
    }

    pub fn clear_refresh(&self) {
        if let Err(e) = self.durable.remove(REFRESH_TOKEN_KEY) {
            warn!(error = %e, "Failed to remove refresh token");
        }
    }

    pub fn stored_user(&self) -> Option<String> {
        self.durable.get(SESSION_USER_KEY).ok().flatten()
    }

    pub fn set_stored_user(&self, user_id: &str) -> Result<()> {
        self.durable.set(SESSION_USER_KEY, user_id)
    }

    pub fn clear_stored_user(&self) {
        if let Err(e) = self.durable.remove(SESSION_USER_KEY) {
            warn!(error = %e, "Failed to remove stored user");
        }
    }
}
