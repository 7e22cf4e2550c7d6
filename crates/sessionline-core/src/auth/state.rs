use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::debug;

use super::credentials::{AccessCredential, CredentialStore, DurableStore};
use super::events::{Notice, SessionEvent};
use super::identity::{Capabilities, SessionIdentity};

/// Where the session stands with respect to re-authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Active,
    /// Waiting on the in-place re-login prompt.
    LoginExpired,
    SignedOut,
}

/// Process-wide session state shared by the pipeline, the refresh
/// coordinator, the re-authentication trigger and the session.
pub struct SessionState {
    credentials: CredentialStore,
    phase: Mutex<SessionPhase>,
    /// Bumped on every sign-in and sign-out. Credential writes stamped with
    /// an older value are dropped.
    epoch: Mutex<u64>,
    access_checked: AtomicBool,
    identity: RwLock<Option<SessionIdentity>>,
    capabilities: RwLock<Capabilities>,
    user_id: RwLock<Option<String>>,
    location: RwLock<String>,
    locale: RwLock<String>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionState {
    pub fn new(
        durable: Arc<dyn DurableStore>,
        locale: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Self {
            credentials: CredentialStore::new(durable),
            phase: Mutex::new(SessionPhase::default()),
            epoch: Mutex::new(0),
            access_checked: AtomicBool::new(false),
            identity: RwLock::new(None),
            capabilities: RwLock::new(Capabilities::default()),
            user_id: RwLock::new(None),
            location: RwLock::new("/".to_string()),
            locale: RwLock::new(locale.into()),
            events: tx,
        };
        (state, rx)
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Drop the access credential together with the identity derived from it.
    pub fn clear_access(&self) -> Option<AccessCredential> {
        let previous = self.credentials.take_access();
        *self.identity.write() = None;
        previous
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock()
    }

    pub fn set_phase(&self, phase: SessionPhase) {
        *self.phase.lock() = phase;
    }

    /// Move from `Active` to `next`. Returns false if the session had already
    /// left `Active`, in which case nothing changes.
    pub fn leave_active(&self, next: SessionPhase) -> bool {
        let mut phase = self.phase.lock();
        if *phase != SessionPhase::Active {
            return false;
        }
        *phase = next;
        true
    }

    pub fn epoch(&self) -> u64 {
        *self.epoch.lock()
    }

    /// Start a new sign-in epoch, orphaning any credential write in flight.
    pub fn advance_epoch(&self) {
        *self.epoch.lock() += 1;
    }

    /// Run `write` against the credential store only if no sign-in or
    /// sign-out happened since `epoch` was read.
    pub fn write_if_current<R>(
        &self,
        epoch: u64,
        write: impl FnOnce(&CredentialStore) -> R,
    ) -> Option<R> {
        let current = self.epoch.lock();
        if *current != epoch {
            debug!(stale = epoch, current = *current, "Dropping credential write from a previous sign-in");
            return None;
        }
        Some(write(&self.credentials))
    }

    /// Forget the signed-in user: durable slots, in-memory state, and any
    /// credential write still in flight. Synchronous, so it completes even
    /// when the caller is cancelled right after.
    pub fn sign_out(&self) {
        let mut epoch = self.epoch.lock();
        *epoch += 1;
        self.credentials.clear_refresh();
        self.credentials.clear_stored_user();
        self.reset();
        *self.phase.lock() = SessionPhase::SignedOut;
    }

    pub fn access_checked(&self) -> bool {
        self.access_checked.load(Ordering::Acquire)
    }

    pub fn mark_access_checked(&self) {
        self.access_checked.store(true, Ordering::Release);
    }

    pub fn identity(&self) -> Option<SessionIdentity> {
        self.identity.read().clone()
    }

    pub fn set_identity(&self, identity: SessionIdentity) {
        *self.user_id.write() = Some(identity.user_id.clone());
        *self.identity.write() = Some(identity);
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities.read().clone()
    }

    pub fn set_capabilities(&self, capabilities: Capabilities) {
        *self.capabilities.write() = capabilities;
    }

    pub fn user_id(&self) -> Option<String> {
        self.user_id.read().clone()
    }

    pub fn set_user_id(&self, user_id: Option<String>) {
        *self.user_id.write() = user_id;
    }

    pub fn location(&self) -> String {
        self.location.read().clone()
    }

    pub fn set_location(&self, location: impl Into<String>) {
        *self.location.write() = location.into();
    }

    pub fn locale(&self) -> String {
        self.locale.read().clone()
    }

    pub fn set_locale(&self, locale: impl Into<String>) {
        *self.locale.write() = locale.into();
    }

    pub fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("Session event dropped - no receiver");
        }
    }

    pub fn notify(&self, notice: Notice) {
        self.emit(SessionEvent::Notify(notice));
    }

    /// Reset everything in memory to its defaults. Durable slots are left
    /// to the caller.
    pub fn reset(&self) {
        self.clear_access();
        *self.capabilities.write() = Capabilities::default();
        *self.user_id.write() = None;
        self.access_checked.store(false, Ordering::Release);
        self.emit(SessionEvent::StateReset);
    }
}
