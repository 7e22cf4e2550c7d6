//! Single-flight token refresh.
//!
//! Any number of requests can fail authentication at the same time; only the
//! first one to reach the [`RefreshLatch`] performs the refresh call, and
//! every other caller awaits that same outcome. The refresh itself runs on
//! its own task so it always completes (and always releases the latch) even
//! if the request that started it is dropped.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::api::SessionApi;

use super::credentials::{AccessCredential, RefreshCredential};
use super::reauth::ReauthTrigger;
use super::state::SessionState;

/// Outcome of an in-flight refresh, shareable between callers.
pub type PendingRefresh = Shared<BoxFuture<'static, Option<AccessCredential>>>;

/// Holds at most one in-flight refresh.
#[derive(Default)]
pub struct RefreshLatch {
    slot: Mutex<Option<(u64, PendingRefresh)>>,
    generation: AtomicU64,
}

impl RefreshLatch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn current(&self) -> Option<PendingRefresh> {
        self.slot.lock().as_ref().map(|(_, pending)| pending.clone())
    }

    pub fn is_idle(&self) -> bool {
        self.slot.lock().is_none()
    }

    /// Join the in-flight refresh, or spawn `operation` as the new one.
    ///
    /// The check and the install happen under one lock, so two callers can
    /// never both become the leader. `operation` receives the
    /// [`LatchRelease`] that frees the slot; it fires on drop as well, so a
    /// panicking refresh can't leave the latch occupied.
    pub fn begin<F, Fut>(self: &Arc<Self>, operation: F) -> PendingRefresh
    where
        F: FnOnce(LatchRelease) -> Fut,
        Fut: Future<Output = Option<AccessCredential>> + Send + 'static,
    {
        let mut slot = self.slot.lock();
        if let Some((_, pending)) = slot.as_ref() {
            return pending.clone();
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let release = LatchRelease {
            latch: Arc::clone(self),
            generation,
        };
        let task = tokio::spawn(operation(release));
        let pending = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "Token refresh task failed");
                    None
                }
            }
        }
        .boxed()
        .shared();

        *slot = Some((generation, pending.clone()));
        pending
    }

    /// Forget any in-flight refresh.
    pub fn clear(&self) {
        self.slot.lock().take();
    }

    fn release(&self, generation: u64) {
        let mut slot = self.slot.lock();
        if matches!(slot.as_ref(), Some((current, _)) if *current == generation) {
            *slot = None;
        }
    }
}

/// Frees the latch slot it was issued for, at the latest when dropped.
pub struct LatchRelease {
    latch: Arc<RefreshLatch>,
    generation: u64,
}

impl LatchRelease {
    pub fn release(self) {}
}

impl Drop for LatchRelease {
    fn drop(&mut self) {
        self.latch.release(self.generation);
    }
}

/// Obtains a new access credential from the stored refresh credential.
pub struct RefreshCoordinator {
    state: Arc<SessionState>,
    api: Arc<dyn SessionApi>,
    reauth: Arc<ReauthTrigger>,
    latch: Arc<RefreshLatch>,
}

impl RefreshCoordinator {
    pub fn new(state: Arc<SessionState>, api: Arc<dyn SessionApi>, reauth: Arc<ReauthTrigger>) -> Self {
        Self {
            state,
            api,
            reauth,
            latch: RefreshLatch::new(),
        }
    }

    pub fn latch(&self) -> &Arc<RefreshLatch> {
        &self.latch
    }

    /// Returns the new access credential, or `None` once re-authentication
    /// has been triggered.
    pub async fn refresh(&self) -> Option<AccessCredential> {
        if let Some(pending) = self.latch.current() {
            debug!("Joining in-flight token refresh");
            return pending.await;
        }

        let epoch = self.state.epoch();
        let Some(refresh) = self.state.credentials().refresh() else {
            debug!("No refresh token stored");
            self.reauth.reauthenticate().await;
            return None;
        };

        let state = Arc::clone(&self.state);
        let api = Arc::clone(&self.api);
        let reauth = Arc::clone(&self.reauth);
        let pending = self.latch.begin(move |release| async move {
            let outcome = rotate(&state, api.as_ref(), &reauth, refresh, epoch).await;
            release.release();
            outcome
        });
        pending.await
    }
}

/// Exchange `refresh` for a new access credential. The outcome is only
/// written back if the session is still in the sign-in `epoch` the refresh
/// started in; a logout or a new login in the meantime wins.
async fn rotate(
    state: &SessionState,
    api: &dyn SessionApi,
    reauth: &ReauthTrigger,
    refresh: RefreshCredential,
    epoch: u64,
) -> Option<AccessCredential> {
    match api.refresh(&refresh).await {
        Ok(refreshed) => {
            let access = refreshed.access;
            let stored = state.write_if_current(epoch, |credentials| {
                credentials.set_access(access.clone());
                if let Some(rotated) = refreshed.refresh {
                    if let Err(e) = credentials.set_refresh(&rotated) {
                        warn!(error = %e, "Failed to store rotated refresh token");
                    }
                }
            });
            if stored.is_none() {
                info!("Discarding refreshed token, session changed while refreshing");
                return None;
            }
            info!(expires_in = ?access.expires_in, "Access token refreshed");
            Some(access)
        }
        Err(e) => {
            warn!(error = %e, "Token refresh failed");
            if state.write_if_current(epoch, |c| c.clear_refresh()).is_none() {
                return None;
            }
            reauth.reauthenticate().await;
            None
        }
    }
}
