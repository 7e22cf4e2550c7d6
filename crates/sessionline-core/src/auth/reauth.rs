use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::SessionApi;

use super::credentials::AccessCredential;
use super::events::{Navigation, SessionEvent};
use super::state::{SessionPhase, SessionState};

/// Upper bound on the revoke call so sign-out never waits on a dead network.
const REVOKE_TIMEOUT_SECS: u64 = 5;

/// How the user is sent back to sign in once the session can't be recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoginExpiredMode {
    /// Blocking prompt over the current page.
    Modal,
    /// Full sign-out and redirect to the login page.
    #[default]
    Page,
}

/// Decides between the in-place prompt and a full teardown when
/// authentication can't be recovered.
pub struct ReauthTrigger {
    state: Arc<SessionState>,
    api: Arc<dyn SessionApi>,
    mode: LoginExpiredMode,
    login_path: String,
}

impl ReauthTrigger {
    pub fn new(
        state: Arc<SessionState>,
        api: Arc<dyn SessionApi>,
        mode: LoginExpiredMode,
        login_path: impl Into<String>,
    ) -> Self {
        Self {
            state,
            api,
            mode,
            login_path: login_path.into(),
        }
    }

    /// Only the first call after the session went bad has any visible effect.
    pub async fn reauthenticate(&self) {
        let stale = self.state.clear_access();

        let prompt_in_place =
            self.mode == LoginExpiredMode::Modal && self.state.access_checked();
        let next = if prompt_in_place {
            SessionPhase::LoginExpired
        } else {
            SessionPhase::SignedOut
        };

        if !self.state.leave_active(next) {
            debug!(phase = ?self.state.phase(), "Re-authentication already in progress");
            return;
        }

        warn!(in_place = prompt_in_place, "Access token or refresh token is invalid or expired");

        if prompt_in_place {
            self.state.emit(SessionEvent::LoginExpired(true));
        } else {
            self.teardown(stale, true).await;
        }
    }

    /// Full sign-out: best-effort revoke, reset all state, go to the login page.
    pub async fn logout(&self, redirect: bool) {
        let access = self.state.clear_access();
        self.teardown(access, redirect).await;
    }

    /// Local sign-out happens before the revoke call, so cancelling the
    /// caller while the revoke is pending still leaves the user signed out.
    async fn teardown(&self, access: Option<AccessCredential>, redirect: bool) {
        let came_from = self.state.location();
        self.state.sign_out();
        self.state.emit(SessionEvent::LoginExpired(false));

        let back = redirect.then_some(came_from);
        self.state
            .emit(SessionEvent::Navigate(Navigation::to_login(&self.login_path, back)));
        info!("Signed out");

        if let Some(access) = access {
            let revoke = self.api.revoke(&access);
            match tokio::time::timeout(Duration::from_secs(REVOKE_TIMEOUT_SECS), revoke).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "Ignoring revoke failure during logout"),
                Err(_) => debug!("Revoke timed out during logout"),
            }
        }
    }
}
