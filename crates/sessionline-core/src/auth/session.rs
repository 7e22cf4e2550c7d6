use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::{
    ApiError, ApiRequest, HttpSessionApi, IssuedSession, LoginError, LoginRequest, RequestClient,
    SessionApi,
};
use crate::config::{Config, CredentialBackend};

use super::credentials::{AccessCredential, DurableStore, FileStore, KeyringStore};
use super::events::{Navigation, Notice, SessionEvent};
use super::identity::{Capabilities, SessionIdentity};
use super::reauth::ReauthTrigger;
use super::refresh::RefreshCoordinator;
use super::state::{SessionPhase, SessionState};

/// Entry point for the rest of the application: login, logout and session
/// restore, plus the authenticated [`RequestClient`].
pub struct Session {
    config: Config,
    state: Arc<SessionState>,
    api: Arc<dyn SessionApi>,
    reauth: Arc<ReauthTrigger>,
    refresher: Arc<RefreshCoordinator>,
    client: RequestClient,
}

impl Session {
    pub fn new(
        config: Config,
        api: Arc<dyn SessionApi>,
        durable: Arc<dyn DurableStore>,
        http: Client,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (state, events) = SessionState::new(durable, config.locale.clone());
        let state = Arc::new(state);
        let reauth = Arc::new(ReauthTrigger::new(
            Arc::clone(&state),
            Arc::clone(&api),
            config.login_expired_mode,
            config.login_path.clone(),
        ));
        let refresher = Arc::new(RefreshCoordinator::new(
            Arc::clone(&state),
            Arc::clone(&api),
            Arc::clone(&reauth),
        ));
        let client = RequestClient::new(
            http,
            config.api_url.clone(),
            Arc::clone(&state),
            Arc::clone(&refresher),
            Arc::clone(&reauth),
        )
        .refresh_enabled(config.refresh_enabled)
        .payload_shape(config.payload_shape);

        let session = Self {
            config,
            state,
            api,
            reauth,
            refresher,
            client,
        };
        (session, events)
    }

    /// Build a session talking HTTP to `config.api_url`, with the durable
    /// store selected by `config.credential_backend`.
    pub fn connect(config: Config) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>)> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        let durable: Arc<dyn DurableStore> = match config.credential_backend {
            CredentialBackend::Keyring => Arc::new(KeyringStore::new(config.keyring_service.clone())),
            CredentialBackend::File => Arc::new(FileStore::new(config.credentials_path()?)),
        };
        let api = Arc::new(HttpSessionApi::new(http.clone(), config.api_url.clone()));

        Ok(Self::new(config, api, durable, http))
    }

    pub fn client(&self) -> &RequestClient {
        &self.client
    }

    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn identity(&self) -> Option<SessionIdentity> {
        self.state.identity()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.state.capabilities()
    }

    /// Check if the user has both a token and the identity derived from it
    pub fn is_authenticated(&self) -> bool {
        self.state.credentials().has_access() && self.state.identity().is_some()
    }

    pub fn is_login_expired(&self) -> bool {
        self.state.phase() == SessionPhase::LoginExpired
    }

    /// Record where the user currently is, for redirect-after-login.
    pub fn set_location(&self, location: impl Into<String>) {
        self.state.set_location(location);
    }

    pub fn set_locale(&self, locale: impl Into<String>) {
        self.state.set_locale(locale);
    }

    /// Force a token refresh, sharing any refresh already in flight.
    pub async fn refresh_token(&self) -> Option<AccessCredential> {
        self.refresher.refresh().await
    }

    pub async fn reauthenticate(&self) {
        self.reauth.reauthenticate().await;
    }

    /// Sign in and derive the user's identity.
    ///
    /// After login the user is sent to `redirect` if given, otherwise to the
    /// identity's home path, otherwise to the configured default. When the
    /// in-place re-login prompt was showing it is dismissed instead.
    pub async fn login(
        &self,
        request: LoginRequest,
        redirect: Option<String>,
    ) -> Result<SessionIdentity, LoginError> {
        debug!(email = %request.email, "Logging in");
        let issued = self.api.issue(&request).await.inspect_err(|e| {
            warn!(error = %e, "Login failed");
        })?;
        let access = issued.access.clone().ok_or(LoginError::MissingCredential)?;

        self.state.advance_epoch();
        let credentials = self.state.credentials();
        credentials.set_access(access);
        if let Some(ref refresh) = issued.refresh {
            if let Err(e) = credentials.set_refresh(refresh) {
                warn!(error = %e, "Failed to store refresh token");
            }
        }

        let identity = match self.identity_from_login(&issued).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(error = %e, "Login succeeded but identity could not be derived");
                self.state.clear_access();
                credentials.clear_refresh();
                return Err(e);
            }
        };

        self.state.set_identity(identity.clone());
        if let Err(e) = credentials.set_stored_user(&identity.user_id) {
            warn!(error = %e, "Failed to store user id");
        }

        let capabilities = self.load_capabilities(&identity.user_id).await;
        // A rejected capability request can end in re-authentication
        if !self.state.credentials().has_access() {
            warn!(user_id = %identity.user_id, "Session ended while loading access codes");
            self.state.clear_access();
            credentials.clear_refresh();
            credentials.clear_stored_user();
            return Err(LoginError::Api(ApiError::SessionExpired));
        }
        self.state.set_capabilities(capabilities);
        self.state.mark_access_checked();

        let was_expired = self.state.phase() == SessionPhase::LoginExpired;
        self.state.set_phase(SessionPhase::Active);

        if was_expired {
            self.state.emit(SessionEvent::LoginExpired(false));
        } else {
            let target = redirect
                .filter(|r| !r.is_empty())
                .or_else(|| Some(identity.home_path.clone()).filter(|p| !p.is_empty()))
                .unwrap_or_else(|| self.config.default_home_path.clone());
            self.state.emit(SessionEvent::Navigate(Navigation::push(target)));
        }

        self.state.notify(Notice::success(
            "Login Successful",
            format!("Welcome back: {}", identity.display_name),
        ));
        info!(user_id = %identity.user_id, "Login successful");
        Ok(identity)
    }

    /// Sign out. Never fails: revoke errors are ignored and local state is
    /// always cleared.
    pub async fn logout(&self, redirect: bool) {
        self.reauth.logout(redirect).await;
    }

    /// Re-derive the identity of the known user from the server.
    ///
    /// Returns `Ok(None)` when no user is known. Without an access token in
    /// memory the request goes through the normal refresh path, which is how
    /// a reloaded process recovers its session from the stored refresh token.
    pub async fn restore_session(&self) -> Result<Option<SessionIdentity>, ApiError> {
        let known = self
            .state
            .user_id()
            .or_else(|| self.state.credentials().stored_user());
        let Some(user_id) = known else {
            debug!("No known user, nothing to restore");
            return Ok(None);
        };

        let identity = self.fetch_identity(&user_id).await?;
        self.state.set_user_id(Some(identity.user_id.clone()));
        self.state.set_identity(identity.clone());
        self.state.mark_access_checked();
        info!(user_id = %identity.user_id, "Session restored");
        Ok(Some(identity))
    }

    async fn identity_from_login(&self, issued: &IssuedSession) -> Result<SessionIdentity, LoginError> {
        let profile = self.config.identity_profile;
        if !profile.needs_fetch() {
            let user = issued
                .user
                .clone()
                .ok_or_else(|| LoginError::Identity("login response has no user".into()))?;
            return profile
                .adapt(user, &self.config.default_home_path)
                .map_err(|e| LoginError::Identity(e.to_string()));
        }

        let user_id = issued
            .user_id
            .as_deref()
            .ok_or_else(|| LoginError::Identity("login response has no user_id".into()))?;
        let mut identity = self.fetch_identity(user_id).await?;
        if let Some(ref name) = issued.display_name {
            if identity.display_name == identity.username && !name.is_empty() {
                identity.display_name = name.clone();
            }
        }
        Ok(identity)
    }

    async fn fetch_identity(&self, user_id: &str) -> Result<SessionIdentity, ApiError> {
        let path = self.config.identity_path_for(user_id);
        let payload: Value = self.client.get(&path).await?;
        self.config
            .identity_profile
            .adapt(payload, &self.config.default_home_path)
            .map_err(|e| ApiError::InvalidResponse(format!("identity response: {}", e)))
    }

    async fn load_capabilities(&self, user_id: &str) -> Capabilities {
        let Some(ref template) = self.config.access_codes_path else {
            debug!("No access code endpoint configured");
            return Capabilities::Unavailable;
        };
        let path = template.replace("{user_id}", &urlencoding::encode(user_id));
        match self.client.request::<Vec<String>>(&ApiRequest::get(path).silent()).await {
            Ok(codes) => Capabilities::Loaded(codes),
            Err(e) => {
                warn!(error = %e, "Failed to fetch access codes, continuing without them");
                Capabilities::Unavailable
            }
        }
    }
}
