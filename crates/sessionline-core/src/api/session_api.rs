//! Network boundary for issuing, refreshing and revoking sessions.
//!
//! These calls go out on a bare HTTP client: they never pass through the
//! request pipeline, so a failed refresh can't recurse into another refresh.

use std::fmt;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::auth::{AccessCredential, RefreshCredential};

use super::error::ErrorBody;
use super::{ApiError, LoginError};

const LOGIN_PATH: &str = "/auth/login";
const REFRESH_PATH: &str = "/auth/refresh";
const LOGOUT_PATH: &str = "/auth/logout";

/// Identity claim and secret submitted to the issue-session endpoint.
#[derive(Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
}

impl LoginRequest {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            tenant: None,
        }
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("tenant", &self.tenant)
            .finish()
    }
}

/// Result of a successful issue-session call.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    /// `None` when the server answered 2xx without a token.
    pub access: Option<AccessCredential>,
    pub refresh: Option<RefreshCredential>,
    pub user_id: Option<String>,
    pub display_name: Option<String>,
    /// Embedded identity payload, if the backend sends one.
    pub user: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct RefreshedSession {
    pub access: AccessCredential,
    /// Present when the server rotated the refresh token.
    pub refresh: Option<RefreshCredential>,
}

#[async_trait]
pub trait SessionApi: Send + Sync {
    async fn issue(&self, request: &LoginRequest) -> Result<IssuedSession, LoginError>;

    async fn refresh(&self, refresh: &RefreshCredential) -> Result<RefreshedSession, ApiError>;

    async fn revoke(&self, access: &AccessCredential) -> Result<(), ApiError>;
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    user: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Serialize)]
struct RefreshBody<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
struct LogoutBody<'a> {
    access_token: &'a str,
}

/// [`SessionApi`] over the backend's `/auth/*` endpoints.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpSessionApi {
    client: Client,
    base_url: String,
}

impl HttpSessionApi {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn login_failure(status: StatusCode, body: &str) -> LoginError {
        let parsed = ErrorBody::parse(body);
        match parsed.code.as_deref() {
            Some("account_locked") => return LoginError::AccountLocked,
            Some("mfa_required" | "second_factor_required") => {
                return LoginError::SecondFactorRequired
            }
            _ => {}
        }
        match status.as_u16() {
            423 => LoginError::AccountLocked,
            400 | 401 => LoginError::RejectedCredentials,
            _ => LoginError::Api(ApiError::from_status(status, body)),
        }
    }

    fn refresh_failure(status: StatusCode, body: &str) -> ApiError {
        match status.as_u16() {
            400 | 401 | 403 => ApiError::RefreshRejected {
                detail: ErrorBody::parse(body).detail(),
            },
            _ => ApiError::from_status(status, body),
        }
    }
}

#[async_trait]
impl SessionApi for HttpSessionApi {
    async fn issue(&self, request: &LoginRequest) -> Result<IssuedSession, LoginError> {
        let response = self
            .client
            .post(self.url(LOGIN_PATH))
            .header(header::ACCEPT, "application/json")
            .json(request)
            .send()
            .await
            .map_err(ApiError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::login_failure(status, &body));
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("login response: {}", e)))?;

        let access = login
            .access_token
            .filter(|t| !t.is_empty())
            .map(|t| AccessCredential::new(t, login.token_type, login.expires_in));

        Ok(IssuedSession {
            access,
            refresh: login.refresh_token.filter(|t| !t.is_empty()).map(RefreshCredential::new),
            user_id: login.user_id,
            display_name: login.display_name,
            user: login.user,
        })
    }

    async fn refresh(&self, refresh: &RefreshCredential) -> Result<RefreshedSession, ApiError> {
        let response = self
            .client
            .post(self.url(REFRESH_PATH))
            .header(header::ACCEPT, "application/json")
            .json(&RefreshBody {
                refresh_token: refresh.secret(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::refresh_failure(status, &body));
        }

        let refreshed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("refresh response: {}", e)))?;

        if refreshed.access_token.is_empty() {
            return Err(ApiError::InvalidResponse("refresh response had an empty access token".into()));
        }

        Ok(RefreshedSession {
            access: AccessCredential::new(
                refreshed.access_token,
                refreshed.token_type,
                refreshed.expires_in,
            ),
            refresh: refreshed
                .refresh_token
                .filter(|t| !t.is_empty())
                .map(RefreshCredential::new),
        })
    }

    async fn revoke(&self, access: &AccessCredential) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url(LOGOUT_PATH))
            .json(&LogoutBody {
                access_token: access.secret(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }
        debug!("Session revoked");
        Ok(())
    }
}
