//! Request pipeline for authenticated API calls.
//!
//! Every call runs the request interceptors (authorization and language
//! headers), is sent, and its response goes through the same chain:
//! success bodies are unwrapped to the payload, a 401 hands over to the
//! refresh coordinator and is retried once, and any other failure is
//! normalized into a user-visible notice before being returned.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::{
    format_token, AccessCredential, Notice, ReauthTrigger, RefreshCoordinator, SessionState,
};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// How successful response bodies wrap their payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PayloadShape {
    /// The body is the payload.
    #[default]
    Bare,
    /// The payload sits under a top-level `data` field.
    Enveloped,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Decode a success body into the caller's payload type.
pub fn decode_payload<T: DeserializeOwned>(shape: PayloadShape, body: &str) -> Result<T, ApiError> {
    let body = if body.trim().is_empty() { "null" } else { body };
    let decoded = match shape {
        PayloadShape::Bare => serde_json::from_str(body),
        PayloadShape::Enveloped => serde_json::from_str::<Envelope<T>>(body).map(|e| e.data),
    };
    decoded.map_err(|e| ApiError::InvalidResponse(format!("failed to parse response body: {}", e)))
}

/// Request-phase step applied to the headers of every outgoing call.
pub trait RequestInterceptor: Send + Sync {
    fn intercept(&self, state: &SessionState, headers: &mut HeaderMap) -> Result<(), ApiError>;
}

/// `Authorization: Bearer <token>`, or no header without a token.
pub struct AuthorizationHeader;

impl RequestInterceptor for AuthorizationHeader {
    fn intercept(&self, state: &SessionState, headers: &mut HeaderMap) -> Result<(), ApiError> {
        match format_token(state.credentials().access().as_ref()) {
            Some(value) => {
                headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&value)?);
            }
            None => {
                headers.remove(header::AUTHORIZATION);
            }
        }
        Ok(())
    }
}

/// `Accept-Language` from the current locale preference.
pub struct LanguageHeader;

impl RequestInterceptor for LanguageHeader {
    fn intercept(&self, state: &SessionState, headers: &mut HeaderMap) -> Result<(), ApiError> {
        headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_str(&state.locale())?);
        Ok(())
    }
}

/// A replayable API call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
    silent: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            silent: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn post<B: Serialize>(path: impl Into<String>, body: &B) -> Result<Self, ApiError> {
        Self::new(Method::POST, path).json(body)
    }

    pub fn put<B: Serialize>(path: impl Into<String>, body: &B) -> Result<Self, ApiError> {
        Self::new(Method::PUT, path).json(body)
    }

    pub fn json<B: Serialize>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("failed to serialize body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Fail without a user-visible notice; the error is still returned.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Authenticated API client.
/// Clone is cheap - everything is shared behind Arcs.
#[derive(Clone)]
pub struct RequestClient {
    http: Client,
    base_url: String,
    state: Arc<SessionState>,
    refresher: Arc<RefreshCoordinator>,
    reauth: Arc<ReauthTrigger>,
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
    refresh_enabled: bool,
    payload: PayloadShape,
}

impl RequestClient {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        state: Arc<SessionState>,
        refresher: Arc<RefreshCoordinator>,
        reauth: Arc<ReauthTrigger>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            state,
            refresher,
            reauth,
            interceptors: vec![Arc::new(AuthorizationHeader), Arc::new(LanguageHeader)],
            refresh_enabled: true,
            payload: PayloadShape::default(),
        }
    }

    /// Whether a 401 may be recovered by refreshing the token.
    pub fn refresh_enabled(mut self, enabled: bool) -> Self {
        self.refresh_enabled = enabled;
        self
    }

    pub fn payload_shape(mut self, shape: PayloadShape) -> Self {
        self.payload = shape;
        self
    }

    /// Append a request interceptor; it runs after the built-in ones.
    pub fn with_interceptor(mut self, interceptor: impl RequestInterceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(&ApiRequest::get(path)).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        self.request(&ApiRequest::post(path, body)?).await
    }

    /// Send `request` through the pipeline.
    ///
    /// A 401 never reaches the caller: it either succeeds after one retry
    /// with a refreshed token, or fails with [`ApiError::SessionExpired`].
    pub async fn request<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, ApiError> {
        let outcome = match self.dispatch(request, None).await {
            Err(e) if e.is_auth_rejection() => self.recover(request).await,
            other => other,
        };
        outcome
            .and_then(|body| decode_payload(self.payload, &body))
            .map_err(|e| self.report(request, e))
    }

    async fn recover(&self, request: &ApiRequest) -> Result<String, ApiError> {
        if !self.refresh_enabled {
            self.reauth.reauthenticate().await;
            return Err(ApiError::SessionExpired);
        }

        let Some(fresh) = self.refresher.refresh().await else {
            return Err(ApiError::SessionExpired);
        };

        debug!(path = %request.path, "Retrying request with refreshed token");
        match self.dispatch(request, Some(&fresh)).await {
            Err(e) if e.is_auth_rejection() => {
                warn!(path = %request.path, "Request rejected again after token refresh");
                Err(ApiError::SessionExpired)
            }
            other => other,
        }
    }

    /// Surface a failure to the user. Expired sessions are handled by
    /// re-authentication instead.
    fn report(&self, request: &ApiRequest, err: ApiError) -> ApiError {
        if matches!(err, ApiError::SessionExpired) {
            return err;
        }
        warn!(method = %request.method, path = %request.path, error = %err, "Request failed");
        if !request.silent {
            self.state.notify(Notice::error(err.user_message()));
        }
        err
    }

    fn headers(&self, credential: Option<&AccessCredential>) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        for interceptor in &self.interceptors {
            interceptor.intercept(&self.state, &mut headers)?;
        }
        if let Some(credential) = credential {
            headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&credential.header_value())?);
        }
        Ok(headers)
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    /// Send once (plus rate-limit retries) and return the raw success body.
    async fn dispatch(
        &self,
        request: &ApiRequest,
        credential: Option<&AccessCredential>,
    ) -> Result<String, ApiError> {
        let url = self.url(&request.path);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut builder = self
                .http
                .request(request.method.clone(), &url)
                .headers(self.headers(credential)?);
            if !request.query.is_empty() {
                builder = builder.query(&request.query);
            }
            if let Some(ref body) = request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await?;
            let status = response.status();

            if status.is_success() {
                return Ok(response.text().await?);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(ApiError::RateLimited);
                }
                warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }
    }
}
