use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Raw 401 from the server. The pipeline absorbs this and callers only
    /// ever see [`ApiError::SessionExpired`].
    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("Login expired - please sign in again")]
    SessionExpired,

    #[error("Access denied: {}", detail_or(.detail, "forbidden"))]
    AccessDenied { detail: Option<String> },

    #[error("Resource not found: {}", detail_or(.detail, "no details"))]
    NotFound { detail: Option<String> },

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error {status}: {}", detail_or(.detail, "no details"))]
    ServerError {
        status: StatusCode,
        detail: Option<String>,
    },

    #[error("Request rejected with status {status}: {}", detail_or(.detail, "no details"))]
    Rejected {
        status: StatusCode,
        detail: Option<String>,
    },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Refresh token rejected: {}", detail_or(.detail, "invalid or expired"))]
    RefreshRejected { detail: Option<String> },

    #[error("Credential storage error: {0}")]
    Storage(String),
}

#[derive(Error, Debug)]
pub enum LoginError {
    #[error("Invalid username or password")]
    RejectedCredentials,

    #[error("Account is locked")]
    AccountLocked,

    #[error("Second factor required")]
    SecondFactorRequired,

    #[error("Login response did not contain an access token")]
    MissingCredential,

    #[error("Could not derive user identity: {0}")]
    Identity(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

fn detail_or<'a>(detail: &'a Option<String>, fallback: &'a str) -> &'a str {
    detail.as_deref().unwrap_or(fallback)
}

/// Error body fields the backend uses to describe a failure.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

impl ErrorBody {
    pub(crate) fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }

    /// Human-readable detail: the `error` field wins over `message`.
    pub(crate) fn detail(&self) -> Option<String> {
        [self.error.as_deref(), self.message.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_string)
    }
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let detail = ErrorBody::parse(body).detail().map(|d| Self::truncate_body(&d));
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied { detail },
            404 => ApiError::NotFound { detail },
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError { status, detail },
            _ => ApiError::Rejected { status, detail },
        }
    }

    /// Whether this failure means the access credential was rejected.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }

    /// Message shown to the user: the server-provided detail when there is
    /// one, otherwise a generic message derived from the transport status.
    pub fn user_message(&self) -> String {
        let detail = match self {
            ApiError::AccessDenied { detail }
            | ApiError::NotFound { detail }
            | ApiError::ServerError { detail, .. }
            | ApiError::Rejected { detail, .. }
            | ApiError::RefreshRejected { detail } => detail.clone(),
            _ => None,
        };
        detail.unwrap_or_else(|| self.generic_message().to_string())
    }

    fn generic_message(&self) -> &'static str {
        match self {
            ApiError::Unauthorized | ApiError::SessionExpired | ApiError::RefreshRejected { .. } => {
                "Login expired. Please log in again."
            }
            ApiError::AccessDenied { .. } => "Forbidden. You do not have access to this resource.",
            ApiError::NotFound { .. } => "The requested resource was not found.",
            ApiError::RateLimited => "Too many requests. Please wait and try again.",
            ApiError::ServerError { .. } => "Internal server error. Please try again later.",
            ApiError::Rejected { status, .. } => match status.as_u16() {
                400 => "Request error. Please check your input and try again.",
                405 => "Request method not allowed.",
                408 => "Request timed out. Please try again.",
                _ => "Request failed.",
            },
            ApiError::NetworkError(e) if e.is_timeout() => "Request timed out. Please try again.",
            ApiError::NetworkError(_) => "Network error. Please check your connection and try again.",
            ApiError::InvalidResponse(_) => "Unexpected response from the server.",
            ApiError::InvalidRequest(_) => "The request could not be sent.",
            ApiError::Storage(_) => "Could not access stored credentials.",
        }
    }
}

impl From<reqwest::header::InvalidHeaderValue> for ApiError {
    fn from(err: reqwest::header::InvalidHeaderValue) -> Self {
        ApiError::InvalidRequest(format!("invalid header value: {}", err))
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Storage(format!("{:#}", err))
    }
}
