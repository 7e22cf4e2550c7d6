//! HTTP side of the session layer.
//!
//! This module provides the `RequestClient` pipeline that every
//! authenticated call goes through, and the `SessionApi` boundary used to
//! issue, refresh and revoke sessions.

pub mod client;
pub mod error;
pub mod session_api;

pub use client::{
    decode_payload, ApiRequest, AuthorizationHeader, LanguageHeader, PayloadShape,
    RequestClient, RequestInterceptor,
};
pub use error::{ApiError, LoginError};
pub use session_api::{
    HttpSessionApi, IssuedSession, LoginRequest, RefreshedSession, SessionApi,
};
