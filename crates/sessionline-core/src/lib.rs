//! Sessionline - session and token lifecycle for API clients.
//!
//! Attaches the current access token to every outbound request, refreshes it
//! exactly once when any number of concurrent requests find it expired, and
//! falls back to re-authentication when the refresh token is gone or rejected.
//!
//! ```no_run
//! use sessionline_core::{Config, LoginRequest, Session};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let (session, mut events) = Session::connect(Config::load()?)?;
//! tokio::spawn(async move {
//!     while let Some(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//! });
//!
//! session.login(LoginRequest::new("ada@example.com", "secret"), None).await?;
//! let orders: serde_json::Value = session.client().get("/orders").await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiError, ApiRequest, LoginError, LoginRequest, RequestClient, SessionApi};
pub use auth::{SessionEvent, SessionIdentity, Session};
pub use config::Config;
