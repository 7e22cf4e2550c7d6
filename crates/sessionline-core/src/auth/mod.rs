//! Session and credential lifecycle.
//!
//! This module provides:
//! - `CredentialStore`: access token in memory, refresh token in durable storage
//! - `RefreshCoordinator`: single-flight token refresh shared by concurrent requests
//! - `ReauthTrigger`: in-place re-login prompt or full sign-out when refresh is impossible
//! - `Session`: login, logout and session restore for the application layer

pub mod credentials;
pub mod events;
pub mod identity;
pub mod reauth;
pub mod refresh;
pub mod session;
pub mod state;

pub use credentials::{
    format_token, AccessCredential, CredentialStore, DurableStore, FileStore, KeyringStore,
    MemoryStore, RefreshCredential, REFRESH_TOKEN_KEY, SESSION_USER_KEY,
};
pub use events::{Navigation, Notice, NoticeLevel, SessionEvent};
pub use identity::{Capabilities, IdentityProfile, SessionIdentity};
pub use reauth::{LoginExpiredMode, ReauthTrigger};
pub use refresh::{LatchRelease, PendingRefresh, RefreshCoordinator, RefreshLatch};
pub use session::Session;
pub use state::{SessionPhase, SessionState};
