//! User-facing identity and the adapters that derive it from backend shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[cfg(feature = "ts")]
use ts_rs::TS;

/// Normalized projection of the signed-in user, as shown by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct SessionIdentity {
    pub user_id: String,
    pub username: String,
    pub display_name: String,
    pub roles: Vec<String>,
    pub avatar: String,
    pub description: String,
    pub home_path: String,
}

/// Authorization capability codes for the current user.
///
/// `Unavailable` means the codes could not be loaded, which is different
/// from a user that has none.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Capabilities {
    Loaded(Vec<String>),
    #[default]
    Unavailable,
}

impl Capabilities {
    pub fn codes(&self) -> &[String] {
        match self {
            Capabilities::Loaded(codes) => codes,
            Capabilities::Unavailable => &[],
        }
    }

    pub fn contains(&self, code: &str) -> bool {
        self.codes().iter().any(|c| c == code)
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Capabilities::Loaded(_))
    }
}

/// Which backend shape identity data arrives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityProfile {
    /// Login result carries a `user` object; identity endpoint returns the same shape.
    #[default]
    Embedded,
    /// Login result carries `user_id` only; identity is fetched afterwards.
    Fetched,
}

impl IdentityProfile {
    /// Whether login has to follow up with an identity fetch.
    pub fn needs_fetch(self) -> bool {
        matches!(self, IdentityProfile::Fetched)
    }

    /// Derive a [`SessionIdentity`] from a payload in this profile's shape.
    pub fn adapt(self, payload: Value, default_home: &str) -> Result<SessionIdentity, serde_json::Error> {
        match self {
            IdentityProfile::Embedded => {
                serde_json::from_value(payload).map(|user| from_embedded_user(user, default_home))
            }
            IdentityProfile::Fetched => {
                serde_json::from_value(payload).map(|user| from_backend_user(user, default_home))
            }
        }
    }
}

/// `user` object embedded in a login result.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddedUser {
    pub user_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub home_path: Option<String>,
}

/// User record returned by the identity endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendUser {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

pub fn from_embedded_user(user: EmbeddedUser, default_home: &str) -> SessionIdentity {
    let username = user
        .username
        .or_else(|| user.email.clone())
        .unwrap_or_else(|| user.user_id.clone());
    let display_name = non_empty(user.display_name).unwrap_or_else(|| username.clone());
    let seed = user.email.clone().unwrap_or_else(|| username.clone());

    SessionIdentity {
        avatar: non_empty(user.avatar_url).unwrap_or_else(|| default_avatar(&seed)),
        description: user.email.unwrap_or_default(),
        home_path: non_empty(user.home_path).unwrap_or_else(|| default_home.to_string()),
        roles: user.roles,
        user_id: user.user_id,
        username,
        display_name,
    }
}

/// The identity endpoint has no role information; roles come from the
/// capability codes instead.
pub fn from_backend_user(user: BackendUser, default_home: &str) -> SessionIdentity {
    SessionIdentity {
        avatar: non_empty(user.avatar_url).unwrap_or_else(|| default_avatar(&user.email)),
        display_name: non_empty(user.display_name).unwrap_or_else(|| user.email.clone()),
        description: user.email.clone(),
        home_path: default_home.to_string(),
        roles: Vec::new(),
        user_id: user.id,
        username: user.email,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn default_avatar(seed: &str) -> String {
    format!(
        "https://api.dicebear.com/7.x/avataaars/svg?seed={}",
        urlencoding::encode(seed)
    )
}
