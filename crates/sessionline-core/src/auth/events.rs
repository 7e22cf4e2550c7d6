use serde::{Deserialize, Serialize};

/// Side effects the session layer asks the host UI to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Notify(Notice),
    Navigate(Navigation),
    /// Show (`true`) or dismiss (`false`) the in-place re-login prompt.
    LoginExpired(bool),
    /// All application state must return to its defaults.
    StateReset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub description: Option<String>,
}

impl Notice {
    pub fn success(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            title: title.into(),
            description: Some(description.into()),
        }
    }

    pub fn error(title: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: title.into(),
            description: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Navigation {
    pub path: String,
    /// Location to return to after signing in.
    pub redirect: Option<String>,
    /// Replace the current history entry instead of pushing.
    pub replace: bool,
}

impl Navigation {
    pub fn push(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            redirect: None,
            replace: false,
        }
    }

    pub fn to_login(login_path: &str, redirect: Option<String>) -> Self {
        Self {
            path: login_path.to_string(),
            redirect,
            replace: true,
        }
    }

    pub fn url(&self) -> String {
        match &self.redirect {
            Some(back) => format!("{}?redirect={}", self.path, urlencoding::encode(back)),
            None => self.path.clone(),
        }
    }
}
