#![allow(dead_code)]

use std::sync::Arc;

use sessionline_core::api::HttpSessionApi;
use sessionline_core::auth::{MemoryStore, Navigation, SessionEvent};
use sessionline_core::{Config, Session};
use tokio::sync::mpsc::UnboundedReceiver;
use wiremock::MockServer;

pub struct Harness {
    pub session: Session,
    pub events: UnboundedReceiver<SessionEvent>,
    pub durable: Arc<MemoryStore>,
}

impl Harness {
    pub async fn new(server: &MockServer) -> Self {
        Self::with_config(server, |_| {}).await
    }

    pub async fn with_config(server: &MockServer, tweak: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config {
            api_url: server.uri(),
            ..Config::default()
        };
        tweak(&mut config);

        let http = reqwest::Client::new();
        let api = Arc::new(HttpSessionApi::new(http.clone(), server.uri()));
        let durable = Arc::new(MemoryStore::new());
        let (session, events) = Session::new(config, api, durable.clone(), http);

        Self {
            session,
            events,
            durable,
        }
    }

    /// Everything emitted so far.
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            seen.push(event);
        }
        seen
    }
}

pub fn navigations(events: &[SessionEvent]) -> Vec<Navigation> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Navigate(nav) => Some(nav.clone()),
            _ => None,
        })
        .collect()
}

pub fn error_notices(events: &[SessionEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Notify(n) if n.level == sessionline_core::auth::NoticeLevel::Error => {
                Some(n.title.clone())
            }
            _ => None,
        })
        .collect()
}
