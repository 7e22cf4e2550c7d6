mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use sessionline_core::api::HttpSessionApi;
use sessionline_core::auth::{
    AccessCredential, Capabilities, DurableStore, IdentityProfile, LoginExpiredMode, MemoryStore,
    Navigation, NoticeLevel, SessionEvent, SessionPhase, REFRESH_TOKEN_KEY, SESSION_USER_KEY,
};
use sessionline_core::{ApiError, Config, LoginError, LoginRequest, Session};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{error_notices, navigations, Harness};

fn embedded_login() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": "A",
        "refresh_token": "B",
        "token_type": "bearer",
        "expires_in": 3600,
        "user": {
            "user_id": "u1",
            "username": "ada",
            "display_name": "Ada",
            "email": "ada@example.com",
            "roles": ["admin"],
        },
    }))
}

async fn mount_login(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(response)
        .mount(server)
        .await;
}

fn credentials() -> LoginRequest {
    LoginRequest::new("ada@example.com", "correct horse")
}

#[tokio::test]
async fn login_stores_both_tokens_and_identity() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(json!({"email": "ada@example.com", "password": "correct horse"})))
        .respond_with(embedded_login())
        .expect(1)
        .mount(&server)
        .await;

    let mut h = Harness::new(&server).await;
    let identity = h.session.login(credentials(), None).await.unwrap();

    assert_eq!(identity.user_id, "u1");
    assert_eq!(identity.roles, vec!["admin".to_string()]);
    assert_eq!(h.session.state().credentials().access().unwrap().secret(), "A");
    assert_eq!(h.durable.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("B"));
    assert_eq!(h.durable.get(SESSION_USER_KEY).unwrap().as_deref(), Some("u1"));
    assert_eq!(h.session.identity(), Some(identity));
    assert!(h.session.is_authenticated());
    assert!(h.session.state().access_checked());
    // No capability endpoint configured: unknown, not empty
    assert_eq!(h.session.capabilities(), Capabilities::Unavailable);

    let events = h.drain();
    assert_eq!(navigations(&events), vec![Navigation::push("/analytics")]);
    let welcome = events.iter().find_map(|e| match e {
        SessionEvent::Notify(n) if n.level == NoticeLevel::Success => n.description.clone(),
        _ => None,
    });
    assert_eq!(welcome.as_deref(), Some("Welcome back: Ada"));
}

#[tokio::test]
async fn login_follows_explicit_redirect() {
    let server = MockServer::start().await;
    mount_login(&server, embedded_login()).await;

    let mut h = Harness::new(&server).await;
    h.session
        .login(credentials(), Some("/orders/17".to_string()))
        .await
        .unwrap();

    assert_eq!(navigations(&h.drain()), vec![Navigation::push("/orders/17")]);
}

#[tokio::test]
async fn login_tolerates_capability_fetch_failure() {
    let server = MockServer::start().await;
    mount_login(&server, embedded_login()).await;
    Mock::given(method("GET"))
        .and(path("/permissions/users/u1"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let mut h = Harness::with_config(&server, |c| {
        c.access_codes_path = Some("/permissions/users/{user_id}".to_string());
    })
    .await;

    let identity = h.session.login(credentials(), None).await.unwrap();
    assert_eq!(identity.user_id, "u1");
    assert_eq!(h.session.capabilities(), Capabilities::Unavailable);
    // Partial failure is logged, not shown
    assert!(error_notices(&h.drain()).is_empty());
}

#[tokio::test]
async fn login_loads_capabilities() {
    let server = MockServer::start().await;
    mount_login(&server, embedded_login()).await;
    Mock::given(method("GET"))
        .and(path("/permissions/users/u1"))
        .and(header("authorization", "Bearer A"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["order:read", "order:write"])))
        .expect(1)
        .mount(&server)
        .await;

    let h = Harness::with_config(&server, |c| {
        c.access_codes_path = Some("/permissions/users/{user_id}".to_string());
    })
    .await;
    h.session.login(credentials(), None).await.unwrap();

    let caps = h.session.capabilities();
    assert!(caps.is_loaded());
    assert!(caps.contains("order:write"));
}

#[tokio::test]
async fn login_with_fetched_identity_profile() {
    let server = MockServer::start().await;
    mount_login(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "A",
            "refresh_token": "B",
            "token_type": "bearer",
            "expires_in": 3600,
            "user_id": "u9",
            "display_name": "Grace",
        })),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/users/u9"))
        .and(header("authorization", "Bearer A"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "u9",
            "email": "grace@example.com",
            "display_name": "Grace Hopper",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let h = Harness::with_config(&server, |c| c.identity_profile = IdentityProfile::Fetched).await;
    let identity = h.session.login(credentials(), None).await.unwrap();

    assert_eq!(identity.user_id, "u9");
    assert_eq!(identity.display_name, "Grace Hopper");
    assert_eq!(identity.username, "grace@example.com");
    assert!(identity.avatar.contains("seed=grace%40example.com"));
}

#[tokio::test]
async fn login_failures_are_distinct() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(json!({"email": "wrong@example.com", "password": "x"})))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "invalid credentials"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(json!({"email": "locked@example.com", "password": "x"})))
        .respond_with(ResponseTemplate::new(423))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(json!({"email": "mfa@example.com", "password": "x"})))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"code": "mfa_required"})))
        .mount(&server)
        .await;

    let h = Harness::new(&server).await;
    let wrong = h.session.login(LoginRequest::new("wrong@example.com", "x"), None).await;
    let locked = h.session.login(LoginRequest::new("locked@example.com", "x"), None).await;
    let mfa = h.session.login(LoginRequest::new("mfa@example.com", "x"), None).await;

    assert!(matches!(wrong, Err(LoginError::RejectedCredentials)));
    assert!(matches!(locked, Err(LoginError::AccountLocked)));
    assert!(matches!(mfa, Err(LoginError::SecondFactorRequired)));
    assert!(!h.session.is_authenticated());
}

#[tokio::test]
async fn login_without_token_fails_and_stores_nothing() {
    let server = MockServer::start().await;
    mount_login(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({"message": "ok", "user": {"user_id": "u1"}})),
    )
    .await;

    let h = Harness::new(&server).await;
    let err = h.session.login(credentials(), None).await.unwrap_err();

    assert!(matches!(err, LoginError::MissingCredential));
    assert!(h.session.state().credentials().access().is_none());
    assert_eq!(h.durable.get(REFRESH_TOKEN_KEY).unwrap(), None);
    assert!(h.session.identity().is_none());
}

#[tokio::test]
async fn logout_succeeds_when_revoke_fails() {
    let server = MockServer::start().await;
    mount_login(&server, embedded_login()).await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .and(body_json(json!({"access_token": "A"})))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let mut h = Harness::new(&server).await;
    h.session.login(credentials(), None).await.unwrap();
    h.session.set_location("/orders/17");
    h.drain();

    h.session.logout(true).await;

    assert!(h.session.state().credentials().access().is_none());
    assert_eq!(h.durable.get(REFRESH_TOKEN_KEY).unwrap(), None);
    assert_eq!(h.durable.get(SESSION_USER_KEY).unwrap(), None);
    assert!(h.session.identity().is_none());
    assert!(!h.session.state().access_checked());

    let events = h.drain();
    assert!(events.contains(&SessionEvent::StateReset));
    assert_eq!(
        navigations(&events),
        vec![Navigation::to_login("/auth/login", Some("/orders/17".to_string()))]
    );
}

#[tokio::test]
async fn logout_succeeds_when_server_is_unreachable() {
    // Port 1 is never served, so the revoke call fails to connect
    let unreachable = "http://127.0.0.1:1";
    let http = reqwest::Client::new();
    let durable = Arc::new(MemoryStore::new());
    let config = Config {
        api_url: unreachable.to_string(),
        ..Config::default()
    };
    let (session, mut events) = Session::new(
        config,
        Arc::new(HttpSessionApi::new(http.clone(), unreachable)),
        durable.clone(),
        http,
    );
    session.state().credentials().set_access(AccessCredential::bearer("A"));
    durable.set(REFRESH_TOKEN_KEY, "B").unwrap();

    session.logout(false).await;

    assert!(session.state().credentials().access().is_none());
    assert_eq!(durable.get(REFRESH_TOKEN_KEY).unwrap(), None);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(navigations(&seen), vec![Navigation::to_login("/auth/login", None)]);
}

#[tokio::test]
async fn restore_without_known_user_is_a_no_op() {
    let server = MockServer::start().await;
    let h = Harness::new(&server).await;
    assert_eq!(h.session.restore_session().await.unwrap(), None);
}

#[tokio::test]
async fn restore_after_reload_uses_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/u1"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user_id": "u1",
            "username": "ada",
            "roles": ["admin"],
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/u1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({"refresh_token": "B"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh",
            "token_type": "bearer",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&server)
        .await;

    // A fresh process: only the durable slots survive
    let h = Harness::new(&server).await;
    h.durable.set(REFRESH_TOKEN_KEY, "B").unwrap();
    h.durable.set(SESSION_USER_KEY, "u1").unwrap();

    let identity = h.session.restore_session().await.unwrap().unwrap();
    assert_eq!(identity.user_id, "u1");
    assert_eq!(identity.roles, vec!["admin".to_string()]);
    assert!(h.session.is_authenticated());
    // Refresh token not rotated by the server: the old one stays
    assert_eq!(h.durable.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("B"));
}

#[tokio::test]
async fn relogin_from_prompt_stays_in_place() {
    let server = MockServer::start().await;
    mount_login(&server, embedded_login()).await;
    Mock::given(method("GET"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let mut h = Harness::with_config(&server, |c| c.login_expired_mode = LoginExpiredMode::Modal).await;
    h.session.login(credentials(), None).await.unwrap();
    // The server forgets the refresh token too
    h.durable.remove(REFRESH_TOKEN_KEY).unwrap();
    h.drain();

    let _ = h.session.client().get::<serde_json::Value>("/orders").await;
    assert!(h.session.is_login_expired());
    assert!(h.session.identity().is_none());

    h.session.login(credentials(), None).await.unwrap();
    assert!(!h.session.is_login_expired());

    let events = h.drain();
    assert!(events.contains(&SessionEvent::LoginExpired(true)));
    assert!(events.contains(&SessionEvent::LoginExpired(false)));
    assert!(navigations(&events).is_empty());
}

#[tokio::test]
async fn logout_completes_locally_when_cancelled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let mut h = Harness::new(&server).await;
    h.session.state().credentials().set_access(AccessCredential::bearer("A"));
    h.durable.set(REFRESH_TOKEN_KEY, "B").unwrap();
    h.session.set_location("/orders/17");

    let cancelled = tokio::time::timeout(Duration::from_millis(100), h.session.logout(true)).await;
    assert!(cancelled.is_err());

    assert!(h.session.state().credentials().access().is_none());
    assert_eq!(h.durable.get(REFRESH_TOKEN_KEY).unwrap(), None);
    assert_eq!(
        navigations(&h.drain()),
        vec![Navigation::to_login("/auth/login", Some("/orders/17".to_string()))]
    );
}

#[tokio::test]
async fn logout_during_refresh_keeps_user_signed_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orders"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "fresh", "refresh_token": "r2"}))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let h = Harness::new(&server).await;
    h.session.state().credentials().set_access(AccessCredential::bearer("stale"));
    h.durable.set(REFRESH_TOKEN_KEY, "r1").unwrap();
    h.durable.set(SESSION_USER_KEY, "u1").unwrap();

    let (result, ()) = tokio::join!(h.session.client().get::<Value>("/orders"), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.session.logout(true).await;
    });

    assert!(matches!(result, Err(ApiError::SessionExpired)));
    assert!(h.session.state().credentials().access().is_none());
    assert_eq!(h.durable.get(REFRESH_TOKEN_KEY).unwrap(), None);
    assert_eq!(h.durable.get(SESSION_USER_KEY).unwrap(), None);
    assert_eq!(h.session.state().phase(), SessionPhase::SignedOut);
}

#[tokio::test]
async fn login_fails_when_session_ends_during_capability_fetch() {
    let server = MockServer::start().await;
    mount_login(&server, embedded_login()).await;
    Mock::given(method("GET"))
        .and(path("/permissions/users/u1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({"refresh_token": "B"})))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut h = Harness::with_config(&server, |c| {
        c.access_codes_path = Some("/permissions/users/{user_id}".to_string());
    })
    .await;

    let result = h.session.login(credentials(), None).await;

    assert!(matches!(result, Err(LoginError::Api(ApiError::SessionExpired))));
    assert!(!h.session.is_authenticated());
    assert!(h.session.identity().is_none());
    assert_eq!(h.durable.get(REFRESH_TOKEN_KEY).unwrap(), None);
    assert_eq!(h.durable.get(SESSION_USER_KEY).unwrap(), None);
    let welcomed = h.drain().iter().any(|e| {
        matches!(e, SessionEvent::Notify(n) if n.level == NoticeLevel::Success)
    });
    assert!(!welcomed);
}
