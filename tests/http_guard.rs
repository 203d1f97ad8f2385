use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use rampart::{
    build_router,
    clock::{Clock, ManualClock},
    crypto::password::PasswordHasher,
    guard::{limiter::RateLimitPolicy, store::MemoryStore},
    services::api_keys::generate_request_signature,
    state::LimiterStore,
    AppState, Config,
};

const SECRET: &str = "integration-test-secret-0123456789abcdef";
const PASSWORD: &str = "correct horse battery staple";

struct TestApp {
    router: Router,
    clock: ManualClock,
}

impl TestApp {
    fn new() -> Self {
        Self::with_config(Config::for_testing(SECRET))
    }

    fn with_config(config: Config) -> Self {
        Self::with_state(config, |_| {})
    }

    fn with_state(config: Config, customize: impl FnOnce(&mut AppState)) -> Self {
        let clock = ManualClock::default();
        let shared = Arc::new(clock.clone());
        let store = LimiterStore::Memory(MemoryStore::new(shared.clone()));
        let mut state = AppState::with_store(&config, shared, store).unwrap();
        customize(&mut state);
        Self {
            router: build_router(state),
            clock,
        }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        send_to(self.router.clone(), request).await
    }

    async fn post_json(&self, uri: &str, body: Value, cookie: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap()).await
    }

    async fn get(&self, uri: &str, cookie: Option<&str>) -> Response {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// Registers a user and returns the `sessionToken=...` cookie pair.
    async fn register(&self, email: &str) -> String {
        let response = self
            .post_json("/api/auth/register", json!({ "email": email, "password": PASSWORD }), None)
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        session_cookie(&response).expect("register sets a session cookie")
    }

    async fn login(&self, email: &str, password: &str) -> Response {
        self.post_json("/api/auth/login", json!({ "email": email, "password": password }), None)
            .await
    }
}

async fn send_to(router: Router, mut request: Request<Body>) -> Response {
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([203, 0, 113, 7], 4000))));
    router.oneshot(request).await.unwrap()
}

/// Counts password verifications performed by the wrapped hasher.
struct CountingHasher {
    inner: Arc<dyn PasswordHasher>,
    verifications: Arc<AtomicUsize>,
}

impl PasswordHasher for CountingHasher {
    fn hash(&self, password: &str) -> rampart::Result<String> {
        self.inner.hash(password)
    }

    fn verify(&self, password: &str, hash: &str) -> rampart::Result<bool> {
        self.verifications.fetch_add(1, Ordering::SeqCst);
        self.inner.verify(password, hash)
    }
}

fn session_cookie(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with("sessionToken="))
        .and_then(|value| value.split(';').next())
        .map(str::to_string)
}

async fn json_body(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn session_cookie_is_hardened_and_authenticates() {
    let app = TestApp::new();
    let response = app
        .post_json("/api/auth/register", json!({ "email": "ada@example.com", "password": PASSWORD }), None)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(set_cookie.starts_with("sessionToken="));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Strict"));
    assert!(set_cookie.contains("Path=/"));
    assert!(set_cookie.contains("Max-Age=604800"));

    let cookie = session_cookie(&response).unwrap();
    let me = app.get("/api/auth/me", Some(&cookie)).await;
    assert_eq!(me.status(), StatusCode::OK);
    let body = json_body(me).await;
    assert_eq!(body["data"]["email"], "ada@example.com");
}

#[tokio::test]
async fn missing_or_expired_session_is_unauthorized() {
    let app = TestApp::new();
    let cookie = app.register("grace@example.com").await;

    let anonymous = app.get("/api/auth/me", None).await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(anonymous).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    app.clock.advance(chrono::Duration::days(8));
    let expired = app.get("/api/auth/me", Some(&cookie)).await;
    assert_eq!(expired.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn aging_session_is_renewed_on_use() {
    let app = TestApp::new();
    let cookie = app.register("linus@example.com").await;

    let fresh = app.get("/api/auth/me", Some(&cookie)).await;
    assert!(session_cookie(&fresh).is_none());

    app.clock.advance(chrono::Duration::days(4));
    let aging = app.get("/api/auth/me", Some(&cookie)).await;
    assert_eq!(aging.status(), StatusCode::OK);
    let renewed = session_cookie(&aging).expect("renewed cookie");
    assert_ne!(renewed, cookie);

    app.clock.advance(chrono::Duration::days(4));
    assert_eq!(app.get("/api/auth/me", Some(&cookie)).await.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.get("/api/auth/me", Some(&renewed)).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn exceeding_the_request_budget_returns_429_envelope() {
    let mut config = Config::for_testing(SECRET);
    config.guard.requests = RateLimitPolicy::new("requests", 3, Duration::from_secs(60));
    let app = TestApp::with_config(config);

    for remaining in (0..3).rev() {
        let response = app.get("/api/auth/me", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()["x-ratelimit-remaining"].to_str().unwrap(),
            remaining.to_string()
        );
    }

    let limited = app.get("/api/auth/me", None).await;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limited.headers()[header::RETRY_AFTER].to_str().unwrap(), "60");
    let body = json_body(limited).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "RATE_LIMIT_EXCEEDED");
    assert!(body["error"]["message"].is_string());

    app.clock.advance(chrono::Duration::seconds(60));
    assert_eq!(app.get("/api/auth/me", None).await.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn repeated_login_failures_lock_the_account() {
    let app = TestApp::new();
    app.register("margaret@example.com").await;

    for _ in 0..4 {
        let response = app.login("margaret@example.com", "wrong password").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let locked = app.login("margaret@example.com", "wrong password").await;
    assert_eq!(locked.status(), StatusCode::LOCKED);
    assert_eq!(json_body(locked).await["error"]["code"], "ACCOUNT_LOCKED");

    // the right password does not get through while locked
    let still_locked = app.login("Margaret@Example.com", PASSWORD).await;
    assert_eq!(still_locked.status(), StatusCode::LOCKED);

    app.clock.advance(chrono::Duration::seconds(901));
    let ok = app.login("margaret@example.com", PASSWORD).await;
    assert_eq!(ok.status(), StatusCode::OK);
    assert!(session_cookie(&ok).is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_guesses_cannot_outrun_the_lockout() {
    let verifications = Arc::new(AtomicUsize::new(0));
    let counter = verifications.clone();
    let mut config = Config::for_testing(SECRET);
    // only the account budget is under test
    config.guard.ip_lockout.max_attempts = 100;
    let app = TestApp::with_state(config, move |state| {
        state.hasher = Arc::new(CountingHasher {
            inner: state.hasher.clone(),
            verifications: counter,
        });
    });
    app.register("alan@example.com").await;

    let mut handles = Vec::new();
    for _ in 0..20 {
        let router = app.router.clone();
        handles.push(tokio::spawn(async move {
            let request = Request::builder()
                .method("POST")
                .uri("/api/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "email": "alan@example.com", "password": "wrong password" }).to_string(),
                ))
                .unwrap();
            send_to(router, request).await.status()
        }));
    }

    let mut locked = 0;
    for handle in handles {
        let status = handle.await.unwrap();
        assert!(
            status == StatusCode::UNAUTHORIZED || status == StatusCode::LOCKED,
            "unexpected status {status}"
        );
        if status == StatusCode::LOCKED {
            locked += 1;
        }
    }

    let checked = verifications.load(Ordering::SeqCst);
    assert!(checked <= 5, "{checked} passwords checked with a budget of 5");
    assert!(locked >= 15);

    let after = app.login("alan@example.com", PASSWORD).await;
    assert_eq!(after.status(), StatusCode::LOCKED);
}

#[tokio::test]
async fn unknown_accounts_are_charged_like_real_ones() {
    let app = TestApp::new();
    for _ in 0..4 {
        let response = app.login("nobody@example.com", PASSWORD).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
    let locked = app.login("nobody@example.com", PASSWORD).await;
    assert_eq!(locked.status(), StatusCode::LOCKED);
}

#[tokio::test]
async fn signed_requests_are_verified_with_replay_window() {
    let app = TestApp::new();
    let cookie = app.register("ken@example.com").await;

    let issued = app
        .post_json("/api/keys", json!({ "permissions": ["read"] }), Some(&cookie))
        .await;
    assert_eq!(issued.status(), StatusCode::CREATED);
    let data = json_body(issued).await["data"].clone();
    let api_key = data["apiKey"].as_str().unwrap().to_string();
    let signing_secret = data["signingSecret"].as_str().unwrap().to_string();
    assert!(api_key.starts_with("ak_"));
    assert_ne!(signing_secret, api_key);

    let signed = |body: &str, timestamp: i64, signature: &str| {
        Request::builder()
            .method("POST")
            .uri("/api/signed/echo?trace=1")
            .header("x-api-key", api_key.as_str())
            .header("x-timestamp", timestamp.to_string())
            .header("x-signature", signature)
            .body(Body::from(body.to_string()))
            .unwrap()
    };

    let body = r#"{"amount":42}"#;
    let timestamp = app.clock.now_ms();
    let signature = generate_request_signature(
        "POST",
        "/api/signed/echo?trace=1",
        body,
        timestamp,
        &signing_secret,
    );

    let ok = app.send(signed(body, timestamp, &signature)).await;
    assert_eq!(ok.status(), StatusCode::OK);
    let echoed = json_body(ok).await;
    assert_eq!(echoed["data"]["body"], body);
    assert_eq!(echoed["data"]["permissions"], json!(["read"]));

    let tampered = app.send(signed(r#"{"amount":43}"#, timestamp, &signature)).await;
    assert_eq!(tampered.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(tampered).await["error"]["code"], "INVALID_SIGNATURE");

    app.clock.advance(chrono::Duration::milliseconds(300_001));
    let replayed = app.send(signed(body, timestamp, &signature)).await;
    assert_eq!(replayed.status(), StatusCode::UNAUTHORIZED);
}

async fn issue_key(app: &TestApp, cookie: &str, permissions: Value) -> (String, String) {
    let issued = app
        .post_json("/api/keys", json!({ "permissions": permissions }), Some(cookie))
        .await;
    assert_eq!(issued.status(), StatusCode::CREATED);
    let data = json_body(issued).await["data"].clone();
    (
        data["apiKey"].as_str().unwrap().to_string(),
        data["signingSecret"].as_str().unwrap().to_string(),
    )
}

fn signed_echo(api_key: &str, body: &str, timestamp: i64, secret: &str) -> Request<Body> {
    let signature = generate_request_signature("POST", "/api/signed/echo", body, timestamp, secret);
    Request::builder()
        .method("POST")
        .uri("/api/signed/echo")
        .header("x-api-key", api_key)
        .header("x-timestamp", timestamp.to_string())
        .header("x-signature", signature)
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn observed_api_key_cannot_sign_new_requests() {
    let app = TestApp::new();
    let cookie = app.register("dennis@example.com").await;
    let (api_key, _) = issue_key(&app, &cookie, json!(["read"])).await;

    let forged = app
        .send(signed_echo(&api_key, r#"{"amount":1000}"#, app.clock.now_ms(), &api_key))
        .await;
    assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(forged).await["error"]["code"], "INVALID_SIGNATURE");
}

#[tokio::test]
async fn signed_route_requires_its_permission() {
    let app = TestApp::new();
    let cookie = app.register("margaret@example.com").await;

    let (write_only, secret) = issue_key(&app, &cookie, json!(["write"])).await;
    let denied = app
        .send(signed_echo(&write_only, "{}", app.clock.now_ms(), &secret))
        .await;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(denied).await["error"]["code"], "FORBIDDEN");

    let (wildcard, secret) = issue_key(&app, &cookie, json!(["*"])).await;
    let allowed = app
        .send(signed_echo(&wildcard, "{}", app.clock.now_ms(), &secret))
        .await;
    assert_eq!(allowed.status(), StatusCode::OK);
}

#[tokio::test]
async fn unsigned_requests_are_rejected() {
    let app = TestApp::new();
    let response = app
        .send(
            Request::builder()
                .method("POST")
                .uri("/api/signed/echo")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"]["code"], "INVALID_SIGNATURE");
}

#[tokio::test]
async fn record_fields_round_trip_over_http() {
    let app = TestApp::new();
    let cookie = app.register("barbara@example.com").await;
    let record = json!({ "id": 7, "ssn": "123-45-6789", "address": { "city": "Oslo" } });

    let encrypted = app
        .post_json(
            "/api/fields/encrypt",
            json!({ "record": record, "fields": ["ssn", "address", "missing"] }),
            Some(&cookie),
        )
        .await;
    assert_eq!(encrypted.status(), StatusCode::OK);
    let encrypted = json_body(encrypted).await["record"].clone();
    assert_eq!(encrypted["id"], 7);
    assert_ne!(encrypted["ssn"], "123-45-6789");
    assert!(encrypted["address"].is_string());

    let decrypted = app
        .post_json(
            "/api/fields/decrypt",
            json!({ "record": encrypted, "fields": ["ssn", "address"] }),
            Some(&cookie),
        )
        .await;
    assert_eq!(decrypted.status(), StatusCode::OK);
    assert_eq!(json_body(decrypted).await["record"], record);
}
