//! End-to-end tests for the Portcullis gateway.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p portcullis-integration-tests
//! ```
//!
//! The whole application router runs in-process on top of the in-memory
//! store. Passkey ceremonies go through the scripted provider from the
//! gateway's `test-support` feature, so no browser or database is needed.
//!
//! # Test Categories
//!
//! - `ceremonies` - registration, login, logout and the admin bootstrap
//! - `forward_auth` - the `/verify` endpoint and its redirects
//! - `admin_api` - host, user and token administration
//! - `proxy` - host-based dispatch to live backends

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{HeaderMap, Method, Request, StatusCode, header},
    response::Response,
};
use chrono::Duration;
use secrecy::SecretString;
use serde_json::{Value, json};
use tower::ServiceExt;

use portcullis_core::{AccessModel, Host, ProxyKind};
use portcullis_gateway::config::{GatewayConfig, TokenConfig};
use portcullis_gateway::middleware::SESSION_COOKIE_NAME;
use portcullis_gateway::routes;
use portcullis_gateway::services::ceremony::fake::FakeCeremony;
use portcullis_gateway::store::{MemoryStore, Store};
use portcullis_gateway::AppState;

/// Hostname of the login surface in every test.
pub const GATEWAY_HOST: &str = "auth.example.com";

/// Gateway configuration used by every test.
#[must_use]
pub fn test_config(access_model: AccessModel) -> GatewayConfig {
    GatewayConfig {
        hostname: GATEWAY_HOST.to_string(),
        public_url: format!("https://{GATEWAY_HOST}"),
        display_name: "Portcullis".to_string(),
        cookie_scope: "example.com".to_string(),
        database_url: None,
        host: "127.0.0.1".parse().unwrap(),
        port: 0,
        session_lifetime: Duration::days(30),
        sweep_interval: Duration::hours(1),
        access_model,
        tokens: TokenConfig {
            secret: SecretString::from("q7Vx!2mLp#9Rt$4wZk@8Nc&3Hd*6Jf^1"),
            salt: SecretString::from("0123456789abcdef"),
            default_age: Duration::days(30),
            max_age: Duration::days(365),
        },
        static_dir: "../gateway/static".to_string(),
        log_json: false,
        sentry_dsn: None,
        sentry_environment: None,
        sentry_sample_rate: 1.0,
        sentry_traces_sample_rate: 0.0,
        tls: None,
    }
}

/// A response with its body already collected.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    async fn collect(response: Response) -> Self {
        let (parts, body) = response.into_parts();
        let body = to_bytes(body, usize::MAX).await.unwrap().to_vec();
        Self {
            status: parts.status,
            headers: parts.headers,
            body,
        }
    }

    /// Body parsed as JSON.
    #[must_use]
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Every `Set-Cookie` header value.
    #[must_use]
    pub fn set_cookies(&self) -> Vec<&str> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    /// Value of the session cookie set by this response, if any.
    #[must_use]
    pub fn session_cookie(&self) -> Option<String> {
        let prefix = format!("{SESSION_COOKIE_NAME}=");
        self.set_cookies().into_iter().find_map(|c| {
            c.strip_prefix(&prefix)
                .and_then(|rest| rest.split(';').next())
                .filter(|v| !v.is_empty())
                .map(str::to_owned)
        })
    }
}

/// An in-process gateway plus the state behind it.
pub struct TestGateway {
    pub state: AppState,
    app: Router,
}

impl TestGateway {
    /// Gateway using the allow-list access model.
    #[must_use]
    pub fn new() -> Self {
        Self::with_access_model(AccessModel::AllowList)
    }

    #[must_use]
    pub fn with_access_model(access_model: AccessModel) -> Self {
        let store = Arc::new(MemoryStore::new());
        let state =
            AppState::new(test_config(access_model), store, Arc::new(FakeCeremony)).unwrap();
        let app = routes::app(state.clone());
        Self { state, app }
    }

    /// Send a raw request through the full middleware stack.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.app.clone().oneshot(request).await.unwrap();
        TestResponse::collect(response).await
    }

    /// Request builder addressed to the gateway, carrying `cookie` as the
    /// session.
    #[must_use]
    pub fn request(
        method: Method,
        path: &str,
        cookie: Option<&str>,
    ) -> axum::http::request::Builder {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header(header::HOST, GATEWAY_HOST);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, format!("{SESSION_COOKIE_NAME}={cookie}"));
        }
        builder
    }

    pub async fn get(&self, path: &str, cookie: Option<&str>) -> TestResponse {
        self.send(
            Self::request(Method::GET, path, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn post_json(&self, path: &str, cookie: Option<&str>, body: &Value) -> TestResponse {
        self.send(
            Self::request(Method::POST, path, cookie)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    /// Forward-auth check for `host` and `uri` as a reverse proxy would send
    /// it.
    pub async fn verify(&self, host: &str, uri: &str, cookie: Option<&str>) -> TestResponse {
        self.send(
            Self::request(Method::GET, "/verify", cookie)
                .header("x-forwarded-host", host)
                .header("x-forwarded-proto", "https")
                .header("x-forwarded-uri", uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// A fresh session id, minted by visiting the gateway.
    pub async fn new_session(&self) -> String {
        self.get("/api/me", None).await.session_cookie().unwrap()
    }

    /// Register `username` with a single passkey named after it. Returns the
    /// session cookie, which is left unauthenticated.
    pub async fn register(&self, username: &str) -> String {
        let cookie = self.new_session().await;

        let start = self
            .post_json(
                "/api/auth/register/start",
                Some(&cookie),
                &json!({"username": username}),
            )
            .await;
        assert_eq!(start.status, StatusCode::OK, "{}", start.text());

        let response =
            FakeCeremony::registration_response(&start.json(), &credential_for(username));
        let finish = self
            .post_json("/api/auth/register/finish", Some(&cookie), &response)
            .await;
        assert_eq!(finish.status, StatusCode::OK, "{}", finish.text());

        cookie
    }

    /// Run a login ceremony on `cookie`. Returns the finish response.
    pub async fn login_with(&self, username: &str, cookie: &str) -> TestResponse {
        let start = self
            .post_json(
                "/api/auth/login/start",
                Some(cookie),
                &json!({"username": username}),
            )
            .await;
        assert_eq!(start.status, StatusCode::OK, "{}", start.text());

        let response = FakeCeremony::login_response(&start.json(), &credential_for(username), None);
        self.post_json("/api/auth/login/finish", Some(cookie), &response)
            .await
    }

    /// Register `username` and log in. Returns an authenticated session
    /// cookie.
    pub async fn sign_up(&self, username: &str) -> String {
        let cookie = self.register(username).await;
        let finish = self.login_with(username, &cookie).await;
        assert_eq!(finish.status, StatusCode::OK, "{}", finish.text());
        cookie
    }

    /// Store a host directly and rebuild the proxy table.
    pub async fn add_host(&self, hostname: &str, backend: &str, public: bool) {
        let host = Host {
            hostname: hostname.to_string(),
            backend: Some(backend.to_string()),
            kind: ProxyKind::Http,
            public,
            globs: Vec::new(),
        };
        self.state.store().save_host(&host).await.unwrap();
        self.state
            .router()
            .rebuild(self.state.store())
            .await
            .unwrap();
    }
}

impl Default for TestGateway {
    fn default() -> Self {
        Self::new()
    }
}

/// Credential id the scripted provider uses for `username`.
#[must_use]
pub fn credential_for(username: &str) -> String {
    format!("cred-{username}")
}
