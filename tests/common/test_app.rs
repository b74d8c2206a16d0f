//! Test application setup utilities
//!
//! Builds the full router against a temporary SQLite database. Requests carry
//! a `ConnectInfo` peer address so the guard chain sees a real client IP.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Request},
    Router,
};
use tower::ServiceExt;
use uuid::Uuid;

use approval_gateway::{
    build_router,
    config::{AppConfig, DatabaseConfig, FloodGuardConfig, MaintenanceSettings},
    db,
    models::{AuditEvent, AuditQuery},
    AppState, Stores,
};

/// Test application wrapper for integration testing
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub remote: IpAddr,
}

impl TestApp {
    /// Create a new test application with a fresh SQLite database
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    /// Create a new test application with custom configuration
    pub async fn with_config(config: AppConfig) -> Self {
        let db = db::init_pool(&config.database)
            .await
            .expect("Failed to initialize test database");
        let state = AppState::new(config, db);
        Self::from_state(state)
    }

    /// Create a test application with caller-supplied stores
    pub async fn with_stores(config: AppConfig, stores: impl FnOnce(&db::DbPool) -> Stores) -> Self {
        let db = db::init_pool(&config.database)
            .await
            .expect("Failed to initialize test database");
        let stores = stores(&db);
        Self::from_state(AppState::with_stores(config, db, stores))
    }

    fn from_state(state: AppState) -> Self {
        Self {
            router: build_router(state.clone()),
            state,
            remote: IpAddr::V4(Ipv4Addr::new(203, 0, 113, 10)),
        }
    }

    /// Send subsequent requests from a different client address
    pub fn from_addr(mut self, ip: &str) -> Self {
        self.remote = ip.parse().expect("Invalid test address");
        self
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.request(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    /// GET with a bearer credential (session JWT or access token)
    pub async fn get_as(&self, uri: &str, credential: &str) -> TestResponse {
        self.request(
            Request::get(uri)
                .header(header::AUTHORIZATION, format!("Bearer {}", credential))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// GET as a browser would send it, with a session cookie
    pub async fn get_html(&self, uri: &str, cookie: Option<&str>) -> TestResponse {
        let mut builder = Request::get(uri).header(header::ACCEPT, "text/html,application/xhtml+xml");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.request(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> TestResponse {
        self.request(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn post_json_as(
        &self,
        uri: &str,
        credential: &str,
        body: serde_json::Value,
    ) -> TestResponse {
        self.request(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, format!("Bearer {}", credential))
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn delete_as(&self, uri: &str, credential: &str) -> TestResponse {
        self.request(
            Request::delete(uri)
                .header(header::AUTHORIZATION, format!("Bearer {}", credential))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// Stored audit events with the given name, newest first
    pub async fn events(&self, event_name: &str) -> Vec<AuditEvent> {
        self.state
            .audit
            .query(&AuditQuery {
                event_name: Some(event_name.to_string()),
                ..Default::default()
            })
            .await
            .expect("Failed to query audit events")
    }

    /// Every stored audit event, newest first
    pub async fn all_events(&self) -> Vec<AuditEvent> {
        self.state
            .audit
            .query(&AuditQuery {
                limit: Some(AuditQuery::MAX_LIMIT),
                ..Default::default()
            })
            .await
            .expect("Failed to query audit events")
    }

    /// Make an arbitrary request from the current client address
    pub async fn request(&self, mut request: Request<Body>) -> TestResponse {
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::new(self.remote, 40000)));

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to execute request");

        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read response body");

        TestResponse {
            status,
            headers,
            body,
        }
    }
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: axum::http::StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: bytes::Bytes,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> T {
        serde_json::from_slice(&self.body).expect("Failed to parse response as JSON")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Reason code of a JSON error body
    pub fn code(&self) -> Option<String> {
        let body: serde_json::Value = self.json();
        body.get("code").and_then(|c| c.as_str()).map(str::to_string)
    }

    /// Assert the response status
    pub fn assert_status(&self, expected: axum::http::StatusCode) -> &Self {
        assert_eq!(
            self.status,
            expected,
            "Expected status {}, got {}. Body: {}",
            expected,
            self.status,
            self.text()
        );
        self
    }

    pub fn assert_ok(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::OK)
    }

    pub fn assert_created(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::CREATED)
    }

    pub fn assert_unauthorized(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::UNAUTHORIZED)
    }

    pub fn assert_forbidden(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::FORBIDDEN)
    }

    pub fn assert_not_found(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::NOT_FOUND)
    }
}

/// Create a test configuration with a temporary SQLite database
pub fn test_config() -> AppConfig {
    // Unique file per test so parallel tests never share state
    let db_path = std::env::temp_dir().join(format!("approval_gateway_test_{}.db", Uuid::new_v4().simple()));

    let mut config = AppConfig {
        database: DatabaseConfig {
            url: format!("sqlite://{}?mode=rwc", db_path.display()),
            max_connections: 4,
            min_connections: 1,
            connect_timeout_secs: 30,
            idle_timeout_secs: 600,
        },
        maintenance: MaintenanceSettings {
            enabled: false,
            ..MaintenanceSettings::default()
        },
        ..AppConfig::default()
    };
    config.session.secret = "test-secret-that-is-at-least-32-characters-long".to_string();
    // Generous deadline so audit assertions never race the store
    config.audit.store_timeout_ms = 2_000;
    config.rate_limit.store_timeout_ms = 1_000;
    config.rate_limit.login = FloodGuardConfig {
        requests_per_second: 100,
        burst_size: 100,
    };
    config
}
