//! Test helpers: a mock CMS served on an ephemeral port plus a fully wired
//! gateway router pointed at it.

#![allow(dead_code)]

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, Method, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use secrecy::Secret;
use serde_json::{json, Value};
use service_core::observability::unregistered_metrics_handle;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceExt;
use trivia_gateway::{
    build_router,
    config::{
        CmsConfig, CookieConfig, Environment, GatewayConfig, RateLimitConfig, SameSitePolicy,
        SecurityConfig, SessionConfig, UploadConfig,
    },
    services::InMemorySessionStore,
    AppState,
};

pub const ADMIN_EMAIL: &str = "admin@trivia.test";
pub const EDITOR_EMAIL: &str = "player-with-no-role@trivia.test";
pub const PASSWORD: &str = "correct-horse";
pub const PLAYER_IDENTIFIER: &str = "player1";

pub const ADMIN_USER_ID: &str = "1";
pub const PLAYER_USER_ID: &str = "2";

pub const VALID_TOKEN: &str = "valid-admin-jwt";
pub const EXPIRED_TOKEN: &str = "expired-admin-jwt";
pub const SLOW_TOKEN: &str = "slow-admin-jwt";
pub const OTHER_USER_TOKEN: &str = "other-user-jwt";
pub const REFRESH_TOKEN: &str = "valid-refresh";
pub const REFRESHED_TOKEN: &str = "refreshed-admin-jwt";
pub const ROTATED_REFRESH_TOKEN: &str = "rotated-refresh";
pub const PLAYER_TOKEN: &str = "player-jwt";
pub const CMS_API_TOKEN: &str = "server-api-token";

/// Default socket peer for test requests; trusted to set forwarded headers.
pub const TEST_PROXY: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40000);

/// How many times each CMS endpoint was hit.
#[derive(Clone, Default)]
pub struct CmsCalls {
    pub admin_login: Arc<AtomicUsize>,
    pub player_login: Arc<AtomicUsize>,
    pub verify: Arc<AtomicUsize>,
    pub refresh: Arc<AtomicUsize>,
    pub questions: Arc<AtomicUsize>,
}

impl CmsCalls {
    pub fn verify_count(&self) -> usize {
        self.verify.load(Ordering::SeqCst)
    }

    pub fn refresh_count(&self) -> usize {
        self.refresh.load(Ordering::SeqCst)
    }

    pub fn questions_count(&self) -> usize {
        self.questions.load(Ordering::SeqCst)
    }
}

fn admin_user() -> Value {
    json!({ "id": 1, "email": ADMIN_EMAIL, "role": { "name": "Admin", "type": "admin" } })
}

fn plain_user(id: u64, email: &str) -> Value {
    json!({
        "id": id,
        "email": email,
        "role": { "name": "Authenticated", "type": "authenticated" }
    })
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn strapi_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({ "data": null, "error": { "status": status.as_u16(), "message": message } })),
    )
        .into_response()
}

async fn admin_login(State(calls): State<CmsCalls>, Json(body): Json<Value>) -> Response {
    calls.admin_login.fetch_add(1, Ordering::SeqCst);
    let identifier = body["identifier"].as_str().unwrap_or_default();
    let password = body["password"].as_str().unwrap_or_default();

    match (identifier, password) {
        (ADMIN_EMAIL, PASSWORD) => Json(json!({
            "jwt": VALID_TOKEN,
            "refreshToken": REFRESH_TOKEN,
            "user": admin_user(),
        }))
        .into_response(),
        (EDITOR_EMAIL, PASSWORD) => Json(json!({
            "jwt": OTHER_USER_TOKEN,
            "refreshToken": REFRESH_TOKEN,
            "user": plain_user(3, EDITOR_EMAIL),
        }))
        .into_response(),
        _ => strapi_error(StatusCode::BAD_REQUEST, "Invalid identifier or password"),
    }
}

async fn player_login(State(calls): State<CmsCalls>, Json(body): Json<Value>) -> Response {
    calls.player_login.fetch_add(1, Ordering::SeqCst);
    if body["identifier"] == PLAYER_IDENTIFIER && body["password"] == PASSWORD {
        Json(json!({ "jwt": PLAYER_TOKEN, "user": plain_user(2, "player1@trivia.test") }))
            .into_response()
    } else {
        strapi_error(StatusCode::BAD_REQUEST, "Invalid identifier or password")
    }
}

async fn users_me(State(calls): State<CmsCalls>, headers: HeaderMap) -> Response {
    calls.verify.fetch_add(1, Ordering::SeqCst);
    match bearer(&headers).as_deref() {
        Some(VALID_TOKEN) | Some(REFRESHED_TOKEN) => Json(admin_user()).into_response(),
        Some(OTHER_USER_TOKEN) => Json(plain_user(3, EDITOR_EMAIL)).into_response(),
        Some(PLAYER_TOKEN) => Json(plain_user(2, "player1@trivia.test")).into_response(),
        Some(SLOW_TOKEN) => {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Json(admin_user()).into_response()
        }
        _ => strapi_error(StatusCode::UNAUTHORIZED, "Invalid credentials"),
    }
}

async fn refresh(State(calls): State<CmsCalls>, Json(body): Json<Value>) -> Response {
    calls.refresh.fetch_add(1, Ordering::SeqCst);
    if body["refreshToken"] == REFRESH_TOKEN {
        Json(json!({ "jwt": REFRESHED_TOKEN, "refreshToken": ROTATED_REFRESH_TOKEN }))
            .into_response()
    } else {
        strapi_error(StatusCode::UNAUTHORIZED, "Invalid refresh token")
    }
}

async fn create_question(State(calls): State<CmsCalls>, Json(body): Json<Value>) -> Response {
    let n = calls.questions.fetch_add(1, Ordering::SeqCst) + 1;
    if body["data"]["text"] == "fail" {
        return strapi_error(StatusCode::BAD_REQUEST, "question text rejected");
    }
    Json(json!({ "data": { "id": 100 + n, "attributes": body["data"] } })).into_response()
}

async fn missing_game() -> Response {
    strapi_error(StatusCode::NOT_FOUND, "Not Found")
}

/// Everything else: describe the request back to the caller.
async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<Value> {
    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "authorization": bearer(&headers),
        "body": serde_json::from_slice::<Value>(&body).ok(),
    }))
}

pub struct MockCms {
    pub url: String,
    pub calls: CmsCalls,
}

pub async fn spawn_mock_cms() -> MockCms {
    let calls = CmsCalls::default();
    let app = Router::new()
        .route("/api/admin/auth/local", post(admin_login))
        .route("/api/auth/local", post(player_login))
        .route("/api/users/me", get(users_me))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/questions", post(create_question))
        .route("/api/games/404", get(missing_game))
        .fallback(echo)
        .with_state(calls.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockCms {
        url: format!("http://{}", addr),
        calls,
    }
}

pub fn test_config(cms_url: &str) -> GatewayConfig {
    GatewayConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "trivia-gateway-test".to_string(),
        service_version: "0.0.0".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        cms: CmsConfig {
            url: cms_url.to_string(),
            api_token: Some(Secret::new(CMS_API_TOKEN.to_string())),
            admin_login_path: "/api/admin/auth/local".to_string(),
            player_login_path: "/api/auth/local".to_string(),
            verify_path: "/api/users/me".to_string(),
            refresh_path: "/api/auth/refresh".to_string(),
            timeout_secs: 10,
            verify_timeout_secs: 1,
        },
        session: SessionConfig {
            ttl_hours: 168,
            max_sessions_per_user: 10,
            security_event_retention: 1000,
            sweep_interval_secs: 300,
        },
        cookies: CookieConfig {
            secure: false,
            same_site: SameSitePolicy::Lax,
            domain: None,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            admin_roles: vec!["admin".to_string(), "strapi-super-admin".to_string()],
            trusted_proxies: vec![TEST_PROXY.ip()],
        },
        upload: UploadConfig {
            chunk_size: 10,
            max_questions: 500,
        },
        rate_limit: RateLimitConfig {
            login_attempts: 5,
            login_window_seconds: 900,
            global_ip_limit: 1000,
            global_ip_window_seconds: 60,
        },
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub cms: MockCms,
}

impl TestApp {
    /// Requests without connect info arrive from [`TEST_PROXY`].
    pub async fn request(&self, mut req: Request<Body>) -> Response {
        if req.extensions().get::<ConnectInfo<SocketAddr>>().is_none() {
            req.extensions_mut().insert(ConnectInfo(TEST_PROXY));
        }
        self.router.clone().oneshot(req).await.unwrap()
    }

    /// Log the admin in and return the cookie header for follow-up requests.
    pub async fn login_admin(&self) -> String {
        let res = self
            .request(json_request(
                Method::POST,
                "/api/admin/login",
                json!({ "email": ADMIN_EMAIL, "password": PASSWORD }),
            ))
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        cookie_header(&set_cookies(&res))
    }
}

pub async fn spawn_app() -> TestApp {
    let cms = spawn_mock_cms().await;
    spawn_app_with(test_config(&cms.url), cms).await
}

pub async fn spawn_app_with(config: GatewayConfig, cms: MockCms) -> TestApp {
    let store = Arc::new(InMemorySessionStore::new(
        config.session.security_event_retention,
    ));
    let state = AppState::new(config, store, unregistered_metrics_handle()).unwrap();
    let router = build_router(state.clone());

    TestApp { router, state, cms }
}

pub fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn json_request_with_cookies(
    method: Method,
    uri: &str,
    cookies: &str,
    body: Value,
) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::COOKIE, cookies)
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get_with_cookies(uri: &str, cookies: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header(header::COOKIE, cookies)
        .body(Body::empty())
        .unwrap()
}

pub fn set_cookies(res: &Response) -> Vec<String> {
    res.headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect()
}

/// The Set-Cookie header for `name`, if the response set it.
pub fn find_cookie<'a>(cookies: &'a [String], name: &str) -> Option<&'a str> {
    let prefix = format!("{}=", name);
    cookies
        .iter()
        .find(|c| c.starts_with(&prefix))
        .map(String::as_str)
}

/// Turn Set-Cookie headers into a Cookie request header.
pub fn cookie_header(set_cookies: &[String]) -> String {
    set_cookies
        .iter()
        .filter_map(|c| c.split(';').next())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Replace one cookie in a Cookie request header.
pub fn with_cookie(cookies: &str, name: &str, value: &str) -> String {
    let prefix = format!("{}=", name);
    cookies
        .split("; ")
        .map(|c| {
            if c.starts_with(&prefix) {
                format!("{}{}", prefix, value)
            } else {
                c.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

pub fn cookie_value(cookies: &str, name: &str) -> Option<String> {
    let prefix = format!("{}=", name);
    cookies
        .split("; ")
        .find_map(|c| c.strip_prefix(&prefix))
        .map(str::to_string)
}

pub async fn body_json(res: Response) -> Value {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
