pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    extract::{FromRef, State},
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Extension, Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimit, TrustedProxies},
    security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::GatewayConfig;
use crate::handlers::content::{ResourceKind, ADMIN_RESOURCES, PUBLIC_RESOURCES};
use crate::services::{CmsClient, QuestionUploader, SessionStore, SessionTracker, TokenRelay};
use crate::utils::CookiePolicy;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub cms: Arc<CmsClient>,
    pub sessions: SessionTracker,
    pub relay: TokenRelay,
    pub uploader: QuestionUploader,
    pub cookies: CookiePolicy,
    pub metrics: PrometheusHandle,
    pub trusted_proxies: TrustedProxies,
    pub login_rate_limit: IpRateLimit,
    pub ip_rate_limit: IpRateLimit,
}

impl FromRef<AppState> for TrustedProxies {
    fn from_ref(state: &AppState) -> Self {
        state.trusted_proxies.clone()
    }
}

impl AppState {
    pub fn new(
        config: GatewayConfig,
        store: Arc<dyn SessionStore>,
        metrics: PrometheusHandle,
    ) -> Result<Self, AppError> {
        let cms = Arc::new(CmsClient::new(config.cms.clone())?);

        let sessions = SessionTracker::new(
            store,
            chrono::Duration::hours(config.session.ttl_hours),
            config.session.max_sessions_per_user,
        );
        let relay = TokenRelay::new(
            cms.clone(),
            std::time::Duration::from_secs(config.cms.verify_timeout_secs),
        );
        let uploader = QuestionUploader::new(
            cms.clone(),
            config.upload.chunk_size,
            config.upload.max_questions,
        );

        let trusted_proxies = TrustedProxies::new(config.security.trusted_proxies.clone());
        let login_rate_limit = IpRateLimit::new(
            create_ip_rate_limiter(
                config.rate_limit.login_attempts,
                config.rate_limit.login_window_seconds,
            ),
            trusted_proxies.clone(),
        );
        let ip_rate_limit = IpRateLimit::new(
            create_ip_rate_limiter(
                config.rate_limit.global_ip_limit,
                config.rate_limit.global_ip_window_seconds,
            ),
            trusted_proxies.clone(),
        );

        Ok(Self {
            cookies: CookiePolicy::from_config(&config.cookies),
            config: Arc::new(config),
            cms,
            sessions,
            relay,
            uploader,
            metrics,
            trusted_proxies,
            login_rate_limit,
            ip_rate_limit,
        })
    }
}

fn admin_resource_routes(kind: ResourceKind) -> Router<AppState> {
    use handlers::content::{admin_create, admin_delete, admin_get, admin_list, admin_update};

    Router::new()
        .route(
            &format!("/api/admin/{}", kind.name()),
            get(admin_list).post(admin_create),
        )
        .route(
            &format!("/api/admin/{}/:id", kind.name()),
            get(admin_get).put(admin_update).delete(admin_delete),
        )
        .layer(Extension(kind))
}

fn public_resource_routes(kind: ResourceKind) -> Router<AppState> {
    use handlers::content::{public_get, public_list};

    Router::new()
        .route(&format!("/api/{}", kind.name()), get(public_list))
        .route(&format!("/api/{}/:id", kind.name()), get(public_get))
        .layer(Extension(kind))
}

pub fn build_router(state: AppState) -> Router {
    // Everything behind the admin session gate
    let protected = ADMIN_RESOURCES
        .into_iter()
        .fold(Router::new(), |router, kind| {
            router.merge(admin_resource_routes(kind))
        })
        .route("/api/admin/verify", get(handlers::sessions::verify))
        .route("/api/admin/sessions", get(handlers::sessions::list_sessions))
        .route(
            "/api/admin/sessions/:id",
            axum::routing::delete(handlers::sessions::revoke_session),
        )
        .route(
            "/api/admin/security-events",
            get(handlers::sessions::security_events),
        )
        .route(
            "/api/admin/session-stats",
            get(handlers::sessions::session_stats),
        )
        .route(
            "/api/admin/questions/bulk",
            post(handlers::content::bulk_upload_questions),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::require_admin_session,
        ));

    let login_routes = Router::new()
        .route("/api/admin/login", post(handlers::admin_auth::login))
        .route("/api/auth/login", post(handlers::player::login))
        .layer(from_fn_with_state(
            state.login_rate_limit.clone(),
            ip_rate_limit_middleware,
        ));

    let public = PUBLIC_RESOURCES
        .into_iter()
        .fold(Router::new(), |router, kind| {
            router.merge(public_resource_routes(kind))
        });

    let ip_limit = state.ip_rate_limit.clone();

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route("/api/admin/logout", post(handlers::admin_auth::logout))
        .route("/api/admin/refresh", post(handlers::admin_auth::refresh))
        .route("/api/auth/logout", post(handlers::player::logout))
        .route("/api/users/me", get(handlers::player::me))
        .merge(login_routes)
        .merge(public)
        .merge(protected)
        .with_state(state.clone())
        // Global IP rate limiting
        .layer(from_fn_with_state(ip_limit, ip_rate_limit_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri().path(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(&state.config))
}

/// Credentialed CORS: the admin panel and game client send cookies, so
/// origins must be listed explicitly.
fn cors_layer(config: &GatewayConfig) -> CorsLayer {
    let origins = config
        .security
        .allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) if o != "*" => Some(value),
            Ok(_) => {
                tracing::warn!(
                    "Ignoring wildcard CORS origin; credentials require explicit origins"
                );
                None
            }
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}", o, e);
                None
            }
        })
        .collect::<Vec<HeaderValue>>();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
}

pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.sessions.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Session store health check failed");
        AppError::ServiceUnavailable
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "cms": state.cms.base_url(),
    })))
}
