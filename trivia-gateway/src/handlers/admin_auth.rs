use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::json;
use service_core::error::AppError;

use crate::{
    dtos::{
        auth::{AdminLoginRequest, AdminLoginResponse, RefreshResponse},
        MessageResponse,
    },
    middleware::admin_session::requires_auth,
    models::{SecurityEvent, SecurityEventType, TokenPair},
    services::GatewayError,
    utils::{
        cookies::{cookie_value, ADMIN_REFRESH_COOKIE, ADMIN_SESSION_COOKIE},
        ClientMeta, ValidatedJson,
    },
    AppState,
};

const AUDIENCE: &str = "admin";

/// Log an admin in against the CMS and open a tracked session.
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    ClientMeta(client): ClientMeta,
    ValidatedJson(req): ValidatedJson<AdminLoginRequest>,
) -> Result<(CookieJar, Json<AdminLoginResponse>), AppError> {
    let auth = match state.cms.login_admin(&req.email, &req.password).await {
        Ok(auth) => auth,
        Err(GatewayError::InvalidCredentials) => {
            state
                .sessions
                .log_security_event(SecurityEvent::failed_login(
                    &req.email,
                    AUDIENCE,
                    "invalid_credentials",
                    &client,
                ))
                .await?;
            return Err(GatewayError::InvalidCredentials.into());
        }
        Err(e) => return Err(e.into()),
    };

    let user = auth.user;
    if user.is_blocked() || !user.has_any_role(&state.config.security.admin_roles) {
        tracing::warn!(user_id = %user.id, roles = ?user.role_names(), "Login without admin role");
        state
            .sessions
            .log_security_event(SecurityEvent::access_denied(
                Some(&user.id),
                "/api/admin/login",
                &client,
            ))
            .await?;
        return Err(GatewayError::Forbidden("Admin access required".to_string()).into());
    }

    let session = state
        .sessions
        .create_session(&user.id, &client.fingerprint, &client)
        .await?;

    state
        .sessions
        .log_security_event(SecurityEvent::login(&user.id, &session.id, AUDIENCE, &client))
        .await?;

    tracing::info!(user_id = %user.id, user = %user.label(), "Admin logged in");

    let tokens = TokenPair {
        access_token: auth.jwt,
        refresh_token: auth.refresh_token.unwrap_or_default(),
    };
    let jar = state.cookies.set_admin_login(jar, &tokens, &session.id);

    Ok((
        jar,
        Json(AdminLoginResponse {
            user,
            session_id: session.id,
            expires_at: session.expires_at,
        }),
    ))
}

/// Drop the tracked session and clear every admin cookie. Safe to repeat.
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
    ClientMeta(client): ClientMeta,
) -> Result<(CookieJar, Json<MessageResponse>), AppError> {
    if let Some(session_id) = cookie_value(&jar, ADMIN_SESSION_COOKIE) {
        if let Some(session) = state.sessions.invalidate_session(&session_id).await? {
            state
                .sessions
                .log_security_event(SecurityEvent::new(
                    SecurityEventType::Logout,
                    Some(session.user_id.clone()),
                    &client,
                    json!({ "sessionId": session.id, "audience": AUDIENCE }),
                ))
                .await?;
        }
    }

    Ok((
        state.cookies.clear_admin(jar),
        Json(MessageResponse::new("Logged out successfully")),
    ))
}

/// Explicit token refresh from the refresh cookie.
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
    ClientMeta(client): ClientMeta,
) -> Result<Response, AppError> {
    let Some(refresh_token) = cookie_value(&jar, ADMIN_REFRESH_COOKIE) else {
        return Ok(requires_auth(&state, jar, "Authentication required"));
    };

    match state.relay.refresh(&refresh_token).await {
        Some((user, tokens)) => {
            state
                .sessions
                .log_security_event(SecurityEvent::new(
                    SecurityEventType::TokenRefreshed,
                    Some(user.id.clone()),
                    &client,
                    json!({ "trigger": "explicit" }),
                ))
                .await?;

            Ok((
                state.cookies.set_admin_tokens(jar, &tokens),
                Json(RefreshResponse {
                    refreshed: true,
                    user,
                }),
            )
                .into_response())
        }
        None => {
            if let Some(session_id) = cookie_value(&jar, ADMIN_SESSION_COOKIE) {
                state.sessions.invalidate_session(&session_id).await?;
            }
            Ok(requires_auth(&state, jar, "Session expired, please log in again"))
        }
    }
}
