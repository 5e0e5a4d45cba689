use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::json;
use service_core::error::AppError;

use crate::dtos::ErrorResponse;
use crate::models::{ClientInfo, CmsUser, SecurityEvent, SecurityEventType, Session};
use crate::services::RelayOutcome;
use crate::utils::cookies::{
    cookie_value, ADMIN_REFRESH_COOKIE, ADMIN_SESSION_COOKIE, ADMIN_TOKEN_COOKIE,
};
use crate::utils::ClientMeta;
use crate::AppState;

/// Who is calling a protected admin route. Inserted by [`require_admin_session`].
#[derive(Debug, Clone)]
pub struct AdminContext {
    pub user: CmsUser,
    pub session: Session,
    /// The access token to forward to the CMS, possibly just refreshed.
    pub access_token: String,
}

/// Response marker from a handler that ended the caller's own session.
/// Tokens refreshed earlier in the request are then not written back.
#[derive(Debug, Clone, Copy)]
pub struct SessionEnded;

/// Gate for admin routes: resolves the session first, then the CMS token
/// (refreshing once if needed), then checks the user still owns the session
/// and holds an admin role.
pub async fn require_admin_session(
    State(state): State<AppState>,
    jar: CookieJar,
    ClientMeta(client): ClientMeta,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(session_id) = cookie_value(&jar, ADMIN_SESSION_COOKIE) else {
        return Ok(requires_auth(&state, jar, "Authentication required"));
    };

    let validation = state.sessions.validate_session(&session_id, &client).await?;
    let session = match (validation.valid, validation.session) {
        (true, Some(session)) => session,
        _ => {
            tracing::debug!(reason = ?validation.reason, "Admin session rejected");
            return Ok(requires_auth(&state, jar, "Session expired or invalid"));
        }
    };

    let access = cookie_value(&jar, ADMIN_TOKEN_COOKIE);
    let refresh = cookie_value(&jar, ADMIN_REFRESH_COOKIE);

    let (user, refreshed) = match state
        .relay
        .authenticate(access.as_deref(), refresh.as_deref())
        .await?
    {
        RelayOutcome::Verified(user) => (user, None),
        RelayOutcome::Refreshed { user, tokens } => {
            state
                .sessions
                .log_security_event(SecurityEvent::new(
                    SecurityEventType::TokenRefreshed,
                    Some(user.id.clone()),
                    &client,
                    json!({ "sessionId": session.id, "trigger": "middleware" }),
                ))
                .await?;
            (user, Some(tokens))
        }
        RelayOutcome::RequiresAuth => {
            state.sessions.invalidate_session(&session.id).await?;
            return Ok(requires_auth(&state, jar, "Authentication required"));
        }
    };

    if user.id != session.user_id {
        state
            .sessions
            .log_security_event(SecurityEvent::suspicious(
                Some(&session.user_id),
                "token_user_mismatch",
                &client,
                json!({ "sessionId": session.id, "tokenUserId": user.id }),
            ))
            .await?;
        state.sessions.invalidate_session(&session.id).await?;
        return Ok(requires_auth(&state, jar, "Authentication required"));
    }

    if user.is_blocked() || !user.has_any_role(&state.config.security.admin_roles) {
        let resource = req.uri().path().to_string();
        deny(&state, &user, &client, &resource).await?;
        return Err(AppError::Forbidden(anyhow::anyhow!("Admin access required")));
    }

    let access_token = match &refreshed {
        Some(tokens) => tokens.access_token.clone(),
        None => access.unwrap_or_default(),
    };

    req.extensions_mut().insert(AdminContext {
        user,
        session,
        access_token,
    });

    let response = next.run(req).await;

    if response.extensions().get::<SessionEnded>().is_some() {
        return Ok(response);
    }

    Ok(match refreshed {
        Some(tokens) => (state.cookies.set_admin_tokens(jar, &tokens), response).into_response(),
        None => response,
    })
}

async fn deny(
    state: &AppState,
    user: &CmsUser,
    client: &ClientInfo,
    resource: &str,
) -> Result<(), AppError> {
    tracing::warn!(user_id = %user.id, resource = %resource, "Admin access denied");
    state
        .sessions
        .log_security_event(SecurityEvent::access_denied(Some(&user.id), resource, client))
        .await?;
    Ok(())
}

/// 401 with `requiresAuth` and all admin cookies cleared.
pub fn requires_auth(state: &AppState, jar: CookieJar, message: &str) -> Response {
    (
        state.cookies.clear_admin(jar),
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::requires_auth(message)),
        ),
    )
        .into_response()
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AdminContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<AdminContext>().cloned().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Admin context missing from request extensions"
            ))
        })
    }
}
