use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    Extension, Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::{json, Value};
use service_core::error::AppError;

use crate::{
    dtos::{
        auth::VerifyResponse,
        session::{SecurityEventsQuery, SessionListResponse, SessionView},
        MessageResponse,
    },
    middleware::{AdminContext, SessionEnded},
    models::{SecurityEvent, SecurityEventType, SessionStats},
    services::GatewayError,
    utils::ClientMeta,
    AppState,
};

pub async fn verify(ctx: AdminContext) -> Json<VerifyResponse> {
    Json(VerifyResponse {
        valid: true,
        user: ctx.user,
        session: ctx.session,
    })
}

/// The caller's own active sessions.
pub async fn list_sessions(
    State(state): State<AppState>,
    ctx: AdminContext,
) -> Result<Json<SessionListResponse>, AppError> {
    let sessions = state
        .sessions
        .get_user_active_sessions(&ctx.user.id)
        .await?
        .into_iter()
        .map(|session| SessionView {
            current: session.id == ctx.session.id,
            session,
        })
        .collect();

    Ok(Json(SessionListResponse { sessions }))
}

/// Revoke one of the caller's sessions. Revoking the current one also clears
/// the caller's cookies.
pub async fn revoke_session(
    State(state): State<AppState>,
    jar: CookieJar,
    ctx: AdminContext,
    ClientMeta(client): ClientMeta,
    Path(session_id): Path<String>,
) -> Result<Response, AppError> {
    let target = state
        .sessions
        .get_session(&session_id)
        .await?
        .ok_or(GatewayError::SessionNotFound)?;

    if target.user_id != ctx.user.id {
        state
            .sessions
            .log_security_event(SecurityEvent::access_denied(
                Some(&ctx.user.id),
                &format!("session:{}", session_id),
                &client,
            ))
            .await?;
        return Err(GatewayError::Forbidden("Cannot revoke another user's session".into()).into());
    }

    if state.sessions.invalidate_session(&session_id).await?.is_none() {
        return Err(GatewayError::SessionNotFound.into());
    }

    state
        .sessions
        .log_security_event(SecurityEvent::new(
            SecurityEventType::SessionRevoked,
            Some(ctx.user.id.clone()),
            &client,
            json!({ "sessionId": session_id, "revokedBy": ctx.session.id }),
        ))
        .await?;

    let body = Json(MessageResponse::new("Session revoked"));
    if session_id == ctx.session.id {
        let jar = state.cookies.clear_admin(jar);
        return Ok((jar, Extension(SessionEnded), body).into_response());
    }

    Ok(body.into_response())
}

pub async fn security_events(
    State(state): State<AppState>,
    _ctx: AdminContext,
    Query(query): Query<SecurityEventsQuery>,
) -> Result<Json<Value>, AppError> {
    let events = state
        .sessions
        .get_security_events(query.user_id.as_deref(), query.limit)
        .await?;

    Ok(Json(json!({ "count": events.len(), "events": events })))
}

pub async fn session_stats(
    State(state): State<AppState>,
    _ctx: AdminContext,
) -> Result<Json<SessionStats>, AppError> {
    Ok(Json(state.sessions.get_session_stats().await?))
}
