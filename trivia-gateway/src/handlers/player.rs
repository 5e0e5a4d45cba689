use axum::{extract::State, http::Method, Json};
use axum_extra::extract::cookie::CookieJar;
use serde_json::json;
use service_core::error::AppError;

use crate::{
    dtos::{
        auth::{PlayerLoginRequest, PlayerLoginResponse},
        MessageResponse,
    },
    middleware::PlayerToken,
    models::{SecurityEvent, SecurityEventType},
    services::{CmsResponse, GatewayError},
    utils::{ClientMeta, ValidatedJson},
    AppState,
};

const AUDIENCE: &str = "player";

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    ClientMeta(client): ClientMeta,
    ValidatedJson(req): ValidatedJson<PlayerLoginRequest>,
) -> Result<(CookieJar, Json<PlayerLoginResponse>), AppError> {
    let auth = match state.cms.login_player(&req.identifier, &req.password).await {
        Ok(auth) => auth,
        Err(GatewayError::InvalidCredentials) => {
            state
                .sessions
                .log_security_event(SecurityEvent::failed_login(
                    &req.identifier,
                    AUDIENCE,
                    "invalid_credentials",
                    &client,
                ))
                .await?;
            return Err(GatewayError::InvalidCredentials.into());
        }
        Err(e) => return Err(e.into()),
    };

    if auth.user.is_blocked() {
        state
            .sessions
            .log_security_event(SecurityEvent::access_denied(
                Some(&auth.user.id),
                "/api/auth/login",
                &client,
            ))
            .await?;
        return Err(GatewayError::Forbidden("Account is blocked".to_string()).into());
    }

    state
        .sessions
        .log_security_event(SecurityEvent::new(
            SecurityEventType::Login,
            Some(auth.user.id.clone()),
            &client,
            json!({ "audience": AUDIENCE }),
        ))
        .await?;

    Ok((
        state.cookies.set_player_token(jar, &auth.jwt),
        Json(PlayerLoginResponse { user: auth.user }),
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (CookieJar, Json<MessageResponse>) {
    (
        state.cookies.clear_player(jar),
        Json(MessageResponse::new("Logged out successfully")),
    )
}

/// The logged-in player's CMS profile.
pub async fn me(
    State(state): State<AppState>,
    PlayerToken(token): PlayerToken,
) -> Result<CmsResponse, AppError> {
    let token = token.ok_or(GatewayError::AuthenticationRequired)?;

    Ok(state
        .cms
        .forward(
            Method::GET,
            &state.config.cms.verify_path,
            None,
            Some(&token),
            None,
        )
        .await?)
}
