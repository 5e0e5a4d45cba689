use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use axum_extra::extract::cookie::CookieJar;
use std::convert::Infallible;

use crate::utils::cookies::{cookie_value, PLAYER_TOKEN_COOKIE};

/// Player access token from the `player_token` cookie, or failing that an
/// `Authorization: Bearer` header. `None` when the caller is anonymous.
pub struct PlayerToken(pub Option<String>);

#[axum::async_trait]
impl<S> FromRequestParts<S> for PlayerToken
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        if let Some(token) = cookie_value(&jar, PLAYER_TOKEN_COOKIE) {
            return Ok(PlayerToken(Some(token)));
        }

        let bearer = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());

        Ok(PlayerToken(bearer))
    }
}
