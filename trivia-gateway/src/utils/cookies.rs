//! Auth cookie names, lifetimes and attributes.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::Duration;

use crate::config::{CookieConfig, SameSitePolicy};
use crate::models::TokenPair;

pub const ADMIN_TOKEN_COOKIE: &str = "admin_token";
pub const ADMIN_REFRESH_COOKIE: &str = "admin_refresh_token";
pub const ADMIN_SESSION_COOKIE: &str = "admin_session_id";
pub const PLAYER_TOKEN_COOKIE: &str = "player_token";

pub const ACCESS_TOKEN_MAX_AGE: Duration = Duration::days(7);
pub const REFRESH_TOKEN_MAX_AGE: Duration = Duration::days(30);
pub const SESSION_COOKIE_MAX_AGE: Duration = Duration::days(7);

/// Builds cookies with the deployment's Secure/SameSite/Domain attributes.
/// Every cookie is HttpOnly and scoped to `/`.
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    secure: bool,
    same_site: SameSite,
    domain: Option<String>,
}

impl CookiePolicy {
    pub fn from_config(config: &CookieConfig) -> Self {
        Self {
            secure: config.secure,
            same_site: match config.same_site {
                SameSitePolicy::Strict => SameSite::Strict,
                SameSitePolicy::Lax => SameSite::Lax,
                SameSitePolicy::None => SameSite::None,
            },
            domain: config.domain.clone(),
        }
    }

    pub fn issue(&self, name: &'static str, value: String, max_age: Duration) -> Cookie<'static> {
        let mut builder = Cookie::build((name, value))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(self.same_site)
            .max_age(max_age);

        if let Some(domain) = &self.domain {
            builder = builder.domain(domain.clone());
        }

        builder.build()
    }

    /// An empty, already-expired cookie. Always emitted as a Set-Cookie,
    /// whether or not the browser sent the cookie.
    pub fn expire(&self, name: &'static str) -> Cookie<'static> {
        self.issue(name, String::new(), Duration::ZERO)
    }

    pub fn set_admin_tokens(&self, jar: CookieJar, tokens: &TokenPair) -> CookieJar {
        jar.add(self.issue(
            ADMIN_TOKEN_COOKIE,
            tokens.access_token.clone(),
            ACCESS_TOKEN_MAX_AGE,
        ))
        .add(self.issue(
            ADMIN_REFRESH_COOKIE,
            tokens.refresh_token.clone(),
            REFRESH_TOKEN_MAX_AGE,
        ))
    }

    pub fn set_admin_login(
        &self,
        jar: CookieJar,
        tokens: &TokenPair,
        session_id: &str,
    ) -> CookieJar {
        self.set_admin_tokens(jar, tokens).add(self.issue(
            ADMIN_SESSION_COOKIE,
            session_id.to_string(),
            SESSION_COOKIE_MAX_AGE,
        ))
    }

    pub fn clear_admin(&self, jar: CookieJar) -> CookieJar {
        jar.add(self.expire(ADMIN_TOKEN_COOKIE))
            .add(self.expire(ADMIN_REFRESH_COOKIE))
            .add(self.expire(ADMIN_SESSION_COOKIE))
    }

    pub fn set_player_token(&self, jar: CookieJar, token: &str) -> CookieJar {
        jar.add(self.issue(PLAYER_TOKEN_COOKIE, token.to_string(), ACCESS_TOKEN_MAX_AGE))
    }

    pub fn clear_player(&self, jar: CookieJar) -> CookieJar {
        jar.add(self.expire(PLAYER_TOKEN_COOKIE))
    }
}

/// Value of a cookie, treating an empty value as absent.
pub fn cookie_value(jar: &CookieJar, name: &str) -> Option<String> {
    jar.get(name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}
