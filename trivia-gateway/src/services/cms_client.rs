use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use reqwest::{Client, Method};
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use service_core::observability::TracedClientExt;
use std::time::Duration;

use crate::config::CmsConfig;
use crate::models::cms::CmsRefreshResponse;
use crate::models::{CmsAuthResponse, CmsUser, TokenPair};

use super::error::GatewayError;

/// A CMS answer relayed back to the browser as-is.
#[derive(Debug, Clone)]
pub struct CmsResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl CmsResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

impl IntoResponse for CmsResponse {
    fn into_response(self) -> Response {
        if self.body.is_null() {
            return self.status.into_response();
        }
        (self.status, Json(self.body)).into_response()
    }
}

/// HTTP client for the headless CMS. Every call carries W3C trace context.
pub struct CmsClient {
    client: Client,
    config: CmsConfig,
}

impl CmsClient {
    pub fn new(config: CmsConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                GatewayError::Internal(anyhow::anyhow!("Failed to build CMS client: {}", e))
            })?;

        Ok(Self { client, config })
    }

    pub fn base_url(&self) -> &str {
        &self.config.url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.url, path)
    }

    pub async fn login_admin(
        &self,
        email: &str,
        password: &str,
    ) -> Result<CmsAuthResponse, GatewayError> {
        self.login(&self.config.admin_login_path, email, password).await
    }

    pub async fn login_player(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<CmsAuthResponse, GatewayError> {
        self.login(&self.config.player_login_path, identifier, password)
            .await
    }

    async fn login(
        &self,
        path: &str,
        identifier: &str,
        password: &str,
    ) -> Result<CmsAuthResponse, GatewayError> {
        let url = self.url(path);
        let response = self
            .client
            .traced_post(&url)
            .json(&json!({ "identifier": identifier, "password": password }))
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;

        let status = response.status();
        let body = read_body(response).await?;

        if matches!(
            status,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            tracing::debug!(
                status = %status,
                message = ?error_message(&body),
                "CMS rejected login"
            );
            return Err(GatewayError::InvalidCredentials);
        }

        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        parse_auth_payload(body)
    }

    /// Resolve the user behind an access token.
    pub async fn verify(&self, access_token: &str) -> Result<CmsUser, GatewayError> {
        let url = self.url(&self.config.verify_path);
        let response = self
            .client
            .traced_get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(GatewayError::TokenRejected);
        }

        let body = read_body(response).await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        // Some CMS versions wrap the user in `data`
        let user = match body.get("data") {
            Some(inner) if inner.is_object() => inner.clone(),
            _ => body,
        };

        serde_json::from_value(user)
            .map_err(|e| GatewayError::CmsUnavailable(format!("Unreadable user payload: {}", e)))
    }

    /// Exchange a refresh token for a new pair. The CMS may or may not rotate
    /// the refresh token; when it does not, the old one is kept.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, GatewayError> {
        let url = self.url(&self.config.refresh_path);
        let response = self
            .client
            .traced_post(&url)
            .json(&json!({ "refreshToken": refresh_token }))
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;

        let status = response.status();
        let body = read_body(response).await?;

        if status.is_client_error() {
            return Err(GatewayError::TokenRejected);
        }
        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        let parsed: CmsRefreshResponse = serde_json::from_value(body)
            .map_err(|e| {
                GatewayError::CmsUnavailable(format!("Unreadable refresh payload: {}", e))
            })?;

        Ok(TokenPair {
            access_token: parsed.jwt,
            refresh_token: parsed
                .refresh_token
                .unwrap_or_else(|| refresh_token.to_string()),
        })
    }

    /// Relay a request to the CMS. Without a caller token the configured API
    /// token, if any, is used.
    pub async fn forward(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        bearer: Option<&str>,
        body: Option<&Value>,
    ) -> Result<CmsResponse, GatewayError> {
        let mut url = self.url(path);
        if let Some(q) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(q);
        }

        let token = bearer.or_else(|| {
            self.config
                .api_token
                .as_ref()
                .map(|t| t.expose_secret().as_str())
        });

        let mut request = self
            .client
            .traced_request(method.clone(), &url)
            .maybe_bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| transport_error(&url, e))?;
        let status = response.status();
        let body = read_body(response).await?;

        if !status.is_success() {
            tracing::debug!(
                method = %method,
                path = %path,
                status = %status,
                message = ?error_message(&body),
                "CMS returned non-success status"
            );
        }

        Ok(CmsResponse { status, body })
    }
}

fn transport_error(url: &str, e: reqwest::Error) -> GatewayError {
    tracing::error!("Failed to reach CMS at {}: {}", url, e);
    if e.is_timeout() {
        GatewayError::CmsUnavailable("CMS request timed out".to_string())
    } else {
        GatewayError::CmsUnavailable("CMS request failed".to_string())
    }
}

async fn read_body(response: reqwest::Response) -> Result<Value, GatewayError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| GatewayError::CmsUnavailable(format!("Failed to read CMS response: {}", e)))?;

    if bytes.is_empty() {
        return Ok(Value::Null);
    }

    Ok(serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned())))
}

fn status_error(status: StatusCode, body: &Value) -> GatewayError {
    GatewayError::CmsStatus {
        status: status.as_u16(),
        message: error_message(body).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Upstream error")
                .to_string()
        }),
    }
}

/// Pull the human message out of the CMS error shapes:
/// `{error: {message}}`, `{error: "..."}` and `{message: "..."}`.
pub fn error_message(body: &Value) -> Option<String> {
    body.get("error")
        .and_then(|e| e.get("message").or(Some(e)))
        .and_then(Value::as_str)
        .or_else(|| body.get("message").and_then(Value::as_str))
        .map(str::to_string)
}

/// Accepts both `{jwt, refreshToken, user}` and the admin-API shape
/// `{data: {token, refreshToken, user}}`.
fn parse_auth_payload(body: Value) -> Result<CmsAuthResponse, GatewayError> {
    let normalised = match body.get("data") {
        Some(data) if data.get("token").is_some() => json!({
            "jwt": data["token"],
            "refreshToken": data.get("refreshToken").cloned().unwrap_or(Value::Null),
            "user": data["user"],
        }),
        _ => body,
    };

    serde_json::from_value(normalised)
        .map_err(|e| GatewayError::CmsUnavailable(format!("Unreadable login payload: {}", e)))
}
