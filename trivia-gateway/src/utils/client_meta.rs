use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use service_core::middleware::rate_limit::{client_ip, TrustedProxies};
use sha2::{Digest, Sha256};
use std::convert::Infallible;

use crate::models::ClientInfo;

/// Caller IP, user agent and device fingerprint, taken from the request.
/// The IP honours forwarded headers only from trusted proxies.
pub struct ClientMeta(pub ClientInfo);

#[axum::async_trait]
impl<S> FromRequestParts<S> for ClientMeta
where
    TrustedProxies: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let trusted = TrustedProxies::from_ref(state);
        let ip_address = client_ip(&parts.headers, &parts.extensions, &trusted)
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        Ok(ClientMeta(ClientInfo {
            ip_address,
            user_agent: header_str(&parts.headers, header::USER_AGENT.as_str())
                .unwrap_or("unknown")
                .to_string(),
            fingerprint: device_fingerprint(&parts.headers),
        }))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// SHA-256 over the headers a browser sends unchanged between requests.
/// IP is left out so mobile clients survive network hops.
pub fn device_fingerprint(headers: &HeaderMap) -> String {
    let mut hasher = Sha256::new();
    for name in [
        header::USER_AGENT.as_str(),
        header::ACCEPT_LANGUAGE.as_str(),
    ] {
        hasher.update(header_str(headers, name).unwrap_or_default().as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
