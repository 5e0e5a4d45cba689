use crate::error::AppError;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{Extensions, HeaderMap},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};

/// Rate limiter keyed by client IP address
pub type IpRateLimiter = Arc<RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>>;

/// Create a keyed rate limiter allowing `attempts` requests per `window_seconds` per IP.
pub fn create_ip_rate_limiter(attempts: u32, window_seconds: u64) -> IpRateLimiter {
    let attempts = NonZeroU32::new(attempts.max(1)).unwrap_or(NonZeroU32::MIN);
    let period_ms = (window_seconds.max(1) * 1000) / u64::from(attempts.get());
    let quota = Quota::with_period(Duration::from_millis(period_ms.max(1)))
        .map(|q| q.allow_burst(attempts))
        .unwrap_or_else(|| Quota::per_second(attempts));

    Arc::new(RateLimiter::dashmap(quota))
}

/// Proxies whose `x-forwarded-for` / `x-real-ip` headers are believed.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies(Arc<Vec<IpAddr>>);

impl TrustedProxies {
    pub fn new(proxies: Vec<IpAddr>) -> Self {
        Self(Arc::new(proxies))
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.0.contains(ip)
    }
}

/// Limiter plus the proxy list used to pick the key. State for
/// [`ip_rate_limit_middleware`].
#[derive(Clone)]
pub struct IpRateLimit {
    pub limiter: IpRateLimiter,
    pub trusted_proxies: TrustedProxies,
}

impl IpRateLimit {
    pub fn new(limiter: IpRateLimiter, trusted_proxies: TrustedProxies) -> Self {
        Self {
            limiter,
            trusted_proxies,
        }
    }
}

/// Resolve the caller's IP from the socket peer address.
///
/// Forwarded headers are only honoured when the peer is a trusted proxy. In
/// that case `x-forwarded-for` is walked right to left, skipping further
/// trusted hops, then `x-real-ip` is tried. Without connect info there is no
/// peer and nothing is trusted.
pub fn client_ip(
    headers: &HeaderMap,
    extensions: &Extensions,
    trusted: &TrustedProxies,
) -> Option<IpAddr> {
    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())?;

    if !trusted.contains(&peer) {
        return Some(peer);
    }

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| {
            s.rsplit(',')
                .filter_map(|hop| hop.trim().parse::<IpAddr>().ok())
                .find(|ip| !trusted.contains(ip))
        });

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<IpAddr>().ok())
    };

    Some(forwarded.or_else(real_ip).unwrap_or(peer))
}

/// Middleware for IP-based rate limiting
pub async fn ip_rate_limit_middleware(
    State(limit): State<IpRateLimit>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    match client_ip(request.headers(), request.extensions(), &limit.trusted_proxies) {
        Some(ip) => match limit.limiter.check_key(&ip) {
            Ok(_) => Ok(next.run(request).await),
            Err(negative) => {
                let wait_time = negative.wait_time_from(DefaultClock::default().now());
                tracing::warn!(ip = %ip, path = %request.uri().path(), "Rate limit exceeded");
                Err(AppError::TooManyRequests(
                    "Too many requests from this IP. Please try again later.".to_string(),
                    Some(wait_time.as_secs().max(1)),
                ))
            }
        },
        None => {
            tracing::warn!("Could not determine IP for rate limiting");
            Ok(next.run(request).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, middleware::from_fn_with_state, routing::get, Router};
    use tower::ServiceExt;

    fn peer(ip: [u8; 4]) -> Extensions {
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(SocketAddr::from((ip, 9000))));
        extensions
    }

    fn proxies() -> TrustedProxies {
        TrustedProxies::new(vec!["10.0.0.1".parse().unwrap()])
    }

    #[test]
    fn forwarded_header_from_trusted_proxy_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());

        let ip = client_ip(&headers, &peer([10, 0, 0, 1]), &proxies()).unwrap();
        assert_eq!(ip.to_string(), "203.0.113.7");
    }

    #[test]
    fn rightmost_untrusted_hop_is_used() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "1.2.3.4, 203.0.113.7".parse().unwrap());

        let ip = client_ip(&headers, &peer([10, 0, 0, 1]), &proxies()).unwrap();
        assert_eq!(ip.to_string(), "203.0.113.7");
    }

    #[test]
    fn forwarded_header_from_untrusted_peer_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7".parse().unwrap());
        headers.insert("x-real-ip", "203.0.113.8".parse().unwrap());

        let ip = client_ip(&headers, &peer([192, 168, 1, 20]), &proxies()).unwrap();
        assert_eq!(ip.to_string(), "192.168.1.20");
    }

    #[test]
    fn no_peer_means_no_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7".parse().unwrap());

        assert_eq!(client_ip(&headers, &Extensions::new(), &proxies()), None);
    }

    #[tokio::test]
    async fn rotating_forwarded_for_does_not_reset_the_limit() {
        let limit = IpRateLimit::new(create_ip_rate_limiter(2, 60), proxies());
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(from_fn_with_state(limit, ip_rate_limit_middleware));

        let request = |forwarded: &str| {
            axum::http::Request::builder()
                .uri("/")
                .header("x-forwarded-for", forwarded)
                .extension(ConnectInfo(SocketAddr::from(([198, 51, 100, 4], 9000))))
                .body(Body::empty())
                .unwrap()
        };

        for hop in ["203.0.113.1", "203.0.113.2"] {
            let res = app.clone().oneshot(request(hop)).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }

        let res = app.oneshot(request("203.0.113.3")).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(res.headers().contains_key(axum::http::header::RETRY_AFTER));
    }
}
