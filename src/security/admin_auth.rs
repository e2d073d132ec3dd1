use crate::config::Config;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use ipnetwork::IpNetwork;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{info, warn};

/// Guards the `/admin` routes: bearer token plus source network allowlist.
#[derive(Clone)]
pub struct AdminAuthConfig {
    pub admin_token: Option<String>,
    pub allowed_ips: Vec<IpNetwork>,
    /// Peers whose `X-Forwarded-For` / `X-Real-IP` headers are believed.
    pub trusted_proxies: Vec<IpNetwork>,
}

impl AdminAuthConfig {
    pub fn new(admin_token: Option<String>, allowed_ips: Vec<IpNetwork>) -> Self {
        Self {
            admin_token,
            allowed_ips,
            trusted_proxies: Vec::new(),
        }
    }

    pub fn with_trusted_proxies(mut self, trusted_proxies: Vec<IpNetwork>) -> Self {
        self.trusted_proxies = trusted_proxies;
        self
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.admin_token.clone(), config.allowed_admin_ips.clone())
            .with_trusted_proxies(config.trusted_proxies.clone())
    }

    pub fn is_enabled(&self) -> bool {
        self.admin_token.is_some()
    }

    /// Decide whether a request from `source_ip` carrying `headers` may
    /// reach an admin handler.
    fn authorize(&self, source_ip: IpAddr, headers: &HeaderMap) -> Result<(), StatusCode> {
        let Some(expected) = &self.admin_token else {
            warn!("Admin endpoint called but ADMIN_TOKEN is not set");
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        };

        if !is_ip_allowed(&self.allowed_ips, source_ip) {
            warn!("Admin request from {} outside {:?}", source_ip, self.allowed_ips);
            return Err(StatusCode::FORBIDDEN);
        }

        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .ok_or_else(|| {
                warn!("Admin request from {} without a bearer token", source_ip);
                StatusCode::UNAUTHORIZED
            })?;

        if !constant_time_compare(token, expected) {
            warn!("Invalid admin token from {}", source_ip);
            return Err(StatusCode::UNAUTHORIZED);
        }

        Ok(())
    }
}

pub async fn admin_auth_middleware(
    State(config): State<Arc<AdminAuthConfig>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let source_ip = client_ip(req.headers(), addr.ip(), &config.trusted_proxies);
    config.authorize(source_ip, req.headers())?;

    info!("Admin authenticated from {}", source_ip);
    // Handlers can read the caller for audit logs.
    req.extensions_mut().insert(source_ip);

    Ok(next.run(req).await)
}

/// The caller's address: X-Forwarded-For, then X-Real-IP, then the peer.
/// The headers only count when the direct peer is one of `trusted_proxies`.
fn client_ip(headers: &HeaderMap, peer: IpAddr, trusted_proxies: &[IpNetwork]) -> IpAddr {
    if !trusted_proxies.iter().any(|proxy| proxy.contains(peer)) {
        return peer;
    }

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next());
    let real_ip = headers.get("x-real-ip").and_then(|v| v.to_str().ok());

    forwarded
        .into_iter()
        .chain(real_ip)
        .find_map(|s| s.trim().parse().ok())
        .unwrap_or(peer)
}

fn is_ip_allowed(allowed_networks: &[IpNetwork], ip: IpAddr) -> bool {
    ip.is_loopback() || allowed_networks.iter().any(|network| network.contains(ip))
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::str::FromStr;

    fn config() -> AdminAuthConfig {
        AdminAuthConfig::new(
            Some("secret123".to_string()),
            vec![IpNetwork::from_str("10.0.1.0/24").unwrap()],
        )
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("secret123", "secret123"));
        assert!(!constant_time_compare("secret123", "secret124"));
        assert!(!constant_time_compare("short", "longer"));
    }

    #[test]
    fn test_is_ip_allowed() {
        let allowed = vec![IpNetwork::from_str("10.0.1.0/24").unwrap()];
        assert!(is_ip_allowed(&allowed, "127.0.0.1".parse().unwrap()));
        assert!(is_ip_allowed(&allowed, "::1".parse().unwrap()));
        assert!(is_ip_allowed(&allowed, "10.0.1.254".parse().unwrap()));
        assert!(!is_ip_allowed(&allowed, "10.0.2.1".parse().unwrap()));
        assert!(!is_ip_allowed(&allowed, "8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn test_client_ip_precedence() {
        let proxies = vec![IpNetwork::from_str("192.168.1.0/24").unwrap()];
        let peer: IpAddr = "192.168.1.1".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, peer, &proxies), peer);

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.1.9"));
        assert_eq!(
            client_ip(&headers, peer, &proxies),
            "10.0.1.9".parse::<IpAddr>().unwrap()
        );

        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.1.5, 172.16.0.1"));
        assert_eq!(
            client_ip(&headers, peer, &proxies),
            "10.0.1.5".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_forwarding_headers_from_untrusted_peer_are_ignored() {
        let peer: IpAddr = "8.8.8.8".parse().unwrap();
        let mut headers = bearer("secret123");
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.1.5"));
        headers.insert("x-real-ip", HeaderValue::from_static("127.0.0.1"));

        assert_eq!(client_ip(&headers, peer, &[]), peer);

        let proxies = vec![IpNetwork::from_str("192.168.1.0/24").unwrap()];
        let source_ip = client_ip(&headers, peer, &proxies);
        assert_eq!(source_ip, peer);
        assert_eq!(config().authorize(source_ip, &headers), Err(StatusCode::FORBIDDEN));
    }

    #[test]
    fn test_trusted_proxies_default_to_none() {
        let proxies = vec![IpNetwork::from_str("172.18.0.0/16").unwrap()];
        let auth = config().with_trusted_proxies(proxies.clone());
        assert_eq!(auth.trusted_proxies, proxies);
        assert!(AdminAuthConfig::new(None, vec![]).trusted_proxies.is_empty());
    }

    #[test]
    fn test_authorize() {
        let inside: IpAddr = "10.0.1.5".parse().unwrap();
        let outside: IpAddr = "8.8.8.8".parse().unwrap();

        assert_eq!(config().authorize(inside, &bearer("secret123")), Ok(()));
        assert_eq!(
            config().authorize(inside, &bearer("wrong")),
            Err(StatusCode::UNAUTHORIZED)
        );
        assert_eq!(
            config().authorize(inside, &HeaderMap::new()),
            Err(StatusCode::UNAUTHORIZED)
        );
        assert_eq!(
            config().authorize(outside, &bearer("secret123")),
            Err(StatusCode::FORBIDDEN)
        );

        let disabled = AdminAuthConfig::new(None, vec![]);
        assert!(!disabled.is_enabled());
        assert_eq!(
            disabled.authorize(inside, &bearer("secret123")),
            Err(StatusCode::SERVICE_UNAVAILABLE)
        );
    }
}
