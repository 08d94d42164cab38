//! Fixed-window request limiting per client IP.
//!
//! Each IP gets a counter that resets when its window expires. The limit
//! applies to `/api/*` routes only; `/health` stays outside so load balancer
//! probes are never throttled.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::server::error::ApiError;
use crate::server::state::SharedState;

struct WindowEntry {
    count: u64,
    window_start: Instant,
}

pub struct RateLimiter {
    window: Duration,
    max_requests: u64,
    entries: Mutex<HashMap<String, WindowEntry>>,
}

impl RateLimiter {
    pub fn new(window_secs: u64, max_requests: u64) -> Self {
        Self {
            window: Duration::from_secs(window_secs),
            max_requests,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Count one request from `ip`. Returns `Err(retry_after_secs)` when the
    /// window's budget is spent.
    pub fn check(&self, ip: &str) -> Result<(), u64> {
        let now = Instant::now();
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let entry = entries.entry(ip.to_string()).or_insert(WindowEntry {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) >= self.window {
            entry.count = 0;
            entry.window_start = now;
        }

        if entry.count >= self.max_requests {
            let elapsed = now.duration_since(entry.window_start);
            let remaining = self.window.saturating_sub(elapsed);
            return Err(remaining.as_secs().max(1));
        }

        entry.count += 1;
        Ok(())
    }

    /// Drop entries whose window has fully expired. Called periodically so
    /// the map does not grow with every IP ever seen.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.retain(|_, entry| now.duration_since(entry.window_start) < self.window);
    }
}

/// Client IP for rate limiting: first entry of `x-forwarded-for`, then
/// `x-real-ip`, then the socket peer address.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }
    match peer {
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}

pub async fn rate_limit_middleware(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let ip = client_ip(request.headers(), peer);

    let allowed = {
        let st = state.lock().await;
        st.limiter.check(&ip)
    };
    match allowed {
        Ok(()) => next.run(request).await,
        Err(retry_after) => ApiError::too_many_requests(retry_after).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_limit_then_blocks() {
        let limiter = RateLimiter::new(900, 3);
        assert!(limiter.check("1.2.3.4").is_ok());
        assert!(limiter.check("1.2.3.4").is_ok());
        assert!(limiter.check("1.2.3.4").is_ok());
        let retry_after = limiter.check("1.2.3.4").unwrap_err();
        assert!(retry_after >= 1);
    }

    #[test]
    fn limits_are_per_ip() {
        let limiter = RateLimiter::new(900, 1);
        assert!(limiter.check("1.1.1.1").is_ok());
        assert!(limiter.check("2.2.2.2").is_ok());
        assert!(limiter.check("1.1.1.1").is_err());
    }

    #[test]
    fn window_expiry_resets_the_count() {
        let limiter = RateLimiter::new(0, 1);
        assert!(limiter.check("1.2.3.4").is_ok());
        std::thread::sleep(Duration::from_millis(5));
        assert!(limiter.check("1.2.3.4").is_ok());
    }

    #[test]
    fn cleanup_drops_expired_entries() {
        let limiter = RateLimiter::new(0, 1);
        limiter.check("1.2.3.4").ok();
        std::thread::sleep(Duration::from_millis(5));
        limiter.cleanup();
        assert!(limiter.entries.lock().unwrap().is_empty());
    }

    #[test]
    fn forwarded_header_wins_over_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.9, 172.16.0.1".parse().unwrap());
        let peer: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(peer)), "10.0.0.9");
    }

    #[test]
    fn real_ip_header_is_second_choice() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "10.0.0.7".parse().unwrap());
        assert_eq!(client_ip(&headers, None), "10.0.0.7");
    }

    #[test]
    fn peer_address_is_the_fallback() {
        let peer: SocketAddr = "192.168.1.5:1234".parse().unwrap();
        assert_eq!(client_ip(&HeaderMap::new(), Some(peer)), "192.168.1.5");
        assert_eq!(client_ip(&HeaderMap::new(), None), "unknown");
    }
}
