//! Fixed-window request limiting per client IP.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::error::ApiError;

/// Expired windows are swept once the table grows past this many clients.
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started: Instant,
}

pub struct RateLimiter {
    max: u32,
    window: Duration,
    entries: Mutex<HashMap<IpAddr, Window>>,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max,
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Counts one request from `ip`. Returns false once the client has used
    /// up its budget for the current window.
    pub fn check(&self, ip: IpAddr, now: Instant) -> bool {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if entries.len() > PRUNE_THRESHOLD {
            let window = self.window;
            entries.retain(|_, w| now.duration_since(w.started) < window);
        }

        let entry = entries.entry(ip).or_insert(Window { count: 0, started: now });
        if now.duration_since(entry.started) >= self.window {
            *entry = Window { count: 0, started: now };
        }

        if entry.count >= self.max {
            return false;
        }
        entry.count += 1;
        true
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or_default()
    }
}

pub async fn limit_requests(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // Requests built without connection info (tests, unix sockets) share
    // one bucket.
    let ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    if !limiter.check(ip, Instant::now()) {
        warn!("Rate limit exceeded for {}", ip);
        return Err(ApiError::TooManyRequests(
            "Too many requests from this IP, please try again later.".into(),
        ));
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn budget_is_per_client() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.check(ip(1), now));
        assert!(limiter.check(ip(1), now));
        assert!(!limiter.check(ip(1), now));
        assert!(limiter.check(ip(2), now));
    }

    #[test]
    fn window_resets() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let start = Instant::now();
        assert!(limiter.check(ip(1), start));
        assert!(!limiter.check(ip(1), start + Duration::from_secs(59)));
        assert!(limiter.check(ip(1), start + Duration::from_secs(60)));
    }

    #[test]
    fn expired_clients_are_pruned() {
        let limiter = RateLimiter::new(5, Duration::from_secs(1));
        let start = Instant::now();
        for n in 0..=PRUNE_THRESHOLD as u32 {
            limiter.check(IpAddr::V4(Ipv4Addr::from(n)), start);
        }
        assert_eq!(limiter.tracked(), PRUNE_THRESHOLD + 1);

        limiter.check(ip(1), start + Duration::from_secs(5));
        assert_eq!(limiter.tracked(), 1);
    }
}
