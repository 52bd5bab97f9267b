//! Fixed-window attempt counter keyed by client identifier.
//!
//! State lives in the process: limits are per instance and reset on restart.

use axum::http::HeaderMap;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::Clock;
use crate::models::RateLimitInfo;

/// Window length, attempt budget and the message shown once it is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max: u32,
    pub message: &'static str,
}

impl RateLimitConfig {
    pub const CAPTURE: RateLimitConfig = RateLimitConfig {
        window: Duration::from_secs(60 * 60),
        max: 3,
        message: "Muitas tentativas. Tente novamente em 1 hora.",
    };

    pub const CHECK_EMAIL: RateLimitConfig = RateLimitConfig {
        window: Duration::from_secs(15 * 60),
        max: 10,
        message: "Muitas verificações. Tente novamente em 15 minutos.",
    };

    pub const LINK_PROFILE: RateLimitConfig = RateLimitConfig {
        window: Duration::from_secs(60 * 60),
        max: 5,
        message: "Muitas tentativas de vinculação. Tente novamente em 1 hora.",
    };

    fn window_millis(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::CAPTURE
    }
}

/// Result of one check. Denial is a normal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Milliseconds since the Unix epoch at which the window resets.
    pub reset_time: i64,
}

impl RateLimitDecision {
    /// Whole seconds until the window resets, never less than one.
    pub fn retry_after_secs(&self, now_millis: i64) -> u64 {
        let millis = (self.reset_time - now_millis).max(0) as u64;
        millis.div_ceil(1000).max(1)
    }

    pub fn info(&self) -> RateLimitInfo {
        RateLimitInfo {
            remaining: self.remaining,
            reset_time: self.reset_time,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_time: i64,
}

/// In-process fixed-window rate limiter.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, Window>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Records one attempt for `identifier` and reports whether it is allowed.
    pub fn check(&self, identifier: &str, config: &RateLimitConfig) -> RateLimitDecision {
        let now = self.clock.now_millis();
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        windows.retain(|_, w| w.reset_time >= now);

        match windows.get_mut(identifier) {
            Some(window) if window.count >= config.max => RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_time: window.reset_time,
            },
            Some(window) => {
                window.count += 1;
                RateLimitDecision {
                    allowed: true,
                    remaining: config.max - window.count,
                    reset_time: window.reset_time,
                }
            }
            None => {
                let reset_time = now.saturating_add(config.window_millis());
                windows.insert(
                    identifier.to_string(),
                    Window {
                        count: 1,
                        reset_time,
                    },
                );
                RateLimitDecision {
                    allowed: true,
                    remaining: config.max.saturating_sub(1),
                    reset_time,
                }
            }
        }
    }

    /// Number of live windows currently tracked.
    pub fn tracked(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// Builds `ip-<first 50 chars of user agent>` from proxy headers, falling
/// back to the socket peer address and then to `unknown`.
pub fn client_identifier(headers: &HeaderMap, peer: Option<IpAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let ip = forwarded
        .map(str::to_string)
        .or_else(|| real_ip.map(str::to_string))
        .or_else(|| peer.map(|p| p.to_string()))
        .unwrap_or_else(|| "unknown".to_string());

    let user_agent: String = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .chars()
        .take(50)
        .collect();

    format!("{}-{}", ip, user_agent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use axum::http::HeaderValue;

    fn limiter() -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let limiter = RateLimiter::new(clock.clone());
        (clock, limiter)
    }

    const THREE_PER_SECOND: RateLimitConfig = RateLimitConfig {
        window: Duration::from_millis(1_000),
        max: 3,
        message: "slow down",
    };

    #[test]
    fn test_fourth_call_in_window_is_denied() {
        let (_, limiter) = limiter();
        let remaining: Vec<u32> = (0..3)
            .map(|_| limiter.check("ip-ua", &THREE_PER_SECOND))
            .map(|d| {
                assert!(d.allowed);
                d.remaining
            })
            .collect();
        assert_eq!(remaining, vec![2, 1, 0]);

        let denied = limiter.check("ip-ua", &THREE_PER_SECOND);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_time, 1_001_000);
    }

    #[test]
    fn test_new_window_after_reset_time() {
        let (clock, limiter) = limiter();
        for _ in 0..4 {
            limiter.check("ip-ua", &THREE_PER_SECOND);
        }
        clock.advance(1_001);

        let decision = limiter.check("ip-ua", &THREE_PER_SECOND);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
        assert_eq!(decision.reset_time, 1_002_001);
    }

    #[test]
    fn test_identifiers_are_independent() {
        let (_, limiter) = limiter();
        for _ in 0..3 {
            limiter.check("a", &THREE_PER_SECOND);
        }
        assert!(!limiter.check("a", &THREE_PER_SECOND).allowed);
        assert!(limiter.check("b", &THREE_PER_SECOND).allowed);
    }

    #[test]
    fn test_expired_windows_are_swept_on_any_call() {
        let (clock, limiter) = limiter();
        limiter.check("a", &THREE_PER_SECOND);
        limiter.check("b", &THREE_PER_SECOND);
        assert_eq!(limiter.tracked(), 2);

        clock.advance(5_000);
        limiter.check("c", &THREE_PER_SECOND);
        assert_eq!(limiter.tracked(), 1);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let decision = RateLimitDecision {
            allowed: false,
            remaining: 0,
            reset_time: 10_500,
        };
        assert_eq!(decision.retry_after_secs(9_000), 2);
        assert_eq!(decision.retry_after_secs(20_000), 1);
    }

    #[test]
    fn test_client_identifier_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        headers.insert("user-agent", HeaderValue::from_static("Mozilla/5.0"));
        assert_eq!(client_identifier(&headers, None), "203.0.113.7-Mozilla/5.0");
    }

    #[test]
    fn test_client_identifier_fallbacks() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_identifier(&headers, None), "unknown-");

        let peer: IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(client_identifier(&headers, Some(peer)), "127.0.0.1-");

        let long_ua = "x".repeat(80);
        headers.insert("user-agent", HeaderValue::from_str(&long_ua).unwrap());
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        let id = client_identifier(&headers, Some(peer));
        assert_eq!(id, format!("198.51.100.2-{}", "x".repeat(50)));
    }
}
