//! Sliding-window rate limiter with a distributed coordinator contract
//!
//! Per client key, the limiter keeps a window of request timestamps. The
//! four-step sequence (prune, count, decide, append with expiry) must be
//! atomic; a distributed deployment supplies that through a
//! [`WindowCoordinator`] backed by its store's pipeline primitive. When the
//! coordinator errors or is absent, an in-process window with identical
//! semantics takes over. Mode transitions are logged.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::Result;

/// Outcome of one atomic window slide
#[derive(Debug, Clone)]
pub struct WindowSlide {
    /// Whether the request was admitted (and its timestamp appended)
    pub allowed: bool,
    /// Requests in the window, including this one when admitted
    pub count: u32,
    /// Oldest timestamp still in the window
    pub oldest: Option<DateTime<Utc>>,
}

/// Atomic sliding-window operation against a (possibly remote) store
///
/// Implementations must perform prune + count + decide + append as one
/// atomic sequence per key, and expire idle keys after `window` plus a
/// small epsilon.
#[async_trait]
pub trait WindowCoordinator: Send + Sync {
    async fn slide(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        limit: u32,
    ) -> Result<WindowSlide>;

    fn name(&self) -> &'static str;
}

/// Shared window arithmetic over a timestamp deque
fn slide_deque(
    deque: &mut VecDeque<DateTime<Utc>>,
    now: DateTime<Utc>,
    window: Duration,
    limit: u32,
) -> WindowSlide {
    let window_start = now - window;
    while deque.front().map(|t| *t <= window_start).unwrap_or(false) {
        deque.pop_front();
    }

    let count = deque.len() as u32;
    if count >= limit {
        WindowSlide {
            allowed: false,
            count,
            oldest: deque.front().copied(),
        }
    } else {
        deque.push_back(now);
        WindowSlide {
            allowed: true,
            count: count + 1,
            oldest: deque.front().copied(),
        }
    }
}

/// Single-process coordinator: the same atomic sequence, guarded per key
///
/// Stands in for the distributed store in single-instance deployments and
/// doubles as the local fallback engine.
#[derive(Default)]
pub struct InProcessWindows {
    windows: DashMap<String, Arc<Mutex<VecDeque<DateTime<Utc>>>>>,
}

impl InProcessWindows {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slide_sync(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        limit: u32,
    ) -> WindowSlide {
        let cell = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
            .clone();
        let mut deque = cell.lock();
        let slide = slide_deque(&mut deque, now, window, limit);

        // Idle keys expire: empty windows are removed outright
        if deque.is_empty() {
            drop(deque);
            self.windows.remove_if(key, |_, v| v.lock().is_empty());
        }
        slide
    }

    pub fn key_count(&self) -> usize {
        self.windows.len()
    }
}

#[async_trait]
impl WindowCoordinator for InProcessWindows {
    async fn slide(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        limit: u32,
    ) -> Result<WindowSlide> {
        Ok(self.slide_sync(key, now, window, limit))
    }

    fn name(&self) -> &'static str {
        "in_process"
    }
}

/// Which engine served a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LimiterBackend {
    Distributed,
    Fallback,
}

impl LimiterBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimiterBackend::Distributed => "distributed",
            LimiterBackend::Fallback => "fallback",
        }
    }
}

/// Decision handed to the request edge
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// When the window frees up (oldest entry + window)
    pub reset: DateTime<Utc>,
    /// Seconds to wait, set on denial
    pub retry_after: Option<u64>,
    pub backend: LimiterBackend,
}

impl RateLimitDecision {
    /// Response headers for an HTTP front
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit".to_string(), self.limit.to_string()),
            (
                "X-RateLimit-Remaining".to_string(),
                self.remaining.to_string(),
            ),
            (
                "X-RateLimit-Reset".to_string(),
                self.reset.timestamp().to_string(),
            ),
            (
                "X-RateLimit-Backend".to_string(),
                self.backend.as_str().to_string(),
            ),
        ];
        if let Some(retry) = self.retry_after {
            headers.push(("Retry-After".to_string(), retry.to_string()));
        }
        headers
    }
}

/// Derive the client key: authenticated traffic keys on persona, anonymous
/// traffic on user agent
pub fn client_key(ip: &str, user_agent: &str, persona: Option<&str>) -> String {
    match persona {
        Some(p) => format!("{}:{}", ip, p),
        None => format!("{}:{}", ip, user_agent),
    }
}

/// Paths exempt from limiting
pub const EXEMPT_PATHS: &[&str] = &["/health", "/metrics"];

/// Sliding-window limiter with distributed coordination and local fallback
pub struct RateLimiter {
    coordinator: Option<Arc<dyn WindowCoordinator>>,
    fallback: InProcessWindows,
    limit: u32,
    window: Duration,
    using_fallback: AtomicBool,
}

impl RateLimiter {
    pub fn new(limit: u32, window_secs: u64) -> Self {
        Self {
            coordinator: None,
            fallback: InProcessWindows::new(),
            limit,
            window: Duration::seconds(window_secs.max(1) as i64),
            using_fallback: AtomicBool::new(true),
        }
    }

    /// Attach a distributed coordinator
    pub fn with_coordinator(mut self, coordinator: Arc<dyn WindowCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self.using_fallback.store(false, Ordering::SeqCst);
        self
    }

    pub fn is_exempt(path: &str) -> bool {
        EXEMPT_PATHS.iter().any(|p| path.starts_with(p))
    }

    /// True while decisions come from the in-process fallback
    pub fn using_fallback(&self) -> bool {
        self.using_fallback.load(Ordering::SeqCst)
    }

    /// Check a client key against the configured limit
    pub async fn check(&self, key: &str) -> RateLimitDecision {
        self.check_limit_at(key, self.limit, Utc::now()).await
    }

    /// Check with a caller-supplied limit (per-persona policies)
    pub async fn check_limit(&self, key: &str, limit: u32) -> RateLimitDecision {
        self.check_limit_at(key, limit, Utc::now()).await
    }

    /// Deterministic entry point used by tests
    pub async fn check_limit_at(
        &self,
        key: &str,
        limit: u32,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        if let Some(coordinator) = &self.coordinator {
            match coordinator.slide(key, now, self.window, limit).await {
                Ok(slide) => {
                    if self.using_fallback.swap(false, Ordering::SeqCst) {
                        tracing::info!(
                            coordinator = coordinator.name(),
                            "Rate limiter restored to distributed mode"
                        );
                    }
                    return self.decision(slide, limit, now, LimiterBackend::Distributed);
                }
                Err(e) => {
                    if !self.using_fallback.swap(true, Ordering::SeqCst) {
                        tracing::warn!(
                            error = %e,
                            "Rate limit coordinator unreachable, switching to local fallback"
                        );
                    }
                }
            }
        }

        let slide = self.fallback.slide_sync(key, now, self.window, limit);
        self.decision(slide, limit, now, LimiterBackend::Fallback)
    }

    fn decision(
        &self,
        slide: WindowSlide,
        limit: u32,
        now: DateTime<Utc>,
        backend: LimiterBackend,
    ) -> RateLimitDecision {
        let reset = slide
            .oldest
            .map(|t| t + self.window)
            .unwrap_or(now + self.window);

        if slide.allowed {
            RateLimitDecision {
                allowed: true,
                limit,
                remaining: limit.saturating_sub(slide.count),
                reset,
                retry_after: None,
                backend,
            }
        } else {
            let retry_after = (reset - now).num_seconds().max(0) as u64;
            RateLimitDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset,
                retry_after: Some(retry_after),
                backend,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_limit_enforced_in_window() {
        let limiter = RateLimiter::new(3, 60);
        let now = Utc::now();

        for expected_remaining in [2_u32, 1, 0] {
            let d = limiter.check_limit_at("client", 3, now).await;
            assert!(d.allowed);
            assert_eq!(d.remaining, expected_remaining);
        }

        let d = limiter.check_limit_at("client", 3, now).await;
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
        assert!(d.retry_after.unwrap() <= 60);
    }

    #[tokio::test]
    async fn test_window_slides() {
        let limiter = RateLimiter::new(2, 60);
        let start = Utc::now();

        assert!(limiter.check_limit_at("k", 2, start).await.allowed);
        assert!(limiter.check_limit_at("k", 2, start).await.allowed);
        assert!(!limiter.check_limit_at("k", 2, start).await.allowed);

        // Past the window, the key admits traffic again
        let later = start + Duration::seconds(61);
        assert!(limiter.check_limit_at("k", 2, later).await.allowed);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = RateLimiter::new(1, 60);
        let now = Utc::now();
        assert!(limiter.check_limit_at("a", 1, now).await.allowed);
        assert!(limiter.check_limit_at("b", 1, now).await.allowed);
        assert!(!limiter.check_limit_at("a", 1, now).await.allowed);
    }

    struct FailingCoordinator;

    #[async_trait]
    impl WindowCoordinator for FailingCoordinator {
        async fn slide(
            &self,
            _key: &str,
            _now: DateTime<Utc>,
            _window: Duration,
            _limit: u32,
        ) -> Result<WindowSlide> {
            Err(crate::error::MemoryError::BackendUnavailable(
                "coordinator down".into(),
            ))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_fallback_on_coordinator_failure() {
        let limiter = RateLimiter::new(2, 60).with_coordinator(Arc::new(FailingCoordinator));
        assert!(!limiter.using_fallback());

        let now = Utc::now();
        let d = limiter.check_limit_at("k", 2, now).await;
        assert!(d.allowed);
        assert_eq!(d.backend, LimiterBackend::Fallback);
        assert!(limiter.using_fallback());

        // Fallback still limits
        let _ = limiter.check_limit_at("k", 2, now).await;
        let d = limiter.check_limit_at("k", 2, now).await;
        assert!(!d.allowed);
    }

    #[tokio::test]
    async fn test_coordinator_mode_reported() {
        let limiter =
            RateLimiter::new(5, 60).with_coordinator(Arc::new(InProcessWindows::new()));
        let d = limiter.check_limit_at("k", 5, Utc::now()).await;
        assert_eq!(d.backend, LimiterBackend::Distributed);
        assert!(!limiter.using_fallback());
    }

    #[test]
    fn test_headers_on_denial() {
        let decision = RateLimitDecision {
            allowed: false,
            limit: 3,
            remaining: 0,
            reset: Utc::now(),
            retry_after: Some(42),
            backend: LimiterBackend::Fallback,
        };
        let headers = decision.headers();
        let names: Vec<&str> = headers.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"X-RateLimit-Limit"));
        assert!(names.contains(&"X-RateLimit-Remaining"));
        assert!(names.contains(&"X-RateLimit-Reset"));
        assert!(names.contains(&"X-RateLimit-Backend"));
        assert!(names.contains(&"Retry-After"));
    }

    #[test]
    fn test_client_key_shapes() {
        assert_eq!(
            client_key("10.0.0.1", "curl/8", None),
            "10.0.0.1:curl/8"
        );
        assert_eq!(
            client_key("10.0.0.1", "curl/8", Some("athena")),
            "10.0.0.1:athena"
        );
    }

    #[test]
    fn test_exempt_paths() {
        assert!(RateLimiter::is_exempt("/health"));
        assert!(RateLimiter::is_exempt("/metrics"));
        assert!(!RateLimiter::is_exempt("/api/memory"));
    }

    #[test]
    fn test_idle_keys_expire() {
        let windows = InProcessWindows::new();
        let now = Utc::now();
        windows.slide_sync("k", now, Duration::seconds(60), 5);
        assert_eq!(windows.key_count(), 1);

        // Once the window passes, the prune empties and removes the key
        let later = now + Duration::seconds(120);
        let slide = windows.slide_sync("k", later, Duration::seconds(60), 5);
        assert!(slide.allowed);
        assert_eq!(slide.count, 1);
    }
}
