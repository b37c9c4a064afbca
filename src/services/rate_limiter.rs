//! Per-IP token buckets, one table per route tier.

use axum::http::Method;
use dashmap::DashMap;
use std::{
    net::IpAddr,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    General,
    Auth,
    Upload,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::General => "general",
            Tier::Auth => "auth",
            Tier::Upload => "upload",
        }
    }
}

/// `capacity` requests per `period`, refilled continuously.
#[derive(Debug, Clone, Copy)]
pub struct TierLimit {
    pub capacity: u32,
    pub period: Duration,
}

impl TierLimit {
    pub fn per_minute(capacity: u32) -> Self {
        Self {
            capacity,
            period: Duration::from_secs(60),
        }
    }

    fn refill_per_sec(&self) -> f64 {
        self.capacity as f64 / self.period.as_secs_f64().max(f64::MIN_POSITIVE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    updated: Instant,
}

struct TierTable {
    limit: TierLimit,
    buckets: DashMap<IpAddr, TokenBucket>,
}

impl TierTable {
    fn new(limit: TierLimit) -> Self {
        Self {
            limit,
            buckets: DashMap::new(),
        }
    }

    fn check(&self, ip: IpAddr, now: Instant) -> Admission {
        let capacity = self.limit.capacity as f64;
        if self.limit.capacity == 0 {
            return Admission::Allowed {
                remaining: u32::MAX,
            };
        }
        let rate = self.limit.refill_per_sec();

        // The entry guard holds the shard lock, so refill and take are atomic.
        let mut bucket = self.buckets.entry(ip).or_insert(TokenBucket {
            tokens: capacity,
            updated: now,
        });
        let elapsed = now.saturating_duration_since(bucket.updated).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate).min(capacity);
        bucket.updated = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Admission::Allowed {
                remaining: bucket.tokens.floor() as u32,
            }
        } else {
            let missing = 1.0 - bucket.tokens;
            Admission::Limited {
                retry_after: Duration::from_secs_f64(missing / rate),
            }
        }
    }
}

pub struct RateLimiter {
    general: TierTable,
    auth: TierTable,
    upload: TierTable,
    idle_ttl: Duration,
}

impl RateLimiter {
    pub fn new(general: TierLimit, auth: TierLimit, upload: TierLimit) -> Self {
        // A bucket idle for a full period is back at capacity, so dropping it
        // is indistinguishable from keeping it.
        let idle_ttl = [general.period, auth.period, upload.period]
            .into_iter()
            .max()
            .unwrap_or(Duration::from_secs(60));
        Self {
            general: TierTable::new(general),
            auth: TierTable::new(auth),
            upload: TierTable::new(upload),
            idle_ttl,
        }
    }

    fn table(&self, tier: Tier) -> &TierTable {
        match tier {
            Tier::General => &self.general,
            Tier::Auth => &self.auth,
            Tier::Upload => &self.upload,
        }
    }

    pub fn check(&self, tier: Tier, ip: IpAddr) -> Admission {
        self.check_at(tier, ip, Instant::now())
    }

    pub fn check_at(&self, tier: Tier, ip: IpAddr, now: Instant) -> Admission {
        self.table(tier).check(ip, now)
    }

    /// Drop buckets untouched for longer than the idle window.
    pub fn evict_idle_at(&self, now: Instant) -> usize {
        let mut evicted = 0;
        for table in [&self.general, &self.auth, &self.upload] {
            let before = table.buckets.len();
            table
                .buckets
                .retain(|_, bucket| now.saturating_duration_since(bucket.updated) < self.idle_ttl);
            evicted += before.saturating_sub(table.buckets.len());
        }
        evicted
    }

    pub fn tracked_ips(&self) -> usize {
        self.general.buckets.len() + self.auth.buckets.len() + self.upload.buckets.len()
    }

    /// Periodically evict idle buckets.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let evicted = self.evict_idle_at(Instant::now());
                if evicted > 0 {
                    debug!("rate limiter evicted {} idle buckets", evicted);
                }
            }
        })
    }
}

/// Which tier a request is charged against; `None` for unmetered routes.
pub fn classify(method: &Method, path: &str, query: Option<&str>) -> Option<Tier> {
    if path.starts_with("/health/") || path == "/metrics" {
        return None;
    }
    if path == "/auth/login" {
        return Some(Tier::Auth);
    }
    if path.starts_with("/share/")
        && query.is_some_and(|q| q.split('&').any(|pair| pair.starts_with("password=")))
    {
        return Some(Tier::Auth);
    }
    if path == "/upload" || path == "/write" {
        return Some(Tier::Upload);
    }
    if matches!(*method, Method::PUT | Method::POST) {
        let object_path = path
            .strip_prefix("/api/v1/buckets/")
            .is_some_and(|rest| rest.trim_end_matches('/').contains('/'));
        if object_path {
            return Some(Tier::Upload);
        }
    }
    Some(Tier::General)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    #[test]
    fn third_request_in_window_is_limited() {
        let limiter = RateLimiter::new(
            TierLimit::per_minute(2),
            TierLimit::per_minute(2),
            TierLimit::per_minute(2),
        );
        let now = Instant::now();
        assert!(limiter.check_at(Tier::Auth, ip(1), now).is_allowed());
        assert!(limiter.check_at(Tier::Auth, ip(1), now).is_allowed());
        match limiter.check_at(Tier::Auth, ip(1), now) {
            Admission::Limited { retry_after } => {
                assert!(retry_after > Duration::from_secs(29));
                assert!(retry_after <= Duration::from_secs(30));
            }
            other => panic!("expected limit, got {:?}", other),
        }
        assert!(limiter.check_at(Tier::Auth, ip(2), now).is_allowed());
        assert!(limiter.check_at(Tier::General, ip(1), now).is_allowed());
    }

    #[test]
    fn tokens_refill_over_time() {
        let limiter = RateLimiter::new(
            TierLimit::per_minute(1),
            TierLimit::per_minute(1),
            TierLimit::per_minute(1),
        );
        let start = Instant::now();
        assert!(limiter.check_at(Tier::General, ip(1), start).is_allowed());
        assert!(!limiter.check_at(Tier::General, ip(1), start).is_allowed());
        let later = start + Duration::from_secs(61);
        assert!(limiter.check_at(Tier::General, ip(1), later).is_allowed());
    }

    #[test]
    fn zero_capacity_disables_tier() {
        let limiter = RateLimiter::new(
            TierLimit::per_minute(0),
            TierLimit::per_minute(1),
            TierLimit::per_minute(1),
        );
        let now = Instant::now();
        for _ in 0..1000 {
            assert!(limiter.check_at(Tier::General, ip(1), now).is_allowed());
        }
        assert_eq!(limiter.tracked_ips(), 0);
    }

    #[test]
    fn idle_buckets_are_evicted() {
        let limiter = RateLimiter::new(
            TierLimit::per_minute(5),
            TierLimit::per_minute(5),
            TierLimit::per_minute(5),
        );
        let now = Instant::now();
        limiter.check_at(Tier::General, ip(1), now);
        limiter.check_at(Tier::Upload, ip(2), now + Duration::from_secs(50));
        assert_eq!(limiter.evict_idle_at(now + Duration::from_secs(90)), 1);
        assert_eq!(limiter.tracked_ips(), 1);
    }

    #[test]
    fn route_classification() {
        assert_eq!(classify(&Method::POST, "/auth/login", None), Some(Tier::Auth));
        assert_eq!(
            classify(&Method::PUT, "/api/v1/buckets/photos/a.jpg", None),
            Some(Tier::Upload)
        );
        assert_eq!(
            classify(&Method::PUT, "/api/v1/buckets/photos", None),
            Some(Tier::General)
        );
        assert_eq!(classify(&Method::POST, "/upload", Some("path=/")), Some(Tier::Upload));
        assert_eq!(
            classify(&Method::GET, "/share/abc", Some("password=x")),
            Some(Tier::Auth)
        );
        assert_eq!(classify(&Method::GET, "/share/abc", None), Some(Tier::General));
        assert_eq!(classify(&Method::GET, "/health/live", None), None);
    }
}
