use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::domain::UserId;

// ============== Authorization ==============

/// Empty allow-list means the bot answers anyone with a user id.
pub fn is_authorized(user_id: Option<UserId>, allowed_users: &[i64]) -> bool {
    let Some(user_id) = user_id else {
        return false;
    };
    if allowed_users.is_empty() {
        return true;
    }
    allowed_users.contains(&user_id.0)
}

// ============== Rate Limiter (Token Bucket) ==============

#[derive(Clone, Debug)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

#[derive(Clone, Debug)]
pub struct RateLimiter {
    enabled: bool,
    max_tokens: f64,
    refill_per_sec: f64,
    buckets: HashMap<UserId, Bucket>,
}

#[derive(Clone, Copy, Debug)]
pub struct RateLimitStatus {
    pub tokens: f64,
    pub max: f64,
    pub refill_per_sec: f64,
}

impl RateLimiter {
    pub fn new(enabled: bool, max_tokens: u32, window: Duration) -> Self {
        let max_tokens_f = max_tokens as f64;
        let window_secs = window.as_secs_f64().max(1e-9);

        Self {
            enabled,
            max_tokens: max_tokens_f,
            refill_per_sec: max_tokens_f / window_secs,
            buckets: HashMap::new(),
        }
    }

    pub fn check(&mut self, user_id: UserId) -> (bool, Option<Duration>) {
        self.check_at(user_id, Instant::now())
    }

    pub fn check_at(&mut self, user_id: UserId, now: Instant) -> (bool, Option<Duration>) {
        if !self.enabled {
            return (true, None);
        }

        let bucket = self.buckets.entry(user_id).or_insert_with(|| Bucket {
            tokens: self.max_tokens,
            last_update: now,
        });

        let elapsed = now.duration_since(bucket.last_update).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.max_tokens);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return (true, None);
        }

        let secs = (1.0 - bucket.tokens) / self.refill_per_sec;
        (false, Some(Duration::from_secs_f64(secs.max(0.0))))
    }

    pub fn status(&self, user_id: UserId) -> RateLimitStatus {
        let tokens = self
            .buckets
            .get(&user_id)
            .map(|b| b.tokens)
            .unwrap_or(self.max_tokens);

        RateLimitStatus {
            tokens,
            max: self.max_tokens,
            refill_per_sec: self.refill_per_sec,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_basic_refill() {
        let start = Instant::now();
        let mut rl = RateLimiter::new(true, 2, Duration::from_secs(10));
        let u = UserId(1);

        assert!(rl.check_at(u, start).0);
        assert!(rl.check_at(u, start).0);
        assert!(!rl.check_at(u, start).0);

        // After 5 seconds, we should have refilled 1 token (2 tokens / 10s).
        let (ok, _) = rl.check_at(u, start + Duration::from_secs(5));
        assert!(ok);
    }

    #[test]
    fn rate_limiter_reports_retry_delay() {
        let start = Instant::now();
        let mut rl = RateLimiter::new(true, 1, Duration::from_secs(10));
        let u = UserId(2);

        assert!(rl.check_at(u, start).0);
        let (ok, retry) = rl.check_at(u, start);
        assert!(!ok);
        let retry = retry.unwrap();
        assert!(retry > Duration::from_secs(9) && retry <= Duration::from_secs(10));
    }

    #[test]
    fn disabled_limiter_always_allows() {
        let mut rl = RateLimiter::new(false, 0, Duration::from_secs(1));
        assert!(rl.check(UserId(3)).0);
    }

    #[test]
    fn empty_allow_list_is_open() {
        assert!(is_authorized(Some(UserId(5)), &[]));
        assert!(!is_authorized(None, &[]));
    }

    #[test]
    fn allow_list_filters_users() {
        assert!(is_authorized(Some(UserId(5)), &[5, 6]));
        assert!(!is_authorized(Some(UserId(7)), &[5, 6]));
    }
}
