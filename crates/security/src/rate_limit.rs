//! Per-caller sliding window with lockout.
//!
//! Each key moves through three states:
//!
//! - **open**: attempts within the current window are at or below the limit;
//! - **locked**: the limit was exceeded, every call is refused until
//!   `locked_until`;
//! - back to **open** once the lockout elapses, with a fresh window.
//!
//! The check-and-increment runs under the map shard's entry lock, so two
//! concurrent callers on the same key can never both observe the same count.

use std::sync::atomic::{AtomicU64, Ordering};

use {
    dashmap::{DashMap, mapref::entry::Entry},
    serde::Serialize,
    tracing::{debug, warn},
    warren_common::time::now_ms,
    warren_config::RateLimitConfig,
};

const CLEANUP_EVERY_CHECKS: u64 = 512;

/// State kept per caller key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRecord {
    pub attempts: u32,
    pub window_start: u64,
    /// Zero unless a lockout is active.
    pub locked_until: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Denied { retry_after_ms: u64 },
}

impl RateDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    records: DashMap<String, RateLimitRecord>,
    checks_seen: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            records: DashMap::new(),
            checks_seen: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Record an attempt for `key` now. Returns false when refused.
    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, now_ms()).is_allowed()
    }

    pub fn check_at(&self, key: &str, now: u64) -> RateDecision {
        if self.config.max_attempts == 0 {
            return RateDecision::Denied {
                retry_after_ms: self.config.window_ms.max(1),
            };
        }

        let decision = match self.records.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => self.advance(occupied.get_mut(), key, now),
            Entry::Vacant(vacant) => {
                let mut record = vacant.insert(RateLimitRecord {
                    attempts: 0,
                    window_start: now,
                    locked_until: 0,
                });
                self.advance(record.value_mut(), key, now)
            },
        };

        self.cleanup_if_needed(now);
        decision
    }

    fn advance(&self, record: &mut RateLimitRecord, key: &str, now: u64) -> RateDecision {
        if record.locked_until != 0 {
            if now < record.locked_until {
                return RateDecision::Denied {
                    retry_after_ms: record.locked_until - now,
                };
            }
            debug!(key, "rate limit lockout expired");
            *record = RateLimitRecord {
                attempts: 0,
                window_start: now,
                locked_until: 0,
            };
        } else if now.saturating_sub(record.window_start) >= self.config.window_ms {
            record.attempts = 0;
            record.window_start = now;
        }

        record.attempts += 1;
        if record.attempts > self.config.max_attempts {
            record.locked_until = now + self.config.lockout_ms.max(1);
            warn!(
                key,
                attempts = record.attempts,
                lockout_ms = self.config.lockout_ms,
                "rate limit exceeded, caller locked out"
            );
            return RateDecision::Denied {
                retry_after_ms: record.locked_until - now,
            };
        }
        RateDecision::Allowed
    }

    /// Snapshot of the record for `key`, if any.
    pub fn record(&self, key: &str) -> Option<RateLimitRecord> {
        self.records.get(key).map(|r| *r)
    }

    /// Forget a caller, e.g. after an operator unlock.
    pub fn reset(&self, key: &str) {
        self.records.remove(key);
    }

    fn cleanup_if_needed(&self, now: u64) {
        let seen = self.checks_seen.fetch_add(1, Ordering::Relaxed) + 1;
        if !seen.is_multiple_of(CLEANUP_EVERY_CHECKS) {
            return;
        }
        let window = self.config.window_ms;
        self.records.retain(|_, r| {
            r.locked_until > now || now.saturating_sub(r.window_start) < window.saturating_mul(3)
        });
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::sync::Arc};

    fn limiter(max_attempts: u32, window_ms: u64, lockout_ms: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_attempts,
            window_ms,
            lockout_ms,
        })
    }

    #[test]
    fn fourth_call_locks_then_recovers() {
        let rl = limiter(3, 1000, 5000);
        let t0 = 1_000_000;
        assert!(rl.check_at("ip:1", t0).is_allowed());
        assert!(rl.check_at("ip:1", t0 + 10).is_allowed());
        assert!(rl.check_at("ip:1", t0 + 20).is_allowed());

        let t = t0 + 30;
        assert_eq!(rl.check_at("ip:1", t), RateDecision::Denied {
            retry_after_ms: 5000
        });
        assert_eq!(rl.record("ip:1").unwrap().locked_until, t + 5000);

        // Still locked just before the lockout ends.
        assert!(!rl.check_at("ip:1", t + 4999).is_allowed());

        assert!(rl.check_at("ip:1", t + 5001).is_allowed());
        let rec = rl.record("ip:1").unwrap();
        assert_eq!(rec.attempts, 1);
        assert_eq!(rec.locked_until, 0);
        assert_eq!(rec.window_start, t + 5001);
    }

    #[test]
    fn window_expiry_resets_attempts() {
        let rl = limiter(2, 1000, 5000);
        assert!(rl.check_at("k", 0).is_allowed());
        assert!(rl.check_at("k", 500).is_allowed());
        assert!(rl.check_at("k", 1000).is_allowed());
        assert_eq!(rl.record("k").unwrap().attempts, 1);
    }

    #[test]
    fn keys_are_independent() {
        let rl = limiter(1, 1000, 5000);
        assert!(rl.check_at("a", 0).is_allowed());
        assert!(!rl.check_at("a", 1).is_allowed());
        assert!(rl.check_at("b", 1).is_allowed());
    }

    #[test]
    fn denied_calls_during_lockout_do_not_extend_it() {
        let rl = limiter(1, 1000, 100);
        assert!(rl.check_at("k", 0).is_allowed());
        assert!(!rl.check_at("k", 1).is_allowed());
        assert!(!rl.check_at("k", 50).is_allowed());
        assert_eq!(rl.record("k").unwrap().locked_until, 101);
    }

    #[test]
    fn zero_max_denies_everything() {
        let rl = limiter(0, 1000, 100);
        assert!(!rl.check_at("k", 0).is_allowed());
    }

    #[test]
    fn concurrent_checks_lose_no_increments() {
        let rl = Arc::new(limiter(50, 60_000, 60_000));
        let allowed = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    let rl = Arc::clone(&rl);
                    s.spawn(move || {
                        (0..20)
                            .filter(|_| rl.check_at("shared", 1).is_allowed())
                            .count()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .sum::<usize>()
        });
        assert_eq!(allowed, 50);
        assert_eq!(rl.record("shared").unwrap().attempts, 51);
    }

    #[test]
    fn reset_forgets_caller() {
        let rl = limiter(1, 1000, 5000);
        rl.check_at("k", 0);
        rl.check_at("k", 1);
        rl.reset("k");
        assert!(rl.check_at("k", 2).is_allowed());
    }
}
