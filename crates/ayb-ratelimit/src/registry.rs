//! Per-app token buckets grouped by rate tier.
//!
//! Every principal carries its own `appRateLimitRPS`; rather than one
//! `governor` keyed limiter per app (which would mean per-app `Quota`
//! objects we'd have to juggle by hand) apps sharing the same configured
//! rate share one [`DashMap`]-backed keyed limiter, following the
//! `RateLimiter::dashmap(quota)` / `check_key` shape of the teacher's
//! `feature-flags::api::flags_rate_limiter::KeyedRateLimiter` and
//! `capture::partition_limits::PartitionLimiter`.

use std::num::NonZeroU32;
use std::sync::Arc;

use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};

type Tier = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// The outcome of one rate-limit check, carrying everything needed for the
/// `X-App-RateLimit-*` response headers regardless of verdict.
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_seconds: u64,
}

pub struct RateLimiterRegistry {
    tiers: DashMap<u32, Arc<Tier>>,
    clock: DefaultClock,
}

impl Default for RateLimiterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self {
            tiers: DashMap::new(),
            clock: DefaultClock::default(),
        }
    }

    fn tier(&self, rps: u32) -> Arc<Tier> {
        if let Some(existing) = self.tiers.get(&rps) {
            return existing.clone();
        }
        let burst = NonZeroU32::new(rps.max(1)).expect("max(1) is never zero");
        let quota = Quota::per_second(burst).allow_burst(burst);
        self.tiers
            .entry(rps)
            .or_insert_with(|| Arc::new(RateLimiter::dashmap(quota)))
            .clone()
    }

    /// Take one token for `app_id` out of the bucket sized by `rps`. A
    /// `rps` of `0` is the caller's job to treat as "unlimited" — this
    /// registry always enforces whatever tier it's given.
    pub fn check(&self, app_id: &str, rps: u32) -> Decision {
        let tier = self.tier(rps);
        match tier.check_key(&app_id.to_string()) {
            Ok(()) => Decision {
                allowed: true,
                limit: rps,
                remaining: rps.saturating_sub(1),
                reset_seconds: 1,
            },
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                Decision {
                    allowed: false,
                    limit: rps,
                    remaining: 0,
                    reset_seconds: wait.as_secs().max(1),
                }
            }
        }
    }

    /// Evict buckets for apps that haven't made a request in a while,
    /// following the `retain_recent` sweep the teacher's workspace
    /// dependency on `governor`'s `dashmap` feature exists to support.
    pub fn sweep(&self) {
        for tier in self.tiers.iter() {
            tier.retain_recent();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_configured_burst_then_denies() {
        let registry = RateLimiterRegistry::new();
        assert!(registry.check("app-1", 2).allowed);
        assert!(registry.check("app-1", 2).allowed);
        let decision = registry.check("app-1", 2);
        assert!(!decision.allowed);
        assert_eq!(decision.limit, 2);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn isolates_buckets_per_app() {
        let registry = RateLimiterRegistry::new();
        assert!(registry.check("app-1", 1).allowed);
        assert!(!registry.check("app-1", 1).allowed);
        assert!(registry.check("app-2", 1).allowed);
    }
}
