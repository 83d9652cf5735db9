use std::time::Duration;

use herald_core::DisconnectReason;
use herald_settings::ReconnectSettings;

/// Retry budget and delay schedule for automatic reconnects.
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    /// Automatic retries allowed before the session is parked in `failed`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
    /// Floor for the delay after a rate-limited close.
    pub rate_limit_min_delay: Duration,
    /// Auth rejections tolerated before giving up.
    pub auth_retry_limit: u32,
    pub wipe_on_auth_exhausted: bool,
    /// Upper bound on `ProtocolClient::connect`.
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectSettings::default())
    }
}

impl From<&ReconnectSettings> for ReconnectPolicy {
    fn from(s: &ReconnectSettings) -> Self {
        Self {
            max_retries: s.max_retries,
            base_delay: s.base_delay(),
            max_delay: s.max_delay(),
            jitter_factor: s.jitter_factor,
            rate_limit_min_delay: s.rate_limit_min_delay(),
            auth_retry_limit: s.auth_retry_limit,
            wipe_on_auth_exhausted: s.wipe_on_auth_exhausted,
            connect_timeout: s.connect_timeout(),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `retry` (1-based) after a close for `reason`.
    ///
    /// `base * 2^(retry-1)`, capped at `max_delay`, with ± jitter and a 100ms
    /// floor. Rate-limited closes never wait less than `rate_limit_min_delay`.
    pub fn delay_for(&self, retry: u32, reason: DisconnectReason) -> Duration {
        let exponent = retry.saturating_sub(1).min(31) as i32;
        let exp_delay = self.base_delay.as_millis() as f64 * 2.0_f64.powi(exponent);
        let capped = exp_delay.min(self.max_delay.as_millis() as f64);

        // delay * (1 ± jitter_factor)
        let jitter_range = capped * self.jitter_factor;
        let jitter = (random_u64() % (jitter_range as u64 * 2 + 1)) as f64 - jitter_range;
        let final_ms = (capped + jitter).max(100.0);

        let delay = Duration::from_millis(final_ms as u64);
        if reason == DisconnectReason::RateLimited {
            delay.max(self.rate_limit_min_delay)
        } else {
            delay
        }
    }
}

/// Simple non-cryptographic random u64 using thread-local state.
fn random_u64() -> u64 {
    use std::cell::Cell;
    use std::time::SystemTime;

    thread_local! {
        static STATE: Cell<u64> = Cell::new(
            SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64
                | 1
        );
    }

    STATE.with(|s| {
        // xorshift64
        let mut x = s.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        s.set(x);
        x
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base_ms: u64, max_ms: u64) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            jitter_factor: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn exponential_growth() {
        let p = policy(1_000, 60_000);
        let t = DisconnectReason::Transient;
        assert_eq!(p.delay_for(1, t), Duration::from_secs(1));
        assert_eq!(p.delay_for(2, t), Duration::from_secs(2));
        assert_eq!(p.delay_for(3, t), Duration::from_secs(4));
    }

    #[test]
    fn capped_at_max() {
        let p = policy(2_000, 30_000);
        assert_eq!(p.delay_for(10, DisconnectReason::Unknown), Duration::from_secs(30));
        assert_eq!(p.delay_for(u32::MAX, DisconnectReason::Unknown), Duration::from_secs(30));
    }

    #[test]
    fn floor_of_100ms() {
        let p = policy(10, 10);
        assert_eq!(p.delay_for(1, DisconnectReason::Transient), Duration::from_millis(100));
    }

    #[test]
    fn rate_limited_waits_at_least_minimum() {
        let p = ReconnectPolicy {
            rate_limit_min_delay: Duration::from_secs(60),
            ..policy(1_000, 30_000)
        };
        assert_eq!(p.delay_for(1, DisconnectReason::RateLimited), Duration::from_secs(60));
        assert_eq!(p.delay_for(1, DisconnectReason::Transient), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_band() {
        let p = ReconnectPolicy {
            jitter_factor: 0.2,
            ..policy(10_000, 60_000)
        };
        for _ in 0..200 {
            let d = p.delay_for(1, DisconnectReason::Transient).as_millis();
            assert!((8_000..=12_000).contains(&d), "out of band: {d}");
        }
    }

    #[test]
    fn built_from_settings() {
        let p = ReconnectPolicy::default();
        assert_eq!(p.max_retries, 5);
        assert_eq!(p.base_delay, Duration::from_secs(2));
        assert_eq!(p.max_delay, Duration::from_secs(30));
        assert_eq!(p.auth_retry_limit, 2);
    }
}
