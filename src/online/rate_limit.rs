use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Hosts remembered at once. A host that falls out simply gets no wait.
const MAX_TRACKED_HOSTS: usize = 256;

/// Keeps requests to the same host at least `interval` apart.
///
/// Each call reserves the next free slot for its host and sleeps until it.
/// Reservations are handed out under the lock, so concurrent callers for one
/// host queue up in call order instead of racing for the same slot.
pub struct HostRateLimiter {
    interval: Duration,
    next_slot: Mutex<LruCache<String, Instant>>,
}

impl HostRateLimiter {
    pub fn new(interval: Duration) -> Self {
        let capacity = NonZeroUsize::new(MAX_TRACKED_HOSTS).unwrap_or(NonZeroUsize::MIN);
        Self {
            interval,
            next_slot: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Wait for this host's turn.
    pub async fn acquire(&self, host: &str) {
        if self.interval.is_zero() {
            return;
        }

        let slot = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match slots.get(host) {
                Some(next) if *next > now => *next,
                _ => now,
            };
            slots.put(host.to_string(), slot + self.interval);
            slot
        };

        if slot > Instant::now() {
            tracing::debug!(host = %host, wait_ms = (slot - Instant::now()).as_millis() as u64, "Rate limiting");
        }
        tokio::time::sleep_until(slot).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_same_host_is_spaced() {
        let limiter = HostRateLimiter::new(Duration::from_secs(2));
        let start = Instant::now();

        limiter.acquire("example.com").await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.acquire("example.com").await;
        assert!(start.elapsed() >= Duration::from_secs(2));

        limiter.acquire("example.com").await;
        assert!(start.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hosts_are_independent() {
        let limiter = HostRateLimiter::new(Duration::from_secs(2));
        let start = Instant::now();

        limiter.acquire("a.example").await;
        limiter.acquire("b.example").await;
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_get_distinct_slots() {
        let limiter = HostRateLimiter::new(Duration::from_secs(1));
        let start = Instant::now();

        let (a, b, c) = tokio::join!(
            async {
                limiter.acquire("h").await;
                start.elapsed()
            },
            async {
                limiter.acquire("h").await;
                start.elapsed()
            },
            async {
                limiter.acquire("h").await;
                start.elapsed()
            },
        );

        let mut waits = [a, b, c];
        waits.sort();
        assert!(waits[1] >= Duration::from_secs(1));
        assert!(waits[2] >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_never_waits() {
        let limiter = HostRateLimiter::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire("h").await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
