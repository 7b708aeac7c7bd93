use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Per-origin request spacing.
///
/// Every outgoing request first calls [`DomainThrottle::wait`] with the
/// request's origin. Two requests to the same origin never start less than
/// `interval` apart, including when issued from concurrent tasks: each
/// caller reserves the next free slot under the lock and sleeps outside it.
#[derive(Debug)]
pub struct DomainThrottle {
    interval: Duration,
    clock: Mutex<HashMap<String, Instant>>,
}

impl DomainThrottle {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            clock: Mutex::new(HashMap::new()),
        }
    }

    /// Blocks until a request to `origin` may start, then records it.
    pub async fn wait(&self, origin: &str) {
        let delay = {
            let mut clock = self.clock.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            let slot = match clock.get(origin) {
                Some(last) => (*last + self.interval).max(now),
                None => now,
            };
            clock.insert(origin.to_owned(), slot);
            slot - now
        };

        if !delay.is_zero() {
            tracing::trace!(origin = %origin, delay_ms = delay.as_millis() as u64, "Throttling request");
            tokio::time::sleep(delay).await;
        }
    }

    /// Start time of the most recent request recorded for `origin`.
    pub fn last_request(&self, origin: &str) -> Option<Instant> {
        let clock = self.clock.lock().unwrap_or_else(|e| e.into_inner());
        clock.get(origin).copied()
    }
}

impl Default for DomainThrottle {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_request_does_not_wait() {
        let throttle = DomainThrottle::default();
        let start = Instant::now();
        throttle.wait("https://a.example").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(throttle.last_request("https://a.example"), Some(start));
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_origin_spaced_by_interval() {
        let throttle = DomainThrottle::default();
        throttle.wait("https://a.example").await;
        let first = Instant::now();
        throttle.wait("https://a.example").await;
        assert!(first.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_wait_after_some_time_elapsed() {
        let throttle = DomainThrottle::default();
        throttle.wait("https://a.example").await;
        tokio::time::advance(Duration::from_millis(600)).await;
        let before = Instant::now();
        throttle.wait("https://a.example").await;
        let waited = before.elapsed();
        assert!(waited >= Duration::from_millis(400));
        assert!(waited < Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_wait_after_interval_elapsed() {
        let throttle = DomainThrottle::default();
        throttle.wait("https://a.example").await;
        tokio::time::advance(Duration::from_secs(3)).await;
        let before = Instant::now();
        throttle.wait("https://a.example").await;
        assert_eq!(before.elapsed(), Duration::ZERO);
        assert_eq!(throttle.last_request("https://a.example"), Some(before));
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_origins_independent() {
        let throttle = DomainThrottle::default();
        let start = Instant::now();
        throttle.wait("https://a.example").await;
        throttle.wait("https://b.example").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_get_distinct_slots() {
        let throttle = DomainThrottle::default();
        let start = Instant::now();
        let (a, b, c) = tokio::join!(
            async {
                throttle.wait("https://a.example").await;
                start.elapsed()
            },
            async {
                throttle.wait("https://a.example").await;
                start.elapsed()
            },
            async {
                throttle.wait("https://a.example").await;
                start.elapsed()
            },
        );
        let mut times = vec![a, b, c];
        times.sort();
        assert_eq!(times[0], Duration::ZERO);
        assert!(times[1] >= Duration::from_secs(1));
        assert!(times[2] >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_never_sleeps() {
        let throttle = DomainThrottle::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..5 {
            throttle.wait("https://a.example").await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
