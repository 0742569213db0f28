//! Small wrappers composed at call sites: error swallowing for background
//! work, debouncing of notification bursts, and log rate limiting.

use std::fmt::Display;
use std::future::{Future, pending};
use std::mem;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};

/// Await a background future and log its error instead of propagating it.
pub async fn swallow_errors<T, E>(
    context: impl Display,
    fut: impl Future<Output = Result<T, E>>,
) -> Option<T>
where
    E: Into<anyhow::Error>,
{
    match fut.await {
        Ok(value) => Some(value),
        Err(e) => {
            let e: anyhow::Error = e.into();
            tracing::warn!("{context}: {e:#}");
            None
        }
    }
}

/// Sleep until `deadline`, or forever when there is none.
///
/// Meant for `select!` branches guarded on the deadline being set.
pub async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending::<()>().await,
    }
}

/// Trailing-edge debounce: fires once, `interval` after the last poke.
#[derive(Debug)]
pub struct Debounce {
    interval: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    pub fn poke(&mut self, now: Instant) {
        self.deadline = Some(now + self.interval);
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns `true` exactly once per burst, when the deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Allows `limit` lines per `window`; the rest are counted and dropped.
#[derive(Debug)]
pub struct LogThrottle {
    limit: u32,
    window: Duration,
    window_start: Option<Instant>,
    emitted: u32,
    suppressed: u32,
}

impl LogThrottle {
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            window_start: None,
            emitted: 0,
            suppressed: 0,
        }
    }

    /// `Some(n)` if the line should be logged, where `n` lines were
    /// suppressed in the window that just closed. `None` to drop it.
    pub fn admit(&mut self, now: Instant) -> Option<u32> {
        let mut rolled_over = 0;
        let expired = self
            .window_start
            .is_none_or(|start| now.duration_since(start) >= self.window);
        if expired {
            rolled_over = mem::take(&mut self.suppressed);
            self.window_start = Some(now);
            self.emitted = 0;
        }
        if self.emitted < self.limit {
            self.emitted += 1;
            Some(rolled_over)
        } else {
            self.suppressed += 1;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn swallow_errors_passes_values_through() {
        let ok = swallow_errors("ok", async { Ok::<_, std::io::Error>(5) }).await;
        assert_eq!(ok, Some(5));
        let err = swallow_errors("refresh", async {
            Err::<u8, _>(anyhow::anyhow!("boom"))
        })
        .await;
        assert_eq!(err, None);
    }

    #[test]
    fn debounce_fires_once_after_last_poke() {
        let start = Instant::now();
        let mut debounce = Debounce::new(Duration::from_secs(1));
        assert!(debounce.deadline().is_none());

        debounce.poke(start);
        debounce.poke(start + Duration::from_millis(600));
        assert!(!debounce.take_due(start + Duration::from_millis(1200)));
        assert!(debounce.take_due(start + Duration::from_millis(1600)));
        assert!(!debounce.take_due(start + Duration::from_secs(5)));
    }

    #[test]
    fn throttle_reports_suppressed_count_on_rollover() {
        let start = Instant::now();
        let mut throttle = LogThrottle::new(2, Duration::from_secs(10));
        assert_eq!(throttle.admit(start), Some(0));
        assert_eq!(throttle.admit(start), Some(0));
        assert_eq!(throttle.admit(start), None);
        assert_eq!(throttle.admit(start + Duration::from_secs(1)), None);
        assert_eq!(throttle.admit(start + Duration::from_secs(11)), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn until_without_deadline_never_fires() {
        let fired = tokio::time::timeout(Duration::from_secs(60), until(None)).await;
        assert!(fired.is_err());
        until(Some(Instant::now() + Duration::from_millis(5))).await;
    }
}
