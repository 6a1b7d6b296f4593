//! Sliding-window request pacing
//!
//! Every outbound request (probe, protocol check, speed GET, identity GET, header audit, source fetch)
//! passes through [`RateLimiter::admit`]. Two caps apply over the trailing second: an
//! absolute burst ceiling and the sustained requests-per-second rate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::trace;

const WINDOW: Duration = Duration::from_secs(1);

struct Inner {
    window: Mutex<VecDeque<Instant>>,
    max_per_second: usize,
    burst: usize,
    admitted: AtomicU64,
}

/// Shared request pacer; cloning yields a handle to the same window
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl RateLimiter {
    /// Create a limiter. `burst` defaults to twice the sustained rate and is never allowed
    /// to fall below it.
    pub fn new(max_per_second: u32, burst: Option<u32>) -> Self {
        let max_per_second = max_per_second.max(1) as usize;
        let burst = burst
            .map(|b| b as usize)
            .unwrap_or(max_per_second * 2)
            .max(max_per_second);

        Self {
            inner: Arc::new(Inner {
                window: Mutex::new(VecDeque::with_capacity(burst)),
                max_per_second,
                burst,
                admitted: AtomicU64::new(0),
            }),
        }
    }

    pub fn max_per_second(&self) -> usize {
        self.inner.max_per_second
    }

    pub fn burst(&self) -> usize {
        self.inner.burst
    }

    /// Total admissions granted since creation
    pub fn admitted(&self) -> u64 {
        self.inner.admitted.load(Ordering::Relaxed)
    }

    /// Wait until one more request may be issued, then record it.
    ///
    /// The window lock is held across the sleep so waiters are admitted in arrival order.
    pub async fn admit(&self) {
        let mut window = self.inner.window.lock().await;

        prune(&mut window, Instant::now());

        if window.len() >= self.inner.burst {
            let idx = window.len() - self.inner.burst;
            let until = window[idx] + WINDOW;
            trace!(in_window = window.len(), "burst cap reached, waiting");
            sleep_until(until).await;
            prune(&mut window, Instant::now());
        }

        if window.len() >= self.inner.max_per_second {
            let idx = window.len() - self.inner.max_per_second;
            let until = window[idx] + WINDOW;
            trace!(in_window = window.len(), "sustained cap reached, waiting");
            sleep_until(until).await;
            prune(&mut window, Instant::now());
        }

        window.push_back(Instant::now());
        self.inner.admitted.fetch_add(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_per_second", &self.inner.max_per_second)
            .field("burst", &self.inner.burst)
            .finish()
    }
}

fn prune(window: &mut VecDeque<Instant>, now: Instant) {
    while let Some(front) = window.front() {
        if now.duration_since(*front) >= WINDOW {
            window.pop_front();
        } else {
            break;
        }
    }
}
