//! Outbound request throttle
//!
//! Enforces a minimum spacing of `window / rate` between dispatches. The
//! limiter is owned state: the pipeline creates one and shares it by `Arc`
//! with every fetch task.
//!
//! Only spacing is guaranteed. Waiters are not served in arrival order.

use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep_until, Instant};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RateLimitError {
    #[error("Rate must be positive, got {0}")]
    NonPositiveRate(f64),

    #[error("Window must be non-zero")]
    ZeroWindow,
}

/// Minimum-interval rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    /// Time allotted to each token (`window / rate`)
    interval: Duration,
    /// Window the rate is expressed over; also the rate-limit cooldown
    window: Duration,
    /// Slot reserved by the most recent caller
    last_dispatch: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a limiter allowing `rate` dispatches per `window`
    pub fn new(rate: f64, window: Duration) -> Result<Self, RateLimitError> {
        if rate.is_nan() || rate <= 0.0 || rate.is_infinite() {
            return Err(RateLimitError::NonPositiveRate(rate));
        }
        if window.is_zero() {
            return Err(RateLimitError::ZeroWindow);
        }

        Ok(Self {
            interval: window.div_f64(rate),
            window,
            last_dispatch: Mutex::new(None),
        })
    }

    /// Minimum spacing between two dispatches
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The configured window
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Wait until the caller may dispatch.
    ///
    /// The dispatch slot is reserved under the lock before sleeping, so
    /// concurrent callers each get a distinct slot instead of all waking at
    /// the same instant.
    pub async fn acquire(&self) {
        let slot = self.reserve_slot();
        sleep_until(slot).await;
    }

    fn reserve_slot(&self) -> Instant {
        let now = Instant::now();
        // The guarded value is a plain timestamp; a poisoned lock still holds a
        // usable one.
        let mut last = self
            .last_dispatch
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let slot = match *last {
            Some(previous) => std::cmp::max(previous + self.interval, now),
            None => now,
        };
        *last = Some(slot);
        slot
    }
}
