//! Sliding-window request throttle.
//!
//! The throttle protects the remote's per-minute budget, which is shared by
//! every book. It never rejects a request; it only delays it until the
//! oldest admission leaves the window.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Length of the rolling window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Extra wait after the oldest admission leaves the window.
pub const SAFETY_MARGIN: Duration = Duration::from_millis(100);

/// Rolling-window request throttle.
#[derive(Debug)]
pub struct RequestThrottle {
    budget: usize,
    window: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RequestThrottle {
    /// Creates a throttle admitting `budget` requests per minute.
    pub fn new(budget: u32) -> Self {
        Self::with_window(budget, WINDOW)
    }

    /// Creates a throttle with a custom window.
    pub fn with_window(budget: u32, window: Duration) -> Self {
        Self {
            budget: budget.max(1) as usize,
            window,
            admitted: Mutex::new(VecDeque::new()),
        }
    }

    /// Returns the budget.
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Waits until a request may be sent, then records its admission.
    pub async fn acquire(&self) {
        loop {
            let wait = match self.try_admit(Instant::now()) {
                None => return,
                Some(wait) => wait,
            };
            debug!(wait_ms = wait.as_millis() as u64, "request budget exhausted, delaying");
            tokio::time::sleep(wait).await;
        }
    }

    /// Returns the number of admissions inside the current window.
    pub fn in_window(&self) -> usize {
        let mut admitted = self.admitted.lock();
        self.prune(&mut admitted, Instant::now());
        admitted.len()
    }

    /// Admits at `now`, or returns how long to wait before trying again.
    fn try_admit(&self, now: Instant) -> Option<Duration> {
        let mut admitted = self.admitted.lock();
        self.prune(&mut admitted, now);

        if admitted.len() < self.budget {
            admitted.push_back(now);
            return None;
        }

        let oldest = *admitted.front()?;
        let leaves_at = oldest + self.window + SAFETY_MARGIN;
        Some(leaves_at.saturating_duration_since(now).max(Duration::from_millis(1)))
    }

    fn prune(&self, admitted: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = admitted.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                admitted.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test(start_paused = true)]
    async fn admits_budget_without_delay() {
        let throttle = RequestThrottle::new(5);
        let start = Instant::now();
        for _ in 0..5 {
            throttle.acquire().await;
        }
        assert_eq!(Instant::now(), start);
        assert_eq!(throttle.in_window(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn delays_excess_until_window_slides() {
        let throttle = RequestThrottle::new(2);
        let start = Instant::now();

        throttle.acquire().await;
        throttle.acquire().await;
        throttle.acquire().await;

        let waited = Instant::now() - start;
        assert!(waited >= WINDOW);
        assert!(waited <= WINDOW + SAFETY_MARGIN + Duration::from_millis(5));
    }

    #[tokio::test(start_paused = true)]
    async fn old_admissions_expire() {
        let throttle = RequestThrottle::new(3);
        throttle.acquire().await;
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(throttle.in_window(), 0);
    }

    proptest! {
        #[test]
        fn never_exceeds_budget_in_any_window(
            budget in 1u32..8,
            gaps in proptest::collection::vec(0u64..30_000, 1..40),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();

            let admissions = rt.block_on(async {
                let throttle = RequestThrottle::new(budget);
                let mut admissions = Vec::new();
                for gap in gaps {
                    tokio::time::advance(Duration::from_millis(gap)).await;
                    throttle.acquire().await;
                    admissions.push(Instant::now());
                }
                admissions
            });

            for (i, &start) in admissions.iter().enumerate() {
                let inside = admissions[i..]
                    .iter()
                    .take_while(|&&t| t.duration_since(start) < WINDOW)
                    .count();
                prop_assert!(inside <= budget as usize);
            }
        }
    }
}
