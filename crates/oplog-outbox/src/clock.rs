//! Injectable time source.
//!
//! Retry delays and reaper ageing both go through [`Clock`], so tests can
//! drive them with [`ManualClock`] instead of waiting in real time.

use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Boxed sleep future returned by [`Clock::sleep`].
pub type Sleep = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Clock abstraction for wall time and delays.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Resolve once `duration` has elapsed on this clock.
    ///
    /// The deadline is fixed when `sleep` is called, not when the future is
    /// first polled.
    fn sleep(&self, duration: Duration) -> Sleep;
}

/// System time and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Clock that only moves when told to.
///
/// Sleeps resolve when [`ManualClock::advance`] moves time past their
/// deadline.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<watch::Sender<DateTime<Utc>>>,
    sleepers: Arc<AtomicUsize>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        let (tx, _rx) = watch::channel(start);
        Self {
            now: Arc::new(tx),
            sleepers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Move time forward, waking every sleep whose deadline has passed.
    pub fn advance(&self, duration: Duration) {
        let delta = to_chrono(duration);
        self.now.send_modify(|now| *now += delta);
    }

    /// Sleeps created and not yet resolved or dropped.
    pub fn sleepers(&self) -> usize {
        self.sleepers.load(Ordering::Acquire)
    }

    /// Wait (in real time) until at least `count` sleeps are outstanding.
    pub async fn wait_for_sleepers(&self, count: usize, timeout: Duration) -> bool {
        let wait = async {
            while self.sleepers() < count {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

struct SleeperGuard(Arc<AtomicUsize>);

impl Drop for SleeperGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.borrow()
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        let deadline = self.now() + to_chrono(duration);
        let mut rx = self.now.subscribe();
        self.sleepers.fetch_add(1, Ordering::AcqRel);
        let guard = SleeperGuard(self.sleepers.clone());

        Box::pin(async move {
            let _guard = guard;
            loop {
                if *rx.borrow_and_update() >= deadline {
                    return;
                }
                if rx.changed().await.is_err() {
                    // Clock dropped; time can never reach the deadline.
                    std::future::pending::<()>().await;
                }
            }
        })
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now() - start, chrono::Duration::seconds(90));
    }

    #[tokio::test]
    async fn test_manual_sleep_waits_for_advance() {
        let clock = ManualClock::default();
        let sleep = clock.sleep(Duration::from_secs(5));
        assert_eq!(clock.sleepers(), 1);

        let handle = tokio::spawn(sleep);
        clock.advance(Duration::from_secs(4));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        clock.advance(Duration::from_secs(1));
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(clock.sleepers(), 0);
    }

    #[tokio::test]
    async fn test_deadline_is_fixed_at_creation() {
        let clock = ManualClock::default();
        let sleep = clock.sleep(Duration::from_secs(5));
        clock.advance(Duration::from_secs(5));
        tokio::time::timeout(Duration::from_secs(1), sleep).await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_sleep_resolves_immediately() {
        let clock = ManualClock::default();
        tokio::time::timeout(Duration::from_secs(1), clock.sleep(Duration::ZERO))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_system_clock_sleep() {
        let clock = SystemClock;
        let before = clock.now();
        clock.sleep(Duration::from_millis(5)).await;
        assert!(clock.now() >= before);
    }
}
