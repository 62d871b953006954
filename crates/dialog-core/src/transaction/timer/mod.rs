//! RFC 3261 transaction timers.
//!
//! # SIP Timer Overview
//!
//! ## Client Transaction Timers
//! - **Timer A** (INVITE): request retransmission, starts at T1 and doubles
//! - **Timer B** (INVITE): transaction timeout, 64*T1
//! - **Timer D** (INVITE): wait for response retransmissions in Completed
//! - **Timer E** (non-INVITE): request retransmission, doubles up to T2
//! - **Timer F** (non-INVITE): transaction timeout, 64*T1
//! - **Timer K** (non-INVITE): wait for response retransmissions, T4
//!
//! ## Server Transaction Timers
//! - **Timer G** (INVITE): final response retransmission, doubles up to T2
//! - **Timer H** (INVITE): wait for ACK, 64*T1
//! - **Timer I** (INVITE): absorb ACK retransmissions in Confirmed, T4
//! - **Timer J** (non-INVITE): absorb request retransmissions, 64*T1
//!
//! Retransmission timers (A, E, G) never run over reliable transports and
//! the absorbing timers (D, I, J, K) collapse to zero there.
//!
//! Every armed timer is a spawned task holding only a [`Weak`] reference to
//! its transaction, wrapped in a [`TimerHandle`] that aborts the task when
//! dropped. Firing hands the transition to a fresh task, so a transition
//! that cancels the very timer which triggered it never cancels itself.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::trace;

/// Base timer values, in milliseconds on the wire of the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerSettings {
    /// RTT estimate
    #[serde(with = "millis")]
    pub t1: Duration,
    /// Maximum retransmission interval for non-INVITE requests and INVITE responses
    #[serde(with = "millis")]
    pub t2: Duration,
    /// Maximum time a message remains in the network
    #[serde(with = "millis")]
    pub t4: Duration,
    /// Timer D over unreliable transports
    #[serde(with = "millis")]
    pub timer_d: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        TimerSettings {
            t1: Duration::from_millis(500),
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
            timer_d: Duration::from_secs(32),
        }
    }
}

impl TimerSettings {
    /// Timers scaled down for tests; the ratios match the defaults
    pub fn fast() -> Self {
        TimerSettings {
            t1: Duration::from_millis(20),
            t2: Duration::from_millis(160),
            t4: Duration::from_millis(200),
            timer_d: Duration::from_millis(1280),
        }
    }

    /// B, F, H and J
    pub fn absolute(&self) -> Duration {
        self.t1 * 64
    }

    pub fn timer_b(&self) -> Duration {
        self.absolute()
    }

    pub fn timer_f(&self) -> Duration {
        self.absolute()
    }

    pub fn timer_h(&self) -> Duration {
        self.absolute()
    }

    pub fn timer_j(&self, reliable: bool) -> Duration {
        if reliable {
            Duration::ZERO
        } else {
            self.absolute()
        }
    }

    pub fn timer_d(&self, reliable: bool) -> Duration {
        if reliable {
            Duration::ZERO
        } else {
            self.timer_d
        }
    }

    pub fn timer_i(&self, reliable: bool) -> Duration {
        if reliable {
            Duration::ZERO
        } else {
            self.t4
        }
    }

    pub fn timer_k(&self, reliable: bool) -> Duration {
        if reliable {
            Duration::ZERO
        } else {
            self.t4
        }
    }

    /// Timer A: doubles without a cap, bounded in practice by Timer B
    pub(crate) fn timer_a(&self) -> Backoff {
        Backoff::new(self.t1, None)
    }

    /// Timer E and Timer G: double up to T2
    pub(crate) fn capped(&self) -> Backoff {
        Backoff::new(self.t1, Some(self.t2))
    }
}

/// Retransmission interval shared between a transaction and its timer task
#[derive(Debug)]
pub(crate) struct Backoff {
    current_ms: AtomicU64,
    cap_ms: Option<u64>,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, cap: Option<Duration>) -> Self {
        Backoff {
            current_ms: AtomicU64::new(initial.as_millis() as u64),
            cap_ms: cap.map(|c| c.as_millis() as u64),
        }
    }

    pub(crate) fn current(&self) -> Duration {
        Duration::from_millis(self.current_ms.load(Ordering::Acquire))
    }

    /// Doubles the interval, clamped to the cap
    pub(crate) fn advance(&self) -> Duration {
        let cap = self.cap_ms;
        let next = |ms: u64| {
            let doubled = ms.saturating_mul(2);
            Some(cap.map_or(doubled, |cap| doubled.min(cap)))
        };
        // the closure always returns Some, so both arms carry the old value
        let prev = match self.current_ms.fetch_update(Ordering::AcqRel, Ordering::Acquire, next) {
            Ok(prev) | Err(prev) => prev,
        };
        Duration::from_millis(next(prev).unwrap_or(prev))
    }

    /// Pins the interval, used when Timer E jumps to T2 in Proceeding
    pub(crate) fn pin(&self, interval: Duration) {
        self.current_ms
            .store(interval.as_millis() as u64, Ordering::Release);
    }
}

/// Owns a running timer task; dropping it cancels the timer
#[derive(Debug)]
pub(crate) struct TimerHandle {
    name: &'static str,
    task: JoinHandle<()>,
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        if !self.task.is_finished() {
            trace!(timer = self.name, "timer cancelled");
            self.task.abort();
        }
    }
}

/// Arms a one-shot timer that runs `fire` once after `after`
pub(crate) fn spawn_oneshot<T, F, Fut>(
    name: &'static str,
    after: Duration,
    target: Weak<T>,
    fire: F,
) -> TimerHandle
where
    T: Send + Sync + 'static,
    F: FnOnce(Arc<T>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let task = tokio::spawn(async move {
        tokio::time::sleep(after).await;
        if let Some(target) = target.upgrade() {
            trace!(timer = name, "timer fired");
            tokio::spawn(fire(target));
        }
    });
    TimerHandle { name, task }
}

/// Arms a retransmission timer. `fire` returns whether to keep going; the
/// interval advances after each firing.
pub(crate) fn spawn_retransmit<T, F, Fut>(
    name: &'static str,
    backoff: Arc<Backoff>,
    target: Weak<T>,
    fire: F,
) -> TimerHandle
where
    T: Send + Sync + 'static,
    F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    let task = tokio::spawn(async move {
        loop {
            tokio::time::sleep(backoff.current()).await;
            let Some(target) = target.upgrade() else {
                break;
            };
            trace!(timer = name, interval = ?backoff.current(), "timer fired");
            let keep_going = tokio::spawn(fire(target)).await.unwrap_or(false);
            if !keep_going {
                break;
            }
            backoff.advance();
        }
    });
    TimerHandle { name, task }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_default_settings() {
        let timers = TimerSettings::default();
        assert_eq!(timers.timer_b(), Duration::from_secs(32));
        assert_eq!(timers.timer_j(false), Duration::from_secs(32));
        assert_eq!(timers.timer_j(true), Duration::ZERO);
        assert_eq!(timers.timer_d(false), Duration::from_secs(32));
        assert_eq!(timers.timer_k(false), Duration::from_secs(5));
        assert_eq!(timers.timer_i(true), Duration::ZERO);
    }

    #[test]
    fn test_timer_e_doubles_up_to_t2() {
        let timers = TimerSettings::default();
        let backoff = timers.capped();
        let intervals: Vec<u64> = std::iter::once(backoff.current())
            .chain((0..5).map(|_| backoff.advance()))
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(intervals, vec![500, 1000, 2000, 4000, 4000, 4000]);
    }

    #[test]
    fn test_timer_a_is_uncapped() {
        let backoff = TimerSettings::default().timer_a();
        for _ in 0..6 {
            backoff.advance();
        }
        assert_eq!(backoff.current(), Duration::from_millis(32_000));
    }

    #[test]
    fn test_pin_to_t2() {
        let timers = TimerSettings::default();
        let backoff = timers.capped();
        backoff.pin(timers.t2);
        assert_eq!(backoff.current(), timers.t2);
        assert_eq!(backoff.advance(), timers.t2);
    }

    #[test]
    fn test_settings_in_milliseconds() {
        let timers: TimerSettings = toml::from_str("t1 = 100\nt2 = 800").unwrap();
        assert_eq!(timers.t1, Duration::from_millis(100));
        assert_eq!(timers.t2, Duration::from_millis(800));
        assert_eq!(timers.t4, Duration::from_secs(5));
        assert_eq!(timers.absolute(), Duration::from_millis(6400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retransmit_stops_when_told() {
        let count = Arc::new(AtomicUsize::new(0));
        let backoff = Arc::new(Backoff::new(Duration::from_millis(10), None));
        let _handle = spawn_retransmit("A", backoff.clone(), Arc::downgrade(&count), |count| async move {
            count.fetch_add(1, Ordering::SeqCst) < 2
        });
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(backoff.current(), Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_cancels() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = spawn_oneshot("H", Duration::from_millis(50), Arc::downgrade(&count), |count| async move {
            count.fetch_add(1, Ordering::SeqCst);
        });
        drop(handle);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
