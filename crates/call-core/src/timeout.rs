//! Ring/dial timeout supervisor
//!
//! One cancellable timer per session, exposed as an `arm`/`disarm` pair. The
//! caller arms it while dialing, the callee while ringing, and either side
//! while connecting.
//!
//! Expiry and cancellation race on a single flag: whichever flips it first
//! wins, so `on_expire` runs at most once and never after a disarm
//! returned. An expiry notification can still be in flight when the timer
//! is disarmed; the owner filters those with [`TimeoutSupervisor::claim_expiry`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Identifies one arming of the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

struct ArmedTimer {
    handle: TimerHandle,
    /// Set by whichever of expiry or cancellation happens first
    settled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl ArmedTimer {
    fn cancel(self) -> bool {
        let won = !self.settled.swap(true, Ordering::SeqCst);
        self.task.abort();
        won
    }

    fn has_fired(&self) -> bool {
        self.settled.load(Ordering::SeqCst)
    }
}

/// Per-session timeout supervisor
pub struct TimeoutSupervisor {
    next_id: u64,
    active: Option<ArmedTimer>,
}

impl TimeoutSupervisor {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            active: None,
        }
    }

    /// Arm a timer that calls `on_expire` once after `duration`
    ///
    /// `on_expire` receives the handle this call returns. Arming while a
    /// timer is active disarms that timer first.
    pub fn arm<F>(&mut self, duration: Duration, on_expire: F) -> TimerHandle
    where
        F: FnOnce(TimerHandle) + Send + 'static,
    {
        if let Some(previous) = self.active.take() {
            warn!("Timer {} still armed while arming a new one, disarming it", previous.handle.0);
            previous.cancel();
        }

        self.next_id += 1;
        let handle = TimerHandle(self.next_id);
        let settled = Arc::new(AtomicBool::new(false));
        let flag = settled.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if !flag.swap(true, Ordering::SeqCst) {
                on_expire(handle);
            }
        });

        debug!("Armed timer {} for {:?}", handle.0, duration);
        self.active = Some(ArmedTimer {
            handle,
            settled,
            task,
        });
        handle
    }

    /// Disarm the timer identified by `handle`
    ///
    /// Returns true if that timer was still pending and is now cancelled.
    /// A stale handle leaves the current timer alone.
    pub fn disarm(&mut self, handle: TimerHandle) -> bool {
        if self.current() != Some(handle) {
            return false;
        }
        match self.active.take() {
            Some(timer) => {
                debug!("Disarmed timer {}", handle.0);
                timer.cancel()
            }
            None => false,
        }
    }

    /// Disarm whatever timer is active
    pub fn disarm_all(&mut self) -> bool {
        match self.active.take() {
            Some(timer) => {
                debug!("Disarmed timer {}", timer.handle.0);
                timer.cancel()
            }
            None => false,
        }
    }

    /// Accept an expiry notification for `handle`
    ///
    /// Returns true only if `handle` is the current timer and it actually
    /// fired. The timer is forgotten either way when it matches.
    pub fn claim_expiry(&mut self, handle: TimerHandle) -> bool {
        match &self.active {
            Some(timer) if timer.handle == handle && timer.has_fired() => {
                self.active = None;
                true
            }
            _ => false,
        }
    }

    /// Handle of the active timer, fired or not
    pub fn current(&self) -> Option<TimerHandle> {
        self.active.as_ref().map(|timer| timer.handle)
    }

    /// Whether a timer is armed and has not fired yet
    pub fn is_armed(&self) -> bool {
        self.active.as_ref().map_or(false, |timer| !timer.has_fired())
    }
}

impl Default for TimeoutSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimeoutSupervisor {
    fn drop(&mut self) {
        self.disarm_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce(TimerHandle) + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        (count, move |_| {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_duration() {
        let mut supervisor = TimeoutSupervisor::new();
        let (count, on_expire) = counter();
        let handle = supervisor.arm(Duration::from_millis(500), on_expire);
        assert!(supervisor.is_armed());

        tokio::time::sleep(Duration::from_millis(499)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!supervisor.is_armed());

        assert!(supervisor.claim_expiry(handle));
        assert!(!supervisor.claim_expiry(handle));
        assert_eq!(supervisor.current(), None);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_prevents_expiry() {
        let mut supervisor = TimeoutSupervisor::new();
        let (count, on_expire) = counter();
        let handle = supervisor.arm(Duration::from_millis(100), on_expire);

        assert!(supervisor.disarm(handle));
        assert!(!supervisor.is_armed());
        assert!(!supervisor.disarm(handle));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_previous_timer() {
        let mut supervisor = TimeoutSupervisor::new();
        let (first, first_expire) = counter();
        let (second, second_expire) = counter();

        let old = supervisor.arm(Duration::from_millis(100), first_expire);
        let new = supervisor.arm(Duration::from_millis(200), second_expire);
        assert_ne!(old, new);
        assert_eq!(supervisor.current(), Some(new));

        // A stale handle must not touch the new timer
        assert!(!supervisor.disarm(old));
        assert!(supervisor.is_armed());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert!(!supervisor.claim_expiry(old));
        assert!(supervisor.claim_expiry(new));
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_requires_fired_timer() {
        let mut supervisor = TimeoutSupervisor::new();
        let (_count, on_expire) = counter();
        let handle = supervisor.arm(Duration::from_secs(1), on_expire);

        assert!(!supervisor.claim_expiry(handle));
        assert_eq!(supervisor.current(), Some(handle));
        assert!(supervisor.disarm_all());
        assert!(!supervisor.disarm_all());
    }
}
