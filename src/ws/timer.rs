//! Cancellable timers backed by `tokio::time`.
//!
//! A [`Timer`] owns the task that sleeps and then runs its callback; dropping the timer aborts
//! the task. A callback that already ran, or that raced with cancellation and delivered its
//! result to a queue, is filtered by id through [`TimerSlot`].

use std::future::Future;
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_util::task::AbortOnDropHandle;

/// A one-shot delayed callback.
pub struct Timer {
    handle: Option<AbortOnDropHandle<()>>,
}

impl Timer {
    /// Run `callback` once after `delay`.
    pub fn new<F>(delay: Duration, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            callback();
        });

        Self {
            handle: Some(AbortOnDropHandle::new(handle)),
        }
    }

    /// Cancel the callback. Safe to call repeatedly and after the timer fired.
    pub fn ensure_aborted(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

/// Holds at most one [`Timer`]; arming a new one cancels the previous.
#[derive(Default)]
pub(crate) struct TimerSlot {
    armed: Option<(u64, Timer)>,
}

impl TimerSlot {
    pub(crate) fn arm(&mut self, id: u64, timer: Timer) {
        self.cancel();
        self.armed = Some((id, timer));
    }

    pub(crate) fn cancel(&mut self) {
        if let Some((_, mut timer)) = self.armed.take() {
            timer.ensure_aborted();
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Consume a firing. Returns `false` when `id` is stale, i.e. the timer was cancelled or
    /// replaced after it fired.
    pub(crate) fn fire(&mut self, id: u64) -> bool {
        match &self.armed {
            Some((armed, _)) if *armed == id => {
                self.armed = None;
                true
            }
            _ => false,
        }
    }
}

/// Repeats an async job every `period` until dropped. The first run happens after one period.
pub(crate) struct PeriodicTimer {
    _handle: AbortOnDropHandle<()>,
}

impl PeriodicTimer {
    pub(crate) fn new<F, Fut>(period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                job().await;
            }
        });

        Self {
            _handle: AbortOnDropHandle::new(handle),
        }
    }
}
