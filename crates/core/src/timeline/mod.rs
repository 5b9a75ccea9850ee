use std::{collections::HashMap, fmt, future::Future};

use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;
use tracing::debug;

/// Named timers a session can have armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimerKind {
    /// Waits for the camera to produce its first frame.
    ReadinessTimeout,
    /// Ticks once per interval before detection starts.
    Countdown,
    /// Switches the camera off after a classified result.
    AutoShutdown,
}

impl TimerKind {
    /// Timer that may not run alongside this one.
    fn exclusive_with(self) -> Option<TimerKind> {
        match self {
            TimerKind::Countdown => Some(TimerKind::AutoShutdown),
            TimerKind::AutoShutdown => Some(TimerKind::Countdown),
            TimerKind::ReadinessTimeout => None,
        }
    }
}

/// Set of timer tasks, at most one per [`TimerKind`].
///
/// Arming a slot aborts whatever was previously armed in it, and arming the
/// countdown or the auto-shutdown cancels the other.
#[derive(Default)]
pub struct TimerSet {
    slots: HashMap<TimerKind, AbortHandle>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `task` as the timer for `kind`.
    pub fn arm<F>(&mut self, kind: TimerKind, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Some(other) = kind.exclusive_with() {
            self.cancel(other);
        }
        let handle = tokio::spawn(task).abort_handle();
        if let Some(previous) = self.slots.insert(kind, handle) {
            previous.abort();
            debug!(?kind, "re-armed timer");
        }
    }

    /// Forgets a timer that has fired. The task is aborted in case it is
    /// still winding down.
    pub fn disarm(&mut self, kind: TimerKind) {
        if let Some(handle) = self.slots.remove(&kind) {
            handle.abort();
        }
    }

    /// Aborts the timer for `kind`. Returns whether one was pending.
    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        match self.slots.remove(&kind) {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }

    /// Aborts every timer. Returns how many were still pending.
    pub fn cancel_all(&mut self) -> usize {
        self.slots
            .drain()
            .map(|(_, handle)| {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            })
            .filter(|pending| *pending)
            .count()
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.slots
            .get(&kind)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Kinds with a pending timer, in a stable order.
    pub fn armed(&self) -> Vec<TimerKind> {
        let mut kinds: Vec<TimerKind> = self
            .slots
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(kind, _)| *kind)
            .collect();
        kinds.sort();
        kinds
    }

    pub fn pending(&self) -> usize {
        self.armed().len()
    }
}

impl fmt::Debug for TimerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerSet")
            .field("armed", &self.armed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use super::*;

    fn counting_timer(delay: Duration, fired: &Arc<AtomicUsize>) -> impl Future<Output = ()> {
        let fired = fired.clone();
        async move {
            tokio::time::sleep(delay).await;
            fired.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_aborts_the_previous_timer() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timers = TimerSet::new();

        timers.arm(TimerKind::ReadinessTimeout, counting_timer(Duration::from_secs(1), &fired));
        timers.arm(TimerKind::ReadinessTimeout, counting_timer(Duration::from_secs(2), &fired));
        assert_eq!(timers.pending(), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timers.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_and_auto_shutdown_are_mutually_exclusive() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timers = TimerSet::new();

        timers.arm(TimerKind::AutoShutdown, counting_timer(Duration::from_secs(3), &fired));
        timers.arm(TimerKind::Countdown, counting_timer(Duration::from_secs(5), &fired));
        assert_eq!(timers.armed(), vec![TimerKind::Countdown]);

        timers.arm(TimerKind::AutoShutdown, counting_timer(Duration::from_secs(3), &fired));
        assert_eq!(timers.armed(), vec![TimerKind::AutoShutdown]);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_leaves_nothing_pending() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timers = TimerSet::new();
        timers.arm(TimerKind::ReadinessTimeout, counting_timer(Duration::from_secs(4), &fired));
        timers.arm(TimerKind::Countdown, counting_timer(Duration::from_secs(1), &fired));

        assert_eq!(timers.cancel_all(), 2);
        assert_eq!(timers.pending(), 0);
        assert!(!timers.is_armed(TimerKind::Countdown));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
