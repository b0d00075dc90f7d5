//! Periodic callback scheduling.
//!
//! The tracker never touches the clock directly. It asks a [`Scheduler`] for
//! repeating callbacks and holds on to the returned [`TimerHandle`]s; dropping
//! or cancelling a handle stops its callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::utils::lock_or_recover;

pub type TimerTask = Box<dyn FnMut() + Send + 'static>;

pub trait Scheduler: Send + Sync + 'static {
    /// Runs `task` every `period`, first after one full period.
    fn every(&self, period: Duration, task: TimerTask) -> TimerHandle;
}

/// Owning handle for a repeating callback. Cancels on drop.
#[derive(Debug)]
pub struct TimerHandle {
    token: CancellationToken,
}

impl TimerHandle {
    fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Longest period the Tokio scheduler honours. Keeps deadline arithmetic
/// clear of `Instant` overflow.
const MAX_TOKIO_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Wall-clock scheduler backed by Tokio intervals.
#[derive(Clone)]
pub struct TokioScheduler {
    runtime: Handle,
}

impl TokioScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Uses the runtime of the calling task. Panics outside a Tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Scheduler for TokioScheduler {
    fn every(&self, period: Duration, mut task: TimerTask) -> TimerHandle {
        let period = period.clamp(Duration::from_millis(1), MAX_TOKIO_PERIOD);
        let token = CancellationToken::new();
        let cancelled = token.clone();
        // Measured from registration, not from when the task first runs.
        let first = Instant::now() + period;

        self.runtime.spawn(async move {
            let mut interval = time::interval_at(first, period);
            // A suspended host should not be paid back with a burst of ticks.
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = interval.tick() => task(),
                }
            }
        });

        TimerHandle::new(token)
    }
}

struct ManualTimer {
    period_steps: u64,
    remaining: u64,
    token: CancellationToken,
    task: Arc<Mutex<TimerTask>>,
}

/// Simulated clock for deterministic tests and replay. Time only moves when
/// [`ManualScheduler::advance`] is called; timers due on the same step fire
/// in registration order.
pub struct ManualScheduler {
    resolution: Duration,
    timers: Mutex<Vec<ManualTimer>>,
    steps: AtomicU64,
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl ManualScheduler {
    pub fn new(resolution: Duration) -> Self {
        Self {
            resolution: resolution.max(Duration::from_millis(1)),
            timers: Mutex::new(Vec::new()),
            steps: AtomicU64::new(0),
        }
    }

    /// Moves the clock forward by `steps` resolution units.
    pub fn advance(&self, steps: u64) {
        for _ in 0..steps {
            self.step();
        }
    }

    /// Steps taken since construction.
    pub fn now(&self) -> u64 {
        self.steps.load(Ordering::SeqCst)
    }

    /// Timers registered and not yet cancelled.
    pub fn active_timers(&self) -> usize {
        lock_or_recover(&self.timers)
            .iter()
            .filter(|timer| !timer.token.is_cancelled())
            .count()
    }

    fn step(&self) {
        self.steps.fetch_add(1, Ordering::SeqCst);

        let due: Vec<(CancellationToken, Arc<Mutex<TimerTask>>)> = {
            let mut timers = lock_or_recover(&self.timers);
            timers.retain(|timer| !timer.token.is_cancelled());
            timers
                .iter_mut()
                .filter_map(|timer| {
                    timer.remaining -= 1;
                    if timer.remaining == 0 {
                        timer.remaining = timer.period_steps;
                        Some((timer.token.clone(), timer.task.clone()))
                    } else {
                        None
                    }
                })
                .collect()
        };

        // Callbacks run without the timer list locked so they may register
        // or cancel timers themselves.
        for (token, task) in due {
            if token.is_cancelled() {
                continue;
            }
            let mut task = lock_or_recover(&task);
            (*task)();
        }
    }
}

impl Scheduler for ManualScheduler {
    fn every(&self, period: Duration, task: TimerTask) -> TimerHandle {
        let period_steps = u64::try_from(period.as_millis() / self.resolution.as_millis())
            .unwrap_or(u64::MAX)
            .max(1);
        let token = CancellationToken::new();

        lock_or_recover(&self.timers).push(ManualTimer {
            period_steps,
            remaining: period_steps,
            token: token.clone(),
            task: Arc::new(Mutex::new(task)),
        });

        TimerHandle::new(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> (Arc<AtomicU64>, TimerTask) {
        let count = Arc::new(AtomicU64::new(0));
        let inner = count.clone();
        let task: TimerTask = Box::new(move || {
            inner.fetch_add(1, Ordering::SeqCst);
        });
        (count, task)
    }

    #[test]
    fn manual_timers_fire_on_their_period() {
        let scheduler = ManualScheduler::default();
        let (fast, fast_task) = counter();
        let (slow, slow_task) = counter();
        let _fast = scheduler.every(Duration::from_secs(1), fast_task);
        let _slow = scheduler.every(Duration::from_secs(30), slow_task);

        scheduler.advance(29);
        assert_eq!(fast.load(Ordering::SeqCst), 29);
        assert_eq!(slow.load(Ordering::SeqCst), 0);

        scheduler.advance(31);
        assert_eq!(fast.load(Ordering::SeqCst), 60);
        assert_eq!(slow.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.now(), 60);
    }

    #[test]
    fn dropping_the_handle_stops_the_timer() {
        let scheduler = ManualScheduler::default();
        let (count, task) = counter();
        let handle = scheduler.every(Duration::from_secs(1), task);

        scheduler.advance(3);
        assert_eq!(scheduler.active_timers(), 1);
        drop(handle);
        scheduler.advance(3);

        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.active_timers(), 0);
    }

    #[test]
    fn same_step_timers_fire_in_registration_order() {
        let scheduler = ManualScheduler::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = order.clone();
        let second = order.clone();
        let _a = scheduler.every(Duration::from_secs(2), Box::new(move || first.lock().unwrap().push("a")));
        let _b = scheduler.every(Duration::from_secs(2), Box::new(move || second.lock().unwrap().push("b")));

        scheduler.advance(4);
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_timer_skips_the_immediate_tick_and_stops_on_cancel() {
        let scheduler = TokioScheduler::current();
        let (count, task) = counter();
        let handle = scheduler.every(Duration::from_secs(1), task);

        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        for _ in 0..3 {
            time::advance(Duration::from_secs(1)).await;
            tokio::task::yield_now().await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);

        handle.cancel();
        for _ in 0..3 {
            time::advance(Duration::from_secs(1)).await;
            tokio::task::yield_now().await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_timer_accepts_an_unbounded_period() {
        let scheduler = TokioScheduler::current();
        let (count, task) = counter();
        let handle = scheduler.every(Duration::MAX, task);

        time::advance(Duration::from_secs(3600)).await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        handle.cancel();
        tokio::task::yield_now().await;
    }

    #[test]
    fn manual_timer_with_unbounded_period_never_fires() {
        let scheduler = ManualScheduler::default();
        let (count, task) = counter();
        let _handle = scheduler.every(Duration::MAX, task);

        scheduler.advance(1_000);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.active_timers(), 1);
    }
}
