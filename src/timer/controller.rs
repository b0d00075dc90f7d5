use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    models::{OwnerId, TrackingKey},
    store::{CounterStore, IdentityProvider},
    utils::{format_elapsed, lock_or_recover},
};

use super::{
    scheduler::{Scheduler, TimerHandle, TokioScheduler},
    state::{PauseReason, TrackerPhase, TrackerState, Transition},
    visibility::VisibilityRelay,
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

pub const DEFAULT_FLUSH_EVERY_TICKS: u32 = 30;

/// Per-binding behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindOptions {
    /// Start counting as soon as seeding finishes. Views with an explicit
    /// start button turn this off.
    pub auto_start: bool,
    /// Flush cadence, in ticks. Zero is treated as one.
    pub flush_every_ticks: u32,
}

impl Default for BindOptions {
    fn default() -> Self {
        Self {
            auto_start: true,
            flush_every_ticks: DEFAULT_FLUSH_EVERY_TICKS,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    pub tick_interval: Duration,
    pub defaults: BindOptions,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            defaults: BindOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSnapshot {
    pub key: Option<TrackingKey>,
    pub phase: TrackerPhase,
    pub pause_reason: Option<PauseReason>,
    pub elapsed_seconds: u64,
    pub formatted: String,
    /// False for anonymous learners and disabled keys.
    pub tracking: bool,
    pub bound_at: Option<DateTime<Utc>>,
}

impl From<&TrackerState> for TrackerSnapshot {
    fn from(state: &TrackerState) -> Self {
        Self {
            key: state.key.clone(),
            phase: state.phase,
            pause_reason: state.pause_reason,
            elapsed_seconds: state.elapsed_seconds,
            formatted: format_elapsed(i64::try_from(state.elapsed_seconds).unwrap_or(i64::MAX)),
            tracking: state.is_trackable(),
            bound_at: state.bound_at,
        }
    }
}

/// Both timers of a running binding. Dropping this cancels them together.
struct BindingTimers {
    _tick: TimerHandle,
    _flush: TimerHandle,
}

struct Shared<S> {
    state: Mutex<TrackerState>,
    /// Bumped on every bind and unbind, always with `state` locked. A bind
    /// that finishes seeding under an older generation is discarded.
    generation: AtomicU64,
    options: Mutex<BindOptions>,
    timers: Mutex<Option<BindingTimers>>,
    store: Arc<S>,
    scheduler: Arc<dyn Scheduler>,
    tick_interval: Duration,
    flushes: TaskTracker,
    /// Serializes `wait_for_flushes`; one caller's `reopen` must not strand
    /// another caller's wait.
    drain: tokio::sync::Mutex<()>,
    runtime: Handle,
}

impl<S: CounterStore> Shared<S> {
    fn lock_state(&self) -> MutexGuard<'_, TrackerState> {
        lock_or_recover(&self.state)
    }

    fn apply(self: &Arc<Self>, transition: Transition) {
        match transition {
            Transition::Started | Transition::Resumed => self.start_timers(),
            Transition::Paused => {
                self.stop_timers();
                self.flush();
            }
            Transition::Unchanged => {}
        }
    }

    fn start_timers(self: &Arc<Self>) {
        let mut timers = lock_or_recover(&self.timers);
        if timers.is_some() {
            return;
        }

        let flush_every = lock_or_recover(&self.options).flush_every_ticks.max(1);

        let weak = Arc::downgrade(self);
        let tick = self.scheduler.every(
            self.tick_interval,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.lock_state().tick();
                }
            }),
        );

        let weak = Arc::downgrade(self);
        let flush = self.scheduler.every(
            self.tick_interval
                .checked_mul(flush_every)
                .unwrap_or(Duration::MAX),
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.flush();
                }
            }),
        );

        *timers = Some(BindingTimers {
            _tick: tick,
            _flush: flush,
        });
    }

    fn stop_timers(&self) {
        lock_or_recover(&self.timers).take();
    }

    fn flush(&self) {
        let claim = self.lock_state().take_flush();
        if let Some((owner, key, delta)) = claim {
            self.spawn_increment(owner, key, delta);
        }
    }

    /// Fire-and-forget increment. Failures are logged; the seconds are lost.
    fn spawn_increment(&self, owner: OwnerId, key: TrackingKey, delta: u64) {
        log_debug!("persisting {delta}s for {key}");
        let store = self.store.clone();
        self.flushes.spawn_on(
            async move {
                if let Err(err) = store.increment(&owner, &key, delta).await {
                    log_error!("failed to persist {delta}s for {key}: {err:#}");
                }
            },
            &self.runtime,
        );
    }

    fn finish_binding(
        self: &Arc<Self>,
        generation: u64,
        owner: Option<OwnerId>,
        stored_total: u64,
    ) {
        let auto_start = lock_or_recover(&self.options).auto_start;
        let transition = {
            let mut state = self.lock_state();
            if self.generation.load(Ordering::SeqCst) != generation {
                log_debug!("discarding stale binding result");
                return;
            }
            state.complete_binding(owner, stored_total, Utc::now());
            if auto_start {
                state.auto_start()
            } else {
                Transition::Unchanged
            }
        };
        self.apply(transition);
    }

    fn unbind(&self) {
        self.stop_timers();
        let pending = {
            let mut state = self.lock_state();
            self.generation.fetch_add(1, Ordering::SeqCst);
            state.end_binding()
        };
        if let Some((owner, key, delta)) = pending {
            self.spawn_increment(owner, key, delta);
        }
    }

    fn set_surface_hidden(self: &Arc<Self>, hidden: bool) {
        let transition = self.lock_state().set_surface_hidden(hidden);
        if transition != Transition::Unchanged {
            log_debug!("surface hidden={hidden}: {transition:?}");
        }
        self.apply(transition);
    }
}

/// Times one piece of content at a time and reconciles the count with the
/// counter store.
///
/// Seconds are sent as additive deltas, never as absolute totals, so two
/// sessions timing the same key compose instead of overwriting each other.
/// Persistence is best effort: if the store is down, at most one flush
/// interval of time is lost per failure and the visible clock keeps going.
///
/// Dropping the tracker unbinds it, which sends the unflushed remainder.
pub struct ActivityTracker<S: CounterStore, I: IdentityProvider> {
    shared: Arc<Shared<S>>,
    identity: Arc<I>,
    defaults: BindOptions,
    lifetime: CancellationToken,
}

impl<S: CounterStore, I: IdentityProvider> ActivityTracker<S, I> {
    /// Must be called from within a Tokio runtime; increments are spawned
    /// on it.
    pub fn new(
        store: Arc<S>,
        identity: Arc<I>,
        scheduler: Arc<dyn Scheduler>,
        config: TrackerConfig,
    ) -> Self {
        let shared = Shared {
            state: Mutex::new(TrackerState::new()),
            generation: AtomicU64::new(0),
            options: Mutex::new(config.defaults),
            timers: Mutex::new(None),
            store,
            scheduler,
            tick_interval: config.tick_interval,
            flushes: TaskTracker::new(),
            drain: tokio::sync::Mutex::new(()),
            runtime: Handle::current(),
        };

        Self {
            shared: Arc::new(shared),
            identity,
            defaults: config.defaults,
            lifetime: CancellationToken::new(),
        }
    }

    /// Wall-clock tracker with default settings.
    pub fn with_tokio(store: Arc<S>, identity: Arc<I>) -> Self {
        Self::new(
            store,
            identity,
            Arc::new(TokioScheduler::current()),
            TrackerConfig::default(),
        )
    }

    /// Binds to `key` with the tracker's default options.
    pub async fn bind(&self, key: TrackingKey) {
        self.bind_with(key, self.defaults).await
    }

    /// Tears down the current binding, if any, then seeds from the store and
    /// optionally starts counting.
    pub async fn bind_with(&self, key: TrackingKey, options: BindOptions) {
        self.shared.unbind();

        let generation = {
            let mut state = self.shared.lock_state();
            state.begin_binding(key.clone());
            self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        *lock_or_recover(&self.shared.options) = options;

        if key.is_disabled() {
            log_debug!("tracking disabled for {key}");
            self.shared.finish_binding(generation, None, 0);
            return;
        }

        let owner = match self.identity.current_owner().await {
            Ok(Some(owner)) => Some(owner),
            Ok(None) => {
                log_info!("no signed-in learner, not tracking {key}");
                None
            }
            Err(err) => {
                log_warn!("identity lookup failed, not tracking {key}: {err:#}");
                None
            }
        };

        let stored_total = match &owner {
            Some(owner) => match self
                .shared
                .store
                .read_total(owner, key.content_type, &key.content_id)
                .await
            {
                Ok(total) => total.unwrap_or(0),
                Err(err) => {
                    log_warn!("could not read stored time for {key}, starting from zero: {err:#}");
                    0
                }
            },
            None => 0,
        };

        self.shared.finish_binding(generation, owner, stored_total);
    }

    /// Moves to another key. Same as [`ActivityTracker::bind`].
    pub async fn rebind(&self, key: TrackingKey) {
        self.bind(key).await
    }

    /// Cancels both timers and sends the unflushed remainder without waiting
    /// for it to land.
    pub fn unbind(&self) {
        self.shared.unbind();
    }

    pub fn start(&self) {
        let transition = self.shared.lock_state().start();
        self.shared.apply(transition);
    }

    /// Stops counting and flushes immediately. A no-op when already paused.
    pub fn pause(&self) {
        let transition = self.shared.lock_state().pause(PauseReason::Manual);
        self.shared.apply(transition);
    }

    /// Restarts counting. The flush cadence restarts from zero; nothing is
    /// flushed on resume.
    pub fn resume(&self) {
        let transition = self.shared.lock_state().resume();
        self.shared.apply(transition);
    }

    /// Zeroes the local session. The stored total is not touched and any
    /// seconds not yet flushed are dropped.
    pub fn reset(&self) {
        self.shared.stop_timers();
        self.shared.lock_state().reset();
    }

    /// Sends the seconds counted since the last flush, if any.
    pub fn flush(&self) {
        self.shared.flush();
    }

    /// Host visibility callback.
    pub fn on_visibility_change(&self, hidden: bool) {
        self.shared.set_surface_hidden(hidden);
    }

    /// Follows `relay` until the tracker is dropped. The current value is
    /// applied right away.
    pub fn follow_visibility(&self, relay: &VisibilityRelay) {
        let mut rx = relay.subscribe();
        let hidden = *rx.borrow_and_update();
        self.on_visibility_change(hidden);

        let weak = Arc::downgrade(&self.shared);
        let lifetime = self.lifetime.clone();
        self.shared.runtime.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = lifetime.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let hidden = *rx.borrow_and_update();
                        match weak.upgrade() {
                            Some(shared) => shared.set_surface_hidden(hidden),
                            None => break,
                        }
                    }
                }
            }
        });
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot::from(&*self.shared.lock_state())
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.shared.lock_state().elapsed_seconds
    }

    pub fn formatted(&self) -> String {
        self.snapshot().formatted
    }

    pub fn phase(&self) -> TrackerPhase {
        self.shared.lock_state().phase
    }

    pub fn pause_reason(&self) -> Option<PauseReason> {
        self.shared.lock_state().pause_reason
    }

    pub fn key(&self) -> Option<TrackingKey> {
        self.shared.lock_state().key.clone()
    }

    /// Waits until every increment spawned so far has completed or failed.
    pub async fn wait_for_flushes(&self) {
        let _drain = self.shared.drain.lock().await;
        let flushes = &self.shared.flushes;
        flushes.close();
        flushes.wait().await;
        flushes.reopen();
    }

    /// Unbinds and waits for the final increment to settle. Use before
    /// exiting the process.
    pub async fn shutdown(&self) {
        self.unbind();
        self.wait_for_flushes().await;
    }
}

impl<S: CounterStore, I: IdentityProvider> Drop for ActivityTracker<S, I> {
    fn drop(&mut self) {
        self.lifetime.cancel();
        self.shared.unbind();
    }
}
