use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{OwnerId, TrackingKey};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TrackerPhase {
    #[default]
    Uninitialized,
    Running,
    Paused,
}

/// Why a tracker is paused. Only a `Hidden` pause is lifted by the surface
/// becoming visible again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PauseReason {
    Manual,
    Hidden,
}

/// Outcome of a state transition request, used by the controller to decide
/// which timers and flushes to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Started,
    Paused,
    Resumed,
    Unchanged,
}

/// In-memory state of one binding.
///
/// `last_flushed_seconds <= elapsed_seconds` holds between flushes.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerState {
    pub key: Option<TrackingKey>,
    #[serde(skip)]
    pub owner: Option<OwnerId>,
    pub phase: TrackerPhase,
    pub pause_reason: Option<PauseReason>,
    pub elapsed_seconds: u64,
    pub last_flushed_seconds: u64,
    /// Seeding finished for the current key.
    pub initialized: bool,
    /// Last visibility reported by the host. Survives rebinds.
    pub surface_hidden: bool,
    pub bound_at: Option<DateTime<Utc>>,
}

impl TrackerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fresh, not yet seeded binding for `key`.
    pub fn begin_binding(&mut self, key: TrackingKey) {
        let surface_hidden = self.surface_hidden;
        *self = Self {
            key: Some(key),
            surface_hidden,
            ..Self::default()
        };
    }

    /// Finishes seeding. `stored_total` is the counter read from the store,
    /// `owner` is `None` when tracking stays inert.
    pub fn complete_binding(
        &mut self,
        owner: Option<OwnerId>,
        stored_total: u64,
        bound_at: DateTime<Utc>,
    ) {
        self.owner = owner;
        self.bound_at = Some(bound_at);
        self.elapsed_seconds = stored_total;
        self.last_flushed_seconds = stored_total;
        self.phase = TrackerPhase::Uninitialized;
        self.pause_reason = None;
        self.initialized = true;
    }

    /// Drops the binding and returns the delta that was never flushed, if
    /// it can be persisted.
    pub fn end_binding(&mut self) -> Option<(OwnerId, TrackingKey, u64)> {
        let pending = self.pending_delta();
        let owner = self.owner.take();
        let key = self.key.take();
        let surface_hidden = self.surface_hidden;
        *self = Self {
            surface_hidden,
            ..Self::default()
        };

        match (owner, key, pending) {
            (Some(owner), Some(key), delta) if delta > 0 && !key.is_disabled() => {
                Some((owner, key, delta))
            }
            _ => None,
        }
    }

    /// Persistence is only attempted with a known owner and a real key.
    pub fn is_trackable(&self) -> bool {
        self.owner.is_some() && self.key.as_ref().is_some_and(|key| !key.is_disabled())
    }

    pub fn pending_delta(&self) -> u64 {
        self.elapsed_seconds.saturating_sub(self.last_flushed_seconds)
    }

    /// Counts one second while running.
    pub fn tick(&mut self) -> bool {
        if self.phase != TrackerPhase::Running {
            return false;
        }
        self.elapsed_seconds = self.elapsed_seconds.saturating_add(1);
        true
    }

    /// Claims the unflushed delta and advances the watermark before the
    /// increment is sent, so a failed send under-reports instead of
    /// double counting.
    pub fn take_flush(&mut self) -> Option<(OwnerId, TrackingKey, u64)> {
        if !self.is_trackable() {
            return None;
        }
        let delta = self.pending_delta();
        if delta == 0 {
            return None;
        }
        self.last_flushed_seconds = self.elapsed_seconds;

        let owner = self.owner.clone()?;
        let key = self.key.clone()?;
        Some((owner, key, delta))
    }

    /// Automatic start after seeding. Lands in a hidden pause when the
    /// surface is not visible.
    pub fn auto_start(&mut self) -> Transition {
        if !self.initialized || !self.is_trackable() || self.phase != TrackerPhase::Uninitialized {
            return Transition::Unchanged;
        }
        if self.surface_hidden {
            self.phase = TrackerPhase::Paused;
            self.pause_reason = Some(PauseReason::Hidden);
            return Transition::Unchanged;
        }
        self.phase = TrackerPhase::Running;
        Transition::Started
    }

    /// User-initiated start. From `Paused` it acts as a resume.
    pub fn start(&mut self) -> Transition {
        if !self.initialized || !self.is_trackable() {
            return Transition::Unchanged;
        }
        match self.phase {
            TrackerPhase::Uninitialized => {
                self.phase = TrackerPhase::Running;
                self.pause_reason = None;
                Transition::Started
            }
            TrackerPhase::Paused => self.resume(),
            TrackerPhase::Running => Transition::Unchanged,
        }
    }

    pub fn pause(&mut self, reason: PauseReason) -> Transition {
        match self.phase {
            TrackerPhase::Running => {
                self.phase = TrackerPhase::Paused;
                self.pause_reason = Some(reason);
                Transition::Paused
            }
            TrackerPhase::Paused => {
                // A user pause on top of a hidden one must stick once the
                // surface comes back.
                if reason == PauseReason::Manual {
                    self.pause_reason = Some(PauseReason::Manual);
                }
                Transition::Unchanged
            }
            TrackerPhase::Uninitialized => Transition::Unchanged,
        }
    }

    /// User-initiated resume; lifts any pause.
    pub fn resume(&mut self) -> Transition {
        if self.phase != TrackerPhase::Paused {
            return Transition::Unchanged;
        }
        self.phase = TrackerPhase::Running;
        self.pause_reason = None;
        Transition::Resumed
    }

    pub fn set_surface_hidden(&mut self, hidden: bool) -> Transition {
        self.surface_hidden = hidden;
        if hidden {
            return self.pause(PauseReason::Hidden);
        }
        if self.phase == TrackerPhase::Paused && self.pause_reason == Some(PauseReason::Hidden) {
            return self.resume();
        }
        Transition::Unchanged
    }

    /// Clears the local session. Persisted history is untouched.
    pub fn reset(&mut self) {
        self.elapsed_seconds = 0;
        self.last_flushed_seconds = 0;
        self.phase = TrackerPhase::Uninitialized;
        self.pause_reason = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn seeded(total: u64) -> TrackerState {
        let mut state = TrackerState::new();
        state.begin_binding(TrackingKey::quiz("q1").with_chapter("c1"));
        state.complete_binding(Some(OwnerId::new("u1")), total, Utc::now());
        state
    }

    #[test]
    fn seeding_sets_both_counters() {
        let state = seeded(100);
        assert_eq!(state.elapsed_seconds, 100);
        assert_eq!(state.last_flushed_seconds, 100);
        assert_eq!(state.phase, TrackerPhase::Uninitialized);
        assert!(state.initialized);
    }

    #[test]
    fn ticks_only_count_while_running() {
        let mut state = seeded(0);
        assert!(!state.tick());
        assert_eq!(state.auto_start(), Transition::Started);
        assert!(state.tick());
        assert!(state.tick());
        state.pause(PauseReason::Manual);
        assert!(!state.tick());
        assert_eq!(state.elapsed_seconds, 2);
    }

    #[test]
    fn flush_claims_delta_once() {
        let mut state = seeded(20);
        state.auto_start();
        for _ in 0..27 {
            state.tick();
        }

        let (_, key, delta) = state.take_flush().unwrap();
        assert_eq!(delta, 27);
        assert_eq!(key.content_id, "q1");
        assert_eq!(state.last_flushed_seconds, 47);
        assert!(state.take_flush().is_none());
    }

    #[test]
    fn untrackable_states_never_flush() {
        let mut anonymous = TrackerState::new();
        anonymous.begin_binding(TrackingKey::chapter("c1"));
        anonymous.complete_binding(None, 0, Utc::now());
        assert_eq!(anonymous.auto_start(), Transition::Unchanged);
        assert_eq!(anonymous.start(), Transition::Unchanged);
        anonymous.elapsed_seconds = 5;
        assert!(anonymous.take_flush().is_none());

        let mut disabled = TrackerState::new();
        disabled.begin_binding(TrackingKey::disabled(crate::models::ContentType::Quiz));
        disabled.complete_binding(Some(OwnerId::new("u1")), 0, Utc::now());
        assert!(!disabled.is_trackable());
        assert_eq!(disabled.start(), Transition::Unchanged);
    }

    #[test]
    fn hidden_surface_does_not_lift_manual_pause() {
        let mut state = seeded(0);
        state.auto_start();
        assert_eq!(state.pause(PauseReason::Manual), Transition::Paused);

        assert_eq!(state.set_surface_hidden(true), Transition::Unchanged);
        assert_eq!(state.set_surface_hidden(false), Transition::Unchanged);
        assert_eq!(state.phase, TrackerPhase::Paused);
        assert_eq!(state.pause_reason, Some(PauseReason::Manual));

        assert_eq!(state.resume(), Transition::Resumed);
        assert_eq!(state.phase, TrackerPhase::Running);
    }

    #[test]
    fn visibility_regain_lifts_hidden_pause() {
        let mut state = seeded(0);
        state.auto_start();
        assert_eq!(state.set_surface_hidden(true), Transition::Paused);
        assert_eq!(state.pause_reason, Some(PauseReason::Hidden));
        assert_eq!(state.set_surface_hidden(false), Transition::Resumed);
        assert_eq!(state.pause_reason, None);
    }

    #[test]
    fn manual_pause_while_hidden_upgrades_reason() {
        let mut state = seeded(0);
        state.auto_start();
        state.set_surface_hidden(true);
        assert_eq!(state.pause(PauseReason::Manual), Transition::Unchanged);
        assert_eq!(state.set_surface_hidden(false), Transition::Unchanged);
        assert_eq!(state.phase, TrackerPhase::Paused);
    }

    #[test]
    fn auto_start_while_hidden_waits_for_visibility() {
        let mut state = TrackerState::new();
        state.set_surface_hidden(true);
        state.begin_binding(TrackingKey::exercise("e1"));
        state.complete_binding(Some(OwnerId::new("u1")), 0, Utc::now());

        assert_eq!(state.auto_start(), Transition::Unchanged);
        assert_eq!(state.phase, TrackerPhase::Paused);
        assert_eq!(state.set_surface_hidden(false), Transition::Resumed);
        assert_eq!(state.phase, TrackerPhase::Running);
    }

    #[test]
    fn reset_keeps_binding_but_zeroes_counters() {
        let mut state = seeded(40);
        state.auto_start();
        state.tick();
        state.reset();

        assert_eq!(state.elapsed_seconds, 0);
        assert_eq!(state.last_flushed_seconds, 0);
        assert_eq!(state.phase, TrackerPhase::Uninitialized);
        assert!(state.is_trackable());
        assert_eq!(state.start(), Transition::Started);
    }

    #[test]
    fn end_binding_returns_unflushed_remainder() {
        let mut state = seeded(20);
        state.elapsed_seconds = 47;
        state.set_surface_hidden(true);

        let (owner, key, delta) = state.end_binding().unwrap();
        assert_eq!(owner.as_str(), "u1");
        assert_eq!(key.content_id, "q1");
        assert_eq!(delta, 27);
        assert!(state.key.is_none());
        assert!(state.surface_hidden);
        assert!(state.end_binding().is_none());
    }
}
