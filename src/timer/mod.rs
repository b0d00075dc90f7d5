pub mod batch;
pub mod commands;
pub mod controller;
pub mod scheduler;
pub mod state;
pub mod visibility;

pub use batch::{chapter_time_totals, quiz_time_totals, time_totals};
pub use controller::{
    ActivityTracker, BindOptions, TrackerConfig, TrackerSnapshot, DEFAULT_FLUSH_EVERY_TICKS,
};
pub use scheduler::{ManualScheduler, Scheduler, TimerHandle, TimerTask, TokioScheduler};
pub use state::{PauseReason, TrackerPhase, TrackerState};
pub use visibility::VisibilityRelay;
