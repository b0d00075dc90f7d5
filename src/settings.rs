use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock},
    time::Duration,
};

use crate::timer::{BindOptions, TrackerConfig, DEFAULT_FLUSH_EVERY_TICKS};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingSettings {
    pub tick_interval_ms: u64,
    pub flush_every_ticks: u32,
    pub auto_start: bool,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            flush_every_ticks: DEFAULT_FLUSH_EVERY_TICKS,
            auto_start: true,
        }
    }
}

impl TrackingSettings {
    /// `STUDYTIME_DEBUG=1` flushes on every tick so persistence can be
    /// watched live.
    pub fn with_env_overrides(mut self) -> Self {
        let debug_mode = std::env::var("STUDYTIME_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if debug_mode {
            self.flush_every_ticks = 1;
        }
        self
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            tick_interval: Duration::from_millis(self.tick_interval_ms.max(1)),
            defaults: BindOptions {
                auto_start: self.auto_start,
                flush_every_ticks: self.flush_every_ticks.max(1),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct UserSettings {
    tracking: TrackingSettings,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    /// Loads `path`, falling back to defaults when it is missing or cannot be
    /// parsed.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub fn tracking(&self) -> TrackingSettings {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tracking
            .clone()
    }

    pub fn update_tracking(&self, settings: TrackingSettings) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        guard.tracking = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
