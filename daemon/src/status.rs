use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::game_state::Activity;

/// What the tracker is currently doing.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum TrackerState {
    /// The game is not running; nothing is published.
    WaitingForGame,
    /// The game runs but there is no presence consumer to publish to.
    WaitingForConsumer,
    /// The console log does not exist; the user has to enable it.
    LogMissing,
    /// An activity is being published.
    Active,
}

/// Runtime status written by the daemon to <config dir>/tf2-presence/status.toml.
/// Presence transports read this file (read-only) to publish the activity.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TrackerStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    pub state: TrackerState,
    /// When the current game session started (RFC 3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_start: Option<String>,
    /// Human-readable message if the user needs to act or something went wrong.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The activity to publish while `state` is `active`. Kept last: it is a TOML table.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<Activity>,
}

impl TrackerStatus {
    /// Constructs the initial status on daemon startup.
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: TrackerState::WaitingForGame,
            activity: None,
            session_start: None,
            error: None,
        }
    }
}

/// Seam to whatever actually publishes the activity to the presence service.
pub trait PresencePublisher {
    fn publish(&mut self, activity: &Activity, session_start: DateTime<Utc>);

    /// Removes any published activity and records why.
    fn clear(&mut self, state: TrackerState, message: Option<String>);
}

/// Publishes by writing `status.toml`. Only writes when the status changes.
pub struct StatusFilePublisher {
    path: PathBuf,
    current: TrackerStatus,
}

impl StatusFilePublisher {
    pub fn new(path: PathBuf) -> Self {
        let current = TrackerStatus::new();
        write_status(&path, &current);
        Self { path, current }
    }

    #[cfg(test)]
    pub fn status(&self) -> &TrackerStatus {
        &self.current
    }

    pub fn status_path(&self) -> &Path {
        &self.path
    }

    fn update(&mut self, next: TrackerStatus) {
        if next != self.current {
            write_status(&self.path, &next);
            self.current = next;
        }
    }
}

impl PresencePublisher for StatusFilePublisher {
    fn publish(&mut self, activity: &Activity, session_start: DateTime<Utc>) {
        let next = TrackerStatus {
            state: TrackerState::Active,
            activity: Some(activity.clone()),
            session_start: Some(session_start.to_rfc3339()),
            error: None,
            ..self.current.clone()
        };
        self.update(next);
    }

    fn clear(&mut self, state: TrackerState, message: Option<String>) {
        let next = TrackerStatus {
            state,
            activity: None,
            session_start: None,
            error: message,
            ..self.current.clone()
        };
        self.update(next);
    }
}

/// Serializes `status` to TOML and writes it to `path`.
/// Creates the parent directory if it does not exist.
/// A status write failure is logged and never stops the daemon.
pub fn write_status(path: &Path, status: &TrackerStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!(target: "status", "Failed to create directory {}: {e}", parent.display());
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                tracing::warn!(target: "status", "Failed to write status file: {e}");
            }
        }
        Err(e) => tracing::warn!(target: "status", "Failed to serialize status: {e}"),
    }
}
