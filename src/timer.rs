// Shared countdown timer: state tuple and transitions.
//
// The transitions here are pure; serialization against concurrent actions,
// persistence, and broadcast ordering are owned by the hub loop. An external
// clock source drives `tick()` — this module only defines the transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HubError;

/// Default countdown duration in seconds for a freshly created timer row.
pub const DEFAULT_TOTAL_TIME: u32 = 300;

/// The authoritative state of the single shared countdown timer.
///
/// Exactly one of these exists per process, mirrored by the singleton
/// `timer_state` row. `remaining_time` never goes below zero; the bulk
/// update path ([`TimerState::replace_full`]) may leave it above
/// `total_time`, which is tolerated rather than re-derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerState {
    pub is_running: bool,
    pub remaining_time: u32,
    pub total_time: u32,
    pub current_speaker: String,
    pub last_update: DateTime<Utc>,
}

/// Full-tuple overwrite payload for the bulk update path (`POST /api/timer`).
///
/// All four mutable fields are written verbatim; `remaining_time` is not
/// re-derived from `total_time`, so a caller supplying inconsistent values
/// gets exactly what it asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerReplace {
    pub is_running: bool,
    pub remaining_time: u32,
    pub total_time: u32,
    #[serde(default)]
    pub current_speaker: String,
}

impl TimerState {
    /// The default tuple seeded at first startup: stopped, five minutes.
    pub fn initial(now: DateTime<Utc>) -> Self {
        TimerState {
            is_running: false,
            remaining_time: DEFAULT_TOTAL_TIME,
            total_time: DEFAULT_TOTAL_TIME,
            current_speaker: String::new(),
            last_update: now,
        }
    }

    /// Start the countdown. Idempotent: only the running flag changes.
    pub fn start(&mut self) {
        self.is_running = true;
    }

    /// Pause the countdown. Idempotent.
    pub fn pause(&mut self) {
        self.is_running = false;
    }

    /// Stop the countdown, restore the full duration, and clear the speaker.
    pub fn reset(&mut self) {
        self.is_running = false;
        self.remaining_time = self.total_time;
        self.current_speaker.clear();
    }

    /// Change the target duration for the next speaker.
    ///
    /// `remaining_time` follows the new total only while stopped; a running
    /// timer keeps counting down uninterrupted so the live display never
    /// jumps mid-speech.
    pub fn set_total_time(&mut self, seconds: u32) -> Result<(), HubError> {
        if seconds == 0 {
            return Err(HubError::validation(
                "total_time must be a positive number of seconds",
            ));
        }
        self.total_time = seconds;
        if !self.is_running {
            self.remaining_time = seconds;
        }
        Ok(())
    }

    /// Set the current speaker. An empty name clears the field.
    pub fn set_speaker(&mut self, name: String) {
        self.current_speaker = name;
    }

    /// One clock tick: decrement the remaining time by a second.
    ///
    /// Returns `true` when the state changed. A stopped or already-expired
    /// timer is a strict no-op so the caller skips persistence and broadcast.
    pub fn tick(&mut self) -> bool {
        if self.is_running && self.remaining_time > 0 {
            self.remaining_time -= 1;
            true
        } else {
            false
        }
    }

    /// Admin override: overwrite all four mutable fields directly, bypassing
    /// the semantic actions above.
    pub fn replace_full(&mut self, update: &TimerReplace) {
        self.is_running = update.is_running;
        self.remaining_time = update.remaining_time;
        self.total_time = update.total_time;
        self.current_speaker = update.current_speaker.clone();
    }
}
