// Application hub: the single writer for timer and speech state.
//
// Every mutation flows through one mpsc command channel into the event loop
// below, which applies the transition, persists it, and only then broadcasts
// the result. The loop also owns the one-second clock driving `tick()` and
// the periodic daily-statistics reset, so control actions, clock ticks, and
// resets are never interleaved.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::broadcast::{Broadcaster, SessionId};
use crate::db::{self, Database};
use crate::error::HubError;
use crate::protocol::{ServerEvent, TimerControl};
use crate::speech::{NewSpeech, Speech};
use crate::timer::{TimerReplace, TimerState};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Cadence of the process-wide clock that drives `tick()` while running.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Cadence of the daily-statistics reset check.
pub const STATS_RESET_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Speeches delivered in the on-connect snapshot.
pub const SNAPSHOT_SPEECH_LIMIT: u32 = 10;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Requests accepted by the hub loop. Each carries a oneshot for the result;
/// fire-and-forget callers may drop the receiver.
pub enum HubCommand {
    TimerControl {
        control: TimerControl,
        reply: oneshot::Sender<Result<TimerState, HubError>>,
    },
    ReplaceTimer {
        update: TimerReplace,
        reply: oneshot::Sender<Result<TimerState, HubError>>,
    },
    ResetTimer {
        total_time: Option<u32>,
        reply: oneshot::Sender<Result<TimerState, HubError>>,
    },
    GetTimer {
        reply: oneshot::Sender<TimerState>,
    },
    AddSpeech {
        submission: NewSpeech,
        reply: oneshot::Sender<Result<Speech, HubError>>,
    },
    Subscribe {
        reply: oneshot::Sender<Result<SessionSnapshot, HubError>>,
    },
}

/// What a newly connected session receives: its broadcast queue plus the
/// initial snapshot, captured atomically inside the hub loop so no update
/// published after the snapshot can be older than it.
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub timer: TimerState,
    pub latest_speeches: Vec<Speech>,
    pub frames: mpsc::UnboundedReceiver<String>,
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

/// Owner of the authoritative timer tuple and the persist-then-broadcast
/// ordering. Constructed once at startup; consumed by [`run`].
pub struct Hub {
    db: Arc<Database>,
    broadcaster: Arc<Broadcaster>,
    timer: TimerState,
}

impl Hub {
    /// Build the hub, recovering the persisted timer tuple (the seeded
    /// defaults on a fresh database).
    pub fn new(db: Arc<Database>, broadcaster: Arc<Broadcaster>) -> anyhow::Result<Self> {
        let timer = db.timer_state()?;
        Ok(Hub {
            db,
            broadcaster,
            timer,
        })
    }

    fn handle_command(&mut self, command: HubCommand) {
        match command {
            HubCommand::TimerControl { control, reply } => {
                let result = self.apply_timer_control(control);
                if let Err(err) = &result {
                    warn!("Timer control rejected: {err}");
                }
                let _ = reply.send(result);
            }
            HubCommand::ReplaceTimer { update, reply } => {
                let _ = reply.send(self.replace_timer(update));
            }
            HubCommand::ResetTimer { total_time, reply } => {
                let _ = reply.send(self.reset_timer(total_time));
            }
            HubCommand::GetTimer { reply } => {
                let _ = reply.send(self.timer.clone());
            }
            HubCommand::AddSpeech { submission, reply } => {
                let result = self.add_speech(submission);
                if let Err(err) = &result {
                    warn!("Speech rejected: {err}");
                }
                let _ = reply.send(result);
            }
            HubCommand::Subscribe { reply } => {
                let _ = reply.send(self.subscribe());
            }
        }
    }

    /// Apply a semantic timer action: compute the next tuple, persist it,
    /// and broadcast it. An ineffective `tick` (stopped or expired timer)
    /// skips both persistence and broadcast.
    fn apply_timer_control(&mut self, control: TimerControl) -> Result<TimerState, HubError> {
        let mut next = self.timer.clone();
        match &control {
            TimerControl::Start => next.start(),
            TimerControl::Pause => next.pause(),
            TimerControl::Reset => next.reset(),
            TimerControl::SetTime { value } => next.set_total_time(*value)?,
            TimerControl::SetSpeaker { value } => next.set_speaker(value.clone()),
            TimerControl::Tick => {
                if !next.tick() {
                    return Ok(self.timer.clone());
                }
            }
        }
        let is_reset = matches!(control, TimerControl::Reset);
        self.commit_timer(next, is_reset)
    }

    /// Bulk overwrite (`POST /api/timer`): all four fields verbatim.
    fn replace_timer(&mut self, update: TimerReplace) -> Result<TimerState, HubError> {
        let mut next = self.timer.clone();
        next.replace_full(&update);
        self.commit_timer(next, false)
    }

    /// Reset, optionally adopting a new total duration first.
    fn reset_timer(&mut self, total_time: Option<u32>) -> Result<TimerState, HubError> {
        let mut next = self.timer.clone();
        if let Some(seconds) = total_time {
            next.set_total_time(seconds)?;
        }
        next.reset();
        self.commit_timer(next, true)
    }

    /// Persist `next` and, only once the write succeeded, commit it in
    /// memory and broadcast it. On a failed write the in-memory tuple stays
    /// at its pre-action value and nothing is published.
    fn commit_timer(
        &mut self,
        mut next: TimerState,
        is_reset: bool,
    ) -> Result<TimerState, HubError> {
        next.last_update = db::now();
        if let Err(err) = self.db.save_timer_state(&next) {
            error!("Failed to persist timer state: {err:#}");
            return Err(HubError::from(err));
        }
        self.timer = next.clone();
        let event = if is_reset {
            ServerEvent::TimerReset(next.clone())
        } else {
            ServerEvent::TimerUpdate(next.clone())
        };
        self.broadcaster.publish(&event);
        Ok(next)
    }

    /// Validate, persist, and broadcast a speech submission. Returns the
    /// stored record including the generated id and timestamp.
    fn add_speech(&mut self, submission: NewSpeech) -> Result<Speech, HubError> {
        submission.validate()?;
        let debate_topic = submission.topic().to_string();
        let duration = submission.duration_secs();
        let speech_time = db::now();
        let id = self
            .db
            .insert_speech(
                &submission.speaker,
                &submission.content,
                &debate_topic,
                duration,
                speech_time,
            )
            .map_err(|err| {
                error!("Failed to persist speech: {err:#}");
                HubError::from(err)
            })?;
        let speech = Speech {
            id,
            speaker: submission.speaker,
            content: submission.content,
            debate_topic,
            duration,
            speech_time,
            likes: 0,
        };
        self.broadcaster.publish(&ServerEvent::NewSpeech(speech.clone()));
        Ok(speech)
    }

    /// Register a session and capture its initial snapshot in one step.
    fn subscribe(&mut self) -> Result<SessionSnapshot, HubError> {
        let latest_speeches = self.db.latest_speeches(SNAPSHOT_SPEECH_LIMIT)?;
        let (session_id, frames) = self.broadcaster.subscribe();
        Ok(SessionSnapshot {
            session_id,
            timer: self.timer.clone(),
            latest_speeches,
            frames,
        })
    }

    /// One firing of the process-wide clock.
    fn drive_tick(&mut self) {
        if !self.timer.is_running {
            return;
        }
        if let Err(err) = self.apply_timer_control(TimerControl::Tick) {
            error!("Clock tick failed: {err}");
        }
    }

    fn check_daily_reset(&mut self) {
        match self.db.maybe_reset_daily(Local::now().date_naive()) {
            Ok(true) => info!("Daily visit counter reset"),
            Ok(false) => {}
            Err(err) => error!("Daily statistics check failed: {err:#}"),
        }
    }
}

/// Run the hub event loop until every command sender is dropped.
pub async fn run(mut hub: Hub, mut commands: mpsc::Receiver<HubCommand>) {
    info!("Hub event loop started");

    let mut tick = tokio::time::interval(TICK_INTERVAL);
    let mut stats_check = tokio::time::interval(STATS_RESET_INTERVAL);
    // The first tick of a fresh interval completes immediately; consume both
    // so the first real firing happens after one full period.
    tick.tick().await;
    stats_check.tick().await;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => hub.handle_command(command),
                None => {
                    info!("Hub command channel closed, shutting down");
                    break;
                }
            },
            _ = tick.tick() => hub.drive_tick(),
            _ = stats_check.tick() => hub.check_daily_reset(),
        }
    }

    info!("Hub event loop exiting");
}

// ---------------------------------------------------------------------------
// HubHandle
// ---------------------------------------------------------------------------

/// Cloneable sender half used by HTTP handlers and realtime sessions.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    pub fn new(commands: mpsc::Sender<HubCommand>) -> Self {
        HubHandle { commands }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> HubCommand,
    ) -> Result<T, HubError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| hub_gone())?;
        rx.await.map_err(|_| hub_gone())
    }

    /// Apply a semantic timer action and return the resulting tuple.
    pub async fn timer_control(&self, control: TimerControl) -> Result<TimerState, HubError> {
        self.request(|reply| HubCommand::TimerControl { control, reply })
            .await?
    }

    /// Bulk overwrite of the timer tuple.
    pub async fn replace_timer(&self, update: TimerReplace) -> Result<TimerState, HubError> {
        self.request(|reply| HubCommand::ReplaceTimer { update, reply })
            .await?
    }

    /// Reset the timer, optionally adopting a new total duration.
    pub async fn reset_timer(&self, total_time: Option<u32>) -> Result<TimerState, HubError> {
        self.request(|reply| HubCommand::ResetTimer { total_time, reply })
            .await?
    }

    /// Read the current timer tuple.
    pub async fn get_timer(&self) -> Result<TimerState, HubError> {
        self.request(|reply| HubCommand::GetTimer { reply }).await
    }

    /// Append a speech; returns the stored record.
    pub async fn add_speech(&self, submission: NewSpeech) -> Result<Speech, HubError> {
        self.request(|reply| HubCommand::AddSpeech { submission, reply })
            .await?
    }

    /// Register a realtime session and receive its initial snapshot.
    pub async fn subscribe(&self) -> Result<SessionSnapshot, HubError> {
        self.request(|reply| HubCommand::Subscribe { reply }).await?
    }
}

fn hub_gone() -> HubError {
    HubError::Persistence("hub task is not running".to_string())
}
