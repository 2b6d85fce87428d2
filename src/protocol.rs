// Wire protocol for the realtime channel.
//
// Frames are JSON text with an `{"event": ..., "data": ...}` envelope in
// both directions, e.g.
//   {"event":"timer_control","data":{"action":"set_time","value":120}}
//   {"event":"timer_update","data":{"is_running":true, ...}}

use serde::{Deserialize, Serialize};

use crate::speech::{NewSpeech, Speech};
use crate::timer::TimerState;

/// Messages a session may send to the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    TimerControl(TimerControl),
    NewSpeech(NewSpeech),
}

/// Timer control actions. `value` carries the seconds for `set_time` and the
/// name for `set_speaker`; the other actions take no payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TimerControl {
    Start,
    Pause,
    Reset,
    SetTime { value: u32 },
    SetSpeaker { value: String },
    Tick,
}

/// Events the server pushes to sessions. `TimerState` and `LatestSpeeches`
/// are only delivered once per session, as the on-connect snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    TimerState(TimerState),
    TimerUpdate(TimerState),
    TimerReset(TimerState),
    NewSpeech(Speech),
    LatestSpeeches(Vec<Speech>),
}
