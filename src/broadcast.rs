// Fan-out of server events to connected realtime sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::protocol::ServerEvent;

/// Identifies one subscribed session.
pub type SessionId = u64;

/// Registry of connected sessions.
///
/// Each event is serialized once and pushed onto every session's unbounded
/// queue, so delivery is fire-and-forget and per-session order matches
/// publish order. A session whose receiver is gone is dropped from the
/// registry during the next publish.
#[derive(Default)]
pub struct Broadcaster {
    sessions: Mutex<HashMap<SessionId, mpsc::UnboundedSender<String>>>,
    next_id: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Broadcaster::default()
    }

    /// Register a new session and return its id plus the frame queue.
    pub fn subscribe(&self) -> (SessionId, mpsc::UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions
            .lock()
            .expect("broadcaster mutex poisoned")
            .insert(id, tx);
        (id, rx)
    }

    /// Remove a session. Safe to call for an id that was already pruned.
    pub fn unsubscribe(&self, id: SessionId) {
        self.sessions
            .lock()
            .expect("broadcaster mutex poisoned")
            .remove(&id);
    }

    /// Serialize `event` once and deliver it to every live session.
    pub fn publish(&self, event: &ServerEvent) {
        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to serialize broadcast event: {e}");
                return;
            }
        };
        let mut sessions = self.sessions.lock().expect("broadcaster mutex poisoned");
        let before = sessions.len();
        sessions.retain(|_, tx| tx.send(frame.clone()).is_ok());
        let dropped = before - sessions.len();
        if dropped > 0 {
            debug!("Pruned {dropped} disconnected session(s) during publish");
        }
    }

    /// Number of currently registered sessions.
    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .expect("broadcaster mutex poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::TimerState;
    use chrono::Utc;

    fn update_event(remaining: u32) -> ServerEvent {
        let mut state = TimerState::initial(Utc::now());
        state.remaining_time = remaining;
        ServerEvent::TimerUpdate(state)
    }

    #[tokio::test]
    async fn subscriber_receives_events_in_publish_order() {
        let broadcaster = Broadcaster::new();
        let (_id, mut rx) = broadcaster.subscribe();

        broadcaster.publish(&update_event(3));
        broadcaster.publish(&update_event(2));
        broadcaster.publish(&update_event(1));

        for expected in [3, 2, 1] {
            let frame = rx.recv().await.unwrap();
            let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
            assert_eq!(value["data"]["remaining_time"], expected);
        }
    }

    #[tokio::test]
    async fn all_subscribers_receive_each_event() {
        let broadcaster = Broadcaster::new();
        let (_a, mut rx_a) = broadcaster.subscribe();
        let (_b, mut rx_b) = broadcaster.subscribe();

        broadcaster.publish(&update_event(9));

        for rx in [&mut rx_a, &mut rx_b] {
            let frame = rx.recv().await.unwrap();
            assert!(frame.contains("\"remaining_time\":9"));
        }
    }

    #[tokio::test]
    async fn dropped_receiver_is_pruned_on_publish() {
        let broadcaster = Broadcaster::new();
        let (_a, rx_a) = broadcaster.subscribe();
        let (_b, _rx_b) = broadcaster.subscribe();
        assert_eq!(broadcaster.session_count(), 2);

        drop(rx_a);
        broadcaster.publish(&update_event(5));
        assert_eq!(broadcaster.session_count(), 1);
    }

    #[tokio::test]
    async fn unsubscribed_session_stops_receiving() {
        let broadcaster = Broadcaster::new();
        let (id, mut rx) = broadcaster.subscribe();
        broadcaster.unsubscribe(id);
        broadcaster.publish(&update_event(5));
        // Sender side is gone, so the channel reports closed.
        assert!(rx.recv().await.is_none());
    }
}
