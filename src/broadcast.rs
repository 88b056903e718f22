//! Cross-tab session change propagation.
//!
//! Each browser tab owns one subscriber; publishing is fire-and-forget and a
//! tab that misses a message self-corrects at its next health check. Channels
//! are looked up by name in a process-wide registry so every handle bound to
//! the same name shares one channel, mirroring how named browser broadcast
//! channels rendezvous.

use crate::session::SessionEnvelope;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use tokio::sync::broadcast;
use tracing::debug;

/// Default channel name shared by all tabs of one browser profile.
pub const CHANNEL_NAME: &str = "varco_session_sync";

const CHANNEL_CAPACITY: usize = 16;

/// Messages exchanged between tabs.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionMessage {
    /// A tab established or rotated a session.
    Updated(SessionEnvelope),
    /// A tab logged out or invalidated the session.
    Cleared,
}

fn registry() -> &'static Mutex<HashMap<String, broadcast::Sender<SessionMessage>>> {
    static CHANNELS: OnceLock<Mutex<HashMap<String, broadcast::Sender<SessionMessage>>>> =
        OnceLock::new();
    CHANNELS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Handle to a named cross-tab channel.
#[derive(Clone, Debug)]
pub struct SessionBroadcast {
    name: String,
}

impl Default for SessionBroadcast {
    fn default() -> Self {
        Self::named(CHANNEL_NAME)
    }
}

impl SessionBroadcast {
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    fn sender(&self) -> broadcast::Sender<SessionMessage> {
        let mut channels = registry().lock().unwrap();
        channels
            .entry(self.name.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Post a message to every sibling subscriber. Fire-and-forget: the
    /// sender handle is dropped right after posting and a missing audience is
    /// not an error.
    pub fn broadcast(&self, message: SessionMessage) {
        let delivered = self.sender().send(message).unwrap_or(0);
        debug!(
            channel = %self.name,
            subscribers = delivered,
            "Broadcast session message"
        );
    }

    /// Open a receiver on the channel. Dropping it unsubscribes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionMessage> {
        self.sender().subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::{SessionBroadcast, SessionMessage};
    use crate::session::{SessionEnvelope, UserIdentity};
    use uuid::Uuid;

    fn session() -> SessionEnvelope {
        SessionEnvelope {
            access_token: "token".to_string(),
            refresh_token: None,
            expires_at: 1_700_000_000,
            user: UserIdentity {
                id: Uuid::new_v4(),
                email: "kai@example.org".to_string(),
                role: "participant".to_string(),
                display_name: None,
            },
        }
    }

    #[tokio::test]
    async fn sibling_tabs_share_a_named_channel() {
        let tab_a = SessionBroadcast::named("test_shared_channel");
        let tab_b = SessionBroadcast::named("test_shared_channel");
        let mut rx = tab_b.subscribe();

        let session = session();
        tab_a.broadcast(SessionMessage::Updated(session.clone()));
        tab_a.broadcast(SessionMessage::Cleared);

        assert_eq!(rx.recv().await.unwrap(), SessionMessage::Updated(session));
        assert_eq!(rx.recv().await.unwrap(), SessionMessage::Cleared);
    }

    #[tokio::test]
    async fn differently_named_channels_are_isolated() {
        let tab_a = SessionBroadcast::named("test_channel_left");
        let tab_b = SessionBroadcast::named("test_channel_right");
        let mut rx = tab_b.subscribe();

        tab_a.broadcast(SessionMessage::Cleared);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn broadcast_without_subscribers_is_a_noop() {
        let lonely = SessionBroadcast::named("test_channel_empty");
        lonely.broadcast(SessionMessage::Cleared);
    }
}
