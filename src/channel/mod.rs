//! Remote store abstraction.
//!
//! The hosted store is a JSON tree addressed by `/`-separated paths.
//! Four operations cover everything the sync core needs: point read,
//! point write, remove, and subscribe-to-changes. Subscriptions fire
//! for every mutation at or beneath the subscribed path — **including
//! the subscriber's own writes**. That echo re-delivery is a property
//! of the primitive, not a bug; the engine filters it explicitly.
//!
//! Path layout consumed by the core:
//!
//! ```text
//! rooms/{room}/content               — DocumentRecord (the document)
//! rooms/{room}/users/{participant}   — PresenceRecord
//! rooms/{room}/editing               — exclusive-lock holder (optional)
//! ```
//!
//! Two implementations ship: [`memory::MemoryChannel`] (in-process, for
//! tests and single-process use) and [`ws::WsChannel`] (WebSocket
//! client for the [`StoreServer`](crate::server::StoreServer)). A
//! channel is constructed once per process and injected into every
//! session — never accessed as ambient global state.

pub mod memory;
pub mod tree;
pub mod wire;
pub mod ws;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::types::{ParticipantId, RoomId};

/// Channel failures.
#[derive(Debug, Clone)]
pub enum ChannelError {
    /// The store is unreachable or the request timed out. Recoverable:
    /// callers keep their dirty state and retry later.
    Unavailable(String),
    /// A value could not be encoded or decoded.
    Serialization(String),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(e) => write!(f, "Store unavailable: {e}"),
            Self::Serialization(e) => write!(f, "Serialization error: {e}"),
        }
    }
}

impl std::error::Error for ChannelError {}

/// A change notification from a subscription.
///
/// Carries the full current value at the subscribed path (not a diff);
/// `Removed` means the path no longer exists.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Changed(Value),
    Removed,
}

/// Handle to a live subscription. Dropping it unsubscribes.
pub struct Subscription {
    rx: mpsc::Receiver<ChannelEvent>,
    closer: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Subscription backed only by a local receiver (in-memory channel).
    pub(crate) fn local(rx: mpsc::Receiver<ChannelEvent>) -> Self {
        Self { rx, closer: None }
    }

    /// Subscription that notifies the remote store when dropped.
    pub(crate) fn with_closer(
        rx: mpsc::Receiver<ChannelEvent>,
        closer: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            rx,
            closer: Some(Box::new(closer)),
        }
    }

    /// Receive the next change. `None` means the subscription closed
    /// (channel dropped or connection lost).
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(close) = self.closer.take() {
            close();
        }
    }
}

/// The hosted store's client surface.
///
/// The store serializes writes by arrival order only — there is no
/// compare-and-swap. Concurrent writers race and the last write wins;
/// that coarse model is the contract the sync core is built on.
#[async_trait]
pub trait RemoteChannel: Send + Sync {
    /// Read the value at `path`, or `None` if absent.
    async fn read(&self, path: &str) -> Result<Option<Value>, ChannelError>;

    /// Write `value` at `path`, replacing any existing subtree.
    async fn write(&self, path: &str, value: Value) -> Result<(), ChannelError>;

    /// Remove the value at `path`. Removing an absent path is not an error.
    async fn remove(&self, path: &str) -> Result<(), ChannelError>;

    /// Subscribe to changes at or beneath `path`.
    async fn subscribe(&self, path: &str) -> Result<Subscription, ChannelError>;
}

/// Store path layout helpers.
pub mod paths {
    use super::{ParticipantId, RoomId};

    /// `rooms/{room}/content` — the canonical document.
    pub fn room_content(room: &RoomId) -> String {
        format!("rooms/{room}/content")
    }

    /// `rooms/{room}/users` — the presence directory.
    pub fn room_users(room: &RoomId) -> String {
        format!("rooms/{room}/users")
    }

    /// `rooms/{room}/users/{participant}` — one presence record.
    pub fn room_user(room: &RoomId, participant: &ParticipantId) -> String {
        format!("rooms/{room}/users/{participant}")
    }

    /// `rooms/{room}/editing` — advisory exclusive-edit lock.
    pub fn room_editing(room: &RoomId) -> String {
        format!("rooms/{room}/editing")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_layout() {
        let room = RoomId::parse("shareroom").unwrap();
        let alice = ParticipantId::parse("Alice").unwrap();

        assert_eq!(paths::room_content(&room), "rooms/shareroom/content");
        assert_eq!(paths::room_users(&room), "rooms/shareroom/users");
        assert_eq!(
            paths::room_user(&room, &alice),
            "rooms/shareroom/users/Alice"
        );
        assert_eq!(paths::room_editing(&room), "rooms/shareroom/editing");
    }
}
