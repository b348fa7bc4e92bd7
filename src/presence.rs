//! Room presence tracking.
//!
//! Presence lives in the store at `rooms/{room}/users/{participant}`;
//! this registry is a read-through cache of that directory for the
//! local UI. `join` writes a record, `leave` removes it, and a
//! background task keeps a `watch` channel carrying the full sorted
//! member list current on every change (no diffs).
//!
//! Presence is advisory. A session killed without a clean `leave`
//! strands its record until the next explicit cleanup; nothing here
//! depends on presence for correctness.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::channel::{paths, ChannelError, ChannelEvent, RemoteChannel};
use crate::types::{ParticipantId, PresenceRecord, RoomId};

/// Sorted member list as of the latest store notification.
pub type MemberList = Vec<ParticipantId>;

pub struct PresenceRegistry {
    channel: Arc<dyn RemoteChannel>,
    room: RoomId,
    members_tx: watch::Sender<MemberList>,
    watcher: Option<JoinHandle<()>>,
}

impl PresenceRegistry {
    pub fn new(channel: Arc<dyn RemoteChannel>, room: RoomId) -> Self {
        let (members_tx, _) = watch::channel(Vec::new());
        Self {
            channel,
            room,
            members_tx,
            watcher: None,
        }
    }

    /// Seed the cache with a read of the presence directory, then keep
    /// it current from a subscription.
    pub async fn start(&mut self) -> Result<(), ChannelError> {
        let users_path = paths::room_users(&self.room);
        let initial = self.channel.read(&users_path).await?;
        let _ = self.members_tx.send(parse_members(initial.as_ref()));

        let mut subscription = self.channel.subscribe(&users_path).await?;
        let members_tx = self.members_tx.clone();
        let room = self.room.clone();
        self.watcher = Some(tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                let members = match event {
                    ChannelEvent::Changed(value) => parse_members(Some(&value)),
                    ChannelEvent::Removed => Vec::new(),
                };
                if members_tx.send(members).is_err() {
                    break;
                }
            }
            log::debug!("presence watcher for room {room} stopped");
        }));
        Ok(())
    }

    /// Write this participant's presence record.
    pub async fn join(&self, participant: &ParticipantId) -> Result<(), ChannelError> {
        let value = serde_json::to_value(PresenceRecord::now())
            .map_err(|e| ChannelError::Serialization(e.to_string()))?;
        self.channel
            .write(&paths::room_user(&self.room, participant), value)
            .await
    }

    /// Remove this participant's presence record.
    pub async fn leave(&self, participant: &ParticipantId) -> Result<(), ChannelError> {
        self.channel
            .remove(&paths::room_user(&self.room, participant))
            .await
    }

    /// Current member snapshot.
    pub fn members(&self) -> MemberList {
        self.members_tx.borrow().clone()
    }

    /// Receiver carrying the full member list on every change.
    pub fn watch(&self) -> watch::Receiver<MemberList> {
        self.members_tx.subscribe()
    }
}

impl Drop for PresenceRegistry {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

/// Member ids are the keys of the presence directory. Keys that do not
/// parse as participant ids are logged and skipped rather than poisoning
/// the whole list.
fn parse_members(value: Option<&Value>) -> MemberList {
    let Some(map) = value.and_then(Value::as_object) else {
        return Vec::new();
    };
    let mut members: MemberList = map
        .keys()
        .filter_map(|key| match ParticipantId::parse(key) {
            Ok(id) => Some(id),
            Err(e) => {
                log::warn!("ignoring malformed presence key {key:?}: {e}");
                None
            }
        })
        .collect();
    members.sort();
    members
}
