//! Document synchronization state machine.
//!
//! Owns the canonical local copy of one room's document and decides
//! when to read, write, and accept remote updates. The store is the
//! source of truth; the local copy is a cache that converges to it
//! absent further local edits.
//!
//! Consistency model is whole-document last-write-wins: the store
//! serializes writes by arrival order only, the engine performs no
//! merge. When a foreign update lands while local edits are unflushed,
//! the remote content wins and the local draft is discarded — an
//! explicit inconsistency window, reported to the caller as
//! [`RemoteOutcome::LocalOverwritten`] rather than hidden.
//!
//! The engine is passive: it never spawns tasks or loops. One session
//! event loop drives it, which is what keeps flushes single-flight and
//! the single-fingerprint echo filter sound.

use std::sync::Arc;

use serde_json::Value;

use crate::channel::{paths, ChannelError, ChannelEvent, RemoteChannel, Subscription};
use crate::echo::{EchoFilter, EchoVerdict};
use crate::types::{now_ms, DocumentRecord, ParticipantId, RoomId};

/// How concurrent editing is arbitrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// No arbitration: concurrent writers race and the store's
    /// write-arrival order decides. The default.
    #[default]
    LastWriteWins,
    /// Advisory single-editor lock at `rooms/{room}/editing`. Local
    /// edits are accepted only while this session holds the lock;
    /// held-by-other rejects the edit and names the holder. Advisory
    /// because the store has no compare-and-swap.
    ExclusiveLock,
}

/// Result of arbitrating a local edit under the session's policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    Accepted,
    /// Another participant holds the exclusive-edit lock.
    Rejected { holder: ParticipantId },
}

/// Result of a flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Dirty content was written to the store.
    Flushed,
    /// Nothing to do: local and acknowledged content already agree.
    Clean,
}

/// Classification of one incoming channel event.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOutcome {
    /// Fanned-back copy of this session's own write. No mutation.
    Echo,
    /// Foreign change applied to a clean local copy.
    Applied { content: String },
    /// Foreign change identical to the local copy. No re-render needed.
    Unchanged,
    /// Foreign change landed while local edits were unflushed; the
    /// remote content won and the local draft was discarded.
    LocalOverwritten { discarded: String, content: String },
    /// Malformed store record, logged and skipped.
    Ignored,
}

pub struct DocumentSyncEngine {
    channel: Arc<dyn RemoteChannel>,
    room: RoomId,
    participant: ParticipantId,
    policy: ConflictPolicy,
    echo: EchoFilter,
    local: String,
    acked: String,
    holds_lock: bool,
}

impl DocumentSyncEngine {
    pub fn new(
        channel: Arc<dyn RemoteChannel>,
        room: RoomId,
        participant: ParticipantId,
        policy: ConflictPolicy,
    ) -> Self {
        let echo = EchoFilter::new(participant.clone());
        Self {
            channel,
            room,
            participant,
            policy,
            echo,
            local: String::new(),
            acked: String::new(),
            holds_lock: false,
        }
    }

    /// Read-or-create the document and subscribe to its changes.
    ///
    /// A read miss initializes the store with an empty document; when
    /// two sessions race on an empty room, both initializing writes are
    /// well-formed and the later one wins harmlessly. The subscription
    /// is established before the read so no concurrent write can fall
    /// between them.
    pub async fn attach(&mut self) -> Result<Subscription, ChannelError> {
        let content_path = paths::room_content(&self.room);
        let subscription = self.channel.subscribe(&content_path).await?;

        match self.channel.read(&content_path).await? {
            Some(value) => match DocumentRecord::from_value(value) {
                Ok(record) => {
                    self.local = record.content.clone();
                    self.acked = record.content;
                }
                Err(e) => {
                    log::warn!("malformed document record in room {}: {e}", self.room);
                    self.local.clear();
                    self.acked.clear();
                }
            },
            None => {
                log::info!("room {} is empty, initializing", self.room);
                let fingerprint = self.echo.begin_write();
                let record = DocumentRecord {
                    content: String::new(),
                    writer: Some(self.participant.clone()),
                    fingerprint: Some(fingerprint.clone()),
                    revision: Some(now_ms()),
                };
                let value = record
                    .to_value()
                    .map_err(|e| ChannelError::Serialization(e.to_string()))?;
                self.channel.write(&content_path, value).await?;
                self.echo.record_write(fingerprint);
                self.local.clear();
                self.acked.clear();
            }
        }
        Ok(subscription)
    }

    /// Arbitrate a local edit under the session's conflict policy.
    ///
    /// Last-write-wins accepts unconditionally. The exclusive-lock
    /// policy claims `rooms/{room}/editing` on first edit and rejects
    /// while another participant holds it.
    pub async fn ensure_editable(&mut self) -> Result<EditOutcome, ChannelError> {
        if self.policy == ConflictPolicy::LastWriteWins || self.holds_lock {
            return Ok(EditOutcome::Accepted);
        }
        let lock_path = paths::room_editing(&self.room);
        if let Some(value) = self.channel.read(&lock_path).await? {
            match holder_from_value(&value) {
                Some(holder) if holder != self.participant => {
                    return Ok(EditOutcome::Rejected { holder });
                }
                Some(_) => {}
                None => {
                    log::warn!("malformed edit-lock record in room {}, claiming", self.room);
                }
            }
        }
        self.channel
            .write(&lock_path, Value::String(self.participant.to_string()))
            .await?;
        self.holds_lock = true;
        Ok(EditOutcome::Accepted)
    }

    /// Record a local edit. Never suspends. Returns whether the dirty
    /// flag flipped.
    pub fn on_local_change(&mut self, content: String) -> bool {
        let was_dirty = self.is_dirty();
        self.local = content;
        was_dirty != self.is_dirty()
    }

    /// Write dirty content to the store.
    ///
    /// On success the write's fingerprint becomes the outstanding echo
    /// candidate and local content is acknowledged. On failure the
    /// dirty state is kept untouched so no edit is silently lost; the
    /// caller retries on the next debounce cycle or explicit save.
    pub async fn flush(&mut self) -> Result<FlushOutcome, ChannelError> {
        if !self.is_dirty() {
            // The session is clean, so the edit lock has no edits left
            // to protect. Covers no-op edits and drafts discarded by a
            // remote overwrite.
            self.release_lock().await;
            return Ok(FlushOutcome::Clean);
        }
        let fingerprint = self.echo.begin_write();
        let record = DocumentRecord {
            content: self.local.clone(),
            writer: Some(self.participant.clone()),
            fingerprint: Some(fingerprint.clone()),
            revision: Some(now_ms()),
        };
        let value = record
            .to_value()
            .map_err(|e| ChannelError::Serialization(e.to_string()))?;
        self.channel
            .write(&paths::room_content(&self.room), value)
            .await?;
        self.echo.record_write(fingerprint);
        self.acked = self.local.clone();
        self.release_lock().await;
        Ok(FlushOutcome::Flushed)
    }

    /// Classify and absorb one subscription event. Never suspends.
    pub fn on_remote_update(&mut self, event: ChannelEvent) -> RemoteOutcome {
        let (content, fingerprint) = match event {
            ChannelEvent::Changed(value) => match DocumentRecord::from_value(value) {
                Ok(record) => (record.content, record.fingerprint),
                Err(e) => {
                    log::warn!("ignoring malformed document record in room {}: {e}", self.room);
                    return RemoteOutcome::Ignored;
                }
            },
            // A removed document reads as empty, the same state a fresh
            // room initializes to.
            ChannelEvent::Removed => (String::new(), None),
        };

        if self.echo.observe(fingerprint.as_ref()) == EchoVerdict::Echo {
            return RemoteOutcome::Echo;
        }

        if self.is_dirty() {
            let discarded = std::mem::replace(&mut self.local, content.clone());
            self.acked = content.clone();
            log::info!(
                "room {}: remote write overwrote {} bytes of unflushed local edits",
                self.room,
                discarded.len()
            );
            return RemoteOutcome::LocalOverwritten { discarded, content };
        }

        if content == self.local {
            return RemoteOutcome::Unchanged;
        }
        self.local = content.clone();
        self.acked = content;
        RemoteOutcome::Applied { content: self.local.clone() }
    }

    /// Drop the advisory edit lock if held. Failures are logged and
    /// swallowed; the lock is advisory.
    pub async fn release_lock(&mut self) {
        if !self.holds_lock {
            return;
        }
        self.holds_lock = false;
        if let Err(e) = self
            .channel
            .remove(&paths::room_editing(&self.room))
            .await
        {
            log::warn!("failed to release edit lock for room {}: {e}", self.room);
        }
    }

    pub fn content(&self) -> &str {
        &self.local
    }

    pub fn is_dirty(&self) -> bool {
        self.local != self.acked
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }
}

fn holder_from_value(value: &Value) -> Option<ParticipantId> {
    value
        .as_str()
        .and_then(|s| ParticipantId::parse(s).ok())
}
