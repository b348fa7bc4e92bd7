//! Echo filtering for own-write re-delivery.
//!
//! The store fans every write out to all subscribers, including the
//! writer. Each outgoing write is tagged with a fingerprint — the
//! participant id plus a per-session monotonic counter — so the client
//! can recognize its own write when it comes back. Content equality is
//! not a safe substitute: two distinct edits can produce identical
//! content.

use serde::{Deserialize, Serialize};

use crate::types::ParticipantId;

/// Per-write identifier carried inside the stored document record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFingerprint {
    pub participant: ParticipantId,
    pub seq: u64,
}

/// Classification of an incoming remote update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoVerdict {
    /// The update is a fanned-back copy of one of this session's writes.
    Echo,
    /// The update is a genuine external change.
    Foreign,
}

/// Tracks this session's outgoing writes and recognizes their echoes.
///
/// Only the most recent outstanding fingerprint is remembered — sound
/// because the session loop keeps flushes single-flight. A lagging
/// re-delivery of a superseded own write (its seq is at or below the
/// counter) is still an echo; it just no longer clears the outstanding
/// slot.
#[derive(Debug)]
pub struct EchoFilter {
    participant: ParticipantId,
    seq: u64,
    outstanding: Option<u64>,
}

impl EchoFilter {
    pub fn new(participant: ParticipantId) -> Self {
        Self {
            participant,
            seq: 0,
            outstanding: None,
        }
    }

    /// Mint the fingerprint for the next outgoing write.
    ///
    /// The fingerprint is not remembered until [`record_write`]
    /// confirms the write reached the store — a failed write leaves the
    /// filter untouched (the seq is simply never reused).
    ///
    /// [`record_write`]: EchoFilter::record_write
    pub fn begin_write(&mut self) -> WriteFingerprint {
        self.seq += 1;
        WriteFingerprint {
            participant: self.participant.clone(),
            seq: self.seq,
        }
    }

    /// Remember a successfully written fingerprint as outstanding.
    pub fn record_write(&mut self, fingerprint: WriteFingerprint) {
        debug_assert_eq!(fingerprint.participant, self.participant);
        self.outstanding = Some(fingerprint.seq);
    }

    /// Classify an incoming update's fingerprint.
    ///
    /// The outstanding slot is cleared exactly when its own fingerprint
    /// is observed.
    pub fn observe(&mut self, fingerprint: Option<&WriteFingerprint>) -> EchoVerdict {
        let Some(fp) = fingerprint else {
            return EchoVerdict::Foreign;
        };
        if fp.participant != self.participant {
            return EchoVerdict::Foreign;
        }
        if self.outstanding == Some(fp.seq) {
            self.outstanding = None;
            return EchoVerdict::Echo;
        }
        if fp.seq <= self.seq {
            // Superseded own write delivered late.
            return EchoVerdict::Echo;
        }
        EchoVerdict::Foreign
    }

    /// The most recent unacknowledged write fingerprint, if any.
    pub fn outstanding(&self) -> Option<WriteFingerprint> {
        self.outstanding.map(|seq| WriteFingerprint {
            participant: self.participant.clone(),
            seq,
        })
    }
}
