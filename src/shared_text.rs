//! Merge-based shared text, the alternative to last-write-wins.
//!
//! Where [`DocumentSyncEngine`](crate::engine::DocumentSyncEngine)
//! resolves concurrency by overwriting whole documents, this engine
//! keeps the content in a `yrs` text CRDT and merges: concurrent edits
//! from different peers converge to identical content on every peer,
//! with no edit discarded. It deliberately shares the
//! local-change / remote-update shape of the LWW engine, but its
//! updates are incremental CRDT payloads, not full documents, and the
//! two sets of guarantees are never mixed.
//!
//! Full-content local changes are reduced to a minimal prefix/suffix
//! splice before touching the text, so unchanged regions keep their
//! operation ids and merge correctly across peers.

use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Text, TextRef, Transact, Update};

const TEXT_NAME: &str = "content";

/// CRDT payload errors.
#[derive(Debug, Clone)]
pub enum SharedTextError {
    InvalidUpdate(String),
    InvalidStateVector(String),
}

impl std::fmt::Display for SharedTextError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidUpdate(e) => write!(f, "Invalid update payload: {e}"),
            Self::InvalidStateVector(e) => write!(f, "Invalid state vector: {e}"),
        }
    }
}

impl std::error::Error for SharedTextError {}

pub struct SharedTextEngine {
    doc: Doc,
    text: TextRef,
}

impl SharedTextEngine {
    pub fn new() -> Self {
        let doc = Doc::new();
        let text = doc.get_or_insert_text(TEXT_NAME);
        Self { doc, text }
    }

    /// Current content.
    pub fn content(&self) -> String {
        let txn = self.doc.transact();
        self.text.get_string(&txn)
    }

    /// Absorb a full-content local change.
    ///
    /// The change is applied as a minimal splice (common prefix and
    /// suffix preserved) and returned as an incremental v1 update for
    /// broadcasting to peers. An unchanged document yields an empty
    /// update, which peers may skip.
    pub fn on_local_change(&mut self, content: &str) -> Vec<u8> {
        let (current, sv_before) = {
            let txn = self.doc.transact();
            (self.text.get_string(&txn), txn.state_vector())
        };

        if current != content {
            let current_chars: Vec<char> = current.chars().collect();
            let new_chars: Vec<char> = content.chars().collect();

            let common_prefix = current_chars
                .iter()
                .zip(new_chars.iter())
                .take_while(|(a, b)| a == b)
                .count();
            let remaining = (current_chars.len() - common_prefix)
                .min(new_chars.len() - common_prefix);
            let common_suffix = current_chars[common_prefix..]
                .iter()
                .rev()
                .zip(new_chars[common_prefix..].iter().rev())
                .take_while(|(a, b)| a == b)
                .take(remaining)
                .count();

            let delete_len = current_chars.len() - common_suffix - common_prefix;
            let insert_end = new_chars.len() - common_suffix;

            let mut txn = self.doc.transact_mut();
            if delete_len > 0 {
                self.text
                    .remove_range(&mut txn, common_prefix as u32, delete_len as u32);
            }
            if insert_end > common_prefix {
                let chunk: String = new_chars[common_prefix..insert_end].iter().collect();
                self.text.insert(&mut txn, common_prefix as u32, &chunk);
            }
        }

        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&sv_before)
    }

    /// Merge an incremental update from a peer.
    pub fn on_remote_update(&mut self, update: &[u8]) -> Result<(), SharedTextError> {
        let decoded =
            Update::decode_v1(update).map_err(|e| SharedTextError::InvalidUpdate(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(decoded)
            .map_err(|e| SharedTextError::InvalidUpdate(e.to_string()))
    }

    /// This peer's state vector, for initial sync.
    pub fn state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Everything a peer at `remote_state_vector` is missing.
    pub fn update_since(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>, SharedTextError> {
        let sv = StateVector::decode_v1(remote_state_vector)
            .map_err(|e| SharedTextError::InvalidStateVector(e.to_string()))?;
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    /// The full document as one update, for bootstrapping a new peer.
    pub fn full_update(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }
}

impl Default for SharedTextEngine {
    fn default() -> Self {
        Self::new()
    }
}
