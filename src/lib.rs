//! # shareroom — collaborative document synchronization core
//!
//! Keeps one rich-text document per room in sync across participants
//! through a hosted JSON store, with whole-document last-write-wins
//! semantics, debounced autosave, own-write echo filtering, and
//! advisory presence.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   commands/events   ┌───────────────────┐
//! │  UI layer    │ ◄─────────────────► │    RoomSession    │
//! │ (excluded)   │                     │  (one event loop) │
//! └──────────────┘                     └───┬───────────┬───┘
//!                                          │           │
//!                              ┌───────────▼──┐  ┌─────▼──────────┐
//!                              │ SyncEngine   │  │ PresenceRegistry│
//!                              │ + Debouncer  │  │ (read-through)  │
//!                              │ + EchoFilter │  └─────┬──────────┘
//!                              └───────┬──────┘        │
//!                                      │  RemoteChannel │
//!                              ┌───────▼───────────────▼───┐
//!                              │   JSON store (WebSocket   │
//!                              │   server or in-process)   │
//!                              └───────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] — validated room/participant ids and store records
//! - [`channel`] — the store abstraction, plus in-memory and WebSocket
//!   implementations and the binary wire protocol
//! - [`server`] — the hosted store (WebSocket fan-out server)
//! - [`debounce`] — trailing-edge autosave coalescing
//! - [`echo`] — own-write echo recognition
//! - [`presence`] — who is in the room
//! - [`engine`] — the last-write-wins sync state machine
//! - [`session`] — per-(room, participant) lifecycle and event loop
//! - [`export`] — plain-text extraction for downloads
//! - [`shared_text`] — the merge-based CRDT alternative

pub mod channel;
pub mod debounce;
pub mod echo;
pub mod engine;
pub mod export;
pub mod presence;
pub mod server;
pub mod session;
pub mod shared_text;
pub mod types;

// Re-exports for convenience
pub use channel::{
    memory::MemoryChannel, ws::WsChannel, ChannelError, ChannelEvent, RemoteChannel, Subscription,
};
pub use debounce::{Debouncer, DEFAULT_AUTOSAVE_DELAY};
pub use echo::{EchoFilter, EchoVerdict, WriteFingerprint};
pub use engine::{ConflictPolicy, DocumentSyncEngine, EditOutcome, FlushOutcome, RemoteOutcome};
pub use export::{plain_text, ExportKind};
pub use presence::{MemberList, PresenceRegistry};
pub use server::{ServerConfig, ServerError, ServerStats, StoreServer};
pub use session::{
    RoomSession, SessionConfig, SessionError, SessionEvent, SessionSnapshot, SessionState,
};
pub use shared_text::{SharedTextEngine, SharedTextError};
pub use types::{DocumentRecord, IdError, ParticipantId, PresenceRecord, RoomId};
