//! Room session lifecycle.
//!
//! A [`RoomSession`] binds one (room, participant) pair to one engine
//! and one presence registry, and runs them on a single event-loop
//! task. All local-edit and remote-update handling for a session runs
//! on that one task; no two handlers for the same session ever execute
//! concurrently. Cross-session concurrency is real and is serialized
//! only by the store's write-arrival order.
//!
//! Lifecycle: `Initializing → Live → Closed`, observable through
//! [`RoomSession::state_watch`]. Attach performs the document
//! read-or-create and the first presence join;
//! any failure there aborts with [`SessionError::Initialization`] and
//! leaves no partial presence behind. Detach cancels pending autosave,
//! best-effort flushes dirty content, releases the edit lock, and
//! removes the presence record. A closed session is inert; rejoining
//! means a new session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::channel::{ChannelError, ChannelEvent, RemoteChannel, Subscription};
use crate::debounce::{Debouncer, DEFAULT_AUTOSAVE_DELAY};
use crate::engine::{ConflictPolicy, DocumentSyncEngine, EditOutcome, FlushOutcome, RemoteOutcome};
use crate::export;
use crate::presence::{MemberList, PresenceRegistry};
use crate::types::{ParticipantId, RoomId};

/// Buffered UI events before a lagging consumer drops them.
const DEFAULT_EVENT_CAPACITY: usize = 64;
/// Buffered UI commands.
const COMMAND_CAPACITY: usize = 64;

/// Session construction parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub autosave_delay: Duration,
    pub policy: ConflictPolicy,
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            autosave_delay: DEFAULT_AUTOSAVE_DELAY,
            policy: ConflictPolicy::LastWriteWins,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Session failures.
#[derive(Debug)]
pub enum SessionError {
    /// Attach could not read-or-create the document or join presence.
    /// No session was left live and no presence record behind.
    Initialization(ChannelError),
    /// The session's event loop has already shut down.
    Closed,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialization(e) => write!(f, "Session initialization failed: {e}"),
            Self::Closed => write!(f, "Session is closed"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Lifecycle states, from the session object's first breath on.
/// `Initializing` covers the document read-or-create and the first
/// presence join; `Closed` is final — a closed session is inert and
/// rejoining means a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Live,
    Closed,
}

/// Notifications for the UI layer. None of these block the loop; a
/// lagging consumer loses events rather than stalling sync.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The saved/unsaved indicator should flip.
    DirtyChanged { dirty: bool },
    /// An autosave window is open ("auto-saving…").
    AutoSavePending,
    /// A flush reached the store.
    Saved,
    /// A flush failed; dirty content is retained and retried later.
    /// One-shot notification, never fatal.
    SaveFailed { reason: String },
    /// A foreign change was applied to a clean local copy.
    RemoteApplied { content: String },
    /// A foreign change overwrote unflushed local edits.
    LocalOverwritten { discarded: String, content: String },
    /// The exclusive-edit lock is held by someone else.
    EditRejected { holder: ParticipantId },
    /// The change subscription closed; remote updates stop arriving.
    ChannelLost,
    /// The session finished shutting down.
    Detached,
}

/// Point-in-time view of session state for the UI's stateless queries.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub content: String,
    pub dirty: bool,
    pub state: SessionState,
    pub members: MemberList,
}

enum Command {
    LocalChange(String),
    SaveNow,
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Detach(oneshot::Sender<()>),
}

/// Handle to a live session. Dropping it without [`detach`] shuts the
/// loop down too, but skips the best-effort dirty flush only if the
/// runtime is already gone.
///
/// [`detach`]: RoomSession::detach
pub struct RoomSession {
    room: RoomId,
    participant: ParticipantId,
    cmd_tx: mpsc::Sender<Command>,
    events_rx: mpsc::Receiver<SessionEvent>,
    members_rx: watch::Receiver<MemberList>,
    state_rx: watch::Receiver<SessionState>,
    task: JoinHandle<()>,
}

impl RoomSession {
    /// Join a room: read-or-create the document, join presence, start
    /// the event loop.
    pub async fn attach(
        channel: Arc<dyn RemoteChannel>,
        room: RoomId,
        participant: ParticipantId,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        log::info!("participant {participant} attaching to room {room}");
        let (state_tx, state_rx) = watch::channel(SessionState::Initializing);

        let mut engine =
            DocumentSyncEngine::new(channel.clone(), room.clone(), participant.clone(), config.policy);
        let subscription = engine
            .attach()
            .await
            .map_err(SessionError::Initialization)?;

        let mut presence = PresenceRegistry::new(channel, room.clone());
        presence
            .start()
            .await
            .map_err(SessionError::Initialization)?;
        presence
            .join(&participant)
            .await
            .map_err(SessionError::Initialization)?;
        let members_rx = presence.watch();

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity);

        let _ = state_tx.send(SessionState::Live);
        let actor = SessionActor {
            engine,
            presence,
            subscription,
            debouncer: Debouncer::new(config.autosave_delay),
            events_tx,
            cmd_rx,
            state_tx,
            remote_open: true,
        };
        let task = tokio::spawn(actor.run());

        Ok(Self {
            room,
            participant,
            cmd_tx,
            events_rx,
            members_rx,
            state_rx,
            task,
        })
    }

    /// Record a local edit. Returns once the loop accepted the command;
    /// the flush itself is debounced.
    pub async fn local_change(&self, content: impl Into<String>) -> Result<(), SessionError> {
        self.cmd_tx
            .send(Command::LocalChange(content.into()))
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Request an immediate flush (explicit save).
    pub async fn save_now(&self) -> Result<(), SessionError> {
        self.cmd_tx
            .send(Command::SaveNow)
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Current session state for the UI. Stateless, no side effects.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Snapshot(tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Current local content.
    pub async fn content(&self) -> Result<String, SessionError> {
        Ok(self.snapshot().await?.content)
    }

    /// Current local content with markup stripped.
    pub async fn plain_text(&self) -> Result<String, SessionError> {
        Ok(export::plain_text(&self.snapshot().await?.content))
    }

    /// Next UI event. `None` after the loop has shut down.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.recv().await
    }

    /// Receiver carrying the room's member list on every change.
    pub fn members(&self) -> watch::Receiver<MemberList> {
        self.members_rx.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Receiver that follows the lifecycle, outliving [`detach`].
    ///
    /// [`detach`]: RoomSession::detach
    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    /// Leave the room: cancel pending autosave, best-effort flush any
    /// dirty content, release the edit lock, remove presence. Waits for
    /// the loop to finish shutting down.
    pub async fn detach(self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Detach(tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?;
        let _ = self.task.await;
        Ok(())
    }
}

struct SessionActor {
    engine: DocumentSyncEngine,
    presence: PresenceRegistry,
    subscription: Subscription,
    debouncer: Debouncer,
    events_tx: mpsc::Sender<SessionEvent>,
    cmd_rx: mpsc::Receiver<Command>,
    state_tx: watch::Sender<SessionState>,
    remote_open: bool,
}

enum Step {
    Command(Option<Command>),
    AutosaveFired,
    Remote(Option<ChannelEvent>),
}

impl SessionActor {
    async fn run(mut self) {
        loop {
            let step = tokio::select! {
                cmd = self.cmd_rx.recv() => Step::Command(cmd),
                _ = self.debouncer.elapsed(), if self.debouncer.is_pending() => {
                    Step::AutosaveFired
                }
                event = self.subscription.recv(), if self.remote_open => Step::Remote(event),
            };
            match step {
                Step::Command(Some(Command::LocalChange(content))) => {
                    self.handle_local_change(content).await;
                }
                Step::Command(Some(Command::SaveNow)) => {
                    self.debouncer.cancel();
                    self.flush().await;
                }
                Step::Command(Some(Command::Snapshot(reply))) => {
                    let _ = reply.send(SessionSnapshot {
                        content: self.engine.content().to_string(),
                        dirty: self.engine.is_dirty(),
                        state: *self.state_tx.borrow(),
                        members: self.presence.members(),
                    });
                }
                Step::Command(Some(Command::Detach(done))) => {
                    self.shut_down().await;
                    let _ = done.send(());
                    return;
                }
                // Handle dropped without detach.
                Step::Command(None) => {
                    self.shut_down().await;
                    return;
                }
                Step::AutosaveFired => {
                    self.debouncer.fire();
                    self.flush().await;
                }
                Step::Remote(Some(event)) => self.handle_remote(event),
                Step::Remote(None) => {
                    log::warn!(
                        "change subscription for room {} closed",
                        self.engine.room()
                    );
                    self.remote_open = false;
                    self.emit(SessionEvent::ChannelLost);
                }
            }
        }
    }

    async fn handle_local_change(&mut self, content: String) {
        match self.engine.ensure_editable().await {
            Ok(EditOutcome::Accepted) => {}
            Ok(EditOutcome::Rejected { holder }) => {
                self.emit(SessionEvent::EditRejected { holder });
                return;
            }
            // The lock is advisory; an unreachable store must not eat
            // the edit. Accept it and let the flush surface the outage.
            Err(e) => {
                log::warn!("edit-lock arbitration failed, accepting edit: {e}");
            }
        }
        if self.engine.on_local_change(content) {
            self.emit(SessionEvent::DirtyChanged {
                dirty: self.engine.is_dirty(),
            });
        }
        self.debouncer.schedule();
        self.emit(SessionEvent::AutoSavePending);
    }

    async fn flush(&mut self) {
        match self.engine.flush().await {
            Ok(FlushOutcome::Flushed) => {
                self.emit(SessionEvent::Saved);
                self.emit(SessionEvent::DirtyChanged { dirty: false });
            }
            Ok(FlushOutcome::Clean) => {}
            Err(e) => {
                log::warn!("flush failed for room {}: {e}", self.engine.room());
                self.emit(SessionEvent::SaveFailed {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn handle_remote(&mut self, event: ChannelEvent) {
        match self.engine.on_remote_update(event) {
            RemoteOutcome::Echo | RemoteOutcome::Unchanged | RemoteOutcome::Ignored => {}
            RemoteOutcome::Applied { content } => {
                self.emit(SessionEvent::RemoteApplied { content });
            }
            RemoteOutcome::LocalOverwritten { discarded, content } => {
                // The draft the pending autosave would have written no
                // longer exists.
                self.debouncer.cancel();
                self.emit(SessionEvent::LocalOverwritten { discarded, content });
                self.emit(SessionEvent::DirtyChanged { dirty: false });
            }
        }
    }

    async fn shut_down(&mut self) {
        self.debouncer.cancel();
        if self.engine.is_dirty() {
            self.flush().await;
        }
        self.engine.release_lock().await;
        if let Err(e) = self.presence.leave(self.engine.participant()).await {
            log::warn!(
                "presence cleanup failed for {} in room {}: {e}",
                self.engine.participant(),
                self.engine.room()
            );
        }
        let _ = self.state_tx.send(SessionState::Closed);
        self.emit(SessionEvent::Detached);
        log::info!(
            "participant {} detached from room {}",
            self.engine.participant(),
            self.engine.room()
        );
    }

    fn emit(&self, event: SessionEvent) {
        if self.events_tx.try_send(event).is_err() {
            log::debug!("dropping session event for lagging consumer");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.autosave_delay, Duration::from_millis(1200));
        assert_eq!(config.policy, ConflictPolicy::LastWriteWins);
        assert!(config.event_capacity > 0);
    }
}
