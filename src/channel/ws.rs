//! WebSocket store client.
//!
//! Implements [`RemoteChannel`] against a
//! [`StoreServer`](crate::server::StoreServer). One writer task
//! forwards outgoing frames, one reader task routes replies to pending
//! requests (via `oneshot` completions) and subscription events to
//! their receivers. A lost connection fails every pending request and
//! closes every subscription stream; replies that never arrive time
//! out into `ChannelError::Unavailable`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

use super::wire::{bytes_to_value, value_to_bytes, StoreReply, StoreRequest};
use super::{ChannelError, ChannelEvent, RemoteChannel, Subscription};

/// Outgoing frame buffer per connection.
const OUTGOING_CAPACITY: usize = 256;
/// Buffered events per subscription.
const EVENT_CAPACITY: usize = 256;
/// How long to wait for a reply before reporting the store unavailable.
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

struct WsInner {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<StoreReply>>>,
    subs: Mutex<HashMap<u64, mpsc::Sender<ChannelEvent>>>,
    out_tx: mpsc::Sender<Vec<u8>>,
    alive: AtomicBool,
}

/// WebSocket-backed [`RemoteChannel`]. Cheap to clone; clones share the
/// connection.
#[derive(Clone)]
pub struct WsChannel {
    inner: Arc<WsInner>,
}

impl WsChannel {
    /// Connect to a store server, e.g. `ws://127.0.0.1:9800`.
    pub async fn connect(url: &str) -> Result<Self, ChannelError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ChannelError::Unavailable(e.to_string()))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(OUTGOING_CAPACITY);
        let inner = Arc::new(WsInner {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            subs: Mutex::new(HashMap::new()),
            out_tx,
            alive: AtomicBool::new(true),
        });

        // Writer task: forward outgoing frames to the socket.
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(frame.into())).await.is_err() {
                    break;
                }
            }
        });

        // Reader task: route replies and subscription events.
        let reader_inner = inner.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        match StoreReply::decode(&bytes) {
                            Ok(reply) => reader_inner.dispatch(reply),
                            Err(e) => log::warn!("undecodable store frame: {e}"),
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            reader_inner.shut_down();
        });

        Ok(Self { inner })
    }

    /// Whether the underlying connection is still up.
    pub fn is_connected(&self) -> bool {
        self.inner.alive.load(Ordering::SeqCst)
    }

    async fn request(&self, req: StoreRequest, id: u64) -> Result<StoreReply, ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::Unavailable(
                "store connection closed".to_string(),
            ));
        }

        let frame = req
            .encode()
            .map_err(|e| ChannelError::Serialization(e.to_string()))?;
        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .expect("pending lock")
            .insert(id, tx);

        if self.inner.out_tx.send(frame).await.is_err() {
            self.inner.pending.lock().expect("pending lock").remove(&id);
            return Err(ChannelError::Unavailable(
                "store connection closed".to_string(),
            ));
        }

        match tokio::time::timeout(REPLY_TIMEOUT, rx).await {
            Ok(Ok(StoreReply::Error { message, .. })) => Err(ChannelError::Unavailable(message)),
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ChannelError::Unavailable("connection lost".to_string())),
            Err(_) => {
                self.inner.pending.lock().expect("pending lock").remove(&id);
                Err(ChannelError::Unavailable("store reply timed out".to_string()))
            }
        }
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl WsInner {
    fn dispatch(&self, reply: StoreReply) {
        match reply {
            StoreReply::Event { sub, value } => {
                let event = match value.as_deref().map(bytes_to_value) {
                    Some(Ok(v)) => ChannelEvent::Changed(v),
                    Some(Err(e)) => {
                        log::warn!("undecodable event payload for sub {sub}: {e}");
                        return;
                    }
                    None => ChannelEvent::Removed,
                };
                let subs = self.subs.lock().expect("subs lock");
                if let Some(tx) = subs.get(&sub) {
                    if tx.try_send(event).is_err() {
                        log::warn!("dropping update for lagging subscription {sub}");
                    }
                }
            }
            StoreReply::Value { id, .. } | StoreReply::Ack { id } | StoreReply::Error { id, .. } => {
                let completion = self.pending.lock().expect("pending lock").remove(&id);
                if let Some(tx) = completion {
                    let _ = tx.send(reply);
                }
            }
        }
    }

    /// Connection lost: fail pending requests, close subscription streams.
    fn shut_down(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.pending.lock().expect("pending lock").clear();
        self.subs.lock().expect("subs lock").clear();
        log::info!("store connection closed");
    }
}

#[async_trait]
impl RemoteChannel for WsChannel {
    async fn read(&self, path: &str) -> Result<Option<Value>, ChannelError> {
        let id = self.next_id();
        let req = StoreRequest::Read {
            id,
            path: path.to_string(),
        };
        match self.request(req, id).await? {
            StoreReply::Value { value, .. } => match value {
                Some(bytes) => bytes_to_value(&bytes)
                    .map(Some)
                    .map_err(|e| ChannelError::Serialization(e.to_string())),
                None => Ok(None),
            },
            other => Err(ChannelError::Unavailable(format!(
                "unexpected reply to read: {other:?}"
            ))),
        }
    }

    async fn write(&self, path: &str, value: Value) -> Result<(), ChannelError> {
        let id = self.next_id();
        let bytes =
            value_to_bytes(&value).map_err(|e| ChannelError::Serialization(e.to_string()))?;
        let req = StoreRequest::Write {
            id,
            path: path.to_string(),
            value: bytes,
        };
        match self.request(req, id).await? {
            StoreReply::Ack { .. } => Ok(()),
            other => Err(ChannelError::Unavailable(format!(
                "unexpected reply to write: {other:?}"
            ))),
        }
    }

    async fn remove(&self, path: &str) -> Result<(), ChannelError> {
        let id = self.next_id();
        let req = StoreRequest::Remove {
            id,
            path: path.to_string(),
        };
        match self.request(req, id).await? {
            StoreReply::Ack { .. } => Ok(()),
            other => Err(ChannelError::Unavailable(format!(
                "unexpected reply to remove: {other:?}"
            ))),
        }
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, ChannelError> {
        let id = self.next_id();
        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        // Register before sending so no event can slip past the ack.
        self.inner.subs.lock().expect("subs lock").insert(id, tx);

        let req = StoreRequest::Subscribe {
            id,
            path: path.to_string(),
        };
        match self.request(req, id).await {
            Ok(StoreReply::Ack { .. }) => {
                let inner = self.inner.clone();
                Ok(Subscription::with_closer(rx, move || {
                    inner.subs.lock().expect("subs lock").remove(&id);
                    let unsub = StoreRequest::Unsubscribe { id: 0, sub: id };
                    if let Ok(frame) = unsub.encode() {
                        let _ = inner.out_tx.try_send(frame);
                    }
                }))
            }
            Ok(other) => {
                self.inner.subs.lock().expect("subs lock").remove(&id);
                Err(ChannelError::Unavailable(format!(
                    "unexpected reply to subscribe: {other:?}"
                )))
            }
            Err(e) => {
                self.inner.subs.lock().expect("subs lock").remove(&id);
                Err(e)
            }
        }
    }
}
