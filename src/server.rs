//! Hosted store server.
//!
//! Serves the [`wire`](crate::channel::wire) protocol over WebSocket.
//! All connections share one JSON tree; every mutation fans out to the
//! subscriptions watching a related path, the mutating connection's own
//! subscriptions included. Watchers are notified while the tree lock is
//! still held, so event payloads follow write order.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::channel::tree::JsonTree;
use crate::channel::wire::{StoreReply, StoreRequest};

/// Outgoing frame buffer per connection.
const OUTGOING_CAPACITY: usize = 256;

/// Store server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9800".to_string(),
        }
    }
}

/// Server errors.
#[derive(Debug)]
pub enum ServerError {
    BindFailed(std::io::Error),
    AcceptFailed(std::io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BindFailed(e) => write!(f, "Failed to bind: {e}"),
            Self::AcceptFailed(e) => write!(f, "Failed to accept connection: {e}"),
        }
    }
}

impl std::error::Error for ServerError {}

struct StoreWatcher {
    conn: Uuid,
    sub: u64,
    path: String,
    tx: mpsc::Sender<Vec<u8>>,
}

struct StoreState {
    tree: RwLock<JsonTree>,
    watchers: Mutex<Vec<StoreWatcher>>,
    connections: AtomicU64,
    writes: AtomicU64,
}

/// Server statistics snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ServerStats {
    pub active_connections: u64,
    pub total_writes: u64,
}

/// The hosted store: one JSON tree shared by every connection.
pub struct StoreServer {
    config: ServerConfig,
    state: Arc<StoreState>,
}

impl StoreServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            state: Arc::new(StoreState {
                tree: RwLock::new(JsonTree::new()),
                watchers: Mutex::new(Vec::new()),
                connections: AtomicU64::new(0),
                writes: AtomicU64::new(0),
            }),
        }
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            active_connections: self.state.connections.load(Ordering::SeqCst),
            total_writes: self.state.writes.load(Ordering::SeqCst),
        }
    }

    /// Bind and return the listener without accepting. Lets callers
    /// learn the bound address before serving (port 0 binds).
    pub async fn bind(&self) -> Result<(TcpListener, SocketAddr), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(ServerError::BindFailed)?;
        let addr = listener.local_addr().map_err(ServerError::BindFailed)?;
        log::info!("store server listening on {addr}");
        Ok((listener, addr))
    }

    /// Accept loop. Runs until the listener fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        loop {
            let (stream, peer) = listener.accept().await.map_err(ServerError::AcceptFailed)?;
            let state = self.state.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(state, stream, peer).await {
                    log::debug!("connection {peer} ended: {e}");
                }
            });
        }
    }

    /// Bind and serve in one call.
    pub async fn run(&self) -> Result<(), ServerError> {
        let (listener, _) = self.bind().await?;
        self.serve(listener).await
    }
}

async fn handle_connection(
    state: Arc<StoreState>,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_writer, mut ws_reader) = ws_stream.split();
    let conn = Uuid::new_v4();
    state.connections.fetch_add(1, Ordering::SeqCst);
    log::info!("connection {conn} from {peer}");

    let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(OUTGOING_CAPACITY);

    // Writer task: one socket writer per connection.
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if ws_writer.send(Message::Binary(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_reader.next().await {
        let msg = match msg {
            Ok(Message::Binary(data)) => data,
            Ok(Message::Close(_)) | Err(_) => break,
            _ => continue,
        };
        let bytes: Vec<u8> = msg.into();
        let request = match StoreRequest::decode(&bytes) {
            Ok(req) => req,
            Err(e) => {
                log::warn!("undecodable frame from {conn}: {e}");
                continue;
            }
        };
        let reply = handle_request(&state, conn, &out_tx, request).await;
        if let Some(reply) = reply {
            match reply.encode() {
                Ok(frame) => {
                    if out_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(e) => log::error!("failed to encode reply: {e}"),
            }
        }
    }

    // Connection gone: drop its subscriptions.
    state
        .watchers
        .lock()
        .await
        .retain(|w| w.conn != conn);
    state.connections.fetch_sub(1, Ordering::SeqCst);
    writer.abort();
    log::info!("connection {conn} closed");
    Ok(())
}

async fn handle_request(
    state: &Arc<StoreState>,
    conn: Uuid,
    out_tx: &mpsc::Sender<Vec<u8>>,
    request: StoreRequest,
) -> Option<StoreReply> {
    match request {
        StoreRequest::Read { id, path } => {
            let value = state.tree.read().await.get(&path);
            let bytes = match value {
                Some(v) => match serde_json::to_vec(&v) {
                    Ok(b) => Some(b),
                    Err(e) => {
                        return Some(StoreReply::Error {
                            id,
                            message: e.to_string(),
                        })
                    }
                },
                None => None,
            };
            Some(StoreReply::Value { id, value: bytes })
        }
        StoreRequest::Write { id, path, value } => {
            let parsed = match serde_json::from_slice(&value) {
                Ok(v) => v,
                Err(e) => {
                    return Some(StoreReply::Error {
                        id,
                        message: format!("invalid JSON payload: {e}"),
                    })
                }
            };
            {
                let mut tree = state.tree.write().await;
                tree.set(&path, parsed);
                notify_watchers(state, &tree, &path).await;
            }
            state.writes.fetch_add(1, Ordering::SeqCst);
            Some(StoreReply::Ack { id })
        }
        StoreRequest::Remove { id, path } => {
            {
                let mut tree = state.tree.write().await;
                tree.remove(&path);
                notify_watchers(state, &tree, &path).await;
            }
            Some(StoreReply::Ack { id })
        }
        StoreRequest::Subscribe { id, path } => {
            state.watchers.lock().await.push(StoreWatcher {
                conn,
                sub: id,
                path,
                tx: out_tx.clone(),
            });
            Some(StoreReply::Ack { id })
        }
        StoreRequest::Unsubscribe { id, sub } => {
            state
                .watchers
                .lock()
                .await
                .retain(|w| !(w.conn == conn && w.sub == sub));
            // Fire-and-forget unsubscribes (id 0) get no ack.
            if id == 0 {
                None
            } else {
                Some(StoreReply::Ack { id })
            }
        }
    }
}

/// Deliver the post-mutation value at each related watched path. Called
/// with the tree write guard held so payloads follow write order.
async fn notify_watchers(state: &Arc<StoreState>, tree: &JsonTree, mutated: &str) {
    let mut watchers = state.watchers.lock().await;
    watchers.retain(|w| !w.tx.is_closed());

    // Snapshot each watched path once even if several watchers share it.
    let mut snapshots: HashMap<&str, Option<Vec<u8>>> = HashMap::new();
    for watcher in watchers.iter() {
        if !JsonTree::related(&watcher.path, mutated) {
            continue;
        }
        let payload = match snapshots.get(watcher.path.as_str()) {
            Some(cached) => cached.clone(),
            None => {
                let bytes = tree.get(&watcher.path).and_then(|v| {
                    serde_json::to_vec(&v)
                        .map_err(|e| log::error!("failed to encode event payload: {e}"))
                        .ok()
                });
                snapshots.insert(watcher.path.as_str(), bytes.clone());
                bytes
            }
        };
        let event = StoreReply::Event {
            sub: watcher.sub,
            value: payload,
        };
        match event.encode() {
            Ok(frame) => {
                if watcher.tx.try_send(frame).is_err() {
                    log::warn!("dropping event for lagging connection {}", watcher.conn);
                }
            }
            Err(e) => log::error!("failed to encode event: {e}"),
        }
    }
}
