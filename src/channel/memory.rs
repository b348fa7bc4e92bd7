//! In-process store implementation.
//!
//! One JSON tree behind an async lock, with watcher fan-out. Every
//! mutation is delivered to all watchers on a related path — the
//! writer's own watchers included, so echo semantics match the hosted
//! store exactly. Watcher snapshots are taken while the write lock is
//! still held, so notification payloads follow write order.
//!
//! An `offline` switch lets tests simulate store outage: reads, writes
//! and removals fail with `ChannelError::Unavailable` while set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};

use super::tree::JsonTree;
use super::{ChannelError, ChannelEvent, RemoteChannel, Subscription};

/// Buffered events per watcher before a lagging subscriber drops updates.
const WATCHER_CAPACITY: usize = 256;

struct Watcher {
    path: String,
    tx: mpsc::Sender<ChannelEvent>,
}

struct MemoryInner {
    tree: RwLock<JsonTree>,
    watchers: Mutex<Vec<Watcher>>,
    offline: AtomicBool,
    // Per-path write counts, for tests asserting write frequency.
    write_counts: Mutex<HashMap<String, u64>>,
}

/// In-process [`RemoteChannel`]. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MemoryChannel {
    inner: Arc<MemoryInner>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                tree: RwLock::new(JsonTree::new()),
                watchers: Mutex::new(Vec::new()),
                offline: AtomicBool::new(false),
                write_counts: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Simulate store outage: while offline, read/write/remove fail.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of writes observed at exactly `path`.
    pub fn writes_to(&self, path: &str) -> u64 {
        self.inner
            .write_counts
            .lock()
            .expect("write counts lock")
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    fn check_online(&self) -> Result<(), ChannelError> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(ChannelError::Unavailable("store offline".to_string()));
        }
        Ok(())
    }

    /// Notify watchers related to `mutated`. Must be called with the
    /// tree guard still held so payloads follow write order.
    fn notify(&self, tree: &JsonTree, mutated: &str) {
        let mut watchers = self.inner.watchers.lock().expect("watchers lock");
        watchers.retain(|w| !w.tx.is_closed());
        for watcher in watchers.iter() {
            if !JsonTree::related(&watcher.path, mutated) {
                continue;
            }
            let event = match tree.get(&watcher.path) {
                Some(value) => ChannelEvent::Changed(value),
                None => ChannelEvent::Removed,
            };
            if watcher.tx.try_send(event).is_err() {
                log::warn!("dropping update for lagging subscriber at {}", watcher.path);
            }
        }
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteChannel for MemoryChannel {
    async fn read(&self, path: &str) -> Result<Option<Value>, ChannelError> {
        self.check_online()?;
        Ok(self.inner.tree.read().await.get(path))
    }

    async fn write(&self, path: &str, value: Value) -> Result<(), ChannelError> {
        self.check_online()?;
        let tree = {
            let mut tree = self.inner.tree.write().await;
            tree.set(path, value);
            tree
        };
        *self
            .inner
            .write_counts
            .lock()
            .expect("write counts lock")
            .entry(path.to_string())
            .or_insert(0) += 1;
        self.notify(&tree, path);
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), ChannelError> {
        self.check_online()?;
        let tree = {
            let mut tree = self.inner.tree.write().await;
            tree.remove(path);
            tree
        };
        self.notify(&tree, path);
        Ok(())
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, ChannelError> {
        let (tx, rx) = mpsc::channel(WATCHER_CAPACITY);
        self.inner
            .watchers
            .lock()
            .expect("watchers lock")
            .push(Watcher {
                path: path.to_string(),
                tx,
            });
        Ok(Subscription::local(rx))
    }
}
