//! Persistence store backed by `sled`
//!
//! Two trees hold the durable state: `"user"` (user name -> user record)
//! and `"messages"` (topic -> most recent persistent message). Values are
//! serde_json records.
//!
//! Write discipline: message adds arrive on a bounded channel and land in
//! an in-memory cache keyed by topic, newest publish winning. A flusher
//! drains the cache into a single atomic batch every 20 seconds and again
//! on shutdown. Removes execute immediately as single-key deletes. User
//! writes are synchronous and flushed before returning.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::StoreError;

const USER_TREE: &str = "user";
const MESSAGE_TREE: &str = "messages";

/// How long to retry acquiring the database lock at startup.
const OPEN_TIMEOUT: Duration = Duration::from_secs(3);
/// Interval between cache drains.
const FLUSH_INTERVAL: Duration = Duration::from_secs(20);
/// Persistent publishes are rare; a small buffer bounds memory and briefly
/// back-pressures bursts.
const ADD_CHANNEL_CAPACITY: usize = 10;
const REMOVE_CHANNEL_CAPACITY: usize = 10;

/// A persistent message record, keyed by topic in the `"messages"` tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub properties: u8,
    pub topic: String,
    pub payload: Vec<u8>,
}

/// A user record, keyed by name in the `"user"` tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredUser {
    pub name: String,
    pub admin: bool,
    pub public_key_pem: String,
}

type MessageCache = Arc<RwLock<HashMap<String, StoredMessage>>>;

pub struct Store {
    db: sled::Db,
    users: sled::Tree,
    messages: sled::Tree,
    cache: MessageCache,
    add_tx: mpsc::Sender<StoredMessage>,
    remove_tx: mpsc::Sender<String>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Store {
    /// Open the database, create both trees if absent and start the router
    /// and flusher tasks. Fails once the lock-acquisition window elapses.
    pub async fn open(path: &str) -> Result<Arc<Self>, StoreError> {
        let db = open_with_retry(path).await?;
        let users = db.open_tree(USER_TREE)?;
        let messages = db.open_tree(MESSAGE_TREE)?;

        let cache: MessageCache = Arc::new(RwLock::new(HashMap::new()));
        let (add_tx, add_rx) = mpsc::channel(ADD_CHANNEL_CAPACITY);
        let (remove_tx, remove_rx) = mpsc::channel(REMOVE_CHANNEL_CAPACITY);

        let router = tokio::spawn(run_router(add_rx, remove_rx, cache.clone(), messages.clone()));
        let flusher = tokio::spawn(run_flusher(cache.clone(), messages.clone()));

        info!("store opened at {path}");
        Ok(Arc::new(Self {
            db,
            users,
            messages,
            cache,
            add_tx,
            remove_tx,
            tasks: Mutex::new(vec![router, flusher]),
        }))
    }

    /// Sender feeding the buffered message-add path.
    pub fn add_message_sender(&self) -> mpsc::Sender<StoredMessage> {
        self.add_tx.clone()
    }

    /// Sender feeding the immediate message-remove path.
    pub fn remove_message_sender(&self) -> mpsc::Sender<String> {
        self.remove_tx.clone()
    }

    /// All persisted messages, read from the durable tree.
    pub fn all_messages(&self) -> Vec<StoredMessage> {
        let _guard = self.cache.read().unwrap();
        let mut out = Vec::new();
        for entry in self.messages.iter() {
            match entry {
                Ok((_, value)) => match serde_json::from_slice(&value) {
                    Ok(msg) => out.push(msg),
                    Err(e) => warn!("skipping undecodable message record: {e}"),
                },
                Err(e) => {
                    error!("reading messages tree: {e}");
                    break;
                }
            }
        }
        out
    }

    /// All user records.
    pub fn all_users(&self) -> Vec<StoredUser> {
        let mut out = Vec::new();
        for entry in self.users.iter() {
            match entry {
                Ok((_, value)) => match serde_json::from_slice(&value) {
                    Ok(user) => out.push(user),
                    Err(e) => warn!("skipping undecodable user record: {e}"),
                },
                Err(e) => {
                    error!("reading user tree: {e}");
                    break;
                }
            }
        }
        out
    }

    /// Write a user record synchronously and durably.
    pub fn add_user(&self, user: &StoredUser) -> Result<(), StoreError> {
        let value = serde_json::to_vec(user)?;
        self.users.insert(user.name.as_bytes(), value)?;
        self.users.flush()?;
        Ok(())
    }

    /// Delete a user record synchronously and durably.
    pub fn remove_user(&self, name: &str) -> Result<(), StoreError> {
        self.users.remove(name.as_bytes())?;
        self.users.flush()?;
        Ok(())
    }

    /// Drain the message cache into the durable tree right now.
    pub fn flush_now(&self) {
        flush_messages(&self.cache, &self.messages);
    }

    /// Stop the background tasks, perform a final drain and flush the
    /// database. The database file is released when the last reference to
    /// this store is dropped.
    pub async fn shutdown(&self) {
        let handles: Vec<_> = self.tasks.lock().unwrap().drain(..).collect();
        for handle in handles {
            handle.abort();
            let _ = handle.await;
        }
        self.flush_now();
        if let Err(e) = self.db.flush() {
            error!("final database flush failed: {e}");
        }
        info!("store shut down");
    }
}

/// Moves add events into the cache and executes removes immediately.
async fn run_router(
    mut add_rx: mpsc::Receiver<StoredMessage>,
    mut remove_rx: mpsc::Receiver<String>,
    cache: MessageCache,
    messages: sled::Tree,
) {
    loop {
        tokio::select! {
            add = add_rx.recv() => match add {
                Some(msg) => {
                    cache.write().unwrap().insert(msg.topic.clone(), msg);
                }
                None => break,
            },
            remove = remove_rx.recv() => match remove {
                Some(topic) => {
                    cache.write().unwrap().remove(&topic);
                    if let Err(e) = messages.remove(topic.as_bytes()) {
                        error!("removing message for topic '{topic}': {e}");
                    }
                }
                None => break,
            },
        }
    }
}

async fn run_flusher(cache: MessageCache, messages: sled::Tree) {
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        flush_messages(&cache, &messages);
    }
}

/// Drain the cache into one atomic batch. On failure the drained entries
/// go back into the cache so the next tick retries them.
fn flush_messages(cache: &RwLock<HashMap<String, StoredMessage>>, messages: &sled::Tree) {
    let drained = {
        let mut cache = cache.write().unwrap();
        std::mem::take(&mut *cache)
    };
    if drained.is_empty() {
        return;
    }

    let mut batch = sled::Batch::default();
    for (topic, msg) in &drained {
        match serde_json::to_vec(msg) {
            Ok(value) => batch.insert(topic.as_bytes(), value),
            Err(e) => warn!("cannot serialize message for topic '{topic}': {e}"),
        }
    }

    if let Err(e) = messages.apply_batch(batch) {
        error!("message flush failed, will retry: {e}");
        let mut cache = cache.write().unwrap();
        for (topic, msg) in drained {
            cache.entry(topic).or_insert(msg);
        }
    }
}

async fn open_with_retry(path: &str) -> Result<sled::Db, StoreError> {
    let deadline = tokio::time::Instant::now() + OPEN_TIMEOUT;
    loop {
        match sled::open(path) {
            Ok(db) => return Ok(db),
            Err(e) => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(StoreError::Open {
                        path: path.to_string(),
                        timeout_secs: OPEN_TIMEOUT.as_secs(),
                        source: e,
                    });
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}
