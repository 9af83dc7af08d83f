//! Keyed conversation history.
//!
//! Threads are append-only ordered message sequences, looked up by an
//! opaque id. Persistence is pluggable; the in-memory store covers the
//! interactive case, and the CLI layers file persistence on top.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::message::Message;

/// Opaque identifier for one conversation thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(Uuid);

impl ThreadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ThreadId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// One conversation with its ordered history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationThread {
    pub id: ThreadId,
    pub messages: Vec<Message>,
}

/// Storage for conversation threads. Append-only: implementations never
/// reorder or rewrite messages already in a thread.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// The messages of a thread, oldest first. Unknown ids are empty
    /// threads.
    async fn load(&self, id: ThreadId) -> Result<Vec<Message>>;

    /// Append messages to the end of a thread, creating it if needed.
    async fn append(&self, id: ThreadId, messages: &[Message]) -> Result<()>;
}

/// Process-local store; each thread is independent and nothing is shared
/// across them.
#[derive(Default)]
pub struct InMemoryThreadStore {
    threads: RwLock<HashMap<ThreadId, Vec<Message>>>,
}

impl InMemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThreadStore for InMemoryThreadStore {
    async fn load(&self, id: ThreadId) -> Result<Vec<Message>> {
        let threads = self.threads.read().await;
        Ok(threads.get(&id).cloned().unwrap_or_default())
    }

    async fn append(&self, id: ThreadId, messages: &[Message]) -> Result<()> {
        let mut threads = self.threads.write().await;
        threads
            .entry(id)
            .or_default()
            .extend(messages.iter().cloned());
        Ok(())
    }
}
