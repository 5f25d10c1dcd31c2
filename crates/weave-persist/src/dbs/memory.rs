use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use weave_types::{MessageUpdate, NewMessage, NewThread, Thread, ThreadMessage};

use crate::error::{PersistError, Result};
use crate::trait_client::{IsolationLevel, PersistenceClient, ThreadStageUpdate, ThreadTransaction};

#[derive(Debug, Clone, Default)]
struct StoreState {
    threads: HashMap<String, Thread>,
    messages: HashMap<String, Vec<ThreadMessage>>,
}

/// In-memory storage for tests and local development
///
/// Transactions buffer their writes and apply them at commit under a store-wide write lock, after
/// checking that every thread they wrote still has the version they first observed.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceClient for MemoryStore {
    async fn create_thread(&self, thread: NewThread) -> Result<Thread> {
        let thread = Thread::from_new(thread);
        let mut state = self.state.write().await;
        state.threads.insert(thread.id.clone(), thread.clone());
        state.messages.insert(thread.id.clone(), Vec::new());
        tracing::debug!(thread_id = %thread.id, "Created thread");
        Ok(thread)
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>> {
        let state = self.state.read().await;
        Ok(state.threads.get(thread_id).cloned())
    }

    async fn get_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>> {
        let state = self.state.read().await;
        Ok(state.messages.get(thread_id).cloned().unwrap_or_default())
    }

    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn ThreadTransaction>> {
        let snapshot = match isolation {
            IsolationLevel::ReadCommitted => None,
            IsolationLevel::Snapshot => Some(self.state.read().await.clone()),
        };
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            snapshot,
            observed_versions: HashMap::new(),
            dirty: HashMap::new(),
        }))
    }
}

/// Copy of a thread and its messages owned by a transaction that wrote to it
#[derive(Debug)]
struct DirtyThread {
    thread: Thread,
    messages: Vec<ThreadMessage>,
}

pub struct MemoryTransaction {
    state: Arc<RwLock<StoreState>>,
    snapshot: Option<StoreState>,
    observed_versions: HashMap<String, u64>,
    dirty: HashMap<String, DirtyThread>,
}

impl MemoryTransaction {
    async fn read_committed(&self, thread_id: &str) -> Option<(Thread, Vec<ThreadMessage>)> {
        let load = |state: &StoreState| {
            state.threads.get(thread_id).map(|thread| {
                let messages = state.messages.get(thread_id).cloned().unwrap_or_default();
                (thread.clone(), messages)
            })
        };
        match &self.snapshot {
            Some(snapshot) => load(snapshot),
            None => load(&*self.state.read().await),
        }
    }

    async fn dirty_thread(&mut self, thread_id: &str) -> Result<&mut DirtyThread> {
        if !self.dirty.contains_key(thread_id) {
            let (thread, messages) = self
                .read_committed(thread_id)
                .await
                .ok_or_else(|| PersistError::ThreadNotFound(thread_id.to_string()))?;
            self.observed_versions
                .entry(thread_id.to_string())
                .or_insert(thread.version);
            self.dirty
                .insert(thread_id.to_string(), DirtyThread { thread, messages });
        }
        self.dirty
            .get_mut(thread_id)
            .ok_or_else(|| PersistError::Internal(format!("lost buffered thread {}", thread_id)))
    }
}

#[async_trait]
impl ThreadTransaction for MemoryTransaction {
    async fn find_thread(&mut self, thread_id: &str) -> Result<Option<Thread>> {
        if let Some(dirty) = self.dirty.get(thread_id) {
            return Ok(Some(dirty.thread.clone()));
        }
        let thread = self.read_committed(thread_id).await.map(|(thread, _)| thread);
        if let Some(thread) = &thread {
            self.observed_versions
                .entry(thread.id.clone())
                .or_insert(thread.version);
        }
        Ok(thread)
    }

    async fn find_messages(&mut self, thread_id: &str) -> Result<Vec<ThreadMessage>> {
        if let Some(dirty) = self.dirty.get(thread_id) {
            return Ok(dirty.messages.clone());
        }
        match self.read_committed(thread_id).await {
            Some((thread, messages)) => {
                self.observed_versions
                    .entry(thread.id)
                    .or_insert(thread.version);
                Ok(messages)
            }
            None => Ok(Vec::new()),
        }
    }

    async fn add_message(&mut self, thread_id: &str, message: NewMessage) -> Result<ThreadMessage> {
        let dirty = self.dirty_thread(thread_id).await?;
        let message = ThreadMessage::from_new(thread_id, message);
        dirty.messages.push(message.clone());
        Ok(message)
    }

    async fn update_message(
        &mut self,
        thread_id: &str,
        message_id: &str,
        update: MessageUpdate,
    ) -> Result<ThreadMessage> {
        let dirty = self.dirty_thread(thread_id).await?;
        let message = dirty
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| PersistError::MessageNotFound(message_id.to_string()))?;
        message.apply(update);
        Ok(message.clone())
    }

    async fn update_thread(
        &mut self,
        thread_id: &str,
        update: ThreadStageUpdate,
    ) -> Result<Thread> {
        let dirty = self.dirty_thread(thread_id).await?;
        dirty.thread.generation_stage = update.generation_stage;
        dirty.thread.status_message = update.status_message;
        dirty.thread.updated_at = Utc::now();
        Ok(dirty.thread.clone())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        if this.dirty.is_empty() {
            return Ok(());
        }

        let mut state = this.state.write().await;

        for thread_id in this.dirty.keys() {
            let current = state
                .threads
                .get(thread_id)
                .ok_or_else(|| PersistError::ThreadNotFound(thread_id.clone()))?;
            let observed = this
                .observed_versions
                .get(thread_id)
                .copied()
                .unwrap_or(current.version);
            if current.version != observed {
                return Err(PersistError::version_conflict(
                    thread_id.clone(),
                    observed,
                    current.version,
                ));
            }
        }

        for (thread_id, dirty) in this.dirty {
            let mut thread = dirty.thread;
            thread.version += 1;
            tracing::debug!(
                thread_id = %thread_id,
                version = thread.version,
                stage = %thread.generation_stage,
                "Committed thread"
            );
            state.threads.insert(thread_id.clone(), thread);
            state.messages.insert(thread_id, dirty.messages);
        }

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        tracing::debug!(threads = self.dirty.len(), "Discarding buffered writes");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_types::{GenerationStage, MessageRole};

    async fn store_with_thread() -> (MemoryStore, Thread) {
        let store = MemoryStore::new();
        let thread = store.create_thread(NewThread::new("project-1")).await.unwrap();
        (store, thread)
    }

    #[tokio::test]
    async fn test_writes_invisible_until_commit() {
        let (store, thread) = store_with_thread().await;

        let mut tx = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        tx.add_message(&thread.id, NewMessage::user("hello"))
            .await
            .unwrap();

        assert_eq!(tx.find_messages(&thread.id).await.unwrap().len(), 1);
        assert!(store.get_messages(&thread.id).await.unwrap().is_empty());

        tx.commit().await.unwrap();
        assert_eq!(store.get_messages(&thread.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let (store, thread) = store_with_thread().await;

        let mut tx = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        tx.update_thread(
            &thread.id,
            ThreadStageUpdate {
                generation_stage: GenerationStage::StreamingResponse,
                status_message: None,
            },
        )
        .await
        .unwrap();
        tx.rollback().await.unwrap();

        let stored = store.get_thread(&thread.id).await.unwrap().unwrap();
        assert_eq!(stored.generation_stage, GenerationStage::Idle);
        assert_eq!(stored.version, 0);
    }

    #[tokio::test]
    async fn test_commit_bumps_version() {
        let (store, thread) = store_with_thread().await;

        let mut tx = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        tx.add_message(&thread.id, NewMessage::new(MessageRole::Assistant, "hi"))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let stored = store.get_thread(&thread.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_stale_writer_fails_at_commit() {
        let (store, thread) = store_with_thread().await;

        let mut first = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        let mut second = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        first.find_thread(&thread.id).await.unwrap();
        second.find_thread(&thread.id).await.unwrap();

        first
            .add_message(&thread.id, NewMessage::user("first"))
            .await
            .unwrap();
        second
            .add_message(&thread.id, NewMessage::user("second"))
            .await
            .unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(err.is_consistency_violation());

        let messages = store.get_messages(&thread.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text(), "first");
    }

    #[tokio::test]
    async fn test_message_read_pins_version() {
        let (store, thread) = store_with_thread().await;
        let placeholder = {
            let mut tx = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
            let message = tx
                .add_message(&thread.id, NewMessage::placeholder(MessageRole::Assistant, ""))
                .await
                .unwrap();
            tx.commit().await.unwrap();
            message
        };

        let mut stale = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        stale.find_messages(&thread.id).await.unwrap();

        let mut other = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        other
            .update_thread(
                &thread.id,
                ThreadStageUpdate {
                    generation_stage: GenerationStage::Cancelled,
                    status_message: None,
                },
            )
            .await
            .unwrap();
        other.commit().await.unwrap();

        stale
            .update_message(&thread.id, &placeholder.id, MessageUpdate::from(&placeholder))
            .await
            .unwrap();
        let err = stale.commit().await.unwrap_err();
        assert!(err.is_consistency_violation());
    }

    #[tokio::test]
    async fn test_update_unknown_message() {
        let (store, thread) = store_with_thread().await;
        let mut tx = store.begin(IsolationLevel::ReadCommitted).await.unwrap();

        let placeholder = ThreadMessage::from_new(&thread.id, NewMessage::user("x"));
        let err = tx
            .update_message(&thread.id, "missing", MessageUpdate::from(&placeholder))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistError::MessageNotFound(_)));
    }

    #[tokio::test]
    async fn test_snapshot_isolation_ignores_later_commits() {
        let (store, thread) = store_with_thread().await;

        let mut reader = store.begin(IsolationLevel::Snapshot).await.unwrap();

        let mut writer = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        writer
            .add_message(&thread.id, NewMessage::user("late"))
            .await
            .unwrap();
        writer.commit().await.unwrap();

        assert!(reader.find_messages(&thread.id).await.unwrap().is_empty());
    }
}
