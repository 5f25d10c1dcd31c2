use async_trait::async_trait;
use weave_types::{
    GenerationStage, MessageUpdate, NewMessage, NewThread, Thread, ThreadMessage,
};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Reads see data committed before each statement
    #[default]
    ReadCommitted,
    /// Reads see one snapshot for the whole transaction
    Snapshot,
}

/// Values written to a thread through the single stage write path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadStageUpdate {
    pub generation_stage: GenerationStage,
    pub status_message: Option<String>,
}

/// Trait for database persistence operations
///
/// Implementations provide thread storage plus transactions over a thread and its messages.
#[async_trait]
pub trait PersistenceClient: Send + Sync {
    /// Create a new thread in the `IDLE` stage
    async fn create_thread(&self, thread: NewThread) -> Result<Thread>;

    /// Get a thread by ID
    async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>>;

    /// Get all messages for a thread, oldest first
    async fn get_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>>;

    /// Open a transaction
    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn ThreadTransaction>>;
}

/// One open transaction
///
/// Writes only become visible to other readers once [`ThreadTransaction::commit`] succeeds.
/// A commit fails with `ConsistencyViolation` when a thread this transaction wrote was committed
/// by someone else after it was read here.
#[async_trait]
pub trait ThreadTransaction: Send {
    async fn find_thread(&mut self, thread_id: &str) -> Result<Option<Thread>>;

    /// Messages of a thread, oldest first, including this transaction's own writes
    async fn find_messages(&mut self, thread_id: &str) -> Result<Vec<ThreadMessage>>;

    async fn add_message(&mut self, thread_id: &str, message: NewMessage) -> Result<ThreadMessage>;

    async fn update_message(
        &mut self,
        thread_id: &str,
        message_id: &str,
        update: MessageUpdate,
    ) -> Result<ThreadMessage>;

    async fn update_thread(&mut self, thread_id: &str, update: ThreadStageUpdate)
        -> Result<Thread>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
