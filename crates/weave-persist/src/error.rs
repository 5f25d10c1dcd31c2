use thiserror::Error;
use weave_types::{GenerationStage, StageError};

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Thread {thread_id} is busy ({stage})")]
    ThreadBusy {
        thread_id: String,
        stage: GenerationStage,
    },

    /// The caller's view of the thread is stale: the latest message moved, or another
    /// transaction committed first
    #[error("Consistency violation on thread {thread_id}: {detail}")]
    ConsistencyViolation { thread_id: String, detail: String },

    #[cfg(feature = "mongodb")]
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[cfg(feature = "mongodb")]
    #[error("BSON serialization error: {0}")]
    BsonSerialization(#[from] bson::ser::Error),

    #[cfg(feature = "mongodb")]
    #[error("BSON deserialization error: {0}")]
    BsonDeserialization(#[from] bson::de::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PersistError {
    pub fn busy(thread_id: impl Into<String>, error: StageError) -> Self {
        match error {
            StageError::Busy(stage) => Self::ThreadBusy {
                thread_id: thread_id.into(),
                stage,
            },
        }
    }

    pub fn latest_message_mismatch(
        thread_id: impl Into<String>,
        expected: &str,
        actual: Option<&str>,
    ) -> Self {
        Self::ConsistencyViolation {
            thread_id: thread_id.into(),
            detail: format!(
                "expected latest message {}, found {}",
                expected,
                actual.unwrap_or("no messages")
            ),
        }
    }

    pub fn version_conflict(thread_id: impl Into<String>, observed: u64, current: u64) -> Self {
        Self::ConsistencyViolation {
            thread_id: thread_id.into(),
            detail: format!(
                "thread changed concurrently (observed version {}, now {})",
                observed, current
            ),
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Self::ThreadBusy { .. })
    }

    pub fn is_consistency_violation(&self) -> bool {
        matches!(self, Self::ConsistencyViolation { .. })
    }
}

pub type Result<T> = std::result::Result<T, PersistError>;
