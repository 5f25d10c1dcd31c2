use thiserror::Error;
use weave_persist::PersistError;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("Decision stream produced no decisions")]
    StreamEmpty,

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Thread {0} has no messages to respond to")]
    EmptyThread(String),

    #[error("Model backend error: {0}")]
    Backend(anyhow::Error),

    #[error("Tool registry error: {0}")]
    Registry(anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ProcessError>;
