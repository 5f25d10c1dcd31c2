//! Transactional persistence for Weave threads.
//!
//! [`ThreadMutationCoordinator`] is the only writer of a thread's generation stage. Storage is
//! pluggable through [`PersistenceClient`]: [`MemoryStore`] is always available, MongoDB is
//! behind the `mongodb` feature.

pub mod consistency;
pub mod coordinator;
pub mod dbs;
pub mod error;
pub mod trait_client;

pub use consistency::{verify_in_progress_reply, verify_latest_message_consistency};
pub use coordinator::{update_generation_stage, FinishResult, ThreadMutationCoordinator};
pub use dbs::{MemoryStore, MemoryTransaction};
pub use error::{PersistError, Result};
pub use trait_client::{IsolationLevel, PersistenceClient, ThreadStageUpdate, ThreadTransaction};

#[cfg(feature = "mongodb")]
pub use dbs::{MongoPersistenceClient, MongoTransaction};
