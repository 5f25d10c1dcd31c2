pub mod memory;

#[cfg(feature = "mongodb")]
pub mod mongo;

pub use memory::{MemoryStore, MemoryTransaction};

#[cfg(feature = "mongodb")]
pub use mongo::{MongoPersistenceClient, MongoTransaction};
