pub mod client;
pub mod models;

pub use client::{MongoPersistenceClient, MongoTransaction};
pub use models::{MongoMessage, MongoThread};
