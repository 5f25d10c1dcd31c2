//! # Weave
//!
//! Weave drives a generative-UI conversation thread through one model turn at a time:
//!
//! - a **stage machine** that is the single source of truth for whether a thread is busy
//! - a **staged-decision reducer** that keeps in-flight tool calls off the visible message until
//!   the logical message is finalized
//! - a **mutation coordinator** that pairs every write with a consistency check and a stage
//!   transition inside one transaction
//! - an **orchestrator** that turns a thread into decisions and back, in one go or streamed
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use weave::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let backend = ScriptedBackend::new()
//!         .with_turn(vec![Decision::new("r1", "Hello! How can I help?")]);
//!
//!     let weave = WeaveBuilder::new()
//!         .backend(std::sync::Arc::new(backend))
//!         .memory()
//!         .build()
//!         .await?;
//!
//!     let thread = weave.create_thread(NewThread::new("my-project")).await?;
//!     weave.add_user_message(&thread.id, "hi").await?;
//!
//!     let result = weave.process(TurnInput::new(&thread.id)).await?;
//!     println!("{} ({})", result.message.text(), result.resulting_status_message);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **weave-types**: threads, messages, decisions and the generation stage machine
//! - **weave-stream**: decision reducer and message projector
//! - **weave-persist**: persistence traits, memory and MongoDB stores, mutation coordinator
//! - **weave-graph**: model backend trait, tool strictification, turn orchestrator
//!
//! ## Features
//!
//! - `mongodb`: MongoDB persistence with multi-document transactions

pub use weave_graph as graph;
pub use weave_persist as persist;
pub use weave_stream as stream;
pub use weave_types as types;

pub use weave_graph::{
    DecisionBackend, Orchestrator, ProcessError, ScriptedBackend, ToolRegistry, TurnInput,
};
pub use weave_persist::{FinishResult, MemoryStore, PersistError, PersistenceClient};
pub use weave_types::{Decision, GenerationStage, NewMessage, NewThread, Thread, ThreadMessage};

/// High-level builder for wiring a backend, a registry and a store together
pub mod builder;

/// Layered configuration (TOML files + environment)
pub mod config;

pub mod logging;

/// Convenient prelude with commonly used types
pub mod prelude {
    pub use crate::builder::{Weave, WeaveBuilder};
    pub use crate::config::Config;
    pub use crate::graph::{ScriptedBackend, StaticRegistry, TurnInput};
    pub use crate::types::{
        Decision, GenerationStage, NewMessage, NewThread, Thread, ThreadMessage, Tool,
        ToolCallRequest,
    };
    pub use anyhow::Result;
}
