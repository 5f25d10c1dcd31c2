//! Turn orchestration for Weave threads.
//!
//! An [`Orchestrator`] gathers a thread's context, asks a [`DecisionBackend`] for decisions and
//! writes them back through the persistence coordinator, either in one go
//! ([`Orchestrator::process_thread_message`]) or chunk by chunk
//! ([`Orchestrator::stream_thread_message`]).

pub mod backend;
pub mod error;
pub mod orchestrator;
pub mod strict;

pub use backend::{
    DecisionBackend, DecisionStream, EmptyRegistry, ScriptStep, ScriptedBackend, StaticRegistry,
    ToolRegistry, TurnContext, TurnInput,
};
pub use error::{ProcessError, Result};
pub use orchestrator::{get_final_decision, Orchestrator, ThreadMessageStream};
pub use strict::{strictify_tool, unstrictify_tool_call};
