//! Core data model for Weave threads.
//!
//! Holds the persisted shapes ([`Thread`], [`ThreadMessage`]), the streaming unit emitted by a
//! model backend ([`Decision`]) and the [`GenerationStage`] machine that gates whether a thread
//! may accept new work.

pub mod decision;
pub mod message;
pub mod stage;
pub mod thread;
pub mod tool;

pub use decision::{
    ComponentDecision, Decision, StagedDecision, ToolCallInfo, ToolCallRequest, ToolParameter,
};
pub use message::{
    ActionType, ContentPart, ImageUrl, MessageRole, MessageUpdate, NewMessage, ThreadMessage,
};
pub use stage::{GenerationStage, StageError, StageEvent, StageTransition};
pub use thread::{NewThread, Thread};
pub use tool::{AvailableComponent, FunctionDefinition, ResourceDescriptor, Tool};
