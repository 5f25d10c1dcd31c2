use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::message::MessageRole;

pub const FETCHING_CONTEXT_STATUS: &str = "Fetching context...";
pub const CHOOSING_COMPONENT_STATUS: &str = "Choosing component...";
pub const HYDRATING_COMPONENT_STATUS: &str = "Hydrating component...";
pub const STREAMING_RESPONSE_STATUS: &str = "Streaming response...";
pub const COMPLETE_STATUS: &str = "Complete";
pub const CANCELLED_STATUS: &str = "Cancelled";

/// Thread-level generation status.
///
/// A thread holds exactly one stage at a time; it is the single source of truth for
/// "is this thread busy".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenerationStage {
    #[default]
    Idle,
    FetchingContext,
    ChoosingComponent,
    HydratingComponent,
    StreamingResponse,
    Complete,
    Error,
    Cancelled,
}

impl GenerationStage {
    /// Stages during which no new user turn may begin
    pub const BUSY: [GenerationStage; 3] = [
        GenerationStage::StreamingResponse,
        GenerationStage::HydratingComponent,
        GenerationStage::ChoosingComponent,
    ];

    pub fn is_busy(self) -> bool {
        Self::BUSY.contains(&self)
    }

    pub fn accepts_new_turn(self) -> bool {
        !self.is_busy()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::FetchingContext => "FETCHING_CONTEXT",
            Self::ChoosingComponent => "CHOOSING_COMPONENT",
            Self::HydratingComponent => "HYDRATING_COMPONENT",
            Self::StreamingResponse => "STREAMING_RESPONSE",
            Self::Complete => "COMPLETE",
            Self::Error => "ERROR",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for GenerationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened to a thread and may move its stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageEvent {
    /// A client appended a message and wants a new turn
    UserTurnStarted,

    /// The model is about to work on the latest message
    ModelWorkStarted {
        latest_role: MessageRole,
        component_name: Option<String>,
    },

    /// The first chunk of a streamed response is about to be written
    StreamingStarted,

    /// An assistant/tool response was finalized
    ResponseFinalized { has_tool_call: bool },

    Failed { reason: String },

    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub stage: GenerationStage,
    pub status_message: String,
}

impl StageTransition {
    fn new(stage: GenerationStage, status_message: impl Into<String>) -> Self {
        Self {
            stage,
            status_message: status_message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    #[error("thread is busy ({0})")]
    Busy(GenerationStage),
}

/// Compute the stage a thread moves to when `event` happens while it is in `current`.
///
/// This is the only place the transition table lives; persistence code applies the result
/// through a single write path.
pub fn transition(
    current: GenerationStage,
    event: &StageEvent,
) -> Result<StageTransition, StageError> {
    let next = match event {
        StageEvent::UserTurnStarted => {
            if current.is_busy() {
                return Err(StageError::Busy(current));
            }
            StageTransition::new(GenerationStage::FetchingContext, FETCHING_CONTEXT_STATUS)
        }
        StageEvent::ModelWorkStarted {
            latest_role: MessageRole::Tool,
            component_name,
        } => {
            let status = match component_name {
                Some(name) => format!("Hydrating {}...", name),
                None => HYDRATING_COMPONENT_STATUS.to_string(),
            };
            StageTransition::new(GenerationStage::HydratingComponent, status)
        }
        StageEvent::ModelWorkStarted { .. } => {
            StageTransition::new(GenerationStage::ChoosingComponent, CHOOSING_COMPONENT_STATUS)
        }
        StageEvent::StreamingStarted => {
            StageTransition::new(GenerationStage::StreamingResponse, STREAMING_RESPONSE_STATUS)
        }
        StageEvent::ResponseFinalized { has_tool_call: true } => {
            StageTransition::new(GenerationStage::FetchingContext, FETCHING_CONTEXT_STATUS)
        }
        StageEvent::ResponseFinalized { has_tool_call: false } => {
            StageTransition::new(GenerationStage::Complete, COMPLETE_STATUS)
        }
        StageEvent::Failed { reason } => StageTransition::new(GenerationStage::Error, reason.clone()),
        StageEvent::Cancelled => StageTransition::new(GenerationStage::Cancelled, CANCELLED_STATUS),
    };

    Ok(next)
}
