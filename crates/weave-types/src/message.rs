use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::decision::{ComponentDecision, Decision, ToolCallInfo, ToolCallRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    ToolCall,
    ToolResponse,
}

/// One ordered piece of message content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },

    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::ImageUrl { .. } => None,
        }
    }
}

pub(crate) fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

fn generate_tool_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// A persisted message in a thread
///
/// While `in_progress` is set the message is a placeholder that gets hydrated in place; once it
/// is finalized it is never mutated again. The outer tool-call fields (`tool_call_request`,
/// `tool_call_id`, `action_type`) are either all set or all absent. A tool call the backend left
/// without an id gets a generated `call_*` id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    pub thread_id: String,
    pub role: MessageRole,
    pub content: Vec<ContentPart>,
    #[serde(default = "empty_object")]
    pub component_state: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<ComponentDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_request: Option<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<ActionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_duration_ms: Option<u64>,
    #[serde(default)]
    pub in_progress: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ThreadMessage {
    /// Materialize a new message for `thread_id`
    pub fn from_new(thread_id: impl Into<String>, message: NewMessage) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            role: message.role,
            content: message.content,
            component_state: message.component_state,
            component: message.component,
            tool_call_request: message.tool_call_request,
            tool_call_id: message.tool_call_id,
            action_type: message.action_type,
            parent_message_id: message.parent_message_id,
            reasoning: message.reasoning,
            reasoning_duration_ms: message.reasoning_duration_ms,
            in_progress: message.in_progress,
            error: message.error,
            created_at: Utc::now(),
        }
    }

    /// Concatenated text of all text parts
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentPart::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn has_tool_call(&self) -> bool {
        self.tool_call_request.is_some()
    }

    /// Set or clear all outer tool-call fields together
    ///
    /// Without an id, the current one is kept when the call is to the same tool, so repeated
    /// views of one streamed call share an id.
    pub fn set_tool_call(&mut self, tool_call: Option<ToolCallInfo>) {
        match tool_call {
            Some(info) => {
                let id = info
                    .id
                    .or_else(|| self.continued_tool_call_id(&info.request))
                    .unwrap_or_else(generate_tool_call_id);
                self.tool_call_request = Some(info.request);
                self.tool_call_id = Some(id);
                self.action_type = Some(ActionType::ToolCall);
            }
            None => {
                self.tool_call_request = None;
                self.tool_call_id = None;
                self.action_type = None;
            }
        }
    }

    fn continued_tool_call_id(&self, request: &ToolCallRequest) -> Option<String> {
        self.tool_call_request
            .as_ref()
            .filter(|current| current.tool_name == request.tool_name)
            .and(self.tool_call_id.clone())
    }

    pub fn apply(&mut self, update: MessageUpdate) {
        self.content = update.content;
        self.component_state = update.component_state;
        self.component = update.component;
        self.tool_call_request = update.tool_call_request;
        self.tool_call_id = update.tool_call_id;
        self.action_type = update.action_type;
        self.reasoning = update.reasoning;
        self.reasoning_duration_ms = update.reasoning_duration_ms;
        self.in_progress = update.in_progress;
        self.error = update.error;
    }
}

/// Input for appending a message to a thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: Vec<ContentPart>,
    #[serde(default = "empty_object")]
    pub component_state: Value,
    #[serde(default)]
    pub component: Option<ComponentDecision>,
    #[serde(default)]
    pub tool_call_request: Option<ToolCallRequest>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub action_type: Option<ActionType>,
    #[serde(default)]
    pub parent_message_id: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub reasoning_duration_ms: Option<u64>,
    #[serde(default)]
    pub in_progress: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl NewMessage {
    pub fn new(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::text(text)],
            component_state: empty_object(),
            component: None,
            tool_call_request: None,
            tool_call_id: None,
            action_type: None,
            parent_message_id: None,
            reasoning: None,
            reasoning_duration_ms: None,
            in_progress: false,
            error: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, text)
    }

    /// Result of a tool the client executed for a previous tool call
    pub fn tool_response(tool_call_id: impl Into<String>, text: impl Into<String>) -> Self {
        let mut message = Self::new(MessageRole::Tool, text);
        message.tool_call_id = Some(tool_call_id.into());
        message.action_type = Some(ActionType::ToolResponse);
        message
    }

    /// Empty in-progress message that will be hydrated as a response streams in
    pub fn placeholder(role: MessageRole, initial_text: impl Into<String>) -> Self {
        let mut message = Self::new(role, initial_text);
        message.in_progress = true;
        message
    }

    /// Finalized assistant message carrying everything a decision chose
    pub fn from_decision(decision: &Decision) -> Self {
        let mut message = Self::new(MessageRole::Assistant, decision.message.clone());
        message.component_state = decision.component_state.clone();
        message.component = Some(ComponentDecision::from(decision));
        message.reasoning = decision.reasoning.clone();
        message.reasoning_duration_ms = decision.reasoning_duration_ms;
        if let Some(tool_call) = decision.tool_call() {
            message.tool_call_request = Some(tool_call.request);
            message.tool_call_id = Some(tool_call.id.unwrap_or_else(generate_tool_call_id));
            message.action_type = Some(ActionType::ToolCall);
        }
        message
    }

    pub fn with_parent(mut self, parent_message_id: impl Into<String>) -> Self {
        self.parent_message_id = Some(parent_message_id.into());
        self
    }

    pub fn with_component_state(mut self, state: Value) -> Self {
        self.component_state = state;
        self
    }
}

impl From<ThreadMessage> for NewMessage {
    fn from(message: ThreadMessage) -> Self {
        Self {
            role: message.role,
            content: message.content,
            component_state: message.component_state,
            component: message.component,
            tool_call_request: message.tool_call_request,
            tool_call_id: message.tool_call_id,
            action_type: message.action_type,
            parent_message_id: message.parent_message_id,
            reasoning: message.reasoning,
            reasoning_duration_ms: message.reasoning_duration_ms,
            in_progress: message.in_progress,
            error: message.error,
        }
    }
}

/// Replacement values for every mutable field of a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageUpdate {
    pub content: Vec<ContentPart>,
    pub component_state: Value,
    pub component: Option<ComponentDecision>,
    pub tool_call_request: Option<ToolCallRequest>,
    pub tool_call_id: Option<String>,
    pub action_type: Option<ActionType>,
    pub reasoning: Option<String>,
    pub reasoning_duration_ms: Option<u64>,
    pub in_progress: bool,
    pub error: Option<String>,
}

impl From<&ThreadMessage> for MessageUpdate {
    fn from(message: &ThreadMessage) -> Self {
        Self {
            content: message.content.clone(),
            component_state: message.component_state.clone(),
            component: message.component.clone(),
            tool_call_request: message.tool_call_request.clone(),
            tool_call_id: message.tool_call_id.clone(),
            action_type: message.action_type,
            reasoning: message.reasoning.clone(),
            reasoning_duration_ms: message.reasoning_duration_ms,
            in_progress: message.in_progress,
            error: message.error.clone(),
        }
    }
}
