use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use weave_types::{
    ActionType, ComponentDecision, ContentPart, GenerationStage, MessageRole, Thread,
    ThreadMessage, ToolCallRequest,
};

/// MongoDB-specific Thread model
///
/// `version` is the optimistic concurrency counter every transactional write increments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoThread {
    #[serde(rename = "_id")]
    pub id: String,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    pub generation_stage: GenerationStage,
    #[serde(default)]
    pub status_message: Option<String>,
    pub version: i64,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

/// MongoDB-specific Message model
///
/// `position` orders messages inside a thread; timestamps alone can tie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoMessage {
    #[serde(rename = "_id")]
    pub id: String,
    pub thread_id: String,
    pub position: i64,
    pub role: MessageRole,
    pub content: Vec<ContentPart>,
    #[serde(default)]
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
    pub reasoning_duration_ms: Option<i64>,
    #[serde(default)]
    pub in_progress: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl MongoMessage {
    pub fn from_message(message: ThreadMessage, position: i64) -> Self {
        Self {
            id: message.id,
            thread_id: message.thread_id,
            position,
            role: message.role,
            content: message.content,
            component_state: message.component_state,
            component: message.component,
            tool_call_request: message.tool_call_request,
            tool_call_id: message.tool_call_id,
            action_type: message.action_type,
            parent_message_id: message.parent_message_id,
            reasoning: message.reasoning,
            reasoning_duration_ms: message.reasoning_duration_ms.map(|ms| ms as i64),
            in_progress: message.in_progress,
            error: message.error,
            created_at: message.created_at,
        }
    }
}

// Conversions between database-agnostic and MongoDB-specific models

impl From<Thread> for MongoThread {
    fn from(thread: Thread) -> Self {
        Self {
            id: thread.id,
            project_id: thread.project_id,
            context_key: thread.context_key,
            name: thread.name,
            metadata: thread.metadata,
            generation_stage: thread.generation_stage,
            status_message: thread.status_message,
            version: thread.version as i64,
            created_at: thread.created_at,
            updated_at: thread.updated_at,
        }
    }
}

impl From<MongoThread> for Thread {
    fn from(thread: MongoThread) -> Self {
        Self {
            id: thread.id,
            project_id: thread.project_id,
            context_key: thread.context_key,
            name: thread.name,
            metadata: thread.metadata,
            generation_stage: thread.generation_stage,
            status_message: thread.status_message,
            version: thread.version.max(0) as u64,
            created_at: thread.created_at,
            updated_at: thread.updated_at,
        }
    }
}

impl From<MongoMessage> for ThreadMessage {
    fn from(message: MongoMessage) -> Self {
        Self {
            id: message.id,
            thread_id: message.thread_id,
            role: message.role,
            content: message.content,
            component_state: message.component_state,
            component: message.component,
            tool_call_request: message.tool_call_request,
            tool_call_id: message.tool_call_id,
            action_type: message.action_type,
            parent_message_id: message.parent_message_id,
            reasoning: message.reasoning,
            reasoning_duration_ms: message.reasoning_duration_ms.map(|ms| ms.max(0) as u64),
            in_progress: message.in_progress,
            error: message.error,
            created_at: message.created_at,
        }
    }
}
