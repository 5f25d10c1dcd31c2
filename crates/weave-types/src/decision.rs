use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::empty_object;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub parameter_name: String,
    pub parameter_value: Value,
}

/// A tool call as chosen by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub tool_name: String,
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,
}

impl ToolCallRequest {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters.push(ToolParameter {
            parameter_name: name.into(),
            parameter_value: value,
        });
        self
    }

    /// Build a request from a JSON object of arguments
    pub fn from_arguments(tool_name: impl Into<String>, arguments: Value) -> Self {
        let parameters = match arguments {
            Value::Object(map) => map
                .into_iter()
                .map(|(parameter_name, parameter_value)| ToolParameter {
                    parameter_name,
                    parameter_value,
                })
                .collect(),
            _ => Vec::new(),
        };
        Self {
            tool_name: tool_name.into(),
            parameters,
        }
    }

    /// Arguments as a JSON object
    pub fn arguments(&self) -> Value {
        Value::Object(
            self.parameters
                .iter()
                .map(|p| (p.parameter_name.clone(), p.parameter_value.clone()))
                .collect(),
        )
    }

    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters
            .iter()
            .find(|p| p.parameter_name == name)
            .map(|p| &p.parameter_value)
    }
}

/// Tool call request together with the id the model assigned to it
///
/// `id` is absent when the backend assigned none. Messages generate their own in that case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallInfo {
    pub request: ToolCallRequest,
    pub id: Option<String>,
}

/// Streaming unit emitted by a model backend.
///
/// `id` names the logical message the chunk belongs to and `message` is the full current text,
/// not a delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_name: Option<String>,
    #[serde(default = "empty_object")]
    pub props: Value,
    #[serde(default = "empty_object")]
    pub component_state: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_request: Option<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_tool_call_finished: Option<bool>,
}

impl Decision {
    pub fn new(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            message: message.into(),
            component_name: None,
            props: empty_object(),
            component_state: empty_object(),
            reasoning: None,
            reasoning_duration_ms: None,
            tool_call_request: None,
            tool_call_id: None,
            is_tool_call_finished: None,
        }
    }

    pub fn with_component(mut self, name: impl Into<String>, props: Value) -> Self {
        self.component_name = Some(name.into());
        self.props = props;
        self
    }

    pub fn with_tool_call(mut self, request: ToolCallRequest, id: impl Into<String>) -> Self {
        self.tool_call_request = Some(request);
        self.tool_call_id = Some(id.into());
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>, duration_ms: u64) -> Self {
        self.reasoning = Some(reasoning.into());
        self.reasoning_duration_ms = Some(duration_ms);
        self
    }

    /// Tool-call info carried on the public fields, if any
    pub fn tool_call(&self) -> Option<ToolCallInfo> {
        self.tool_call_request.as_ref().map(|request| ToolCallInfo {
            request: request.clone(),
            id: self.tool_call_id.clone(),
        })
    }

    pub fn set_tool_call(&mut self, tool_call: Option<ToolCallInfo>) {
        match tool_call {
            Some(info) => {
                self.tool_call_request = Some(info.request);
                self.tool_call_id = info.id;
            }
            None => {
                self.tool_call_request = None;
                self.tool_call_id = None;
            }
        }
    }
}

/// A decision chunk as emitted by the stream reducer.
///
/// `visible` is what transport-facing consumers may see; `staged` carries an in-flight tool call
/// that has not been finalized yet. The staged slot is never serialized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StagedDecision {
    #[serde(flatten)]
    pub visible: Decision,
    #[serde(skip)]
    pub staged: Option<ToolCallInfo>,
}

impl StagedDecision {
    /// Tool call resolved outer-first, falling back to the staged slot
    pub fn resolved_tool_call(&self) -> Option<ToolCallInfo> {
        self.visible.tool_call().or_else(|| self.staged.clone())
    }

    /// True only for the single chunk that closes a logical message
    pub fn is_finalization(&self) -> bool {
        self.visible.is_tool_call_finished == Some(true)
    }
}

/// Nested view of the decision that produced a message, used for in-progress UI state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDecision {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_name: Option<String>,
    #[serde(default = "empty_object")]
    pub props: Value,
    #[serde(default)]
    pub message: String,
    #[serde(default = "empty_object")]
    pub component_state: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_request: Option<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl From<&Decision> for ComponentDecision {
    fn from(decision: &Decision) -> Self {
        Self {
            component_name: decision.component_name.clone(),
            props: decision.props.clone(),
            message: decision.message.clone(),
            component_state: decision.component_state.clone(),
            tool_call_request: decision.tool_call_request.clone(),
            tool_call_id: decision.tool_call_id.clone(),
        }
    }
}
