use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool/Function definition offered to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tool_type: String, // Always "function" for now
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema for parameters
    pub parameters: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

impl Tool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: Some(description.into()),
                parameters,
                strict: None,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    pub fn is_strict(&self) -> bool {
        self.function.strict.unwrap_or(false)
    }
}

/// Read-only context a registry can offer alongside tools
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// UI component the client can render, offered to the model as a choice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableComponent {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub props_schema: Value,
    /// Tools the component's own context needs
    #[serde(default)]
    pub context_tools: Vec<Tool>,
}
