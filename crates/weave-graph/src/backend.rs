use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::{stream, Stream};
use weave_types::{AvailableComponent, Decision, ResourceDescriptor, Thread, ThreadMessage, Tool};

/// Raw decision chunks as produced by a model backend
pub type DecisionStream = Pin<Box<dyn Stream<Item = Result<Decision>> + Send>>;

/// Trait for model backends that turn a thread into a stream of decisions
///
/// Chunks sharing an `id` describe one logical message, each carrying the full text so far.
#[async_trait]
pub trait DecisionBackend: Send + Sync {
    async fn run_decision_loop(&self, context: TurnContext) -> Result<DecisionStream>;
}

/// Source of the tools and resources offered to the model on every turn
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<Tool>>;

    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>>;
}

/// Registry with nothing to offer
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyRegistry;

#[async_trait]
impl ToolRegistry for EmptyRegistry {
    async fn list_tools(&self) -> Result<Vec<Tool>> {
        Ok(Vec::new())
    }

    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>> {
        Ok(Vec::new())
    }
}

/// Fixed tools and resources
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    tools: Vec<Tool>,
    resources: Vec<ResourceDescriptor>,
}

impl StaticRegistry {
    pub fn new(tools: Vec<Tool>) -> Self {
        Self {
            tools,
            resources: Vec::new(),
        }
    }

    pub fn with_resource(mut self, resource: ResourceDescriptor) -> Self {
        self.resources.push(resource);
        self
    }
}

#[async_trait]
impl ToolRegistry for StaticRegistry {
    async fn list_tools(&self) -> Result<Vec<Tool>> {
        Ok(self.tools.clone())
    }

    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>> {
        Ok(self.resources.clone())
    }
}

/// What a client asks for when it requests a turn
#[derive(Debug, Clone, Default)]
pub struct TurnInput {
    pub thread_id: String,
    pub available_components: Vec<AvailableComponent>,
    /// Tools the client executes itself
    pub client_tools: Vec<Tool>,
    pub custom_instructions: Option<String>,
}

impl TurnInput {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            ..Self::default()
        }
    }

    pub fn with_component(mut self, component: AvailableComponent) -> Self {
        self.available_components.push(component);
        self
    }

    pub fn with_client_tool(mut self, tool: Tool) -> Self {
        self.client_tools.push(tool);
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.custom_instructions = Some(instructions.into());
        self
    }
}

/// Everything a backend gets to produce decisions for one turn
///
/// `tools` are already in strict form.
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub thread: Thread,
    pub messages: Vec<ThreadMessage>,
    pub tools: Vec<Tool>,
    pub resources: Vec<ResourceDescriptor>,
    pub available_components: Vec<AvailableComponent>,
    pub custom_instructions: Option<String>,
}

/// One step of a [`ScriptedBackend`] run
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Emit(Decision),
    Fail(String),
}

/// Backend that replays prepared decision scripts, one script per turn
///
/// Useful for demos and tests; records every context it was given.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<Vec<ScriptStep>>>,
    contexts: Mutex<Vec<TurnContext>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a turn that emits `decisions` in order
    pub fn with_turn(self, decisions: Vec<Decision>) -> Self {
        self.with_script(decisions.into_iter().map(ScriptStep::Emit).collect())
    }

    pub fn with_script(self, steps: Vec<ScriptStep>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push_back(steps);
        }
        self
    }

    /// Contexts received so far, oldest first
    pub fn seen_contexts(&self) -> Vec<TurnContext> {
        self.contexts
            .lock()
            .map(|contexts| contexts.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DecisionBackend for ScriptedBackend {
    async fn run_decision_loop(&self, context: TurnContext) -> Result<DecisionStream> {
        let steps = self
            .scripts
            .lock()
            .map_err(|_| anyhow!("script queue poisoned"))?
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted turn left for thread {}", context.thread.id))?;

        tracing::debug!(
            thread_id = %context.thread.id,
            steps = steps.len(),
            "Replaying scripted turn"
        );

        if let Ok(mut contexts) = self.contexts.lock() {
            contexts.push(context);
        }

        let items = steps.into_iter().map(|step| match step {
            ScriptStep::Emit(decision) => Ok(decision),
            ScriptStep::Fail(reason) => Err(anyhow!(reason)),
        });
        Ok(Box::pin(stream::iter(items)))
    }
}
