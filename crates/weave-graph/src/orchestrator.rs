use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use weave_persist::{FinishResult, PersistError, ThreadMutationCoordinator};
use weave_stream::{project_with, try_reduce_decisions, NeverReveal, RevealPolicy};
use weave_types::{Decision, MessageRole, MessageUpdate, ThreadMessage, Tool};

use crate::backend::{DecisionBackend, DecisionStream, ToolRegistry, TurnContext, TurnInput};
use crate::error::{ProcessError, Result};
use crate::strict::{strictify_tool, unstrictify_tool_call};

/// Stream of message views produced while a turn streams in
pub type ThreadMessageStream = Pin<Box<dyn Stream<Item = Result<ThreadMessage>> + Send>>;

/// Drives one turn of a thread end-to-end
#[derive(Clone)]
pub struct Orchestrator {
    backend: Arc<dyn DecisionBackend>,
    registry: Arc<dyn ToolRegistry>,
    coordinator: ThreadMutationCoordinator,
    reveal_policy: Arc<dyn RevealPolicy>,
}

struct PreparedTurn {
    latest: ThreadMessage,
    context: TurnContext,
    offered_tools: Vec<Tool>,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn DecisionBackend>,
        registry: Arc<dyn ToolRegistry>,
        coordinator: ThreadMutationCoordinator,
    ) -> Self {
        Self {
            backend,
            registry,
            coordinator,
            reveal_policy: Arc::new(NeverReveal),
        }
    }

    pub fn with_reveal_policy(mut self, policy: Arc<dyn RevealPolicy>) -> Self {
        self.reveal_policy = policy;
        self
    }

    pub fn coordinator(&self) -> &ThreadMutationCoordinator {
        &self.coordinator
    }

    /// Run a turn to completion and persist the final response
    pub async fn process_thread_message(&self, input: TurnInput) -> Result<FinishResult> {
        let thread_id = input.thread_id.clone();
        tracing::info!(thread_id = %thread_id, "Processing turn");

        let turn = self.prepare_turn(&input).await?;

        let decision = match self.run_backend(turn.context).await {
            Ok(stream) => get_final_decision(stream, &turn.offered_tools).await,
            Err(e) => Err(e),
        };
        let decision = match decision {
            Ok(decision) => decision,
            Err(e) => {
                self.fail_quietly(&thread_id, &e).await;
                return Err(e);
            }
        };

        let result = self
            .coordinator
            .add_assistant_response(&thread_id, &turn.latest.id, &decision)
            .await?;

        tracing::info!(
            thread_id = %thread_id,
            message_id = %result.message.id,
            stage = %result.resulting_generation_stage,
            "Turn finished"
        );
        Ok(result)
    }

    /// Run a turn, persisting and yielding every intermediate view of the response
    ///
    /// Each logical message gets its own in-progress placeholder that is hydrated chunk by chunk
    /// and finalized once the message closes. A backend failure moves the thread to `ERROR` and
    /// ends the stream with the error.
    pub fn stream_thread_message(&self, input: TurnInput) -> ThreadMessageStream {
        let this = self.clone();

        Box::pin(async_stream::stream! {
            let thread_id = input.thread_id.clone();
            tracing::info!(thread_id = %thread_id, "Streaming turn");

            let turn = match this.prepare_turn(&input).await {
                Ok(turn) => turn,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let raw = match this.run_backend(turn.context).await {
                Ok(raw) => raw,
                Err(e) => {
                    this.fail_quietly(&thread_id, &e).await;
                    yield Err(e);
                    return;
                }
            };

            let mut chunks = try_reduce_decisions(raw);
            let mut parent_id = turn.latest.id.clone();
            let mut in_progress: Option<ThreadMessage> = None;
            let mut finalized = 0usize;

            while let Some(item) = chunks.next().await {
                let chunk = match item {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let e = ProcessError::Backend(e);
                        this.fail_quietly(&thread_id, &e).await;
                        yield Err(e);
                        return;
                    }
                };

                let current = match in_progress.take() {
                    Some(message) => message,
                    None => match this.open_placeholder(&thread_id, &parent_id).await {
                        Ok(message) => message,
                        Err(e) => {
                            yield Err(this.abandon_stream(&thread_id, e).await);
                            return;
                        }
                    },
                };

                let mut view = project_with(&current, &chunk, this.reveal_policy.as_ref());

                if !chunk.is_finalization() {
                    tracing::debug!(
                        thread_id = %thread_id,
                        message_id = %view.id,
                        "Hydrating in-progress message"
                    );
                    match this
                        .coordinator
                        .update_in_progress_message(&thread_id, &view.id, MessageUpdate::from(&view))
                        .await
                    {
                        Ok(stored) => {
                            in_progress = Some(stored.clone());
                            yield Ok(stored);
                        }
                        Err(e) => {
                            yield Err(this.abandon_stream(&thread_id, e).await);
                            return;
                        }
                    }
                    continue;
                }

                if let Err(e) = restore_tool_call(&mut view, &turn.offered_tools) {
                    this.fail_quietly(&thread_id, &e).await;
                    yield Err(e);
                    return;
                }

                match this
                    .coordinator
                    .finish_in_progress_message(
                        &thread_id,
                        &parent_id,
                        &view.id,
                        MessageUpdate::from(&view),
                    )
                    .await
                {
                    Ok(result) => {
                        tracing::info!(
                            thread_id = %thread_id,
                            message_id = %result.message.id,
                            stage = %result.resulting_generation_stage,
                            "Finalized streamed message"
                        );
                        finalized += 1;
                        parent_id = result.message.id.clone();
                        yield Ok(result.message);
                    }
                    Err(e) => {
                        yield Err(this.abandon_stream(&thread_id, e).await);
                        return;
                    }
                }
            }

            if finalized == 0 {
                let e = ProcessError::StreamEmpty;
                this.fail_quietly(&thread_id, &e).await;
                yield Err(e);
            }
        })
    }

    async fn prepare_turn(&self, input: &TurnInput) -> Result<PreparedTurn> {
        let client = self.coordinator.client();
        let mut thread = client
            .get_thread(&input.thread_id)
            .await?
            .ok_or_else(|| PersistError::ThreadNotFound(input.thread_id.clone()))?;
        let messages = client.get_messages(&thread.id).await?;
        let latest = messages
            .last()
            .cloned()
            .ok_or_else(|| ProcessError::EmptyThread(thread.id.clone()))?;

        let offered_tools = self.offered_tools(input).await?;
        let resources = self
            .registry
            .list_resources()
            .await
            .map_err(ProcessError::Registry)?;

        let transition = self
            .coordinator
            .begin_model_work(&thread.id, &latest.id)
            .await?;
        thread.generation_stage = transition.stage;
        thread.status_message = Some(transition.status_message);

        tracing::debug!(
            thread_id = %thread.id,
            tools = offered_tools.len(),
            resources = resources.len(),
            "Prepared turn context"
        );

        let context = TurnContext {
            thread,
            messages,
            tools: offered_tools.iter().map(strictify_tool).collect(),
            resources,
            available_components: input.available_components.clone(),
            custom_instructions: input.custom_instructions.clone(),
        };

        Ok(PreparedTurn {
            latest,
            context,
            offered_tools,
        })
    }

    /// Registry tools, then client tools, then component context tools; first name wins
    async fn offered_tools(&self, input: &TurnInput) -> Result<Vec<Tool>> {
        let registry_tools = self
            .registry
            .list_tools()
            .await
            .map_err(ProcessError::Registry)?;

        let component_tools = input
            .available_components
            .iter()
            .flat_map(|component| component.context_tools.iter().cloned());

        let mut tools: Vec<Tool> = Vec::new();
        for tool in registry_tools
            .into_iter()
            .chain(input.client_tools.iter().cloned())
            .chain(component_tools)
        {
            if tools.iter().any(|t| t.name() == tool.name()) {
                tracing::warn!(tool = %tool.name(), "Duplicate tool name, keeping the first one");
                continue;
            }
            tools.push(tool);
        }
        Ok(tools)
    }

    async fn run_backend(&self, context: TurnContext) -> Result<DecisionStream> {
        self.backend
            .run_decision_loop(context)
            .await
            .map_err(ProcessError::Backend)
    }

    async fn open_placeholder(
        &self,
        thread_id: &str,
        parent_id: &str,
    ) -> weave_persist::Result<ThreadMessage> {
        let placeholder = self
            .coordinator
            .append_new_message_to_thread(thread_id, parent_id, MessageRole::Assistant, "")
            .await?;
        self.coordinator.begin_streaming(thread_id).await?;
        Ok(placeholder)
    }

    /// Turn a persistence failure during streaming into the stream's error
    ///
    /// The thread is moved to `ERROR` unless the write lost to a concurrent commit that already
    /// took the thread out of the busy stages, e.g. a cancel.
    async fn abandon_stream(&self, thread_id: &str, error: PersistError) -> ProcessError {
        let superseded = error.is_consistency_violation() && !self.is_generating(thread_id).await;
        let error = ProcessError::from(error);
        if superseded {
            tracing::info!(
                thread_id = %thread_id,
                error = %error,
                "Thread left the streaming stages, stopping without failing it"
            );
        } else {
            self.fail_quietly(thread_id, &error).await;
        }
        error
    }

    async fn is_generating(&self, thread_id: &str) -> bool {
        match self.coordinator.client().get_thread(thread_id).await {
            Ok(thread) => thread.is_some_and(|thread| thread.is_busy()),
            Err(_) => true,
        }
    }

    async fn fail_quietly(&self, thread_id: &str, error: &ProcessError) {
        if let Err(e) = self
            .coordinator
            .fail_generation(thread_id, &error.to_string())
            .await
        {
            tracing::warn!(
                thread_id = %thread_id,
                error = %e,
                "Could not mark generation as failed"
            );
        }
    }
}

/// Drain `stream` and return its last raw decision
///
/// Earlier chunks are discarded, including any tool call they carried. A tool call on the last
/// chunk is checked against `original_tools` and its arguments are returned in the tool's
/// original, non-strict shape.
pub async fn get_final_decision(
    mut stream: DecisionStream,
    original_tools: &[Tool],
) -> Result<Decision> {
    let mut last = None;
    while let Some(chunk) = stream.next().await {
        last = Some(chunk.map_err(ProcessError::Backend)?);
    }

    let mut decision = last.ok_or(ProcessError::StreamEmpty)?;

    if let Some(request) = decision.tool_call_request.take() {
        let tool = find_tool(original_tools, &request.tool_name)?;
        decision.tool_call_request = Some(unstrictify_tool_call(tool, &request));
    }

    Ok(decision)
}

fn find_tool<'a>(tools: &'a [Tool], name: &str) -> Result<&'a Tool> {
    tools
        .iter()
        .find(|tool| tool.name() == name)
        .ok_or_else(|| ProcessError::ToolNotFound(name.to_string()))
}

fn restore_tool_call(view: &mut ThreadMessage, original_tools: &[Tool]) -> Result<()> {
    let Some(request) = view.tool_call_request.as_ref() else {
        return Ok(());
    };
    let tool = find_tool(original_tools, &request.tool_name)?;
    let restored = unstrictify_tool_call(tool, request);

    if let Some(component) = view.component.as_mut() {
        component.tool_call_request = Some(restored.clone());
    }
    view.tool_call_request = Some(restored);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::json;
    use weave_types::ToolCallRequest;

    fn decisions(items: Vec<Decision>) -> DecisionStream {
        Box::pin(stream::iter(items.into_iter().map(Ok)))
    }

    #[tokio::test]
    async fn test_final_decision_of_empty_stream() {
        let err = get_final_decision(decisions(vec![]), &[]).await.unwrap_err();
        assert!(matches!(err, ProcessError::StreamEmpty));
    }

    #[tokio::test]
    async fn test_final_decision_restores_tool_call_on_last_chunk() {
        let tool = Tool::new(
            "lookup",
            "Lookup",
            json!({"type": "object", "properties": {"q": {"type": "string"}}}),
        );
        let stream = decisions(vec![
            Decision::new("a", "Looking"),
            Decision::new("a", "Looking it up").with_tool_call(
                ToolCallRequest::new("lookup").with_parameter("q", serde_json::Value::Null),
                "tc-1",
            ),
        ]);

        let decision = get_final_decision(stream, &[tool]).await.unwrap();

        assert_eq!(decision.message, "Looking it up");
        assert_eq!(decision.tool_call_id.as_deref(), Some("tc-1"));
        assert!(decision.tool_call_request.unwrap().parameters.is_empty());
    }

    #[tokio::test]
    async fn test_final_decision_ignores_tool_call_on_earlier_chunk() {
        let stream = decisions(vec![
            Decision::new("a", "calling").with_tool_call(ToolCallRequest::new("lookup"), "tc-1"),
            Decision::new("a", "done, no call"),
        ]);

        let decision = get_final_decision(stream, &[]).await.unwrap();

        assert_eq!(decision.message, "done, no call");
        assert!(decision.tool_call_request.is_none());
        assert!(decision.tool_call_id.is_none());
        assert_eq!(decision.is_tool_call_finished, None);
    }

    #[tokio::test]
    async fn test_final_decision_unknown_tool() {
        let stream = decisions(vec![
            Decision::new("a", "").with_tool_call(ToolCallRequest::new("ghost"), "tc-1")
        ]);

        let err = get_final_decision(stream, &[]).await.unwrap_err();
        assert!(matches!(err, ProcessError::ToolNotFound(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn test_final_decision_forwards_backend_error() {
        let stream: DecisionStream = Box::pin(stream::iter(vec![
            Ok(Decision::new("a", "partial")),
            Err(anyhow::anyhow!("connection reset")),
        ]));

        let err = get_final_decision(stream, &[]).await.unwrap_err();
        assert!(matches!(err, ProcessError::Backend(_)));
    }
}
