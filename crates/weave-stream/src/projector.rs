use weave_types::{
    ComponentDecision, ContentPart, StagedDecision, ThreadMessage, ToolCallInfo, ToolCallRequest,
};

/// Decides whether an in-flight tool call may be shown on a message's outer fields before the
/// logical message is finalized
pub trait RevealPolicy: Send + Sync {
    fn reveals(&self, request: &ToolCallRequest) -> bool;
}

/// Outer tool-call fields only ever come from finalization chunks
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverReveal;

impl RevealPolicy for NeverReveal {
    fn reveals(&self, _request: &ToolCallRequest) -> bool {
        false
    }
}

/// Reveal tool calls early when the tool name starts with one of the given prefixes
///
/// Meant for UI tools whose arguments are rendered progressively.
#[derive(Debug, Clone, Default)]
pub struct ToolNamePrefix {
    prefixes: Vec<String>,
}

impl ToolNamePrefix {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }
}

impl RevealPolicy for ToolNamePrefix {
    fn reveals(&self, request: &ToolCallRequest) -> bool {
        self.prefixes
            .iter()
            .any(|prefix| request.tool_name.starts_with(prefix.as_str()))
    }
}

/// Project one reduced chunk onto the previous view of a message
pub fn project(previous: &ThreadMessage, chunk: &StagedDecision) -> ThreadMessage {
    project_with(previous, chunk, &NeverReveal)
}

/// [`project`] with an explicit early-reveal policy
///
/// Content is replaced by the chunk's text snapshot. The nested `component` always reflects the
/// chunk, including a staged tool call. The outer tool-call fields are set from the chunk's own
/// public fields, or from its staged slot when `policy` reveals that tool; otherwise they are
/// left as they were.
pub fn project_with(
    previous: &ThreadMessage,
    chunk: &StagedDecision,
    policy: &dyn RevealPolicy,
) -> ThreadMessage {
    let decision = &chunk.visible;
    let mut next = previous.clone();

    next.content = vec![ContentPart::text(decision.message.clone())];
    next.component_state = decision.component_state.clone();
    next.reasoning = decision.reasoning.clone();
    next.reasoning_duration_ms = decision.reasoning_duration_ms;
    next.in_progress = !chunk.is_finalization();

    let resolved = chunk.resolved_tool_call();
    next.component = Some(ComponentDecision {
        component_name: decision.component_name.clone(),
        props: decision.props.clone(),
        message: decision.message.clone(),
        component_state: decision.component_state.clone(),
        tool_call_request: resolved.as_ref().map(|info| info.request.clone()),
        tool_call_id: resolved.and_then(|info| info.id),
    });

    if let Some(outer) = decision.tool_call().or_else(|| early_reveal(chunk, policy)) {
        next.set_tool_call(Some(outer));
    }

    next
}

fn early_reveal(chunk: &StagedDecision, policy: &dyn RevealPolicy) -> Option<ToolCallInfo> {
    if chunk.is_finalization() {
        return None;
    }
    chunk
        .staged
        .clone()
        .filter(|info| policy.reveals(&info.request))
}
