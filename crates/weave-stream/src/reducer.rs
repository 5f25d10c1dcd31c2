use futures::{Stream, StreamExt};
use std::pin::Pin;
use weave_types::{Decision, StagedDecision, ToolCallInfo};

pub type StagedDecisionStream = Pin<Box<dyn Stream<Item = StagedDecision> + Send>>;

/// Pull-based reducer that scopes tool-call info to "in progress" vs "finalized"
///
/// Chunks sharing an `id` form one logical message. Every raw chunk produces one staged chunk
/// whose public tool-call fields are cleared; the tool call travels in the staged slot instead.
/// When the `id` changes, or the input ends, one extra finalization chunk is produced for the
/// logical message that just closed, carrying its latest tool call on the public fields.
///
/// For M raw chunks spread over N logical messages the output holds M + N chunks.
#[derive(Debug, Default)]
pub struct DecisionReducer {
    current_id: Option<String>,
    template: Option<Decision>,
    pending_tool_call: Option<ToolCallInfo>,
}

impl DecisionReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw chunk, returning what to emit in order
    ///
    /// At most two chunks come back: the finalization of the previous logical message (on an
    /// `id` boundary) followed by the staged version of `chunk`.
    pub fn push(&mut self, chunk: Decision) -> Vec<StagedDecision> {
        let mut emitted = Vec::with_capacity(2);

        let boundary = self
            .current_id
            .as_deref()
            .is_some_and(|current| current != chunk.id);
        if boundary {
            tracing::debug!(
                from = ?self.current_id,
                to = %chunk.id,
                "Logical message boundary, finalizing previous message"
            );
            emitted.extend(self.finalize());
        }

        self.current_id = Some(chunk.id.clone());

        // Latest wins: argument strings grow progressively, so never merge
        if let Some(tool_call) = chunk.tool_call() {
            self.pending_tool_call = Some(tool_call);
        }

        let mut visible = chunk;
        visible.set_tool_call(None);
        visible.is_tool_call_finished = Some(false);

        self.template = Some(visible.clone());
        emitted.push(StagedDecision {
            visible,
            staged: self.pending_tool_call.clone(),
        });

        emitted
    }

    /// Close the input, emitting the last logical message's finalization chunk if there was one
    pub fn finish(&mut self) -> Option<StagedDecision> {
        self.current_id.take()?;
        self.finalize()
    }

    fn finalize(&mut self) -> Option<StagedDecision> {
        let mut visible = self.template.take()?;
        visible.set_tool_call(self.pending_tool_call.take());
        visible.is_tool_call_finished = Some(true);

        Some(StagedDecision {
            visible,
            staged: None,
        })
    }
}

/// Run a decision stream through a [`DecisionReducer`]
///
/// Suspends only when `source` does. An empty source yields an empty stream.
pub fn reduce_decisions<S>(source: S) -> StagedDecisionStream
where
    S: Stream<Item = Decision> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut source = Box::pin(source);
        let mut reducer = DecisionReducer::new();

        while let Some(chunk) = source.next().await {
            for staged in reducer.push(chunk) {
                yield staged;
            }
        }

        if let Some(last) = reducer.finish() {
            yield last;
        }
    })
}

/// Fallible variant of [`reduce_decisions`]
///
/// An upstream error is forwarded as-is and ends the output; the interrupted logical message
/// gets no finalization chunk.
pub fn try_reduce_decisions<S, E>(
    source: S,
) -> Pin<Box<dyn Stream<Item = Result<StagedDecision, E>> + Send>>
where
    S: Stream<Item = Result<Decision, E>> + Send + 'static,
    E: Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut source = Box::pin(source);
        let mut reducer = DecisionReducer::new();
        let mut failed = false;

        while let Some(item) = source.next().await {
            match item {
                Ok(chunk) => {
                    for staged in reducer.push(chunk) {
                        yield Ok(staged);
                    }
                }
                Err(e) => {
                    failed = true;
                    yield Err(e);
                    break;
                }
            }
        }

        if !failed {
            if let Some(last) = reducer.finish() {
                yield Ok(last);
            }
        }
    })
}
