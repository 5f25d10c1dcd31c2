use std::sync::Arc;

use weave_types::stage::{self, StageEvent, StageTransition};
use weave_types::{
    Decision, GenerationStage, MessageRole, MessageUpdate, NewMessage, Thread, ThreadMessage,
};

use crate::consistency::{verify_in_progress_reply, verify_latest_message_consistency};
use crate::error::{PersistError, Result};
use crate::trait_client::{IsolationLevel, PersistenceClient, ThreadStageUpdate, ThreadTransaction};

/// Outcome of finalizing a response message
#[derive(Debug, Clone, PartialEq)]
pub struct FinishResult {
    pub message: ThreadMessage,
    pub resulting_generation_stage: GenerationStage,
    pub resulting_status_message: String,
}

/// Transactional thread mutations
///
/// Every operation runs in one read-committed transaction. Stage changes go through
/// [`update_generation_stage`] only. On failure the transaction is rolled back, the error is
/// logged and returned unchanged.
#[derive(Clone)]
pub struct ThreadMutationCoordinator {
    client: Arc<dyn PersistenceClient>,
}

impl ThreadMutationCoordinator {
    pub fn new(client: Arc<dyn PersistenceClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<dyn PersistenceClient> {
        &self.client
    }

    /// Start a user turn: guard on the busy set, move to `FETCHING_CONTEXT` and append `message`
    pub async fn add_user_message(
        &self,
        thread_id: &str,
        message: NewMessage,
    ) -> Result<ThreadMessage> {
        let mut tx = self.begin("add_user_message", thread_id).await?;
        let result = async {
            update_generation_stage(tx.as_mut(), thread_id, StageEvent::UserTurnStarted).await?;
            tx.add_message(thread_id, message).await
        }
        .await;
        complete("add_user_message", thread_id, tx, result).await
    }

    /// Persist a finalized assistant response that follows `expected_latest_message_id`
    pub async fn add_assistant_response(
        &self,
        thread_id: &str,
        expected_latest_message_id: &str,
        decision: &Decision,
    ) -> Result<FinishResult> {
        let mut tx = self.begin("add_assistant_response", thread_id).await?;
        let result = async {
            require_thread(tx.as_mut(), thread_id).await?;
            verify_latest_message_consistency(
                tx.as_mut(),
                thread_id,
                expected_latest_message_id,
                false,
            )
            .await?;

            let response =
                NewMessage::from_decision(decision).with_parent(expected_latest_message_id);
            let message = tx.add_message(thread_id, response).await?;
            finalize(tx.as_mut(), thread_id, message).await
        }
        .await;
        complete("add_assistant_response", thread_id, tx, result).await
    }

    /// Replace the in-progress placeholder with its final content and move the stage on
    pub async fn finish_in_progress_message(
        &self,
        thread_id: &str,
        expected_latest_message_id: &str,
        in_progress_message_id: &str,
        final_message: MessageUpdate,
    ) -> Result<FinishResult> {
        let mut tx = self.begin("finish_in_progress_message", thread_id).await?;
        let result = async {
            require_thread(tx.as_mut(), thread_id).await?;
            verify_in_progress_reply(
                tx.as_mut(),
                thread_id,
                expected_latest_message_id,
                in_progress_message_id,
            )
            .await?;

            let mut update = final_message;
            update.in_progress = false;
            let message = tx
                .update_message(thread_id, in_progress_message_id, update)
                .await?;
            finalize(tx.as_mut(), thread_id, message).await
        }
        .await;
        complete("finish_in_progress_message", thread_id, tx, result).await
    }

    /// Append an empty in-progress message after `expected_latest_message_id`
    ///
    /// The stage is left untouched.
    pub async fn append_new_message_to_thread(
        &self,
        thread_id: &str,
        expected_latest_message_id: &str,
        role: MessageRole,
        initial_text: &str,
    ) -> Result<ThreadMessage> {
        let mut tx = self.begin("append_new_message_to_thread", thread_id).await?;
        let result = async {
            require_thread(tx.as_mut(), thread_id).await?;
            verify_latest_message_consistency(
                tx.as_mut(),
                thread_id,
                expected_latest_message_id,
                false,
            )
            .await?;

            let placeholder =
                NewMessage::placeholder(role, initial_text).with_parent(expected_latest_message_id);
            tx.add_message(thread_id, placeholder).await
        }
        .await;
        complete("append_new_message_to_thread", thread_id, tx, result).await
    }

    /// Mark the model as working on `latest_message_id`
    ///
    /// A tool response moves the thread to `HYDRATING_COMPONENT`, named after the component of
    /// the assistant message that issued the call. Anything else moves it to
    /// `CHOOSING_COMPONENT`.
    ///
    /// There is no busy guard here: two turns started on the same thread both run their backend,
    /// and the later one fails when it persists its response against a stale latest message.
    pub async fn begin_model_work(
        &self,
        thread_id: &str,
        latest_message_id: &str,
    ) -> Result<StageTransition> {
        let mut tx = self.begin("begin_model_work", thread_id).await?;
        let result = async {
            require_thread(tx.as_mut(), thread_id).await?;
            let latest =
                verify_latest_message_consistency(tx.as_mut(), thread_id, latest_message_id, false)
                    .await?;

            let component_name = if latest.role == MessageRole::Tool {
                let messages = tx.find_messages(thread_id).await?;
                calling_component(&messages, &latest)
            } else {
                None
            };

            let event = StageEvent::ModelWorkStarted {
                latest_role: latest.role,
                component_name,
            };
            let (_, transition) = update_generation_stage(tx.as_mut(), thread_id, event).await?;
            Ok::<_, PersistError>(transition)
        }
        .await;
        complete("begin_model_work", thread_id, tx, result).await
    }

    pub async fn begin_streaming(&self, thread_id: &str) -> Result<StageTransition> {
        let mut tx = self.begin("begin_streaming", thread_id).await?;
        let result = async {
            let (_, transition) =
                update_generation_stage(tx.as_mut(), thread_id, StageEvent::StreamingStarted)
                    .await?;
            Ok::<_, PersistError>(transition)
        }
        .await;
        complete("begin_streaming", thread_id, tx, result).await
    }

    /// Write progressive content into the in-progress placeholder
    pub async fn update_in_progress_message(
        &self,
        thread_id: &str,
        message_id: &str,
        update: MessageUpdate,
    ) -> Result<ThreadMessage> {
        let mut tx = self.begin("update_in_progress_message", thread_id).await?;
        let result = async {
            require_thread(tx.as_mut(), thread_id).await?;
            verify_latest_message_consistency(tx.as_mut(), thread_id, message_id, true).await?;
            let mut update = update;
            update.in_progress = true;
            tx.update_message(thread_id, message_id, update).await
        }
        .await;
        complete("update_in_progress_message", thread_id, tx, result).await
    }

    /// Move the thread to `ERROR`, closing any in-progress message with `reason`
    pub async fn fail_generation(&self, thread_id: &str, reason: &str) -> Result<StageTransition> {
        let mut tx = self.begin("fail_generation", thread_id).await?;
        let result = async {
            close_in_progress(tx.as_mut(), thread_id, Some(reason)).await?;
            let event = StageEvent::Failed {
                reason: reason.to_string(),
            };
            let (_, transition) = update_generation_stage(tx.as_mut(), thread_id, event).await?;
            Ok::<_, PersistError>(transition)
        }
        .await;
        complete("fail_generation", thread_id, tx, result).await
    }

    /// Move the thread to `CANCELLED`, closing any in-progress message
    pub async fn cancel_generation(&self, thread_id: &str) -> Result<StageTransition> {
        let mut tx = self.begin("cancel_generation", thread_id).await?;
        let result = async {
            close_in_progress(tx.as_mut(), thread_id, None).await?;
            let (_, transition) =
                update_generation_stage(tx.as_mut(), thread_id, StageEvent::Cancelled).await?;
            Ok::<_, PersistError>(transition)
        }
        .await;
        complete("cancel_generation", thread_id, tx, result).await
    }

    async fn begin(
        &self,
        operation: &'static str,
        thread_id: &str,
    ) -> Result<Box<dyn ThreadTransaction>> {
        self.client
            .begin(IsolationLevel::ReadCommitted)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    operation,
                    thread_id = %thread_id,
                    error = %e,
                    "Failed to open transaction"
                )
            })
    }
}

/// The single write path for `generation_stage` and `status_message`
pub async fn update_generation_stage(
    tx: &mut dyn ThreadTransaction,
    thread_id: &str,
    event: StageEvent,
) -> Result<(Thread, StageTransition)> {
    let thread = require_thread(tx, thread_id).await?;
    let transition = stage::transition(thread.generation_stage, &event)
        .map_err(|e| PersistError::busy(thread_id, e))?;

    let updated = tx
        .update_thread(
            thread_id,
            ThreadStageUpdate {
                generation_stage: transition.stage,
                status_message: Some(transition.status_message.clone()),
            },
        )
        .await?;

    tracing::info!(
        thread_id = %thread_id,
        from = %thread.generation_stage,
        to = %transition.stage,
        status = %transition.status_message,
        "Generation stage changed"
    );

    Ok((updated, transition))
}

async fn require_thread(tx: &mut dyn ThreadTransaction, thread_id: &str) -> Result<Thread> {
    tx.find_thread(thread_id)
        .await?
        .ok_or_else(|| PersistError::ThreadNotFound(thread_id.to_string()))
}

async fn finalize(
    tx: &mut dyn ThreadTransaction,
    thread_id: &str,
    message: ThreadMessage,
) -> Result<FinishResult> {
    let event = StageEvent::ResponseFinalized {
        has_tool_call: message.has_tool_call(),
    };
    let (_, transition) = update_generation_stage(tx, thread_id, event).await?;
    Ok(FinishResult {
        message,
        resulting_generation_stage: transition.stage,
        resulting_status_message: transition.status_message,
    })
}

async fn close_in_progress(
    tx: &mut dyn ThreadTransaction,
    thread_id: &str,
    error: Option<&str>,
) -> Result<()> {
    require_thread(tx, thread_id).await?;
    let messages = tx.find_messages(thread_id).await?;
    let Some(latest) = messages.last().filter(|m| m.in_progress) else {
        return Ok(());
    };

    let mut update = MessageUpdate::from(latest);
    update.in_progress = false;
    update.error = error.map(str::to_string);
    tx.update_message(thread_id, &latest.id, update).await?;
    Ok(())
}

/// Component of the assistant message whose tool call `tool_response` answers
fn calling_component(messages: &[ThreadMessage], tool_response: &ThreadMessage) -> Option<String> {
    messages
        .iter()
        .rev()
        .filter(|m| m.role == MessageRole::Assistant && m.has_tool_call())
        .find(|m| match &tool_response.tool_call_id {
            Some(id) => m.tool_call_id.as_deref() == Some(id.as_str()),
            None => true,
        })
        .and_then(|m| m.component.as_ref())
        .and_then(|c| c.component_name.clone())
}

/// Commit on success; on failure log, roll back and hand the error back unchanged
async fn complete<T>(
    operation: &'static str,
    thread_id: &str,
    tx: Box<dyn ThreadTransaction>,
    result: Result<T>,
) -> Result<T> {
    match result {
        Ok(value) => match tx.commit().await {
            Ok(()) => Ok(value),
            Err(e) => {
                tracing::error!(
                    operation,
                    thread_id = %thread_id,
                    error = %e,
                    details = ?e,
                    "Transaction commit failed"
                );
                Err(e)
            }
        },
        Err(e) => {
            tracing::error!(
                operation,
                thread_id = %thread_id,
                error = %e,
                details = ?e,
                "Thread mutation failed, rolling back"
            );
            if let Err(rollback_error) = tx.rollback().await {
                tracing::warn!(
                    operation,
                    thread_id = %thread_id,
                    error = %rollback_error,
                    "Rollback failed"
                );
            }
            Err(e)
        }
    }
}
