use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Barrier;
use weave_persist::{
    IsolationLevel, MemoryStore, PersistError, PersistenceClient, Result, ThreadMutationCoordinator,
    ThreadStageUpdate, ThreadTransaction,
};
use weave_types::stage::{COMPLETE_STATUS, FETCHING_CONTEXT_STATUS};
use weave_types::{
    Decision, GenerationStage, MessageRole, MessageUpdate, NewMessage, NewThread, Thread,
    ThreadMessage, ToolCallRequest,
};

async fn setup() -> (Arc<MemoryStore>, ThreadMutationCoordinator, Thread) {
    let store = Arc::new(MemoryStore::new());
    let coordinator = ThreadMutationCoordinator::new(store.clone());
    let thread = store
        .create_thread(NewThread::new("project-1").with_name("demo"))
        .await
        .unwrap();
    (store, coordinator, thread)
}

async fn force_stage(store: &MemoryStore, thread_id: &str, stage: GenerationStage) {
    let mut tx = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
    tx.update_thread(
        thread_id,
        ThreadStageUpdate {
            generation_stage: stage,
            status_message: None,
        },
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();
}

async fn stage_of(store: &MemoryStore, thread_id: &str) -> (GenerationStage, Option<String>) {
    let thread = store.get_thread(thread_id).await.unwrap().unwrap();
    (thread.generation_stage, thread.status_message)
}

#[tokio::test]
async fn test_add_user_message_rejected_while_streaming() {
    let (store, coordinator, thread) = setup().await;
    force_stage(&store, &thread.id, GenerationStage::StreamingResponse).await;

    let err = coordinator
        .add_user_message(&thread.id, NewMessage::user("hello?"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PersistError::ThreadBusy {
            stage: GenerationStage::StreamingResponse,
            ..
        }
    ));
    assert!(store.get_messages(&thread.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_add_user_message_after_complete() {
    let (store, coordinator, thread) = setup().await;
    force_stage(&store, &thread.id, GenerationStage::Complete).await;

    let message = coordinator
        .add_user_message(&thread.id, NewMessage::user("next question"))
        .await
        .unwrap();

    assert_eq!(message.role, MessageRole::User);
    assert_eq!(
        stage_of(&store, &thread.id).await,
        (
            GenerationStage::FetchingContext,
            Some(FETCHING_CONTEXT_STATUS.to_string())
        )
    );
    assert_eq!(store.get_messages(&thread.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_add_user_message_unknown_thread() {
    let (_, coordinator, _) = setup().await;

    let err = coordinator
        .add_user_message("missing", NewMessage::user("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, PersistError::ThreadNotFound(id) if id == "missing"));
}

async fn streaming_turn(
    coordinator: &ThreadMutationCoordinator,
    thread_id: &str,
) -> (ThreadMessage, ThreadMessage) {
    let question = coordinator
        .add_user_message(thread_id, NewMessage::user("weather in Lisbon?"))
        .await
        .unwrap();
    coordinator
        .begin_model_work(thread_id, &question.id)
        .await
        .unwrap();
    let placeholder = coordinator
        .append_new_message_to_thread(thread_id, &question.id, MessageRole::Assistant, "")
        .await
        .unwrap();
    coordinator.begin_streaming(thread_id).await.unwrap();
    (question, placeholder)
}

#[tokio::test]
async fn test_finish_without_tool_call_completes() {
    let (store, coordinator, thread) = setup().await;
    let (question, placeholder) = streaming_turn(&coordinator, &thread.id).await;
    assert_eq!(
        stage_of(&store, &thread.id).await.0,
        GenerationStage::StreamingResponse
    );

    let mut final_message = placeholder.clone();
    final_message.content = vec![weave_types::ContentPart::text("It is sunny.")];

    let result = coordinator
        .finish_in_progress_message(
            &thread.id,
            &question.id,
            &placeholder.id,
            MessageUpdate::from(&final_message),
        )
        .await
        .unwrap();

    assert_eq!(result.resulting_generation_stage, GenerationStage::Complete);
    assert_eq!(result.resulting_status_message, COMPLETE_STATUS);
    assert!(!result.message.in_progress);
    assert_eq!(result.message.text(), "It is sunny.");
}

#[tokio::test]
async fn test_finish_with_tool_call_fetches_context() {
    let (_, coordinator, thread) = setup().await;
    let (question, placeholder) = streaming_turn(&coordinator, &thread.id).await;

    let mut final_message = placeholder.clone();
    final_message.tool_call_request = Some(ToolCallRequest::new("get_weather"));
    final_message.tool_call_id = Some("tc-1".to_string());
    final_message.action_type = Some(weave_types::ActionType::ToolCall);

    let result = coordinator
        .finish_in_progress_message(
            &thread.id,
            &question.id,
            &placeholder.id,
            MessageUpdate::from(&final_message),
        )
        .await
        .unwrap();

    assert_eq!(
        result.resulting_generation_stage,
        GenerationStage::FetchingContext
    );
    assert_eq!(result.resulting_status_message, "Fetching context...");
}

#[tokio::test]
async fn test_stale_assistant_response_rolls_back() {
    let (store, coordinator, thread) = setup().await;
    let first = coordinator
        .add_user_message(&thread.id, NewMessage::user("one"))
        .await
        .unwrap();
    coordinator
        .add_user_message(&thread.id, NewMessage::user("two"))
        .await
        .unwrap();

    let err = coordinator
        .add_assistant_response(&thread.id, &first.id, &Decision::new("d", "late answer"))
        .await
        .unwrap_err();

    assert!(err.is_consistency_violation());
    assert_eq!(store.get_messages(&thread.id).await.unwrap().len(), 2);
    assert_eq!(
        stage_of(&store, &thread.id).await.0,
        GenerationStage::FetchingContext
    );
}

#[tokio::test]
async fn test_assistant_response_links_parent() {
    let (_, coordinator, thread) = setup().await;
    let question = coordinator
        .add_user_message(&thread.id, NewMessage::user("hi"))
        .await
        .unwrap();

    let result = coordinator
        .add_assistant_response(&thread.id, &question.id, &Decision::new("d", "hello!"))
        .await
        .unwrap();

    assert_eq!(
        result.message.parent_message_id.as_deref(),
        Some(question.id.as_str())
    );
    assert_eq!(result.resulting_generation_stage, GenerationStage::Complete);
}

#[tokio::test]
async fn test_overlapping_turns_conflict_when_persisting() {
    let (store, coordinator, thread) = setup().await;
    let question = coordinator
        .add_user_message(&thread.id, NewMessage::user("hi"))
        .await
        .unwrap();

    coordinator
        .begin_model_work(&thread.id, &question.id)
        .await
        .unwrap();
    coordinator
        .begin_model_work(&thread.id, &question.id)
        .await
        .unwrap();

    coordinator
        .add_assistant_response(&thread.id, &question.id, &Decision::new("d1", "first"))
        .await
        .unwrap();
    let err = coordinator
        .add_assistant_response(&thread.id, &question.id, &Decision::new("d2", "second"))
        .await
        .unwrap_err();

    assert!(err.is_consistency_violation());
    let messages = store.get_messages(&thread.id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].text(), "first");
}

#[tokio::test]
async fn test_tool_response_hydrates_calling_component() {
    let (store, coordinator, thread) = setup().await;
    let question = coordinator
        .add_user_message(&thread.id, NewMessage::user("show a chart"))
        .await
        .unwrap();
    coordinator
        .begin_model_work(&thread.id, &question.id)
        .await
        .unwrap();

    let decision = Decision::new("d", "Loading data")
        .with_component("SalesChart", serde_json::json!({}))
        .with_tool_call(ToolCallRequest::new("fetch_sales"), "tc-5");
    coordinator
        .add_assistant_response(&thread.id, &question.id, &decision)
        .await
        .unwrap();

    let response = coordinator
        .add_user_message(&thread.id, NewMessage::tool_response("tc-5", "[1,2,3]"))
        .await
        .unwrap();
    let transition = coordinator
        .begin_model_work(&thread.id, &response.id)
        .await
        .unwrap();

    assert_eq!(transition.stage, GenerationStage::HydratingComponent);
    assert_eq!(transition.status_message, "Hydrating SalesChart...");
    assert!(store.get_thread(&thread.id).await.unwrap().unwrap().is_busy());
}

#[tokio::test]
async fn test_fail_generation_closes_placeholder() {
    let (store, coordinator, thread) = setup().await;
    let (_, placeholder) = streaming_turn(&coordinator, &thread.id).await;

    let transition = coordinator
        .fail_generation(&thread.id, "model unavailable")
        .await
        .unwrap();

    assert_eq!(transition.stage, GenerationStage::Error);
    let messages = store.get_messages(&thread.id).await.unwrap();
    let closed = messages.iter().find(|m| m.id == placeholder.id).unwrap();
    assert!(!closed.in_progress);
    assert_eq!(closed.error.as_deref(), Some("model unavailable"));

    coordinator
        .add_user_message(&thread.id, NewMessage::user("retry"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_cancel_generation() {
    let (store, coordinator, thread) = setup().await;
    streaming_turn(&coordinator, &thread.id).await;

    coordinator.cancel_generation(&thread.id).await.unwrap();

    assert_eq!(
        stage_of(&store, &thread.id).await,
        (GenerationStage::Cancelled, Some("Cancelled".to_string()))
    );
}

#[tokio::test]
async fn test_update_in_progress_message_requires_placeholder() {
    let (_, coordinator, thread) = setup().await;
    let (question, placeholder) = streaming_turn(&coordinator, &thread.id).await;

    let mut partial = placeholder.clone();
    partial.content = vec![weave_types::ContentPart::text("It is")];
    let updated = coordinator
        .update_in_progress_message(&thread.id, &placeholder.id, MessageUpdate::from(&partial))
        .await
        .unwrap();
    assert_eq!(updated.text(), "It is");
    assert!(updated.in_progress);

    let err = coordinator
        .update_in_progress_message(&thread.id, &question.id, MessageUpdate::from(&partial))
        .await
        .unwrap_err();
    assert!(err.is_consistency_violation());
}

/// Store whose transactions wait for each other after reading the thread
struct RacingStore {
    inner: MemoryStore,
    barrier: Arc<Barrier>,
}

struct RacingTransaction {
    inner: Box<dyn ThreadTransaction>,
    barrier: Arc<Barrier>,
    waited: bool,
}

#[async_trait]
impl PersistenceClient for RacingStore {
    async fn create_thread(&self, thread: NewThread) -> Result<Thread> {
        self.inner.create_thread(thread).await
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>> {
        self.inner.get_thread(thread_id).await
    }

    async fn get_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>> {
        self.inner.get_messages(thread_id).await
    }

    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn ThreadTransaction>> {
        Ok(Box::new(RacingTransaction {
            inner: self.inner.begin(isolation).await?,
            barrier: self.barrier.clone(),
            waited: false,
        }))
    }
}

#[async_trait]
impl ThreadTransaction for RacingTransaction {
    async fn find_thread(&mut self, thread_id: &str) -> Result<Option<Thread>> {
        let thread = self.inner.find_thread(thread_id).await?;
        if !self.waited {
            self.waited = true;
            self.barrier.wait().await;
        }
        Ok(thread)
    }

    async fn find_messages(&mut self, thread_id: &str) -> Result<Vec<ThreadMessage>> {
        self.inner.find_messages(thread_id).await
    }

    async fn add_message(&mut self, thread_id: &str, message: NewMessage) -> Result<ThreadMessage> {
        self.inner.add_message(thread_id, message).await
    }

    async fn update_message(
        &mut self,
        thread_id: &str,
        message_id: &str,
        update: MessageUpdate,
    ) -> Result<ThreadMessage> {
        self.inner.update_message(thread_id, message_id, update).await
    }

    async fn update_thread(
        &mut self,
        thread_id: &str,
        update: ThreadStageUpdate,
    ) -> Result<Thread> {
        self.inner.update_thread(thread_id, update).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.inner.rollback().await
    }
}

#[tokio::test]
async fn test_concurrent_user_messages_only_one_wins() {
    let store = Arc::new(RacingStore {
        inner: MemoryStore::new(),
        barrier: Arc::new(Barrier::new(2)),
    });
    let thread = store.create_thread(NewThread::new("project-1")).await.unwrap();
    let coordinator = ThreadMutationCoordinator::new(store.clone());

    let (first, second) = tokio::join!(
        coordinator.add_user_message(&thread.id, NewMessage::user("first")),
        coordinator.add_user_message(&thread.id, NewMessage::user("second")),
    );

    let outcomes = [first, second];
    let successes = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);

    let loser = outcomes.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(loser.is_busy() || loser.is_consistency_violation());

    assert_eq!(store.get_messages(&thread.id).await.unwrap().len(), 1);
    let stored = store.get_thread(&thread.id).await.unwrap().unwrap();
    assert_eq!(stored.generation_stage, GenerationStage::FetchingContext);
}

/// Store whose first transaction stops after reading messages until the test releases it
struct PausingStore {
    inner: Arc<MemoryStore>,
    paused: Arc<Barrier>,
    resume: Arc<Barrier>,
}

struct PausingTransaction {
    inner: Box<dyn ThreadTransaction>,
    paused: Arc<Barrier>,
    resume: Arc<Barrier>,
    waited: bool,
}

#[async_trait]
impl PersistenceClient for PausingStore {
    async fn create_thread(&self, thread: NewThread) -> Result<Thread> {
        self.inner.create_thread(thread).await
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>> {
        self.inner.get_thread(thread_id).await
    }

    async fn get_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>> {
        self.inner.get_messages(thread_id).await
    }

    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn ThreadTransaction>> {
        Ok(Box::new(PausingTransaction {
            inner: self.inner.begin(isolation).await?,
            paused: self.paused.clone(),
            resume: self.resume.clone(),
            waited: false,
        }))
    }
}

#[async_trait]
impl ThreadTransaction for PausingTransaction {
    async fn find_thread(&mut self, thread_id: &str) -> Result<Option<Thread>> {
        self.inner.find_thread(thread_id).await
    }

    async fn find_messages(&mut self, thread_id: &str) -> Result<Vec<ThreadMessage>> {
        let messages = self.inner.find_messages(thread_id).await?;
        if !self.waited {
            self.waited = true;
            self.paused.wait().await;
            self.resume.wait().await;
        }
        Ok(messages)
    }

    async fn add_message(&mut self, thread_id: &str, message: NewMessage) -> Result<ThreadMessage> {
        self.inner.add_message(thread_id, message).await
    }

    async fn update_message(
        &mut self,
        thread_id: &str,
        message_id: &str,
        update: MessageUpdate,
    ) -> Result<ThreadMessage> {
        self.inner.update_message(thread_id, message_id, update).await
    }

    async fn update_thread(
        &mut self,
        thread_id: &str,
        update: ThreadStageUpdate,
    ) -> Result<Thread> {
        self.inner.update_thread(thread_id, update).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.inner.rollback().await
    }
}

#[tokio::test]
async fn test_progress_update_loses_to_concurrent_cancel() {
    let (store, coordinator, thread) = setup().await;
    let (_, placeholder) = streaming_turn(&coordinator, &thread.id).await;

    let paused = Arc::new(Barrier::new(2));
    let resume = Arc::new(Barrier::new(2));
    let streaming = ThreadMutationCoordinator::new(Arc::new(PausingStore {
        inner: store.clone(),
        paused: paused.clone(),
        resume: resume.clone(),
    }));

    let mut partial = placeholder.clone();
    partial.content = vec![weave_types::ContentPart::text("partial")];

    let (update, cancel) = tokio::join!(
        streaming.update_in_progress_message(
            &thread.id,
            &placeholder.id,
            MessageUpdate::from(&partial)
        ),
        async {
            paused.wait().await;
            let cancel = coordinator.cancel_generation(&thread.id).await;
            resume.wait().await;
            cancel
        },
    );

    cancel.unwrap();
    assert!(update.unwrap_err().is_consistency_violation());

    assert_eq!(
        stage_of(&store, &thread.id).await.0,
        GenerationStage::Cancelled
    );
    let messages = store.get_messages(&thread.id).await.unwrap();
    let stored = messages.iter().find(|m| m.id == placeholder.id).unwrap();
    assert!(!stored.in_progress);
    assert!(stored.text().is_empty());
}
