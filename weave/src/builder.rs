use std::sync::Arc;

use anyhow::{Context, Result};
use weave_graph::{
    DecisionBackend, EmptyRegistry, Orchestrator, ThreadMessageStream, ToolRegistry, TurnInput,
};
use weave_persist::{
    FinishResult, MemoryStore, PersistError, PersistenceClient, ThreadMutationCoordinator,
};
use weave_stream::RevealPolicy;
use weave_types::{NewMessage, NewThread, StageTransition, Thread, ThreadMessage};

use crate::config::{Config, PersistenceBackend};

/// High-level builder for a [`Weave`] instance
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use weave::prelude::*;
///
/// # #[tokio::main]
/// # async fn main() -> Result<()> {
/// let weave = WeaveBuilder::new()
///     .backend(Arc::new(ScriptedBackend::new()))
///     .registry(Arc::new(StaticRegistry::default()))
///     .memory()
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct WeaveBuilder {
    backend: Option<Arc<dyn DecisionBackend>>,
    registry: Option<Arc<dyn ToolRegistry>>,
    persistence: Option<Persistence>,
    reveal_policy: Option<Arc<dyn RevealPolicy>>,
}

enum Persistence {
    Client(Arc<dyn PersistenceClient>),
    #[cfg(feature = "mongodb")]
    Mongo { uri: String, database: String },
}

impl WeaveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from loaded configuration: persistence backend and reveal policy
    pub fn from_config(config: &Config) -> Result<Self> {
        let builder = Self::new().reveal_policy(config.stream.reveal_policy());

        match config.persistence.backend {
            PersistenceBackend::Memory => Ok(builder.memory()),
            #[cfg(feature = "mongodb")]
            PersistenceBackend::Mongodb => {
                Ok(builder.mongodb(&config.mongodb_uri, &config.persistence.database))
            }
            #[cfg(not(feature = "mongodb"))]
            PersistenceBackend::Mongodb => Err(anyhow::anyhow!(
                "MongoDB persistence requires building weave with the `mongodb` feature"
            )),
        }
    }

    /// Set the model backend (required)
    pub fn backend(mut self, backend: Arc<dyn DecisionBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the tool/resource registry (default: nothing offered)
    pub fn registry(mut self, registry: Arc<dyn ToolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Use an already constructed persistence client
    pub fn persistence(mut self, client: Arc<dyn PersistenceClient>) -> Self {
        self.persistence = Some(Persistence::Client(client));
        self
    }

    /// Keep threads in process memory (default)
    pub fn memory(self) -> Self {
        self.persistence(Arc::new(MemoryStore::new()))
    }

    /// Connect to MongoDB when building
    ///
    /// The deployment must support multi-document transactions (replica set or sharded).
    #[cfg(feature = "mongodb")]
    pub fn mongodb(mut self, uri: impl Into<String>, database: impl Into<String>) -> Self {
        self.persistence = Some(Persistence::Mongo {
            uri: uri.into(),
            database: database.into(),
        });
        self
    }

    /// Set the early-reveal policy for streamed tool calls (default: never)
    pub fn reveal_policy(mut self, policy: Arc<dyn RevealPolicy>) -> Self {
        self.reveal_policy = Some(policy);
        self
    }

    /// Build the instance
    ///
    /// # Errors
    ///
    /// Returns an error if no backend was set or the MongoDB connection fails.
    pub async fn build(self) -> Result<Weave> {
        let backend = self
            .backend
            .context("Decision backend is required. Call .backend(backend)")?;
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(EmptyRegistry));

        let client: Arc<dyn PersistenceClient> = match self.persistence {
            Some(Persistence::Client(client)) => client,
            #[cfg(feature = "mongodb")]
            Some(Persistence::Mongo { uri, database }) => {
                let client = weave_persist::MongoPersistenceClient::connect(&uri, &database)
                    .await
                    .context("Failed to connect to MongoDB")?;
                tracing::info!(database = %database, "MongoDB persistence ready");
                Arc::new(client)
            }
            None => Arc::new(MemoryStore::new()),
        };

        let coordinator = ThreadMutationCoordinator::new(client);
        let mut orchestrator = Orchestrator::new(backend, registry, coordinator);
        if let Some(policy) = self.reveal_policy {
            orchestrator = orchestrator.with_reveal_policy(policy);
        }

        Ok(Weave { orchestrator })
    }
}

/// A wired-up orchestrator plus the thread operations a client needs
#[derive(Clone)]
pub struct Weave {
    orchestrator: Orchestrator,
}

impl Weave {
    pub async fn create_thread(&self, thread: NewThread) -> Result<Thread, PersistError> {
        self.coordinator().client().create_thread(thread).await
    }

    pub async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>, PersistError> {
        self.coordinator().client().get_thread(thread_id).await
    }

    pub async fn get_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, PersistError> {
        self.coordinator().client().get_messages(thread_id).await
    }

    /// Append a user message, starting a new turn
    ///
    /// Fails with [`PersistError::ThreadBusy`] while a previous turn is still generating.
    pub async fn add_user_message(
        &self,
        thread_id: &str,
        text: impl Into<String>,
    ) -> Result<ThreadMessage, PersistError> {
        self.coordinator()
            .add_user_message(thread_id, NewMessage::user(text))
            .await
    }

    /// Run a turn to completion
    pub async fn process(&self, input: TurnInput) -> weave_graph::Result<FinishResult> {
        self.orchestrator.process_thread_message(input).await
    }

    /// Run a turn, yielding every intermediate view of the response
    pub fn stream(&self, input: TurnInput) -> ThreadMessageStream {
        self.orchestrator.stream_thread_message(input)
    }

    pub async fn cancel(&self, thread_id: &str) -> Result<StageTransition, PersistError> {
        self.coordinator().cancel_generation(thread_id).await
    }

    pub fn coordinator(&self) -> &ThreadMutationCoordinator {
        self.orchestrator.coordinator()
    }

    /// Get the underlying orchestrator for advanced usage
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }
}
