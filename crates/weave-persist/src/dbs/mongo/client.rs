use std::collections::HashMap;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::error::TRANSIENT_TRANSACTION_ERROR;
use mongodb::options::{ReadConcern, WriteConcern};
use mongodb::{Client, ClientSession, Collection};
use weave_types::{MessageUpdate, NewMessage, NewThread, Thread, ThreadMessage};

use crate::dbs::mongo::models::{MongoMessage, MongoThread};
use crate::error::{PersistError, Result};
use crate::trait_client::{IsolationLevel, PersistenceClient, ThreadStageUpdate, ThreadTransaction};

const THREADS_COLLECTION: &str = "threads";
const MESSAGES_COLLECTION: &str = "messages";

/// MongoDB-backed persistence
///
/// Transactions need a replica set or sharded cluster.
#[derive(Clone)]
pub struct MongoPersistenceClient {
    client: Client,
    threads: Collection<MongoThread>,
    messages: Collection<MongoMessage>,
}

impl MongoPersistenceClient {
    /// Connect to MongoDB and create client
    pub async fn connect(mongodb_uri: &str, database: &str) -> Result<Self> {
        let client = Client::with_uri_str(mongodb_uri).await?;
        let db = client.database(database);

        tracing::info!(database = %database, "Connected to MongoDB");

        Ok(Self {
            threads: db.collection(THREADS_COLLECTION),
            messages: db.collection(MESSAGES_COLLECTION),
            client,
        })
    }
}

#[async_trait]
impl PersistenceClient for MongoPersistenceClient {
    async fn create_thread(&self, thread: NewThread) -> Result<Thread> {
        let thread = Thread::from_new(thread);
        self.threads
            .insert_one(MongoThread::from(thread.clone()))
            .await?;
        Ok(thread)
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>> {
        let thread = self.threads.find_one(doc! { "_id": thread_id }).await?;
        Ok(thread.map(Into::into))
    }

    async fn get_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>> {
        let messages: Vec<MongoMessage> = self
            .messages
            .find(doc! { "thread_id": thread_id })
            .sort(doc! { "position": 1 })
            .await?
            .try_collect()
            .await?;
        Ok(messages.into_iter().map(Into::into).collect())
    }

    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn ThreadTransaction>> {
        let read_concern = match isolation {
            IsolationLevel::ReadCommitted => ReadConcern::majority(),
            IsolationLevel::Snapshot => ReadConcern::snapshot(),
        };

        let mut session = self.client.start_session().await?;
        session
            .start_transaction()
            .read_concern(read_concern)
            .write_concern(WriteConcern::majority())
            .await?;

        Ok(Box::new(MongoTransaction {
            session,
            threads: self.threads.clone(),
            messages: self.messages.clone(),
            observed_versions: HashMap::new(),
        }))
    }
}

/// Multi-document transaction bound to one client session
///
/// Every write that touches a thread goes through a conditional update on `{_id, version}` so a
/// writer holding a stale view fails instead of overwriting.
pub struct MongoTransaction {
    session: ClientSession,
    threads: Collection<MongoThread>,
    messages: Collection<MongoMessage>,
    observed_versions: HashMap<String, i64>,
}

impl MongoTransaction {
    async fn observed_version(&mut self, thread_id: &str) -> Result<i64> {
        if let Some(version) = self.observed_versions.get(thread_id) {
            return Ok(*version);
        }
        let thread = self
            .find_thread(thread_id)
            .await?
            .ok_or_else(|| PersistError::ThreadNotFound(thread_id.to_string()))?;
        Ok(thread.version as i64)
    }

    /// Apply `set` to the thread and bump its version, failing if the version moved
    async fn touch_thread(&mut self, thread_id: &str, mut set: Document) -> Result<()> {
        let observed = self.observed_version(thread_id).await?;
        set.insert("updated_at", bson::DateTime::now());

        let result = self
            .threads
            .update_one(
                doc! { "_id": thread_id, "version": observed },
                doc! { "$set": set, "$inc": { "version": 1 } },
            )
            .session(&mut self.session)
            .await
            .map_err(|e| {
                if e.contains_label(TRANSIENT_TRANSACTION_ERROR) {
                    PersistError::ConsistencyViolation {
                        thread_id: thread_id.to_string(),
                        detail: format!("write conflict: {}", e),
                    }
                } else {
                    PersistError::Database(e)
                }
            })?;

        if result.matched_count == 0 {
            let current = self
                .threads
                .find_one(doc! { "_id": thread_id })
                .session(&mut self.session)
                .await?
                .ok_or_else(|| PersistError::ThreadNotFound(thread_id.to_string()))?;
            return Err(PersistError::version_conflict(
                thread_id,
                observed.max(0) as u64,
                current.version.max(0) as u64,
            ));
        }

        self.observed_versions
            .insert(thread_id.to_string(), observed + 1);
        Ok(())
    }

    async fn find_message(&mut self, thread_id: &str, message_id: &str) -> Result<MongoMessage> {
        self.messages
            .find_one(doc! { "_id": message_id, "thread_id": thread_id })
            .session(&mut self.session)
            .await?
            .ok_or_else(|| PersistError::MessageNotFound(message_id.to_string()))
    }
}

#[async_trait]
impl ThreadTransaction for MongoTransaction {
    async fn find_thread(&mut self, thread_id: &str) -> Result<Option<Thread>> {
        let thread = self
            .threads
            .find_one(doc! { "_id": thread_id })
            .session(&mut self.session)
            .await?;
        if let Some(thread) = &thread {
            self.observed_versions
                .entry(thread.id.clone())
                .or_insert(thread.version);
        }
        Ok(thread.map(Into::into))
    }

    async fn find_messages(&mut self, thread_id: &str) -> Result<Vec<ThreadMessage>> {
        let mut cursor = self
            .messages
            .find(doc! { "thread_id": thread_id })
            .sort(doc! { "position": 1 })
            .session(&mut self.session)
            .await?;
        let messages: Vec<MongoMessage> = cursor.stream(&mut self.session).try_collect().await?;
        Ok(messages.into_iter().map(Into::into).collect())
    }

    async fn add_message(&mut self, thread_id: &str, message: NewMessage) -> Result<ThreadMessage> {
        self.touch_thread(thread_id, Document::new()).await?;

        let position = self
            .messages
            .count_documents(doc! { "thread_id": thread_id })
            .session(&mut self.session)
            .await? as i64;

        let message = ThreadMessage::from_new(thread_id, message);
        self.messages
            .insert_one(MongoMessage::from_message(message.clone(), position))
            .session(&mut self.session)
            .await?;
        Ok(message)
    }

    async fn update_message(
        &mut self,
        thread_id: &str,
        message_id: &str,
        update: MessageUpdate,
    ) -> Result<ThreadMessage> {
        let stored = self.find_message(thread_id, message_id).await?;
        let position = stored.position;

        let mut message: ThreadMessage = stored.into();
        message.apply(update);

        self.touch_thread(thread_id, Document::new()).await?;
        self.messages
            .replace_one(
                doc! { "_id": message_id, "thread_id": thread_id },
                MongoMessage::from_message(message.clone(), position),
            )
            .session(&mut self.session)
            .await?;
        Ok(message)
    }

    async fn update_thread(
        &mut self,
        thread_id: &str,
        update: ThreadStageUpdate,
    ) -> Result<Thread> {
        let set = doc! {
            "generation_stage": update.generation_stage.as_str(),
            "status_message": update.status_message,
        };
        self.touch_thread(thread_id, set).await?;

        self.find_thread(thread_id)
            .await?
            .ok_or_else(|| PersistError::ThreadNotFound(thread_id.to_string()))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = *self;
        let thread_id = this
            .observed_versions
            .keys()
            .next()
            .cloned()
            .unwrap_or_default();
        this.session.commit_transaction().await.map_err(|e| {
            if e.contains_label(TRANSIENT_TRANSACTION_ERROR) {
                PersistError::ConsistencyViolation {
                    thread_id,
                    detail: format!("transaction aborted at commit: {}", e),
                }
            } else {
                PersistError::Database(e)
            }
        })?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut this = *self;
        this.session.abort_transaction().await?;
        Ok(())
    }
}
