use weave_types::ThreadMessage;

use crate::error::{PersistError, Result};
use crate::trait_client::ThreadTransaction;

/// Check that `expected_latest_message_id` is still the newest message of the thread, optionally
/// also still in progress, and return it.
///
/// Must run inside the same transaction as the write it protects.
pub async fn verify_latest_message_consistency(
    tx: &mut dyn ThreadTransaction,
    thread_id: &str,
    expected_latest_message_id: &str,
    require_in_progress: bool,
) -> Result<ThreadMessage> {
    let messages = tx.find_messages(thread_id).await?;
    let latest = messages.into_iter().last();

    let latest = match latest {
        Some(message) if message.id == expected_latest_message_id => message,
        other => {
            return Err(PersistError::latest_message_mismatch(
                thread_id,
                expected_latest_message_id,
                other.as_ref().map(|m| m.id.as_str()),
            ))
        }
    };

    if require_in_progress && !latest.in_progress {
        return Err(PersistError::ConsistencyViolation {
            thread_id: thread_id.to_string(),
            detail: format!("message {} is no longer in progress", latest.id),
        });
    }

    Ok(latest)
}

/// Check that `in_progress_message_id` is the latest message, still in progress, and directly
/// follows `expected_parent_id`
pub async fn verify_in_progress_reply(
    tx: &mut dyn ThreadTransaction,
    thread_id: &str,
    expected_parent_id: &str,
    in_progress_message_id: &str,
) -> Result<ThreadMessage> {
    let in_progress =
        verify_latest_message_consistency(tx, thread_id, in_progress_message_id, true).await?;

    let messages = tx.find_messages(thread_id).await?;
    let predecessor = messages.iter().rev().nth(1).map(|m| m.id.as_str());
    if predecessor != Some(expected_parent_id) {
        return Err(PersistError::ConsistencyViolation {
            thread_id: thread_id.to_string(),
            detail: format!(
                "in-progress message {} no longer follows {} (found {})",
                in_progress_message_id,
                expected_parent_id,
                predecessor.unwrap_or("nothing")
            ),
        });
    }

    Ok(in_progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbs::MemoryStore;
    use crate::trait_client::{IsolationLevel, PersistenceClient};
    use weave_types::{MessageRole, NewMessage, NewThread};

    #[test]
    fn test_latest_message_matches() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            let thread = store.create_thread(NewThread::new("p")).await.unwrap();
            let mut tx = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
            tx.add_message(&thread.id, NewMessage::user("one")).await.unwrap();
            let second = tx
                .add_message(&thread.id, NewMessage::user("two"))
                .await
                .unwrap();

            let latest = verify_latest_message_consistency(tx.as_mut(), &thread.id, &second.id, false)
                .await
                .unwrap();
            assert_eq!(latest.text(), "two");
        });
    }

    #[test]
    fn test_stale_expectation_is_rejected() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            let thread = store.create_thread(NewThread::new("p")).await.unwrap();
            let mut tx = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
            let first = tx.add_message(&thread.id, NewMessage::user("one")).await.unwrap();
            tx.add_message(&thread.id, NewMessage::user("two")).await.unwrap();

            let err = verify_latest_message_consistency(tx.as_mut(), &thread.id, &first.id, false)
                .await
                .unwrap_err();
            assert!(err.is_consistency_violation());
        });
    }

    #[test]
    fn test_empty_thread_is_rejected() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            let thread = store.create_thread(NewThread::new("p")).await.unwrap();
            let mut tx = store.begin(IsolationLevel::ReadCommitted).await.unwrap();

            let err = verify_latest_message_consistency(tx.as_mut(), &thread.id, "anything", false)
                .await
                .unwrap_err();
            assert!(err.to_string().contains("no messages"));
        });
    }

    #[test]
    fn test_finalized_message_fails_in_progress_requirement() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            let thread = store.create_thread(NewThread::new("p")).await.unwrap();
            let mut tx = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
            let done = tx
                .add_message(&thread.id, NewMessage::new(MessageRole::Assistant, "done"))
                .await
                .unwrap();

            let err = verify_latest_message_consistency(tx.as_mut(), &thread.id, &done.id, true)
                .await
                .unwrap_err();
            assert!(err.to_string().contains("no longer in progress"));

            let placeholder = tx
                .add_message(&thread.id, NewMessage::placeholder(MessageRole::Assistant, ""))
                .await
                .unwrap();
            assert!(
                verify_latest_message_consistency(tx.as_mut(), &thread.id, &placeholder.id, true)
                    .await
                    .is_ok()
            );
        });
    }

    #[test]
    fn test_in_progress_reply_checks_predecessor() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            let thread = store.create_thread(NewThread::new("p")).await.unwrap();
            let mut tx = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
            let question = tx.add_message(&thread.id, NewMessage::user("q")).await.unwrap();
            let placeholder = tx
                .add_message(&thread.id, NewMessage::placeholder(MessageRole::Assistant, ""))
                .await
                .unwrap();

            assert!(
                verify_in_progress_reply(tx.as_mut(), &thread.id, &question.id, &placeholder.id)
                    .await
                    .is_ok()
            );

            let err = verify_in_progress_reply(tx.as_mut(), &thread.id, "other", &placeholder.id)
                .await
                .unwrap_err();
            assert!(err.is_consistency_violation());
        });
    }
}
