use std::sync::Arc;

use crate::usecase::contracts::NotificationApi;
use crate::usecase::store::SessionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryOutcome {
    /// The backlog was merged into the store; holds the number of records kept.
    Applied(usize),
    /// The session that asked for it ended before the response arrived.
    Discarded,
    /// The fetch failed; the store keeps whatever live records it had.
    Failed,
}

/// Loads the backlog once per session activation. Never retries.
pub struct HistoryLoader<A>
where
    A: NotificationApi,
{
    api: Arc<A>,
    store: SessionStore,
}

impl<A> HistoryLoader<A>
where
    A: NotificationApi,
{
    pub fn new(api: Arc<A>, store: SessionStore) -> Self {
        Self { api, store }
    }

    #[tracing::instrument(skip(self), fields(%generation))]
    pub async fn load(&self, generation: u64) -> HistoryOutcome {
        tracing::debug!("loading notification history");

        let history = match self.api.fetch_history().await {
            Ok(history) => history,
            Err(e) => {
                metrics::counter!("notification_history_failures_total").increment(1);
                if e.is_session_ended() {
                    tracing::warn!(error = %e, "history load ended the session");
                } else {
                    tracing::warn!(error = %e, "failed to load notification history");
                }
                return HistoryOutcome::Failed;
            }
        };

        let fetched = history.len();
        match self.store.replace_all(generation, history) {
            Some(kept) => {
                tracing::info!(fetched, kept, "notification history applied");
                HistoryOutcome::Applied(kept)
            }
            None => {
                tracing::debug!(fetched, "discarding history for an ended session");
                HistoryOutcome::Discarded
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::errors::ApiError;
    use crate::usecase::contracts::MockNotificationApi;
    use crate::usecase::store::tests::make_notification;

    #[tokio::test]
    async fn test_load_seeds_store_in_server_order() {
        let mut api = MockNotificationApi::new();
        api.expect_fetch_history().times(1).returning(|| {
            Ok(vec![
                make_notification("C", "u-1", 3),
                make_notification("B", "u-1", 2),
                make_notification("A", "u-1", 1),
            ])
        });
        let store = SessionStore::new();
        let generation = store.begin_session("u-1");

        let loader = HistoryLoader::new(Arc::new(api), store.clone());
        let outcome = loader.load(generation).await;

        assert_eq!(outcome, HistoryOutcome::Applied(3));
        let ids: Vec<String> = store.snapshot().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["C", "B", "A"]);
        assert_eq!(store.unread_count(), 3);
    }

    #[tokio::test]
    async fn test_load_failure_leaves_store_empty() {
        let mut api = MockNotificationApi::new();
        api.expect_fetch_history().times(1).returning(|| {
            Err(ApiError::Status {
                status: 500,
                body: "boom".to_string(),
            })
        });
        let store = SessionStore::new();
        let generation = store.begin_session("u-1");

        let loader = HistoryLoader::new(Arc::new(api), store.clone());

        assert_eq!(loader.load(generation).await, HistoryOutcome::Failed);
        assert!(store.is_empty());
        assert_eq!(store.unread_count(), 0);
    }

    #[tokio::test]
    async fn test_load_failure_keeps_live_records() {
        let mut api = MockNotificationApi::new();
        api.expect_fetch_history()
            .returning(|| Err(ApiError::Transport("connection reset".to_string())));
        let store = SessionStore::new();
        let generation = store.begin_session("u-1");
        store.insert(generation, make_notification("D", "u-1", 4));

        let loader = HistoryLoader::new(Arc::new(api), store.clone());
        loader.load(generation).await;

        assert_eq!(store.len(), 1);
        assert!(store.get("D").is_some());
    }

    #[tokio::test]
    async fn test_load_for_ended_session_is_discarded() {
        let mut api = MockNotificationApi::new();
        api.expect_fetch_history()
            .returning(|| Ok(vec![make_notification("A", "u-1", 1)]));
        let store = SessionStore::new();
        let stale = store.begin_session("u-1");
        store.end_session();
        store.begin_session("u-2");

        let loader = HistoryLoader::new(Arc::new(api), store.clone());

        assert_eq!(loader.load(stale).await, HistoryOutcome::Discarded);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_live_record_before_history_is_not_duplicated() {
        let mut api = MockNotificationApi::new();
        api.expect_fetch_history().returning(|| {
            Ok(vec![
                make_notification("B", "u-1", 2),
                make_notification("A", "u-1", 1),
            ])
        });
        let store = SessionStore::new();
        let generation = store.begin_session("u-1");
        store.insert(generation, make_notification("A", "u-1", 5));

        let loader = HistoryLoader::new(Arc::new(api), store.clone());
        loader.load(generation).await;

        let snapshot = store.snapshot();
        assert_eq!(snapshot.iter().filter(|n| n.id == "A").count(), 1);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, "A");
        assert_eq!(store.unread_count(), 2);
    }
}
