use std::sync::Arc;

use crate::usecase::contracts::NotificationApi;
use crate::usecase::store::{ReadChange, SessionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No such notification in the active session.
    NotFound,
    /// Nothing changed locally, so the server was not called.
    AlreadyRead,
    /// Applied locally and confirmed by the server.
    Confirmed,
    /// Applied locally; the server call failed and the local change stands.
    LocalOnly,
}

/// Optimistic read-state updates: the store changes first, then the server
/// is told. A failed server call is logged and never rolled back.
pub struct ReadStateSynchronizer<A>
where
    A: NotificationApi,
{
    api: Arc<A>,
    store: SessionStore,
}

impl<A> ReadStateSynchronizer<A>
where
    A: NotificationApi,
{
    pub fn new(api: Arc<A>, store: SessionStore) -> Self {
        Self { api, store }
    }

    #[tracing::instrument(skip(self), fields(notification_id = %id))]
    pub async fn mark_read(&self, id: &str) -> SyncOutcome {
        tracing::debug!("marking notification as read");

        match self.store.mark_read(id) {
            ReadChange::NotFound => {
                tracing::debug!(notification_id = %id, "notification not in store");
                return SyncOutcome::NotFound;
            }
            ReadChange::AlreadyRead => return SyncOutcome::AlreadyRead,
            ReadChange::Marked => {}
        }

        self.confirm_read(id).await
    }

    /// Sends the read flag of `id` to the server even if it is already read
    /// locally. This is the retry path after a `LocalOnly` outcome.
    #[tracing::instrument(skip(self), fields(notification_id = %id))]
    pub async fn resync(&self, id: &str) -> SyncOutcome {
        tracing::debug!("resyncing read state");

        if self.store.mark_read(id) == ReadChange::NotFound {
            return SyncOutcome::NotFound;
        }

        self.confirm_read(id).await
    }

    async fn confirm_read(&self, id: &str) -> SyncOutcome {
        match self.api.mark_as_read(id).await {
            Ok(()) => {
                tracing::debug!(notification_id = %id, "read state confirmed");
                SyncOutcome::Confirmed
            }
            Err(e) => {
                metrics::counter!("notification_read_sync_failures_total", "operation" => "mark_read")
                    .increment(1);
                tracing::warn!(notification_id = %id, error = %e, "failed to sync read state");
                SyncOutcome::LocalOnly
            }
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn mark_all_read(&self) -> SyncOutcome {
        tracing::debug!("marking all notifications as read");

        let changed = self.store.mark_all_read();
        if changed.is_empty() {
            return SyncOutcome::AlreadyRead;
        }

        match self.api.mark_all_as_read().await {
            Ok(()) => {
                tracing::debug!(count = changed.len(), "bulk read state confirmed");
                SyncOutcome::Confirmed
            }
            Err(e) => {
                metrics::counter!("notification_read_sync_failures_total", "operation" => "mark_all_read")
                    .increment(1);
                tracing::warn!(count = changed.len(), error = %e, "failed to sync bulk read state");
                SyncOutcome::LocalOnly
            }
        }
    }
}
