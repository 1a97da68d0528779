use crate::domain::notification::Notification;
use crate::usecase::store::SessionStore;

/// Read-only view of the active session's notifications, safe to hand to
/// presentation code.
#[derive(Debug, Clone)]
pub struct NotificationQuery {
    store: SessionStore,
}

impl NotificationQuery {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    /// Newest first.
    pub fn list(&self) -> Vec<Notification> {
        self.store.snapshot()
    }

    pub fn unread_count(&self) -> usize {
        self.store.unread_count()
    }

    pub fn get(&self, id: &str) -> Option<Notification> {
        self.store.get(id)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecase::store::tests::make_notification;

    #[test]
    fn test_query_reflects_store_writes() {
        let store = SessionStore::new();
        let query = NotificationQuery::new(store.clone());
        let generation = store.begin_session("u-1");

        store.insert(generation, make_notification("A", "u-1", 1));
        store.insert(generation, make_notification("B", "u-1", 2));
        store.mark_read("A");

        let ids: Vec<String> = query.list().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["B", "A"]);
        assert_eq!(query.unread_count(), 1);
        assert!(query.get("A").unwrap().is_read);
        assert_eq!(query.len(), 2);
    }

    #[test]
    fn test_query_after_session_end_is_empty() {
        let store = SessionStore::new();
        let query = NotificationQuery::new(store.clone());
        let generation = store.begin_session("u-1");
        store.insert(generation, make_notification("A", "u-1", 1));

        store.end_session();

        assert!(query.is_empty());
        assert!(query.list().is_empty());
        assert_eq!(query.unread_count(), 0);
        assert!(query.get("A").is_none());
    }
}
