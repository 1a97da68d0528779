use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::domain::notification::Notification;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Added,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadChange {
    NotFound,
    AlreadyRead,
    Marked,
}

/// Deduplicated working set of notifications, newest first.
#[derive(Debug, Default, Clone)]
pub struct NotificationStore {
    records: Vec<Notification>,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record, replacing any record with the same id.
    ///
    /// A replaced record keeps `is_read = true` if it was already read
    /// locally; read state never goes back to unread.
    pub fn insert(&mut self, mut record: Notification) -> InsertOutcome {
        match self.position(&record.id) {
            Some(pos) => {
                let existing = self.records.remove(pos);
                record.is_read |= existing.is_read;
                self.insert_ordered(record);
                InsertOutcome::Updated
            }
            None => {
                self.insert_ordered(record);
                InsertOutcome::Added
            }
        }
    }

    /// Seeds the store with a history backlog delivered newest first.
    ///
    /// Records already present (live arrivals that beat the history
    /// response) are merged in: for a shared id the later `created_at`
    /// wins, ties keep the record already in the store.
    pub fn replace_all(&mut self, history: Vec<Notification>) {
        let live = std::mem::take(&mut self.records);

        self.records.reserve(history.len() + live.len());
        let mut seeded: HashSet<String> = HashSet::with_capacity(history.len());
        for record in history {
            if seeded.insert(record.id.clone()) {
                self.records.push(record);
            }
        }

        for record in live {
            match self.position(&record.id) {
                Some(pos) if self.records[pos].created_at > record.created_at => {
                    self.records[pos].is_read |= record.is_read;
                }
                Some(pos) => {
                    let seeded = self.records.remove(pos);
                    let mut record = record;
                    record.is_read |= seeded.is_read;
                    self.insert_ordered(record);
                }
                None => self.insert_ordered(record),
            }
        }
    }

    pub fn mark_read(&mut self, id: &str) -> ReadChange {
        match self.records.iter_mut().find(|r| r.id == id) {
            None => ReadChange::NotFound,
            Some(record) if record.is_read => ReadChange::AlreadyRead,
            Some(record) => {
                record.is_read = true;
                ReadChange::Marked
            }
        }
    }

    /// Marks every record read and returns the ids that changed.
    pub fn mark_all_read(&mut self) -> Vec<String> {
        self.records
            .iter_mut()
            .filter(|r| !r.is_read)
            .map(|r| {
                r.is_read = true;
                r.id.clone()
            })
            .collect()
    }

    pub fn reset(&mut self) {
        self.records.clear();
    }

    pub fn list(&self) -> &[Notification] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn unread_count(&self) -> usize {
        self.records.iter().filter(|r| !r.is_read).count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }

    // Ahead of any record with an equal or older timestamp, so a fresh
    // arrival lands at the front.
    fn insert_ordered(&mut self, record: Notification) {
        let idx = self
            .records
            .partition_point(|r| r.created_at > record.created_at);
        self.records.insert(idx, record);
    }
}

#[derive(Debug, Default)]
struct Scoped {
    generation: u64,
    owner: Option<String>,
    records: NotificationStore,
}

impl Scoped {
    fn accepts(&self, generation: u64, record: &Notification) -> bool {
        self.generation == generation && self.owner.as_deref() == Some(record.recipient_id.as_str())
    }
}

/// Session-scoped handle to the notification store.
///
/// Every session start or end bumps the generation; writers tag their
/// updates with the generation they started under and stale updates are
/// dropped. The lock is never held across an await point.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<Scoped>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_session(&self, user_id: &str) -> u64 {
        let mut scoped = self.inner.write();
        scoped.generation += 1;
        scoped.owner = Some(user_id.to_string());
        scoped.records.reset();
        scoped.generation
    }

    pub fn end_session(&self) {
        let mut scoped = self.inner.write();
        scoped.generation += 1;
        scoped.owner = None;
        scoped.records.reset();
    }

    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.inner.read().generation == generation
    }

    /// Inserts a live record. Returns `None` when the record was rejected
    /// because its session is over or it belongs to someone else.
    pub fn insert(&self, generation: u64, record: Notification) -> Option<InsertOutcome> {
        let mut scoped = self.inner.write();
        if !scoped.accepts(generation, &record) {
            tracing::debug!(
                notification_id = %record.id,
                recipient_id = %record.recipient_id,
                generation,
                current_generation = scoped.generation,
                "discarding notification outside the active session"
            );
            return None;
        }
        Some(scoped.records.insert(record))
    }

    /// Seeds the store from history. Returns the number of records kept,
    /// or `None` if the session that requested the history has ended.
    pub fn replace_all(&self, generation: u64, history: Vec<Notification>) -> Option<usize> {
        let mut scoped = self.inner.write();
        if scoped.generation != generation {
            return None;
        }

        let total = history.len();
        let history: Vec<Notification> = history
            .into_iter()
            .filter(|r| scoped.owner.as_deref() == Some(r.recipient_id.as_str()))
            .collect();
        if history.len() != total {
            tracing::warn!(
                dropped = total - history.len(),
                "history contained notifications for another recipient"
            );
        }

        let kept = history.len();
        scoped.records.replace_all(history);
        Some(kept)
    }

    pub fn mark_read(&self, id: &str) -> ReadChange {
        self.inner.write().records.mark_read(id)
    }

    pub fn mark_all_read(&self) -> Vec<String> {
        self.inner.write().records.mark_all_read()
    }

    pub fn snapshot(&self) -> Vec<Notification> {
        self.inner.read().records.list().to_vec()
    }

    pub fn get(&self, id: &str) -> Option<Notification> {
        self.inner.read().records.get(id).cloned()
    }

    pub fn unread_count(&self) -> usize {
        self.inner.read().records.unread_count()
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::domain::notification::NotificationType;

    pub(crate) fn make_notification(id: &str, recipient: &str, minute: i64) -> Notification {
        Notification {
            id: id.to_string(),
            recipient_id: recipient.to_string(),
            title: format!("title {}", id),
            message: format!("message {}", id),
            notification_type: NotificationType::OrderPlaced,
            reference_id: Some(format!("order-{}", id)),
            image_url: None,
            is_read: false,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute),
        }
    }

    fn ids(store: &NotificationStore) -> Vec<&str> {
        store.list().iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_insert_never_duplicates_ids() {
        let mut store = NotificationStore::new();
        for round in 0..3 {
            for (i, id) in ["A", "B", "C", "A", "B"].iter().enumerate() {
                store.insert(make_notification(id, "u", round * 10 + i as i64));
            }
        }

        assert_eq!(store.len(), 3);
        let mut seen = ids(&store);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_insert_prepends_newest() {
        let mut store = NotificationStore::new();
        assert_eq!(store.insert(make_notification("A", "u", 1)), InsertOutcome::Added);
        assert_eq!(store.insert(make_notification("B", "u", 2)), InsertOutcome::Added);
        assert_eq!(ids(&store), vec!["B", "A"]);
    }

    #[test]
    fn test_insert_existing_id_updates_and_resorts() {
        let mut store = NotificationStore::new();
        store.insert(make_notification("A", "u", 1));
        store.insert(make_notification("B", "u", 2));

        let mut newer = make_notification("A", "u", 5);
        newer.title = "updated".to_string();
        assert_eq!(store.insert(newer), InsertOutcome::Updated);

        assert_eq!(ids(&store), vec!["A", "B"]);
        assert_eq!(store.get("A").unwrap().title, "updated");
    }

    #[test]
    fn test_insert_does_not_revert_read_flag() {
        let mut store = NotificationStore::new();
        store.insert(make_notification("A", "u", 1));
        store.mark_read("A");

        store.insert(make_notification("A", "u", 2));

        assert!(store.get("A").unwrap().is_read);
        assert_eq!(store.unread_count(), 0);
    }

    #[test]
    fn test_unread_count_tracks_every_mutation() {
        let mut store = NotificationStore::new();
        let check = |store: &NotificationStore| {
            assert_eq!(
                store.unread_count(),
                store.list().iter().filter(|r| !r.is_read).count()
            );
        };

        store.insert(make_notification("A", "u", 1));
        check(&store);
        store.insert(make_notification("B", "u", 2));
        check(&store);
        store.mark_read("A");
        check(&store);
        store.insert(make_notification("A", "u", 3));
        check(&store);
        store.insert(make_notification("C", "u", 4));
        check(&store);
        store.mark_all_read();
        check(&store);
        store.insert(make_notification("D", "u", 5));
        check(&store);
        assert_eq!(store.unread_count(), 1);
        store.reset();
        check(&store);
    }

    #[test]
    fn test_mark_read_is_idempotent() {
        let mut once = NotificationStore::new();
        once.insert(make_notification("A", "u", 1));
        once.insert(make_notification("B", "u", 2));
        let mut twice = once.clone();

        assert_eq!(once.mark_read("B"), ReadChange::Marked);
        assert_eq!(twice.mark_read("B"), ReadChange::Marked);
        assert_eq!(twice.mark_read("B"), ReadChange::AlreadyRead);

        assert_eq!(once.list(), twice.list());
        assert_eq!(once.mark_read("missing"), ReadChange::NotFound);
    }

    #[test]
    fn test_mark_all_read_leaves_nothing_unread() {
        let mut store = NotificationStore::new();
        store.insert(make_notification("A", "u", 1));
        store.insert(make_notification("B", "u", 2));
        store.insert(make_notification("C", "u", 3));
        store.mark_read("B");

        let mut changed = store.mark_all_read();
        changed.sort();

        assert_eq!(changed, vec!["A".to_string(), "C".to_string()]);
        assert!(store.list().iter().all(|r| r.is_read));
        assert_eq!(store.len(), 3);
        assert!(store.mark_all_read().is_empty());
    }

    #[test]
    fn test_reset_empties_store() {
        let mut store = NotificationStore::new();
        store.insert(make_notification("A", "u", 1));
        store.insert(make_notification("B", "u", 2));

        store.reset();

        assert!(store.list().is_empty());
        assert_eq!(store.unread_count(), 0);
    }

    #[test]
    fn test_history_then_live_push_orders_newest_first() {
        let mut store = NotificationStore::new();
        store.replace_all(vec![
            make_notification("C", "u", 3),
            make_notification("B", "u", 2),
            make_notification("A", "u", 1),
        ]);

        store.insert(make_notification("D", "u", 4));

        assert_eq!(ids(&store), vec!["D", "C", "B", "A"]);
        assert_eq!(store.unread_count(), 4);
    }

    #[test]
    fn test_live_push_before_history_is_not_duplicated() {
        let mut store = NotificationStore::new();
        store.insert(make_notification("A", "u", 10));

        store.replace_all(vec![make_notification("A", "u", 1)]);

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("A").unwrap().created_at, make_notification("A", "u", 10).created_at);
        assert_eq!(store.unread_count(), 1);
    }

    #[test]
    fn test_live_push_before_history_is_kept() {
        let mut store = NotificationStore::new();
        store.insert(make_notification("D", "u", 4));

        store.replace_all(vec![
            make_notification("C", "u", 3),
            make_notification("B", "u", 2),
        ]);

        assert_eq!(ids(&store), vec!["D", "C", "B"]);
    }

    #[test]
    fn test_history_newer_copy_keeps_local_read_flag() {
        let mut store = NotificationStore::new();
        store.insert(make_notification("A", "u", 1));
        store.mark_read("A");

        store.replace_all(vec![make_notification("A", "u", 2)]);

        let record = store.get("A").unwrap();
        assert!(record.is_read);
        assert_eq!(record.created_at, make_notification("A", "u", 2).created_at);
    }

    #[test]
    fn test_replace_all_keeps_first_copy_of_repeated_history_id() {
        let mut store = NotificationStore::new();
        let mut history: Vec<Notification> = (0..2000)
            .rev()
            .map(|minute| make_notification(&format!("n-{}", minute), "u", minute))
            .collect();
        let mut repeated = make_notification("n-1999", "u", 0);
        repeated.title = "older duplicate".to_string();
        history.push(repeated);

        store.replace_all(history);

        assert_eq!(store.len(), 2000);
        assert_eq!(store.list()[0].id, "n-1999");
        assert_eq!(store.get("n-1999").unwrap().title, "title n-1999");
    }

    #[test]
    fn test_session_store_rejects_stale_generation() {
        let store = SessionStore::new();
        let first = store.begin_session("u1");
        assert!(store.insert(first, make_notification("A", "u1", 1)).is_some());

        store.end_session();
        assert!(store.insert(first, make_notification("B", "u1", 2)).is_none());
        assert!(store.replace_all(first, vec![make_notification("C", "u1", 3)]).is_none());
        assert!(store.is_empty());
        assert!(!store.is_current(first));
    }

    #[test]
    fn test_session_store_rejects_other_recipients() {
        let store = SessionStore::new();
        let generation = store.begin_session("u1");

        assert!(store.insert(generation, make_notification("A", "u2", 1)).is_none());
        let kept = store.replace_all(
            generation,
            vec![make_notification("B", "u1", 2), make_notification("C", "u2", 1)],
        );

        assert_eq!(kept, Some(1));
        assert_eq!(store.snapshot().len(), 1);
        assert_eq!(store.snapshot()[0].id, "B");
    }

    #[test]
    fn test_session_switch_drops_previous_user_records() {
        let store = SessionStore::new();
        let first = store.begin_session("alice");
        store.insert(first, make_notification("A", "alice", 1));
        store.insert(first, make_notification("B", "alice", 2));

        let second = store.begin_session("bob");
        store.insert(second, make_notification("C", "bob", 3));
        store.insert(first, make_notification("D", "alice", 4));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.iter().all(|r| r.recipient_id == "bob"));
        assert_eq!(store.unread_count(), 1);
    }
}
