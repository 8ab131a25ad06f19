//! Message store

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{SecondsFormat, Utc};
use tracing::{debug, info, warn};

use super::backend::MemoryBackend;
use super::bus::NotificationBus;
use super::persistence::PersistenceAdapter;
use super::types::{Author, ChangeEvent, ImportRecord, Message, NEVER_PERSISTED, Stats};
use crate::{Error, Result};

struct StoreState {
    messages: Vec<Message>,
    last_persisted_at: String,
    /// Highest id handed out so far
    last_id: u64,
}

impl StoreState {
    fn empty() -> Self {
        Self {
            messages: Vec::new(),
            last_persisted_at: NEVER_PERSISTED.to_string(),
            last_id: 0,
        }
    }

    fn next_id(&mut self) -> Result<u64> {
        self.last_id = next_id_after(self.last_id)?;
        Ok(self.last_id)
    }
}

/// Millisecond clock, bumped past `last_id`
fn next_id_after(last_id: u64) -> Result<u64> {
    let floor = last_id
        .checked_add(1)
        .ok_or(Error::IdsExhausted(last_id))?;
    let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
    Ok(now.max(floor))
}

/// Ordered conversation history.
///
/// Every mutation persists the full sequence and then publishes a
/// [`ChangeEvent`] before returning. Subscribers run while the store is
/// locked and must not call back into it.
pub struct MessageStore {
    state: Mutex<StoreState>,
    persistence: PersistenceAdapter,
    bus: Arc<NotificationBus>,
}

impl MessageStore {
    /// Create an empty store without reading the durable snapshot
    pub fn new(persistence: PersistenceAdapter, bus: Arc<NotificationBus>) -> Self {
        Self {
            state: Mutex::new(StoreState::empty()),
            persistence,
            bus,
        }
    }

    /// Create a store hydrated from the last durable snapshot, if any
    pub fn open(persistence: PersistenceAdapter, bus: Arc<NotificationBus>) -> Self {
        let mut state = StoreState::empty();

        let snapshot = persistence.load().filter(|messages| match check_snapshot(messages) {
            Ok(()) => true,
            Err(e) => {
                warn!("Ignoring corrupt snapshot: {}", e);
                false
            }
        });

        if let Some(messages) = snapshot {
            state.last_id = messages.iter().map(|m| m.id).max().unwrap_or(0);
            state.last_persisted_at = persistence
                .load_marker()
                .unwrap_or_else(|| NEVER_PERSISTED.to_string());
            state.messages = messages;
            info!("Restored {} messages from snapshot", state.messages.len());
        } else {
            debug!("No snapshot found, starting with an empty session");
        }

        Self {
            state: Mutex::new(state),
            persistence,
            bus,
        }
    }

    /// Create a store backed by process memory (for testing)
    pub fn in_memory() -> Self {
        Self::new(
            PersistenceAdapter::new(Arc::new(MemoryBackend::new())),
            Arc::new(NotificationBus::new()),
        )
    }

    /// Bus that receives a [`ChangeEvent`] after every mutation
    pub fn bus(&self) -> &Arc<NotificationBus> {
        &self.bus
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist, then notify. `reset_marker` is used by `clear`.
    fn commit(&self, state: &mut StoreState, reset_marker: bool) {
        if reset_marker {
            state.last_persisted_at = NEVER_PERSISTED.to_string();
            self.persistence.save(&state.messages, NEVER_PERSISTED);
        } else {
            let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
            if self.persistence.save(&state.messages, &stamp) {
                state.last_persisted_at = stamp;
            }
        }

        self.bus.publish(&ChangeEvent {
            messages: state.messages.clone(),
            last_persisted_at: state.last_persisted_at.clone(),
        });
    }

    /// Append a message
    pub fn add(&self, text: &str, author: Author) -> Result<Message> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::EmptyText);
        }

        let mut state = self.lock();
        let message = Message {
            id: state.next_id()?,
            text: text.to_string(),
            author,
            created_at: Utc::now(),
            edited: false,
        };
        state.messages.push(message.clone());
        debug!("Added message {} ({:?})", message.id, author);
        self.commit(&mut state, false);

        Ok(message)
    }

    /// Look up a message by id
    pub fn get(&self, id: u64) -> Option<Message> {
        self.lock().messages.iter().find(|m| m.id == id).cloned()
    }

    /// Copy of the conversation in order
    pub fn list(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    /// Rewrite a user message
    pub fn update(&self, id: u64, new_text: &str) -> Result<Message> {
        let new_text = new_text.trim();

        let mut state = self.lock();
        let message = state
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(Error::NotFound(id))?;

        if !message.is_user() {
            return Err(Error::NotEditable(id));
        }
        if new_text.is_empty() {
            return Err(Error::EmptyText);
        }

        message.text = new_text.to_string();
        message.edited = true;
        message.created_at = Utc::now();
        let updated = message.clone();

        debug!("Updated message {}", id);
        self.commit(&mut state, false);

        Ok(updated)
    }

    /// Remove a message if present. Persists and notifies either way.
    pub fn remove(&self, id: u64) {
        let mut state = self.lock();
        let before = state.messages.len();
        state.messages.retain(|m| m.id != id);
        if state.messages.len() == before {
            debug!("Remove of unknown message {} ignored", id);
        }
        self.commit(&mut state, false);
    }

    /// Drop the whole conversation
    pub fn clear(&self) {
        let mut state = self.lock();
        state.messages.clear();
        self.commit(&mut state, true);
        info!("Cleared conversation");
    }

    pub fn stats(&self) -> Stats {
        let state = self.lock();
        Stats {
            count: state.messages.len(),
            last_persisted_at: state.last_persisted_at.clone(),
        }
    }

    /// Serialize the conversation as a JSON array
    pub fn export_snapshot(&self) -> Result<String> {
        let state = self.lock();
        Ok(serde_json::to_string_pretty(&state.messages)?)
    }

    /// Replace the conversation with an imported snapshot.
    ///
    /// Returns `false` and leaves the store untouched if the payload is not
    /// a valid snapshot.
    pub fn import_snapshot(&self, payload: &str) -> bool {
        match self.try_import_snapshot(payload) {
            Ok(_) => true,
            Err(e) => {
                warn!("Import rejected: {}", e);
                false
            }
        }
    }

    /// Like [`import_snapshot`](Self::import_snapshot), reporting why a
    /// payload was rejected. Returns the number of imported messages.
    pub fn try_import_snapshot(&self, payload: &str) -> Result<usize> {
        let records = parse_import(payload)?;

        let mut state = self.lock();
        let now = Utc::now();
        let max_present = records.iter().filter_map(|r| r.id).max().unwrap_or(0);
        let mut last_id = state.last_id.max(max_present);

        let mut messages = Vec::with_capacity(records.len());
        for record in records {
            let id = match record.id {
                Some(id) => id,
                None => {
                    last_id = next_id_after(last_id)?;
                    last_id
                }
            };
            messages.push(Message {
                id,
                text: record.text.trim().to_string(),
                author: Author::from(record.is_user),
                created_at: record.timestamp.unwrap_or(now),
                edited: record.edited.unwrap_or(false),
            });
        }

        let count = messages.len();
        state.last_id = last_id;
        state.messages = messages;
        info!("Imported {} messages", count);
        self.commit(&mut state, false);

        Ok(count)
    }
}

fn parse_import(payload: &str) -> Result<Vec<ImportRecord>> {
    let value: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| Error::InvalidSnapshot(format!("not JSON: {}", e)))?;
    if !value.is_array() {
        return Err(Error::InvalidSnapshot("expected an array of messages".to_string()));
    }

    let records: Vec<ImportRecord> = serde_json::from_value(value)
        .map_err(|e| Error::InvalidSnapshot(format!("malformed message: {}", e)))?;

    let mut seen = HashSet::new();
    for (index, record) in records.iter().enumerate() {
        check_record(
            index,
            record.id,
            &record.text,
            record.is_user,
            record.edited.unwrap_or(false),
            &mut seen,
        )?;
    }

    if records.iter().any(|r| r.id.is_none()) && seen.contains(&u64::MAX) {
        return Err(Error::InvalidSnapshot(format!(
            "no ids left above {} for messages without one",
            u64::MAX
        )));
    }

    Ok(records)
}

/// Hydrated snapshots must satisfy the same rules as imports
fn check_snapshot(messages: &[Message]) -> Result<()> {
    let mut seen = HashSet::new();
    for (index, message) in messages.iter().enumerate() {
        check_record(
            index,
            Some(message.id),
            &message.text,
            message.is_user(),
            message.edited,
            &mut seen,
        )?;
    }
    Ok(())
}

fn check_record(
    index: usize,
    id: Option<u64>,
    text: &str,
    is_user: bool,
    edited: bool,
    seen: &mut HashSet<u64>,
) -> Result<()> {
    if text.trim().is_empty() {
        return Err(Error::InvalidSnapshot(format!("message {} has empty text", index)));
    }
    if !is_user && edited {
        return Err(Error::InvalidSnapshot(format!(
            "message {} is a bot message marked as edited",
            index
        )));
    }
    if let Some(id) = id {
        if !seen.insert(id) {
            return Err(Error::InvalidSnapshot(format!("duplicate id {}", id)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backend::{SnapshotBackend, SqliteBackend};
    use crate::store::persistence::{HISTORY_KEY, MARKER_KEY};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingBackend;

    impl SnapshotBackend for FailingBackend {
        fn write(&self, _key: &str, _value: &str) -> Result<()> {
            Err(Error::Io(std::io::Error::other("storage full")))
        }

        fn read(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }

    fn counting_store() -> (MessageStore, Arc<AtomicUsize>) {
        let store = MessageStore::in_memory();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        store.bus().subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (store, hits)
    }

    #[test]
    fn test_add_to_empty_store() {
        let store = MessageStore::in_memory();
        store.add("hello", Author::User).unwrap();

        let messages = store.list();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "hello");
        assert_eq!(messages[0].author, Author::User);
        assert!(!messages[0].edited);
        assert_eq!(store.stats().count, 1);
    }

    #[test]
    fn test_add_appends_last_with_unique_ids() {
        let store = MessageStore::in_memory();
        let mut ids = HashSet::new();
        for i in 0..20 {
            let message = store.add(&format!("  message {}  ", i), Author::Bot).unwrap();
            assert!(ids.insert(message.id));
            assert_eq!(store.list().last().unwrap().id, message.id);
            assert_eq!(message.text, format!("message {}", i));
        }

        let messages = store.list();
        assert!(messages.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn test_add_rejects_blank_text() {
        let (store, hits) = counting_store();
        assert!(matches!(store.add("   ", Author::User), Err(Error::EmptyText)));
        assert_eq!(store.stats().count, 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_list_is_independent_copy() {
        let store = MessageStore::in_memory();
        store.add("one", Author::User).unwrap();
        let snapshot = store.list();
        store.add("two", Author::Bot).unwrap();
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_get() {
        let store = MessageStore::in_memory();
        let message = store.add("find me", Author::User).unwrap();
        assert_eq!(store.get(message.id).unwrap().text, "find me");
        assert!(store.get(message.id + 1000).is_none());
    }

    #[test]
    fn test_update_user_message() {
        let store = MessageStore::in_memory();
        let original = store.add("hi", Author::User).unwrap();

        let updated = store.update(original.id, "hi there").unwrap();
        assert_eq!(updated.text, "hi there");
        assert!(updated.edited);
        assert!(updated.created_at >= original.created_at);
        assert_eq!(store.get(original.id).unwrap(), updated);
    }

    #[test]
    fn test_update_failures_leave_store_unchanged() {
        let (store, hits) = counting_store();
        let user = store.add("hi", Author::User).unwrap();
        let bot = store.add("hello", Author::Bot).unwrap();
        let before = store.list();
        let notified = hits.load(Ordering::SeqCst);

        assert!(matches!(store.update(999, "x"), Err(Error::NotFound(999))));
        assert!(matches!(store.update(bot.id, "x"), Err(Error::NotEditable(_))));
        assert!(matches!(store.update(user.id, "  "), Err(Error::EmptyText)));

        assert_eq!(store.list(), before);
        assert_eq!(hits.load(Ordering::SeqCst), notified);
    }

    #[test]
    fn test_remove() {
        let (store, hits) = counting_store();
        let first = store.add("one", Author::User).unwrap();
        store.add("two", Author::Bot).unwrap();

        store.remove(first.id);
        assert_eq!(store.stats().count, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_remove_absent_id_still_notifies() {
        let (store, hits) = counting_store();
        store.add("one", Author::User).unwrap();

        store.remove(424242);
        assert_eq!(store.stats().count, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_clear() {
        let (store, hits) = counting_store();
        for i in 0..5 {
            store.add(&format!("m{}", i), Author::User).unwrap();
        }
        assert_ne!(store.stats().last_persisted_at, NEVER_PERSISTED);
        hits.store(0, Ordering::SeqCst);

        store.clear();
        let stats = store.stats();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.last_persisted_at, NEVER_PERSISTED);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_notification_carries_committed_snapshot() {
        let store = MessageStore::in_memory();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.bus().subscribe(move |event: &ChangeEvent| {
            sink.lock().unwrap().push(event.messages.len());
        });

        store.add("a", Author::User).unwrap();
        store.add("b", Author::Bot).unwrap();
        store.clear();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 0]);
    }

    #[test]
    fn test_persistence_failure_does_not_fail_mutation() {
        let store = MessageStore::new(
            PersistenceAdapter::new(Arc::new(FailingBackend)),
            Arc::new(NotificationBus::new()),
        );

        let message = store.add("still here", Author::User).unwrap();
        assert_eq!(store.get(message.id).unwrap().text, "still here");
        assert_eq!(store.stats().last_persisted_at, NEVER_PERSISTED);
    }

    #[test]
    fn test_hydrate_from_sqlite_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.db");

        let first_id = {
            let adapter = PersistenceAdapter::new(Arc::new(SqliteBackend::new(&path).unwrap()));
            let store = MessageStore::open(adapter, Arc::new(NotificationBus::new()));
            let first = store.add("persist me", Author::User).unwrap();
            store.add("and me", Author::Bot).unwrap();
            store.update(first.id, "persisted").unwrap();
            first.id
        };

        let adapter = PersistenceAdapter::new(Arc::new(SqliteBackend::new(&path).unwrap()));
        let store = MessageStore::open(adapter, Arc::new(NotificationBus::new()));
        let messages = store.list();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, first_id);
        assert_eq!(messages[0].text, "persisted");
        assert!(messages[0].edited);
        assert_eq!(messages[1].author, Author::Bot);
        assert_ne!(store.stats().last_persisted_at, NEVER_PERSISTED);

        let next = store.add("new", Author::User).unwrap();
        assert!(messages.iter().all(|m| m.id < next.id));
    }

    #[test]
    fn test_open_without_snapshot_is_empty() {
        let adapter = PersistenceAdapter::new(Arc::new(SqliteBackend::in_memory().unwrap()));
        let store = MessageStore::open(adapter, Arc::new(NotificationBus::new()));
        let stats = store.stats();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.last_persisted_at, NEVER_PERSISTED);
    }

    #[test]
    fn test_export_import_round_trip() {
        let store = MessageStore::in_memory();
        let first = store.add("question", Author::User).unwrap();
        store.add("answer", Author::Bot).unwrap();
        store.update(first.id, "better question").unwrap();
        let original = store.list();

        let exported = store.export_snapshot().unwrap();

        let target = MessageStore::in_memory();
        target.add("to be replaced", Author::User).unwrap();
        assert!(target.import_snapshot(&exported));

        assert_eq!(target.list(), original);
    }

    #[test]
    fn test_import_fills_missing_fields() {
        let store = MessageStore::in_memory();
        let payload = r#"[
            {"id": 5, "text": "kept", "isUser": true, "timestamp": "2024-05-01T10:00:00Z", "edited": true},
            {"text": "no id", "isUser": false},
            {"text": "also no id", "isUser": true}
        ]"#;

        assert_eq!(store.try_import_snapshot(payload).unwrap(), 3);
        let messages = store.list();
        assert_eq!(messages[0].id, 5);
        assert!(messages[0].edited);
        assert_eq!(messages[0].created_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
        assert!(!messages[1].edited);
        assert!(!messages[2].edited);

        let ids: HashSet<u64> = messages.iter().map(|m| m.id).collect();
        assert_eq!(ids.len(), 3);
        assert!(messages[1].id > 5 && messages[2].id > messages[1].id);
    }

    #[test]
    fn test_import_rejects_malformed_payloads() {
        let (store, hits) = counting_store();
        store.add("keep", Author::User).unwrap();
        let before = store.list();
        let notified = hits.load(Ordering::SeqCst);

        for payload in [
            "not json",
            r#"{"text": "object, not array", "isUser": true}"#,
            r#"[{"isUser": true}]"#,
            r#"[{"text": "missing author"}]"#,
            r#"[{"text": 3, "isUser": true}]"#,
            r#"[{"text": "  ", "isUser": true}]"#,
            r#"[{"id": 1, "text": "a", "isUser": true}, {"id": 1, "text": "b", "isUser": true}]"#,
            r#"[{"text": "bot", "isUser": false, "edited": true}]"#,
        ] {
            assert!(!store.import_snapshot(payload), "accepted: {}", payload);
        }

        assert_eq!(store.list(), before);
        assert_eq!(hits.load(Ordering::SeqCst), notified);
    }

    #[test]
    fn test_import_empty_array_replaces() {
        let store = MessageStore::in_memory();
        store.add("gone", Author::User).unwrap();
        assert!(store.import_snapshot("[]"));
        assert_eq!(store.stats().count, 0);
    }

    #[test]
    fn test_snapshot_is_durable_before_notification() {
        let backend = Arc::new(MemoryBackend::new());
        let store = MessageStore::new(
            PersistenceAdapter::new(backend.clone()),
            Arc::new(NotificationBus::new()),
        );

        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&observed);
        store.bus().subscribe(move |event: &ChangeEvent| {
            let raw = backend.read(HISTORY_KEY).unwrap().unwrap();
            let persisted: Vec<Message> = serde_json::from_str(&raw).unwrap();
            let marker = backend.read(MARKER_KEY).unwrap().unwrap();
            sink.lock().unwrap().push((
                persisted == event.messages,
                marker == event.last_persisted_at,
            ));
        });

        store.add("first", Author::User).unwrap();
        store.add("second", Author::Bot).unwrap();
        store.clear();

        assert_eq!(*observed.lock().unwrap(), vec![(true, true); 3]);
    }

    #[test]
    fn test_import_without_room_for_new_ids() {
        let (store, hits) = counting_store();
        store.add("keep", Author::User).unwrap();
        let before = store.list();
        let notified = hits.load(Ordering::SeqCst);

        let payload = r#"[
            {"id": 18446744073709551615, "text": "big", "isUser": true},
            {"text": "no id", "isUser": false}
        ]"#;
        assert!(matches!(
            store.try_import_snapshot(payload),
            Err(Error::InvalidSnapshot(_))
        ));
        assert_eq!(store.list(), before);
        assert_eq!(hits.load(Ordering::SeqCst), notified);
    }

    #[test]
    fn test_add_after_max_id_import_fails() {
        let store = MessageStore::in_memory();
        assert!(store.import_snapshot(
            r#"[{"id": 18446744073709551615, "text": "big", "isUser": true}]"#
        ));

        assert!(matches!(
            store.add("next", Author::User),
            Err(Error::IdsExhausted(u64::MAX))
        ));
        assert_eq!(store.stats().count, 1);
    }

    #[test]
    fn test_add_after_max_id_hydration_fails() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .write(
                HISTORY_KEY,
                r#"[{"id": 18446744073709551615, "text": "big", "isUser": true,
                     "timestamp": "2025-01-01T00:00:00Z", "edited": false}]"#,
            )
            .unwrap();

        let store = MessageStore::open(
            PersistenceAdapter::new(backend),
            Arc::new(NotificationBus::new()),
        );
        assert_eq!(store.stats().count, 1);
        assert!(matches!(
            store.add("next", Author::Bot),
            Err(Error::IdsExhausted(_))
        ));
    }

    #[test]
    fn test_open_rejects_snapshot_breaking_store_rules() {
        let record = |id: u64, text: &str, is_user: bool, edited: bool| {
            format!(
                r#"{{"id": {}, "text": "{}", "isUser": {}, "timestamp": "2025-01-01T00:00:00Z", "edited": {}}}"#,
                id, text, is_user, edited
            )
        };

        for snapshot in [
            format!("[{}, {}]", record(1, "a", true, false), record(1, "b", false, false)),
            format!("[{}]", record(1, "  ", true, false)),
            format!("[{}]", record(1, "bot", false, true)),
        ] {
            let backend = Arc::new(MemoryBackend::new());
            backend.write(HISTORY_KEY, &snapshot).unwrap();
            backend.write(MARKER_KEY, "2025-01-01T00:00:00Z").unwrap();

            let store = MessageStore::open(
                PersistenceAdapter::new(backend),
                Arc::new(NotificationBus::new()),
            );
            let stats = store.stats();
            assert_eq!(stats.count, 0, "hydrated: {}", snapshot);
            assert_eq!(stats.last_persisted_at, NEVER_PERSISTED);
        }
    }
}
