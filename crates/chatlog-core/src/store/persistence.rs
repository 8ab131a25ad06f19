//! Best-effort snapshot persistence

use std::sync::Arc;

use tracing::{debug, error, warn};

use super::backend::SnapshotBackend;
use super::types::Message;

pub(crate) const HISTORY_KEY: &str = "chatHistory";
pub(crate) const MARKER_KEY: &str = "lastSaved";

/// Saves and loads message snapshots without ever failing the caller.
///
/// Write failures are logged and reported as `false`; unreadable or corrupt
/// snapshots load as `None`.
#[derive(Clone)]
pub struct PersistenceAdapter {
    backend: Arc<dyn SnapshotBackend>,
}

impl PersistenceAdapter {
    pub fn new(backend: Arc<dyn SnapshotBackend>) -> Self {
        Self { backend }
    }

    /// Persist the full message sequence together with the last-saved
    /// marker, as one write. Returns whether the write succeeded.
    pub fn save(&self, messages: &[Message], marker: &str) -> bool {
        let snapshot = match serde_json::to_string(messages) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Failed to serialize snapshot: {}", e);
                return false;
            }
        };

        match self
            .backend
            .write_many(&[(HISTORY_KEY, snapshot.as_str()), (MARKER_KEY, marker)])
        {
            Ok(()) => {
                debug!("Persisted {} messages", messages.len());
                true
            }
            Err(e) => {
                error!("Failed to persist snapshot: {}", e);
                false
            }
        }
    }

    /// Load the last durable snapshot
    pub fn load(&self) -> Option<Vec<Message>> {
        let raw = match self.backend.read(HISTORY_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                error!("Failed to read snapshot: {}", e);
                return None;
            }
        };

        match serde_json::from_str::<Vec<Message>>(&raw) {
            Ok(messages) => Some(messages),
            Err(e) => {
                warn!("Ignoring corrupt snapshot: {}", e);
                None
            }
        }
    }

    /// Load the last-saved marker
    pub fn load_marker(&self) -> Option<String> {
        match self.backend.read(MARKER_KEY) {
            Ok(marker) => marker,
            Err(e) => {
                error!("Failed to read last-saved marker: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backend::MemoryBackend;
    use crate::store::types::Author;
    use crate::{Error, Result};
    use chrono::Utc;

    struct BrokenBackend;

    impl SnapshotBackend for BrokenBackend {
        fn write(&self, _key: &str, _value: &str) -> Result<()> {
            Err(Error::Io(std::io::Error::other("quota exceeded")))
        }

        fn read(&self, _key: &str) -> Result<Option<String>> {
            Err(Error::Io(std::io::Error::other("unavailable")))
        }
    }

    fn message(id: u64, text: &str) -> Message {
        Message {
            id,
            text: text.to_string(),
            author: Author::User,
            created_at: Utc::now(),
            edited: false,
        }
    }

    #[test]
    fn test_save_and_load() {
        let adapter = PersistenceAdapter::new(Arc::new(MemoryBackend::new()));
        assert!(adapter.load().is_none());

        assert!(adapter.save(&[message(1, "a"), message(2, "b")], "2025-03-04T05:06:07Z"));
        let loaded = adapter.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].text, "b");
        assert_eq!(adapter.load_marker().as_deref(), Some("2025-03-04T05:06:07Z"));
    }

    #[test]
    fn test_corrupt_snapshot_loads_as_none() {
        let backend = Arc::new(MemoryBackend::new());
        backend.write(HISTORY_KEY, "{not json").unwrap();

        let adapter = PersistenceAdapter::new(backend);
        assert!(adapter.load().is_none());
    }

    #[test]
    fn test_failures_are_swallowed() {
        let adapter = PersistenceAdapter::new(Arc::new(BrokenBackend));
        assert!(!adapter.save(&[message(1, "a")], "Never"));
        assert!(adapter.load().is_none());
        assert!(adapter.load_marker().is_none());
    }
}
