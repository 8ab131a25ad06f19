//! Conversation storage
//!
//! The message store owns the ordered history, persists it through a
//! [`PersistenceAdapter`] and announces every change on a [`NotificationBus`].

mod backend;
mod bus;
mod messages;
mod persistence;
mod types;

pub use backend::{MemoryBackend, SnapshotBackend, SqliteBackend};
pub use bus::{NotificationBus, Subscription};
pub use messages::MessageStore;
pub use persistence::PersistenceAdapter;
pub use types::{Author, ChangeEvent, Message, NEVER_PERSISTED, Stats};
