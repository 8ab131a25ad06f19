//! Message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marker reported before the first successful persist
pub const NEVER_PERSISTED: &str = "Never";

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Author {
    User,
    Bot,
}

impl Author {
    pub fn is_user(self) -> bool {
        matches!(self, Author::User)
    }
}

impl From<bool> for Author {
    fn from(is_user: bool) -> Self {
        if is_user { Author::User } else { Author::Bot }
    }
}

/// One turn in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "MessageRecord", into = "MessageRecord")]
pub struct Message {
    /// Unique, increasing message identifier
    pub id: u64,
    /// Trimmed, non-empty content
    pub text: String,
    pub author: Author,
    /// Creation time, or time of the last edit
    pub created_at: DateTime<Utc>,
    /// Set once a user message has been modified
    pub edited: bool,
}

impl Message {
    pub fn is_user(&self) -> bool {
        self.author.is_user()
    }
}

/// Wire form of a message in snapshots
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessageRecord {
    id: u64,
    text: String,
    is_user: bool,
    timestamp: DateTime<Utc>,
    edited: bool,
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: record.id,
            text: record.text,
            author: Author::from(record.is_user),
            created_at: record.timestamp,
            edited: record.edited,
        }
    }
}

impl From<Message> for MessageRecord {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            text: message.text,
            is_user: message.author.is_user(),
            timestamp: message.created_at,
            edited: message.edited,
        }
    }
}

/// Import form of a message: `id`, `timestamp` and `edited` may be absent
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ImportRecord {
    #[serde(default)]
    pub id: Option<u64>,
    pub text: String,
    pub is_user: bool,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub edited: Option<bool>,
}

/// Store statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    pub count: usize,
    /// RFC 3339 time of the last successful persist, or [`NEVER_PERSISTED`]
    pub last_persisted_at: String,
}

/// Published after every store mutation, carrying the committed state
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub messages: Vec<Message>,
    pub last_persisted_at: String,
}
