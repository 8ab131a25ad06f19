//! chatlog-core: conversation log core library
//!
//! Message storage with durable snapshots and change notification,
//! plus routing of user messages to a local or remote responder.

pub mod config;
pub mod error;
pub mod responder;
pub mod router;
pub mod store;

pub use config::{ChatConfig, Config, LlmConfig, StorageConfig};
pub use error::{Error, Result};
pub use responder::{
    ChatCompletionsResponder, Credential, CredentialProvider, ElizaResponder, EnvCredential,
    LocalResponder, RemoteError, RemoteResponder, StaticCredential,
};
pub use router::{Mode, ResponseRouter, Submission};
pub use store::{
    Author, ChangeEvent, MemoryBackend, Message, MessageStore, NotificationBus,
    PersistenceAdapter, SnapshotBackend, SqliteBackend, Stats, Subscription, NEVER_PERSISTED,
};
