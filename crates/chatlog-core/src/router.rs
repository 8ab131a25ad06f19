//! Response routing
//!
//! Appends each submitted user message to the store and answers it with
//! either the local responder or the remote one. Remote failures of any
//! kind are answered by the local responder instead.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::responder::{LocalResponder, RemoteError, RemoteResponder};
use crate::store::{Author, Message, MessageStore};
use crate::Error;

/// Which responder answers new submissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Local,
    Remote,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Local => f.write_str("local"),
            Mode::Remote => f.write_str("remote"),
        }
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" | "eliza" => Ok(Mode::Local),
            "remote" | "deepseek" => Ok(Mode::Remote),
            other => Err(Error::Config(format!("Unknown mode: {}", other))),
        }
    }
}

/// Outcome of [`ResponseRouter::submit`]
#[derive(Debug)]
pub enum Submission {
    /// Blank input; nothing was stored
    Ignored,
    /// Answered synchronously. `None` if the reply could not be stored.
    Done(Option<Message>),
    /// Remote call in flight; resolves to the appended bot message
    Pending(JoinHandle<Option<Message>>),
}

impl Submission {
    /// Wait for the bot reply, if any
    pub async fn reply(self) -> Option<Message> {
        match self {
            Submission::Ignored => None,
            Submission::Done(reply) => reply,
            Submission::Pending(handle) => match handle.await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!("Remote reply task failed: {}", e);
                    None
                }
            },
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Submission::Pending(_))
    }
}

/// Routes user messages to a responder.
///
/// The mode is read once per submission. Changing it, or submitting again,
/// never cancels a remote call already in flight; its reply is appended
/// whenever it resolves, after anything added in the meantime.
#[derive(Clone)]
pub struct ResponseRouter {
    store: Arc<MessageStore>,
    local: Arc<dyn LocalResponder>,
    remote: Option<Arc<dyn RemoteResponder>>,
    mode: Arc<Mutex<Mode>>,
    fallbacks: Arc<AtomicU64>,
}

impl ResponseRouter {
    /// Create a router in local mode with no remote responder
    pub fn new(store: Arc<MessageStore>, local: Arc<dyn LocalResponder>) -> Self {
        Self {
            store,
            local,
            remote: None,
            mode: Arc::new(Mutex::new(Mode::default())),
            fallbacks: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteResponder>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_mode(self, mode: Mode) -> Self {
        self.set_mode(mode);
        self
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    pub fn mode(&self) -> Mode {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Select the responder for subsequent submissions
    pub fn set_mode(&self, mode: Mode) {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner) = mode;
        info!("Response mode set to {}", mode);
    }

    /// Number of remote submissions answered by the local fallback
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    /// Store a user message and produce a reply.
    ///
    /// In remote mode the reply is produced on a spawned Tokio task.
    pub fn submit(&self, text: &str) -> Submission {
        let text = text.trim();
        if text.is_empty() {
            debug!("Ignoring blank submission");
            return Submission::Ignored;
        }

        if let Err(e) = self.store.add(text, Author::User) {
            warn!("Failed to store user message: {}", e);
            return Submission::Ignored;
        }

        match self.mode() {
            Mode::Local => Submission::Done(self.append_reply(&self.local.respond(text))),
            Mode::Remote => match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let router = self.clone();
                    let text = text.to_string();
                    Submission::Pending(
                        runtime.spawn(async move { router.complete_remote(&text).await }),
                    )
                }
                Err(_) => {
                    let error = RemoteError::Network("no async runtime".to_string());
                    Submission::Done(self.fall_back(text, &error))
                }
            },
        }
    }

    async fn complete_remote(&self, text: &str) -> Option<Message> {
        let outcome = match &self.remote {
            Some(remote) => remote.respond(text).await,
            None => Err(RemoteError::Auth("no remote responder configured".to_string())),
        };

        match outcome {
            Ok(reply) if !reply.trim().is_empty() => {
                debug!("Remote reply received");
                self.append_reply(&reply)
            }
            Ok(_) => {
                let error = RemoteError::EmptyResponse("blank reply".to_string());
                self.fall_back(text, &error)
            }
            Err(e) => self.fall_back(text, &e),
        }
    }

    /// Answer with the local responder. Nothing in the stored reply marks it
    /// as a fallback; only logs and the counter do.
    fn fall_back(&self, text: &str, error: &RemoteError) -> Option<Message> {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        warn!(
            "Remote responder failed ({}), using local fallback: {}",
            error.kind(),
            error
        );
        self.append_reply(&self.local.respond(text))
    }

    fn append_reply(&self, reply: &str) -> Option<Message> {
        match self.store.add(reply, Author::Bot) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!("Failed to store reply: {}", e);
                None
            }
        }
    }
}
