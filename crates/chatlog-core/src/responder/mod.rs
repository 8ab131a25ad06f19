//! Response producers
//!
//! A [`LocalResponder`] answers synchronously and never fails. A
//! [`RemoteResponder`] calls out over the network and may fail with a
//! [`RemoteError`].

mod credential;
mod local;
mod remote;

pub use credential::{Credential, CredentialProvider, EnvCredential, StaticCredential};
pub use local::{ElizaResponder, LocalResponder};
pub use remote::{ChatCompletionsResponder, RemoteError, RemoteResponder};
