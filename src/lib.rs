//! vchat-rust: client for the web long-poll chat protocol
//!
//! Logs an account in by QR scan (or a saved snapshot), keeps a contact cache
//! current, turns polled events into typed [`Message`]s and sends replies.
//!
//! ## Modules
//!
//! - `types` - Identities, message content, login events
//! - `store` - Contact cache and session snapshots
//! - `protocol` - Transport seam, wire structs, HTTP transport, QR rendering
//! - `client` - The [`Client`] handle; login, sync, contacts and sending hang off it
//! - `handlers` - Handler registry driven by [`Client::run`]
//! - `config` - Tunables and endpoints
//! - `state` - Session credentials and the sync cursor

pub mod protocol;
pub mod store;
pub mod types;

mod client;
mod config;
mod contacts;
mod decoder;
mod error;
mod handlers;
mod login;
mod send;
mod state;
mod sync;

#[cfg(test)]
mod testing;

pub use client::Client;
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use handlers::{HandlerId, HandlerRegistry};
pub use login::{LoginCallback, QrCallback};
pub use send::{OutgoingFile, SentFile};
pub use state::{SessionState, SyncCursor};
pub use sync::ExitCallback;

pub use protocol::{HttpTransport, Transport, Uploader};
pub use store::{ContactStore, Snapshot, SnapshotStore};
pub use types::{Chatroom, ChatroomMember, Content, ContentKind, Identity, IdentityKind, LoginState, Message, Profile};
