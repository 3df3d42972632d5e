//! Abstract transport the client drives.
//!
//! The client only depends on this trait; [`super::http::HttpTransport`] is
//! the production implementation and tests substitute a scripted one.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::ClientResult;
use crate::protocol::wire::{BatchContactRequest, ContactPage, InitData, RawContact, ScanStatus, SyncBatch};
use crate::state::SessionState;
use crate::types::{msg_type, MediaRequest};

/// Outbound message body, addressed by username.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Text { to: String, text: String },
    Image { to: String, media_id: String },
    Emoticon { to: String, media_id: String },
    Video { to: String, media_id: String },
    File {
        to: String,
        media_id: String,
        file_name: String,
        file_size: u64,
    },
}

impl OutboundMessage {
    pub fn to(&self) -> &str {
        match self {
            OutboundMessage::Text { to, .. }
            | OutboundMessage::Image { to, .. }
            | OutboundMessage::Emoticon { to, .. }
            | OutboundMessage::Video { to, .. }
            | OutboundMessage::File { to, .. } => to,
        }
    }

    /// Message type code placed in the request body.
    pub fn msg_type(&self) -> u32 {
        match self {
            OutboundMessage::Text { .. } => msg_type::TEXT,
            OutboundMessage::Image { .. } => msg_type::IMAGE,
            OutboundMessage::Emoticon { .. } => msg_type::EMOTICON,
            OutboundMessage::Video { .. } => msg_type::VIDEO,
            OutboundMessage::File { .. } => crate::types::app_msg_type::ATTACHMENT,
        }
    }
}

/// Result of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedMedia {
    pub media_id: String,
    pub size: u64,
}

/// External upload collaborator: bytes in, media id out.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, file_name: &str, bytes: Vec<u8>, to: &str) -> ClientResult<UploadedMedia>;
}

/// Every network operation the client performs.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Ask the login host for a fresh correlation id.
    async fn request_uuid(&self) -> ClientResult<String>;

    /// Ask for a correlation id bound to a remembered account, if any.
    async fn push_login(&self, session: &SessionState) -> ClientResult<Option<String>>;

    /// Poll scan status for `uuid`.
    async fn check_scan(&self, uuid: &str) -> ClientResult<ScanStatus>;

    /// Turn the success payload of a scan into session credentials.
    async fn establish_session(&self, redirect_payload: &str) -> ClientResult<SessionState>;

    async fn web_init(&self, session: &SessionState) -> ClientResult<InitData>;

    async fn status_notify(&self, session: &SessionState) -> ClientResult<()>;

    /// Lightweight poll. `None` means the server considers the session gone;
    /// `Some("0")` is a heartbeat and anything else announces pending events.
    async fn poll(&self, session: &SessionState) -> ClientResult<Option<String>>;

    /// Fetch pending events using the session's cursor.
    async fn fetch_events(&self, session: &SessionState) -> ClientResult<SyncBatch>;

    async fn fetch_contacts_page(&self, session: &SessionState, seq: u64) -> ClientResult<ContactPage>;

    async fn batch_get_contacts(
        &self,
        session: &SessionState,
        requests: &[BatchContactRequest],
    ) -> ClientResult<Vec<RawContact>>;

    async fn set_alias(&self, session: &SessionState, username: &str, alias: &str) -> ClientResult<()>;

    async fn set_pinned(&self, session: &SessionState, username: &str, pinned: bool) -> ClientResult<()>;

    async fn accept_friend(&self, session: &SessionState, username: &str, ticket: &str) -> ClientResult<()>;

    /// Create a chatroom, returning its username when the server reports one.
    async fn create_chatroom(
        &self,
        session: &SessionState,
        members: &[String],
        topic: &str,
    ) -> ClientResult<Option<String>>;

    async fn rename_chatroom(&self, session: &SessionState, chatroom: &str, name: &str) -> ClientResult<()>;

    async fn delete_chatroom_members(
        &self,
        session: &SessionState,
        chatroom: &str,
        members: &[String],
    ) -> ClientResult<()>;

    async fn add_chatroom_members(
        &self,
        session: &SessionState,
        chatroom: &str,
        members: &[String],
    ) -> ClientResult<()>;

    async fn invite_chatroom_members(
        &self,
        session: &SessionState,
        chatroom: &str,
        members: &[String],
    ) -> ClientResult<()>;

    /// Send a message, returning its client-side id.
    async fn send(&self, session: &SessionState, message: &OutboundMessage) -> ClientResult<String>;

    async fn revoke(
        &self,
        session: &SessionState,
        msg_id: &str,
        to: &str,
        local_id: Option<&str>,
    ) -> ClientResult<()>;

    async fn download(&self, session: &SessionState, request: &MediaRequest) -> ClientResult<Vec<u8>>;

    async fn logout(&self, session: &SessionState) -> ClientResult<()>;

    /// Cookies to persist alongside a snapshot.
    fn export_cookies(&self) -> BTreeMap<String, String>;

    fn import_cookies(&self, cookies: BTreeMap<String, String>);

    fn clear_cookies(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_type_codes() {
        let file = OutboundMessage::File {
            to: "@bob".into(),
            media_id: "m".into(),
            file_name: "a.txt".into(),
            file_size: 3,
        };
        assert_eq!(file.msg_type(), 6);
        assert_eq!(file.to(), "@bob");
        let gif = OutboundMessage::Emoticon {
            to: "@bob".into(),
            media_id: "m".into(),
        };
        assert_eq!(gif.msg_type(), 47);
    }
}
