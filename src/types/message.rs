//! Raw inbound events and decoded messages.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{ChatroomMember, Content, ContentKind, Identity, IdentityKind};

/// One undecoded inbound record from a fetch cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct RawEvent {
    pub msg_id: String,
    pub from_user_name: String,
    pub to_user_name: String,
    pub msg_type: u32,
    pub app_msg_type: u32,
    pub content: String,
    pub media_id: String,
    pub file_name: String,
    pub file_size: String,
    pub url: String,
    pub create_time: i64,
    pub status_notify_user_name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RawEvent {
    pub fn new(
        msg_id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        msg_type: u32,
        content: impl Into<String>,
    ) -> Self {
        Self {
            msg_id: msg_id.into(),
            from_user_name: from.into(),
            to_user_name: to.into(),
            msg_type,
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_app_msg_type(mut self, app_msg_type: u32) -> Self {
        self.app_msg_type = app_msg_type;
        self
    }

    pub fn with_media(mut self, media_id: impl Into<String>, file_name: impl Into<String>) -> Self {
        self.media_id = media_id.into();
        self.file_name = file_name.into();
        self
    }
}

/// A decoded message, owned by its consumer once dequeued.
#[derive(Debug, Clone)]
pub struct Message {
    pub from: Identity,
    pub to: Identity,
    pub content: Content,
    pub message_id: String,
    /// Actual sender when the message was posted inside a chatroom.
    pub chatroom_sender: Option<ChatroomMember>,
    /// Whether the account owner was mentioned. Only set for chatroom messages.
    pub is_at_me: Option<bool>,
    pub create_time: i64,
}

impl Message {
    pub fn content_kind(&self) -> ContentKind {
        self.content.kind()
    }

    /// Kind of conversation this message belongs to, used to route it to handlers.
    pub fn conversation_kind(&self) -> IdentityKind {
        let kinds = [self.from.kind(), self.to.kind()];
        if kinds
            .iter()
            .any(|k| matches!(k, IdentityKind::GroupChat | IdentityKind::GroupMember))
        {
            IdentityKind::GroupChat
        } else if kinds.contains(&IdentityKind::BroadcastAccount) {
            IdentityKind::BroadcastAccount
        } else {
            IdentityKind::Individual
        }
    }

    /// Username to reply to: the chatroom for group messages, else the other party.
    pub fn reply_target(&self, self_username: &str) -> &str {
        if let Some(room) = self.from.as_chatroom().or_else(|| self.to.as_chatroom()) {
            return room.username();
        }
        if self.from.username() == self_username {
            self.to.username()
        } else {
            self.from.username()
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Message: {} -> {}: {}>", self.from, self.to, self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chatroom, Profile};

    fn text_message(from: Identity, to: Identity) -> Message {
        Message {
            from,
            to,
            content: Content::Text { text: "hi".into() },
            message_id: "1".into(),
            chatroom_sender: None,
            is_at_me: None,
            create_time: 0,
        }
    }

    #[test]
    fn test_raw_event_deserialize() {
        let event: RawEvent = serde_json::from_str(
            r#"{"MsgId":"42","FromUserName":"@a","ToUserName":"@b","MsgType":1,"Content":"yo","CreateTime":1700000000,"ImgWidth":0}"#,
        )
        .unwrap();
        assert_eq!(event.msg_id, "42");
        assert_eq!(event.msg_type, 1);
        assert_eq!(event.create_time, 1_700_000_000);
        assert!(event.extra.contains_key("ImgWidth"));
    }

    #[test]
    fn test_conversation_kind() {
        let me = Identity::Individual(Profile::placeholder("@me"));
        let room = Identity::GroupChat(Chatroom::placeholder("@@room"));
        let news = Identity::BroadcastAccount(Profile::placeholder("@news"));

        assert_eq!(
            text_message(room.clone(), me.clone()).conversation_kind(),
            IdentityKind::GroupChat
        );
        assert_eq!(
            text_message(news, me.clone()).conversation_kind(),
            IdentityKind::BroadcastAccount
        );
        assert_eq!(
            text_message(me.clone(), Identity::placeholder("@bob")).conversation_kind(),
            IdentityKind::Individual
        );
    }

    #[test]
    fn test_reply_target() {
        let me = Identity::Individual(Profile::placeholder("@me"));
        let room = Identity::GroupChat(Chatroom::placeholder("@@room"));
        let bob = Identity::placeholder("@bob");

        assert_eq!(text_message(room, me.clone()).reply_target("@me"), "@@room");
        assert_eq!(text_message(bob.clone(), me.clone()).reply_target("@me"), "@bob");
        assert_eq!(text_message(me, bob).reply_target("@me"), "@bob");
    }
}
