//! Resolution of raw events into [`Message`]s.
//!
//! Decoding never fails. Unknown parties become placeholder identities and
//! unknown payloads become [`Content::Default`].

use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;

use crate::client::Client;
use crate::protocol::format::format_message_text;
use crate::types::{
    is_chatroom_username, Chatroom, ChatroomMember, Content, Identity, Message, Profile, RawEvent,
};

lazy_static! {
    /// `@sender:<br/>body`, prefixed by the server to messages posted in chatrooms.
    static ref GROUP_MARKER_RE: Regex =
        Regex::new(r"(?s)^(@[0-9a-z]*?):<br/>(.*)$").expect("valid group marker regex");
}

/// Narrow no-break space some clients put after a mention.
const MENTION_SEPARATOR: char = '\u{2005}';

/// Direction of an event relative to the account owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AddressCase {
    SelfToGroup,
    SelfToUser,
    SelfToSpecial,
    GroupToSelf,
    UserToSelf,
    SpecialToSelf,
    Unknown,
}

/// Match `from`/`to` against the owner. Checked in order, first match wins.
pub(crate) fn classify(from: &str, to: &str, me: &str) -> AddressCase {
    if from == me {
        if is_chatroom_username(to) {
            AddressCase::SelfToGroup
        } else if to.starts_with('@') {
            AddressCase::SelfToUser
        } else {
            AddressCase::SelfToSpecial
        }
    } else if to == me {
        if is_chatroom_username(from) {
            AddressCase::GroupToSelf
        } else if from.starts_with('@') {
            AddressCase::UserToSelf
        } else {
            AddressCase::SpecialToSelf
        }
    } else {
        AddressCase::Unknown
    }
}

/// Split a chatroom body into sender id and the remaining text.
pub(crate) fn split_group_marker(body: &str) -> Option<(String, String)> {
    GROUP_MARKER_RE
        .captures(body)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
}

/// Whether `body` mentions `name`: `@name` followed by a space or the narrow
/// separator, or `@name` at the very end.
pub(crate) fn is_mentioned(body: &str, name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    let flag = format!("@{}", name);
    body.contains(&format!("{}{}", flag, MENTION_SEPARATOR))
        || body.contains(&format!("{} ", flag))
        || body.ends_with(&flag)
}

impl Client {
    /// Decode one raw event. Chatroom events may trigger a membership refresh.
    pub(crate) async fn decode_event(&self, mut event: RawEvent) -> Message {
        let me = self.session.read().await.self_username().to_string();
        let case = classify(&event.from_user_name, &event.to_user_name, &me);

        let chatroom = match case {
            AddressCase::SelfToGroup => Some(event.to_user_name.clone()),
            AddressCase::GroupToSelf => Some(event.from_user_name.clone()),
            _ => None,
        };

        // Marker stripping and mention detection see the raw body; names are
        // stored raw too. Formatting comes last.
        let sender_id = match &chatroom {
            Some(_) => match split_group_marker(&event.content) {
                Some((sender, body)) => {
                    event.content = body;
                    Some(sender)
                }
                None if event.from_user_name == me => Some(me.clone()),
                None => {
                    debug!(
                        target: "Client/Decoder",
                        "Chatroom message {} carries no sender marker", event.msg_id
                    );
                    None
                }
            },
            None => None,
        };

        let mut chatroom_sender = None;
        let mut is_at_me = None;
        let (from, to) = match (case, chatroom) {
            (AddressCase::SelfToGroup, Some(room_name)) | (AddressCase::GroupToSelf, Some(room_name)) => {
                let room = self.ensure_chatroom(&room_name).await;
                let room = match &sender_id {
                    Some(sender) => {
                        let (room, member, mentioned) = self.resolve_sender(room, sender, &event.content).await;
                        chatroom_sender = Some(member);
                        is_at_me = Some(mentioned);
                        room
                    }
                    None => room,
                };
                let own_record = Identity::GroupMember(self.own_member_record(&room).await);
                let room = Identity::GroupChat(room);
                if case == AddressCase::SelfToGroup {
                    (own_record, room)
                } else {
                    (room, own_record)
                }
            }
            (AddressCase::SelfToUser, _) | (AddressCase::SelfToSpecial, _) => {
                (self.self_identity().await, self.lookup_identity(&event.to_user_name).await)
            }
            (AddressCase::UserToSelf, _) | (AddressCase::SpecialToSelf, _) => {
                (self.lookup_identity(&event.from_user_name).await, self.self_identity().await)
            }
            _ => {
                warn!(
                    target: "Client/Decoder",
                    "Unknown address case for message {}: {} -> {}",
                    event.msg_id, event.from_user_name, event.to_user_name
                );
                (
                    self.lookup_identity(&event.from_user_name).await,
                    self.lookup_identity(&event.to_user_name).await,
                )
            }
        };

        event.content = format_message_text(&event.content);
        let content = Content::from_event(&event, &self.downloader);
        Message {
            from,
            to,
            content,
            message_id: event.msg_id,
            chatroom_sender,
            is_at_me,
            create_time: event.create_time,
        }
    }

    /// Cached chatroom, fetched once if unknown. Falls back to a placeholder.
    async fn ensure_chatroom(&self, username: &str) -> Chatroom {
        if let Some(room) = self.contacts.read().await.chatroom(username) {
            return room.clone();
        }
        let fetched = match self.update_chatroom(&[username], false).await {
            Ok(rooms) => rooms.into_iter().next(),
            Err(e) => {
                warn!(target: "Client/Decoder", "Failed to load chatroom {}: {}", username, e);
                None
            }
        };
        fetched.unwrap_or_else(|| Chatroom::placeholder(username))
    }

    /// Find the sender inside `room`, refreshing the membership once when the
    /// sender is unknown, and check whether the owner was mentioned.
    async fn resolve_sender(&self, room: Chatroom, sender: &str, body: &str) -> (Chatroom, ChatroomMember, bool) {
        let mut room = room;
        if room.member(sender).is_none() {
            let username = room.username().to_string();
            match self.update_chatroom(&[username.as_str()], true).await {
                Ok(rooms) => {
                    if let Some(refreshed) = rooms.into_iter().next() {
                        room = refreshed;
                    }
                }
                Err(e) => {
                    warn!(target: "Client/Decoder", "Failed to refresh members of {}: {}", username, e);
                }
            }
        }

        match room.member(sender).cloned() {
            Some(member) => {
                let name = self.mention_name(&room).await;
                let mentioned = is_mentioned(body, &name);
                (room, member, mentioned)
            }
            None => {
                debug!(
                    target: "Client/Decoder",
                    "Member {} still unknown in {} after refresh", sender, room.username()
                );
                let member = ChatroomMember::placeholder(sender, room.username());
                (room, member, false)
            }
        }
    }

    /// Name others use to mention the owner: the chatroom nickname if set,
    /// else the global nickname.
    async fn mention_name(&self, room: &Chatroom) -> String {
        match &room.self_display_name {
            Some(name) => name.clone(),
            None => self
                .session
                .read()
                .await
                .user
                .as_ref()
                .map(|u| u.nick_name.clone())
                .unwrap_or_default(),
        }
    }

    async fn own_profile(&self) -> Profile {
        let session = self.session.read().await;
        session
            .user
            .clone()
            .unwrap_or_else(|| Profile::placeholder(session.self_username()))
    }

    async fn self_identity(&self) -> Identity {
        let me = self.own_profile().await;
        self.contacts
            .read()
            .await
            .get(&me.username)
            .unwrap_or(Identity::Individual(me))
    }

    /// The owner as a member of `room`.
    async fn own_member_record(&self, room: &Chatroom) -> ChatroomMember {
        let me = self.own_profile().await;
        room.member(&me.username).cloned().unwrap_or_else(|| ChatroomMember {
            display_name: room.self_display_name.clone().unwrap_or_default(),
            chatroom: room.username().to_string(),
            profile: me,
        })
    }

    async fn lookup_identity(&self, username: &str) -> Identity {
        self.contacts
            .read()
            .await
            .get(username)
            .unwrap_or_else(|| Identity::placeholder(username))
    }
}
