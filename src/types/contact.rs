//! Identity types.
//!
//! Every addressable party is keyed by a server-issued username. Chatroom
//! usernames carry a `@@` prefix, ordinary users a single `@`, and special
//! accounts (file helper, system notices) have no prefix at all.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::protocol::wire::RawContact;

/// Prefix marking chatroom usernames.
pub const CHATROOM_PREFIX: &str = "@@";

/// `VerifyFlag` bit set on broadcast (official) accounts.
pub const BROADCAST_VERIFY_FLAG: u32 = 8;

/// Returns true if the username names a chatroom.
pub fn is_chatroom_username(username: &str) -> bool {
    username.starts_with(CHATROOM_PREFIX)
}

/// Returns true if the username names an ordinary user (single `@` prefix).
pub fn is_user_username(username: &str) -> bool {
    username.starts_with('@') && !is_chatroom_username(username)
}

/// Discriminant of [`Identity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentityKind {
    Individual,
    GroupChat,
    BroadcastAccount,
    GroupMember,
}

/// Fields shared by every identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub username: String,
    pub nick_name: String,
    /// Alias assigned by the account owner.
    pub remark_name: String,
    /// Protocol-specific attributes not modelled above.
    pub attributes: Map<String, Value>,
}

impl Profile {
    /// Minimal profile carrying only a username.
    pub fn placeholder(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }

    /// Alias if set, else nickname, else the username itself.
    pub fn display_name(&self) -> &str {
        if !self.remark_name.is_empty() {
            &self.remark_name
        } else if !self.nick_name.is_empty() {
            &self.nick_name
        } else {
            &self.username
        }
    }

    /// Look up a raw attribute.
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    fn from_raw(raw: &RawContact) -> Self {
        Self {
            username: raw.user_name.clone(),
            nick_name: raw.nick_name.clone(),
            remark_name: raw.remark_name.clone(),
            attributes: raw.extra.clone(),
        }
    }
}

/// A member as seen inside one chatroom.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatroomMember {
    pub profile: Profile,
    /// Nickname the member uses inside this chatroom.
    pub display_name: String,
    /// Username of the owning chatroom. A lookup key, not an owning link.
    pub chatroom: String,
}

impl ChatroomMember {
    pub fn placeholder(username: impl Into<String>, chatroom: impl Into<String>) -> Self {
        Self {
            profile: Profile::placeholder(username),
            display_name: String::new(),
            chatroom: chatroom.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.profile.username
    }

    /// Group nickname if set, else the member's own display name.
    pub fn group_display_name(&self) -> &str {
        if self.display_name.is_empty() {
            self.profile.display_name()
        } else {
            &self.display_name
        }
    }

    pub(crate) fn from_raw(raw: &RawContact, chatroom: &str) -> Self {
        Self {
            profile: Profile::from_raw(raw),
            display_name: raw.display_name.clone(),
            chatroom: chatroom.to_string(),
        }
    }
}

/// A chatroom together with the part of its membership known locally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chatroom {
    pub profile: Profile,
    /// Id required when fetching member details.
    pub encry_chatroom_id: Option<String>,
    /// Nickname the account owner set for itself in this chatroom.
    pub self_display_name: Option<String>,
    pub members: HashMap<String, ChatroomMember>,
}

impl Chatroom {
    pub fn placeholder(username: impl Into<String>) -> Self {
        Self {
            profile: Profile::placeholder(username),
            ..Default::default()
        }
    }

    pub fn username(&self) -> &str {
        &self.profile.username
    }

    pub fn member(&self, username: &str) -> Option<&ChatroomMember> {
        self.members.get(username)
    }

    /// Insert or replace members, rebinding them to this chatroom.
    pub fn merge_members(&mut self, members: impl IntoIterator<Item = ChatroomMember>) {
        for mut member in members {
            member.chatroom = self.profile.username.clone();
            self.members.insert(member.profile.username.clone(), member);
        }
    }

    /// Id to use when addressing members of this chatroom.
    pub fn member_lookup_id(&self) -> &str {
        self.encry_chatroom_id
            .as_deref()
            .unwrap_or(&self.profile.username)
    }

    fn from_raw(raw: &RawContact) -> Self {
        let username = raw.user_name.as_str();
        let members = raw
            .member_list
            .iter()
            .map(|m| (m.user_name.clone(), ChatroomMember::from_raw(m, username)))
            .collect();
        let self_display_name = raw
            .extra
            .get("Self")
            .and_then(|s| s.get("DisplayName"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from);
        let encry_chatroom_id = Some(raw.encry_chat_room_id.clone()).filter(|s| !s.is_empty());

        Self {
            profile: Profile::from_raw(raw),
            encry_chatroom_id,
            self_display_name,
            members,
        }
    }
}

/// Any addressable party.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Identity {
    Individual(Profile),
    GroupChat(Chatroom),
    BroadcastAccount(Profile),
    GroupMember(ChatroomMember),
}

impl Identity {
    /// Classify a wire contact: `@@` names a chatroom, the verify flag marks
    /// broadcast accounts, everything else is an individual.
    pub fn from_raw(raw: &RawContact) -> Self {
        if is_chatroom_username(&raw.user_name) {
            Identity::GroupChat(Chatroom::from_raw(raw))
        } else if raw.verify_flag & BROADCAST_VERIFY_FLAG != 0 {
            Identity::BroadcastAccount(Profile::from_raw(raw))
        } else {
            Identity::Individual(Profile::from_raw(raw))
        }
    }

    /// Minimal identity synthesised for an unknown username.
    pub fn placeholder(username: &str) -> Self {
        if is_chatroom_username(username) {
            Identity::GroupChat(Chatroom::placeholder(username))
        } else {
            Identity::Individual(Profile::placeholder(username))
        }
    }

    pub fn kind(&self) -> IdentityKind {
        match self {
            Identity::Individual(_) => IdentityKind::Individual,
            Identity::GroupChat(_) => IdentityKind::GroupChat,
            Identity::BroadcastAccount(_) => IdentityKind::BroadcastAccount,
            Identity::GroupMember(_) => IdentityKind::GroupMember,
        }
    }

    pub fn profile(&self) -> &Profile {
        match self {
            Identity::Individual(p) | Identity::BroadcastAccount(p) => p,
            Identity::GroupChat(c) => &c.profile,
            Identity::GroupMember(m) => &m.profile,
        }
    }

    pub fn username(&self) -> &str {
        &self.profile().username
    }

    pub fn nick_name(&self) -> &str {
        &self.profile().nick_name
    }

    pub fn display_name(&self) -> &str {
        match self {
            Identity::GroupMember(m) => m.group_display_name(),
            other => other.profile().display_name(),
        }
    }

    pub fn as_chatroom(&self) -> Option<&Chatroom> {
        match self {
            Identity::GroupChat(c) => Some(c),
            _ => None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.kind() {
            IdentityKind::Individual => "User",
            IdentityKind::GroupChat => "Chatroom",
            IdentityKind::BroadcastAccount => "Broadcast",
            IdentityKind::GroupMember => "Member",
        };
        write!(f, "<{} {}>", label, self.display_name())
    }
}
