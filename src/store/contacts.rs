//! In-memory contact cache.
//!
//! Three independent maps keyed by username. Inserting an identity removes
//! the same username from the other maps, so no username is ever listed
//! under two kinds. Group members live only inside their chatroom.

use std::collections::HashMap;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::protocol::wire::RawContact;
use crate::types::{Chatroom, ChatroomMember, Identity, IdentityKind, Profile};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactStore {
    individuals: HashMap<String, Profile>,
    broadcasts: HashMap<String, Profile>,
    chatrooms: HashMap<String, Chatroom>,
}

impl ContactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by username. Group members are rejected.
    pub fn insert(&mut self, identity: Identity) -> bool {
        let username = identity.username().to_string();
        match identity {
            Identity::Individual(profile) => {
                self.broadcasts.remove(&username);
                self.chatrooms.remove(&username);
                self.individuals.insert(username, profile);
            }
            Identity::BroadcastAccount(profile) => {
                self.individuals.remove(&username);
                self.chatrooms.remove(&username);
                self.broadcasts.insert(username, profile);
            }
            Identity::GroupChat(chatroom) => {
                self.individuals.remove(&username);
                self.broadcasts.remove(&username);
                self.chatrooms.insert(username, chatroom);
            }
            Identity::GroupMember(member) => {
                warn!(
                    target: "Client/Contacts",
                    "Refusing to store member {} outside chatroom {}",
                    member.username(),
                    member.chatroom
                );
                return false;
            }
        }
        true
    }

    /// Classify and insert a batch of wire contacts.
    pub fn apply_raw<'a>(&mut self, contacts: impl IntoIterator<Item = &'a RawContact>) {
        for raw in contacts {
            if raw.user_name.is_empty() {
                continue;
            }
            self.insert(Identity::from_raw(raw));
        }
    }

    pub fn get(&self, username: &str) -> Option<Identity> {
        if let Some(p) = self.individuals.get(username) {
            return Some(Identity::Individual(p.clone()));
        }
        if let Some(p) = self.broadcasts.get(username) {
            return Some(Identity::BroadcastAccount(p.clone()));
        }
        self.chatrooms
            .get(username)
            .map(|c| Identity::GroupChat(c.clone()))
    }

    pub fn kind_of(&self, username: &str) -> Option<IdentityKind> {
        if self.individuals.contains_key(username) {
            Some(IdentityKind::Individual)
        } else if self.broadcasts.contains_key(username) {
            Some(IdentityKind::BroadcastAccount)
        } else if self.chatrooms.contains_key(username) {
            Some(IdentityKind::GroupChat)
        } else {
            None
        }
    }

    pub fn contains(&self, username: &str) -> bool {
        self.kind_of(username).is_some()
    }

    pub fn individual(&self, username: &str) -> Option<&Profile> {
        self.individuals.get(username)
    }

    pub fn broadcast(&self, username: &str) -> Option<&Profile> {
        self.broadcasts.get(username)
    }

    pub fn chatroom(&self, username: &str) -> Option<&Chatroom> {
        self.chatrooms.get(username)
    }

    pub fn chatroom_member(&self, chatroom: &str, username: &str) -> Option<ChatroomMember> {
        self.chatrooms.get(chatroom)?.member(username).cloned()
    }

    /// Merge detailed members into a stored chatroom.
    pub fn merge_chatroom_members(&mut self, chatroom: &str, members: Vec<ChatroomMember>) -> bool {
        match self.chatrooms.get_mut(chatroom) {
            Some(room) => {
                room.merge_members(members);
                true
            }
            None => false,
        }
    }

    /// Rename an individual, keeping every other field. Returns false if unknown.
    pub fn set_alias(&mut self, username: &str, alias: &str) -> bool {
        match self.individuals.get_mut(username) {
            Some(profile) => {
                profile.remark_name = alias.to_string();
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, username: &str) -> Option<Identity> {
        if let Some(p) = self.individuals.remove(username) {
            return Some(Identity::Individual(p));
        }
        if let Some(p) = self.broadcasts.remove(username) {
            return Some(Identity::BroadcastAccount(p));
        }
        self.chatrooms.remove(username).map(Identity::GroupChat)
    }

    pub fn individuals(&self) -> impl Iterator<Item = &Profile> {
        self.individuals.values()
    }

    pub fn broadcasts(&self) -> impl Iterator<Item = &Profile> {
        self.broadcasts.values()
    }

    pub fn chatrooms(&self) -> impl Iterator<Item = &Chatroom> {
        self.chatrooms.values()
    }

    /// Identities of the given kinds accepted by `predicate`.
    /// An empty kind list searches every kind.
    pub fn search<F>(&self, kinds: &[IdentityKind], predicate: F) -> Vec<Identity>
    where
        F: Fn(&Identity) -> bool,
    {
        let wants = |kind| kinds.is_empty() || kinds.contains(&kind);
        let mut found = Vec::new();
        if wants(IdentityKind::Individual) {
            found.extend(self.individuals.values().cloned().map(Identity::Individual));
        }
        if wants(IdentityKind::BroadcastAccount) {
            found.extend(self.broadcasts.values().cloned().map(Identity::BroadcastAccount));
        }
        if wants(IdentityKind::GroupChat) {
            found.extend(self.chatrooms.values().cloned().map(Identity::GroupChat));
        }
        found.retain(|identity| predicate(identity));
        found
    }

    pub fn len(&self) -> usize {
        self.individuals.len() + self.broadcasts.len() + self.chatrooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.individuals.clear();
        self.broadcasts.clear();
        self.chatrooms.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_routes_by_kind() {
        let mut store = ContactStore::new();
        store.apply_raw(&[
            RawContact::new("@bob").with_nick_name("Bob"),
            RawContact::new("@@room").with_member(RawContact::new("@alice")),
            RawContact {
                verify_flag: 8,
                ..RawContact::new("@news")
            },
        ]);

        assert_eq!(store.len(), 3);
        assert_eq!(store.kind_of("@bob"), Some(IdentityKind::Individual));
        assert_eq!(store.kind_of("@@room"), Some(IdentityKind::GroupChat));
        assert_eq!(store.kind_of("@news"), Some(IdentityKind::BroadcastAccount));
        assert!(store.chatroom_member("@@room", "@alice").is_some());
        assert!(!store.contains("@alice"));
    }

    #[test]
    fn test_reinsert_moves_between_maps() {
        let mut store = ContactStore::new();
        store.insert(Identity::Individual(Profile::placeholder("@x")));
        store.insert(Identity::BroadcastAccount(Profile::placeholder("@x")));
        assert_eq!(store.len(), 1);
        assert_eq!(store.kind_of("@x"), Some(IdentityKind::BroadcastAccount));
    }

    #[test]
    fn test_last_write_wins() {
        let mut store = ContactStore::new();
        store.apply_raw(&[RawContact::new("@bob").with_nick_name("Old")]);
        store.apply_raw(&[RawContact::new("@bob").with_nick_name("New")]);
        assert_eq!(store.individual("@bob").unwrap().nick_name, "New");
    }

    #[test]
    fn test_group_member_rejected() {
        let mut store = ContactStore::new();
        let member = Identity::GroupMember(ChatroomMember::placeholder("@alice", "@@room"));
        assert!(!store.insert(member));
        assert!(store.is_empty());
    }

    #[test]
    fn test_set_alias_preserves_fields() {
        let mut store = ContactStore::new();
        let mut raw = RawContact::new("@bob").with_nick_name("Bob");
        raw.extra.insert("Sex".into(), serde_json::Value::from(1));
        store.apply_raw(&[raw]);

        assert!(store.set_alias("@bob", "Bobby"));
        let bob = store.individual("@bob").unwrap();
        assert_eq!(bob.remark_name, "Bobby");
        assert_eq!(bob.nick_name, "Bob");
        assert_eq!(bob.attribute("Sex"), Some(&serde_json::Value::from(1)));

        assert!(!store.set_alias("@ghost", "Nobody"));
    }

    #[test]
    fn test_merge_members() {
        let mut store = ContactStore::new();
        store.apply_raw(&[RawContact::new("@@room")]);
        let merged = store.merge_chatroom_members(
            "@@room",
            vec![ChatroomMember::placeholder("@carol", "elsewhere")],
        );
        assert!(merged);
        assert_eq!(store.chatroom_member("@@room", "@carol").unwrap().chatroom, "@@room");
        assert!(!store.merge_chatroom_members("@@none", Vec::new()));
    }

    #[test]
    fn test_search_filters_kinds() {
        let mut store = ContactStore::new();
        store.apply_raw(&[
            RawContact::new("@bob").with_nick_name("Bob"),
            RawContact::new("@@room").with_nick_name("Bob fans"),
        ]);
        let all = store.search(&[], |i| i.nick_name().contains("Bob"));
        assert_eq!(all.len(), 2);
        let rooms = store.search(&[IdentityKind::GroupChat], |i| i.nick_name().contains("Bob"));
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].username(), "@@room");
    }

    #[test]
    fn test_clear() {
        let mut store = ContactStore::new();
        store.apply_raw(&[RawContact::new("@bob")]);
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store, ContactStore::default());
    }
}
