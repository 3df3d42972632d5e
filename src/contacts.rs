//! Contact reconciliation and account-level contact operations.
//!
//! Every remote refresh replaces identities by username. The only field-level
//! merges are alias renames and detailed chatroom membership.

use std::collections::HashSet;
use std::future::Future;
use std::path::Path;

use log::{debug, info, warn};

use crate::client::Client;
use crate::error::{ClientError, ClientResult};
use crate::protocol::wire::{BatchContactRequest, RawContact};
use crate::state::SessionState;
use crate::store::ContactStore;
use crate::types::{Chatroom, ChatroomMember, Identity, IdentityKind, MediaRequest};

impl Client {
    /// Run a batched lookup, deduplicating entries and splitting them into
    /// requests of at most `batch_contact_cap` entries.
    pub(crate) async fn fetch_batched(
        &self,
        session: &SessionState,
        requests: Vec<BatchContactRequest>,
    ) -> ClientResult<Vec<RawContact>> {
        let mut seen = HashSet::new();
        let unique: Vec<BatchContactRequest> = requests
            .into_iter()
            .filter(|r| seen.insert((r.username.clone(), r.chatroom_id.clone())))
            .collect();

        let mut contacts = Vec::with_capacity(unique.len());
        for chunk in unique.chunks(self.config.batch_contact_cap.max(1)) {
            debug!(target: "Client/Contacts", "Batch lookup of {} contacts", chunk.len());
            contacts.extend(self.transport.batch_get_contacts(session, chunk).await?);
        }
        Ok(contacts)
    }

    /// Refresh chatrooms by username. With `detailed_member`, every member of
    /// each chatroom is re-fetched and merged into its membership map.
    pub async fn update_chatroom<S: AsRef<str>>(
        &self,
        usernames: &[S],
        detailed_member: bool,
    ) -> ClientResult<Vec<Chatroom>> {
        let session = self.require_login().await?;
        let requests = usernames
            .iter()
            .map(|u| BatchContactRequest::contact(u.as_ref()))
            .collect();
        let mut rooms: Vec<Chatroom> = self
            .fetch_batched(&session, requests)
            .await?
            .iter()
            .filter_map(|raw| match Identity::from_raw(raw) {
                Identity::GroupChat(room) => Some(room),
                other => {
                    warn!(target: "Client/Contacts", "Expected a chatroom, got {}", other);
                    None
                }
            })
            .collect();

        if detailed_member {
            for room in rooms.iter_mut() {
                let lookup_id = room.member_lookup_id().to_string();
                let requests = room
                    .members
                    .keys()
                    .map(|member| BatchContactRequest::member(member.as_str(), lookup_id.as_str()))
                    .collect();
                let members: Vec<ChatroomMember> = self
                    .fetch_batched(&session, requests)
                    .await?
                    .iter()
                    .map(|raw| ChatroomMember::from_raw(raw, room.username()))
                    .collect();
                room.merge_members(members);
            }
        }

        let mut store = self.contacts.write().await;
        for room in &rooms {
            store.insert(Identity::GroupChat(room.clone()));
        }
        Ok(rooms)
    }

    /// Refresh individuals or broadcast accounts by username.
    pub async fn update_friends<S: AsRef<str>>(&self, usernames: &[S]) -> ClientResult<Vec<Identity>> {
        let session = self.require_login().await?;
        let requests = usernames
            .iter()
            .map(|u| BatchContactRequest::contact(u.as_ref()))
            .collect();
        let identities: Vec<Identity> = self
            .fetch_batched(&session, requests)
            .await?
            .iter()
            .map(Identity::from_raw)
            .collect();

        let mut store = self.contacts.write().await;
        for identity in &identities {
            store.insert(identity.clone());
        }
        Ok(identities)
    }

    /// Walk the paginated contact listing until the server returns a zero seq.
    ///
    /// A network failure on a page runs `on_page_failure` and ends the walk
    /// with whatever was collected so far.
    pub(crate) async fn fetch_all_contacts<F, Fut>(&self, on_page_failure: F) -> ClientResult<Vec<RawContact>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        let session = self.require_login().await?;
        let mut contacts = Vec::new();
        let mut seq = 0;
        loop {
            match self.transport.fetch_contacts_page(&session, seq).await {
                Ok(page) => {
                    contacts.extend(page.contacts);
                    seq = page.next_seq;
                    if seq == 0 {
                        break;
                    }
                }
                Err(ClientError::Network(e)) => {
                    info!(
                        target: "Client/Contacts",
                        "Failed to fetch contact page {}, possibly too many chatrooms: {}", seq, e
                    );
                    on_page_failure().await;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(contacts)
    }

    /// Copy of the contact cache, optionally resynchronised with the server
    /// first.
    pub async fn get_contact(&self, update: bool) -> ClientResult<ContactStore> {
        if update {
            let contacts = self
                .fetch_all_contacts(|| async {
                    let rooms: Vec<String> = self
                        .contacts
                        .read()
                        .await
                        .chatrooms()
                        .map(|c| c.username().to_string())
                        .collect();
                    for room in rooms {
                        if let Err(e) = self.update_chatroom(&[room.as_str()], true).await {
                            warn!(target: "Client/Contacts", "Failed to refresh chatroom {}: {}", room, e);
                        }
                    }
                })
                .await?;
            info!(target: "Client/Contacts", "Fetched {} contacts", contacts.len());
            self.contacts.write().await.apply_raw(contacts.iter());
        }
        Ok(self.contacts().await)
    }

    /// Rename a friend locally and remotely. A friend missing from the cache
    /// is logged and skipped.
    pub async fn set_alias(&self, username: &str, alias: &str) -> ClientResult<()> {
        if self.contacts.read().await.individual(username).is_none() {
            warn!(target: "Client/Contacts", "No local record of {}, alias not set", username);
            return Ok(());
        }
        let session = self.require_login().await?;
        self.transport.set_alias(&session, username, alias).await?;
        self.contacts.write().await.set_alias(username, alias);
        Ok(())
    }

    pub async fn set_pinned(&self, username: &str, pinned: bool) -> ClientResult<()> {
        let session = self.require_login().await?;
        self.transport.set_pinned(&session, username, pinned).await
    }

    /// Accept a friend request, then refresh the new friend when `auto_update`.
    pub async fn accept_friend(&self, username: &str, ticket: &str, auto_update: bool) -> ClientResult<()> {
        let session = self.require_login().await?;
        self.transport.accept_friend(&session, username, ticket).await?;
        if auto_update {
            self.update_friends(&[username]).await?;
        }
        Ok(())
    }

    /// Create a chatroom, returning its username when the server reports one.
    pub async fn create_chatroom(&self, members: &[String], topic: &str) -> ClientResult<Option<String>> {
        let session = self.require_login().await?;
        self.transport.create_chatroom(&session, members, topic).await
    }

    pub async fn set_chatroom_name(&self, chatroom: &str, name: &str) -> ClientResult<()> {
        let session = self.require_login().await?;
        self.transport.rename_chatroom(&session, chatroom, name).await
    }

    pub async fn delete_member_from_chatroom(&self, chatroom: &str, members: &[String]) -> ClientResult<()> {
        let session = self.require_login().await?;
        self.transport
            .delete_chatroom_members(&session, chatroom, members)
            .await
    }

    /// Add members to a chatroom. Chatrooms larger than the session's
    /// invitation threshold only accept invitations, so those are forced.
    pub async fn add_member_into_chatroom(
        &self,
        chatroom: &str,
        members: &[String],
        use_invitation: bool,
    ) -> ClientResult<()> {
        let session = self.require_login().await?;
        let mut invite = use_invitation;
        if !invite {
            let cached = self.contacts.read().await.chatroom(chatroom).cloned();
            let room = match cached {
                Some(room) => Some(room),
                None => self.update_chatroom(&[chatroom], false).await?.into_iter().next(),
            };
            let member_count = room.map(|r| r.members.len()).unwrap_or(0);
            if member_count > session.invite_start_count as usize {
                debug!(
                    target: "Client/Contacts",
                    "Chatroom {} has {} members, forcing invitation", chatroom, member_count
                );
                invite = true;
            }
        }

        if invite {
            self.transport
                .invite_chatroom_members(&session, chatroom, members)
                .await
        } else {
            self.transport
                .add_chatroom_members(&session, chatroom, members)
                .await
        }
    }

    /// Search the cache. An empty `kinds` slice searches every kind.
    pub async fn search_contacts<F>(&self, kinds: &[IdentityKind], predicate: F) -> Vec<Identity>
    where
        F: Fn(&Identity) -> bool,
    {
        self.contacts.read().await.search(kinds, predicate)
    }

    pub async fn search_friends_by_nickname(&self, nick_name: &str) -> Vec<Identity> {
        self.search_contacts(&[IdentityKind::Individual], |i| i.nick_name().contains(nick_name))
            .await
    }

    pub async fn search_chatrooms_by_nickname(&self, nick_name: &str) -> Vec<Identity> {
        self.search_contacts(&[IdentityKind::GroupChat], |i| i.nick_name().contains(nick_name))
            .await
    }

    /// Download a head image. Give `username` for a friend, `chatroom` for a
    /// chatroom, or both for a chatroom member.
    pub async fn get_head_image(&self, username: Option<&str>, chatroom: Option<&str>) -> ClientResult<Vec<u8>> {
        let request = match (username, chatroom) {
            (None, None) => {
                return Err(ClientError::MalformedParameter(
                    "must specify whose head image to get".into(),
                ))
            }
            (Some(username), None) => {
                if !self.contacts.read().await.contains(username) {
                    return Err(ClientError::MalformedParameter(format!("no such friend: {}", username)));
                }
                MediaRequest::UserHeadImage {
                    username: username.to_string(),
                }
            }
            (None, Some(chatroom)) => MediaRequest::ChatroomHeadImage {
                chatroom: chatroom.to_string(),
            },
            (Some(username), Some(chatroom)) => {
                let chatroom_id = self
                    .contacts
                    .read()
                    .await
                    .chatroom(chatroom)
                    .map(|room| room.member_lookup_id().to_string())
                    .unwrap_or_else(|| chatroom.to_string());
                MediaRequest::MemberHeadImage {
                    username: username.to_string(),
                    chatroom_id,
                }
            }
        };
        let session = self.require_login().await?;
        self.transport.download(&session, &request).await
    }

    /// Download a head image straight into a file.
    pub async fn save_head_image(
        &self,
        username: Option<&str>,
        chatroom: Option<&str>,
        path: impl AsRef<Path>,
    ) -> ClientResult<()> {
        let bytes = self.get_head_image(username, chatroom).await?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }
}
