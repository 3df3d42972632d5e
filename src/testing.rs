//! Scripted transport and fixtures for unit tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use crate::client::Client;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::protocol::transport::{OutboundMessage, Transport, UploadedMedia, Uploader};
use crate::protocol::wire::{BatchContactRequest, ContactPage, InitData, RawContact, ScanStatus, SyncBatch};
use crate::state::{SessionState, SyncCursor};
use crate::types::{Identity, LoginState, MediaRequest, Profile};

/// Transport replaying scripted replies and recording every call.
#[derive(Default)]
pub(crate) struct MockTransport {
    pub uuids: Mutex<VecDeque<String>>,
    pub push_uuid: Mutex<Option<String>>,
    pub scan_script: Mutex<VecDeque<ClientResult<String>>>,
    pub establish_script: Mutex<VecDeque<ClientResult<SessionState>>>,
    pub init: Mutex<Option<InitData>>,
    /// Poll replies; an exhausted script reports the session gone.
    pub poll_script: Mutex<VecDeque<ClientResult<Option<String>>>>,
    /// Fetch replies; an exhausted script yields an empty batch.
    pub fetch_script: Mutex<VecDeque<ClientResult<SyncBatch>>>,
    pub contact_pages: Mutex<VecDeque<ClientResult<ContactPage>>>,
    /// Contacts served by batched lookups, keyed by username.
    pub directory: Mutex<HashMap<String, RawContact>>,
    pub batch_requests: Mutex<Vec<Vec<BatchContactRequest>>>,
    pub sent: Mutex<Vec<OutboundMessage>>,
    pub membership_changes: Mutex<Vec<(String, String, Vec<String>)>>,
    pub downloaded: Mutex<Vec<MediaRequest>>,
    pub fail_logout: Mutex<bool>,
    pub calls: Mutex<Vec<&'static str>>,
    pub cookies: Mutex<BTreeMap<String, String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, name: &'static str) {
        self.calls.lock().unwrap().push(name);
    }

    pub fn calls_named(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == name).count()
    }

    pub fn call_log(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn script_scans(&self, codes: &[&str]) {
        let mut script = self.scan_script.lock().unwrap();
        script.extend(codes.iter().map(|c| Ok(c.to_string())));
    }

    pub fn script_polls(&self, replies: Vec<ClientResult<Option<String>>>) {
        self.poll_script.lock().unwrap().extend(replies);
    }

    pub fn script_fetches(&self, replies: Vec<ClientResult<SyncBatch>>) {
        self.fetch_script.lock().unwrap().extend(replies);
    }

    pub fn script_pages(&self, pages: Vec<ClientResult<ContactPage>>) {
        self.contact_pages.lock().unwrap().extend(pages);
    }

    pub fn add_to_directory(&self, contact: RawContact) {
        self.directory
            .lock()
            .unwrap()
            .insert(contact.user_name.clone(), contact);
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_requests.lock().unwrap().iter().map(Vec::len).collect()
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn downloads(&self) -> Vec<MediaRequest> {
        self.downloaded.lock().unwrap().clone()
    }
}

/// Session state as it looks right after a successful login.
pub(crate) fn authenticated_session() -> SessionState {
    SessionState {
        base_url: Some("https://wx2.qq.com/cgi-bin/mmwebwx-bin".into()),
        file_url: Some("https://file.wx2.qq.com/cgi-bin/mmwebwx-bin".into()),
        sync_url: Some("https://webpush.wx2.qq.com/cgi-bin/mmwebwx-bin".into()),
        device_id: "e000000000000001".into(),
        skey: "@crypt_test".into(),
        wxsid: "sid".into(),
        wxuin: "1".into(),
        pass_ticket: "ticket".into(),
        cursor: SyncCursor::new(json!({"Count": 1, "List": [{"Key": 1, "Val": 1}]}), "1_1"),
        invite_start_count: 40,
        user: Some(Profile {
            nick_name: "Me".into(),
            ..Profile::placeholder("@me")
        }),
        ..Default::default()
    }
}

/// A client that already holds an authenticated session.
pub(crate) async fn logged_in_client(transport: Arc<MockTransport>) -> Client {
    let client = Client::new(ClientConfig::immediate(), transport.clone());
    let session = authenticated_session();
    if let Some(me) = session.user.clone() {
        client.contacts.write().await.insert(Identity::Individual(me));
    }
    *client.session.write().await = session;
    transport
        .cookies
        .lock()
        .unwrap()
        .insert("wxuin".into(), "1".into());
    client.set_login_state(LoginState::Authenticated).await;
    client
}

#[async_trait]
impl Transport for MockTransport {
    async fn request_uuid(&self) -> ClientResult<String> {
        self.record("request_uuid");
        let mut uuids = self.uuids.lock().unwrap();
        let issued = self.calls_named("request_uuid");
        Ok(uuids.pop_front().unwrap_or_else(|| format!("uuid-{}", issued)))
    }

    async fn push_login(&self, _session: &SessionState) -> ClientResult<Option<String>> {
        self.record("push_login");
        Ok(self.push_uuid.lock().unwrap().take())
    }

    async fn check_scan(&self, uuid: &str) -> ClientResult<ScanStatus> {
        self.record("check_scan");
        let code = self
            .scan_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("408".to_string()))?;
        Ok(ScanStatus {
            body: format!("window.code={};payload-for-{}", code, uuid),
            code,
        })
    }

    async fn establish_session(&self, _redirect_payload: &str) -> ClientResult<SessionState> {
        self.record("establish_session");
        match self.establish_script.lock().unwrap().pop_front() {
            Some(result) => result,
            None => {
                let mut session = authenticated_session();
                session.user = None;
                session.cursor = SyncCursor::default();
                Ok(session)
            }
        }
    }

    async fn web_init(&self, _session: &SessionState) -> ClientResult<InitData> {
        self.record("web_init");
        Ok(self.init.lock().unwrap().clone().unwrap_or_else(|| InitData {
            user: RawContact::new("@me").with_nick_name("Me"),
            cursor: SyncCursor::new(json!({"Count": 1, "List": [{"Key": 1, "Val": 2}]}), "1_2"),
            invite_start_count: 40,
            contacts: vec![RawContact::new("@bob").with_nick_name("Bob")],
        }))
    }

    async fn status_notify(&self, _session: &SessionState) -> ClientResult<()> {
        self.record("status_notify");
        Ok(())
    }

    async fn poll(&self, _session: &SessionState) -> ClientResult<Option<String>> {
        self.record("poll");
        self.poll_script.lock().unwrap().pop_front().unwrap_or(Ok(None))
    }

    async fn fetch_events(&self, _session: &SessionState) -> ClientResult<SyncBatch> {
        self.record("fetch_events");
        self.fetch_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(SyncBatch::default()))
    }

    async fn fetch_contacts_page(&self, _session: &SessionState, _seq: u64) -> ClientResult<ContactPage> {
        self.record("fetch_contacts_page");
        self.contact_pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ContactPage::default()))
    }

    async fn batch_get_contacts(
        &self,
        _session: &SessionState,
        requests: &[BatchContactRequest],
    ) -> ClientResult<Vec<RawContact>> {
        self.record("batch_get_contacts");
        self.batch_requests.lock().unwrap().push(requests.to_vec());
        let directory = self.directory.lock().unwrap();
        Ok(requests
            .iter()
            .map(|r| {
                directory
                    .get(&r.username)
                    .cloned()
                    .unwrap_or_else(|| RawContact::new(r.username.clone()))
            })
            .collect())
    }

    async fn set_alias(&self, _session: &SessionState, _username: &str, _alias: &str) -> ClientResult<()> {
        self.record("set_alias");
        Ok(())
    }

    async fn set_pinned(&self, _session: &SessionState, _username: &str, _pinned: bool) -> ClientResult<()> {
        self.record("set_pinned");
        Ok(())
    }

    async fn accept_friend(&self, _session: &SessionState, _username: &str, _ticket: &str) -> ClientResult<()> {
        self.record("accept_friend");
        Ok(())
    }

    async fn create_chatroom(
        &self,
        _session: &SessionState,
        _members: &[String],
        _topic: &str,
    ) -> ClientResult<Option<String>> {
        self.record("create_chatroom");
        Ok(Some("@@created".into()))
    }

    async fn rename_chatroom(&self, _session: &SessionState, _chatroom: &str, _name: &str) -> ClientResult<()> {
        self.record("rename_chatroom");
        Ok(())
    }

    async fn delete_chatroom_members(
        &self,
        _session: &SessionState,
        chatroom: &str,
        members: &[String],
    ) -> ClientResult<()> {
        self.record("delete_chatroom_members");
        self.membership_changes
            .lock()
            .unwrap()
            .push(("delete".into(), chatroom.into(), members.to_vec()));
        Ok(())
    }

    async fn add_chatroom_members(
        &self,
        _session: &SessionState,
        chatroom: &str,
        members: &[String],
    ) -> ClientResult<()> {
        self.record("add_chatroom_members");
        self.membership_changes
            .lock()
            .unwrap()
            .push(("add".into(), chatroom.into(), members.to_vec()));
        Ok(())
    }

    async fn invite_chatroom_members(
        &self,
        _session: &SessionState,
        chatroom: &str,
        members: &[String],
    ) -> ClientResult<()> {
        self.record("invite_chatroom_members");
        self.membership_changes
            .lock()
            .unwrap()
            .push(("invite".into(), chatroom.into(), members.to_vec()));
        Ok(())
    }

    async fn send(&self, _session: &SessionState, message: &OutboundMessage) -> ClientResult<String> {
        self.record("send");
        let mut sent = self.sent.lock().unwrap();
        sent.push(message.clone());
        Ok(format!("local-{}", sent.len()))
    }

    async fn revoke(
        &self,
        _session: &SessionState,
        _msg_id: &str,
        _to: &str,
        _local_id: Option<&str>,
    ) -> ClientResult<()> {
        self.record("revoke");
        Ok(())
    }

    async fn download(&self, _session: &SessionState, request: &MediaRequest) -> ClientResult<Vec<u8>> {
        self.record("download");
        self.downloaded.lock().unwrap().push(request.clone());
        let tag = match request {
            MediaRequest::Image { msg_id } | MediaRequest::Voice { msg_id } | MediaRequest::Video { msg_id } => {
                msg_id.clone()
            }
            MediaRequest::Attachment { media_id, .. } => media_id.clone(),
            MediaRequest::UserHeadImage { username } | MediaRequest::MemberHeadImage { username, .. } => {
                username.clone()
            }
            MediaRequest::ChatroomHeadImage { chatroom } => chatroom.clone(),
        };
        Ok(tag.into_bytes())
    }

    async fn logout(&self, _session: &SessionState) -> ClientResult<()> {
        self.record("logout");
        if *self.fail_logout.lock().unwrap() {
            return Err(ClientError::Network("logout refused".into()));
        }
        Ok(())
    }

    fn export_cookies(&self) -> BTreeMap<String, String> {
        self.cookies.lock().unwrap().clone()
    }

    fn import_cookies(&self, cookies: BTreeMap<String, String>) {
        *self.cookies.lock().unwrap() = cookies;
    }

    fn clear_cookies(&self) {
        self.cookies.lock().unwrap().clear();
    }
}

/// Uploader assigning sequential media ids.
#[derive(Default)]
pub(crate) struct MockUploader {
    pub uploads: Mutex<Vec<(String, usize, String)>>,
}

#[async_trait]
impl Uploader for MockUploader {
    async fn upload(&self, file_name: &str, bytes: Vec<u8>, to: &str) -> ClientResult<UploadedMedia> {
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push((file_name.to_string(), bytes.len(), to.to_string()));
        Ok(UploadedMedia {
            media_id: format!("@media-{}", uploads.len()),
            size: bytes.len() as u64,
        })
    }
}
