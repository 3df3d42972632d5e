//! HTTP implementation of [`Transport`] over blocking `ureq`.
//!
//! Every call is moved onto the blocking pool with `spawn_blocking`. Cookies
//! are kept in a private jar so they can be exported into a snapshot and
//! restored later.

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::protocol::transport::{OutboundMessage, Transport};
use crate::protocol::wire::{
    BaseResponse, BatchContactReply, BatchContactRequest, ContactListReply, ContactPage, InitData,
    InitReply, RawContact, ScanStatus, SyncBatch, SyncKeyList, SyncReply,
};
use crate::state::{SessionState, SyncCursor};
use crate::types::MediaRequest;

const NEW_LOGIN_PAGE: &str = "https://wx.qq.com/cgi-bin/mmwebwx-bin/webwxnewloginpage?mod=desktop";
const LOGIN_REFERER: &str = "https://wx.qq.com/?&lang=zh_CN&target=t";
const DOCUMENT_APP_ID: &str = "wxeb7ec651dd0aefa9";

/// Hosts with dedicated file and push endpoints, checked in order.
const ENDPOINT_HOSTS: [(&str, &str, &str); 5] = [
    ("wx2.qq.com", "file.wx2.qq.com", "webpush.wx2.qq.com"),
    ("wx8.qq.com", "file.wx8.qq.com", "webpush.wx8.qq.com"),
    ("qq.com", "file.wx.qq.com", "webpush.wx.qq.com"),
    ("web2.wechat.com", "file.web2.wechat.com", "webpush.web2.wechat.com"),
    ("wechat.com", "file.web.wechat.com", "webpush.web.wechat.com"),
];

lazy_static! {
    static ref QR_UUID_RE: Regex =
        Regex::new(r#"window.QRLogin.code = (\d+); window.QRLogin.uuid = "(\S+?)";"#).expect("valid uuid regex");
    static ref SCAN_CODE_RE: Regex = Regex::new(r"window.code=(\d+)").expect("valid scan regex");
    static ref REDIRECT_RE: Regex = Regex::new(r#"window.redirect_uri="(\S+)";"#).expect("valid redirect regex");
    static ref SYNC_CHECK_RE: Regex =
        Regex::new(r#"window.synccheck=\{retcode:"(\d+)",selector:"(\d+)"\}"#).expect("valid synccheck regex");
}

/// Production transport.
#[derive(Clone)]
pub struct HttpTransport {
    inner: Arc<HttpInner>,
}

struct HttpInner {
    agent: ureq::Agent,
    config: ClientConfig,
    cookies: Mutex<BTreeMap<String, String>>,
    /// Offset added to the login timestamp on every poll.
    poll_counter: AtomicI64,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .redirects(0)
            .build();
        Self {
            inner: Arc::new(HttpInner {
                agent,
                config,
                cookies: Mutex::new(BTreeMap::new()),
                poll_counter: AtomicI64::new(0),
            }),
        }
    }

    /// Run a blocking closure against the shared state on the blocking pool.
    async fn run<T, F>(&self, f: F) -> ClientResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&HttpInner) -> ClientResult<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| ClientError::Network(format!("transport task failed: {}", e)))?
    }
}

type Query = Vec<(&'static str, String)>;

impl HttpInner {
    fn jar(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.cookies.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cookie(&self, name: &str) -> Option<String> {
        self.jar().get(name).cloned()
    }

    fn prepare(&self, request: ureq::Request, query: &Query) -> ureq::Request {
        let mut request = query
            .iter()
            .fold(request, |req, (key, value)| req.query(key, value));
        let cookie_header = self
            .jar()
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ");
        if !cookie_header.is_empty() {
            request = request.set("Cookie", &cookie_header);
        }
        request
    }

    fn capture_cookies(&self, response: &ureq::Response) {
        let mut jar = self.jar();
        for header in response.all("set-cookie") {
            if let Some((name, value)) = cookie_pair(header) {
                jar.insert(name, value);
            }
        }
    }

    fn finish(&self, result: Result<ureq::Response, ureq::Error>, url: &str) -> ClientResult<ureq::Response> {
        match result {
            Ok(response) => {
                self.capture_cookies(&response);
                Ok(response)
            }
            Err(ureq::Error::Status(code, _)) => {
                Err(ClientError::Network(format!("{} answered HTTP {}", url, code)))
            }
            Err(ureq::Error::Transport(err)) => Err(ClientError::Network(format!("{}: {}", url, err))),
        }
    }

    fn get(&self, url: &str, query: Query, headers: &[(&str, &str)]) -> ClientResult<ureq::Response> {
        debug!(target: "Transport/Http", "GET {}", url);
        let request = headers
            .iter()
            .fold(self.prepare(self.agent.get(url), &query), |req, (k, v)| req.set(k, v));
        self.finish(request.call(), url)
    }

    fn post_json(&self, url: &str, query: Query, body: &Value) -> ClientResult<ureq::Response> {
        debug!(target: "Transport/Http", "POST {}", url);
        let request = self
            .prepare(self.agent.post(url), &query)
            .set("Content-Type", "application/json;charset=UTF-8");
        self.finish(request.send_json(body), url)
    }

    fn get_text(&self, url: &str, query: Query) -> ClientResult<String> {
        read_text(self.get(url, query, &[])?)
    }

    fn post_for<T: DeserializeOwned>(&self, url: &str, query: Query, body: &Value) -> ClientResult<T> {
        let text = read_text(self.post_json(url, query, body)?)?;
        parse_json(&text)
    }

    /// POST and require a zero `BaseResponse.Ret`.
    fn post_checked(&self, url: &str, query: Query, body: &Value, action: &str) -> ClientResult<Value> {
        let reply: Value = self.post_for(url, query, body)?;
        let base: BaseResponse = reply
            .get("BaseResponse")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ClientError::OperationFailed(format!("{}: bad reply: {}", action, e)))?
            .unwrap_or_default();
        check_ret(&base, action)?;
        Ok(reply)
    }

    fn download(&self, url: &str, query: Query, headers: &[(&str, &str)]) -> ClientResult<Vec<u8>> {
        let response = self.get(url, query, headers)?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| ClientError::Network(format!("{}: {}", url, e)))?;
        Ok(bytes)
    }
}

fn base_url(session: &SessionState) -> ClientResult<&str> {
    session
        .base_url
        .as_deref()
        .ok_or_else(|| ClientError::Login("session is not established".into()))
}

fn now_secs() -> i64 {
    Utc::now().timestamp()
}

fn local_message_id() -> String {
    (Utc::now().timestamp_micros() / 100).to_string()
}

fn read_text(response: ureq::Response) -> ClientResult<String> {
    response
        .into_string()
        .map_err(|e| ClientError::Network(format!("failed to read body: {}", e)))
}

fn parse_json<T: DeserializeOwned>(text: &str) -> ClientResult<T> {
    serde_json::from_str(text).map_err(|e| ClientError::OperationFailed(format!("unexpected reply: {}", e)))
}

fn check_ret(base: &BaseResponse, action: &str) -> ClientResult<()> {
    if base.ret == 0 {
        Ok(())
    } else {
        Err(ClientError::OperationFailed(format!(
            "{} rejected with Ret={} {}",
            action, base.ret, base.err_msg
        )))
    }
}

/// Split a `Set-Cookie` header into its name and value.
pub(crate) fn cookie_pair(header: &str) -> Option<(String, String)> {
    let pair = header.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

/// Extract the correlation id from a jslogin reply.
pub(crate) fn parse_uuid_response(text: &str) -> ClientResult<String> {
    let caps = QR_UUID_RE
        .captures(text)
        .ok_or_else(|| ClientError::Login(format!("QR code not found: {}", text)))?;
    if &caps[1] != "200" {
        return Err(ClientError::Login(format!("QR code invalid: {}", text)));
    }
    Ok(caps[2].to_string())
}

pub(crate) fn parse_scan_code(text: &str) -> ClientResult<String> {
    SCAN_CODE_RE
        .captures(text)
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| ClientError::Login(format!("scan code not found: {}", text)))
}

pub(crate) fn parse_redirect_uri(payload: &str) -> ClientResult<String> {
    REDIRECT_RE
        .captures(payload)
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| ClientError::Login("redirect uri missing from scan reply".into()))
}

fn xml_field(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].to_string()).filter(|v| !v.is_empty())
}

/// Derive `(main, file, push)` endpoints from the redirect url.
pub(crate) fn derive_endpoints(redirect_url: &str) -> (String, String, String) {
    let path = redirect_url.split('?').next().unwrap_or(redirect_url);
    let base = match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => path,
    };
    let base = base.to_string();
    for (host, file_host, push_host) in ENDPOINT_HOSTS {
        if base.contains(host) {
            return (
                base,
                format!("https://{}/cgi-bin/mmwebwx-bin", file_host),
                format!("https://{}/cgi-bin/mmwebwx-bin", push_host),
            );
        }
    }
    (base.clone(), base.clone(), base)
}

/// `None` when the server reports the session gone, else the selector.
pub(crate) fn parse_sync_check(text: &str) -> ClientResult<Option<String>> {
    let caps = SYNC_CHECK_RE
        .captures(text)
        .ok_or_else(|| ClientError::Network(format!("unexpected sync check result: {}", text)))?;
    if &caps[1] != "0" {
        info!(target: "Transport/Http", "Sync check retcode {}", &caps[1]);
        return Ok(None);
    }
    Ok(Some(caps[2].to_string()))
}

fn check_param_of(sync_key: &Value) -> ClientResult<String> {
    let list: SyncKeyList = serde_json::from_value(sync_key.clone())
        .map_err(|e| ClientError::OperationFailed(format!("malformed sync key: {}", e)))?;
    Ok(list.to_check_param())
}

/// App-message markup announcing an uploaded document.
pub(crate) fn document_app_content(file_name: &str, media_id: &str, file_size: u64) -> String {
    let ext = file_name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    format!(
        "<appmsg appid='{}' sdkver=''><title>{}</title><des></des><action></action><type>6</type>\
         <content></content><url></url><lowurl></lowurl><appattach><totallen>{}</totallen>\
         <attachid>{}</attachid><fileext>{}</fileext></appattach><extinfo></extinfo></appmsg>",
        DOCUMENT_APP_ID, file_name, file_size, media_id, ext
    )
}

fn ret_is_zero(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Number(n)) => n.as_i64() == Some(0),
        Some(Value::String(s)) => s == "0",
        _ => false,
    }
}

fn username_list(members: &[String]) -> String {
    members.join(",")
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request_uuid(&self) -> ClientResult<String> {
        self.run(|inner| {
            let url = format!("{}/jslogin", inner.config.login_url);
            let query = vec![
                ("appid", inner.config.app_id.clone()),
                ("fun", "new".to_string()),
                ("redirect_uri", NEW_LOGIN_PAGE.to_string()),
                ("lang", "zh_CN".to_string()),
            ];
            parse_uuid_response(&inner.get_text(&url, query)?)
        })
        .await
    }

    async fn push_login(&self, session: &SessionState) -> ClientResult<Option<String>> {
        let remembered = session.wxuin.clone();
        self.run(move |inner| {
            let uin = inner.cookie("wxuin").or(Some(remembered).filter(|u| !u.is_empty()));
            let Some(uin) = uin else {
                return Ok(None);
            };
            let url = format!("{}/cgi-bin/mmwebwx-bin/webwxpushloginurl", inner.config.login_url);
            let reply: Value = parse_json(&inner.get_text(&url, vec![("uin", uin)])?)?;
            if ret_is_zero(reply.get("ret")) {
                Ok(reply.get("uuid").and_then(Value::as_str).map(String::from))
            } else {
                Ok(None)
            }
        })
        .await
    }

    async fn check_scan(&self, uuid: &str) -> ClientResult<ScanStatus> {
        let uuid = uuid.to_string();
        self.run(move |inner| {
            let url = format!("{}/cgi-bin/mmwebwx-bin/login", inner.config.login_url);
            let now = now_secs();
            let query = vec![
                ("loginicon", "true".to_string()),
                ("uuid", uuid),
                ("tip", "1".to_string()),
                ("r", (-now / 1579).to_string()),
                ("_", now.to_string()),
            ];
            let body = inner.get_text(&url, query)?;
            let code = parse_scan_code(&body)?;
            Ok(ScanStatus { code, body })
        })
        .await
    }

    async fn establish_session(&self, redirect_payload: &str) -> ClientResult<SessionState> {
        let payload = redirect_payload.to_string();
        self.run(move |inner| {
            let redirect = parse_redirect_uri(&payload)?;
            let mut headers = vec![
                ("client-version", inner.config.client_version.as_str()),
                ("referer", LOGIN_REFERER),
            ];
            if let Some(extspam) = inner.config.extspam.as_deref() {
                headers.push(("extspam", extspam));
            }
            let body = read_text(inner.get(&redirect, Vec::new(), &headers)?)?;

            let (Some(skey), Some(pass_ticket)) = (xml_field(&body, "skey"), xml_field(&body, "pass_ticket")) else {
                warn!(target: "Transport/Http", "Login refused by server: {}", body);
                return Err(ClientError::Login(format!("server refused login: {}", body)));
            };
            let wxsid = xml_field(&body, "wxsid").or_else(|| inner.cookie("wxsid"));
            let wxuin = xml_field(&body, "wxuin").or_else(|| inner.cookie("wxuin"));
            let (Some(wxsid), Some(wxuin)) = (wxsid, wxuin) else {
                return Err(ClientError::Login("session tokens missing from login reply".into()));
            };

            let (base, file, sync) = derive_endpoints(&redirect);
            let mut session = SessionState::new();
            session.base_url = Some(base);
            session.file_url = Some(file);
            session.sync_url = Some(sync);
            session.skey = skey;
            session.pass_ticket = pass_ticket;
            session.wxsid = wxsid;
            session.wxuin = wxuin;
            session.data_ticket = inner.cookie("webwx_data_ticket").unwrap_or_default();
            session.login_time = Some(Utc::now());
            inner.poll_counter.store(0, Ordering::SeqCst);
            Ok(session)
        })
        .await
    }

    async fn web_init(&self, session: &SessionState) -> ClientResult<InitData> {
        let session = session.clone();
        self.run(move |inner| {
            let url = format!("{}/webwxinit", base_url(&session)?);
            let query = vec![
                ("r", (-now_secs() / 1579).to_string()),
                ("pass_ticket", session.pass_ticket.clone()),
            ];
            let reply: InitReply = inner.post_for(&url, query, &json!({ "BaseRequest": session.base_request() }))?;
            check_ret(&reply.base_response, "webwxinit")?;
            let check = check_param_of(&reply.sync_key)?;
            Ok(InitData {
                user: reply.user,
                cursor: SyncCursor::new(reply.sync_key, check),
                invite_start_count: reply.invite_start_count,
                contacts: reply.contact_list,
            })
        })
        .await
    }

    async fn status_notify(&self, session: &SessionState) -> ClientResult<()> {
        let session = session.clone();
        self.run(move |inner| {
            let url = format!("{}/webwxstatusnotify", base_url(&session)?);
            let me = session.self_username().to_string();
            let body = json!({
                "BaseRequest": session.base_request(),
                "Code": 3,
                "FromUserName": me,
                "ToUserName": me,
                "ClientMsgId": now_secs(),
            });
            let query = vec![("lang", "zh_CN".to_string()), ("pass_ticket", session.pass_ticket.clone())];
            inner.post_json(&url, query, &body)?;
            Ok(())
        })
        .await
    }

    async fn poll(&self, session: &SessionState) -> ClientResult<Option<String>> {
        let session = session.clone();
        self.run(move |inner| {
            let sync_url = session
                .sync_url
                .as_deref()
                .ok_or_else(|| ClientError::Login("session is not established".into()))?;
            let url = format!("{}/synccheck", sync_url);
            let login_ms = session.login_time.map(|t| t.timestamp_millis()).unwrap_or(0);
            let tick = inner.poll_counter.fetch_add(1, Ordering::SeqCst);
            let query = vec![
                ("r", Utc::now().timestamp_millis().to_string()),
                ("skey", session.skey.clone()),
                ("sid", session.wxsid.clone()),
                ("uin", session.wxuin.clone()),
                ("deviceid", session.device_id.clone()),
                ("synckey", session.cursor.check.clone()),
                ("_", (login_ms + tick).to_string()),
            ];
            parse_sync_check(&inner.get_text(&url, query)?)
        })
        .await
    }

    async fn fetch_events(&self, session: &SessionState) -> ClientResult<SyncBatch> {
        let session = session.clone();
        self.run(move |inner| {
            let url = format!("{}/webwxsync", base_url(&session)?);
            let query = vec![
                ("sid", session.wxsid.clone()),
                ("skey", session.skey.clone()),
                ("pass_ticket", session.pass_ticket.clone()),
            ];
            let body = json!({
                "BaseRequest": session.base_request(),
                "SyncKey": session.cursor.key,
                "rr": !now_secs(),
            });
            let reply: SyncReply = inner.post_for(&url, query, &body)?;
            check_ret(&reply.base_response, "webwxsync")?;
            let check = reply.sync_check_key.to_check_param();
            Ok(SyncBatch {
                events: reply.add_msg_list,
                contact_deltas: reply.mod_contact_list,
                cursor: SyncCursor::new(reply.sync_key, check),
            })
        })
        .await
    }

    async fn fetch_contacts_page(&self, session: &SessionState, seq: u64) -> ClientResult<ContactPage> {
        let session = session.clone();
        self.run(move |inner| {
            let url = format!("{}/webwxgetcontact", base_url(&session)?);
            let query = vec![
                ("r", now_secs().to_string()),
                ("seq", seq.to_string()),
                ("skey", session.skey.clone()),
            ];
            let text = inner.get_text(&url, query)?;
            let reply: ContactListReply = parse_json(&text)?;
            Ok(ContactPage {
                next_seq: reply.seq,
                contacts: reply.member_list,
            })
        })
        .await
    }

    async fn batch_get_contacts(
        &self,
        session: &SessionState,
        requests: &[BatchContactRequest],
    ) -> ClientResult<Vec<RawContact>> {
        let session = session.clone();
        let list: Vec<Value> = requests
            .iter()
            .map(|r| {
                json!({
                    "UserName": r.username,
                    "EncryChatRoomId": r.chatroom_id.clone().unwrap_or_default(),
                })
            })
            .collect();
        self.run(move |inner| {
            let url = format!("{}/webwxbatchgetcontact", base_url(&session)?);
            let query = vec![("type", "ex".to_string()), ("r", now_secs().to_string())];
            let body = json!({
                "BaseRequest": session.base_request(),
                "Count": list.len(),
                "List": list,
            });
            let reply: BatchContactReply = inner.post_for(&url, query, &body)?;
            check_ret(&reply.base_response, "webwxbatchgetcontact")?;
            Ok(reply.contact_list)
        })
        .await
    }

    async fn set_alias(&self, session: &SessionState, username: &str, alias: &str) -> ClientResult<()> {
        let session = session.clone();
        let body = json!({
            "UserName": username,
            "CmdId": 2,
            "RemarkName": alias,
            "BaseRequest": session.base_request(),
        });
        self.run(move |inner| {
            let url = format!("{}/webwxoplog", base_url(&session)?);
            let query = vec![("lang", "zh_CN".to_string()), ("pass_ticket", session.pass_ticket.clone())];
            inner.post_checked(&url, query, &body, "set alias").map(|_| ())
        })
        .await
    }

    async fn set_pinned(&self, session: &SessionState, username: &str, pinned: bool) -> ClientResult<()> {
        let session = session.clone();
        let body = json!({
            "UserName": username,
            "CmdId": 3,
            "OP": u8::from(pinned),
            "BaseRequest": session.base_request(),
        });
        self.run(move |inner| {
            let url = format!("{}/webwxoplog", base_url(&session)?);
            let query = vec![("pass_ticket", session.pass_ticket.clone())];
            inner.post_checked(&url, query, &body, "set pinned").map(|_| ())
        })
        .await
    }

    async fn accept_friend(&self, session: &SessionState, username: &str, ticket: &str) -> ClientResult<()> {
        let session = session.clone();
        let body = json!({
            "BaseRequest": session.base_request(),
            "Opcode": 3,
            "VerifyUserListSize": 1,
            "VerifyUserList": [{ "Value": username, "VerifyUserTicket": ticket }],
            "VerifyContent": "",
            "SceneListCount": 1,
            "SceneList": [33],
            "skey": session.skey,
        });
        self.run(move |inner| {
            let url = format!("{}/webwxverifyuser", base_url(&session)?);
            let query = vec![("r", now_secs().to_string()), ("pass_ticket", session.pass_ticket.clone())];
            inner.post_checked(&url, query, &body, "accept friend").map(|_| ())
        })
        .await
    }

    async fn create_chatroom(
        &self,
        session: &SessionState,
        members: &[String],
        topic: &str,
    ) -> ClientResult<Option<String>> {
        let session = session.clone();
        let body = json!({
            "BaseRequest": session.base_request(),
            "MemberCount": members.len(),
            "MemberList": members.iter().map(|m| json!({ "UserName": m })).collect::<Vec<_>>(),
            "Topic": topic,
        });
        self.run(move |inner| {
            let url = format!("{}/webwxcreatechatroom", base_url(&session)?);
            let query = vec![("pass_ticket", session.pass_ticket.clone()), ("r", now_secs().to_string())];
            let reply = inner.post_checked(&url, query, &body, "create chatroom")?;
            Ok(reply
                .get("ChatRoomName")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(String::from))
        })
        .await
    }

    async fn rename_chatroom(&self, session: &SessionState, chatroom: &str, name: &str) -> ClientResult<()> {
        let session = session.clone();
        let body = json!({
            "BaseRequest": session.base_request(),
            "ChatRoomName": chatroom,
            "NewTopic": name,
        });
        self.run(move |inner| {
            let url = format!("{}/webwxupdatechatroom", base_url(&session)?);
            let query = vec![("fun", "modtopic".to_string()), ("pass_ticket", session.pass_ticket.clone())];
            inner.post_checked(&url, query, &body, "rename chatroom").map(|_| ())
        })
        .await
    }

    async fn delete_chatroom_members(
        &self,
        session: &SessionState,
        chatroom: &str,
        members: &[String],
    ) -> ClientResult<()> {
        let session = session.clone();
        let body = json!({
            "BaseRequest": session.base_request(),
            "ChatRoomName": chatroom,
            "DelMemberList": username_list(members),
        });
        self.run(move |inner| {
            let url = format!("{}/webwxupdatechatroom", base_url(&session)?);
            let query = vec![("fun", "delmember".to_string()), ("pass_ticket", session.pass_ticket.clone())];
            inner.post_checked(&url, query, &body, "delete chatroom members").map(|_| ())
        })
        .await
    }

    async fn add_chatroom_members(
        &self,
        session: &SessionState,
        chatroom: &str,
        members: &[String],
    ) -> ClientResult<()> {
        let session = session.clone();
        let body = json!({
            "BaseRequest": session.base_request(),
            "ChatRoomName": chatroom,
            "AddMemberList": username_list(members),
        });
        self.run(move |inner| {
            let url = format!("{}/webwxupdatechatroom", base_url(&session)?);
            let query = vec![("fun", "addmember".to_string()), ("pass_ticket", session.pass_ticket.clone())];
            inner.post_checked(&url, query, &body, "add chatroom members").map(|_| ())
        })
        .await
    }

    async fn invite_chatroom_members(
        &self,
        session: &SessionState,
        chatroom: &str,
        members: &[String],
    ) -> ClientResult<()> {
        let session = session.clone();
        let body = json!({
            "BaseRequest": session.base_request(),
            "ChatRoomName": chatroom,
            "InviteMemberList": username_list(members),
        });
        self.run(move |inner| {
            let url = format!("{}/webwxupdatechatroom", base_url(&session)?);
            let query = vec![("fun", "invitemember".to_string()), ("pass_ticket", session.pass_ticket.clone())];
            inner.post_checked(&url, query, &body, "invite chatroom members").map(|_| ())
        })
        .await
    }

    async fn send(&self, session: &SessionState, message: &OutboundMessage) -> ClientResult<String> {
        let session = session.clone();
        let message = message.clone();
        self.run(move |inner| {
            let base = base_url(&session)?;
            let local_id = local_message_id();
            let mut msg = json!({
                "Type": message.msg_type(),
                "FromUserName": session.self_username(),
                "ToUserName": message.to(),
                "LocalID": local_id,
                "ClientMsgId": local_id,
            });
            let (url, query) = match &message {
                OutboundMessage::Text { text, .. } => {
                    msg["Content"] = json!(text);
                    (format!("{}/webwxsendmsg", base), Vec::new())
                }
                OutboundMessage::Image { media_id, .. } => {
                    msg["MediaId"] = json!(media_id);
                    (
                        format!("{}/webwxsendmsgimg", base),
                        vec![("fun", "async".to_string()), ("f", "json".to_string())],
                    )
                }
                OutboundMessage::Emoticon { media_id, .. } => {
                    msg["MediaId"] = json!(media_id);
                    msg["EmojiFlag"] = json!(2);
                    (format!("{}/webwxsendemoticon", base), vec![("fun", "sys".to_string())])
                }
                OutboundMessage::Video { media_id, .. } => {
                    msg["MediaId"] = json!(media_id);
                    (
                        format!("{}/webwxsendvideomsg", base),
                        vec![
                            ("fun", "async".to_string()),
                            ("f", "json".to_string()),
                            ("pass_ticket", session.pass_ticket.clone()),
                        ],
                    )
                }
                OutboundMessage::File {
                    media_id,
                    file_name,
                    file_size,
                    ..
                } => {
                    msg["Content"] = json!(document_app_content(file_name, media_id, *file_size));
                    (
                        format!("{}/webwxsendappmsg", base),
                        vec![("fun", "async".to_string()), ("f", "json".to_string())],
                    )
                }
            };
            let body = json!({
                "BaseRequest": session.base_request(),
                "Msg": msg,
                "Scene": 0,
            });
            inner.post_checked(&url, query, &body, "send message")?;
            Ok(local_id)
        })
        .await
    }

    async fn revoke(
        &self,
        session: &SessionState,
        msg_id: &str,
        to: &str,
        local_id: Option<&str>,
    ) -> ClientResult<()> {
        let session = session.clone();
        let client_id = local_id
            .map(String::from)
            .unwrap_or_else(|| Utc::now().timestamp_millis().to_string());
        let body = json!({
            "BaseRequest": session.base_request(),
            "ClientMsgId": client_id,
            "SvrMsgId": msg_id,
            "ToUserName": to,
        });
        self.run(move |inner| {
            let url = format!("{}/webwxrevokemsg", base_url(&session)?);
            inner.post_checked(&url, Vec::new(), &body, "revoke").map(|_| ())
        })
        .await
    }

    async fn download(&self, session: &SessionState, request: &MediaRequest) -> ClientResult<Vec<u8>> {
        let session = session.clone();
        let request = request.clone();
        self.run(move |inner| {
            let base = base_url(&session)?;
            let skey = session.skey.clone();
            let (path, query, headers): (&str, Query, Vec<(&str, &str)>) = match request {
                MediaRequest::Image { msg_id } => ("webwxgetmsgimg", vec![("msgid", msg_id), ("skey", skey)], vec![]),
                MediaRequest::Voice { msg_id } => ("webwxgetvoice", vec![("msgid", msg_id), ("skey", skey)], vec![]),
                MediaRequest::Video { msg_id } => (
                    "webwxgetvideo",
                    vec![("msgid", msg_id), ("skey", skey)],
                    vec![("Range", "bytes=0-")],
                ),
                MediaRequest::Attachment {
                    sender,
                    media_id,
                    file_name,
                } => {
                    let ticket = inner
                        .cookie("webwx_data_ticket")
                        .unwrap_or_else(|| session.data_ticket.clone());
                    (
                        "webwxgetmedia",
                        vec![
                            ("sender", sender),
                            ("mediaid", media_id),
                            ("filename", file_name),
                            ("fromuser", session.wxuin.clone()),
                            ("pass_ticket", "undefined".to_string()),
                            ("webwx_data_ticket", ticket),
                        ],
                        vec![],
                    )
                }
                MediaRequest::UserHeadImage { username } => (
                    "webwxgeticon",
                    vec![("userName", username), ("skey", skey), ("type", "big".to_string())],
                    vec![],
                ),
                MediaRequest::ChatroomHeadImage { chatroom } => (
                    "webwxgetheadimg",
                    vec![("userName", chatroom), ("skey", skey), ("type", "big".to_string())],
                    vec![],
                ),
                MediaRequest::MemberHeadImage { username, chatroom_id } => (
                    "webwxgeticon",
                    vec![
                        ("userName", username),
                        ("chatroomid", chatroom_id),
                        ("skey", skey),
                        ("type", "big".to_string()),
                    ],
                    vec![],
                ),
            };
            inner.download(&format!("{}/{}", base, path), query, &headers)
        })
        .await
    }

    async fn logout(&self, session: &SessionState) -> ClientResult<()> {
        let session = session.clone();
        self.run(move |inner| {
            let url = format!("{}/webwxlogout", base_url(&session)?);
            let query = vec![
                ("redirect", "1".to_string()),
                ("type", "1".to_string()),
                ("skey", session.skey.clone()),
            ];
            inner.get(&url, query, &[])?;
            Ok(())
        })
        .await
    }

    fn export_cookies(&self) -> BTreeMap<String, String> {
        self.inner.jar().clone()
    }

    fn import_cookies(&self, cookies: BTreeMap<String, String>) {
        *self.inner.jar() = cookies;
    }

    fn clear_cookies(&self) {
        self.inner.jar().clear();
    }
}
