//! QR login handshake, snapshot resume and hot reload.

use std::path::Path;

use log::{debug, info, warn};
use tokio::time::sleep;

use crate::client::Client;
use crate::error::{ClientError, ClientResult};
use crate::protocol::qr::{login_url, render_qr_svg};
use crate::store::{FileSnapshotStore, Snapshot, SnapshotStore};
use crate::types::{Identity, LoginState, QrEvent, ScanCode};

/// Receives every QR code issued and each change of its scan status.
pub type QrCallback = Box<dyn Fn(&QrEvent) -> ClientResult<()> + Send + Sync>;

/// Receives the account username once the client is authenticated.
pub type LoginCallback = Box<dyn Fn(&str) -> ClientResult<()> + Send + Sync>;

impl Client {
    /// Log in by QR code. Each issued code is reported through `on_qr`;
    /// `on_login` runs once the session is established.
    pub async fn begin_login(
        &self,
        on_qr: Option<&QrCallback>,
        on_login: Option<&LoginCallback>,
    ) -> ClientResult<()> {
        let result = match self.wait_for_scan(on_qr).await {
            Ok(payload) => self.complete_login(&payload, on_login).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!(target: "Client/Login", "Login failed: {}", e);
            self.set_login_state(LoginState::Failed).await;
        }
        result
    }

    /// Issue QR codes until one is confirmed, returning the success payload.
    pub(crate) async fn wait_for_scan(&self, on_qr: Option<&QrCallback>) -> ClientResult<String> {
        for attempt in 1..=self.config.qr_issue_attempts {
            let uuid = self.issue_uuid(attempt).await?;
            let url = login_url(&self.config.login_url, &uuid);
            let mut event = QrEvent {
                image: render_qr_svg(&url)?,
                uuid,
                status: ScanCode::Issued,
                login_url: url,
            };
            self.set_login_state(LoginState::QrIssued).await;
            notify_qr(on_qr, &event);

            loop {
                let status = self.transport.check_scan(&event.uuid).await?;
                match ScanCode::from_code(&status.code) {
                    Some(ScanCode::Confirmed) => {
                        info!(target: "Client/Login", "Login confirmed on the phone");
                        event.status = ScanCode::Confirmed;
                        notify_qr(on_qr, &event);
                        return Ok(status.body);
                    }
                    Some(ScanCode::Waiting) => {
                        if event.status != ScanCode::Waiting {
                            info!(target: "Client/Login", "Please press confirm on your phone");
                            self.set_login_state(LoginState::WaitingConfirm).await;
                            event.status = ScanCode::Waiting;
                            notify_qr(on_qr, &event);
                        }
                        sleep(self.config.scan_poll_interval).await;
                    }
                    Some(ScanCode::Expired) => {
                        info!(
                            target: "Client/Login",
                            "QR code {} expired ({}/{})", event.uuid, attempt, self.config.qr_issue_attempts
                        );
                        event.status = ScanCode::Expired;
                        notify_qr(on_qr, &event);
                        break;
                    }
                    _ => {
                        return Err(ClientError::Login(format!(
                            "unexpected scan status {}",
                            status.code
                        )))
                    }
                }
            }
        }
        Err(ClientError::Login(format!(
            "QR code expired {} times",
            self.config.qr_issue_attempts
        )))
    }

    /// Obtain a correlation id. The first attempt prefers a push login to the
    /// remembered account.
    async fn issue_uuid(&self, attempt: u32) -> ClientResult<String> {
        if attempt == 1 {
            let session = self.session().await;
            match self.transport.push_login(&session).await {
                Ok(Some(uuid)) => {
                    info!(target: "Client/Login", "Push login sent, confirm on your phone");
                    return Ok(uuid);
                }
                Ok(None) => {}
                Err(e) => debug!(target: "Client/Login", "Push login unavailable: {}", e),
            }
        }
        self.transport.request_uuid().await
    }

    /// Turn a confirmed scan into an authenticated session: establish
    /// credentials, bootstrap, announce the client and load the contact list.
    pub(crate) async fn complete_login(&self, payload: &str, on_login: Option<&LoginCallback>) -> ClientResult<()> {
        let mut session = self.transport.establish_session(payload).await?;
        let init = self.transport.web_init(&session).await?;
        let me = Identity::from_raw(&init.user).profile().clone();
        session.cursor = init.cursor;
        session.invite_start_count = init.invite_start_count;
        session.user = Some(me.clone());
        *self.session.write().await = session.clone();
        {
            let mut contacts = self.contacts.write().await;
            contacts.insert(Identity::Individual(me.clone()));
            contacts.apply_raw(init.contacts.iter());
        }

        if let Err(e) = self.transport.status_notify(&session).await {
            warn!(target: "Client/Login", "Status notify failed: {}", e);
        }
        info!(target: "Client/Login", "Loading the contact list");
        if let Err(e) = self.get_contact(true).await {
            warn!(target: "Client/Login", "Contact list not loaded: {}", e);
        }

        self.set_login_state(LoginState::Authenticated).await;
        info!(target: "Client/Login", "Logged in as {}", me.display_name());
        notify_login(on_login, &me.username);
        Ok(())
    }

    /// Restore a persisted session and validate it with one fetch. A rejected
    /// snapshot leaves no state behind.
    pub async fn resume_from_snapshot(&self, snapshot: Snapshot, on_login: Option<&LoginCallback>) -> ClientResult<()> {
        let Snapshot {
            session,
            cookies,
            contacts,
            ..
        } = snapshot;
        *self.session.write().await = session.clone();
        *self.contacts.write().await = contacts;
        self.transport.import_cookies(cookies);

        let validation = if session.is_authenticated() {
            self.transport.fetch_events(&session).await
        } else {
            Err(ClientError::OperationFailed("snapshot holds no session".into()))
        };

        match validation {
            Ok(batch) => {
                self.absorb_batch(batch).await;
                self.set_login_state(LoginState::Authenticated).await;
                info!(target: "Client/Login", "Resumed session of {}", session.self_username());
                notify_login(on_login, session.self_username());
                Ok(())
            }
            Err(e) => {
                if session.is_authenticated() {
                    if let Err(logout_err) = self.transport.logout(&session).await {
                        debug!(target: "Client/Login", "Logout of rejected session failed: {}", logout_err);
                    }
                }
                self.clear_local_state().await;
                Err(ClientError::OperationFailed(format!("snapshot rejected by server: {}", e)))
            }
        }
    }

    /// Resume from the snapshot file when `hot_reload` is set, falling back to
    /// a QR login. A fresh login is dumped for the next start.
    pub async fn auto_login(
        &self,
        hot_reload: bool,
        snapshot_path: Option<&Path>,
        on_qr: Option<&QrCallback>,
        on_login: Option<&LoginCallback>,
    ) -> ClientResult<()> {
        let path = snapshot_path.unwrap_or(self.config.snapshot_path.as_path());
        if hot_reload {
            let store = FileSnapshotStore::new(path);
            let resumed = match store.load() {
                Ok(snapshot) => self.resume_from_snapshot(snapshot, on_login).await,
                Err(e) => Err(e),
            };
            match resumed {
                Ok(()) => return Ok(()),
                Err(e) => warn!(target: "Client/Login", "Hot reload failed: {}", e),
            }
        }

        self.begin_login(on_qr, on_login).await?;
        if hot_reload {
            self.dump_snapshot(Some(path)).await?;
        }
        Ok(())
    }
}

fn notify_qr(on_qr: Option<&QrCallback>, event: &QrEvent) {
    match on_qr {
        Some(callback) => {
            if let Err(e) = callback(event) {
                warn!(target: "Client/Login", "QR callback failed: {}", e);
            }
        }
        None if event.status == ScanCode::Issued => {
            info!(target: "Client/Login", "Scan to log in: {}", event.login_url);
        }
        None => {}
    }
}

fn notify_login(on_login: Option<&LoginCallback>, username: &str) {
    if let Some(callback) = on_login {
        if let Err(e) = callback(username) {
            warn!(target: "Client/Login", "Login callback failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::time::Instant;

    use crate::config::ClientConfig;
    use crate::protocol::transport::Transport;
    use crate::protocol::wire::RawContact;
    use crate::state::SessionState;
    use crate::store::{ContactStore, MemorySnapshotStore};
    use crate::testing::{authenticated_session, logged_in_client, MockTransport};

    fn recording_qr_callback() -> (QrCallback, Arc<Mutex<Vec<(String, ScanCode)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: QrCallback = Box::new(move |event: &QrEvent| {
            sink.lock().unwrap().push((event.uuid.clone(), event.status));
            Ok(())
        });
        (callback, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_waits_twice_then_succeeds() {
        let transport = Arc::new(MockTransport::new());
        transport.script_scans(&["201", "201", "200"]);
        let client = Client::new(ClientConfig::default(), transport.clone());
        let (on_qr, seen) = recording_qr_callback();

        let started = Instant::now();
        let payload = client.wait_for_scan(Some(&on_qr)).await.unwrap();

        assert_eq!(started.elapsed(), Duration::from_secs(4));
        assert_eq!(transport.calls_named("request_uuid"), 1);
        assert_eq!(transport.calls_named("check_scan"), 3);
        assert!(payload.contains("window.code=200"));
        assert_eq!(
            seen.lock().unwrap().iter().map(|(_, s)| *s).collect::<Vec<_>>(),
            vec![ScanCode::Issued, ScanCode::Waiting, ScanCode::Confirmed]
        );
        assert_eq!(client.login_state().await, LoginState::WaitingConfirm);
    }

    #[tokio::test]
    async fn test_expired_codes_are_reissued_up_to_bound() {
        let transport = Arc::new(MockTransport::new());
        transport.script_scans(&["408", "408", "408", "408", "408"]);
        let client = Client::new(ClientConfig::immediate(), transport.clone());

        let result = client.begin_login(None, None).await;

        assert!(matches!(result, Err(ClientError::Login(_))));
        assert_eq!(transport.calls_named("request_uuid"), 5);
        assert_eq!(transport.calls_named("establish_session"), 0);
        assert_eq!(client.login_state().await, LoginState::Failed);
    }

    #[tokio::test]
    async fn test_expiry_then_success_uses_new_code() {
        let transport = Arc::new(MockTransport::new());
        transport.script_scans(&["408", "201", "200"]);
        let client = Client::new(ClientConfig::immediate(), transport.clone());
        let (on_qr, seen) = recording_qr_callback();

        client.wait_for_scan(Some(&on_qr)).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.first().map(|(u, _)| u.as_str()), Some("uuid-1"));
        assert_eq!(seen.last().map(|(u, s)| (u.as_str(), *s)), Some(("uuid-2", ScanCode::Confirmed)));
    }

    #[tokio::test]
    async fn test_unknown_scan_code_is_fatal() {
        let transport = Arc::new(MockTransport::new());
        transport.script_scans(&["400"]);
        let client = Client::new(ClientConfig::immediate(), transport.clone());

        assert!(matches!(
            client.begin_login(None, None).await,
            Err(ClientError::Login(_))
        ));
        assert_eq!(transport.calls_named("check_scan"), 1);
    }

    #[tokio::test]
    async fn test_push_login_preferred_on_first_attempt() {
        let transport = Arc::new(MockTransport::new());
        *transport.push_uuid.lock().unwrap() = Some("pushed".into());
        transport.script_scans(&["200"]);
        let client = Client::new(ClientConfig::immediate(), transport.clone());
        let (on_qr, seen) = recording_qr_callback();

        client.wait_for_scan(Some(&on_qr)).await.unwrap();

        assert_eq!(transport.calls_named("request_uuid"), 0);
        assert_eq!(seen.lock().unwrap()[0].0, "pushed");
    }

    #[tokio::test]
    async fn test_full_login_populates_state() {
        let transport = Arc::new(MockTransport::new());
        transport.script_scans(&["200"]);
        let client = Client::new(ClientConfig::immediate(), transport.clone());
        let logged_in = Arc::new(Mutex::new(None));
        let sink = logged_in.clone();
        let on_login: LoginCallback = Box::new(move |username: &str| {
            *sink.lock().unwrap() = Some(username.to_string());
            Err(ClientError::UserCallback("ignored".into()))
        });

        client.begin_login(None, Some(&on_login)).await.unwrap();

        assert_eq!(client.login_state().await, LoginState::Authenticated);
        let session = client.session().await;
        assert!(session.is_authenticated());
        assert_eq!(session.self_username(), "@me");
        assert_eq!(session.cursor.check, "1_2");
        assert_eq!(session.invite_start_count, 40);
        assert!(client.contact("@bob").await.is_some());
        assert!(client.contact("@me").await.is_some());
        let handshake = [
            "request_uuid",
            "check_scan",
            "establish_session",
            "web_init",
            "status_notify",
            "fetch_contacts_page",
        ];
        let order: Vec<&str> = transport
            .call_log()
            .into_iter()
            .filter(|call| handshake.contains(call))
            .collect();
        assert_eq!(order, handshake);
        assert_eq!(logged_in.lock().unwrap().as_deref(), Some("@me"));
    }

    #[tokio::test]
    async fn test_resume_accepted() {
        let transport = Arc::new(MockTransport::new());
        let mut contacts = ContactStore::new();
        contacts.apply_raw([&RawContact::new("@bob")]);
        let snapshot = Snapshot::new(authenticated_session(), Default::default(), contacts);
        let client = Client::new(ClientConfig::immediate(), transport.clone());

        client.resume_from_snapshot(snapshot, None).await.unwrap();

        assert_eq!(transport.calls_named("fetch_events"), 1);
        assert_eq!(client.login_state().await, LoginState::Authenticated);
        assert!(client.contact("@bob").await.is_some());
    }

    #[tokio::test]
    async fn test_rejected_resume_clears_everything() {
        let transport = Arc::new(MockTransport::new());
        transport.script_fetches(vec![Err(ClientError::OperationFailed("ret 1101".into()))]);
        let mut contacts = ContactStore::new();
        contacts.apply_raw([&RawContact::new("@bob"), &RawContact::new("@@room")]);
        let mut cookies = std::collections::BTreeMap::new();
        cookies.insert("wxuin".to_string(), "1".to_string());
        let snapshot = Snapshot::new(authenticated_session(), cookies, contacts);
        let client = Client::new(ClientConfig::immediate(), transport.clone());

        let result = client.resume_from_snapshot(snapshot, None).await;

        assert!(matches!(result, Err(ClientError::OperationFailed(_))));
        assert!(client.contacts().await.is_empty());
        assert_eq!(client.session().await, SessionState::default());
        assert!(transport.export_cookies().is_empty());
        assert_eq!(client.login_state().await, LoginState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_auto_login_falls_back_and_dumps() {
        let dir = std::env::temp_dir().join(format!("vchat-auto-login-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("missing.json");
        let _ = std::fs::remove_file(&path);

        let transport = Arc::new(MockTransport::new());
        transport.script_scans(&["200"]);
        let client = Client::new(ClientConfig::immediate(), transport.clone());

        client.auto_login(true, Some(path.as_path()), None, None).await.unwrap();

        assert_eq!(transport.calls_named("fetch_events"), 0);
        assert_eq!(transport.calls_named("establish_session"), 1);
        let restored = FileSnapshotStore::new(&path).load().unwrap();
        assert_eq!(restored.session.self_username(), "@me");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip_resumes_new_client() {
        let transport = Arc::new(MockTransport::new());
        let client = logged_in_client(transport.clone()).await;
        let store = MemorySnapshotStore::new();
        client.save_snapshot(&store).await.unwrap();

        let fresh_transport = Arc::new(MockTransport::new());
        let fresh = Client::new(ClientConfig::immediate(), fresh_transport.clone());
        fresh.resume_from_snapshot(store.load().unwrap(), None).await.unwrap();

        assert_eq!(fresh.me().await.map(|p| p.username), Some("@me".to_string()));
        assert_eq!(
            fresh_transport.export_cookies().get("wxuin").map(String::as_str),
            Some("1")
        );
    }
}
