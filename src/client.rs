use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};
use tokio::sync::{mpsc, watch, Mutex, RwLock};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::protocol::{Transport, Uploader};
use crate::state::SessionState;
use crate::store::{ContactStore, FileSnapshotStore, Snapshot, SnapshotStore};
use crate::types::{Identity, LoginState, MediaDownloader, MediaRequest, Message, Profile};

/// High-level client for one account session.
///
/// The receive loop is the only writer of session state and contacts while
/// running; handlers get decoded [`Message`]s through a bounded queue.
pub struct Client {
    pub(crate) config: ClientConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) uploader: Option<Arc<dyn Uploader>>,
    pub(crate) session: Arc<RwLock<SessionState>>,
    pub(crate) contacts: Arc<RwLock<ContactStore>>,
    pub(crate) login_state: RwLock<LoginState>,
    pub(crate) alive: watch::Sender<bool>,
    pub(crate) inbound_tx: mpsc::Sender<Message>,
    pub(crate) inbound_rx: Mutex<mpsc::Receiver<Message>>,
    pub(crate) downloader: Arc<dyn MediaDownloader>,
}

/// Resolves media requests against the current session.
struct SessionDownloader {
    transport: Arc<dyn Transport>,
    session: Arc<RwLock<SessionState>>,
}

#[async_trait]
impl MediaDownloader for SessionDownloader {
    async fn download(&self, request: &MediaRequest) -> ClientResult<Vec<u8>> {
        let session = self.session.read().await.clone();
        self.transport.download(&session, request).await
    }
}

impl Client {
    /// Instantiate a client over the given transport.
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let session = Arc::new(RwLock::new(SessionState::new()));
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_queue_capacity.max(1));
        let (alive, _) = watch::channel(false);
        let downloader: Arc<dyn MediaDownloader> = Arc::new(SessionDownloader {
            transport: transport.clone(),
            session: session.clone(),
        });
        Self {
            config,
            transport,
            uploader: None,
            session,
            contacts: Arc::new(RwLock::new(ContactStore::new())),
            login_state: RwLock::new(LoginState::Unauthenticated),
            alive,
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            downloader,
        }
    }

    /// Attach the collaborator used to upload outgoing files.
    pub fn with_uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Copy of the current session state.
    pub async fn session(&self) -> SessionState {
        self.session.read().await.clone()
    }

    /// The authenticated account, once logged in.
    pub async fn me(&self) -> Option<Profile> {
        self.session.read().await.user.clone()
    }

    pub async fn login_state(&self) -> LoginState {
        *self.login_state.read().await
    }

    pub(crate) async fn set_login_state(&self, state: LoginState) {
        *self.login_state.write().await = state;
    }

    /// Look up a cached identity by username.
    pub async fn contact(&self, username: &str) -> Option<Identity> {
        self.contacts.read().await.get(username)
    }

    /// Copy of the whole contact cache.
    pub async fn contacts(&self) -> ContactStore {
        self.contacts.read().await.clone()
    }

    pub fn is_alive(&self) -> bool {
        *self.alive.borrow()
    }

    /// Ask the receive loop to stop at its next iteration boundary.
    pub fn stop(&self) {
        self.alive.send_replace(false);
    }

    /// Wait for the next decoded message when not using [`Client::run`].
    pub async fn next_message(&self) -> Option<Message> {
        self.inbound_rx.lock().await.recv().await
    }

    /// Take a queued message without waiting.
    pub async fn try_next_message(&self) -> Option<Message> {
        self.inbound_rx.lock().await.try_recv().ok()
    }

    pub(crate) async fn enqueue(&self, message: Message) {
        if let Err(e) = self.inbound_tx.send(message).await {
            warn!(target: "Client/Sync", "Inbound queue closed, dropping message {}", e.0.message_id);
        }
    }

    /// Bundle session, cookies and contacts into a snapshot.
    pub async fn snapshot(&self) -> Snapshot {
        let session = self.session.read().await.clone();
        let contacts = self.contacts.read().await.clone();
        Snapshot::new(session, self.transport.export_cookies(), contacts)
    }

    /// Write a snapshot to `path`, or to the configured default location.
    pub async fn dump_snapshot(&self, path: Option<&Path>) -> ClientResult<()> {
        let path = path.unwrap_or(self.config.snapshot_path.as_path());
        let store = FileSnapshotStore::new(path);
        self.save_snapshot(&store).await
    }

    pub async fn save_snapshot(&self, store: &dyn SnapshotStore) -> ClientResult<()> {
        let snapshot = self.snapshot().await;
        store.save(&snapshot)?;
        info!(target: "Client/Login", "Dumped login status for hot reload");
        Ok(())
    }

    /// Log out remotely and drop all local state.
    pub async fn logout(&self) -> ClientResult<()> {
        self.stop();
        let session = self.session().await;
        let result = if session.is_authenticated() {
            self.transport.logout(&session).await
        } else {
            Ok(())
        };
        self.clear_local_state().await;
        result
    }

    /// Forget credentials, cookies and contacts.
    pub(crate) async fn clear_local_state(&self) {
        self.session.write().await.clear();
        self.contacts.write().await.clear();
        self.transport.clear_cookies();
        self.set_login_state(LoginState::Unauthenticated).await;
    }

    pub(crate) async fn require_login(&self) -> ClientResult<SessionState> {
        let session = self.session().await;
        if session.is_authenticated() {
            Ok(session)
        } else {
            Err(ClientError::Login("client is not logged in".into()))
        }
    }
}
