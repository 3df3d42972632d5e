//! The long-poll receive loop.
//!
//! One cycle polls, and when the server announces pending events, fetches
//! them, stores the new cursor, applies contact deltas, then decodes and
//! enqueues every event in arrival order.

use log::{debug, error, info, warn};
use tokio::time::sleep;

use crate::client::Client;
use crate::error::ClientResult;
use crate::protocol::wire::SyncBatch;

/// Invoked once after the receive loop has stopped and logged out.
pub type ExitCallback = Box<dyn FnOnce() -> ClientResult<()> + Send>;

/// Poll code meaning nothing is pending.
const HEARTBEAT_SELECTOR: &str = "0";

/// Result of one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SyncOutcome {
    Heartbeat,
    /// Events were fetched; carries how many were enqueued.
    Fetched(usize),
    /// The server no longer recognises the session.
    SessionGone,
}

impl Client {
    /// Mark the session alive and run the receive loop until it dies or
    /// [`Client::stop`] is called.
    pub async fn start_receiving(&self, exit_callback: Option<ExitCallback>) -> ClientResult<()> {
        self.require_login().await?;
        self.alive.send_replace(true);
        self.receive_loop(exit_callback).await;
        Ok(())
    }

    pub(crate) async fn receive_loop(&self, exit_callback: Option<ExitCallback>) {
        info!(target: "Client/Sync", "Start receiving messages");
        let bound = self.config.receive_retry_bound;
        let mut retries = 0u32;

        while self.is_alive() {
            match self.sync_once().await {
                Ok(SyncOutcome::SessionGone) => {
                    info!(target: "Client/Sync", "Server closed the session");
                    break;
                }
                Ok(SyncOutcome::Heartbeat) => {
                    retries = 0;
                    info!(target: "Client/Sync", "heartbeat");
                    sleep(self.config.heartbeat_interval).await;
                }
                Ok(SyncOutcome::Fetched(count)) => {
                    retries = 0;
                    debug!(target: "Client/Sync", "Enqueued {} messages", count);
                }
                Err(e) if e.is_recoverable() => {
                    retries += 1;
                    if retries > bound {
                        error!(
                            target: "Client/Sync",
                            "Giving up after {} consecutive failures: {}", retries, e
                        );
                        break;
                    }
                    warn!(target: "Client/Sync", "Receive failed ({}/{}): {}", retries, bound, e);
                    sleep(self.config.retry_delay).await;
                }
                Err(e) => {
                    error!(target: "Client/Sync", "Receive loop aborted: {}", e);
                    break;
                }
            }
        }

        self.alive.send_replace(false);
        self.shutdown(exit_callback).await;
    }

    /// One poll, and one fetch if the poll announced events.
    pub(crate) async fn sync_once(&self) -> ClientResult<SyncOutcome> {
        let session = self.session().await;
        match self.transport.poll(&session).await? {
            None => Ok(SyncOutcome::SessionGone),
            Some(selector) if selector == HEARTBEAT_SELECTOR => Ok(SyncOutcome::Heartbeat),
            Some(selector) => {
                debug!(target: "Client/Sync", "Poll selector {}, fetching events", selector);
                let batch = self.transport.fetch_events(&session).await?;
                Ok(SyncOutcome::Fetched(self.absorb_batch(batch).await))
            }
        }
    }

    /// Apply a fetched batch. The cursor is stored before anything else.
    pub(crate) async fn absorb_batch(&self, batch: SyncBatch) -> usize {
        let SyncBatch {
            events,
            contact_deltas,
            cursor,
        } = batch;

        if !cursor.is_empty() {
            self.session.write().await.cursor = cursor;
        }
        if !contact_deltas.is_empty() {
            debug!(target: "Client/Sync", "Applying {} contact updates", contact_deltas.len());
            self.contacts.write().await.apply_raw(contact_deltas.iter());
        }

        let count = events.len();
        for event in events {
            let message = self.decode_event(event).await;
            self.enqueue(message).await;
        }
        count
    }

    /// Remote logout, local cleanup, then the exit callback. Nothing here fails.
    async fn shutdown(&self, exit_callback: Option<ExitCallback>) {
        let session = self.session().await;
        if let Err(e) = self.transport.logout(&session).await {
            warn!(target: "Client/Sync", "Logout after receive loop failed: {}", e);
        }
        self.clear_local_state().await;
        info!(target: "Client/Sync", "Logged out");

        if let Some(callback) = exit_callback {
            if let Err(e) = callback() {
                warn!(target: "Client/Sync", "Exit callback failed: {}", e);
            }
        }
    }
}
