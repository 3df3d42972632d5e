use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Base configuration used by the client and its HTTP transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Login host used for QR issuance, scan polling and push login.
    pub login_url: String,
    /// Identifier sent in the client user agent string.
    pub user_agent: String,
    /// Application id presented when requesting a QR uuid.
    pub app_id: String,
    /// Value of the `client-version` header sent while establishing the session.
    pub client_version: String,
    /// Optional `extspam` header sent while establishing the session.
    pub extspam: Option<String>,
    /// Timeout applied to every HTTP request.
    pub request_timeout: Duration,
    /// Pause between heartbeat polls when the server reports nothing new.
    pub heartbeat_interval: Duration,
    /// Pause before retrying a failed receive cycle.
    pub retry_delay: Duration,
    /// Consecutive receive failures tolerated before the session is declared dead.
    pub receive_retry_bound: u32,
    /// Pause between scan-status polls while waiting for confirmation.
    pub scan_poll_interval: Duration,
    /// Number of QR codes issued before login gives up.
    pub qr_issue_attempts: u32,
    /// Maximum usernames per batched contact request.
    pub batch_contact_cap: usize,
    /// Capacity of the inbound message queue.
    pub inbound_queue_capacity: usize,
    /// Default location of the hot-reload snapshot.
    pub snapshot_path: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            login_url: "https://login.weixin.qq.com".into(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36".into(),
            app_id: "wx782c26e4c19acffb".into(),
            client_version: "2.0.0".into(),
            extspam: None,
            request_timeout: Duration::from_secs(35),
            heartbeat_interval: Duration::from_secs(5),
            retry_delay: Duration::from_secs(1),
            receive_retry_bound: 5,
            scan_poll_interval: Duration::from_secs(2),
            qr_issue_attempts: 5,
            batch_contact_cap: 50,
            inbound_queue_capacity: 1024,
            snapshot_path: PathBuf::from("vchat.json"),
        }
    }
}

impl ClientConfig {
    /// Override the login host.
    pub fn with_login_url(mut self, url: impl Into<String>) -> Self {
        self.login_url = url.into();
        self
    }

    /// Override the user agent string.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the `extspam` header sent while establishing the session.
    pub fn with_extspam(mut self, extspam: impl Into<String>) -> Self {
        self.extspam = Some(extspam.into());
        self
    }

    /// Override the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the heartbeat pause.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Override the pause before a receive retry.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Override the number of consecutive receive failures tolerated.
    pub fn with_receive_retry_bound(mut self, bound: u32) -> Self {
        self.receive_retry_bound = bound;
        self
    }

    /// Override the pause between scan-status polls.
    pub fn with_scan_poll_interval(mut self, interval: Duration) -> Self {
        self.scan_poll_interval = interval;
        self
    }

    /// Override how many QR codes are issued before login fails.
    pub fn with_qr_issue_attempts(mut self, attempts: u32) -> Self {
        self.qr_issue_attempts = attempts;
        self
    }

    /// Override the batched contact request cap.
    pub fn with_batch_contact_cap(mut self, cap: usize) -> Self {
        self.batch_contact_cap = cap.max(1);
        self
    }

    /// Override the inbound queue capacity.
    pub fn with_inbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.inbound_queue_capacity = capacity.max(1);
        self
    }

    /// Override the default snapshot location.
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = path.into();
        self
    }

    /// A configuration with every timer zeroed, for driving the loops in tests.
    #[cfg(test)]
    pub(crate) fn immediate() -> Self {
        Self::default()
            .with_heartbeat_interval(Duration::ZERO)
            .with_retry_delay(Duration::ZERO)
            .with_scan_poll_interval(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol_limits() {
        let config = ClientConfig::default();
        assert_eq!(config.receive_retry_bound, 5);
        assert_eq!(config.qr_issue_attempts, 5);
        assert_eq!(config.batch_contact_cap, 50);
    }

    #[test]
    fn test_builder_overrides() {
        let config = ClientConfig::default()
            .with_batch_contact_cap(0)
            .with_receive_retry_bound(2)
            .with_extspam("blob");
        assert_eq!(config.batch_contact_cap, 1);
        assert_eq!(config.receive_retry_bound, 2);
        assert_eq!(config.extspam.as_deref(), Some("blob"));
    }
}
