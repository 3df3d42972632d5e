use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::Profile;

/// Opaque position in the event stream, advanced by every fetch.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SyncCursor {
    /// `SyncKey` object passed back verbatim on the next fetch.
    pub key: Value,
    /// Flattened `k_v|k_v` form used by the poll endpoint.
    pub check: String,
}

impl SyncCursor {
    pub fn new(key: Value, check: impl Into<String>) -> Self {
        Self {
            key,
            check: check.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_null() && self.check.is_empty()
    }
}

/// Authentication artifacts needed to sign every request after login.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SessionState {
    /// Main API endpoint, e.g. `https://wx2.qq.com/cgi-bin/mmwebwx-bin`.
    pub base_url: Option<String>,
    /// Endpoint used for media uploads and downloads.
    pub file_url: Option<String>,
    /// Endpoint used by the long poll.
    pub sync_url: Option<String>,
    pub device_id: String,
    pub skey: String,
    pub wxsid: String,
    pub wxuin: String,
    pub pass_ticket: String,
    /// `webwx_data_ticket` cookie, required for attachment downloads.
    pub data_ticket: String,
    pub cursor: SyncCursor,
    /// Member count above which adding members must go through an invitation.
    pub invite_start_count: u32,
    /// The authenticated account itself.
    pub user: Option<Profile>,
    pub login_time: Option<DateTime<Utc>>,
}

impl SessionState {
    /// Fresh state with a newly generated device id.
    pub fn new() -> Self {
        Self {
            device_id: generate_device_id(),
            ..Default::default()
        }
    }

    /// Whether login completed and tokens are present.
    pub fn is_authenticated(&self) -> bool {
        self.base_url.is_some() && !self.skey.is_empty() && self.user.is_some()
    }

    /// Username of the authenticated account, or an empty string.
    pub fn self_username(&self) -> &str {
        self.user.as_ref().map(|u| u.username.as_str()).unwrap_or("")
    }

    /// `BaseRequest` block carried in every JSON request body.
    pub fn base_request(&self) -> Value {
        json!({
            "Uin": self.wxuin,
            "Sid": self.wxsid,
            "Skey": self.skey,
            "DeviceID": self.device_id,
        })
    }

    /// Drop every credential, keeping nothing from the previous session.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Device ids are `e` followed by fifteen random digits.
pub fn generate_device_id() -> String {
    let mut rng = rand::thread_rng();
    let digits: String = (0..15)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect();
    format!("e{}", digits)
}
