//! Wire shapes exchanged with the web endpoints.
//!
//! Field names follow the server's PascalCase JSON. Every struct tolerates
//! missing keys; unknown keys are kept in `extra` where they matter.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::state::SyncCursor;
use crate::types::RawEvent;

/// A contact record as the server returns it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct RawContact {
    pub user_name: String,
    pub nick_name: String,
    pub remark_name: String,
    pub display_name: String,
    pub verify_flag: u32,
    pub encry_chat_room_id: String,
    pub member_list: Vec<RawContact>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RawContact {
    pub fn new(user_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            ..Default::default()
        }
    }

    pub fn with_nick_name(mut self, nick_name: impl Into<String>) -> Self {
        self.nick_name = nick_name.into();
        self
    }

    pub fn with_member(mut self, member: RawContact) -> Self {
        self.member_list.push(member);
        self
    }
}

/// `BaseResponse` block carried by most JSON replies.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct BaseResponse {
    pub ret: i64,
    pub err_msg: String,
}

/// One `{Key, Val}` pair of the rolling sync key.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct SyncKeyItem {
    pub key: i64,
    pub val: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct SyncKeyList {
    pub list: Vec<SyncKeyItem>,
}

impl SyncKeyList {
    /// Flatten into the `k_v|k_v` form used by the poll endpoint.
    pub fn to_check_param(&self) -> String {
        self.list
            .iter()
            .map(|item| format!("{}_{}", item.key, item.val))
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// Reply of the session bootstrap call.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct InitReply {
    pub base_response: BaseResponse,
    pub user: RawContact,
    pub sync_key: Value,
    pub invite_start_count: u32,
    pub contact_list: Vec<RawContact>,
}

/// Reply of the event fetch call.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct SyncReply {
    pub base_response: BaseResponse,
    pub sync_key: Value,
    pub sync_check_key: SyncKeyList,
    pub add_msg_list: Vec<RawEvent>,
    pub mod_contact_list: Vec<RawContact>,
}

/// Reply of the paginated contact listing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ContactListReply {
    pub base_response: BaseResponse,
    pub seq: u64,
    pub member_list: Vec<RawContact>,
}

/// Reply of the batched contact lookup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct BatchContactReply {
    pub base_response: BaseResponse,
    pub contact_list: Vec<RawContact>,
}

/// Session bootstrap data handed back to the client.
#[derive(Debug, Clone, Default)]
pub struct InitData {
    pub user: RawContact,
    pub cursor: SyncCursor,
    pub invite_start_count: u32,
    pub contacts: Vec<RawContact>,
}

/// One fetched batch: raw events, contact deltas and the advanced cursor.
#[derive(Debug, Clone, Default)]
pub struct SyncBatch {
    pub events: Vec<RawEvent>,
    pub contact_deltas: Vec<RawContact>,
    pub cursor: SyncCursor,
}

/// One page of the full contact listing. `next_seq == 0` ends the listing.
#[derive(Debug, Clone, Default)]
pub struct ContactPage {
    pub next_seq: u64,
    pub contacts: Vec<RawContact>,
}

/// One entry of a batched contact lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchContactRequest {
    pub username: String,
    /// Encrypted chatroom id when asking for members of a specific chatroom.
    pub chatroom_id: Option<String>,
}

impl BatchContactRequest {
    pub fn contact(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            chatroom_id: None,
        }
    }

    pub fn member(username: impl Into<String>, chatroom_id: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            chatroom_id: Some(chatroom_id.into()),
        }
    }
}

/// Result of one scan-status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanStatus {
    pub code: String,
    /// Full response body; on success it carries the redirect payload.
    pub body: String,
}
