//! Versioned session snapshots for hot reload.
//!
//! A snapshot bundles the session credentials, the transport cookies and
//! the contact cache. Its bytes are JSON but callers should treat them as
//! opaque.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};
use crate::state::SessionState;
use crate::store::ContactStore;

/// Current snapshot layout version.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub session: SessionState,
    pub cookies: BTreeMap<String, String>,
    pub contacts: ContactStore,
}

impl Snapshot {
    pub fn new(session: SessionState, cookies: BTreeMap<String, String>, contacts: ContactStore) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            session,
            cookies,
            contacts,
        }
    }

    pub fn to_bytes(&self) -> ClientResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a snapshot, rejecting layouts written by another version.
    pub fn from_bytes(bytes: &[u8]) -> ClientResult<Self> {
        let snapshot: Snapshot = serde_json::from_slice(bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(ClientError::OperationFailed(format!(
                "unsupported snapshot version {} (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        Ok(snapshot)
    }
}

/// Storage backend for snapshots.
pub trait SnapshotStore: Send + Sync {
    fn save(&self, snapshot: &Snapshot) -> ClientResult<()>;

    fn load(&self) -> ClientResult<Snapshot>;
}

/// Snapshot kept in a single file.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn save(&self, snapshot: &Snapshot) -> ClientResult<()> {
        std::fs::write(&self.path, snapshot.to_bytes()?)?;
        Ok(())
    }

    fn load(&self) -> ClientResult<Snapshot> {
        Snapshot::from_bytes(&std::fs::read(&self.path)?)
    }
}

/// Snapshot kept in memory, useful when embedding or testing.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    bytes: Mutex<Option<Vec<u8>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&self, snapshot: &Snapshot) -> ClientResult<()> {
        let bytes = snapshot.to_bytes()?;
        *self.bytes.lock().unwrap_or_else(|p| p.into_inner()) = Some(bytes);
        Ok(())
    }

    fn load(&self) -> ClientResult<Snapshot> {
        let guard = self.bytes.lock().unwrap_or_else(|p| p.into_inner());
        let bytes = guard
            .as_ref()
            .ok_or_else(|| ClientError::OperationFailed("no snapshot stored".into()))?;
        Snapshot::from_bytes(bytes)
    }
}
