use std::{collections::HashMap, path::PathBuf};

use serde::{Deserialize, Serialize};
use trc::{AddContext, IntoErr};
use utils::KeyedLocks;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyStatus {
    Ok,
    Fail,
}

/// One indexed message: enough to re-derive its file key from the keyring
/// without re-fetching or re-verifying the sender chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub msg_type: String,
    pub delivery_ts: i64,
    pub from: asmail_address::Address,
    pub pid: String,
    pub msg_count: u32,
    pub key_status: KeyStatus,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OnDisk {
    entries: HashMap<String, IndexEntry>,
}

/// The `msgId → {msgType, deliveryTS, decryptInfo}` index, one JSON file
/// per user, mutations serialized by a single named lock so disk contents
/// always match the last completed write.
pub struct InboxIndex {
    path: PathBuf,
    lock: KeyedLocks<&'static str>,
}

impl InboxIndex {
    pub fn new(path: PathBuf) -> Self {
        InboxIndex {
            path,
            lock: KeyedLocks::new(),
        }
    }

    async fn read(&self) -> OnDisk {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => OnDisk::default(),
        }
    }

    async fn write(&self, data: &OnDisk) -> trc::Result<()> {
        let bytes = serde_json::to_vec_pretty(data).map_err(|err| {
            trc::EventType::Inbox(trc::InboxEvent::MsgIsBroken)
                .into_err()
                .reason(err)
        })?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(&self.path, bytes).await.map_err(io_err)
    }

    pub async fn get(&self, msg_id: &str) -> Option<IndexEntry> {
        let _guard = self.lock.lock("index").await;
        self.read().await.entries.get(msg_id).cloned()
    }

    pub async fn list(&self) -> Vec<(String, IndexEntry)> {
        let _guard = self.lock.lock("index").await;
        self.read().await.entries.into_iter().collect()
    }

    pub async fn upsert(&self, msg_id: String, entry: IndexEntry) -> trc::Result<()> {
        let _guard = self.lock.lock("index").await;
        let mut data = self.read().await;
        data.entries.insert(msg_id, entry);
        self.write(&data).await.caused_by(trc::location!())
    }

    pub async fn remove(&self, msg_id: &str) -> trc::Result<()> {
        let _guard = self.lock.lock("index").await;
        let mut data = self.read().await;
        data.entries.remove(msg_id);
        self.write(&data).await.caused_by(trc::location!())
    }
}

fn io_err(err: std::io::Error) -> trc::Error {
    trc::EventType::Inbox(trc::InboxEvent::MsgIsBroken)
        .into_err()
        .reason(err)
}
