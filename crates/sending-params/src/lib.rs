//! Sending-params store: two synced-file-backed tables, our own
//! suggested/in-use params per correspondent and the params others have
//! sent us, each its own JSON file mutated under a single named lock so
//! disk contents always match the last completed write.

use std::{collections::HashMap, path::PathBuf};

use asmail_address::Address;
use serde::{Deserialize, Serialize};
use trc::{AddContext, IntoErr};
use utils::KeyedLocks;

/// One side of a correspondent's params: when they were minted and, if
/// this is an invitation, the invite label plus whether it authenticates
/// the sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamsEntry {
    pub timestamp: i64,
    pub invitation: Option<String>,
    pub auth: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OwnParamEntry {
    pub suggested: Option<ParamsEntry>,
    pub in_use: Option<ParamsEntry>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OwnParamsOnDisk {
    by_address: HashMap<Address, OwnParamEntry>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OthersParamsOnDisk {
    by_address: HashMap<Address, ParamsEntry>,
}

pub struct SendingParamsStore {
    own_path: PathBuf,
    others_path: PathBuf,
    locks: KeyedLocks<&'static str>,
}

impl SendingParamsStore {
    pub fn new(root: PathBuf) -> Self {
        SendingParamsStore {
            own_path: root.join("own-params.json"),
            others_path: root.join("params-from-others.json"),
            locks: KeyedLocks::new(),
        }
    }

    async fn read_own(&self) -> OwnParamsOnDisk {
        read_json(&self.own_path).await
    }

    async fn write_own(&self, data: &OwnParamsOnDisk) -> trc::Result<()> {
        write_json(&self.own_path, data).await
    }

    async fn read_others(&self) -> OthersParamsOnDisk {
        read_json(&self.others_path).await
    }

    async fn write_others(&self, data: &OthersParamsOnDisk) -> trc::Result<()> {
        write_json(&self.others_path, data).await
    }

    pub async fn own_params_for(&self, to: &Address) -> Option<OwnParamEntry> {
        let _guard = self.locks.lock("own").await;
        self.read_own().await.by_address.get(to).cloned()
    }

    /// On first outbound to an unknown address, suggests `default` (with a
    /// fresh timestamp) as the address's own params and returns it; on a
    /// repeat call for an address that already has an entry, returns the
    /// existing one untouched.
    pub async fn suggest_for_new_correspondent(
        &self,
        to: &Address,
        default: &ParamsEntry,
        now: i64,
    ) -> trc::Result<OwnParamEntry> {
        let _guard = self.locks.lock("own").await;
        let mut data = self.read_own().await;
        if let Some(existing) = data.by_address.get(to) {
            return Ok(existing.clone());
        }
        let entry = OwnParamEntry {
            suggested: Some(ParamsEntry {
                timestamp: now,
                invitation: default.invitation.clone(),
                auth: default.auth,
            }),
            in_use: None,
        };
        data.by_address.insert(to.clone(), entry.clone());
        self.write_own(&data).await.caused_by(trc::location!())?;
        Ok(entry)
    }

    /// `markOwnSendingParamsAsUsed`: promotes the suggested params for `to`
    /// to in-use, once the peer has echoed the invite back.
    pub async fn mark_own_sending_params_as_used(&self, to: &Address) -> trc::Result<()> {
        let _guard = self.locks.lock("own").await;
        let mut data = self.read_own().await;
        if let Some(entry) = data.by_address.get_mut(to) {
            if let Some(suggested) = entry.suggested.take() {
                entry.in_use = Some(suggested);
            }
        }
        self.write_own(&data).await.caused_by(trc::location!())
    }

    pub async fn others_params_for(&self, from: &Address) -> Option<ParamsEntry> {
        let _guard = self.locks.lock("others").await;
        self.read_others().await.by_address.get(from).cloned()
    }

    /// Records a `nextSendingParams` received from `from`. Updates with a
    /// lower-or-equal timestamp than what's on file are ignored
    /// (last-writer-by-timestamp-wins).
    pub async fn record_params_from_others(
        &self,
        from: &Address,
        entry: ParamsEntry,
    ) -> trc::Result<()> {
        let _guard = self.locks.lock("others").await;
        let mut data = self.read_others().await;
        if let Some(existing) = data.by_address.get(from) {
            if existing.timestamp >= entry.timestamp {
                return Ok(());
            }
        }
        data.by_address.insert(from.clone(), entry);
        self.write_others(&data).await.caused_by(trc::location!())
    }
}

async fn read_json<T: Default + serde::de::DeserializeOwned>(path: &std::path::Path) -> T {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
        Err(_) => T::default(),
    }
}

async fn write_json<T: Serialize>(path: &std::path::Path, data: &T) -> trc::Result<()> {
    let bytes = serde_json::to_vec_pretty(data).map_err(|err| {
        trc::EventType::Storage(trc::StorageEvent::ObjNotFound)
            .into_err()
            .reason(err)
    })?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    tokio::fs::write(path, bytes).await.map_err(io_err)
}

fn io_err(err: std::io::Error) -> trc::Error {
    trc::EventType::Storage(trc::StorageEvent::ObjNotFound)
        .into_err()
        .reason(err)
}
