//! Inbox engine: receives newly delivered messages, keeps an index mapping
//! `msgId` to its decrypt state, and caches recently opened bodies so a
//! reader re-opening the same message doesn't pay for another decrypt.

pub mod index;

use std::{future::Future, path::PathBuf, pin::Pin, sync::Arc, time::Duration};

use asmail_keyring::Keyring;
use asmail_message::{open_message, OpenedMessage, PackedMessage};
use trc::{AddContext, IntoErr};
use utils::{KeyedLocks, TtlWeakCache};

pub use index::{IndexEntry, InboxIndex, KeyStatus};

pub struct MessageSummary {
    pub msg_id: String,
    pub delivery_ts: i64,
}

/// The ASMail retrieval transport contract: implementations live outside
/// this crate.
pub trait MessageSource: Send + Sync {
    fn list_since<'a>(
        &'a self,
        from_ts: i64,
    ) -> Pin<Box<dyn Future<Output = trc::Result<Vec<MessageSummary>>> + Send + 'a>>;

    fn fetch<'a>(
        &'a self,
        msg_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = trc::Result<Vec<u8>>> + Send + 'a>>;

    fn delete<'a>(&'a self, msg_id: &'a str) -> Pin<Box<dyn Future<Output = trc::Result<()>> + Send + 'a>>;
}

pub struct InboxEngine {
    index: InboxIndex,
    keyring: Arc<Keyring>,
    mailerid_domain: String,
    grace_secs: i64,
    reader_cache: TtlWeakCache<String, OpenedMessage>,
    locks: KeyedLocks<String>,
}

impl InboxEngine {
    pub fn new(
        index_path: PathBuf,
        keyring: Arc<Keyring>,
        mailerid_domain: String,
        grace_secs: i64,
    ) -> Self {
        InboxEngine {
            index: InboxIndex::new(index_path),
            keyring,
            mailerid_domain,
            grace_secs,
            reader_cache: TtlWeakCache::new(Duration::from_secs(60)),
            locks: KeyedLocks::new(),
        }
    }

    /// Receive path for a newly delivered message: opens it, records the
    /// index entry, and caches the decrypted body. A cryptographic mismatch
    /// leaves a `Fail` entry in the index rather than dropping it, so an
    /// operator can still inspect it.
    pub async fn receive(
        &self,
        msg_id: String,
        delivery_ts: i64,
        raw: &[u8],
        now: i64,
    ) -> trc::Result<Arc<OpenedMessage>> {
        let _guard = self.locks.lock(msg_id.clone()).await;

        let packed: PackedMessage = serde_json::from_slice(raw).map_err(|err| {
            trc::EventType::Inbox(trc::InboxEvent::MsgIsBroken)
                .into_err()
                .reason(err)
        })?;

        let open_result = open_message(&packed, &self.keyring, &self.mailerid_domain, now, self.grace_secs).await;
        let key_status = if open_result.is_ok() { KeyStatus::Ok } else { KeyStatus::Fail };
        let msg_type = open_result
            .as_ref()
            .map(|opened| opened.msg_type.clone())
            .unwrap_or_else(|_| "unknown".to_string());
        self.index
            .upsert(
                msg_id.clone(),
                IndexEntry {
                    msg_type,
                    delivery_ts,
                    from: packed.header.from.clone(),
                    pid: packed.header.pid.clone(),
                    msg_count: packed.header.msg_count,
                    key_status,
                },
            )
            .await
            .caused_by(trc::location!())?;

        let opened = Arc::new(open_result?);
        self.reader_cache.insert(msg_id, opened.clone());
        Ok(opened)
    }

    pub async fn cached_body(&self, msg_id: &str) -> Option<Arc<OpenedMessage>> {
        self.reader_cache.get(&msg_id.to_string())
    }

    pub async fn index_entry(&self, msg_id: &str) -> Option<IndexEntry> {
        self.index.get(msg_id).await
    }

    /// Reconciles with the server when given a source, fetching and
    /// opening anything server-side not yet indexed; falls back to the
    /// index alone when the server call fails with a connection error.
    pub async fn list_msgs(
        &self,
        from_ts: i64,
        source: Option<&dyn MessageSource>,
        now: i64,
    ) -> trc::Result<Vec<(String, IndexEntry)>> {
        let Some(source) = source else {
            return Ok(self.index.list().await);
        };

        match source.list_since(from_ts).await {
            Ok(remote) => {
                for summary in remote {
                    if self.index.get(&summary.msg_id).await.is_some() {
                        continue;
                    }
                    let raw = source
                        .fetch(&summary.msg_id)
                        .await
                        .caused_by(trc::location!())?;
                    let _ = self
                        .receive(summary.msg_id, summary.delivery_ts, &raw, now)
                        .await;
                }
                Ok(self.index.list().await)
            }
            Err(err) if err.event_type().is_recoverable() => Ok(self.index.list().await),
            Err(err) => Err(err),
        }
    }

    /// Idempotent, serialized per id so a double-click collapses into one
    /// removal.
    pub async fn remove_msg(&self, msg_id: &str, source: Option<&dyn MessageSource>) -> trc::Result<()> {
        let _guard = self.locks.lock(msg_id.to_string()).await;
        self.index.remove(msg_id).await.caused_by(trc::location!())?;
        self.reader_cache.remove(&msg_id.to_string());
        if let Some(source) = source {
            let _ = source.delete(msg_id).await;
        }
        Ok(())
    }
}
