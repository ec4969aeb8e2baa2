//! Object cache: a local, content-addressed store for XSP objects backed by
//! a remote 3NStorage-shaped service, supporting partial downloads so a
//! reader touching one byte range of a large object doesn't have to pull
//! the whole thing first.

mod ranges;

use std::{
    future::Future,
    path::{Path, PathBuf},
    pin::Pin,
    sync::Arc,
};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use trc::{AddContext, IntoErr};
use utils::KeyedLocks;

pub use ranges::RangeSet;

/// The remote transport contract: a 3NStorage-shaped HTTP service this
/// crate fetches segments from and pushes completed objects to.
pub trait RemoteObjectStore: Send + Sync {
    fn fetch_range<'a>(
        &'a self,
        id: &'a str,
        offset: u64,
        len: u64,
    ) -> Pin<Box<dyn Future<Output = trc::Result<Vec<u8>>> + Send + 'a>>;

    fn total_size<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = trc::Result<u64>> + Send + 'a>>;

    fn push<'a>(
        &'a self,
        id: &'a str,
        bytes: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = trc::Result<()>> + Send + 'a>>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Manifest {
    total_size: Option<u64>,
    downloaded: RangeSet,
}

/// Computes the content address for `bytes`: the storage id that
/// [`ObjectCache::put`] returns and every future `get` for these exact
/// bytes must use.
pub fn content_id(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(blake3::hash(bytes).as_bytes())
}

pub struct ObjectCache<R: RemoteObjectStore> {
    root: PathBuf,
    remote: R,
    locks: KeyedLocks<String>,
}

impl<R: RemoteObjectStore> ObjectCache<R> {
    pub fn new(root: PathBuf, remote: R) -> Self {
        ObjectCache {
            root,
            remote,
            locks: KeyedLocks::new(),
        }
    }

    fn data_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.data"))
    }

    fn manifest_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.manifest.json"))
    }

    async fn read_manifest(&self, id: &str) -> Manifest {
        match tokio::fs::read(self.manifest_path(id)).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => Manifest::default(),
        }
    }

    async fn write_manifest(&self, id: &str, manifest: &Manifest) -> trc::Result<()> {
        let bytes = serde_json::to_vec(manifest).map_err(|err| {
            trc::EventType::Storage(trc::StorageEvent::ObjNotFound)
                .into_err()
                .reason(err)
        })?;
        tokio::fs::write(self.manifest_path(id), bytes)
            .await
            .map_err(io_err)
    }

    /// Fetches `[offset, offset+len)` of object `id`, downloading only the
    /// sub-ranges not already cached locally.
    pub async fn get_range(&self, id: &str, offset: u64, len: u64) -> trc::Result<Vec<u8>> {
        let _guard = self.locks.lock(id.to_string()).await;

        let mut manifest = self.read_manifest(id).await;
        let total_size = match manifest.total_size {
            Some(size) => size,
            None => {
                let size = self.remote.total_size(id).await.caused_by(trc::location!())?;
                manifest.total_size = Some(size);
                size
            }
        };
        let end = (offset + len).min(total_size);
        if end <= offset {
            return Ok(Vec::new());
        }

        ensure_file(&self.data_path(id)).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(self.data_path(id))
            .await
            .map_err(io_err)?;

        for (gap_start, gap_end) in manifest.downloaded.missing(offset, end) {
            let fetched = self
                .remote
                .fetch_range(id, gap_start, gap_end - gap_start)
                .await
                .caused_by(trc::location!())?;
            file.seek(std::io::SeekFrom::Start(gap_start))
                .await
                .map_err(io_err)?;
            file.write_all(&fetched).await.map_err(io_err)?;
            manifest.downloaded.insert(gap_start, gap_end);
        }
        self.write_manifest(id, &manifest).await?;

        let mut out = vec![0u8; (end - offset) as usize];
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(io_err)?;
        file.read_exact(&mut out).await.map_err(io_err)?;
        Ok(out)
    }

    /// Fetches the whole object, downloading whatever part of it is not
    /// already cached.
    pub async fn get(&self, id: &str) -> trc::Result<Arc<Vec<u8>>> {
        let total_size = {
            let manifest = self.read_manifest(id).await;
            match manifest.total_size {
                Some(size) => size,
                None => self.remote.total_size(id).await.caused_by(trc::location!())?,
            }
        };
        let bytes = self.get_range(id, 0, total_size).await?;
        Ok(Arc::new(bytes))
    }

    /// Stores `bytes` both locally and on the remote, addressed by the
    /// content id derived from `bytes` itself.
    pub async fn put(&self, bytes: &[u8]) -> trc::Result<String> {
        let id = content_id(bytes);
        let _guard = self.locks.lock(id.clone()).await;

        tokio::fs::write(self.data_path(&id), bytes)
            .await
            .map_err(io_err)?;
        let mut manifest = Manifest::default();
        manifest.total_size = Some(bytes.len() as u64);
        manifest.downloaded.insert(0, bytes.len() as u64);
        self.write_manifest(&id, &manifest).await?;

        self.remote.push(&id, bytes).await.caused_by(trc::location!())?;
        Ok(id)
    }

    /// Drops the local cache entry for `id`. The remote copy is untouched;
    /// callers that mean to delete the object remotely go through its
    /// owner (XSP filesystem node removal, delivery cleanup).
    pub async fn evict(&self, id: &str) -> trc::Result<()> {
        let _guard = self.locks.lock(id.to_string()).await;
        let _ = tokio::fs::remove_file(self.data_path(id)).await;
        let _ = tokio::fs::remove_file(self.manifest_path(id)).await;
        Ok(())
    }
}

async fn ensure_file(path: &Path) -> trc::Result<()> {
    if tokio::fs::metadata(path).await.is_err() {
        tokio::fs::write(path, []).await.map_err(io_err)?;
    }
    Ok(())
}

fn io_err(err: std::io::Error) -> trc::Error {
    trc::EventType::Storage(trc::StorageEvent::ObjNotFound)
        .into_err()
        .reason(err)
}
