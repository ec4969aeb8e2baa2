//! XSP filesystem: a folder/file/link tree where every node's content is an
//! XSP object under its own key, carrying its own ctime/mtime/size as the
//! object's attrs section. The tree itself is content addressed: writing a
//! node produces a new object id, which its parent's listing must then be
//! updated to point at, all the way up to the single mutable root pointer.
//! Each write is serialized only against other writes to the exact same
//! path; a commit detects a concurrent change elsewhere in the tree via the
//! root pointer's compare-and-swap rather than blocking on it. Callers that
//! need to detect a concurrent change to the node they are about to
//! overwrite pass the version they last observed and get back
//! `FileEvent::VersionMismatch` if it has moved.

mod node;

use std::{path::PathBuf, sync::Arc};

use asmail_object_cache::{ObjectCache, RemoteObjectStore};
use asmail_xsp_codec::{decode_object, encode_object, random_n0, ObjectKey, Payload, KEY_LEN};
use parking_lot::Mutex;
use rand::RngCore;
use trc::{AddContext, IntoErr};
use utils::KeyedLocks;

pub use node::{Entry, FolderListing, NodeAttrs, NodeKind, RootPointer};

/// A node's kind and metadata as returned by [`XspFs::stat`], without
/// pulling its content.
#[derive(Debug, Clone, Copy)]
pub struct NodeInfo {
    pub kind: NodeKind,
    pub version: u32,
    pub attrs: NodeAttrs,
}

fn random_key() -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

fn split_path(path: &str) -> trc::Result<Vec<&str>> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.iter().any(|s| *s == "." || *s == "..") {
        return Err(trc::EventType::File(trc::FileEvent::NotFound)
            .into_err()
            .details("path must not contain '.' or '..' segments"));
    }
    Ok(segments)
}

struct ChainLink {
    name_in_parent: Option<String>,
    node_id: String,
    key: [u8; KEY_LEN],
    listing: FolderListing,
    ctime: i64,
}

pub struct XspFs<R: RemoteObjectStore> {
    cache: Arc<ObjectCache<R>>,
    segment_size: u32,
    root: Mutex<RootPointer>,
    root_pointer_path: PathBuf,
    write_lock: KeyedLocks<String>,
}

impl<R: RemoteObjectStore> XspFs<R> {
    /// Opens the tree rooted at `root_pointer_path`, creating an empty root
    /// folder the first time it is used.
    pub async fn open(
        cache: Arc<ObjectCache<R>>,
        segment_size: u32,
        root_pointer_path: PathBuf,
        now: i64,
    ) -> trc::Result<Self> {
        let root = match tokio::fs::read(&root_pointer_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|err| {
                trc::EventType::File(trc::FileEvent::VersionMismatch)
                    .into_err()
                    .reason(err)
                    .details("corrupt root pointer file")
            })?,
            Err(_) => {
                let fs = XspFs {
                    cache: cache.clone(),
                    segment_size,
                    root: Mutex::new(RootPointer {
                        node_id: String::new(),
                        key: [0u8; KEY_LEN],
                        version: 0,
                    }),
                    root_pointer_path: root_pointer_path.clone(),
                    write_lock: KeyedLocks::new(),
                };
                let (node_id, key) = fs.store_folder(&FolderListing::default(), now, now).await?;
                let root = RootPointer {
                    node_id,
                    key,
                    version: 0,
                };
                fs.persist_root(&root).await?;
                root
            }
        };

        Ok(XspFs {
            cache,
            segment_size,
            root: Mutex::new(root),
            root_pointer_path,
            write_lock: KeyedLocks::new(),
        })
    }

    fn root_snapshot(&self) -> RootPointer {
        self.root.lock().clone()
    }

    async fn persist_root(&self, root: &RootPointer) -> trc::Result<()> {
        let bytes = serde_json::to_vec(root).map_err(|err| {
            trc::EventType::File(trc::FileEvent::VersionMismatch)
                .into_err()
                .reason(err)
        })?;
        tokio::fs::write(&self.root_pointer_path, bytes)
            .await
            .map_err(|err| {
                trc::EventType::Storage(trc::StorageEvent::ObjNotFound)
                    .into_err()
                    .reason(err)
            })
    }

    /// Fetches and decrypts a node's whole object, splitting its plaintext
    /// back into the attrs section every node carries and its raw content.
    async fn load_node(&self, node_id: &str, key: &[u8; KEY_LEN]) -> trc::Result<(NodeAttrs, Vec<u8>)> {
        let bytes = self.cache.get(node_id).await.caused_by(trc::location!())?;
        let decoded = decode_object(&ObjectKey(*key), &bytes)?;
        let attrs_bytes = decoded.attrs.ok_or_else(|| {
            trc::EventType::File(trc::FileEvent::VersionMismatch)
                .into_err()
                .details("node object missing its attrs section")
        })?;
        let attrs: NodeAttrs = serde_json::from_slice(&attrs_bytes).map_err(|err| {
            trc::EventType::File(trc::FileEvent::VersionMismatch)
                .into_err()
                .reason(err)
                .details("corrupt node attrs")
        })?;
        Ok((attrs, decoded.content))
    }

    /// Seals `content` into a fresh node object carrying `ctime`/`now`/size
    /// as its attrs section. `ctime` is the caller's responsibility to
    /// carry forward from the node being replaced, if any; a brand new node
    /// passes `now` for both.
    async fn store_node(&self, ctime: i64, now: i64, content: &[u8]) -> trc::Result<(String, [u8; KEY_LEN])> {
        let key = random_key();
        let attrs = NodeAttrs {
            ctime,
            mtime: now,
            size: content.len() as u64,
        };
        let attrs_bytes = serde_json::to_vec(&attrs).map_err(|err| {
            trc::EventType::File(trc::FileEvent::VersionMismatch)
                .into_err()
                .reason(err)
        })?;
        let encoded = encode_object(
            &ObjectKey(key),
            random_n0(),
            self.segment_size,
            Payload::WithAttrs {
                attrs: &attrs_bytes,
                content,
            },
        )?;
        let id = self.cache.put(&encoded).await?;
        Ok((id, key))
    }

    async fn load_folder(&self, node_id: &str, key: &[u8; KEY_LEN]) -> trc::Result<(NodeAttrs, FolderListing)> {
        let (attrs, content) = self.load_node(node_id, key).await?;
        let listing = serde_json::from_slice(&content).map_err(|err| {
            trc::EventType::File(trc::FileEvent::VersionMismatch)
                .into_err()
                .reason(err)
                .details("corrupt folder listing")
        })?;
        Ok((attrs, listing))
    }

    async fn store_folder(&self, listing: &FolderListing, ctime: i64, now: i64) -> trc::Result<(String, [u8; KEY_LEN])> {
        let plain = serde_json::to_vec(listing).map_err(|err| {
            trc::EventType::File(trc::FileEvent::VersionMismatch)
                .into_err()
                .reason(err)
        })?;
        self.store_node(ctime, now, &plain).await
    }

    /// Loads the chain of folders from the root down to (and including) the
    /// folder named by `segments`.
    async fn descend(&self, segments: &[&str]) -> trc::Result<Vec<ChainLink>> {
        let root = self.root_snapshot();
        let (root_attrs, root_listing) = self.load_folder(&root.node_id, &root.key).await?;
        let mut chain = vec![ChainLink {
            name_in_parent: None,
            node_id: root.node_id.clone(),
            key: root.key,
            listing: root_listing,
            ctime: root_attrs.ctime,
        }];

        for segment in segments {
            let current = chain.last().unwrap();
            let entry = current.listing.find(segment).ok_or_else(|| {
                trc::EventType::File(trc::FileEvent::NotFound)
                    .into_err()
                    .details(format!("no such folder: {segment}"))
            })?;
            if entry.kind != NodeKind::Folder {
                return Err(trc::EventType::File(trc::FileEvent::NotFound)
                    .into_err()
                    .details(format!("{segment} is not a folder")));
            }
            let (attrs, listing) = self.load_folder(&entry.node_id, &entry.key).await?;
            chain.push(ChainLink {
                name_in_parent: Some(segment.to_string()),
                node_id: entry.node_id.clone(),
                key: entry.key,
                listing,
                ctime: attrs.ctime,
            });
        }
        Ok(chain)
    }

    /// Re-stores every folder in `chain` bottom-up, threading each new id
    /// into its parent's listing, and finally compare-and-swaps the root
    /// pointer. This is what makes one leaf write visible from the root.
    async fn commit(&self, mut chain: Vec<ChainLink>, now: i64) -> trc::Result<()> {
        while chain.len() > 1 {
            let child = chain.pop().unwrap();
            let (new_id, new_key) = self.store_folder(&child.listing, child.ctime, now).await?;
            let parent = chain.last_mut().unwrap();
            let name = child.name_in_parent.expect("non-root link always has a name");
            parent.listing.upsert(Entry::new(name, NodeKind::Folder, new_id, new_key));
            parent.listing.version += 1;
        }

        let root_link = chain.into_iter().next().expect("chain always has a root");
        let (new_id, new_key) = self.store_folder(&root_link.listing, root_link.ctime, now).await?;

        let mut root = self.root.lock();
        if root.node_id != root_link.node_id {
            return Err(trc::EventType::File(trc::FileEvent::ConcurrentUpdate)
                .into_err()
                .details("root moved while this change was being prepared"));
        }
        root.node_id = new_id;
        root.key = new_key;
        root.version += 1;
        let snapshot = root.clone();
        drop(root);
        self.persist_root(&snapshot).await
    }

    pub async fn list_folder(&self, path: &str) -> trc::Result<Vec<Entry>> {
        let segments = split_path(path)?;
        let chain = self.descend(&segments).await?;
        Ok(chain.last().unwrap().listing.entries.clone())
    }

    pub async fn folder_version(&self, path: &str) -> trc::Result<u32> {
        let segments = split_path(path)?;
        let chain = self.descend(&segments).await?;
        Ok(chain.last().unwrap().listing.version)
    }

    /// A node's kind, own version, and attrs without pulling its content.
    pub async fn stat(&self, path: &str) -> trc::Result<NodeInfo> {
        let mut segments = split_path(path)?;
        let name = segments.pop().ok_or_else(|| {
            trc::EventType::File(trc::FileEvent::NotFound)
                .into_err()
                .details("empty path")
        })?;
        let chain = self.descend(&segments).await?;
        let entry = chain.last().unwrap().listing.find(name).ok_or_else(|| {
            trc::EventType::File(trc::FileEvent::NotFound)
                .into_err()
                .details(format!("no such entry: {name}"))
        })?;
        let (attrs, _) = self.load_node(&entry.node_id, &entry.key).await?;
        Ok(NodeInfo {
            kind: entry.kind,
            version: entry.version,
            attrs,
        })
    }

    pub async fn read_file(&self, path: &str) -> trc::Result<Vec<u8>> {
        let mut segments = split_path(path)?;
        let name = segments.pop().ok_or_else(|| {
            trc::EventType::File(trc::FileEvent::NotFound)
                .into_err()
                .details("empty file path")
        })?;
        let chain = self.descend(&segments).await?;
        let entry = chain.last().unwrap().listing.find(name).ok_or_else(|| {
            trc::EventType::File(trc::FileEvent::NotFound)
                .into_err()
                .details(format!("no such file: {name}"))
        })?;
        if entry.kind != NodeKind::File {
            return Err(trc::EventType::File(trc::FileEvent::NotFound)
                .into_err()
                .details(format!("{name} is not a file")));
        }
        let (_, content) = self.load_node(&entry.node_id, &entry.key).await?;
        Ok(content)
    }

    pub async fn read_link(&self, path: &str) -> trc::Result<String> {
        let mut segments = split_path(path)?;
        let name = segments.pop().ok_or_else(|| {
            trc::EventType::File(trc::FileEvent::NotFound)
                .into_err()
                .details("empty link path")
        })?;
        let chain = self.descend(&segments).await?;
        let entry = chain.last().unwrap().listing.find(name).ok_or_else(|| {
            trc::EventType::File(trc::FileEvent::NotFound)
                .into_err()
                .details(format!("no such link: {name}"))
        })?;
        if entry.kind != NodeKind::Link {
            return Err(trc::EventType::File(trc::FileEvent::NotFound)
                .into_err()
                .details(format!("{name} is not a link")));
        }
        let (_, content) = self.load_node(&entry.node_id, &entry.key).await?;
        String::from_utf8(content).map_err(|err| {
            trc::EventType::File(trc::FileEvent::VersionMismatch)
                .into_err()
                .reason(err)
                .details("link target is not valid utf-8")
        })
    }

    /// Writes `bytes` as the file at `path`, preserving its ctime if it
    /// already existed. Creating intermediate folders if absent is not
    /// supported here: its parent folder must already exist. If
    /// `expected_version` is given, the write is rejected with
    /// `FileEvent::VersionMismatch` if the file itself (not its parent
    /// folder) has changed since the caller last observed it.
    pub async fn write_file(&self, path: &str, bytes: &[u8], expected_version: Option<u32>, now: i64) -> trc::Result<()> {
        self.write_node(path, NodeKind::File, bytes, expected_version, now).await
    }

    /// Writes a link at `path` pointing at `target`, under the same
    /// version-check and locking rules as [`XspFs::write_file`].
    pub async fn write_link(&self, path: &str, target: &str, expected_version: Option<u32>, now: i64) -> trc::Result<()> {
        self.write_node(path, NodeKind::Link, target.as_bytes(), expected_version, now)
            .await
    }

    async fn write_node(
        &self,
        path: &str,
        kind: NodeKind,
        content: &[u8],
        expected_version: Option<u32>,
        now: i64,
    ) -> trc::Result<()> {
        let mut segments = split_path(path)?;
        let name = segments.pop().ok_or_else(|| {
            trc::EventType::File(trc::FileEvent::NotFound)
                .into_err()
                .details("empty path")
        })?;
        let _guard = self.write_lock.lock(path.to_string()).await;

        let mut chain = self.descend(&segments).await?;
        let parent = chain.last_mut().unwrap();
        let existing = parent.listing.find(name).cloned();

        if let Some(expected) = expected_version {
            let actual = existing.as_ref().map(|e| e.version);
            if actual != Some(expected) {
                return Err(trc::EventType::File(trc::FileEvent::VersionMismatch)
                    .into_err()
                    .details(format!("{name} changed since it was last read")));
            }
        }

        let ctime = match &existing {
            Some(entry) => self.load_node(&entry.node_id, &entry.key).await?.0.ctime,
            None => now,
        };
        let (node_id, key) = self.store_node(ctime, now, content).await?;
        parent.listing.upsert(Entry::new(name.to_string(), kind, node_id, key));
        parent.listing.version += 1;

        self.commit(chain, now).await
    }

    pub async fn make_folder(&self, path: &str, now: i64) -> trc::Result<()> {
        let mut segments = split_path(path)?;
        let name = segments.pop().ok_or_else(|| {
            trc::EventType::File(trc::FileEvent::NotFound)
                .into_err()
                .details("empty folder path")
        })?;
        let _guard = self.write_lock.lock(path.to_string()).await;

        let mut chain = self.descend(&segments).await?;
        let parent = chain.last_mut().unwrap();
        if parent.listing.find(name).is_some() {
            return Err(trc::EventType::File(trc::FileEvent::AlreadyExists)
                .into_err()
                .details(format!("{name} already exists")));
        }
        let (node_id, key) = self.store_folder(&FolderListing::default(), now, now).await?;
        parent.listing.upsert(Entry::new(name.to_string(), NodeKind::Folder, node_id, key));
        parent.listing.version += 1;

        self.commit(chain, now).await
    }

    pub async fn remove(&self, path: &str, now: i64) -> trc::Result<()> {
        let mut segments = split_path(path)?;
        let name = segments.pop().ok_or_else(|| {
            trc::EventType::File(trc::FileEvent::NotFound)
                .into_err()
                .details("empty path")
        })?;
        let _guard = self.write_lock.lock(path.to_string()).await;

        let mut chain = self.descend(&segments).await?;
        let parent = chain.last_mut().unwrap();
        parent.listing.remove(name).ok_or_else(|| {
            trc::EventType::File(trc::FileEvent::NotFound)
                .into_err()
                .details(format!("no such entry: {name}"))
        })?;
        parent.listing.version += 1;

        self.commit(chain, now).await
    }
}
