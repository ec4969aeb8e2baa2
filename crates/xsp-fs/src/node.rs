use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Folder,
    /// A symlink-style entry whose content is the target path it points at,
    /// resolved by the caller rather than transparently followed by any
    /// operation in this crate.
    Link,
}

/// The metadata carried alongside a node's content in its own XSP object
/// (the `WithAttrs` format): when it was first created, when its content
/// was last replaced, and the size of that content in bytes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NodeAttrs {
    pub ctime: i64,
    pub mtime: i64,
    pub size: u64,
}

/// One child of a folder: its name, object kind, the object-cache id of its
/// current content, the XSP key that content is sealed under, and a
/// generation counter bumped every time this exact entry's content is
/// replaced. Updating a node never mutates this entry in place: content
/// addressing means a write produces a new id, and the new id replaces
/// this entry in its parent's listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub name: String,
    pub kind: NodeKind,
    pub node_id: String,
    pub key: [u8; asmail_xsp_codec::KEY_LEN],
    pub version: u32,
}

impl Entry {
    /// Builds a fresh entry at generation 0. [`FolderListing::upsert`] bumps
    /// this to one past whatever entry it replaces, so callers never need
    /// to track an entry's generation themselves.
    pub fn new(name: String, kind: NodeKind, node_id: String, key: [u8; asmail_xsp_codec::KEY_LEN]) -> Entry {
        Entry {
            name,
            kind,
            node_id,
            key,
            version: 0,
        }
    }
}

/// The decoded content of a folder node: its children plus a version
/// counter bumped on every change, the basis for the compare-and-swap
/// semantics exposed by [`crate::XspFs`]'s write operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FolderListing {
    pub version: u32,
    pub entries: Vec<Entry>,
}

impl FolderListing {
    pub fn find(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Replaces (or inserts) `entry`, carrying its generation counter
    /// forward from whatever entry of the same name it replaces.
    pub fn upsert(&mut self, mut entry: Entry) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.name == entry.name) {
            entry.version = existing.version + 1;
            *existing = entry;
        } else {
            entry.version = 0;
            self.entries.push(entry);
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Entry> {
        let idx = self.entries.iter().position(|e| e.name == name)?;
        Some(self.entries.remove(idx))
    }
}

/// The one mutable pointer in an otherwise content-addressed tree: which
/// object id/key is the current root folder, and a version for detecting
/// concurrent updates to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootPointer {
    pub node_id: String,
    pub key: [u8; asmail_xsp_codec::KEY_LEN],
    pub version: u32,
}
