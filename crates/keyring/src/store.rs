use std::{collections::BTreeMap, path::{Path, PathBuf}};

use asmail_address::Address;
use serde::{Deserialize, Serialize};
use trc::{AddContext, IntoErr};
use utils::KeyedLocks;

use crate::ratchet::PairKeys;

/// What a reception pair's presence in a correspondent's map means: whether
/// it arrived from the correspondent's use of our published intro key, was
/// suggested by us and not yet echoed back, or has actually been used by
/// both sides.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PairRole {
    Introduced,
    Suggested,
    InUse,
}

/// One inclusive contiguous run of received `msgCount`s, the unit
/// `ReceivedMsgs::record` merges consecutive counts into.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CountRange {
    pub from: u32,
    pub to: u32,
}

impl CountRange {
    fn contains(&self, count: u32) -> bool {
        count >= self.from && count <= self.to
    }
}

/// Replay-style tracking of which `msgCount`s have already been seen on a
/// reception pair, as merged inclusive ranges rather than a per-message
/// set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReceivedMsgs {
    pub counts: Vec<CountRange>,
    pub last_ts: i64,
}

impl ReceivedMsgs {
    /// Folds `msg_count` into the range list: extends the last range when
    /// `msg_count` directly follows it, ignores it if it falls inside any
    /// existing range (a replay), and otherwise starts a new range.
    fn record(&mut self, msg_count: u32, ts: i64) {
        self.last_ts = ts;
        if self.counts.iter().any(|range| range.contains(msg_count)) {
            return;
        }
        if let Some(last) = self.counts.last_mut() {
            if msg_count == last.to + 1 {
                last.to = msg_count;
                return;
            }
        }
        self.counts.push(CountRange {
            from: msg_count,
            to: msg_count,
        });
    }
}

/// One pid-addressable pair this correspondent's messages may be found
/// under, together with the role it currently plays and (once at least one
/// message has arrived under it) the replay-tracking state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceptionPair {
    pub keys: PairKeys,
    pub role: PairRole,
    pub received_msgs: Option<ReceivedMsgs>,
}

/// The pair currently used to derive outbound message keys, plus the
/// monotonic sequence counter `generateKeysToSend` hands out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendingPair {
    pub pid: String,
    pub keys: PairKeys,
    pub msg_count: u32,
}

/// The key material `next_send_key` returns for one outbound message: the
/// pair's pid and static master key, plus the sequence number to embed
/// alongside it so the recipient can fold it into its replay tracking.
#[derive(Debug, Clone)]
pub struct SendKeyMaterial {
    pub pid: String,
    pub msg_count: u32,
    pub master_key: [u8; 32],
}

/// Everything the keyring keeps for one correspondent: every pair a message
/// from or to them might be found under, which pair we currently send
/// under, and the pair we last suggested they adopt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrespondentKeys {
    pub address: Address,
    pub reception_pairs: BTreeMap<String, ReceptionPair>,
    pub sending_pair: Option<SendingPair>,
    pub last_suggestion: Option<(String, PairKeys)>,
    pub intro_key_created_at: i64,
}

impl CorrespondentKeys {
    /// Establishes a correspondent from a root key both sides agree on (a
    /// one-time key exchange at introduction time): the resulting pair
    /// starts life `in-use` on both the reception and sending side,
    /// `we_are_a` breaking the symmetry so each side's `recipient_key`
    /// matches the other's `sender_key`.
    pub fn establish(address: Address, root_key: [u8; 32], we_are_a: bool, now: i64) -> CorrespondentKeys {
        let keys = PairKeys::seed(&root_key, we_are_a);
        let pid = keys.pid();
        let mut reception_pairs = BTreeMap::new();
        reception_pairs.insert(
            pid.clone(),
            ReceptionPair {
                keys,
                role: PairRole::InUse,
                received_msgs: None,
            },
        );
        CorrespondentKeys {
            address,
            reception_pairs,
            sending_pair: Some(SendingPair {
                pid,
                keys,
                msg_count: 0,
            }),
            last_suggestion: None,
            intro_key_created_at: now,
        }
    }

    /// Creates a brand-new correspondent entry from a pair derived through
    /// the sender's one-shot use of our published intro key: the pair
    /// starts `introduced` since we have not used it to send anything back
    /// yet, and there is no sending pair until we do.
    pub fn from_introduction(address: Address, keys: PairKeys, now: i64) -> CorrespondentKeys {
        let mut reception_pairs = BTreeMap::new();
        reception_pairs.insert(
            keys.pid(),
            ReceptionPair {
                keys,
                role: PairRole::Introduced,
                received_msgs: None,
            },
        );
        CorrespondentKeys {
            address,
            reception_pairs,
            sending_pair: None,
            last_suggestion: None,
            intro_key_created_at: now,
        }
    }
}

/// On-disk, concurrency-safe store of [`CorrespondentKeys`], one JSON file
/// per correspondent under `root`, each write to a given correspondent
/// serialized through a per-address named mutex.
pub struct Keyring {
    root: PathBuf,
    locks: KeyedLocks<Address>,
}

impl Keyring {
    pub fn new(root: PathBuf) -> Self {
        Keyring {
            root,
            locks: KeyedLocks::new(),
        }
    }

    fn path_for(&self, address: &Address) -> PathBuf {
        let safe_name = address.as_str().replace(['/', '\\'], "_");
        self.root.join(format!("{safe_name}.json"))
    }

    async fn load(&self, address: &Address) -> trc::Result<Option<CorrespondentKeys>> {
        match tokio::fs::read(self.path_for(address)).await {
            Ok(bytes) => {
                let keys = serde_json::from_slice(&bytes).map_err(|err| {
                    trc::EventType::Keyring(trc::KeyringEvent::RatchetDesynced)
                        .into_err()
                        .reason(err)
                        .details("corrupt keyring entry")
                })?;
                Ok(Some(keys))
            }
            Err(_) => Ok(None),
        }
    }

    async fn save(&self, keys: &CorrespondentKeys) -> trc::Result<()> {
        let bytes = serde_json::to_vec(keys).map_err(|err| {
            trc::EventType::Keyring(trc::KeyringEvent::RatchetDesynced)
                .into_err()
                .reason(err)
        })?;
        ensure_dir(&self.root).await?;
        tokio::fs::write(self.path_for(&keys.address), bytes)
            .await
            .map_err(|err| {
                trc::EventType::Storage(trc::StorageEvent::ObjNotFound)
                    .into_err()
                    .reason(err)
            })
    }

    /// Stores a correspondent entry, overwriting any existing one. Used
    /// both for the initial bootstrap via a shared root key and for
    /// registering a brand-new correspondent discovered through our
    /// published intro key.
    pub async fn establish(&self, keys: CorrespondentKeys) -> trc::Result<()> {
        let _guard = self.locks.lock(keys.address.clone()).await;
        self.save(&keys).await
    }

    /// Hands out the next outbound message's key material: `address`'s
    /// sending pair's pid and static master key, plus the next sequence
    /// number from its running counter.
    pub async fn next_send_key(&self, address: &Address) -> trc::Result<SendKeyMaterial> {
        let _guard = self.locks.lock(address.clone()).await;
        let mut keys = self.require(address).await?;
        let sending = keys.sending_pair.as_mut().ok_or_else(|| {
            trc::EventType::Keyring(trc::KeyringEvent::NoKeysForCorrespondent)
                .into_err()
                .details("no sending pair established for correspondent")
        })?;
        let msg_count = sending.msg_count;
        sending.msg_count += 1;
        let material = SendKeyMaterial {
            pid: sending.pid.clone(),
            msg_count,
            master_key: sending.keys.master_key,
        };
        self.save(&keys).await.caused_by(trc::location!())?;
        Ok(material)
    }

    /// Resolves the master key for an inbound message sealed under `pid`,
    /// folding its `msg_count` into the pair's replay tracking and
    /// promoting a pair we had only suggested to `in-use` now that the
    /// correspondent has actually used it.
    pub async fn recv_key(
        &self,
        address: &Address,
        pid: &str,
        msg_count: u32,
        now: i64,
    ) -> trc::Result<[u8; 32]> {
        let _guard = self.locks.lock(address.clone()).await;
        let mut keys = self.require(address).await?;
        let pair = keys.reception_pairs.get_mut(pid).ok_or_else(|| {
            trc::EventType::Keyring(trc::KeyringEvent::RatchetDesynced)
                .into_err()
                .details("no reception pair for pid")
        })?;
        pair.received_msgs
            .get_or_insert_with(ReceivedMsgs::default)
            .record(msg_count, now);
        if pair.role == PairRole::Suggested {
            pair.role = PairRole::InUse;
        }
        let master_key = pair.keys.master_key;
        self.save(&keys).await.caused_by(trc::location!())?;
        Ok(master_key)
    }

    /// Rotates the correspondent's current pair (or last suggestion, if one
    /// is already outstanding) to a fresh candidate, to embed in the
    /// outbound message's `nextCrypto` field, and remembers it until the
    /// correspondent's own next message uses it.
    pub async fn suggest_next_pair(&self, address: &Address) -> trc::Result<(String, PairKeys)> {
        let _guard = self.locks.lock(address.clone()).await;
        let mut keys = self.require(address).await?;
        let base = keys
            .last_suggestion
            .as_ref()
            .map(|(_, pair)| *pair)
            .or_else(|| keys.sending_pair.as_ref().map(|sending| sending.keys))
            .ok_or_else(|| {
                trc::EventType::Keyring(trc::KeyringEvent::NoKeysForCorrespondent)
                    .into_err()
                    .details("no pair to rotate a suggestion from")
            })?;
        let next = base.rotate();
        let pid = next.pid();
        keys.last_suggestion = Some((pid.clone(), next));
        self.save(&keys).await.caused_by(trc::location!())?;
        Ok((pid, next))
    }

    /// Adopts a correspondent's suggested next pair for decrypting their
    /// future messages: recorded as a reception pair we have not yet seen
    /// used, promoted to `in-use` automatically the first time a message
    /// actually arrives under it.
    pub async fn adopt_suggestion(&self, address: &Address, pid: String, keys_material: PairKeys) -> trc::Result<()> {
        let _guard = self.locks.lock(address.clone()).await;
        let mut keys = self.require(address).await?;
        keys.reception_pairs.entry(pid).or_insert(ReceptionPair {
            keys: keys_material,
            role: PairRole::Suggested,
            received_msgs: None,
        });
        self.save(&keys).await.caused_by(trc::location!())?;
        Ok(())
    }

    pub async fn has_correspondent(&self, address: &Address) -> bool {
        self.load(address).await.ok().flatten().is_some()
    }

    pub async fn needs_intro_key_rotation(
        &self,
        address: &Address,
        now: i64,
        before_expiry_secs: i64,
    ) -> trc::Result<bool> {
        let keys = self.require(address).await?;
        Ok(now >= keys.intro_key_created_at + before_expiry_secs)
    }

    async fn require(&self, address: &Address) -> trc::Result<CorrespondentKeys> {
        self.load(address).await?.ok_or_else(|| {
            trc::EventType::Keyring(trc::KeyringEvent::NoKeysForCorrespondent)
                .into_err()
                .details(format!("no keyring entry for {address}"))
        })
    }
}

async fn ensure_dir(path: &Path) -> trc::Result<()> {
    tokio::fs::create_dir_all(path).await.map_err(|err| {
        trc::EventType::Storage(trc::StorageEvent::ObjNotFound)
            .into_err()
            .reason(err)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::establish::{establish_root_key, generate_intro_keypair};

    fn now() -> i64 {
        1_700_000_000
    }

    #[tokio::test]
    async fn send_and_recv_pairs_agree_across_both_sides() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let keyring_a = Keyring::new(dir_a.path().to_path_buf());
        let keyring_b = Keyring::new(dir_b.path().to_path_buf());

        let alice = generate_intro_keypair().unwrap();
        let bob = generate_intro_keypair().unwrap();
        let alice_public = alice.public;
        let bob_public = bob.public;
        let root_a = establish_root_key(alice, &bob_public).unwrap();
        let root_b = establish_root_key(bob, &alice_public).unwrap();
        assert_eq!(root_a, root_b);

        let addr_a = Address::canonicalize("alice@ex.org").unwrap();
        let addr_b = Address::canonicalize("bob@ex.org").unwrap();

        keyring_a
            .establish(CorrespondentKeys::establish(addr_b.clone(), root_a, true, now()))
            .await
            .unwrap();
        keyring_b
            .establish(CorrespondentKeys::establish(addr_a.clone(), root_b, false, now()))
            .await
            .unwrap();

        let sent = keyring_a.next_send_key(&addr_b).await.unwrap();
        let recv_key = keyring_b
            .recv_key(&addr_a, &sent.pid, sent.msg_count, now())
            .await
            .unwrap();
        assert_eq!(sent.master_key, recv_key);
    }

    #[tokio::test]
    async fn missing_correspondent_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let keyring = Keyring::new(dir.path().to_path_buf());
        let addr = Address::canonicalize("nobody@ex.org").unwrap();
        let err = keyring.next_send_key(&addr).await.unwrap_err();
        assert_eq!(
            err.event_type(),
            trc::EventType::Keyring(trc::KeyringEvent::NoKeysForCorrespondent)
        );
    }

    #[tokio::test]
    async fn a_new_correspondent_from_an_intro_key_decrypts_and_accumulates_counts() {
        let dir = tempfile::tempdir().unwrap();
        let keyring = Keyring::new(dir.path().to_path_buf());
        let addr = Address::canonicalize("carol@ex.org").unwrap();

        let pair = PairKeys::seed(&[11u8; 32], true);
        keyring
            .establish(CorrespondentKeys::from_introduction(addr.clone(), pair, now()))
            .await
            .unwrap();

        keyring.recv_key(&addr, &pair.pid(), 1, now()).await.unwrap();
        keyring.recv_key(&addr, &pair.pid(), 2, now()).await.unwrap();

        let stored = keyring.require(&addr).await.unwrap();
        let reception = &stored.reception_pairs[&pair.pid()];
        assert_eq!(
            reception.received_msgs.as_ref().unwrap().counts,
            vec![CountRange { from: 1, to: 2 }]
        );
    }

    #[tokio::test]
    async fn a_suggested_pair_is_promoted_to_in_use_once_the_peer_echoes_it() {
        let dir = tempfile::tempdir().unwrap();
        let keyring = Keyring::new(dir.path().to_path_buf());
        let addr = Address::canonicalize("dave@ex.org").unwrap();
        keyring
            .establish(CorrespondentKeys::establish(addr.clone(), [4u8; 32], true, now()))
            .await
            .unwrap();

        let (pid, keys) = keyring.suggest_next_pair(&addr).await.unwrap();
        keyring.adopt_suggestion(&addr, pid.clone(), keys).await.unwrap();

        let before = keyring.require(&addr).await.unwrap();
        assert_eq!(before.reception_pairs[&pid].role, PairRole::Suggested);

        keyring.recv_key(&addr, &pid, 0, now()).await.unwrap();
        let after = keyring.require(&addr).await.unwrap();
        assert_eq!(after.reception_pairs[&pid].role, PairRole::InUse);
    }

    #[test]
    fn received_msgs_record_merges_contiguous_counts_into_one_range() {
        let mut received = ReceivedMsgs::default();
        received.record(1, now());
        received.record(2, now());
        assert_eq!(received.counts, vec![CountRange { from: 1, to: 2 }]);
    }

    #[test]
    fn received_msgs_record_starts_a_new_range_after_a_gap() {
        let mut received = ReceivedMsgs::default();
        received.record(1, now());
        received.record(5, now());
        assert_eq!(
            received.counts,
            vec![CountRange { from: 1, to: 1 }, CountRange { from: 5, to: 5 }]
        );
    }

    #[test]
    fn received_msgs_record_ignores_a_replayed_count() {
        let mut received = ReceivedMsgs::default();
        received.record(1, now());
        received.record(2, now());
        received.record(1, now());
        assert_eq!(received.counts, vec![CountRange { from: 1, to: 2 }]);
    }
}
