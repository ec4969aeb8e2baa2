use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

fn derive(key: &[u8; 32], label: &[u8]) -> [u8; 32] {
    let mut keyed = blake3::Hasher::new_keyed(key);
    keyed.update(label);
    *keyed.finalize().as_bytes()
}

/// One correspondent pair's key material: the two public halves it was
/// derived from (together identifying the pair via [`PairKeys::pid`]) and
/// the symmetric master key messages under it are sealed with. The master
/// key is static for the pair's lifetime; each message under it uses a
/// fresh random nonce rather than stepping the key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PairKeys {
    pub recipient_key: [u8; 32],
    pub sender_key: [u8; 32],
    pub master_key: [u8; 32],
}

impl PairKeys {
    /// Seeds a pair's keys from a shared root key established via the
    /// correspondents' one-time key exchange, swapped per side so each
    /// correspondent's `recipient_key` matches the other's `sender_key`.
    pub fn seed(root_key: &[u8; 32], we_are_a: bool) -> PairKeys {
        let a_key = derive(root_key, b"a-key");
        let b_key = derive(root_key, b"b-key");
        let (recipient_key, sender_key) = if we_are_a { (a_key, b_key) } else { (b_key, a_key) };
        PairKeys {
            recipient_key,
            sender_key,
            master_key: derive(root_key, b"master-key"),
        }
    }

    /// Rotates this pair to the next candidate pair in line, the operation
    /// behind suggesting a correspondent's next pair: a fresh master key
    /// and fresh public halves, all deterministically derived from the
    /// current ones.
    pub fn rotate(&self) -> PairKeys {
        PairKeys {
            recipient_key: derive(&self.recipient_key, b"next-recipient-key"),
            sender_key: derive(&self.sender_key, b"next-sender-key"),
            master_key: derive(&self.master_key, b"next-master-key"),
        }
    }

    /// The short identifier a message sealed under this pair is tagged
    /// with, deterministically derived from its public halves.
    pub fn pid(&self) -> String {
        let mut keyed = blake3::Hasher::new_keyed(&self.recipient_key);
        keyed.update(&self.sender_key);
        URL_SAFE_NO_PAD.encode(&keyed.finalize().as_bytes()[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeding_from_the_same_root_key_agrees_across_both_sides() {
        let root = [7u8; 32];
        let a = PairKeys::seed(&root, true);
        let b = PairKeys::seed(&root, false);
        assert_eq!(a.recipient_key, b.sender_key);
        assert_eq!(a.sender_key, b.recipient_key);
        assert_eq!(a.master_key, b.master_key);
        assert_eq!(a.pid(), b.pid());
    }

    #[test]
    fn rotating_never_reproduces_the_current_pair() {
        let root = [3u8; 32];
        let pair = PairKeys::seed(&root, true);
        let next = pair.rotate();
        assert_ne!(pair.master_key, next.master_key);
        assert_ne!(pair.pid(), next.pid());
    }

    #[test]
    fn rotating_is_deterministic() {
        let root = [9u8; 32];
        let pair = PairKeys::seed(&root, true);
        assert_eq!(pair.rotate(), pair.rotate());
    }
}
