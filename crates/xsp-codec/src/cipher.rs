use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;

/// The per-object symmetric key XSP segments are sealed under. Callers get
/// this from the keyring/ratchet (or generate one for a freshly created
/// object); this crate never derives or stores keys itself.
#[derive(Clone)]
pub struct ObjectKey(pub [u8; KEY_LEN]);

fn cipher_for(key: &ObjectKey) -> XChaCha20Poly1305 {
    XChaCha20Poly1305::new(Key::from_slice(&key.0))
}

/// Adds `delta` to the big-endian 24-byte nonce base `n0`, wrapping on
/// overflow. Both segment sealing (`n0 + segmentIndex`) and header
/// re-encryption (`n0 + newVersion`) are this same operation.
pub fn add_to_nonce(n0: &[u8; NONCE_LEN], delta: u64) -> [u8; NONCE_LEN] {
    let mut out = *n0;
    let mut carry = delta as u128;
    for byte in out.iter_mut().rev() {
        if carry == 0 {
            break;
        }
        let sum = *byte as u128 + (carry & 0xff);
        *byte = sum as u8;
        carry = (carry >> 8) + (sum >> 8);
    }
    out
}

/// The header nonce a base object's re-encryption at `new_version` must use,
/// so that a new version of the same object never reuses a segment nonce
/// a previous version sealed under the same key.
pub fn calculate_nonce(n0: &[u8; NONCE_LEN], new_version: u32) -> [u8; NONCE_LEN] {
    add_to_nonce(n0, new_version as u64)
}

fn segment_nonce(n0: &[u8; NONCE_LEN], index: u64) -> XNonce {
    *XNonce::from_slice(&add_to_nonce(n0, index))
}

/// Seals one plaintext segment, appending the AEAD tag, and returns the
/// sealed bytes. The nonce is derived from `n0` and `index`, never reused
/// across objects as long as `n0` is fresh per object.
pub fn seal_segment(key: &ObjectKey, n0: &[u8; NONCE_LEN], index: u64, plaintext: &[u8]) -> trc::Result<Vec<u8>> {
    cipher_for(key)
        .encrypt(&segment_nonce(n0, index), plaintext)
        .map_err(|_| {
            trc::EventType::File(trc::FileEvent::VersionMismatch)
                .into_err()
                .details("segment sealing failed")
        })
}

/// Opens one sealed segment, returning the plaintext with the tag stripped.
pub fn open_segment(key: &ObjectKey, n0: &[u8; NONCE_LEN], index: u64, sealed: &[u8]) -> trc::Result<Vec<u8>> {
    cipher_for(key)
        .decrypt(&segment_nonce(n0, index), sealed)
        .map_err(|_| {
            trc::EventType::File(trc::FileEvent::VersionMismatch)
                .into_err()
                .details("segment authentication failed")
        })
}

/// Seals a small blob (a wrapped object key, for instance) under a fresh
/// random nonce rather than one derived from a segment index, returning
/// `nonce || ciphertext`.
pub fn seal_with_random_nonce(key: &ObjectKey, plaintext: &[u8]) -> trc::Result<Vec<u8>> {
    use rand::RngCore;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);
    let mut out = cipher_for(key).encrypt(nonce, plaintext).map_err(|_| {
        trc::EventType::File(trc::FileEvent::VersionMismatch)
            .into_err()
            .details("blob sealing failed")
    })?;
    let mut sealed = nonce_bytes.to_vec();
    sealed.append(&mut out);
    Ok(sealed)
}

/// Opens a blob sealed by [`seal_with_random_nonce`].
pub fn open_with_random_nonce(key: &ObjectKey, sealed: &[u8]) -> trc::Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return Err(trc::EventType::File(trc::FileEvent::VersionMismatch)
            .into_err()
            .details("sealed blob shorter than its nonce"));
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    cipher_for(key)
        .decrypt(XNonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| {
            trc::EventType::File(trc::FileEvent::VersionMismatch)
                .into_err()
                .details("blob authentication failed")
        })
}

/// Generates a fresh random nonce base for a newly created object.
pub fn random_n0() -> [u8; NONCE_LEN] {
    use rand::RngCore;
    let mut n0 = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut n0);
    n0
}
