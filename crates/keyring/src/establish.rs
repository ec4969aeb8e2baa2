use ring::agreement::{self, EphemeralPrivateKey, UnparsedPublicKey, X25519};
use trc::IntoErr;

/// A one-time introductory key pair used to establish a shared root key
/// with a new correspondent. Consumed on first use, matching `ring`'s
/// ephemeral-agreement API.
pub struct IntroKeyPair {
    private: EphemeralPrivateKey,
    pub public: [u8; 32],
}

pub fn generate_intro_keypair() -> trc::Result<IntroKeyPair> {
    let rng = ring::rand::SystemRandom::new();
    let private = EphemeralPrivateKey::generate(&X25519, &rng).map_err(|_| agreement_failed())?;
    let public_key = private.compute_public_key().map_err(|_| agreement_failed())?;
    let mut public = [0u8; 32];
    public.copy_from_slice(public_key.as_ref());
    Ok(IntroKeyPair { private, public })
}

/// Derives the 32-byte root key two correspondents will each independently
/// compute from their own private half and the other's public half, via
/// X25519 ECDH followed by a `blake3` KDF over the raw shared secret.
pub fn establish_root_key(my: IntroKeyPair, their_public: &[u8; 32]) -> trc::Result<[u8; 32]> {
    let peer = UnparsedPublicKey::new(&X25519, their_public.as_slice());
    agreement::agree_ephemeral(my.private, &peer, agreement_failed(), |material| {
        Ok::<[u8; 32], trc::Error>(*blake3::hash(material).as_bytes())
    })
}

fn agreement_failed() -> trc::Error {
    trc::EventType::Keyring(trc::KeyringEvent::KeyAgreementFailed).into_err()
}
