use base64::{engine::general_purpose::STANDARD, Engine};
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde::{Deserialize, Serialize};

/// Key material with algorithm, intended use, unique key id, and base64
/// bytes. All MailerId keys are Ed25519.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JWKey {
    pub alg: String,
    #[serde(rename = "use")]
    pub key_use: KeyUse,
    pub kid: String,
    /// Base64-encoded raw public key bytes.
    pub k: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyUse {
    Root,
    Provider,
    Sign,
}

impl JWKey {
    pub fn public_key_bytes(&self) -> trc::Result<Vec<u8>> {
        STANDARD.decode(&self.k).map_err(|err| {
            trc::EventType::MailerId(trc::MailerIdEvent::CertMalformed)
                .into_err()
                .reason(err)
                .details("JWKey.k is not valid base64")
        })
    }
}

/// A live Ed25519 keypair plus its createdAt/retiredAt lifecycle
/// timestamps.
pub struct JWKeyPair {
    pub public: JWKey,
    pub created_at: i64,
    pub retired_at: Option<i64>,
    keypair: Ed25519KeyPair,
}

impl JWKeyPair {
    pub fn generate(key_use: KeyUse, created_at: i64) -> trc::Result<Self> {
        let rng = ring::rand::SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).map_err(|_| {
            trc::EventType::MailerId(trc::MailerIdEvent::CertMalformed)
                .into_err()
                .details("failed to generate Ed25519 keypair")
        })?;
        let keypair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).map_err(|_| {
            trc::EventType::MailerId(trc::MailerIdEvent::CertMalformed)
                .into_err()
                .details("failed to parse generated Ed25519 keypair")
        })?;
        let public_bytes = keypair.public_key().as_ref().to_vec();
        let kid = kid_for_public_key(&public_bytes);
        Ok(JWKeyPair {
            public: JWKey {
                alg: "Ed25519".to_string(),
                key_use,
                kid,
                k: STANDARD.encode(public_bytes),
            },
            created_at,
            retired_at: None,
            keypair,
        })
    }

    pub fn sign(&self, bytes: &[u8]) -> Vec<u8> {
        self.keypair.sign(bytes).as_ref().to_vec()
    }

    pub fn kid(&self) -> &str {
        &self.public.kid
    }
}

/// Deterministic short key id derived from the public key, the same role
/// `pid` plays for established pairs elsewhere in the core.
pub fn kid_for_public_key(public_key: &[u8]) -> String {
    let hash = blake3::hash(public_key);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&hash.as_bytes()[..12])
}

pub fn verify_signature(public_key: &JWKey, message: &[u8], sig: &[u8]) -> trc::Result<()> {
    let public_bytes = public_key.public_key_bytes()?;
    let unparsed = ring::signature::UnparsedPublicKey::new(&ring::signature::ED25519, &public_bytes);
    unparsed.verify(message, sig).map_err(|_| {
        trc::EventType::MailerId(trc::MailerIdEvent::SigVerificationFails).into_err()
    })
}
