//! Keyring: per-correspondent key establishment via X25519 and the
//! pid-addressable pair store message keys are drawn from.

mod establish;
mod ratchet;
mod store;

pub use establish::{establish_root_key, generate_intro_keypair, IntroKeyPair};
pub use ratchet::PairKeys;
pub use store::{
    CorrespondentKeys, CountRange, Keyring, PairRole, ReceivedMsgs, ReceptionPair, SendKeyMaterial, SendingPair,
};
