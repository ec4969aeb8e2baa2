//! MailerId: three-level Ed25519 certificate chains, the signer that turns
//! a chain into login assertions, the verifier that checks assertions and
//! chains presented by others, and the authenticated session client built
//! on top of a successful login.

pub mod chain;
pub mod keys;
pub mod session;
pub mod signer;

pub use chain::{verify_chain, KeyCert, MailerIdChain, Principal, SignedLoad};
pub use keys::{kid_for_public_key, verify_signature, JWKey, JWKeyPair, KeyUse};
pub use session::{AuthenticatedSessionClient, HttpClient, HttpRequest, HttpResponse};
pub use signer::{verify_assertion, Assertion, MailerIdSigner};
