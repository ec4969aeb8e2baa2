//! MailerId signer/verifier: turns a certificate chain plus the user's
//! signing key into short-lived login assertions, and verifies assertions
//! presented by others.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    chain::{verify_chain, MailerIdChain, SignedLoad},
    keys::JWKeyPair,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AssertionContent {
    user: String,
    #[serde(rename = "rpDomain")]
    rp_domain: String,
    #[serde(rename = "sessionId")]
    session_id: String,
    #[serde(rename = "issuedAt")]
    issued_at: i64,
    #[serde(rename = "expiresAt")]
    expires_at: i64,
}

/// A certificate chain plus a signed, time-bound statement that its holder
/// controls the chain's user address for one particular relying party and
/// session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assertion {
    pub chain: MailerIdChain,
    assertion: SignedLoad,
}

impl Assertion {
    /// The bare signed load carried over the wire as the authorize-session
    /// request body: the chain travels separately.
    pub fn signed_load(&self) -> &SignedLoad {
        &self.assertion
    }
}

/// Holds the long-lived chain and signing key for one address, and issues
/// fresh assertions against it. Cheaply cloneable so the same identity can
/// back several concurrent authenticated sessions (one per correspondent's
/// service) without re-deriving key material.
#[derive(Clone)]
pub struct MailerIdSigner {
    chain: MailerIdChain,
    signing_key: Arc<JWKeyPair>,
}

impl MailerIdSigner {
    pub fn new(chain: MailerIdChain, signing_key: JWKeyPair) -> Self {
        MailerIdSigner {
            chain,
            signing_key: Arc::new(signing_key),
        }
    }

    /// The chain this signer vouches for, attached to anything it signs so
    /// a recipient with no prior relationship can still verify the author.
    pub fn chain(&self) -> &MailerIdChain {
        &self.chain
    }

    /// The key id the session layer should present alongside `userId` when
    /// starting a session, so the relying party can pick the right cert out
    /// of a user with several live keys.
    pub fn signing_kid(&self) -> String {
        self.signing_key.kid().to_string()
    }

    /// The address this signer's user certificate vouches for.
    pub fn principal_address(&self) -> trc::Result<String> {
        let user_cert: crate::chain::KeyCert = self.chain.user.parse()?;
        Ok(user_cert.principal.address)
    }

    /// Signs a fresh assertion binding this signer's address to
    /// `rp_domain`/`session_id` at `issued_at`, valid for at most
    /// `max_assertion_validity_secs` and never past the user certificate's
    /// own expiry.
    pub fn generate_assertion_for(
        &self,
        rp_domain: &str,
        session_id: &str,
        issued_at: i64,
        max_assertion_validity_secs: i64,
    ) -> trc::Result<Assertion> {
        let user_cert: crate::chain::KeyCert = self.chain.user.parse()?;
        let expires_at = (issued_at + max_assertion_validity_secs).min(user_cert.expires_at);
        let content = AssertionContent {
            user: user_cert.principal.address,
            rp_domain: rp_domain.to_string(),
            session_id: session_id.to_string(),
            issued_at,
            expires_at,
        };
        let assertion = SignedLoad::sign(&content, self.signing_key.kid(), &self.signing_key)?;
        Ok(Assertion {
            chain: self.chain.clone(),
            assertion,
        })
    }
}

/// Verifies an assertion presented to us: the chain must verify against
/// `mailerid_domain` at `now`, the assertion's own signature must come from
/// the chain's user key, and it must name the expected relying party and
/// session. Clock skew is tolerated symmetrically around `issued_at`, up to
/// the width of the assertion's own declared validity window
/// (`expires_at - issued_at`), rather than a hardcoded constant.
pub fn verify_assertion(
    assertion: &Assertion,
    mailerid_domain: &str,
    rp_domain: &str,
    session_id: &str,
    now: i64,
    grace_secs: i64,
) -> trc::Result<asmail_address::Address> {
    let address = verify_chain(&assertion.chain, mailerid_domain, now, grace_secs)?;

    let user_cert: crate::chain::KeyCert = assertion.chain.user.parse()?;
    assertion.assertion.verify_against(&user_cert.public_key)?;

    let content: AssertionContent = assertion.assertion.parse()?;
    if content.user != address.as_str() {
        return Err(trc::EventType::MailerId(trc::MailerIdEvent::CertsMismatch)
            .into_err()
            .details("assertion address does not match chain principal"));
    }
    if content.rp_domain != rp_domain {
        return Err(trc::EventType::Auth(trc::AuthEvent::AuthFailed)
            .into_err()
            .details("assertion issued for a different relying party"));
    }
    if content.session_id.is_empty() || content.session_id != session_id {
        return Err(trc::EventType::Auth(trc::AuthEvent::AuthFailed)
            .into_err()
            .details("assertion issued for a different session"));
    }
    if content.expires_at < content.issued_at {
        return Err(trc::EventType::Auth(trc::AuthEvent::AuthFailed)
            .into_err()
            .details("assertion has a negative validity window"));
    }
    let tolerance = content.expires_at - content.issued_at;
    if (now - content.issued_at).abs() > tolerance {
        return Err(trc::EventType::Auth(trc::AuthEvent::AuthFailed)
            .into_err()
            .details("assertion outside its validity window"));
    }

    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chain::{KeyCert, Principal},
        keys::KeyUse,
    };

    fn build_signer(domain: &str, user_address: &str, now: i64) -> MailerIdSigner {
        let root_key = JWKeyPair::generate(KeyUse::Root, now - 1000).unwrap();
        let root_cert = KeyCert {
            principal: Principal {
                address: domain.to_string(),
            },
            public_key: root_key.public.clone(),
            issuer: domain.to_string(),
            issued_at: now - 1000,
            expires_at: now + 10_000_000,
        };
        let root_signed = SignedLoad::sign(&root_cert, root_key.kid(), &root_key).unwrap();

        let provider_key = JWKeyPair::generate(KeyUse::Provider, now - 500).unwrap();
        let provider_cert = KeyCert {
            principal: Principal {
                address: domain.to_string(),
            },
            public_key: provider_key.public.clone(),
            issuer: domain.to_string(),
            issued_at: now - 500,
            expires_at: now + 1_000_000,
        };
        let provider_signed = SignedLoad::sign(&provider_cert, root_key.kid(), &root_key).unwrap();

        let user_key = JWKeyPair::generate(KeyUse::Sign, now - 10).unwrap();
        let user_cert = KeyCert {
            principal: Principal {
                address: user_address.to_string(),
            },
            public_key: user_key.public.clone(),
            issuer: domain.to_string(),
            issued_at: now - 10,
            expires_at: now + 100_000,
        };
        let user_signed = SignedLoad::sign(&user_cert, provider_key.kid(), &provider_key).unwrap();

        MailerIdSigner::new(
            MailerIdChain {
                root: root_signed,
                provider: provider_signed,
                user: user_signed,
            },
            user_key,
        )
    }

    #[test]
    fn round_trips_a_freshly_generated_assertion() {
        let now = 1_700_000_000;
        let signer = build_signer("ex.org", "alice@ex.org", now);
        let assertion = signer
            .generate_assertion_for("mail.ex.org", "sess-1", now, 30 * 60)
            .unwrap();

        let address =
            verify_assertion(&assertion, "ex.org", "mail.ex.org", "sess-1", now, 20 * 60).unwrap();
        assert_eq!(address.as_str(), "alice@ex.org");
    }

    #[test]
    fn wrong_relying_party_fails_auth() {
        let now = 1_700_000_000;
        let signer = build_signer("ex.org", "alice@ex.org", now);
        let assertion = signer
            .generate_assertion_for("mail.ex.org", "sess-1", now, 30 * 60)
            .unwrap();

        let err = verify_assertion(&assertion, "ex.org", "other.ex.org", "sess-1", now, 20 * 60)
            .unwrap_err();
        assert_eq!(
            err.event_type(),
            trc::EventType::Auth(trc::AuthEvent::AuthFailed)
        );
    }

    #[test]
    fn wrong_session_id_fails_auth() {
        let now = 1_700_000_000;
        let signer = build_signer("ex.org", "alice@ex.org", now);
        let assertion = signer
            .generate_assertion_for("mail.ex.org", "sess-1", now, 30 * 60)
            .unwrap();

        let err = verify_assertion(&assertion, "ex.org", "mail.ex.org", "sess-2", now, 20 * 60)
            .unwrap_err();
        assert_eq!(
            err.event_type(),
            trc::EventType::Auth(trc::AuthEvent::AuthFailed)
        );
    }

    #[test]
    fn stale_assertion_fails_auth() {
        let now = 1_700_000_000;
        let signer = build_signer("ex.org", "alice@ex.org", now);
        let assertion = signer
            .generate_assertion_for("mail.ex.org", "sess-1", now, 30 * 60)
            .unwrap();

        let err = verify_assertion(
            &assertion,
            "ex.org",
            "mail.ex.org",
            "sess-1",
            now + 31 * 60,
            20 * 60,
        )
        .unwrap_err();
        assert_eq!(
            err.event_type(),
            trc::EventType::Auth(trc::AuthEvent::AuthFailed)
        );
    }

    #[test]
    fn tolerates_clock_skew_before_issued_at_within_the_validity_window() {
        let now = 1_700_000_000;
        let signer = build_signer("ex.org", "alice@ex.org", now);
        let assertion = signer
            .generate_assertion_for("mail.ex.org", "sess-1", now, 30 * 60)
            .unwrap();

        // A verifier whose clock lags by up to the window width still accepts.
        let address = verify_assertion(
            &assertion,
            "ex.org",
            "mail.ex.org",
            "sess-1",
            now - 29 * 60,
            20 * 60,
        )
        .unwrap();
        assert_eq!(address.as_str(), "alice@ex.org");
    }

    #[test]
    fn assertion_validity_is_clamped_to_the_user_certs_own_expiry() {
        let now = 1_700_000_000;
        let signer = build_signer("ex.org", "alice@ex.org", now);
        // User cert in build_signer expires at now + 100_000, far shorter
        // than a pathologically large requested validity window: the
        // assertion's own expiresAt should be clamped down to it rather
        // than granting the full 10_000_000s.
        let assertion = signer
            .generate_assertion_for("mail.ex.org", "sess-1", now, 10_000_000)
            .unwrap();

        // Past the user cert's expiry the chain itself is no longer valid,
        // which is a stronger failure than the assertion window check.
        let err = verify_assertion(
            &assertion,
            "ex.org",
            "mail.ex.org",
            "sess-1",
            now + 200_000,
            20 * 60,
        )
        .unwrap_err();
        assert_eq!(
            err.event_type(),
            trc::EventType::MailerId(trc::MailerIdEvent::TimeMismatch)
        );
    }
}
