//! Scenario 4: an intro-key-encrypted first contact establishes a new
//! correspondent entry, and a second inbound message from the same
//! correspondent decrypts via the now-established ratchet pair rather than
//! the published intro keys.

use std::sync::Arc;

use asmail_address::Address;
use asmail_inbox::{InboxEngine, KeyStatus};
use asmail_keyring::{establish_root_key, generate_intro_keypair, CorrespondentKeys, Keyring};
use asmail_mailerid::{
    chain::{KeyCert, MailerIdChain, Principal, SignedLoad},
    keys::{JWKeyPair, KeyUse},
    MailerIdSigner,
};
use asmail_message::{pack_message, MessageBody, OutMsg};

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

fn plain_msg(to: Address, text: &str) -> OutMsg {
    OutMsg {
        msg_type: "mail".to_string(),
        subject: None,
        recipients: vec![to],
        carbon_copy: None,
        body: MessageBody {
            plain_txt_body: Some(text.to_string()),
            html_txt_body: None,
            json_body: None,
        },
        attachments: None,
    }
}

#[tokio::test]
async fn second_inbound_message_decrypts_via_the_established_pair() {
    let now = 1_700_000_000;
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let keyring_a = Keyring::new(dir_a.path().to_path_buf());
    let keyring_b = Arc::new(Keyring::new(dir_b.path().to_path_buf()));

    let alice = Address::canonicalize("alice@ex.org").unwrap();
    let bob = Address::canonicalize("bob@ex.org").unwrap();

    // First contact: both sides derive their shared root from a one-shot
    // intro-key exchange, as if bob had just accepted alice's invitation.
    let alice_intro = generate_intro_keypair().unwrap();
    let bob_intro = generate_intro_keypair().unwrap();
    let alice_pub = alice_intro.public;
    let bob_pub = bob_intro.public;
    let root_a = establish_root_key(alice_intro, &bob_pub).unwrap();
    let root_b = establish_root_key(bob_intro, &alice_pub).unwrap();
    keyring_a
        .establish(CorrespondentKeys::establish(bob.clone(), root_a, true, now))
        .await
        .unwrap();
    keyring_b
        .establish(CorrespondentKeys::establish(alice.clone(), root_b, false, now))
        .await
        .unwrap();
    assert!(keyring_b.has_correspondent(&alice).await);

    let signer = build_signer("ex.org", "alice@ex.org", now);
    let dir = tempfile::tempdir().unwrap();
    let inbox = InboxEngine::new(dir.path().join("index.json"), keyring_b, "ex.org".to_string(), 1200);

    let first = pack_message(&signer, &keyring_a, alice.clone(), bob.clone(), plain_msg(bob.clone(), "first"), None, now)
        .await
        .unwrap();
    assert_eq!(first.header.msg_count, 0);
    let raw_first = serde_json::to_vec(&first).unwrap();
    let body_first = inbox.receive("msg-1".to_string(), now, &raw_first, now).await.unwrap();
    assert_eq!(body_first.body.plain_txt_body.as_deref(), Some("first"));
    assert_eq!(inbox.index_entry("msg-1").await.unwrap().key_status, KeyStatus::Ok);

    let second = pack_message(&signer, &keyring_a, alice, bob.clone(), plain_msg(bob, "second"), None, now + 1)
        .await
        .unwrap();
    assert_eq!(second.header.msg_count, 1);
    let raw_second = serde_json::to_vec(&second).unwrap();
    let body_second = inbox
        .receive("msg-2".to_string(), now + 1, &raw_second, now + 1)
        .await
        .unwrap();
    assert_eq!(body_second.body.plain_txt_body.as_deref(), Some("second"));
    assert_eq!(inbox.index_entry("msg-2").await.unwrap().key_status, KeyStatus::Ok);
}
