//! Scenario 6: a delivery killed mid-send is rehydrated from its persisted
//! `PendingDelivery` JSON and resumed on a fresh `DeliveryEngine`; a
//! recipient that had already completed before the restart is left
//! untouched, and the one still pending picks up and finishes once the
//! network is back.

use std::{future::Future, pin::Pin, sync::Arc};

use asmail_address::Address;
use asmail_delivery::{DeliveryEngine, DeliveryStatus, PendingDelivery};
use asmail_keyring::{establish_root_key, generate_intro_keypair, CorrespondentKeys, Keyring};
use asmail_locator::{ServiceLocator, TxtResolver};
use asmail_mailerid::{
    chain::{KeyCert, MailerIdChain, Principal, SignedLoad},
    keys::{JWKeyPair, KeyUse},
    HttpClient, HttpRequest, HttpResponse, MailerIdSigner,
};
use asmail_message::{pack_message, MessageBody, OutMsg};
use asmail_object_cache::{ObjectCache, RemoteObjectStore};
use trc::IntoErr;

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

struct FixedTxt(String);
impl TxtResolver for FixedTxt {
    fn lookup_txt<'a>(
        &'a self,
        _domain: &'a str,
    ) -> Pin<Box<dyn Future<Output = trc::Result<Vec<String>>> + Send + 'a>> {
        let record = self.0.clone();
        Box::pin(async move { Ok(vec![record]) })
    }
}

#[derive(Clone)]
struct OkHttp;
impl HttpClient for OkHttp {
    fn send<'a>(
        &'a self,
        _req: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = trc::Result<HttpResponse>> + Send + 'a>> {
        Box::pin(async move {
            Ok(HttpResponse {
                status: 200,
                headers: Vec::new(),
                body: Vec::new(),
                redirected_to: None,
            })
        })
    }
}

/// Stands in for a process that was killed before the network round trip
/// ever got a response: every call fails with a recoverable connect error.
#[derive(Clone)]
struct DownHttp;
impl HttpClient for DownHttp {
    fn send<'a>(
        &'a self,
        _req: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = trc::Result<HttpResponse>> + Send + 'a>> {
        Box::pin(async move {
            Err(trc::EventType::Network(trc::NetworkEvent::HttpConnect)
                .into_err()
                .details("connection refused"))
        })
    }
}

struct NullRemote;
impl RemoteObjectStore for NullRemote {
    fn fetch_range<'a>(
        &'a self,
        _id: &'a str,
        _offset: u64,
        _len: u64,
    ) -> Pin<Box<dyn Future<Output = trc::Result<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move { Ok(Vec::new()) })
    }
    fn total_size<'a>(&'a self, _id: &'a str) -> Pin<Box<dyn Future<Output = trc::Result<u64>> + Send + 'a>> {
        Box::pin(async move { Ok(0) })
    }
    fn push<'a>(
        &'a self,
        _id: &'a str,
        _bytes: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = trc::Result<()>> + Send + 'a>> {
        Box::pin(async move { Ok(()) })
    }
}

fn locator() -> Arc<ServiceLocator> {
    Arc::new(ServiceLocator::new(vec![Box::new(FixedTxt(
        "asmail=mail.ex.org".to_string(),
    ))]))
}

fn object_cache() -> Arc<ObjectCache<NullRemote>> {
    let cache_dir = tempfile::tempdir().unwrap();
    Arc::new(ObjectCache::new(cache_dir.path().to_path_buf(), NullRemote))
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
async fn killed_mid_send_resumes_the_pending_recipient_and_leaves_the_done_one_alone() {
    let now = 1_700_000_000;
    let dir_a = tempfile::tempdir().unwrap();
    let keyring_a = Keyring::new(dir_a.path().to_path_buf());
    let alice = Address::canonicalize("alice@ex.org").unwrap();
    let bob = Address::canonicalize("bob@ex.org").unwrap();
    let carol = Address::canonicalize("carol@ex.org").unwrap();

    for to in [&bob, &carol] {
        let intro_a = generate_intro_keypair().unwrap();
        let intro_peer = generate_intro_keypair().unwrap();
        let pub_a = intro_a.public;
        let pub_peer = intro_peer.public;
        let root_a = establish_root_key(intro_a, &pub_peer).unwrap();
        let _root_peer = establish_root_key(intro_peer, &pub_a).unwrap();
        keyring_a
            .establish(CorrespondentKeys::establish(to.clone(), root_a, true, now))
            .await
            .unwrap();
    }

    let signer = build_signer("ex.org", "alice@ex.org", now);
    let packed_bob = pack_message(&signer, &keyring_a, alice.clone(), bob.clone(), plain_msg(bob, "to bob"), None, now)
        .await
        .unwrap();
    let packed_carol = pack_message(&signer, &keyring_a, alice.clone(), carol.clone(), plain_msg(carol, "to carol"), None, now)
        .await
        .unwrap();

    // Pre-restart: bob's recipient slot completes, carol's is mid-flight
    // when the process dies (the network is down).
    let engine_before_bob = DeliveryEngine::new(
        locator(),
        signer.clone(),
        "ex.org".to_string(),
        OkHttp,
        object_cache(),
        1_048_576,
        3,
        1_000_000,
    );
    let mut delivery_bob = PendingDelivery::new("bob-delivery".to_string(), packed_bob);
    engine_before_bob.try_deliver(&mut delivery_bob, now).await.unwrap();
    assert_eq!(delivery_bob.status, DeliveryStatus::Delivered);

    let engine_before_carol = DeliveryEngine::new(
        locator(),
        signer.clone(),
        "ex.org".to_string(),
        DownHttp,
        object_cache(),
        1_048_576,
        3,
        1_000_000,
    );
    let mut delivery_carol = PendingDelivery::new("carol-delivery".to_string(), packed_carol);
    engine_before_carol.try_deliver(&mut delivery_carol, now).await.unwrap_err();
    assert_eq!(delivery_carol.status, DeliveryStatus::Pending);
    assert_eq!(delivery_carol.attempts, 1);

    // Persist progress the way the real engine checkpoints between chunks,
    // then drop everything standing in for the process.
    let persisted_bob = serde_json::to_vec(&delivery_bob).unwrap();
    let persisted_carol = serde_json::to_vec(&delivery_carol).unwrap();
    drop(engine_before_bob);
    drop(engine_before_carol);
    drop(delivery_bob);
    drop(delivery_carol);

    // Restart: rehydrate from the persisted snapshots on a fresh engine
    // with the network back up.
    let mut rehydrated_bob: PendingDelivery = serde_json::from_slice(&persisted_bob).unwrap();
    let mut rehydrated_carol: PendingDelivery = serde_json::from_slice(&persisted_carol).unwrap();

    let engine_after = DeliveryEngine::new(
        locator(),
        signer,
        "ex.org".to_string(),
        OkHttp,
        object_cache(),
        1_048_576,
        3,
        1_000_000,
    );

    // The scheduler only resumes non-done messages; bob's slot is left
    // untouched.
    assert_eq!(rehydrated_bob.status, DeliveryStatus::Delivered);

    engine_after.try_deliver(&mut rehydrated_carol, now + 60).await.unwrap();
    assert_eq!(rehydrated_carol.status, DeliveryStatus::Delivered);
    assert_eq!(rehydrated_carol.attempts, 1);

    // allDone: all-ok once both recipients are done.
    assert!(matches!(rehydrated_bob.status, DeliveryStatus::Delivered));
    assert!(matches!(rehydrated_carol.status, DeliveryStatus::Delivered));
}
