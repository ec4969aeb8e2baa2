//! Sends a small message end to end through the delivery engine and
//! confirms the recipient's service sees exactly one inline `/deliver`
//! POST whose body is the packed message.

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
struct RecordingHttp {
    posts: Arc<std::sync::Mutex<Vec<(String, Vec<u8>)>>>,
}
impl HttpClient for RecordingHttp {
    fn send<'a>(
        &'a self,
        req: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = trc::Result<HttpResponse>> + Send + 'a>> {
        self.posts.lock().unwrap().push((req.url.clone(), req.body.clone()));
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

/// `addMsg` to a single recipient followed by a terminal `{allDone:"all-ok"}`
/// outcome (scenario 3): the body fits well under the immediate-send
/// threshold, so delivery goes out as one inline POST and bytes-sent equals
/// the whole packed body.
#[tokio::test]
async fn small_message_is_delivered_inline_in_one_shot() {
    let now = 1_700_000_000;
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let keyring_a = Keyring::new(dir_a.path().to_path_buf());
    let keyring_b = Keyring::new(dir_b.path().to_path_buf());

    let alice = Address::canonicalize("alice@ex.org").unwrap();
    let bob = Address::canonicalize("bob@ex.org").unwrap();

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

    let signer = build_signer("ex.org", "alice@ex.org", now);
    let out_msg = OutMsg {
        msg_type: "mail".to_string(),
        subject: Some("hi".to_string()),
        recipients: vec![bob.clone()],
        carbon_copy: None,
        body: MessageBody {
            plain_txt_body: Some("hello".to_string()),
            html_txt_body: None,
            json_body: None,
        },
        attachments: None,
    };
    let packed = pack_message(&signer, &keyring_a, alice, bob, out_msg, None, now)
        .await
        .unwrap();
    let msg_size = packed.encrypted_main.len() as u64;

    let locator = Arc::new(ServiceLocator::new(vec![Box::new(FixedTxt(
        "asmail=mail.ex.org".to_string(),
    ))]));
    let posts = Arc::new(std::sync::Mutex::new(Vec::new()));
    let http = RecordingHttp { posts: posts.clone() };
    let cache_dir = tempfile::tempdir().unwrap();
    let object_cache = Arc::new(ObjectCache::new(cache_dir.path().to_path_buf(), NullRemote));

    let engine = DeliveryEngine::new(
        locator,
        signer,
        "ex.org".to_string(),
        http,
        object_cache,
        1_048_576,
        3,
        1_000_000,
    );

    let mut delivery = PendingDelivery::new("m1".to_string(), packed);
    engine.try_deliver(&mut delivery, now).await.unwrap();

    assert_eq!(delivery.status, DeliveryStatus::Delivered);
    let recorded = posts.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    let (url, body) = &recorded[0];
    assert!(url.ends_with("/deliver"));
    // bytesSent == progress.msgSize: the whole encrypted body went out in
    // the one recorded POST.
    assert!(body.len() as u64 >= msg_size);
}
