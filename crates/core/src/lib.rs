//! Wires the twelve ASMail components together behind one struct per user
//! identity, with no singletons and only small call-record interfaces at
//! the seams. Field declaration order doubles as the shutdown order: inbox,
//! then keyring, then delivery, then sending-params, then storages, then
//! cryptor. Rust drops struct fields in declaration order, so that sequence
//! is encoded directly in the field list below rather than left to a
//! manually written `Drop` impl.

use std::sync::Arc;

use asmail_address::Address;
use asmail_config_client::ConfigClient;
use asmail_delivery::DeliveryEngine;
use asmail_inbox::InboxEngine;
use asmail_keyring::Keyring;
use asmail_locator::{ServiceKind, ServiceLocator, TxtResolver};
use asmail_mailerid::{AuthenticatedSessionClient, HttpClient, MailerIdSigner};
use asmail_object_cache::{ObjectCache, RemoteObjectStore};
use asmail_sending_params::SendingParamsStore;
use trc::AddContext;
use utils::CoreConfig;

/// One user's live set of components. No method here is a singleton in the
/// process sense: every `AsmailCore` is independent, and nothing it owns is
/// ever shared across a different core instance.
pub struct AsmailCore<C: HttpClient + Clone, R: RemoteObjectStore> {
    pub inbox: InboxEngine,
    pub keyring: Arc<Keyring>,
    pub delivery: DeliveryEngine<C, R>,
    pub sending_params: SendingParamsStore,
    pub object_cache: Arc<ObjectCache<R>>,
    locator: Arc<ServiceLocator>,
    signer: MailerIdSigner,
    mailerid_domain: String,
    http: C,
    max_assertion_validity_secs: i64,
}

impl<C: HttpClient + Clone, R: RemoteObjectStore> AsmailCore<C, R> {
    pub fn new(
        config: &CoreConfig,
        own_address: &Address,
        resolvers: Vec<Box<dyn TxtResolver>>,
        http: C,
        remote: R,
        signer: MailerIdSigner,
        mailerid_domain: String,
    ) -> Self {
        let user_dir = config.users_dir(own_address.as_str());
        let locator = Arc::new(ServiceLocator::new(resolvers));
        let keyring = Arc::new(Keyring::new(user_dir.join("keyring")));
        let object_cache = Arc::new(ObjectCache::new(user_dir.join("objects"), remote));

        let delivery = DeliveryEngine::new(
            locator.clone(),
            signer.clone(),
            mailerid_domain.clone(),
            http.clone(),
            object_cache.clone(),
            config.immediate_send_threshold,
            config.timeout_retries + 1,
            config.max_assertion_validity_secs,
        );
        let inbox = InboxEngine::new(
            user_dir.join("inbox").join("index.json"),
            keyring.clone(),
            mailerid_domain.clone(),
            config.mailerid_grace_secs,
        );
        let sending_params = SendingParamsStore::new(user_dir.join("sending-params"));

        AsmailCore {
            inbox,
            keyring,
            delivery,
            sending_params,
            object_cache,
            locator,
            signer,
            mailerid_domain,
            http,
            max_assertion_validity_secs: config.max_assertion_validity_secs,
        }
    }

    pub fn segment_size(config: &CoreConfig) -> u32 {
        config.xsp_segment_size as u32
    }

    /// Resolves `own_address`'s own ASMail service and opens an
    /// authenticated config client against it. The config endpoint is
    /// reached through the same ASMail service base URL used for delivery,
    /// since both are served from the same host in the service root
    /// document.
    pub async fn open_config_client(&self, own_address: &Address, now: i64) -> trc::Result<ConfigClient<C>> {
        let base_url = self
            .locator
            .resolve(own_address, ServiceKind::ASMail)
            .await
            .caused_by(trc::location!())?;
        let session = AuthenticatedSessionClient::new(
            base_url.clone(),
            own_address.domain().to_string(),
            self.mailerid_domain.clone(),
            self.max_assertion_validity_secs,
            self.http.clone(),
            self.signer.clone(),
        );
        Ok(ConfigClient::new(base_url, session))
    }
}
