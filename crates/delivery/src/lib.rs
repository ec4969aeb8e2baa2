//! Delivery engine: the send state machine. Resolves a recipient's ASMail
//! service, authenticates to it with MailerId, and posts the packed
//! message inline or, once it is past the immediate-send threshold, pushes
//! the body to the object cache first and posts a reference instead.

use std::sync::Arc;

use asmail_address::Address;
use asmail_locator::{ServiceKind, ServiceLocator};
use asmail_mailerid::{AuthenticatedSessionClient, HttpClient, HttpRequest, MailerIdSigner};
use asmail_message::PackedMessage;
use asmail_object_cache::{ObjectCache, RemoteObjectStore};
use serde::{Deserialize, Serialize};
use trc::{AddContext, IntoErr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

/// One outgoing message's progress, persisted by the caller so delivery
/// survives a restart and can be retried without re-packing the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingDelivery {
    pub id: String,
    pub packed: PackedMessage,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl PendingDelivery {
    pub fn new(id: String, packed: PackedMessage) -> Self {
        PendingDelivery {
            id,
            packed,
            status: DeliveryStatus::Pending,
            attempts: 0,
            last_error: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct InlineDeliveryRequest {
    message: PackedMessage,
}

#[derive(Debug, Serialize, Deserialize)]
struct ByRefDeliveryRequest {
    header: asmail_message::MessageHeader,
    sender_chain: asmail_mailerid::MailerIdChain,
    body_object_id: String,
}

pub struct DeliveryEngine<C: HttpClient + Clone, R: RemoteObjectStore> {
    locator: Arc<ServiceLocator>,
    signer: MailerIdSigner,
    mailerid_domain: String,
    http: C,
    object_cache: Arc<ObjectCache<R>>,
    /// Bodies at or under this size are posted inline; larger ones go
    /// through the object cache and a reference is posted instead.
    immediate_send_threshold: u64,
    max_attempts: u32,
    max_assertion_validity_secs: i64,
}

impl<C: HttpClient + Clone, R: RemoteObjectStore> DeliveryEngine<C, R> {
    pub fn new(
        locator: Arc<ServiceLocator>,
        signer: MailerIdSigner,
        mailerid_domain: String,
        http: C,
        object_cache: Arc<ObjectCache<R>>,
        immediate_send_threshold: u64,
        max_attempts: u32,
        max_assertion_validity_secs: i64,
    ) -> Self {
        DeliveryEngine {
            locator,
            signer,
            mailerid_domain,
            http,
            object_cache,
            immediate_send_threshold,
            max_attempts,
            max_assertion_validity_secs,
        }
    }

    /// Attempts one delivery. On a recoverable failure the delivery is left
    /// `Pending` with its attempt count bumped, ready for `try_deliver` to
    /// be called again later; once `max_attempts` is exhausted it is marked
    /// `Failed`.
    pub async fn try_deliver(&self, delivery: &mut PendingDelivery, now: i64) -> trc::Result<()> {
        match self.attempt(delivery, now).await {
            Ok(()) => {
                delivery.status = DeliveryStatus::Delivered;
                delivery.last_error = None;
                Ok(())
            }
            Err(err) => {
                delivery.attempts += 1;
                delivery.last_error = Some(err.to_string());
                if err.event_type().is_recoverable() && delivery.attempts < self.max_attempts {
                    delivery.status = DeliveryStatus::Pending;
                } else {
                    delivery.status = DeliveryStatus::Failed;
                }
                Err(err)
            }
        }
    }

    async fn attempt(&self, delivery: &PendingDelivery, now: i64) -> trc::Result<()> {
        let to: &Address = &delivery.packed.header.to;
        let base_url = self
            .locator
            .resolve(to, ServiceKind::ASMail)
            .await
            .caused_by(trc::location!())?;

        let session = AuthenticatedSessionClient::new(
            base_url.clone(),
            to.domain().to_string(),
            self.mailerid_domain.clone(),
            self.max_assertion_validity_secs,
            self.http.clone(),
            self.signer.clone(),
        );

        let body_len = delivery.packed.encrypted_main.len() as u64;
        let response = if body_len <= self.immediate_send_threshold {
            let body = serde_json::to_vec(&InlineDeliveryRequest {
                message: delivery.packed.clone(),
            })
            .map_err(|err| {
                trc::EventType::Delivery(trc::DeliveryEvent::RecipientError)
                    .into_err()
                    .reason(err)
            })?;
            session
                .call(
                    HttpRequest {
                        method: "POST",
                        url: format!("{base_url}/deliver"),
                        headers: vec![("content-type".to_string(), "application/json".to_string())],
                        body,
                    },
                    now,
                )
                .await
                .caused_by(trc::location!())?
        } else {
            let object_id = self
                .object_cache
                .put(&delivery.packed.encrypted_main)
                .await
                .caused_by(trc::location!())?;
            let body = serde_json::to_vec(&ByRefDeliveryRequest {
                header: delivery.packed.header.clone(),
                sender_chain: delivery.packed.sender_chain.clone(),
                body_object_id: object_id,
            })
            .map_err(|err| {
                trc::EventType::Delivery(trc::DeliveryEvent::RecipientError)
                    .into_err()
                    .reason(err)
            })?;
            session
                .call(
                    HttpRequest {
                        method: "POST",
                        url: format!("{base_url}/deliver-by-ref"),
                        headers: vec![("content-type".to_string(), "application/json".to_string())],
                        body,
                    },
                    now,
                )
                .await
                .caused_by(trc::location!())?
        };

        if response.status != 200 {
            return Err(trc::EventType::Delivery(trc::DeliveryEvent::RecipientError)
                .into_err()
                .details(format!("recipient service returned status {}", response.status)));
        }
        Ok(())
    }
}
