//! Message packer/opener: turns an outgoing message description into a
//! sealed object graph keyed by the recipient's current pair, carrying
//! enough of the sender's MailerId chain that the recipient can verify
//! authorship without a live session, and the reverse operation on receipt.

use std::collections::BTreeMap;

use asmail_address::Address;
use asmail_keyring::Keyring;
use asmail_mailerid::{verify_chain, MailerIdChain, MailerIdSigner};
use asmail_sending_params::ParamsEntry;
use asmail_xsp_codec::{decode_plain_object, encode_fresh_object, ObjectKey};
use serde::{Deserialize, Serialize};
use trc::{AddContext, IntoErr};
use utils::ids::random_obj_id;

/// Fixed at 16 blocks of 256 bytes: the segment size every message object
/// is packed under.
pub const MESSAGE_SEGMENT_SIZE: u32 = 16 * 256;

/// The body carried in an outgoing message, in whichever of its three
/// mutually optional shapes the caller filled in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageBody {
    #[serde(rename = "plainTxtBody", skip_serializing_if = "Option::is_none")]
    pub plain_txt_body: Option<String>,
    #[serde(rename = "htmlTxtBody", skip_serializing_if = "Option::is_none")]
    pub html_txt_body: Option<String>,
    #[serde(rename = "jsonBody", skip_serializing_if = "Option::is_none")]
    pub json_body: Option<serde_json::Value>,
}

/// An outgoing message as the caller describes it: headers, body, and a
/// flat set of named attachment files. Attachments are handed in already
/// materialized, the filesystem-subtree case left to the caller of this
/// crate (the sending engine walks a tree into this flat shape before
/// packing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutMsg {
    #[serde(rename = "msgType")]
    pub msg_type: String,
    pub subject: Option<String>,
    pub recipients: Vec<Address>,
    #[serde(rename = "carbonCopy", skip_serializing_if = "Option::is_none")]
    pub carbon_copy: Option<Vec<Address>>,
    #[serde(flatten)]
    pub body: MessageBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<BTreeMap<String, Vec<u8>>>,
}

/// The pair a packer suggests the recipient adopt for our future messages
/// to them, carried inline so no extra round trip is needed to agree on
/// it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextCrypto {
    pub pid: String,
    pub recipient_key: [u8; 32],
    pub sender_key: [u8; 32],
    pub master_key: [u8; 32],
}

/// What actually goes into the main object's plaintext: the `OutMsg`
/// shape plus the two policy-level fields the packer injects.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MessageContent {
    from: Address,
    to: Vec<Address>,
    #[serde(rename = "carbonCopy", skip_serializing_if = "Option::is_none")]
    cc: Option<Vec<Address>>,
    #[serde(rename = "msgType")]
    msg_type: String,
    subject: Option<String>,
    #[serde(flatten)]
    body: MessageBody,
    attachment_names: Vec<String>,
    next_crypto: NextCrypto,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_sending_params: Option<ParamsEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHeader {
    pub msg_id: String,
    pub from: Address,
    pub to: Address,
    pub sent_at: i64,
    pub pid: String,
    pub msg_count: u32,
}

/// A message ready to hand to the delivery engine, or one just pulled out
/// of an inbox before opening. The main object carries sections, body, and
/// the attachment name table; attachments themselves are sealed as
/// sibling objects under the same pair so the recipient can fetch them
/// independently of the main object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackedMessage {
    pub header: MessageHeader,
    pub sender_chain: MailerIdChain,
    pub encrypted_main: Vec<u8>,
    pub encrypted_attachments: BTreeMap<String, Vec<u8>>,
}

/// Seals `msg` for its first recipient: draws the keyring's next send key
/// for that correspondent, suggests their next pair (`next_crypto`), packs
/// sections/body/attachment table into the main XSP object, and seals each
/// attachment as a sibling object under the same key. `next_sending_params`
/// is an optional forward pointer for the peer's future messages to us,
/// carried as-is.
pub async fn pack_message(
    signer: &MailerIdSigner,
    keyring: &Keyring,
    from: Address,
    to: Address,
    msg: OutMsg,
    next_sending_params: Option<ParamsEntry>,
    now: i64,
) -> trc::Result<PackedMessage> {
    let send_key = keyring.next_send_key(&to).await.caused_by(trc::location!())?;
    let (next_pid, next_pair) = keyring.suggest_next_pair(&to).await.caused_by(trc::location!())?;
    let object_key = ObjectKey(send_key.master_key);

    let content = MessageContent {
        from: from.clone(),
        to: msg.recipients,
        cc: msg.carbon_copy,
        msg_type: msg.msg_type,
        subject: msg.subject,
        body: msg.body,
        attachment_names: msg.attachments.as_ref().map(|a| a.keys().cloned().collect()).unwrap_or_default(),
        next_crypto: NextCrypto {
            pid: next_pid,
            recipient_key: next_pair.recipient_key,
            sender_key: next_pair.sender_key,
            master_key: next_pair.master_key,
        },
        next_sending_params,
    };
    let content_bytes = serde_json::to_vec(&content).map_err(|err| {
        trc::EventType::Ipc(trc::IpcEvent::MissingBodyBytes)
            .into_err()
            .reason(err)
    })?;
    let encrypted_main = encode_fresh_object(&object_key, MESSAGE_SEGMENT_SIZE, &content_bytes)
        .caused_by(trc::location!())?;

    let mut encrypted_attachments = BTreeMap::new();
    for (name, bytes) in msg.attachments.unwrap_or_default() {
        let sealed = encode_fresh_object(&object_key, MESSAGE_SEGMENT_SIZE, &bytes).caused_by(trc::location!())?;
        encrypted_attachments.insert(name, sealed);
    }

    Ok(PackedMessage {
        header: MessageHeader {
            msg_id: random_obj_id(),
            from,
            to,
            sent_at: now,
            pid: send_key.pid,
            msg_count: send_key.msg_count,
        },
        sender_chain: signer.chain().clone(),
        encrypted_main,
        encrypted_attachments,
    })
}

/// The opened counterpart of [`OutMsg`]: sections, body, and attachments
/// keyed by name, plus whichever policy fields the sender included.
pub struct OpenedMessage {
    pub msg_type: String,
    pub subject: Option<String>,
    pub to: Vec<Address>,
    pub cc: Option<Vec<Address>>,
    pub body: MessageBody,
    pub attachments: BTreeMap<String, Vec<u8>>,
    pub next_sending_params: Option<ParamsEntry>,
}

/// Verifies `msg`'s sender chain against `mailerid_domain`, checks it
/// actually asserts `msg.header.from`, resolves the receive key from the
/// keyring (folding `msg_count` into the pair's replay tracking and
/// adopting the sender's suggested next pair for the future), and decrypts
/// the main object plus every attachment.
pub async fn open_message(
    msg: &PackedMessage,
    keyring: &Keyring,
    mailerid_domain: &str,
    now: i64,
    grace_secs: i64,
) -> trc::Result<OpenedMessage> {
    let asserted = verify_chain(&msg.sender_chain, mailerid_domain, now, grace_secs)?;
    if asserted != msg.header.from {
        return Err(trc::EventType::MailerId(trc::MailerIdEvent::CertsMismatch)
            .into_err()
            .details("message header's sender does not match its attached chain"));
    }

    let master_key = keyring
        .recv_key(&msg.header.from, &msg.header.pid, msg.header.msg_count, now)
        .await
        .caused_by(trc::location!())?;
    let object_key = ObjectKey(master_key);

    let content_bytes = decode_plain_object(&object_key, &msg.encrypted_main).caused_by(trc::location!())?;
    let content: MessageContent = serde_json::from_slice(&content_bytes).map_err(|err| {
        trc::EventType::Ipc(trc::IpcEvent::MissingBodyBytes)
            .into_err()
            .reason(err)
    })?;

    keyring
        .adopt_suggestion(
            &msg.header.from,
            content.next_crypto.pid.clone(),
            asmail_keyring::PairKeys {
                recipient_key: content.next_crypto.recipient_key,
                sender_key: content.next_crypto.sender_key,
                master_key: content.next_crypto.master_key,
            },
        )
        .await
        .caused_by(trc::location!())?;

    let mut attachments = BTreeMap::new();
    for name in &content.attachment_names {
        let sealed = msg.encrypted_attachments.get(name).ok_or_else(|| {
            trc::EventType::Ipc(trc::IpcEvent::MissingBodyBytes)
                .into_err()
                .details(format!("attachment named in content table was not attached: {name}"))
        })?;
        let bytes = decode_plain_object(&object_key, sealed).caused_by(trc::location!())?;
        attachments.insert(name.clone(), bytes);
    }

    Ok(OpenedMessage {
        msg_type: content.msg_type,
        subject: content.subject,
        to: content.to,
        cc: content.cc,
        body: content.body,
        attachments,
        next_sending_params: content.next_sending_params,
    })
}
