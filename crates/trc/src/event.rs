use serde::{Deserialize, Serialize};

/// The error taxonomy from the design's error-handling section, one outer
/// variant per propagation group, each wrapping the specific conditions
/// named for that group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Network(NetworkEvent),
    Auth(AuthEvent),
    MailerId(MailerIdEvent),
    Delivery(DeliveryEvent),
    Inbox(InboxEvent),
    File(FileEvent),
    Storage(StorageEvent),
    Locating(LocatingEvent),
    Ipc(IpcEvent),
    Keyring(KeyringEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkEvent {
    Connect,
    DnsConnect,
    HttpConnect,
    UnexpectedStatus,
    MalformedReply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthEvent {
    AuthFailed,
    NeedAuth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MailerIdEvent {
    TimeMismatch,
    CertMalformed,
    CertsMismatch,
    SigVerificationFails,
    AlgMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryEvent {
    MsgNotFound,
    MsgCancelled,
    RecipientError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InboxEvent {
    MsgNotFound,
    ObjNotFound,
    MsgIsBroken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileEvent {
    NotFound,
    AlreadyExists,
    ConcurrentUpdate,
    VersionMismatch,
    IsEndless,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageEvent {
    ObjNotFound,
    ObjExists,
    ConcurrentTransaction,
    UnknownTransaction,
    VersionMismatch,
    StorageIsClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LocatingEvent {
    DomainNotFound,
    NoServiceRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IpcEvent {
    MissingBodyBytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyringEvent {
    NoKeysForCorrespondent,
    KeyAgreementFailed,
    RatchetDesynced,
    SkippedKeyLimitExceeded,
}

/// Severity the event should be logged at. Components never decide this per
/// call site; `EventType::level()` fixes it so the same failure always logs
/// the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Warn,
    Error,
}

impl EventType {
    /// Whether the condition is locally recoverable (retry/backoff/relogin)
    /// or must surface as a rejection, per the design's error-handling policy.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            EventType::Network(
                NetworkEvent::Connect | NetworkEvent::DnsConnect | NetworkEvent::HttpConnect
            ) | EventType::Auth(AuthEvent::NeedAuth)
        )
    }

    pub fn level(self) -> Level {
        if self.is_recoverable() {
            Level::Warn
        } else {
            Level::Error
        }
    }
}
