//! Structured event/error taxonomy shared by every ASMail core crate: a
//! closed `EventType` taxonomy, an `Error` that accumulates context as it
//! propagates (`AddContext`), and an injected `EventSink` so the core
//! never hardwires where logs end up.

mod error;
mod event;
mod sink;

pub use error::{AddContext, Error, IntoErr, Result};
pub use event::{
    AuthEvent, DeliveryEvent, EventType, FileEvent, InboxEvent, IpcEvent, KeyringEvent, Level,
    LocatingEvent, MailerIdEvent, NetworkEvent, StorageEvent,
};
pub use sink::{log, CollectingSink, EventSink, NullSink};
