use std::sync::Arc;

use crate::{error::Error, event::Level};

/// The injected logging contract named in the design (`EventSink`). Its
/// storage format (files under `util/logs/…`, a daemon's syslog, whatever)
/// is an external collaborator's concern; the core only needs to hand it
/// structured records.
pub trait EventSink: Send + Sync {
    fn send(&self, level: Level, message: &str);
}

/// A sink that drops everything, used where no logging collaborator has
/// been wired up (e.g. in unit tests that don't care about log output).
pub struct NullSink;

impl EventSink for NullSink {
    fn send(&self, _level: Level, _message: &str) {}
}

/// An in-memory sink used by the `tests/` crate to assert on what got
/// logged without standing up a real log file.
#[derive(Default)]
pub struct CollectingSink {
    events: parking_lot::Mutex<Vec<(Level, String)>>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<(Level, String)> {
        self.events.lock().clone()
    }
}

impl EventSink for CollectingSink {
    fn send(&self, level: Level, message: &str) {
        self.events.lock().push((level, message.to_string()));
    }
}

/// Logs `err` to `sink` at the severity fixed by its `EventType`: warnings
/// on transient failures, errors on fatal ones.
pub fn log(sink: &dyn EventSink, err: &Error) {
    sink.send(err.event_type().level(), &err.to_string());
}
