use std::{borrow::Cow, fmt};

use crate::event::EventType;

/// A propagated failure: the taxonomy tag plus whatever context was attached
/// on the way up. Cheap to clone-by-reference everywhere except the final
/// `Display`, splitting "what happened" (`EventType`) from "where it
/// happened" (`locations`).
#[derive(Debug, Clone)]
pub struct Error {
    event: EventType,
    reason: Option<Cow<'static, str>>,
    details: Option<Cow<'static, str>>,
    locations: Vec<&'static str>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(event: EventType) -> Self {
        Error {
            event,
            reason: None,
            details: None,
            locations: Vec::new(),
        }
    }

    pub fn event_type(&self) -> EventType {
        self.event
    }

    pub fn details(mut self, details: impl Into<Cow<'static, str>>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn reason(mut self, err: impl fmt::Display) -> Self {
        self.reason = Some(err.to_string().into());
        self
    }

    pub fn caused_by(mut self, location: &'static str) -> Self {
        self.locations.push(location);
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.event)?;
        if let Some(details) = &self.details {
            write!(f, ": {details}")?;
        }
        if let Some(reason) = &self.reason {
            write!(f, " ({reason})")?;
        }
        for location in &self.locations {
            write!(f, "\n  at {location}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// Built with `EventType::Category(Event).into_err()`, the idiom used
/// throughout the component crates in place of ad-hoc `Err(...)` literals.
pub trait IntoErr {
    fn into_err(self) -> Error;
}

impl IntoErr for EventType {
    fn into_err(self) -> Error {
        Error::new(self)
    }
}

/// Chains location context onto a `Result` at each crate boundary it
/// crosses, without forcing every caller to match on the error first.
pub trait AddContext<T> {
    fn caused_by(self, location: &'static str) -> Result<T>;
    fn details(self, details: impl Into<Cow<'static, str>>) -> Result<T>;
}

impl<T> AddContext<T> for Result<T> {
    fn caused_by(self, location: &'static str) -> Result<T> {
        self.map_err(|e| e.caused_by(location))
    }

    fn details(self, details: impl Into<Cow<'static, str>>) -> Result<T> {
        self.map_err(|e| e.details(details))
    }
}

#[macro_export]
macro_rules! location {
    () => {
        concat!(file!(), ":", line!())
    };
}
