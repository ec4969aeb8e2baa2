//! Canonical ASMail address: case-folded, IDNA-normalized,
//! whitespace-stripped local-part-plus-'@'-plus-domain.
//!
//! `Address` can only be constructed through [`Address::canonicalize`], so
//! every place that stores one (keyring maps, sending-params tables, the
//! inbox index) gets the "equal canonical forms imply equal keyring
//! entries" invariant for free from the type system rather than from
//! caller discipline.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Canonicalizes `raw` into `Address`. Idempotent:
    /// `canonicalize(canonicalize(a).as_str()) == canonicalize(a)`.
    pub fn canonicalize(raw: &str) -> trc::Result<Self> {
        let stripped: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        if stripped.is_empty() {
            return Err(trc::EventType::Locating(trc::LocatingEvent::DomainNotFound)
                .into_err()
                .details("empty address"));
        }

        let at = stripped.rfind('@').ok_or_else(|| {
            trc::EventType::Locating(trc::LocatingEvent::DomainNotFound)
                .into_err()
                .details("address missing '@'")
        })?;
        let (local, domain_with_at) = stripped.split_at(at);
        let domain = &domain_with_at[1..];
        if local.is_empty() || domain.is_empty() {
            return Err(trc::EventType::Locating(trc::LocatingEvent::DomainNotFound)
                .into_err()
                .details("address missing local part or domain"));
        }

        let domain_ascii = idna::domain_to_ascii(domain).map_err(|err| {
            trc::EventType::Locating(trc::LocatingEvent::DomainNotFound)
                .into_err()
                .reason(err)
                .details("domain failed IDNA normalization")
        })?;

        Ok(Address(format!("{}@{}", local.to_lowercase(), domain_ascii)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn domain(&self) -> &str {
        self.0.rsplit_once('@').map(|(_, d)| d).unwrap_or("")
    }

    pub fn local_part(&self) -> &str {
        self.0.split_once('@').map(|(l, _)| l).unwrap_or("")
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
