//! Service locator: resolves an ASMail address to the base URL of each of
//! its three services by parsing DNS TXT records at the address's domain.
//!
//! DNS transport itself (the system resolver, DNS-over-HTTPS) is treated as
//! an external collaborator with a stable callable contract; this crate
//! only consumes the `TxtResolver` trait and owns the TXT-record parsing
//! and multi-resolver fallback policy.

use std::fmt;

use asmail_address::Address;
use trc::{AddContext, IntoErr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    MailerId,
    ASMail,
    ThreeNStorage,
}

impl ServiceKind {
    fn label(self) -> &'static str {
        match self {
            ServiceKind::MailerId => "mailerid",
            ServiceKind::ASMail => "asmail",
            ServiceKind::ThreeNStorage => "3nstorage",
        }
    }

    const ALL: [ServiceKind; 3] = [
        ServiceKind::MailerId,
        ServiceKind::ASMail,
        ServiceKind::ThreeNStorage,
    ];
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The DNS transport contract. Implementations live outside this crate
/// (system resolver, DNS-over-HTTPS client); `lookup_txt` returns one
/// `String` per TXT record, with the record's own chunks already joined.
pub trait TxtResolver: Send + Sync {
    fn lookup_txt<'a>(
        &'a self,
        domain: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = trc::Result<Vec<String>>> + Send + 'a>>;
}

/// Parses the back-to-back `service=value` tokens out of the already-joined
/// TXT record strings. A label's value runs
/// from its `=` to the start of the next recognised label (or end of
/// input); only the first non-empty value found for a service is kept.
fn parse_service_map(records: &[String]) -> ahash::AHashMap<ServiceKind, String> {
    let joined = records.join("");

    let mut anchors: Vec<(usize, ServiceKind)> = Vec::new();
    for kind in ServiceKind::ALL {
        let needle = format!("{}=", kind.label());
        let mut search_from = 0;
        while let Some(pos) = joined[search_from..].find(&needle) {
            let abs = search_from + pos;
            anchors.push((abs, kind));
            search_from = abs + needle.len();
        }
    }
    anchors.sort_by_key(|(pos, _)| *pos);

    let mut out: ahash::AHashMap<ServiceKind, String> = ahash::AHashMap::default();
    for (idx, (pos, kind)) in anchors.iter().enumerate() {
        let value_start = pos + kind.label().len() + 1;
        let value_end = anchors
            .get(idx + 1)
            .map(|(next_pos, _)| *next_pos)
            .unwrap_or(joined.len());
        if value_start > value_end {
            continue;
        }
        let value = joined[value_start..value_end].trim();
        if value.is_empty() {
            continue;
        }
        out.entry(*kind).or_insert_with(|| value.to_string());
    }
    out
}

pub struct ServiceLocator {
    resolvers: Vec<Box<dyn TxtResolver>>,
}

impl ServiceLocator {
    pub fn new(resolvers: Vec<Box<dyn TxtResolver>>) -> Self {
        ServiceLocator { resolvers }
    }

    /// Resolves every known service for `address`'s domain in one DNS round
    /// trip, trying each configured resolver in order until one returns a
    /// non-connectivity result.
    pub async fn resolve_all(
        &self,
        address: &Address,
    ) -> trc::Result<ahash::AHashMap<ServiceKind, String>> {
        if self.resolvers.is_empty() {
            return Err(
                trc::EventType::Network(trc::NetworkEvent::DnsConnect)
                    .into_err()
                    .details("no resolvers configured"),
            );
        }

        let mut last_connect_err = None;
        for resolver in &self.resolvers {
            match resolver.lookup_txt(address.domain()).await {
                Ok(records) => {
                    let map = parse_service_map(&records);
                    return Ok(map);
                }
                Err(err)
                    if err.event_type() == trc::EventType::Network(trc::NetworkEvent::DnsConnect) =>
                {
                    last_connect_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_connect_err
            .unwrap_or_else(|| trc::EventType::Network(trc::NetworkEvent::DnsConnect).into_err())
            .caused_by(trc::location!()))
    }

    pub async fn resolve(&self, address: &Address, service: ServiceKind) -> trc::Result<String> {
        let map = self.resolve_all(address).await?;
        let value = map.get(&service).ok_or_else(|| {
            trc::EventType::Locating(trc::LocatingEvent::NoServiceRecord)
                .into_err()
                .details(format!("no {service} record for {}", address.domain()))
        })?;
        Ok(format!("https://{value}"))
    }
}
