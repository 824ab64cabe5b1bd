use std::net::IpAddr;
use std::time::Instant;

use crate::cache::Cache;
use crate::message::{DNSCLASS_INET, DnsType};
use crate::record::{Record, RecordData, normalize_name};
use crate::state::DnsState;

/// Descriptor for a published or discovered DNS-SD service instance.
///
/// For registered services the engine drives the probe/announce lifecycle
/// through the embedded [`DnsState`]; for discovered services the fields
/// fill in as SRV, TXT and address records arrive.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    service_type: String,
    name: String,
    server: String,
    port: u16,
    weight: u16,
    priority: u16,
    text: Vec<u8>,
    address: Option<IpAddr>,
    persistent: bool,
    pub(crate) state: DnsState,
    pub(crate) needs_text_announcing: bool,
}

impl ServiceInfo {
    /// Create a descriptor for `name` of `service_type` (e.g.
    /// `"_http._tcp.local."`) listening on `port`.
    pub fn new(service_type: &str, name: &str, port: u16) -> Self {
        ServiceInfo {
            service_type: normalize_name(service_type),
            name: name.to_owned(),
            server: String::new(),
            port,
            weight: 0,
            priority: 0,
            text: Vec::new(),
            address: None,
            persistent: false,
            state: DnsState::default(),
            needs_text_announcing: false,
        }
    }

    pub fn with_weight(mut self, weight: u16) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_priority(mut self, priority: u16) -> Self {
        self.priority = priority;
        self
    }

    /// Set the raw TXT record payload.
    pub fn with_text_bytes(mut self, text: Vec<u8>) -> Self {
        self.text = text;
        self
    }

    /// Set the TXT record from a property list; `None` values become bare
    /// boolean keys.
    pub fn with_properties(mut self, props: &[(&str, Option<&[u8]>)]) -> Self {
        self.text = text_from_properties(props);
        self
    }

    /// Persistent services survive `unregister_all_services`.
    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn weight(&self) -> u16 {
        self.weight
    }

    pub fn priority(&self) -> u16 {
        self.priority
    }

    pub fn text_bytes(&self) -> &[u8] {
        &self.text
    }

    pub fn address(&self) -> Option<IpAddr> {
        self.address
    }

    pub fn state(&self) -> DnsState {
        self.state
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// The instance name inside the type space, lowercased:
    /// `"<name>.<service-type>"`.
    pub fn qualified_name(&self) -> String {
        format!(
            "{}.{}",
            self.name.to_lowercase(),
            self.service_type.to_lowercase()
        )
    }

    /// Decoded view of the TXT payload.
    pub fn properties(&self) -> Vec<(String, Option<Vec<u8>>)> {
        properties_from_text(&self.text)
    }

    /// Look up one property; `Some(None)` is a bare boolean-true key.
    pub fn property(&self, key: &str) -> Option<Option<Vec<u8>>> {
        self.properties()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub(crate) fn set_server(&mut self, server: String) {
        self.server = server;
    }

    pub(crate) fn set_text(&mut self, text: Vec<u8>) {
        self.text = text;
    }

    pub(crate) fn advance_state(&mut self) {
        self.state = self.state.advance();
    }

    pub(crate) fn revert_state(&mut self) {
        self.state = self.state.revert();
    }

    pub(crate) fn cancel(&mut self) {
        self.state = DnsState::Canceled;
    }

    // A discovered descriptor is complete once the SRV target, an address
    // for it and a non-empty TXT payload are all present.
    pub(crate) fn has_data(&self) -> bool {
        !self.server.is_empty() && self.address.is_some() && !self.text.is_empty()
    }

    // update_from_record folds a cached record into this descriptor. An SRV
    // update rebinds the target host and chases its address record in the
    // cache.
    pub(crate) fn update_from_record(&mut self, cache: &Cache, now: Instant, rec: &Record) {
        if rec.is_expired(now) {
            return;
        }
        match &rec.data {
            RecordData::Address(addr) => {
                if rec.name.eq_ignore_ascii_case(&self.server) {
                    self.address = Some(*addr);
                }
            }
            RecordData::Service {
                priority,
                weight,
                port,
                target,
            } => {
                if rec.name.eq_ignore_ascii_case(&self.qualified_name()) {
                    self.server = target.clone();
                    self.port = *port;
                    self.weight = *weight;
                    self.priority = *priority;
                    self.address = None;
                    let address = cache
                        .get(&self.server, DnsType::A, DNSCLASS_INET)
                        .or_else(|| cache.get(&self.server, DnsType::Aaaa, DNSCLASS_INET));
                    if let Some(a) = address
                        && !a.is_expired(now)
                        && let RecordData::Address(addr) = &a.data
                    {
                        self.address = Some(*addr);
                    }
                }
            }
            RecordData::Text(text) => {
                if rec.name.eq_ignore_ascii_case(&self.qualified_name()) {
                    self.text = text.clone();
                }
            }
            _ => {}
        }
    }

    // records returns the announcement set for a registered instance:
    // a shared PTR from the type to the instance plus unique SRV and TXT
    // records under the qualified name.
    pub(crate) fn records(&self, ttl: u32, host_name: &str, now: Instant) -> Vec<Record> {
        let qualified = self.qualified_name();
        vec![
            Record::new(
                &self.service_type,
                false,
                ttl,
                RecordData::Pointer(qualified.clone()),
                now,
            ),
            Record::new(
                &qualified,
                true,
                ttl,
                RecordData::Service {
                    priority: self.priority,
                    weight: self.weight,
                    port: self.port,
                    target: normalize_name(host_name),
                },
                now,
            ),
            Record::new(&qualified, true, ttl, RecordData::Text(self.text.clone()), now),
        ]
    }
}

/// Encode a property list into the DNS-SD TXT format: length-prefixed
/// `key=value` strings, a bare key standing for boolean true.
pub fn text_from_properties(props: &[(&str, Option<&[u8]>)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    for (key, value) in props {
        let mut pair = Vec::with_capacity(key.len() + 1 + value.map_or(0, <[u8]>::len));
        pair.extend_from_slice(key.as_bytes());
        if let Some(value) = value {
            pair.push(b'=');
            pair.extend_from_slice(value);
        }
        if pair.is_empty() || pair.len() > 255 {
            continue;
        }
        out.push(pair.len() as u8);
        out.extend_from_slice(&pair);
    }
    out
}

/// Parse a TXT payload into key/value pairs. A bare key (no `=`) yields
/// `None` for its value; a zero length byte terminates; a malformed payload
/// yields an empty list.
pub fn properties_from_text(text: &[u8]) -> Vec<(String, Option<Vec<u8>>)> {
    let mut props = Vec::new();
    let mut off = 0;
    while off < text.len() {
        let len = text[off] as usize;
        off += 1;
        if len == 0 {
            break;
        }
        if off + len > text.len() {
            return Vec::new();
        }
        let pair = &text[off..off + len];
        off += len;
        match pair.iter().position(|&b| b == b'=') {
            Some(eq) => props.push((
                String::from_utf8_lossy(&pair[..eq]).into_owned(),
                Some(pair[eq + 1..].to_vec()),
            )),
            None => props.push((String::from_utf8_lossy(pair).into_owned(), None)),
        }
    }
    props
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_qualified_name_is_lowercased() {
        let info = ServiceInfo::new("_HTTP._tcp.local.", "My Web Server", 8080);
        assert_eq!(info.qualified_name(), "my web server._http._tcp.local.");
        // The display name keeps its case.
        assert_eq!(info.name(), "My Web Server");
    }

    #[test]
    fn test_text_properties_round_trip() {
        let text = text_from_properties(&[
            ("path", Some(b"/index.html".as_slice())),
            ("secure", None),
        ]);
        let props = properties_from_text(&text);
        assert_eq!(props.len(), 2);
        assert_eq!(props[0].0, "path");
        assert_eq!(props[0].1.as_deref(), Some(b"/index.html".as_slice()));
        assert_eq!(props[1].0, "secure");
        assert_eq!(props[1].1, None);
    }

    #[test]
    fn test_text_properties_malformed_and_terminator() {
        // A zero length byte ends the list.
        assert_eq!(properties_from_text(&[0x00, 0x03, b'a', b'=', b'b']).len(), 0);
        // A length overrunning the payload voids the whole list.
        assert!(properties_from_text(&[0x09, b'a', b'=', b'b']).is_empty());
    }

    #[test]
    fn test_update_from_srv_chases_address() {
        let now = Instant::now();
        let mut cache = Cache::default();
        cache.put(Record::new(
            "machine.local.",
            false,
            120,
            RecordData::Address(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))),
            now,
        ));

        let mut info = ServiceInfo::new("_printer._tcp.local.", "hp", 0);
        let srv = Record::new(
            "hp._printer._tcp.local.",
            true,
            120,
            RecordData::Service {
                priority: 0,
                weight: 0,
                port: 631,
                target: "machine.local.".to_owned(),
            },
            now,
        );
        info.update_from_record(&cache, now, &srv);

        assert_eq!(info.server(), "machine.local.");
        assert_eq!(info.port(), 631);
        assert_eq!(
            info.address(),
            Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)))
        );
        // No TXT yet, so the descriptor is not complete.
        assert!(!info.has_data());

        let txt = Record::new(
            "hp._printer._tcp.local.",
            true,
            120,
            RecordData::Text(text_from_properties(&[("rp", Some(b"queue1".as_slice()))])),
            now,
        );
        info.update_from_record(&cache, now, &txt);
        assert!(info.has_data());
    }

    #[test]
    fn test_records_for_announcement() {
        let now = Instant::now();
        let info = ServiceInfo::new("_http._tcp.local.", "web", 8080)
            .with_properties(&[("path", Some(b"/".as_slice()))]);
        let records = info.records(3600, "machine.local.", now);

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].name, "_http._tcp.local.");
        assert!(!records[0].unique);
        assert_eq!(records[1].name, "web._http._tcp.local.");
        assert!(records[1].unique);
        let RecordData::Service { port, ref target, .. } = records[1].data else {
            panic!("expected SRV data");
        };
        assert_eq!(port, 8080);
        assert_eq!(target, "machine.local.");
        assert!(records[2].unique);
    }
}
