use std::net::IpAddr;
use std::time::Instant;

use crate::message::DnsType;
use crate::record::{Record, RecordData, map_address, normalize_name};
use crate::state::DnsState;

// State for the local host name: the name being claimed, the bound address
// published under it, and the counter used to mint replacement names after
// a conflict.
#[derive(Debug, Clone)]
pub(crate) struct HostState {
    name: String,
    address: Option<IpAddr>,
    pub(crate) state: DnsState,
    rename_count: u32,
}

impl HostState {
    pub(crate) fn new(name: &str, address: Option<IpAddr>) -> Self {
        let name = if name.is_empty() {
            String::new()
        } else {
            normalize_name(name)
        };
        HostState {
            name,
            address,
            state: DnsState::default(),
            rename_count: 0,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn address(&self) -> Option<IpAddr> {
        self.address
    }

    pub(crate) fn has_name(&self) -> bool {
        !self.name.is_empty() && self.address.is_some()
    }

    // primary_address_record synthesizes the record for the host's own
    // address family; used for probing and announcing.
    pub(crate) fn primary_address_record(&self, ttl: u32, now: Instant) -> Option<Record> {
        let address = self.address?;
        if self.name.is_empty() {
            return None;
        }
        Some(Record::new(
            &self.name,
            false,
            ttl,
            RecordData::Address(address),
            now,
        ))
    }

    // address_record synthesizes a record only when the host's address
    // family matches the queried type; conflict checks must not compare
    // records the host would never publish.
    pub(crate) fn address_record(&self, typ: DnsType, ttl: u32, now: Instant) -> Option<Record> {
        let record = self.primary_address_record(ttl, now)?;
        if record.dns_type() == typ {
            Some(record)
        } else {
            None
        }
    }

    // answer_address_record synthesizes a record of the requested type even
    // across families, mapping the address into the other family's wire
    // form.
    pub(crate) fn answer_address_record(
        &self,
        typ: DnsType,
        ttl: u32,
        now: Instant,
    ) -> Option<Record> {
        let address = self.address?;
        if self.name.is_empty() || !matches!(typ, DnsType::A | DnsType::Aaaa) {
            return None;
        }
        Some(Record::new(
            &self.name,
            false,
            ttl,
            RecordData::Address(map_address(address, typ)),
            now,
        ))
    }

    // increment_name picks the next replacement host name after a lost
    // tie-break: strip a previous "-N" suffix and append the new counter
    // before ".local.".
    pub(crate) fn increment_name(&mut self) -> String {
        self.rename_count += 1;
        let trimmed = self.name.trim_end_matches('.');
        let mut base = self
            .name
            .strip_suffix(".local.")
            .unwrap_or(trimmed)
            .to_owned();
        // Only strip what a previous rename added.
        if self.rename_count > 1
            && let Some(dash) = base.rfind('-')
            && base[dash + 1..].parse::<u32>().is_ok()
        {
            base.truncate(dash);
        }
        self.name = format!("{}-{}.local.", base, self.rename_count);
        self.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_increment_name() {
        let mut host = HostState::new("device.local.", None);
        assert_eq!(host.increment_name(), "device-1.local.");
        assert_eq!(host.increment_name(), "device-2.local.");
        assert_eq!(host.name(), "device-2.local.");
    }

    #[test]
    fn test_increment_name_keeps_user_hyphens() {
        let mut host = HostState::new("my-device.local.", None);
        assert_eq!(host.increment_name(), "my-device-1.local.");
        assert_eq!(host.increment_name(), "my-device-2.local.");
    }

    #[test]
    fn test_address_record_requires_matching_family() {
        let now = Instant::now();
        let host = HostState::new(
            "device.local.",
            Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
        );

        assert!(host.address_record(DnsType::A, 3600, now).is_some());
        assert!(host.address_record(DnsType::Aaaa, 3600, now).is_none());
    }

    #[test]
    fn test_answer_address_record_maps_families() {
        let now = Instant::now();
        let host = HostState::new(
            "device.local.",
            Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
        );

        let aaaa = host
            .answer_address_record(DnsType::Aaaa, 3600, now)
            .expect("mapped record");
        let RecordData::Address(IpAddr::V6(v6)) = aaaa.data else {
            panic!("expected a v6 address");
        };
        assert_eq!(v6.octets()[12..], [10, 0, 0, 1]);

        let v6_host = HostState::new(
            "device.local.",
            Some(IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0x10))),
        );
        let a = v6_host
            .answer_address_record(DnsType::A, 3600, now)
            .expect("mapped record");
        assert_eq!(a.dns_type(), DnsType::A);
    }
}
