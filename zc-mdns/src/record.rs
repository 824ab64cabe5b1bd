use std::cmp::Ordering;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};

use crate::message::name::Name;
use crate::message::resource::a::AResource;
use crate::message::resource::aaaa::AaaaResource;
use crate::message::resource::hinfo::HinfoResource;
use crate::message::resource::opt::{DnsOption, OptResource};
use crate::message::resource::ptr::PtrResource;
use crate::message::resource::srv::SrvResource;
use crate::message::resource::txt::TxtResource;
use crate::message::resource::{Resource, ResourceBody, ResourceHeader};
use crate::message::{DNSCLASS_INET, DnsClass, DnsType};
use shared::error::*;

/// Append the trailing dot if the caller left it off.
pub(crate) fn normalize_name(name: &str) -> String {
    if name.ends_with('.') {
        name.to_owned()
    } else {
        format!("{name}.")
    }
}

// A resource record as tracked by the engine and its cache.
//
// Identity is (case-insensitive name, type, class); two records that also
// carry an equal payload are "the same" and refresh each other rather than
// coexisting.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Record {
    // Fully qualified name with trailing dot, original case preserved.
    pub(crate) name: String,
    pub(crate) class: DnsClass,
    // Cache-flush bit: this record replaces prior data for its identity.
    pub(crate) unique: bool,
    // Time to live in seconds.
    pub(crate) ttl: u32,
    pub(crate) created_at: Instant,
    // Address the record arrived from; kept for debugging.
    pub(crate) source: Option<SocketAddr>,
    pub(crate) data: RecordData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RecordData {
    Address(IpAddr),
    Pointer(String),
    Text(Vec<u8>),
    Service {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    HostInformation {
        cpu: String,
        os: String,
    },
    Opt {
        udp_payload: u16,
        options: Vec<(u16, Vec<u8>)>,
    },
}

impl RecordData {
    pub(crate) fn dns_type(&self) -> DnsType {
        match self {
            RecordData::Address(IpAddr::V4(_)) => DnsType::A,
            RecordData::Address(IpAddr::V6(_)) => DnsType::Aaaa,
            RecordData::Pointer(_) => DnsType::Ptr,
            RecordData::Text(_) => DnsType::Txt,
            RecordData::Service { .. } => DnsType::Srv,
            RecordData::HostInformation { .. } => DnsType::Hinfo,
            RecordData::Opt { .. } => DnsType::Opt,
        }
    }

    // payload_bytes renders the canonical (uncompressed) record data used
    // for conflict tie-breaking.
    fn payload_bytes(&self) -> Vec<u8> {
        match self {
            RecordData::Address(IpAddr::V4(a)) => a.octets().to_vec(),
            RecordData::Address(IpAddr::V6(a)) => a.octets().to_vec(),
            RecordData::Pointer(alias) => alias.as_bytes().to_vec(),
            RecordData::Text(text) => text.clone(),
            RecordData::Service {
                priority,
                weight,
                port,
                target,
            } => {
                let mut bytes = Vec::with_capacity(6 + target.len());
                bytes.extend_from_slice(&priority.to_be_bytes());
                bytes.extend_from_slice(&weight.to_be_bytes());
                bytes.extend_from_slice(&port.to_be_bytes());
                bytes.extend_from_slice(target.as_bytes());
                bytes
            }
            RecordData::HostInformation { cpu, os } => format!("{cpu} {os}").into_bytes(),
            RecordData::Opt { .. } => Vec::new(),
        }
    }
}

// Map an address onto the family the record type calls for.
//
// A v4 address written in an AAAA slot becomes the IPv4-mapped form, twelve
// zero bytes followed by the address; a v6 address written in an A slot
// keeps only its trailing four bytes.
pub(crate) fn map_address(addr: IpAddr, typ: DnsType) -> IpAddr {
    match (addr, typ) {
        (IpAddr::V4(v4), DnsType::Aaaa) => {
            let mut bytes = [0u8; 16];
            bytes[12..16].copy_from_slice(&v4.octets());
            IpAddr::V6(Ipv6Addr::from(bytes))
        }
        (IpAddr::V6(v6), DnsType::A) => {
            let o = v6.octets();
            IpAddr::V4(Ipv4Addr::new(o[12], o[13], o[14], o[15]))
        }
        (addr, _) => addr,
    }
}

impl Record {
    pub(crate) fn new(name: &str, unique: bool, ttl: u32, data: RecordData, now: Instant) -> Self {
        Record {
            name: normalize_name(name),
            class: DNSCLASS_INET,
            unique,
            ttl,
            created_at: now,
            source: None,
            data,
        }
    }

    // key returns the cache key for this record.
    pub(crate) fn key(&self) -> String {
        self.name.to_lowercase()
    }

    pub(crate) fn dns_type(&self) -> DnsType {
        self.data.dns_type()
    }

    // same_entry: identity match on name (case-insensitive), type, class.
    pub(crate) fn same_entry(&self, other: &Record) -> bool {
        self.dns_type() == other.dns_type()
            && self.class == other.class
            && self.name.eq_ignore_ascii_case(&other.name)
    }

    pub(crate) fn same_value(&self, other: &Record) -> bool {
        self.data == other.data
    }

    pub(crate) fn same_as(&self, other: &Record) -> bool {
        self.same_entry(other) && self.same_value(other)
    }

    // expires_at places the given percentage of this record's lifetime on
    // the timeline.
    pub(crate) fn expires_at(&self, percent: u32) -> Instant {
        self.created_at + Duration::from_millis(u64::from(self.ttl) * 10 * u64::from(percent))
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.expires_at(100) <= now
    }

    // A record is stale once it has outlived half of its TTL.
    pub(crate) fn is_stale(&self, now: Instant) -> bool {
        self.expires_at(50) <= now
    }

    pub(crate) fn remaining_ttl(&self, now: Instant) -> u32 {
        let end = self.expires_at(100);
        if end <= now {
            0
        } else {
            (end - now).as_secs() as u32
        }
    }

    // reset_ttl refreshes this record in place, avoiding a cache churn for
    // every periodic re-announcement.
    pub(crate) fn reset_ttl(&mut self, other: &Record) {
        self.created_at = other.created_at;
        self.ttl = other.ttl;
    }

    // suppressed_by reports whether one of the known answers makes sending
    // this record redundant: an equal record whose remaining TTL is more
    // than half of ours.
    pub(crate) fn suppressed_by(&self, answers: &[Record]) -> bool {
        answers.iter().any(|a| self.suppressed_by_record(a))
    }

    fn suppressed_by_record(&self, other: &Record) -> bool {
        self.same_as(other) && other.ttl > self.ttl / 2
    }

    // cmp_conflict orders two competing records over their canonical wire
    // form: class, then type, then payload bytes. The numerically greater
    // record wins a probe tie-break.
    pub(crate) fn cmp_conflict(&self, other: &Record) -> Ordering {
        (self.class.0)
            .cmp(&other.class.0)
            .then_with(|| (self.dns_type() as u16).cmp(&(other.dns_type() as u16)))
            .then_with(|| self.data.payload_bytes().cmp(&other.data.payload_bytes()))
    }

    // from_wire converts a decoded resource into a cacheable record.
    pub(crate) fn from_wire(res: &Resource, now: Instant, source: SocketAddr) -> Option<Record> {
        let header = &res.header;
        let any = res.body.as_ref()?.as_any();
        let data = match header.typ {
            DnsType::A => {
                let a = any.downcast_ref::<AResource>()?;
                RecordData::Address(IpAddr::V4(Ipv4Addr::from(a.a)))
            }
            DnsType::Aaaa => {
                let aaaa = any.downcast_ref::<AaaaResource>()?;
                RecordData::Address(IpAddr::V6(Ipv6Addr::from(aaaa.aaaa)))
            }
            DnsType::Ptr | DnsType::Cname => {
                let ptr = any.downcast_ref::<PtrResource>()?;
                RecordData::Pointer(ptr.ptr.data.clone())
            }
            DnsType::Txt => {
                let txt = any.downcast_ref::<TxtResource>()?;
                RecordData::Text(txt.txt.clone())
            }
            DnsType::Srv => {
                let srv = any.downcast_ref::<SrvResource>()?;
                RecordData::Service {
                    priority: srv.priority,
                    weight: srv.weight,
                    port: srv.port,
                    target: srv.target.data.clone(),
                }
            }
            DnsType::Hinfo => {
                let hinfo = any.downcast_ref::<HinfoResource>()?;
                RecordData::HostInformation {
                    cpu: hinfo.cpu.clone(),
                    os: hinfo.os.clone(),
                }
            }
            DnsType::Opt => {
                let opt = any.downcast_ref::<OptResource>()?;
                RecordData::Opt {
                    // RFC 6891: the class field of an OPT record carries
                    // the sender's UDP payload size.
                    udp_payload: header.class.0,
                    options: opt
                        .options
                        .iter()
                        .map(|o| (o.code, o.data.clone()))
                        .collect(),
                }
            }
            _ => return None,
        };
        let (class, unique) = if header.typ == DnsType::Opt {
            (DNSCLASS_INET, false)
        } else {
            (header.class.permanent(), header.class.cache_flush())
        };
        Some(Record {
            name: header.name.data.clone(),
            class,
            unique,
            ttl: header.ttl,
            created_at: now,
            source: Some(source),
            data,
        })
    }

    // to_wire builds the wire resource for this record, folding the
    // cache-flush bit back into the class field. The TTL to write is passed
    // in so goodbyes (TTL 0) and known answers (remaining TTL) reuse the
    // same record.
    pub(crate) fn to_wire(&self, ttl: u32) -> Result<Resource> {
        let name = Name::new(&self.name)?;
        let body: Box<dyn ResourceBody> = match &self.data {
            RecordData::Address(IpAddr::V4(a)) => Box::new(AResource { a: a.octets() }),
            RecordData::Address(IpAddr::V6(a)) => Box::new(AaaaResource { aaaa: a.octets() }),
            RecordData::Pointer(alias) => Box::new(PtrResource {
                ptr: Name::new(alias)?,
            }),
            RecordData::Text(text) => Box::new(TxtResource { txt: text.clone() }),
            RecordData::Service {
                priority,
                weight,
                port,
                target,
            } => Box::new(SrvResource {
                priority: *priority,
                weight: *weight,
                port: *port,
                target: Name::new(target)?,
            }),
            RecordData::HostInformation { cpu, os } => Box::new(HinfoResource {
                cpu: cpu.clone(),
                os: os.clone(),
            }),
            RecordData::Opt { options, .. } => Box::new(OptResource {
                options: options
                    .iter()
                    .map(|(code, data)| DnsOption {
                        code: *code,
                        data: data.clone(),
                    })
                    .collect(),
            }),
        };
        let class = match &self.data {
            RecordData::Opt { udp_payload, .. } => DnsClass(*udp_payload),
            _ => self.class.with_cache_flush(self.unique),
        };
        Ok(Resource {
            header: ResourceHeader {
                name,
                typ: self.dns_type(),
                class,
                ttl,
                length: 0,
            },
            body: Some(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr_record(name: &str, ip: [u8; 4], ttl: u32, now: Instant) -> Record {
        Record::new(
            name,
            false,
            ttl,
            RecordData::Address(IpAddr::V4(Ipv4Addr::from(ip))),
            now,
        )
    }

    #[test]
    fn test_expiry_and_stale() {
        let now = Instant::now();
        let rec = addr_record("device.local.", [10, 0, 0, 1], 120, now);

        assert!(!rec.is_stale(now));
        assert!(!rec.is_expired(now));
        assert!(rec.is_stale(now + Duration::from_secs(60)));
        assert!(!rec.is_expired(now + Duration::from_secs(60)));
        assert!(rec.is_expired(now + Duration::from_secs(120)));
        assert_eq!(rec.remaining_ttl(now + Duration::from_secs(30)), 90);
        assert_eq!(rec.remaining_ttl(now + Duration::from_secs(300)), 0);
    }

    #[test]
    fn test_same_as_is_case_insensitive() {
        let now = Instant::now();
        let a = addr_record("Device.Local.", [10, 0, 0, 1], 120, now);
        let b = addr_record("device.local.", [10, 0, 0, 1], 60, now);
        let c = addr_record("device.local.", [10, 0, 0, 2], 120, now);

        assert!(a.same_entry(&b));
        assert!(a.same_as(&b));
        assert!(a.same_entry(&c));
        assert!(!a.same_as(&c));
    }

    #[test]
    fn test_suppression_needs_half_ttl() {
        let now = Instant::now();
        let mine = addr_record("device.local.", [10, 0, 0, 1], 120, now);

        let strong = addr_record("device.local.", [10, 0, 0, 1], 61, now);
        let weak = addr_record("device.local.", [10, 0, 0, 1], 60, now);
        let different = addr_record("device.local.", [10, 0, 0, 2], 120, now);

        assert!(mine.suppressed_by(&[strong]));
        assert!(!mine.suppressed_by(&[weak]));
        assert!(!mine.suppressed_by(&[different]));
    }

    #[test]
    fn test_tie_break_is_antisymmetric() {
        let now = Instant::now();
        let low = addr_record("device.local.", [192, 168, 1, 5], 120, now);
        let high = addr_record("device.local.", [192, 168, 1, 9], 120, now);

        assert_eq!(low.cmp_conflict(&high), Ordering::Less);
        assert_eq!(high.cmp_conflict(&low), Ordering::Greater);
        assert_eq!(low.cmp_conflict(&low), Ordering::Equal);
    }

    #[test]
    fn test_tie_break_orders_by_type_before_payload() {
        let now = Instant::now();
        let a = addr_record("device.local.", [255, 255, 255, 255], 120, now);
        let srv = Record::new(
            "device.local.",
            false,
            120,
            RecordData::Service {
                priority: 0,
                weight: 0,
                port: 1,
                target: "device.local.".to_owned(),
            },
            now,
        );

        // SRV (33) outranks A (1) regardless of payload.
        assert_eq!(a.cmp_conflict(&srv), Ordering::Less);
        assert_eq!(srv.cmp_conflict(&a), Ordering::Greater);
    }

    #[test]
    fn test_map_address_families() {
        let v4 = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        let mapped = map_address(v4, DnsType::Aaaa);
        let IpAddr::V6(v6) = mapped else {
            panic!("expected a v6 address");
        };
        let octets = v6.octets();
        assert_eq!(&octets[..12], &[0u8; 12]);
        assert_eq!(&octets[12..], &[10, 0, 0, 2]);

        let back = map_address(mapped, DnsType::A);
        assert_eq!(back, v4);

        // Same family passes through untouched.
        assert_eq!(map_address(v4, DnsType::A), v4);
    }

    #[test]
    fn test_reset_ttl() {
        let now = Instant::now();
        let mut rec = addr_record("device.local.", [10, 0, 0, 1], 120, now);
        let later = now + Duration::from_secs(100);
        let refresh = addr_record("device.local.", [10, 0, 0, 1], 120, later);

        assert!(rec.is_stale(later));
        rec.reset_ttl(&refresh);
        assert!(!rec.is_stale(later));
        assert_eq!(rec.remaining_ttl(later), 120);
    }
}
