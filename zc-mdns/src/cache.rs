use std::collections::HashMap;
use std::time::Instant;

use crate::message::{DnsClass, DnsType};
use crate::record::Record;

// Outcome of inserting a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheUpdate {
    // A record the cache had not seen before.
    Added,
    // An existing record had its TTL refreshed in place.
    Refreshed,
    // A unique record evicted same-identity records with other payloads.
    Flushed,
}

// Cache of resource records keyed by lowercased fully qualified name. The
// cache owns its records; callers get references or clones.
#[derive(Default)]
pub(crate) struct Cache {
    entries: HashMap<String, Vec<Record>>,
}

impl Cache {
    // put inserts, refreshes or flush-replaces a record.
    pub(crate) fn put(&mut self, record: Record) -> CacheUpdate {
        let entries = self.entries.entry(record.key()).or_default();
        let mut update = CacheUpdate::Added;
        if record.unique {
            // Cache-flush bit: same-identity records whose payload
            // disagrees are replaced rather than augmented.
            let before = entries.len();
            entries.retain(|e| !e.same_entry(&record) || e.same_value(&record));
            if entries.len() != before {
                update = CacheUpdate::Flushed;
            }
        }
        if let Some(existing) = entries.iter_mut().find(|e| e.same_as(&record)) {
            existing.reset_ttl(&record);
            if update == CacheUpdate::Added {
                update = CacheUpdate::Refreshed;
            }
        } else {
            entries.push(record);
        }
        update
    }

    pub(crate) fn get(&self, name: &str, typ: DnsType, class: DnsClass) -> Option<&Record> {
        self.entries
            .get(&name.to_lowercase())?
            .iter()
            .find(|e| e.dns_type() == typ && e.class == class)
    }

    pub(crate) fn get_all(&self, name: &str) -> &[Record] {
        self.entries
            .get(&name.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn by_type(&self, typ: DnsType) -> Vec<&Record> {
        self.entries
            .values()
            .flatten()
            .filter(|e| e.dns_type() == typ)
            .collect()
    }

    pub(crate) fn remove(&mut self, record: &Record) -> bool {
        let key = record.key();
        let Some(entries) = self.entries.get_mut(&key) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| !e.same_as(record));
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.entries.remove(&key);
        }
        removed
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    // reap removes every record that has outlived its TTL and returns the
    // evicted records so listeners can be told.
    pub(crate) fn reap(&mut self, now: Instant) -> Vec<Record> {
        let mut removed = Vec::new();
        self.entries.retain(|_, entries| {
            entries.retain(|e| {
                if e.is_expired(now) {
                    removed.push(e.clone());
                    false
                } else {
                    true
                }
            });
            !entries.is_empty()
        });
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::DNSCLASS_INET;
    use crate::record::RecordData;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn srv(name: &str, port: u16, unique: bool, ttl: u32, now: Instant) -> Record {
        Record::new(
            name,
            unique,
            ttl,
            RecordData::Service {
                priority: 0,
                weight: 0,
                port,
                target: "device.local.".to_owned(),
            },
            now,
        )
    }

    fn a(name: &str, ip: [u8; 4], ttl: u32, now: Instant) -> Record {
        Record::new(
            name,
            false,
            ttl,
            RecordData::Address(IpAddr::V4(Ipv4Addr::from(ip))),
            now,
        )
    }

    #[test]
    fn test_put_get_and_refresh() {
        let now = Instant::now();
        let mut cache = Cache::default();

        assert_eq!(
            cache.put(a("Device.Local.", [10, 0, 0, 1], 120, now)),
            CacheUpdate::Added
        );
        assert_eq!(cache.len(), 1);

        // Same record again refreshes in place, even with different case.
        let later = now + Duration::from_secs(100);
        assert_eq!(
            cache.put(a("device.local.", [10, 0, 0, 1], 120, later)),
            CacheUpdate::Refreshed
        );
        assert_eq!(cache.len(), 1);

        let got = cache
            .get("DEVICE.local.", DnsType::A, DNSCLASS_INET)
            .expect("record should be cached");
        assert!(!got.is_stale(later));
    }

    #[test]
    fn test_unique_bit_flushes_conflicting_payload() {
        let now = Instant::now();
        let mut cache = Cache::default();

        cache.put(srv("printer._ipp._tcp.local.", 631, true, 120, now));
        assert_eq!(
            cache.put(srv("printer._ipp._tcp.local.", 9100, true, 120, now)),
            CacheUpdate::Flushed
        );
        assert_eq!(cache.len(), 1);

        let got = cache
            .get("printer._ipp._tcp.local.", DnsType::Srv, DNSCLASS_INET)
            .unwrap();
        let RecordData::Service { port, .. } = got.data else {
            panic!("expected an SRV record");
        };
        assert_eq!(port, 9100);
    }

    #[test]
    fn test_shared_records_coexist() {
        let now = Instant::now();
        let mut cache = Cache::default();

        cache.put(a("device.local.", [10, 0, 0, 1], 120, now));
        cache.put(a("device.local.", [10, 0, 0, 2], 120, now));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_all("device.local.").len(), 2);
    }

    #[test]
    fn test_by_type_and_remove() {
        let now = Instant::now();
        let mut cache = Cache::default();

        let rec = a("device.local.", [10, 0, 0, 1], 120, now);
        cache.put(rec.clone());
        cache.put(srv("printer._ipp._tcp.local.", 631, true, 120, now));

        assert_eq!(cache.by_type(DnsType::A).len(), 1);
        assert_eq!(cache.by_type(DnsType::Srv).len(), 1);
        assert_eq!(cache.by_type(DnsType::Txt).len(), 0);

        assert!(cache.remove(&rec));
        assert!(!cache.remove(&rec));
        assert!(cache.get("device.local.", DnsType::A, DNSCLASS_INET).is_none());
    }

    #[test]
    fn test_reap_removes_only_expired() {
        let now = Instant::now();
        let mut cache = Cache::default();

        cache.put(a("old.local.", [10, 0, 0, 1], 10, now));
        cache.put(a("fresh.local.", [10, 0, 0, 2], 120, now));

        let removed = cache.reap(now + Duration::from_secs(11));
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].name, "old.local.");
        assert_eq!(cache.len(), 1);

        // Every surviving record still has time left.
        let later = now + Duration::from_secs(11);
        assert!(cache.get_all("fresh.local.").iter().all(|r| !r.is_expired(later)));
    }
}
