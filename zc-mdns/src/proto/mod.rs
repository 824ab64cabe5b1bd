//! Sans-I/O mDNS / DNS-SD engine.
//!
//! [`Zeroconf`] holds the complete protocol state - record cache, owned
//! names with their probe/announce lifecycle, resolver bookkeeping and the
//! task timeline - but performs no I/O. The embedding event loop:
//!
//! 1. feeds received datagrams to `handle_read()`,
//! 2. sends every packet returned by `poll_write()` to 224.0.0.251:5353,
//! 3. calls `handle_timeout()` when `poll_timeout()` expires,
//! 4. consumes [`ZeroconfEvent`]s from `poll_event()`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use rand::Rng;
use shared::error::{Error, Result};
use shared::{TaggedBytesMut, TransportContext, TransportProtocol};

use crate::cache::Cache;
use crate::config::*;
use crate::host::HostState;
use crate::message::header::Header;
use crate::message::name::Name;
use crate::message::question::Question;
use crate::message::{DNSCLASS_INET, DnsType, Message};
use crate::record::{Record, RecordData, normalize_name};
use crate::service::ServiceInfo;
use crate::state::DnsState;

pub(crate) mod task;
use task::{Task, TaskKind, TaskOutcome};

/// The mDNS IPv4 multicast group (224.0.0.251).
pub const MDNS_MULTICAST_IPV4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

/// The mDNS IPv6 multicast group (ff02::fb).
pub const MDNS_MULTICAST_IPV6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfb);

/// The standard mDNS port (5353).
pub const MDNS_PORT: u16 = 5353;

/// IPv4 destination for all engine output.
pub const MDNS_DEST_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(MDNS_MULTICAST_IPV4), MDNS_PORT);

/// IPv6 destination for all engine output.
pub const MDNS_DEST_ADDR_V6: SocketAddr =
    SocketAddr::new(IpAddr::V6(MDNS_MULTICAST_IPV6), MDNS_PORT);

/// Name answered by the DNS-SD service type enumeration meta-query.
pub const META_QUERY_NAME: &str = "_services._dns-sd._udp.local.";

/// Events emitted by the engine.
///
/// Poll for events after `handle_read()` or `handle_timeout()`.
#[derive(Debug)]
pub enum ZeroconfEvent {
    /// A previously unseen service type showed up in the type enumeration.
    ServiceTypeAdded(String),
    /// An instance of a browsed type appeared on the link.
    ServiceAdded {
        service_type: String,
        name: String,
    },
    /// An instance of a browsed type said goodbye or expired.
    ServiceRemoved {
        service_type: String,
        name: String,
    },
    /// An instance has complete SRV, TXT and address data.
    ServiceResolved(ServiceInfo),
    /// `request_service_info` gave up before the instance resolved.
    ServiceResolveTimeout {
        service_type: String,
        name: String,
    },
    /// Conflict resolution renamed the local host.
    HostRenamed { old: String, new: String },
    /// Conflict resolution renamed a registered service instance.
    ServiceRenamed { old: String, new: String },
}

// An incoming datagram decoded into engine records.
#[derive(Debug, Default)]
struct IncomingMessage {
    id: u16,
    query: bool,
    truncated: bool,
    questions: Vec<Question>,
    answers: Vec<Record>,
    authorities: Vec<Record>,
    additionals: Vec<Record>,
    sender_udp_payload: usize,
}

impl IncomingMessage {
    fn decode(data: &[u8], now: Instant, source: SocketAddr) -> Result<Self> {
        let mut wire = Message::default();
        wire.unpack(data)?;

        let mut incoming = IncomingMessage {
            id: wire.header.id,
            query: !wire.header.response,
            truncated: wire.header.truncated,
            questions: wire.questions,
            sender_udp_payload: MAX_MSG_TYPICAL,
            ..IncomingMessage::default()
        };

        let sections = [
            (&wire.answers, &mut incoming.answers),
            (&wire.authorities, &mut incoming.authorities),
            (&wire.additionals, &mut incoming.additionals),
        ];
        for (wire_section, records) in sections {
            for res in wire_section {
                let Some(rec) = Record::from_wire(res, now, source) else {
                    continue;
                };
                if let RecordData::Opt {
                    udp_payload,
                    options,
                } = &rec.data
                {
                    // RFC 6891: the class of an OPT record advertises how
                    // large a datagram the sender can take.
                    incoming.sender_udp_payload =
                        (*udp_payload as usize).clamp(MIN_MSG_PAYLOAD, MAX_MSG_ABSOLUTE);
                    for (code, data) in options {
                        log::debug!("ignoring OPT option {code} ({} bytes)", data.len());
                    }
                    continue;
                }
                records.push(rec);
            }
        }
        Ok(incoming)
    }

    // append folds a continuation datagram into a truncated query.
    fn append(&mut self, other: IncomingMessage) -> Result<()> {
        if !self.query || !self.truncated || !other.query {
            return Err(Error::ErrNotTruncatedQuery);
        }
        self.questions.extend(other.questions);
        self.answers.extend(other.answers);
        self.authorities.extend(other.authorities);
        self.additionals.extend(other.additionals);
        self.truncated = other.truncated;
        Ok(())
    }
}

// An outgoing message as (record, ttl-to-write) pairs, packed into as many
// datagrams as the payload limit requires.
#[derive(Default)]
struct Outgoing {
    header: Header,
    questions: Vec<Question>,
    answers: Vec<(Record, u32)>,
    authorities: Vec<(Record, u32)>,
    additionals: Vec<(Record, u32)>,
}

impl Outgoing {
    fn len(&self) -> usize {
        self.questions.len() + self.answers.len() + self.authorities.len() + self.additionals.len()
    }

    // pack splits the message greedily at the payload limit. Datagrams of
    // a query that have continuations carry the TC bit; responses are
    // split without it.
    fn pack(&self, max_payload: usize) -> Result<Vec<Vec<u8>>> {
        let total = self.len();
        let mut packets = Vec::new();
        let mut start = 0;
        while start < total {
            let mut end = start + 1;
            let mut packed = self.pack_range(start, end, false)?;
            while end < total {
                let candidate = self.pack_range(start, end + 1, false)?;
                if candidate.len() > max_payload {
                    break;
                }
                packed = candidate;
                end += 1;
            }
            if end < total && !self.header.response {
                packed = self.pack_range(start, end, true)?;
            }
            packets.push(packed);
            start = end;
        }
        Ok(packets)
    }

    fn pack_range(&self, start: usize, end: usize, truncated: bool) -> Result<Vec<u8>> {
        let mut msg = Message {
            header: Header {
                truncated: truncated || self.header.truncated,
                ..self.header.clone()
            },
            ..Message::default()
        };
        let q_end = self.questions.len();
        let an_end = q_end + self.answers.len();
        let au_end = an_end + self.authorities.len();
        for i in start..end {
            if i < q_end {
                msg.questions.push(self.questions[i].clone());
            } else if i < an_end {
                let (rec, ttl) = &self.answers[i - q_end];
                msg.answers.push(rec.to_wire(*ttl)?);
            } else if i < au_end {
                let (rec, ttl) = &self.authorities[i - an_end];
                msg.authorities.push(rec.to_wire(*ttl)?);
            } else {
                let (rec, ttl) = &self.additionals[i - au_end];
                msg.additionals.push(rec.to_wire(*ttl)?);
            }
        }
        msg.pack()
    }
}

// A truncated query waiting for its continuation datagrams.
struct PendingQuery {
    msg: IncomingMessage,
    source: SocketAddr,
    received_at: Instant,
}

// Resolution bookkeeping for one discovered instance.
struct ResolverEntry {
    info: ServiceInfo,
    deadline: Option<Instant>,
    resolved: bool,
}

/// Sans-I/O mDNS / DNS-SD engine.
///
/// ```rust
/// use std::net::{IpAddr, Ipv4Addr};
/// use sansio::Protocol;
/// use zc_mdns::{ServiceInfo, Zeroconf, ZeroconfConfig};
///
/// let config = ZeroconfConfig::default()
///     .with_host_name("machine.local.")
///     .with_host_ip(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)));
/// let mut conn = Zeroconf::new(config);
///
/// conn.register_service(ServiceInfo::new("_http._tcp.local.", "web", 8080))
///     .unwrap();
///
/// // The engine wants to probe for its names soon.
/// assert!(conn.poll_timeout().is_some());
/// ```
pub struct Zeroconf {
    config: ZeroconfConfig,

    host: HostState,

    // Owned services, keyed by lowercased qualified name.
    services: HashMap<String, ServiceInfo>,

    // Service types seen or registered: lowercased -> original case.
    service_types: HashMap<String, String>,

    // Types being browsed (add_service_listener).
    listened_types: HashMap<String, String>,

    // Instances already reported to browse listeners.
    reported_instances: HashSet<String>,

    // Whether a type listener is attached.
    type_listening: bool,

    // Resolution state per discovered instance (lowercased qualified name).
    resolvers: HashMap<String, ResolverEntry>,

    cache: Cache,

    tasks: Vec<Task>,

    // A truncated query waiting for continuation datagrams.
    pending_truncated: Option<PendingQuery>,

    write_outs: VecDeque<TaggedBytesMut>,

    event_outs: VecDeque<ZeroconfEvent>,

    closed: bool,
}

impl Zeroconf {
    pub fn new(config: ZeroconfConfig) -> Self {
        let host = HostState::new(&config.host_name, config.host_ip);
        let now = Instant::now();
        let mut conn = Zeroconf {
            config,
            host,
            services: HashMap::new(),
            service_types: HashMap::new(),
            listened_types: HashMap::new(),
            reported_instances: HashSet::new(),
            type_listening: false,
            resolvers: HashMap::new(),
            cache: Cache::default(),
            tasks: vec![Task {
                kind: TaskKind::Reaper,
                deadline: now + REAP_INTERVAL,
                passes: 0,
            }],
            pending_truncated: None,
            write_outs: VecDeque::new(),
            event_outs: VecDeque::new(),
            closed: false,
        };
        if conn.host.has_name() {
            conn.ensure_prober(now);
        }
        conn
    }

    /// The host name currently claimed; renamed after a lost tie-break.
    pub fn host_name(&self) -> &str {
        self.host.name()
    }

    /// Register a service for publication. Probing starts immediately;
    /// once it survives three probe passes the instance is announced.
    pub fn register_service(&mut self, mut info: ServiceInfo) -> Result<()> {
        if self.closed {
            return Err(Error::ErrConnectionClosed);
        }
        if !self.host.has_name() {
            return Err(Error::ErrHostnameEmpty);
        }
        info.set_server(normalize_name(self.host.name()));
        // Qualified names must be unique among our own registrations.
        while self.services.contains_key(&info.qualified_name()) {
            let renamed = increment_service_name(info.name());
            info.set_name(renamed);
        }
        log::debug!("registering service {}", info.qualified_name());
        self.register_service_type_internal(info.service_type().to_owned());
        self.services.insert(info.qualified_name(), info);
        self.ensure_prober(Instant::now());
        Ok(())
    }

    /// Withdraw one service: goodbyes go out three times, then the name is
    /// gone.
    pub fn unregister_service(&mut self, service_type: &str, name: &str) -> Result<()> {
        if self.closed {
            return Err(Error::ErrConnectionClosed);
        }
        let key = service_key(service_type, name);
        let Some(mut info) = self.services.remove(&key) else {
            return Err(Error::ErrServiceNotFound);
        };
        let now = Instant::now();
        let records = info.records(self.config.ttl, self.host.name(), now);
        info.cancel();
        log::debug!("unregistering service {key}");
        self.tasks.push(Task {
            kind: TaskKind::Canceler { records },
            deadline: now,
            passes: 0,
        });
        Ok(())
    }

    /// Withdraw every non-persistent service.
    pub fn unregister_all_services(&mut self) {
        let keys: Vec<(String, String)> = self
            .services
            .values()
            .filter(|info| !info.is_persistent())
            .map(|info| (info.service_type().to_owned(), info.name().to_owned()))
            .collect();
        for (service_type, name) in keys {
            let _ = self.unregister_service(&service_type, &name);
        }
    }

    /// Record a service type. Types are also registered automatically as
    /// they are discovered or published.
    pub fn register_service_type(&mut self, service_type: &str) {
        self.register_service_type_internal(normalize_name(service_type));
    }

    /// Browse for instances of a type. Cached instances are reported
    /// immediately; three PTR queries go out with increasing backoff.
    pub fn add_service_listener(&mut self, service_type: &str) {
        if self.closed {
            return;
        }
        let service_type = normalize_name(service_type);
        let key = service_type.to_lowercase();
        if self
            .listened_types
            .insert(key.clone(), service_type.clone())
            .is_some()
        {
            return;
        }
        self.register_service_type_internal(service_type.clone());
        let now = Instant::now();
        // Report what the cache already knows.
        let cached: Vec<Record> = self
            .cache
            .by_type(DnsType::Ptr)
            .into_iter()
            .filter(|rec| rec.name.eq_ignore_ascii_case(&service_type))
            .cloned()
            .collect();
        for rec in cached {
            self.track_instance(&rec, now);
        }
        self.tasks.push(Task {
            kind: TaskKind::ServiceResolver { service_type },
            deadline: now + QUERY_WAIT_INTERVAL,
            passes: 0,
        });
    }

    pub fn remove_service_listener(&mut self, service_type: &str) {
        let key = normalize_name(service_type).to_lowercase();
        self.listened_types.remove(&key);
    }

    /// Listen for service types showing up on the link; drives the
    /// `_services._dns-sd._udp.local.` meta-query.
    pub fn add_service_type_listener(&mut self) {
        if self.closed || self.type_listening {
            return;
        }
        self.type_listening = true;
        // Report the types already known.
        let known: Vec<String> = self.service_types.values().cloned().collect();
        for ty in known {
            self.event_outs.push_back(ZeroconfEvent::ServiceTypeAdded(ty));
        }
        self.tasks.push(Task {
            kind: TaskKind::TypeResolver,
            deadline: Instant::now() + QUERY_WAIT_INTERVAL,
            passes: 0,
        });
    }

    pub fn remove_service_type_listener(&mut self) {
        self.type_listening = false;
    }

    /// Ask for one instance's SRV, TXT and address data. Emits
    /// [`ZeroconfEvent::ServiceResolved`] when complete, or
    /// [`ZeroconfEvent::ServiceResolveTimeout`] when the deadline passes.
    pub fn request_service_info(
        &mut self,
        service_type: &str,
        name: &str,
        timeout: Option<Duration>,
    ) {
        if self.closed {
            return;
        }
        let now = Instant::now();
        let key = service_key(service_type, name);
        let mut info = ServiceInfo::new(service_type, name, 0);
        // Seed from whatever the cache already holds.
        let cached: Vec<Record> = self.cache.get_all(&key).to_vec();
        for rec in cached {
            info.update_from_record(&self.cache, now, &rec);
        }
        if info.has_data() {
            self.event_outs
                .push_back(ZeroconfEvent::ServiceResolved(info.clone()));
            self.resolvers.insert(
                key,
                ResolverEntry {
                    info,
                    deadline: None,
                    resolved: true,
                },
            );
            return;
        }
        let deadline = now + timeout.unwrap_or(self.config.service_info_timeout);
        self.resolvers.insert(
            key.clone(),
            ResolverEntry {
                info,
                deadline: Some(deadline),
                resolved: false,
            },
        );
        if !self.has_task(|kind| {
            matches!(kind, TaskKind::InfoResolver { qualified_name } if *qualified_name == key)
        }) {
            self.tasks.push(Task {
                kind: TaskKind::InfoResolver {
                    qualified_name: key,
                },
                deadline: now + QUERY_WAIT_INTERVAL,
                passes: 0,
            });
        }
    }

    /// Snapshot of what is known about one instance, if anything.
    pub fn service_info(&self, service_type: &str, name: &str) -> Option<ServiceInfo> {
        let key = service_key(service_type, name);
        if let Some(entry) = self.resolvers.get(&key) {
            return Some(entry.info.clone());
        }
        let records = self.cache.get_all(&key);
        if records.is_empty() {
            return None;
        }
        let now = Instant::now();
        let mut info = ServiceInfo::new(service_type, name, 0);
        for rec in records.to_vec() {
            info.update_from_record(&self.cache, now, &rec);
        }
        Some(info)
    }

    /// Enumerate the known instances of a type: our own registrations plus
    /// everything the cache has seen.
    pub fn services_of_type(&self, service_type: &str) -> Vec<ServiceInfo> {
        let service_type = normalize_name(service_type);
        let mut found = Vec::new();
        for info in self.services.values() {
            if info
                .service_type()
                .eq_ignore_ascii_case(&service_type)
            {
                found.push(info.clone());
            }
        }
        for rec in self.cache.by_type(DnsType::Ptr) {
            if !rec.name.eq_ignore_ascii_case(&service_type) {
                continue;
            }
            let RecordData::Pointer(alias) = &rec.data else {
                continue;
            };
            let instance = unqualified_instance(alias, &service_type);
            if let Some(info) = self.service_info(&service_type, &instance)
                && !found
                    .iter()
                    .any(|f| f.qualified_name() == info.qualified_name())
            {
                found.push(info);
            }
        }
        found
    }

    /// Replace a published service's TXT payload; an ANNOUNCED instance
    /// re-enters announcing so the change propagates.
    pub fn set_text(&mut self, service_type: &str, name: &str, text: Vec<u8>) -> Result<()> {
        let key = service_key(service_type, name);
        let Some(info) = self.services.get_mut(&key) else {
            return Err(Error::ErrServiceNotFound);
        };
        if info.state.is_canceled() {
            return Err(Error::ErrServiceCanceled);
        }
        info.set_text(text);
        info.needs_text_announcing = true;
        if info.state.is_announced() {
            info.state = DnsState::Announcing1;
            self.ensure_announcer(Instant::now(), Duration::ZERO);
        }
        Ok(())
    }

    /// Recovery after a driver-level I/O failure: drop every cached record
    /// and scheduled task, revert all owned names to probing, resume.
    pub fn recover(&mut self) {
        if self.closed {
            return;
        }
        log::warn!("recovering: clearing cache and re-probing all owned names");
        let now = Instant::now();
        self.tasks.clear();
        self.write_outs.clear();
        self.cache.clear();
        self.pending_truncated = None;
        self.reported_instances.clear();
        self.resolvers.clear();
        for info in self.services.values_mut() {
            info.revert_state();
        }
        self.host.state = self.host.state.revert();
        self.tasks.push(Task {
            kind: TaskKind::Reaper,
            deadline: now + REAP_INTERVAL,
            passes: 0,
        });
        if self.host.has_name() {
            self.ensure_prober(now);
        }
        let listened: Vec<String> = self.listened_types.values().cloned().collect();
        for service_type in listened {
            self.tasks.push(Task {
                kind: TaskKind::ServiceResolver { service_type },
                deadline: now + QUERY_WAIT_INTERVAL,
                passes: 0,
            });
        }
        if self.type_listening {
            self.tasks.push(Task {
                kind: TaskKind::TypeResolver,
                deadline: now + QUERY_WAIT_INTERVAL,
                passes: 0,
            });
        }
    }

    fn register_service_type_internal(&mut self, service_type: String) {
        let key = service_type.to_lowercase();
        if self.service_types.contains_key(&key) {
            return;
        }
        self.service_types.insert(key, service_type.clone());
        if self.type_listening {
            self.event_outs
                .push_back(ZeroconfEvent::ServiceTypeAdded(service_type));
        }
    }

    fn has_task(&self, pred: impl Fn(&TaskKind) -> bool) -> bool {
        self.tasks.iter().any(|t| pred(&t.kind))
    }

    fn ensure_prober(&mut self, now: Instant) {
        if self.has_task(|kind| matches!(kind, TaskKind::Prober)) {
            return;
        }
        // Random startup jitter so simultaneous hosts don't probe in
        // lockstep.
        let delay = Duration::from_millis(rand::thread_rng().gen_range(0..=250));
        self.tasks.push(Task {
            kind: TaskKind::Prober,
            deadline: now + delay,
            passes: 0,
        });
    }

    fn ensure_announcer(&mut self, now: Instant, delay: Duration) {
        if self.has_task(|kind| matches!(kind, TaskKind::Announcer)) {
            return;
        }
        self.tasks.push(Task {
            kind: TaskKind::Announcer,
            deadline: now + delay,
            passes: 0,
        });
    }

    fn ensure_renewer(&mut self, now: Instant) {
        if self.has_task(|kind| matches!(kind, TaskKind::Renewer)) {
            return;
        }
        self.tasks.push(Task {
            kind: TaskKind::Renewer,
            deadline: now + percent_of_ttl(self.config.ttl, RENEWAL_PERCENTS[0]),
            passes: 0,
        });
    }

    fn dest_addr(&self) -> SocketAddr {
        match self.host.address() {
            Some(IpAddr::V6(_)) => MDNS_DEST_ADDR_V6,
            _ => MDNS_DEST_ADDR,
        }
    }

    fn queue_outgoing(&mut self, out: Outgoing, max_payload: usize, now: Instant) {
        if out.len() == 0 {
            return;
        }
        let packets = match out.pack(max_payload) {
            Ok(packets) => packets,
            Err(err) => {
                log::error!("failed to pack outgoing message: {err}");
                return;
            }
        };
        let peer_addr = self.dest_addr();
        for packet in packets {
            log::trace!("queueing {} byte datagram to {peer_addr}", packet.len());
            self.write_outs.push_back(TaggedBytesMut {
                now,
                transport: TransportContext {
                    local_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
                    peer_addr,
                    transport_protocol: TransportProtocol::UDP,
                    ecn: None,
                },
                message: BytesMut::from(&packet[..]),
            });
        }
    }

    fn queue_query(
        &mut self,
        questions: Vec<Question>,
        known_answers: Vec<(Record, u32)>,
        authorities: Vec<(Record, u32)>,
        now: Instant,
    ) {
        let out = Outgoing {
            header: Header::default(),
            questions,
            answers: known_answers,
            authorities,
            additionals: Vec::new(),
        };
        self.queue_outgoing(out, MAX_MSG_TYPICAL, now);
    }

    fn queue_response(
        &mut self,
        answers: Vec<(Record, u32)>,
        additionals: Vec<(Record, u32)>,
        max_payload: usize,
        now: Instant,
    ) {
        let out = Outgoing {
            header: Header {
                response: true,
                authoritative: true,
                ..Header::default()
            },
            questions: Vec::new(),
            answers,
            authorities: Vec::new(),
            additionals,
        };
        self.queue_outgoing(out, max_payload, now);
    }

    // ---- incoming pipeline ----

    fn process_incoming(&mut self, incoming: IncomingMessage, src: SocketAddr, now: Instant) {
        if incoming.query {
            self.handle_query_message(incoming, src, now);
        } else {
            self.handle_response_message(incoming, now);
        }
    }

    fn handle_query_message(&mut self, incoming: IncomingMessage, src: SocketAddr, now: Instant) {
        // Fold a continuation into the stashed truncated query from the
        // same sender.
        let incoming = match self.pending_truncated.take_if(|p| p.source.ip() == src.ip()) {
            Some(pending) => {
                let mut base = pending.msg;
                match base.append(incoming) {
                    Ok(()) => base,
                    Err(err) => {
                        log::warn!("dropping truncated query continuation: {err}");
                        return;
                    }
                }
            }
            None => incoming,
        };

        if incoming.truncated {
            // More datagrams of this logical query follow; wait for them,
            // but not forever.
            self.tasks.push(Task {
                kind: TaskKind::TruncationGc { received_at: now },
                deadline: now + TRUNCATION_WAIT,
                passes: 0,
            });
            self.pending_truncated = Some(PendingQuery {
                msg: incoming,
                source: src,
                received_at: now,
            });
            return;
        }

        self.process_query(incoming, now);
    }

    fn process_query(&mut self, msg: IncomingMessage, now: Instant) {
        // Probes carry their tentative records in the authority section;
        // they may collide with names we own.
        let authorities = msg.authorities.clone();
        for rec in &authorities {
            self.handle_record_conflict(rec, now, true);
        }

        let mut answers: Vec<Record> = Vec::new();
        let mut additionals: Vec<Record> = Vec::new();
        for q in &msg.questions {
            self.answer_question(q, now, &mut answers, &mut additionals);
        }

        // Known-answer suppression plus in-message dedup.
        dedup_records(&mut answers);
        answers.retain(|a| !a.suppressed_by(&msg.answers));
        dedup_records(&mut additionals);
        additionals
            .retain(|a| !a.suppressed_by(&msg.answers) && !answers.iter().any(|x| x.same_as(a)));

        if answers.is_empty() {
            return;
        }

        // Delay the answer so responses to related queries can coalesce
        // into one datagram.
        let max_payload = msg.sender_udp_payload;
        if let Some(task) = self.tasks.iter_mut().find(|t| {
            matches!(t.kind, TaskKind::Responder { .. })
        }) {
            if let TaskKind::Responder {
                answers: pending,
                additionals: pending_add,
                max_payload: pending_payload,
            } = &mut task.kind
            {
                for a in answers {
                    if !pending.iter().any(|p| p.same_as(&a)) {
                        pending.push(a);
                    }
                }
                for a in additionals {
                    if !pending_add.iter().any(|p| p.same_as(&a)) {
                        pending_add.push(a);
                    }
                }
                *pending_payload = (*pending_payload).min(max_payload);
            }
        } else {
            let delay = Duration::from_millis(
                rand::thread_rng().gen_range(RESPONSE_MIN_WAIT_MS..=RESPONSE_MAX_WAIT_MS),
            );
            self.tasks.push(Task {
                kind: TaskKind::Responder {
                    answers,
                    additionals,
                    max_payload,
                },
                deadline: now + delay,
                passes: 0,
            });
        }
    }

    fn handle_response_message(&mut self, msg: IncomingMessage, now: Instant) {
        // Within a datagram, records apply in message order.
        let records: Vec<Record> = msg
            .answers
            .into_iter()
            .chain(msg.authorities)
            .chain(msg.additionals)
            .collect();
        for rec in records {
            self.handle_record_conflict(&rec, now, false);
            self.apply_to_cache(rec, now);
        }
    }

    // ---- conflict resolution ----

    fn handle_record_conflict(&mut self, rec: &Record, now: Instant, probe: bool) -> bool {
        match &rec.data {
            RecordData::Address(_) => self.handle_address_conflict(rec, now, probe),
            RecordData::Service { .. } => self.handle_service_conflict(rec, now, probe),
            // HINFO and the rest are informational; they never contend for
            // a name.
            _ => false,
        }
    }

    fn handle_address_conflict(&mut self, rec: &Record, now: Instant, probe: bool) -> bool {
        let Some(mine) = self
            .host
            .address_record(rec.dns_type(), self.config.ttl, now)
        else {
            return false;
        };
        if !mine.name.eq_ignore_ascii_case(&rec.name) || mine.same_value(rec) {
            return false;
        }
        if probe {
            log::debug!(
                "conflicting host probe for {} from {:?}",
                rec.name,
                rec.source
            );
            // Tie-break: the numerically greater record claims the name.
            if self.host.state.is_probing()
                && rec.cmp_conflict(&mine) != std::cmp::Ordering::Less
            {
                self.rename_host(now);
                return true;
            }
            return false;
        }
        log::debug!("host name {} denied by {:?}", rec.name, rec.source);
        if self.host.state.is_probing() {
            self.rename_host(now);
        } else {
            // An established name was denied: re-verify it, nothing else.
            self.host.state = self.host.state.revert();
            self.ensure_prober(now);
        }
        true
    }

    fn rename_host(&mut self, now: Instant) {
        let old = self.host.name().to_owned();
        let new = self.host.increment_name();
        log::info!("host name conflict: {old} -> {new}");
        self.cache.clear();
        for info in self.services.values_mut() {
            info.set_server(new.clone());
            info.revert_state();
        }
        self.host.state = self.host.state.revert();
        self.event_outs
            .push_back(ZeroconfEvent::HostRenamed { old, new });
        self.ensure_prober(now);
    }

    fn handle_service_conflict(&mut self, rec: &Record, now: Instant, probe: bool) -> bool {
        let key = rec.key();
        let Some(info) = self.services.get(&key) else {
            return false;
        };
        let RecordData::Service { port, target, .. } = &rec.data else {
            return false;
        };
        if *port == info.port() && target.eq_ignore_ascii_case(self.host.name()) {
            return false;
        }
        let mine = Record::new(
            &info.qualified_name(),
            true,
            self.config.ttl,
            RecordData::Service {
                priority: info.priority(),
                weight: info.weight(),
                port: info.port(),
                target: normalize_name(self.host.name()),
            },
            now,
        );
        let comparison = rec.cmp_conflict(&mine);
        if comparison == std::cmp::Ordering::Equal {
            // Our own record looped back over another interface.
            log::debug!("ignoring identical service probe for {key}");
            return false;
        }
        if probe {
            log::debug!("conflicting service probe for {key} from {:?}", rec.source);
            if info.state.is_probing() && comparison == std::cmp::Ordering::Greater {
                self.rename_service(&key, now);
                return true;
            }
            return false;
        }
        log::debug!("service {key} denied by {:?}", rec.source);
        if info.state.is_probing() {
            self.rename_service(&key, now);
        } else if let Some(info) = self.services.get_mut(&key) {
            info.revert_state();
            self.ensure_prober(now);
        }
        true
    }

    fn rename_service(&mut self, key: &str, now: Instant) {
        let Some(mut info) = self.services.remove(key) else {
            return;
        };
        let old = info.name().to_owned();
        let new = increment_service_name(&old);
        log::info!("service name conflict: {old} -> {new}");
        info.set_name(new.clone());
        info.revert_state();
        self.services.insert(info.qualified_name(), info);
        self.event_outs
            .push_back(ZeroconfEvent::ServiceRenamed { old, new });
        self.ensure_prober(now);
    }

    // ---- cache application and notification ----

    fn apply_to_cache(&mut self, rec: Record, now: Instant) {
        if rec.ttl == 0 {
            // Goodbye: the peer is withdrawing this record.
            if self.cache.remove(&rec) {
                self.notify_record_removed(&rec);
            }
            return;
        }
        self.cache.put(rec.clone());
        self.notify_record_updated(&rec, now);
    }

    fn notify_record_updated(&mut self, rec: &Record, now: Instant) {
        if let RecordData::Pointer(alias) = &rec.data {
            if rec.name.eq_ignore_ascii_case(META_QUERY_NAME) {
                self.register_service_type_internal(normalize_name(alias));
            } else {
                self.track_instance(rec, now);
            }
        }

        // Feed the record to every descriptor still waiting for data.
        let mut completed: Vec<(String, ServiceInfo)> = Vec::new();
        for (key, entry) in self.resolvers.iter_mut() {
            entry.info.update_from_record(&self.cache, now, rec);
            if !entry.resolved && entry.info.has_data() {
                entry.resolved = true;
                entry.deadline = None;
                completed.push((key.clone(), entry.info.clone()));
            }
        }
        for (key, info) in completed {
            self.tasks.retain(|t| {
                !matches!(&t.kind, TaskKind::InfoResolver { qualified_name } if *qualified_name == key)
            });
            self.event_outs
                .push_back(ZeroconfEvent::ServiceResolved(info));
        }
    }

    // track_instance starts following a PTR-announced instance of a
    // browsed type.
    fn track_instance(&mut self, rec: &Record, _now: Instant) {
        let RecordData::Pointer(alias) = &rec.data else {
            return;
        };
        let type_key = rec.name.to_lowercase();
        let Some(service_type) = self.listened_types.get(&type_key).cloned() else {
            return;
        };
        let instance = unqualified_instance(alias, &service_type);
        let key = alias.to_lowercase();
        if self.reported_instances.insert(key.clone()) {
            self.event_outs.push_back(ZeroconfEvent::ServiceAdded {
                service_type: service_type.clone(),
                name: instance.clone(),
            });
        }
        self.resolvers.entry(key).or_insert_with(|| ResolverEntry {
            info: ServiceInfo::new(&service_type, &instance, 0),
            deadline: None,
            resolved: false,
        });
    }

    fn notify_record_removed(&mut self, rec: &Record) {
        let RecordData::Pointer(alias) = &rec.data else {
            return;
        };
        let type_key = rec.name.to_lowercase();
        let Some(service_type) = self.listened_types.get(&type_key).cloned() else {
            return;
        };
        let key = alias.to_lowercase();
        if self.reported_instances.remove(&key) {
            self.resolvers.remove(&key);
            self.event_outs.push_back(ZeroconfEvent::ServiceRemoved {
                service_type: service_type.clone(),
                name: unqualified_instance(alias, &service_type),
            });
        }
    }

    // ---- answer synthesis ----

    fn answer_question(
        &self,
        q: &Question,
        now: Instant,
        answers: &mut Vec<Record>,
        additionals: &mut Vec<Record>,
    ) {
        let qname = q.name.data.to_lowercase();
        let qtype = q.typ;
        let ttl = self.config.ttl;

        // Service type enumeration.
        if matches!(qtype, DnsType::Ptr | DnsType::Any) && qname == META_QUERY_NAME {
            let mut types: Vec<String> = self
                .services
                .values()
                .filter(|info| info.state.is_announced())
                .map(|info| info.service_type().to_owned())
                .collect();
            types.sort();
            types.dedup();
            for ty in types {
                answers.push(Record::new(
                    META_QUERY_NAME,
                    false,
                    ttl,
                    RecordData::Pointer(ty),
                    now,
                ));
            }
        }

        // Browse query for a type we publish instances of.
        if matches!(qtype, DnsType::Ptr | DnsType::Any) {
            for info in self.services.values() {
                if !info.state.is_announced()
                    || !info.service_type().eq_ignore_ascii_case(&q.name.data)
                {
                    continue;
                }
                answers.extend(info.records(ttl, self.host.name(), now));
                if let Some(rec) = self.host.primary_address_record(ttl, now)
                    && self.host.state.is_announced()
                {
                    additionals.push(rec);
                }
            }
        }

        // Direct question about one of our instances.
        if matches!(qtype, DnsType::Srv | DnsType::Txt | DnsType::Any)
            && let Some(info) = self.services.get(&qname)
            && info.state.is_announced()
        {
            let records = info.records(ttl, self.host.name(), now);
            // records() yields [PTR, SRV, TXT].
            let mut push_address = false;
            for rec in records {
                match (&rec.data, qtype) {
                    (RecordData::Service { .. }, DnsType::Srv | DnsType::Any) => {
                        answers.push(rec);
                        push_address = true;
                    }
                    (RecordData::Text(_), DnsType::Txt | DnsType::Any) => answers.push(rec),
                    _ => {}
                }
            }
            if push_address
                && self.host.state.is_announced()
                && let Some(rec) = self.host.primary_address_record(ttl, now)
            {
                additionals.push(rec);
            }
        }

        // Our host name. Cross-family questions get the mapped form.
        if matches!(qtype, DnsType::A | DnsType::Aaaa | DnsType::Any)
            && self.host.state.is_announced()
            && qname == self.host.name().to_lowercase()
        {
            let record = if qtype == DnsType::Any {
                self.host.primary_address_record(ttl, now)
            } else {
                self.host.answer_address_record(qtype, ttl, now)
            };
            if let Some(rec) = record {
                answers.push(rec);
            }
        }

        // HINFO questions are informational only; nothing is synthesized.
    }

    // ---- task execution ----

    fn run_task(&mut self, task: &mut Task, now: Instant) -> TaskOutcome {
        match &mut task.kind {
            TaskKind::Prober => self.run_prober(now),
            TaskKind::Announcer => self.run_announcer(now),
            TaskKind::Renewer => {
                let passes = task.passes;
                task.passes += 1;
                self.run_renewer(passes, now)
            }
            TaskKind::Responder {
                answers,
                additionals,
                max_payload,
            } => {
                let answers = std::mem::take(answers);
                let additionals = std::mem::take(additionals);
                let max_payload = *max_payload;
                self.run_responder(answers, additionals, max_payload, now)
            }
            TaskKind::Canceler { records } => {
                let records = records.clone();
                task.passes += 1;
                let passes = task.passes;
                self.run_canceler(records, passes, now)
            }
            TaskKind::Reaper => self.run_reaper(now),
            TaskKind::ServiceResolver { service_type } => {
                let service_type = service_type.clone();
                task.passes += 1;
                let passes = task.passes;
                self.run_service_resolver(&service_type, passes, now)
            }
            TaskKind::TypeResolver => {
                task.passes += 1;
                let passes = task.passes;
                self.run_type_resolver(passes, now)
            }
            TaskKind::InfoResolver { qualified_name } => {
                let qualified_name = qualified_name.clone();
                task.passes += 1;
                let passes = task.passes;
                self.run_info_resolver(&qualified_name, passes, now)
            }
            TaskKind::TruncationGc { received_at } => {
                let received_at = *received_at;
                if let Some(pending) = &self.pending_truncated
                    && pending.received_at == received_at
                {
                    log::warn!(
                        "discarding partial truncated query from {}",
                        pending.source
                    );
                    self.pending_truncated = None;
                }
                TaskOutcome::Done
            }
        }
    }

    fn run_prober(&mut self, now: Instant) -> TaskOutcome {
        if self.closed || self.host.state.is_canceled() {
            return TaskOutcome::Done;
        }
        let ttl = self.config.ttl;
        let host_name = self.host.name().to_owned();
        let mut questions = Vec::new();
        let mut authorities = Vec::new();
        let mut reached_announcing = false;

        if self.host.has_name() && self.host.state.is_probing() {
            if let Ok(name) = Name::new(&host_name) {
                questions.push(Question {
                    name,
                    typ: DnsType::Any,
                    class: DNSCLASS_INET,
                });
            }
            if let Some(rec) = self.host.primary_address_record(ttl, now) {
                authorities.push((rec, ttl));
            }
            self.host.state = self.host.state.advance();
            reached_announcing |= self.host.state.is_announcing();
        }

        for info in self.services.values_mut() {
            if !info.state.is_probing() {
                continue;
            }
            let qualified = info.qualified_name();
            if let Ok(name) = Name::new(&qualified) {
                questions.push(Question {
                    name,
                    typ: DnsType::Any,
                    class: DNSCLASS_INET,
                });
            }
            authorities.push((
                Record::new(
                    &qualified,
                    true,
                    ttl,
                    RecordData::Service {
                        priority: info.priority(),
                        weight: info.weight(),
                        port: info.port(),
                        target: normalize_name(&host_name),
                    },
                    now,
                ),
                ttl,
            ));
            info.advance_state();
            reached_announcing |= info.state.is_announcing();
        }

        if questions.is_empty() {
            return TaskOutcome::Done;
        }
        self.queue_query(questions, Vec::new(), authorities, now);

        if reached_announcing {
            // Hold the probe silence window, then announce.
            self.ensure_announcer(now, PROBE_WAIT_INTERVAL);
        }
        let still_probing = self.host.state.is_probing()
            || self.services.values().any(|info| info.state.is_probing());
        if still_probing {
            TaskOutcome::Reschedule(PROBE_WAIT_INTERVAL)
        } else {
            TaskOutcome::Done
        }
    }

    fn run_announcer(&mut self, now: Instant) -> TaskOutcome {
        if self.closed || self.host.state.is_canceled() {
            return TaskOutcome::Done;
        }
        let ttl = self.config.ttl;
        let host_name = self.host.name().to_owned();
        let mut answers = Vec::new();
        let mut still_announcing = false;

        if self.host.has_name() && self.host.state.is_announcing() {
            if let Some(rec) = self.host.primary_address_record(ttl, now) {
                answers.push((rec, ttl));
            }
            self.host.state = self.host.state.advance();
            still_announcing |= self.host.state.is_announcing();
        }

        for info in self.services.values_mut() {
            if !info.state.is_announcing() {
                continue;
            }
            for rec in info.records(ttl, &host_name, now) {
                answers.push((rec, ttl));
            }
            info.advance_state();
            if info.state.is_announced() {
                info.needs_text_announcing = false;
            }
            still_announcing |= info.state.is_announcing();
        }

        if answers.is_empty() {
            return TaskOutcome::Done;
        }
        self.queue_response(answers, Vec::new(), MAX_MSG_TYPICAL, now);

        if still_announcing {
            TaskOutcome::Reschedule(ANNOUNCE_WAIT_INTERVAL)
        } else {
            self.ensure_renewer(now);
            TaskOutcome::Done
        }
    }

    fn run_renewer(&mut self, passes: u32, now: Instant) -> TaskOutcome {
        if self.closed || self.host.state.is_canceled() {
            return TaskOutcome::Done;
        }
        let ttl = self.config.ttl;
        let host_name = self.host.name().to_owned();
        let mut answers = Vec::new();

        if self.host.has_name() && self.host.state.is_announced() {
            if let Some(rec) = self.host.primary_address_record(ttl, now) {
                answers.push((rec, ttl));
            }
        }
        for info in self.services.values() {
            if info.state.is_announced() {
                for rec in info.records(ttl, &host_name, now) {
                    answers.push((rec, ttl));
                }
            }
        }
        if answers.is_empty() {
            return TaskOutcome::Done;
        }
        self.queue_response(answers, Vec::new(), MAX_MSG_TYPICAL, now);

        // Renew at 80/85/90/95% of the record lifetime; each pass restarts
        // the peers' TTLs, so after the last step the cycle begins again.
        let index = passes as usize % RENEWAL_PERCENTS.len();
        let delay = if index + 1 < RENEWAL_PERCENTS.len() {
            percent_of_ttl(ttl, RENEWAL_PERCENTS[index + 1] - RENEWAL_PERCENTS[index])
        } else {
            percent_of_ttl(ttl, RENEWAL_PERCENTS[0])
        };
        TaskOutcome::Reschedule(delay)
    }

    fn run_responder(
        &mut self,
        answers: Vec<Record>,
        additionals: Vec<Record>,
        max_payload: usize,
        now: Instant,
    ) -> TaskOutcome {
        if self.closed {
            return TaskOutcome::Done;
        }
        let live = |rec: &Record| !rec.is_expired(now);
        let answers: Vec<(Record, u32)> = answers
            .into_iter()
            .filter(live)
            .map(|r| {
                let ttl = r.ttl;
                (r, ttl)
            })
            .collect();
        let additionals: Vec<(Record, u32)> = additionals
            .into_iter()
            .filter(live)
            .map(|r| {
                let ttl = r.ttl;
                (r, ttl)
            })
            .collect();
        if answers.is_empty() {
            return TaskOutcome::Done;
        }
        self.queue_response(answers, additionals, max_payload, now);
        TaskOutcome::Done
    }

    fn run_canceler(&mut self, records: Vec<Record>, passes: u32, now: Instant) -> TaskOutcome {
        // Goodbyes advertise TTL 0 so peers flush immediately.
        let answers: Vec<(Record, u32)> = records.into_iter().map(|r| (r, 0)).collect();
        self.queue_response(answers, Vec::new(), MAX_MSG_TYPICAL, now);
        if passes < CANCEL_PASSES {
            TaskOutcome::Reschedule(CANCEL_WAIT_INTERVAL)
        } else {
            TaskOutcome::Done
        }
    }

    fn run_reaper(&mut self, now: Instant) -> TaskOutcome {
        let removed = self.cache.reap(now);
        for rec in removed {
            self.notify_record_removed(&rec);
        }
        TaskOutcome::Reschedule(REAP_INTERVAL)
    }

    fn run_service_resolver(
        &mut self,
        service_type: &str,
        passes: u32,
        now: Instant,
    ) -> TaskOutcome {
        if self.closed || !self.listened_types.contains_key(&service_type.to_lowercase()) {
            return TaskOutcome::Done;
        }
        let Ok(name) = Name::new(service_type) else {
            return TaskOutcome::Done;
        };
        let questions = vec![Question {
            name,
            typ: DnsType::Ptr,
            class: DNSCLASS_INET,
        }];
        // Known answers keep peers from repeating what we already hold.
        let mut known: Vec<(Record, u32)> = self
            .cache
            .by_type(DnsType::Ptr)
            .into_iter()
            .filter(|rec| rec.name.eq_ignore_ascii_case(service_type))
            .map(|rec| {
                let remaining = rec.remaining_ttl(now);
                (rec.clone(), remaining)
            })
            .collect();
        let ttl = self.config.ttl;
        for info in self.services.values() {
            if info.state.is_announced()
                && info.service_type().eq_ignore_ascii_case(service_type)
            {
                known.push((
                    Record::new(
                        service_type,
                        false,
                        ttl,
                        RecordData::Pointer(info.qualified_name()),
                        now,
                    ),
                    ttl,
                ));
            }
        }
        self.queue_query(questions, known, Vec::new(), now);
        resolver_outcome(passes)
    }

    fn run_type_resolver(&mut self, passes: u32, now: Instant) -> TaskOutcome {
        if self.closed || !self.type_listening {
            return TaskOutcome::Done;
        }
        let Ok(name) = Name::new(META_QUERY_NAME) else {
            return TaskOutcome::Done;
        };
        let questions = vec![Question {
            name,
            typ: DnsType::Ptr,
            class: DNSCLASS_INET,
        }];
        let ttl = self.config.ttl;
        let known: Vec<(Record, u32)> = self
            .service_types
            .values()
            .map(|ty| {
                (
                    Record::new(
                        META_QUERY_NAME,
                        false,
                        ttl,
                        RecordData::Pointer(ty.clone()),
                        now,
                    ),
                    ttl,
                )
            })
            .collect();
        self.queue_query(questions, known, Vec::new(), now);
        resolver_outcome(passes)
    }

    fn run_info_resolver(&mut self, qualified_name: &str, passes: u32, now: Instant) -> TaskOutcome {
        if self.closed {
            return TaskOutcome::Done;
        }
        let Some(entry) = self.resolvers.get(qualified_name) else {
            return TaskOutcome::Done;
        };
        if entry.resolved || entry.info.has_data() {
            return TaskOutcome::Done;
        }
        let server = entry.info.server().to_owned();
        let Ok(name) = Name::new(qualified_name) else {
            return TaskOutcome::Done;
        };
        let mut questions = vec![
            Question {
                name: name.clone(),
                typ: DnsType::Srv,
                class: DNSCLASS_INET,
            },
            Question {
                name,
                typ: DnsType::Txt,
                class: DNSCLASS_INET,
            },
        ];
        if !server.is_empty()
            && let Ok(server_name) = Name::new(&server)
        {
            questions.push(Question {
                name: server_name,
                typ: DnsType::A,
                class: DNSCLASS_INET,
            });
        }
        let mut known: Vec<(Record, u32)> = Vec::new();
        for rec in self.cache.get_all(qualified_name) {
            known.push((rec.clone(), rec.remaining_ttl(now)));
        }
        if !server.is_empty() {
            for rec in self.cache.get_all(&server) {
                known.push((rec.clone(), rec.remaining_ttl(now)));
            }
        }
        self.queue_query(questions, known, Vec::new(), now);
        resolver_outcome(passes)
    }
}

impl sansio::Protocol<TaggedBytesMut, (), ()> for Zeroconf {
    type Rout = ();
    type Wout = TaggedBytesMut;
    type Eout = ZeroconfEvent;
    type Error = Error;

    /// Process an incoming mDNS datagram.
    ///
    /// Malformed datagrams are logged and dropped; individual records that
    /// fail to decode are skipped without affecting the rest of the
    /// message.
    fn handle_read(&mut self, msg: TaggedBytesMut) -> Result<()> {
        if self.closed {
            return Err(Error::ErrConnectionClosed);
        }
        let src = msg.transport.peer_addr;
        match IncomingMessage::decode(&msg.message, msg.now, src) {
            Ok(incoming) => {
                self.process_incoming(incoming, src, msg.now);
            }
            Err(err) => {
                log::warn!("dropping malformed mDNS datagram from {src}: {err}");
            }
        }
        Ok(())
    }

    /// The engine produces no read output; discovery results arrive as
    /// events from `poll_event()`.
    fn poll_read(&mut self) -> Option<Self::Rout> {
        None
    }

    /// Unused; publication is driven through `register_service` and
    /// friends.
    fn handle_write(&mut self, _msg: ()) -> Result<()> {
        Ok(())
    }

    /// Next datagram to send to the multicast group.
    fn poll_write(&mut self) -> Option<Self::Wout> {
        self.write_outs.pop_front()
    }

    /// Unused.
    fn handle_event(&mut self, _evt: ()) -> Result<()> {
        Ok(())
    }

    /// Next engine event, if any.
    fn poll_event(&mut self) -> Option<Self::Eout> {
        self.event_outs.pop_front()
    }

    /// Run every scheduled task whose deadline has passed. Probing,
    /// announcing, renewals, delayed responses, resolver retries, goodbyes
    /// and cache reaping all happen here, sequentially.
    fn handle_timeout(&mut self, now: Instant) -> Result<()> {
        if self.closed {
            return Err(Error::ErrConnectionClosed);
        }

        let mut due = Vec::new();
        let mut i = 0;
        while i < self.tasks.len() {
            if self.tasks[i].deadline <= now {
                due.push(self.tasks.swap_remove(i));
            } else {
                i += 1;
            }
        }
        for mut task in due {
            match self.run_task(&mut task, now) {
                TaskOutcome::Reschedule(delay) => {
                    task.deadline = now + delay;
                    self.tasks.push(task);
                }
                TaskOutcome::Done => {}
            }
        }

        // Resolution requests that ran out of time.
        let timed_out: Vec<String> = self
            .resolvers
            .iter()
            .filter(|(_, entry)| {
                !entry.resolved && entry.deadline.is_some_and(|deadline| deadline <= now)
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in timed_out {
            if let Some(entry) = self.resolvers.remove(&key) {
                self.tasks.retain(|t| {
                    !matches!(&t.kind, TaskKind::InfoResolver { qualified_name } if *qualified_name == key)
                });
                self.event_outs
                    .push_back(ZeroconfEvent::ServiceResolveTimeout {
                        service_type: entry.info.service_type().to_owned(),
                        name: entry.info.name().to_owned(),
                    });
            }
        }
        Ok(())
    }

    /// When `handle_timeout` should next be called.
    fn poll_timeout(&mut self) -> Option<Instant> {
        let task_deadline = self.tasks.iter().map(|t| t.deadline).min();
        let resolver_deadline = self
            .resolvers
            .values()
            .filter(|entry| !entry.resolved)
            .filter_map(|entry| entry.deadline)
            .min();
        match (task_deadline, resolver_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Close the engine: all owned records are withdrawn with a burst of
    /// goodbye datagrams (queued for the driver to flush before dropping
    /// the socket), then every further operation fails with
    /// `ErrConnectionClosed`.
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let now = Instant::now();
        let host_name = self.host.name().to_owned();
        let mut records: Vec<Record> = Vec::new();
        if self.host.has_name()
            && !self.host.state.is_canceled()
            && let Some(rec) = self.host.primary_address_record(self.config.ttl, now)
        {
            records.push(rec);
        }
        for info in self.services.values_mut() {
            if !info.state.is_canceled() {
                records.extend(info.records(self.config.ttl, &host_name, now));
            }
            info.cancel();
        }
        self.host.state = DnsState::Canceled;
        self.tasks.clear();
        self.resolvers.clear();
        self.pending_truncated = None;
        self.event_outs.clear();

        if !records.is_empty() {
            let answers: Vec<(Record, u32)> = records.into_iter().map(|r| (r, 0)).collect();
            for _ in 0..CANCEL_PASSES {
                self.queue_response(answers.clone(), Vec::new(), MAX_MSG_TYPICAL, now);
            }
        }
        self.closed = true;
        Ok(())
    }
}

fn service_key(service_type: &str, name: &str) -> String {
    format!(
        "{}.{}",
        name.to_lowercase(),
        normalize_name(service_type).to_lowercase()
    )
}

// unqualified_instance strips the type suffix off a PTR alias:
// "web._http._tcp.local." of type "_http._tcp.local." -> "web".
fn unqualified_instance(alias: &str, service_type: &str) -> String {
    let alias_lower = alias.to_lowercase();
    let type_lower = service_type.to_lowercase();
    if alias_lower.len() > type_lower.len() + 1 && alias_lower.ends_with(&type_lower) {
        alias[..alias.len() - type_lower.len() - 1].to_owned()
    } else {
        alias.trim_end_matches('.').to_owned()
    }
}

// increment_service_name picks the next instance name after a collision:
// a trailing " (N)" counts up, anything else becomes "name (2)".
fn increment_service_name(name: &str) -> String {
    if let Some(open) = name.rfind(" (")
        && name.ends_with(')')
        && let Ok(n) = name[open + 2..name.len() - 1].parse::<u32>()
    {
        return format!("{} ({})", &name[..open], n + 1);
    }
    format!("{name} (2)")
}

fn percent_of_ttl(ttl: u32, percent: u32) -> Duration {
    Duration::from_millis(u64::from(ttl) * 10 * u64::from(percent))
}

// Resolver tasks run three passes with doubling backoff: 225, 450, 900 ms.
fn resolver_outcome(passes: u32) -> TaskOutcome {
    if passes < QUERY_PASSES {
        TaskOutcome::Reschedule(QUERY_WAIT_INTERVAL * 2u32.pow(passes))
    } else {
        TaskOutcome::Done
    }
}

fn dedup_records(records: &mut Vec<Record>) {
    let mut seen: Vec<Record> = Vec::with_capacity(records.len());
    records.retain(|rec| {
        if seen.iter().any(|s| s.same_as(rec)) {
            false
        } else {
            seen.push(rec.clone());
            true
        }
    });
}

#[cfg(test)]
mod mdns_test;
