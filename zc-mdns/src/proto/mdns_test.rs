use super::*;
use sansio::Protocol;

fn engine(host: &str, ip: [u8; 4]) -> Zeroconf {
    Zeroconf::new(
        ZeroconfConfig::default()
            .with_host_name(host)
            .with_host_ip(IpAddr::V4(Ipv4Addr::from(ip))),
    )
}

fn peer_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 200)), MDNS_PORT)
}

fn tagged(now: Instant, data: &[u8], peer: SocketAddr) -> TaggedBytesMut {
    TaggedBytesMut {
        now,
        transport: TransportContext {
            local_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), MDNS_PORT),
            peer_addr: peer,
            transport_protocol: TransportProtocol::UDP,
            ecn: None,
        },
        message: BytesMut::from(data),
    }
}

// Drive the engine until no task is due before `until`.
fn run_until(conn: &mut Zeroconf, until: Instant) {
    while let Some(t) = conn.poll_timeout() {
        if t > until {
            break;
        }
        conn.handle_timeout(t).unwrap();
    }
}

fn drain_writes(conn: &mut Zeroconf) -> Vec<TaggedBytesMut> {
    let mut packets = Vec::new();
    while let Some(packet) = conn.poll_write() {
        packets.push(packet);
    }
    packets
}

fn drain_events(conn: &mut Zeroconf) -> Vec<ZeroconfEvent> {
    let mut events = Vec::new();
    while let Some(event) = conn.poll_event() {
        events.push(event);
    }
    events
}

fn parse(packet: &TaggedBytesMut) -> Message {
    let mut msg = Message::default();
    msg.unpack(&packet.message).unwrap();
    msg
}

fn response_packet(records: Vec<Record>) -> Vec<u8> {
    let out = Outgoing {
        header: Header {
            response: true,
            authoritative: true,
            ..Header::default()
        },
        answers: records
            .into_iter()
            .map(|r| {
                let ttl = r.ttl;
                (r, ttl)
            })
            .collect(),
        ..Outgoing::default()
    };
    out.pack(MAX_MSG_TYPICAL).unwrap().remove(0)
}

fn query_packet(
    questions: Vec<Question>,
    known_answers: Vec<Record>,
    authorities: Vec<Record>,
    truncated: bool,
) -> Vec<u8> {
    let out = Outgoing {
        header: Header {
            truncated,
            ..Header::default()
        },
        questions,
        answers: known_answers
            .into_iter()
            .map(|r| {
                let ttl = r.ttl;
                (r, ttl)
            })
            .collect(),
        authorities: authorities
            .into_iter()
            .map(|r| {
                let ttl = r.ttl;
                (r, ttl)
            })
            .collect(),
        ..Outgoing::default()
    };
    out.pack(MAX_MSG_TYPICAL).unwrap().remove(0)
}

fn question(name: &str, typ: DnsType) -> Question {
    Question {
        name: Name::new(name).unwrap(),
        typ,
        class: DNSCLASS_INET,
    }
}

fn a_record(name: &str, ip: [u8; 4], ttl: u32, now: Instant) -> Record {
    Record::new(
        name,
        false,
        ttl,
        RecordData::Address(IpAddr::V4(Ipv4Addr::from(ip))),
        now,
    )
}

fn printer_records(now: Instant) -> Vec<Record> {
    vec![
        Record::new(
            "_printer._tcp.local.",
            false,
            60,
            RecordData::Pointer("hp._printer._tcp.local.".to_owned()),
            now,
        ),
        Record::new(
            "hp._printer._tcp.local.",
            true,
            120,
            RecordData::Service {
                priority: 0,
                weight: 0,
                port: 631,
                target: "hp.local.".to_owned(),
            },
            now,
        ),
        Record::new(
            "hp._printer._tcp.local.",
            true,
            120,
            RecordData::Text(crate::service::text_from_properties(&[(
                "rp",
                Some(b"queue1".as_slice()),
            )])),
            now,
        ),
        a_record("hp.local.", [10, 0, 0, 2], 120, now),
    ]
}

#[test]
fn test_probe_wins_and_reaches_announced() {
    let mut conn = engine("foo.local.", [192, 168, 1, 5]);
    let start = Instant::now();

    run_until(&mut conn, start + Duration::from_secs(5));

    assert!(conn.host.state.is_announced());
    let packets = drain_writes(&mut conn);
    // Three probes followed by two announcements, nothing else.
    assert_eq!(packets.len(), 5);

    let probe = parse(&packets[0]);
    assert!(!probe.header.response);
    assert_eq!(probe.questions.len(), 1);
    assert_eq!(probe.questions[0].typ, DnsType::Any);
    assert_eq!(probe.questions[0].name.data, "foo.local.");
    // The tentative record rides in the authority section.
    assert_eq!(probe.authorities.len(), 1);
    assert_eq!(probe.authorities[0].header.typ, DnsType::A);

    let announce = parse(&packets[3]);
    assert!(announce.header.response);
    assert!(announce.header.authoritative);
    assert_eq!(announce.answers.len(), 1);
    assert_eq!(announce.answers[0].header.name.data, "foo.local.");
}

#[test]
fn test_probe_loses_tie_break_and_renames() {
    let mut conn = engine("foo.local.", [192, 168, 1, 5]);
    let now = Instant::now();

    // Seed the cache so the conflict visibly clears it.
    conn.handle_read(tagged(
        now,
        &response_packet(vec![a_record("other.local.", [10, 0, 0, 9], 120, now)]),
        peer_addr(),
    ))
    .unwrap();
    assert!(!conn.cache.is_empty());

    // Let the first probe out; the host is mid-probing now.
    let t = conn.poll_timeout().unwrap();
    conn.handle_timeout(t).unwrap();
    assert!(conn.host.state.is_probing());

    // A simultaneous probe for the same name with a numerically greater
    // address wins the tie-break.
    let probe = query_packet(
        vec![question("foo.local.", DnsType::Any)],
        Vec::new(),
        vec![a_record("foo.local.", [192, 168, 1, 9], 120, now)],
        false,
    );
    conn.handle_read(tagged(now, &probe, peer_addr())).unwrap();

    assert_eq!(conn.host_name(), "foo-1.local.");
    assert_eq!(conn.host.state, DnsState::Probing1);
    assert!(conn.cache.is_empty());
    let events = drain_events(&mut conn);
    assert!(events.iter().any(|e| matches!(
        e,
        ZeroconfEvent::HostRenamed { old, new } if old == "foo.local." && new == "foo-1.local."
    )));
}

#[test]
fn test_probe_with_smaller_address_is_ignored() {
    let mut conn = engine("foo.local.", [192, 168, 1, 5]);
    let now = Instant::now();

    let t = conn.poll_timeout().unwrap();
    conn.handle_timeout(t).unwrap();

    let probe = query_packet(
        vec![question("foo.local.", DnsType::Any)],
        Vec::new(),
        vec![a_record("foo.local.", [192, 168, 1, 2], 120, now)],
        false,
    );
    conn.handle_read(tagged(now, &probe, peer_addr())).unwrap();

    // We won; the name stays and probing continues.
    assert_eq!(conn.host_name(), "foo.local.");
}

#[test]
fn test_denial_of_established_name_restarts_probing() {
    let mut conn = engine("foo.local.", [192, 168, 1, 5]);
    let start = Instant::now();
    run_until(&mut conn, start + Duration::from_secs(5));
    assert!(conn.host.state.is_announced());
    drain_writes(&mut conn);

    let now = start + Duration::from_secs(5);
    let denial = response_packet(vec![a_record("foo.local.", [192, 168, 1, 9], 120, now)]);
    conn.handle_read(tagged(now, &denial, peer_addr())).unwrap();

    // Established names are not renamed, only re-verified.
    assert_eq!(conn.host_name(), "foo.local.");
    assert!(conn.host.state.is_probing());
}

#[test]
fn test_service_resolution_fires_once() {
    let mut conn = Zeroconf::new(ZeroconfConfig::default());
    conn.add_service_listener("_printer._tcp.local.");
    let now = Instant::now();

    conn.handle_read(tagged(now, &response_packet(printer_records(now)), peer_addr()))
        .unwrap();

    let events = drain_events(&mut conn);
    assert!(events.iter().any(|e| matches!(
        e,
        ZeroconfEvent::ServiceAdded { service_type, name }
            if service_type == "_printer._tcp.local." && name == "hp"
    )));
    let resolved: Vec<&ServiceInfo> = events
        .iter()
        .filter_map(|e| match e {
            ZeroconfEvent::ServiceResolved(info) => Some(info),
            _ => None,
        })
        .collect();
    assert_eq!(resolved.len(), 1);
    let info = resolved[0];
    assert_eq!(info.server(), "hp.local.");
    assert_eq!(info.port(), 631);
    assert_eq!(info.address(), Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))));
    assert_eq!(
        info.property("rp"),
        Some(Some(b"queue1".to_vec()))
    );

    // The identical message again refreshes the cache but must not
    // re-fire the listener.
    conn.handle_read(tagged(now, &response_packet(printer_records(now)), peer_addr()))
        .unwrap();
    let events = drain_events(&mut conn);
    assert!(events.is_empty());
}

#[test]
fn test_applying_a_response_twice_is_idempotent() {
    let mut conn = Zeroconf::new(ZeroconfConfig::default());
    let now = Instant::now();

    conn.handle_read(tagged(now, &response_packet(printer_records(now)), peer_addr()))
        .unwrap();
    let len_once = conn.cache.len();
    conn.handle_read(tagged(now, &response_packet(printer_records(now)), peer_addr()))
        .unwrap();
    assert_eq!(conn.cache.len(), len_once);
}

#[test]
fn test_goodbye_removes_record_and_notifies() {
    let mut conn = Zeroconf::new(ZeroconfConfig::default());
    conn.add_service_listener("_printer._tcp.local.");
    let now = Instant::now();

    conn.handle_read(tagged(now, &response_packet(printer_records(now)), peer_addr()))
        .unwrap();
    drain_events(&mut conn);

    // The same PTR with TTL 0 withdraws the instance immediately.
    let mut goodbye = printer_records(now).remove(0);
    goodbye.ttl = 0;
    conn.handle_read(tagged(now, &response_packet(vec![goodbye]), peer_addr()))
        .unwrap();

    let events = drain_events(&mut conn);
    assert!(events.iter().any(|e| matches!(
        e,
        ZeroconfEvent::ServiceRemoved { name, .. } if name == "hp"
    )));
    assert!(
        conn.cache
            .get("_printer._tcp.local.", DnsType::Ptr, DNSCLASS_INET)
            .is_none()
    );
}

#[test]
fn test_cache_flush_bit_replaces_only_conflicting_payload() {
    let mut conn = Zeroconf::new(ZeroconfConfig::default());
    let now = Instant::now();

    let srv = |port: u16| {
        Record::new(
            "web._http._tcp.local.",
            true,
            120,
            RecordData::Service {
                priority: 0,
                weight: 0,
                port,
                target: "machine.local.".to_owned(),
            },
            now,
        )
    };
    conn.handle_read(tagged(now, &response_packet(vec![srv(8080)]), peer_addr()))
        .unwrap();
    conn.handle_read(tagged(now, &response_packet(vec![srv(9090)]), peer_addr()))
        .unwrap();
    // The unique SRV replaced its predecessor.
    assert_eq!(conn.cache.get_all("web._http._tcp.local.").len(), 1);

    // Shared A records for one name accumulate instead.
    let addrs = vec![
        a_record("machine.local.", [10, 0, 0, 1], 120, now),
        a_record("machine.local.", [10, 0, 0, 2], 120, now),
    ];
    conn.handle_read(tagged(now, &response_packet(addrs), peer_addr()))
        .unwrap();
    assert_eq!(conn.cache.get_all("machine.local.").len(), 2);
}

#[test]
fn test_query_is_answered_after_coalescing_delay() {
    let mut conn = engine("machine.local.", [10, 0, 0, 1]);
    conn.register_service(ServiceInfo::new("_http._tcp.local.", "web", 8080))
        .unwrap();
    let start = Instant::now();
    run_until(&mut conn, start + Duration::from_secs(10));
    drain_writes(&mut conn);

    let now = start + Duration::from_secs(10);
    let query = query_packet(
        vec![question("_http._tcp.local.", DnsType::Ptr)],
        Vec::new(),
        Vec::new(),
        false,
    );
    conn.handle_read(tagged(now, &query, peer_addr())).unwrap();

    // Nothing goes out synchronously; the responder waits 20-120 ms.
    assert!(conn.poll_write().is_none());
    let deadline = conn.poll_timeout().unwrap();
    assert!(deadline > now && deadline <= now + Duration::from_millis(120));

    run_until(&mut conn, now + Duration::from_millis(200));
    let packets = drain_writes(&mut conn);
    assert_eq!(packets.len(), 1);
    let response = parse(&packets[0]);
    assert!(response.header.response);
    assert!(response.header.authoritative);
    // PTR + SRV + TXT in answers, the host address as an additional.
    assert_eq!(response.answers.len(), 3);
    assert_eq!(response.additionals.len(), 1);
    assert_eq!(response.additionals[0].header.typ, DnsType::A);
}

#[test]
fn test_known_answer_suppression() {
    let mut conn = engine("machine.local.", [10, 0, 0, 1]);
    conn.register_service(ServiceInfo::new("_http._tcp.local.", "web", 8080))
        .unwrap();
    let start = Instant::now();
    run_until(&mut conn, start + Duration::from_secs(10));
    drain_writes(&mut conn);

    let now = start + Duration::from_secs(10);
    // The querier already knows everything we would answer, with full TTL.
    let known = vec![
        Record::new(
            "_http._tcp.local.",
            false,
            DNS_TTL,
            RecordData::Pointer("web._http._tcp.local.".to_owned()),
            now,
        ),
        Record::new(
            "web._http._tcp.local.",
            true,
            DNS_TTL,
            RecordData::Service {
                priority: 0,
                weight: 0,
                port: 8080,
                target: "machine.local.".to_owned(),
            },
            now,
        ),
        Record::new(
            "web._http._tcp.local.",
            true,
            DNS_TTL,
            RecordData::Text(Vec::new()),
            now,
        ),
    ];
    let query = query_packet(
        vec![question("_http._tcp.local.", DnsType::Ptr)],
        known,
        Vec::new(),
        false,
    );
    conn.handle_read(tagged(now, &query, peer_addr())).unwrap();

    run_until(&mut conn, now + Duration::from_millis(200));
    // Everything was suppressed; no response goes out.
    assert!(drain_writes(&mut conn).is_empty());
}

#[test]
fn test_known_answer_with_low_ttl_does_not_suppress() {
    let mut conn = engine("machine.local.", [10, 0, 0, 1]);
    let start = Instant::now();
    run_until(&mut conn, start + Duration::from_secs(5));
    drain_writes(&mut conn);

    let now = start + Duration::from_secs(5);
    // Remaining TTL at or below half of ours does not suppress.
    let stale_known = vec![a_record("machine.local.", [10, 0, 0, 1], DNS_TTL / 2, now)];
    let query = query_packet(
        vec![question("machine.local.", DnsType::A)],
        stale_known,
        Vec::new(),
        false,
    );
    conn.handle_read(tagged(now, &query, peer_addr())).unwrap();

    run_until(&mut conn, now + Duration::from_millis(200));
    assert_eq!(drain_writes(&mut conn).len(), 1);
}

#[test]
fn test_truncated_query_waits_for_continuation() {
    let mut conn = engine("machine.local.", [10, 0, 0, 1]);
    conn.register_service(ServiceInfo::new("_http._tcp.local.", "web", 8080))
        .unwrap();
    let start = Instant::now();
    run_until(&mut conn, start + Duration::from_secs(10));
    drain_writes(&mut conn);

    let now = start + Duration::from_secs(10);
    // First datagram: TC set, question for the host address.
    let first = query_packet(
        vec![question("machine.local.", DnsType::A)],
        Vec::new(),
        Vec::new(),
        true,
    );
    conn.handle_read(tagged(now, &first, peer_addr())).unwrap();
    run_until(&mut conn, now + Duration::from_millis(300));
    // No answer yet: the logical query is still incomplete.
    assert!(drain_writes(&mut conn).is_empty());

    // Continuation: the browse question, TC clear.
    let now = now + Duration::from_millis(300);
    let second = query_packet(
        vec![question("_http._tcp.local.", DnsType::Ptr)],
        Vec::new(),
        Vec::new(),
        false,
    );
    conn.handle_read(tagged(now, &second, peer_addr())).unwrap();

    run_until(&mut conn, now + Duration::from_millis(200));
    let packets = drain_writes(&mut conn);
    assert_eq!(packets.len(), 1);
    let response = parse(&packets[0]);
    // Both halves of the logical query were answered together.
    assert!(
        response
            .answers
            .iter()
            .any(|r| r.header.typ == DnsType::A && r.header.name.data == "machine.local.")
    );
    assert!(response.answers.iter().any(|r| r.header.typ == DnsType::Ptr));
}

#[test]
fn test_truncated_query_discarded_after_wait() {
    let mut conn = engine("machine.local.", [10, 0, 0, 1]);
    let start = Instant::now();
    run_until(&mut conn, start + Duration::from_secs(5));
    drain_writes(&mut conn);

    let now = start + Duration::from_secs(5);
    let first = query_packet(
        vec![question("machine.local.", DnsType::A)],
        Vec::new(),
        Vec::new(),
        true,
    );
    conn.handle_read(tagged(now, &first, peer_addr())).unwrap();

    // 400 ms pass without a continuation; the partial query is dropped.
    run_until(&mut conn, now + Duration::from_millis(500));
    assert!(drain_writes(&mut conn).is_empty());

    // A late continuation now stands alone and answers only itself.
    let late = now + Duration::from_millis(500);
    let second = query_packet(
        vec![question("absent.local.", DnsType::A)],
        Vec::new(),
        Vec::new(),
        false,
    );
    conn.handle_read(tagged(late, &second, peer_addr())).unwrap();
    run_until(&mut conn, late + Duration::from_millis(200));
    assert!(drain_writes(&mut conn).is_empty());
}

#[test]
fn test_service_probe_conflict_renames_instance() {
    let mut conn = engine("machine.local.", [10, 0, 0, 1]);
    conn.register_service(ServiceInfo::new("_http._tcp.local.", "web", 8080))
        .unwrap();
    let now = Instant::now();
    // One probe pass; the service is mid-probing.
    let t = conn.poll_timeout().unwrap();
    conn.handle_timeout(t).unwrap();

    // A competing probe for the same instance name, different port, with a
    // numerically greater record.
    let rival = Record::new(
        "web._http._tcp.local.",
        true,
        120,
        RecordData::Service {
            priority: 0,
            weight: 0,
            port: 9999,
            target: "rival.local.".to_owned(),
        },
        now,
    );
    let probe = query_packet(
        vec![question("web._http._tcp.local.", DnsType::Any)],
        Vec::new(),
        vec![rival],
        false,
    );
    conn.handle_read(tagged(now, &probe, peer_addr())).unwrap();

    let events = drain_events(&mut conn);
    assert!(events.iter().any(|e| matches!(
        e,
        ZeroconfEvent::ServiceRenamed { old, new } if old == "web" && new == "web (2)"
    )));
    assert!(conn.services.contains_key("web (2)._http._tcp.local."));
    assert!(!conn.services.contains_key("web._http._tcp.local."));
}

#[test]
fn test_own_echo_is_not_a_conflict() {
    let mut conn = engine("machine.local.", [10, 0, 0, 1]);
    conn.register_service(ServiceInfo::new("_http._tcp.local.", "web", 8080))
        .unwrap();
    let now = Instant::now();
    let t = conn.poll_timeout().unwrap();
    conn.handle_timeout(t).unwrap();

    // Our own probe as seen on another interface: same port, same target.
    let echo = Record::new(
        "web._http._tcp.local.",
        true,
        DNS_TTL,
        RecordData::Service {
            priority: 0,
            weight: 0,
            port: 8080,
            target: "machine.local.".to_owned(),
        },
        now,
    );
    let probe = query_packet(
        vec![question("web._http._tcp.local.", DnsType::Any)],
        Vec::new(),
        vec![echo],
        false,
    );
    conn.handle_read(tagged(now, &probe, peer_addr())).unwrap();

    assert!(conn.services.contains_key("web._http._tcp.local."));
    assert!(drain_events(&mut conn).is_empty());
}

#[test]
fn test_request_service_info_resolves_from_cache() {
    let mut conn = Zeroconf::new(ZeroconfConfig::default());
    let now = Instant::now();
    conn.handle_read(tagged(now, &response_packet(printer_records(now)), peer_addr()))
        .unwrap();

    conn.request_service_info("_printer._tcp.local.", "hp", None);
    let events = drain_events(&mut conn);
    assert!(events.iter().any(|e| matches!(
        e,
        ZeroconfEvent::ServiceResolved(info) if info.port() == 631
    )));
}

#[test]
fn test_request_service_info_times_out() {
    let mut conn = Zeroconf::new(ZeroconfConfig::default());
    let now = Instant::now();

    conn.request_service_info("_printer._tcp.local.", "ghost", Some(Duration::from_millis(500)));
    // Queries for the missing instance go out while we wait.
    run_until(&mut conn, now + Duration::from_secs(1));
    assert!(!drain_writes(&mut conn).is_empty());

    let events = drain_events(&mut conn);
    assert!(events.iter().any(|e| matches!(
        e,
        ZeroconfEvent::ServiceResolveTimeout { name, .. } if name == "ghost"
    )));
}

#[test]
fn test_set_text_reannounces() {
    let mut conn = engine("machine.local.", [10, 0, 0, 1]);
    conn.register_service(ServiceInfo::new("_http._tcp.local.", "web", 8080))
        .unwrap();
    let start = Instant::now();
    run_until(&mut conn, start + Duration::from_secs(10));
    drain_writes(&mut conn);
    assert!(
        conn.services["web._http._tcp.local."].state.is_announced()
    );

    conn.set_text(
        "_http._tcp.local.",
        "web",
        crate::service::text_from_properties(&[("v", Some(b"2".as_slice()))]),
    )
    .unwrap();
    assert!(conn.services["web._http._tcp.local."].state.is_announcing());

    run_until(&mut conn, start + Duration::from_secs(20));
    let packets = drain_writes(&mut conn);
    // Two fresh announcements carry the new TXT.
    assert_eq!(packets.len(), 2);
    assert!(conn.services["web._http._tcp.local."].state.is_announced());
    assert!(!conn.services["web._http._tcp.local."].needs_text_announcing);
}

#[test]
fn test_set_text_on_canceled_service_fails() {
    let mut conn = engine("machine.local.", [10, 0, 0, 1]);
    conn.register_service(ServiceInfo::new("_http._tcp.local.", "web", 8080))
        .unwrap();
    conn.close().unwrap();

    let result = conn.set_text("_http._tcp.local.", "web", Vec::new());
    assert_eq!(result, Err(Error::ErrServiceCanceled));
}

#[test]
fn test_unregister_sends_goodbyes() {
    let mut conn = engine("machine.local.", [10, 0, 0, 1]);
    conn.register_service(ServiceInfo::new("_http._tcp.local.", "web", 8080))
        .unwrap();
    let start = Instant::now();
    run_until(&mut conn, start + Duration::from_secs(10));
    drain_writes(&mut conn);

    conn.unregister_service("_http._tcp.local.", "web").unwrap();
    assert!(!conn.services.contains_key("web._http._tcp.local."));

    run_until(&mut conn, start + Duration::from_secs(11));
    let packets = drain_writes(&mut conn);
    assert_eq!(packets.len(), 3);
    for packet in &packets {
        let msg = parse(packet);
        assert!(msg.header.response);
        assert!(msg.answers.iter().all(|r| r.header.ttl == 0));
    }

    // Unknown services cannot be unregistered twice.
    assert_eq!(
        conn.unregister_service("_http._tcp.local.", "web"),
        Err(Error::ErrServiceNotFound)
    );
}

#[test]
fn test_close_queues_goodbyes_and_rejects_io() {
    let mut conn = engine("machine.local.", [10, 0, 0, 1]);
    conn.register_service(ServiceInfo::new("_http._tcp.local.", "web", 8080))
        .unwrap();
    let start = Instant::now();
    run_until(&mut conn, start + Duration::from_secs(10));
    drain_writes(&mut conn);

    conn.close().unwrap();

    let packets = drain_writes(&mut conn);
    assert_eq!(packets.len(), CANCEL_PASSES as usize);
    let goodbye = parse(&packets[0]);
    assert!(goodbye.answers.iter().all(|r| r.header.ttl == 0));
    // Host address plus PTR/SRV/TXT of the service.
    assert_eq!(goodbye.answers.len(), 4);

    let msg = tagged(Instant::now(), &[0u8; 12], peer_addr());
    assert_eq!(conn.handle_read(msg), Err(Error::ErrConnectionClosed));
    assert_eq!(
        conn.handle_timeout(Instant::now()),
        Err(Error::ErrConnectionClosed)
    );
    assert!(conn.poll_timeout().is_none());
}

#[test]
fn test_recover_reverts_and_reprobes() {
    let mut conn = engine("machine.local.", [10, 0, 0, 1]);
    conn.register_service(ServiceInfo::new("_http._tcp.local.", "web", 8080))
        .unwrap();
    let start = Instant::now();
    run_until(&mut conn, start + Duration::from_secs(10));
    drain_writes(&mut conn);

    let now = start + Duration::from_secs(10);
    conn.handle_read(tagged(now, &response_packet(printer_records(now)), peer_addr()))
        .unwrap();
    assert!(!conn.cache.is_empty());

    conn.recover();
    assert!(conn.cache.is_empty());
    assert!(conn.host.state.is_probing());
    assert!(conn.services["web._http._tcp.local."].state.is_probing());

    // The full probe/announce cycle runs again.
    run_until(&mut conn, now + Duration::from_secs(10));
    assert!(conn.host.state.is_announced());
    assert!(!drain_writes(&mut conn).is_empty());
}

#[test]
fn test_meta_query_lists_registered_types() {
    let mut conn = engine("machine.local.", [10, 0, 0, 1]);
    conn.register_service(ServiceInfo::new("_http._tcp.local.", "web", 8080))
        .unwrap();
    let start = Instant::now();
    run_until(&mut conn, start + Duration::from_secs(10));
    drain_writes(&mut conn);

    let now = start + Duration::from_secs(10);
    let query = query_packet(
        vec![question(META_QUERY_NAME, DnsType::Ptr)],
        Vec::new(),
        Vec::new(),
        false,
    );
    conn.handle_read(tagged(now, &query, peer_addr())).unwrap();
    run_until(&mut conn, now + Duration::from_millis(200));

    let packets = drain_writes(&mut conn);
    assert_eq!(packets.len(), 1);
    let response = parse(&packets[0]);
    assert_eq!(response.answers.len(), 1);
    assert_eq!(response.answers[0].header.name.data, META_QUERY_NAME);
    assert_eq!(response.answers[0].header.typ, DnsType::Ptr);
}

#[test]
fn test_type_listener_reports_discovered_types() {
    let mut conn = Zeroconf::new(ZeroconfConfig::default());
    conn.add_service_type_listener();
    let now = Instant::now();

    let ptr = Record::new(
        META_QUERY_NAME,
        false,
        120,
        RecordData::Pointer("_ipp._tcp.local.".to_owned()),
        now,
    );
    conn.handle_read(tagged(now, &response_packet(vec![ptr]), peer_addr()))
        .unwrap();

    let events = drain_events(&mut conn);
    assert!(events.iter().any(|e| matches!(
        e,
        ZeroconfEvent::ServiceTypeAdded(ty) if ty == "_ipp._tcp.local."
    )));
}

#[test]
fn test_reaper_expires_records_and_notifies() {
    let mut conn = Zeroconf::new(ZeroconfConfig::default());
    conn.add_service_listener("_printer._tcp.local.");
    let now = Instant::now();

    let mut records = printer_records(now);
    // A short-lived PTR so the reaper has something to do.
    records[0].ttl = 5;
    conn.handle_read(tagged(now, &response_packet(records), peer_addr()))
        .unwrap();
    drain_events(&mut conn);

    // The reaper runs every 10 seconds; by then the PTR has expired.
    run_until(&mut conn, now + Duration::from_secs(15));
    let events = drain_events(&mut conn);
    assert!(events.iter().any(|e| matches!(
        e,
        ZeroconfEvent::ServiceRemoved { name, .. } if name == "hp"
    )));
    assert!(
        conn.cache
            .get("_printer._tcp.local.", DnsType::Ptr, DNSCLASS_INET)
            .is_none()
    );
}

#[test]
fn test_register_twice_gets_distinct_names() {
    let mut conn = engine("machine.local.", [10, 0, 0, 1]);
    conn.register_service(ServiceInfo::new("_http._tcp.local.", "web", 8080))
        .unwrap();
    conn.register_service(ServiceInfo::new("_http._tcp.local.", "web", 8081))
        .unwrap();

    assert!(conn.services.contains_key("web._http._tcp.local."));
    assert!(conn.services.contains_key("web (2)._http._tcp.local."));
}

#[test]
fn test_services_of_type_lists_cache_and_own() {
    let mut conn = engine("machine.local.", [10, 0, 0, 1]);
    conn.register_service(ServiceInfo::new("_printer._tcp.local.", "local-printer", 631))
        .unwrap();
    let now = Instant::now();
    conn.handle_read(tagged(now, &response_packet(printer_records(now)), peer_addr()))
        .unwrap();

    let services = conn.services_of_type("_printer._tcp.local.");
    assert_eq!(services.len(), 2);
}
