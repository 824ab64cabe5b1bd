//! Configuration for a [`Zeroconf`](crate::Zeroconf) engine.

use std::net::IpAddr;
use std::time::Duration;

/// Default TTL (in seconds) for records the engine announces.
pub(crate) const DNS_TTL: u32 = 60 * 60;

/// Interval between probe passes; also the silence window a probe must
/// survive before the next pass.
pub(crate) const PROBE_WAIT_INTERVAL: Duration = Duration::from_millis(250);

/// Interval between unsolicited announcements.
pub(crate) const ANNOUNCE_WAIT_INTERVAL: Duration = Duration::from_millis(1000);

/// Points in a record's lifetime (percent of TTL) at which it is renewed.
pub(crate) const RENEWAL_PERCENTS: [u32; 4] = [80, 85, 90, 95];

/// Bounds of the random delay before answering a query, so responses to
/// the same question can coalesce.
pub(crate) const RESPONSE_MIN_WAIT_MS: u64 = 20;
pub(crate) const RESPONSE_MAX_WAIT_MS: u64 = 120;

/// Base interval for resolver queries; each pass doubles it (225/450/900).
pub(crate) const QUERY_WAIT_INTERVAL: Duration = Duration::from_millis(225);
pub(crate) const QUERY_PASSES: u32 = 3;

/// How often expired records are evicted from the cache.
pub(crate) const REAP_INTERVAL: Duration = Duration::from_secs(10);

/// Interval between goodbye retransmissions on cancellation.
pub(crate) const CANCEL_WAIT_INTERVAL: Duration = Duration::from_millis(125);
pub(crate) const CANCEL_PASSES: u32 = 3;

/// How long a truncated query waits for its continuation datagrams.
pub(crate) const TRUNCATION_WAIT: Duration = Duration::from_millis(400);

/// Default deadline for `request_service_info`.
pub(crate) const SERVICE_INFO_TIMEOUT: Duration = Duration::from_secs(6);

/// Typical UDP payload a peer can take before we split responses.
pub(crate) const MAX_MSG_TYPICAL: usize = 1460;
/// Floor for a peer-advertised payload size.
pub(crate) const MIN_MSG_PAYLOAD: usize = 512;
/// Ceiling for a peer-advertised payload size.
pub(crate) const MAX_MSG_ABSOLUTE: usize = 9000;

/// Configuration for a `Zeroconf` engine.
///
/// ```rust
/// use std::net::{IpAddr, Ipv4Addr};
/// use zc_mdns::ZeroconfConfig;
///
/// let config = ZeroconfConfig::default()
///     .with_host_name("machine.local")
///     .with_host_ip(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)));
/// ```
#[derive(Clone, Debug)]
pub struct ZeroconfConfig {
    /// The host name to claim on the link. A trailing dot is optional.
    /// Leave empty to run a browse-only engine that owns no names.
    pub host_name: String,

    /// The address published under `host_name`. Required for registering
    /// services.
    pub host_ip: Option<IpAddr>,

    /// TTL in seconds for announced records.
    pub ttl: u32,

    /// Default deadline for `request_service_info`.
    pub service_info_timeout: Duration,
}

impl Default for ZeroconfConfig {
    fn default() -> Self {
        Self {
            host_name: String::new(),
            host_ip: None,
            ttl: DNS_TTL,
            service_info_timeout: SERVICE_INFO_TIMEOUT,
        }
    }
}

impl ZeroconfConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host_name(mut self, name: &str) -> Self {
        self.host_name = name.to_owned();
        self
    }

    pub fn with_host_ip(mut self, ip: IpAddr) -> Self {
        self.host_ip = Some(ip);
        self
    }

    /// A zero TTL falls back to the default.
    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = if ttl == 0 { DNS_TTL } else { ttl };
        self
    }

    pub fn with_service_info_timeout(mut self, timeout: Duration) -> Self {
        self.service_info_timeout = timeout;
        self
    }
}
