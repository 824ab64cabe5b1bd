//! Service Registration Example
//!
//! Publishes a DNS-SD service on the local link until interrupted, driving
//! the sans-I/O engine from a tokio event loop.
//!
//! ```
//! cargo run --package zc-mdns --example register -- \
//!     --host-name my-machine.local --ip 192.168.1.10 --name "my website"
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use clap::Parser;
use sansio::Protocol;
use shared::{TaggedBytesMut, TransportContext, TransportProtocol};
use tokio::net::UdpSocket;
use zc_mdns::{MulticastSocket, ServiceInfo, Zeroconf, ZeroconfConfig, ZeroconfEvent};

#[derive(Parser, Debug)]
#[command(name = "register")]
#[command(about = "Publish a DNS-SD service via sans-I/O zc-mdns")]
struct Args {
    /// Host name to claim on the link
    #[arg(long, default_value = "zc-mdns-demo.local")]
    host_name: String,

    /// Address to publish under the host name
    #[arg(long)]
    ip: Ipv4Addr,

    /// Service type to publish
    #[arg(long, default_value = "_http._tcp.local.")]
    service_type: String,

    /// Instance name
    #[arg(long, default_value = "zc-mdns demo")]
    name: String,

    /// Port the service listens on
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let std_socket = MulticastSocket::new().into_std()?;
    let socket = UdpSocket::from_std(std_socket)?;

    let config = ZeroconfConfig::default()
        .with_host_name(&args.host_name)
        .with_host_ip(IpAddr::V4(args.ip));
    let mut conn = Zeroconf::new(config);

    let service = ServiceInfo::new(&args.service_type, &args.name, args.port)
        .with_properties(&[("path", Some(b"/".as_slice()))]);
    conn.register_service(service)?;
    println!(
        "publishing {} ({}) on port {}, ctrl-c to stop",
        args.name, args.service_type, args.port
    );

    let local_addr: SocketAddr = socket.local_addr()?;
    let mut buf = vec![0u8; 9000];

    loop {
        while let Some(packet) = conn.poll_write() {
            socket
                .send_to(&packet.message, packet.transport.peer_addr)
                .await
                .ok();
        }

        let sleep = conn
            .poll_timeout()
            .map(|t| t.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_secs(1));

        tokio::select! {
            Ok((len, src)) = socket.recv_from(&mut buf) => {
                let msg = TaggedBytesMut {
                    now: Instant::now(),
                    transport: TransportContext {
                        local_addr,
                        peer_addr: src,
                        transport_protocol: TransportProtocol::UDP,
                        ecn: None,
                    },
                    message: BytesMut::from(&buf[..len]),
                };
                let _ = conn.handle_read(msg);
            }
            _ = tokio::time::sleep(sleep) => {
                let _ = conn.handle_timeout(Instant::now());
            }
            _ = tokio::signal::ctrl_c() => {
                println!("saying goodbye");
                conn.close()?;
                // Flush the goodbye burst before dropping the socket.
                while let Some(packet) = conn.poll_write() {
                    socket
                        .send_to(&packet.message, packet.transport.peer_addr)
                        .await
                        .ok();
                }
                return Ok(());
            }
        }

        while let Some(event) = conn.poll_event() {
            match event {
                ZeroconfEvent::HostRenamed { old, new } => {
                    println!("host name {old} was taken, now {new}");
                }
                ZeroconfEvent::ServiceRenamed { old, new } => {
                    println!("instance name {old} was taken, now {new}");
                }
                _ => {}
            }
        }
    }
}
