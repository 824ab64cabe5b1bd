//! Service Browsing Example
//!
//! Browses for instances of a DNS-SD service type and prints them as they
//! appear, resolve and disappear.
//!
//! ```
//! cargo run --package zc-mdns --example browse -- --service-type _http._tcp.local.
//! ```

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use clap::Parser;
use sansio::Protocol;
use shared::{TaggedBytesMut, TransportContext, TransportProtocol};
use tokio::net::UdpSocket;
use zc_mdns::{MulticastSocket, Zeroconf, ZeroconfConfig, ZeroconfEvent};

#[derive(Parser, Debug)]
#[command(name = "browse")]
#[command(about = "Browse DNS-SD services via sans-I/O zc-mdns")]
struct Args {
    /// Service type to browse for
    #[arg(long, default_value = "_http._tcp.local.")]
    service_type: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let std_socket = MulticastSocket::new().into_std()?;
    let socket = UdpSocket::from_std(std_socket)?;

    let mut conn = Zeroconf::new(ZeroconfConfig::default());
    conn.add_service_listener(&args.service_type);
    println!("browsing for {}, ctrl-c to stop", args.service_type);

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
                conn.close()?;
                return Ok(());
            }
        }

        while let Some(event) = conn.poll_event() {
            match event {
                ZeroconfEvent::ServiceAdded { service_type, name } => {
                    println!("+ {name} ({service_type})");
                }
                ZeroconfEvent::ServiceResolved(info) => {
                    println!(
                        "  {} -> {}:{} at {:?}",
                        info.name(),
                        info.server(),
                        info.port(),
                        info.address(),
                    );
                    for (key, value) in info.properties() {
                        match value {
                            Some(value) => {
                                println!("    {key}={}", String::from_utf8_lossy(&value));
                            }
                            None => println!("    {key}"),
                        }
                    }
                }
                ZeroconfEvent::ServiceRemoved { name, .. } => {
                    println!("- {name}");
                }
                _ => {}
            }
        }
    }
}
