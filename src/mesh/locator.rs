//! # UDP Locator
//!
//! Zero-config bootstrap for the point-to-point backend. Each node joins a
//! multicast group and periodically announces a hello carrying its identity
//! and TCP endpoint; receivers upsert an offline descriptor for unknown or
//! re-addressed senders and let gossip do the rest. The beacon never waits
//! for a reply, and a configurable packet cap can silence it once the
//! cluster is warm.
//!
//! Runs only when no static peer list is configured.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::core::serialization::{WireFormat, WireMessage};
use crate::core::PROTOCOL_VERSION;
use crate::error::{constants, Result, TransitError};
use crate::mesh::table::PeerTable;
use crate::protocol::message::HelloMessage;

const RECV_BUFFER_LEN: usize = 512;

/// Periodic multicast hello sender plus the matching receive loop.
#[derive(Debug)]
pub struct UdpLocator {
    peers: Arc<PeerTable>,
    format: WireFormat,
    group: Ipv4Addr,
    port: u16,
    period: Duration,
    max_packets: u32,
    hello: HelloMessage,
    sent: Arc<AtomicU32>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl UdpLocator {
    /// `hello` advertises the local TCP endpoint; it is immutable for the
    /// process lifetime.
    pub fn new(
        peers: Arc<PeerTable>,
        format: WireFormat,
        group: Ipv4Addr,
        port: u16,
        period: Duration,
        max_packets: u32,
        hello: HelloMessage,
    ) -> Self {
        Self {
            peers,
            format,
            group,
            port,
            period,
            max_packets,
            hello,
            sent: Arc::new(AtomicU32::new(0)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Join the group and start the beacon and receive loops.
    #[instrument(skip(self), fields(group = %self.group, port = self.port))]
    pub async fn start(&self) -> Result<()> {
        self.stop();

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.port)).await?;
        // hosts without a multicast route still receive direct hellos
        match socket.join_multicast_v4(self.group, Ipv4Addr::UNSPECIFIED) {
            Ok(()) => info!("udp locator joined multicast group"),
            Err(e) => warn!(error = %e, "multicast join failed, listening for direct hellos only"),
        }
        if let Err(e) = socket.set_multicast_ttl_v4(1) {
            debug!(error = %e, "multicast ttl not set");
        }
        let socket = Arc::new(socket);

        let sender = tokio::spawn(beacon_loop(
            socket.clone(),
            self.hello.clone(),
            self.format,
            self.group,
            self.port,
            self.period,
            self.max_packets,
            self.sent.clone(),
        ));
        let receiver = tokio::spawn(receive_loop(
            socket,
            self.peers.clone(),
            self.format,
            self.hello.sender.clone(),
        ));

        let mut tasks = self.lock_tasks()?;
        tasks.push(sender);
        tasks.push(receiver);
        Ok(())
    }

    /// Stop both loops. Safe to call twice.
    pub fn stop(&self) {
        let drained = match self.lock_tasks() {
            Ok(mut tasks) => tasks.drain(..).collect::<Vec<_>>(),
            Err(_) => return,
        };
        for task in drained {
            task.abort();
        }
    }

    /// Hello beacons submitted so far (capped by `max_packets`).
    pub fn packets_sent(&self) -> u32 {
        self.sent.load(Ordering::Relaxed)
    }

    fn lock_tasks(&self) -> Result<std::sync::MutexGuard<'_, Vec<JoinHandle<()>>>> {
        self.tasks
            .lock()
            .map_err(|_| TransitError::Custom(constants::ERR_LOCK_POISONED.to_string()))
    }
}

impl Drop for UdpLocator {
    fn drop(&mut self) {
        self.stop();
    }
}

#[allow(clippy::too_many_arguments)]
async fn beacon_loop(
    socket: Arc<UdpSocket>,
    hello: HelloMessage,
    format: WireFormat,
    group: Ipv4Addr,
    port: u16,
    period: Duration,
    max_packets: u32,
    sent: Arc<AtomicU32>,
) {
    let payload = match hello.encode(format) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "hello beacon could not be encoded, discovery sender disabled");
            return;
        }
    };

    let mut ticks = tokio::time::interval(period);
    loop {
        ticks.tick().await;
        if max_packets > 0 && sent.load(Ordering::Relaxed) >= max_packets {
            info!(max_packets, "discovery beacon stopped at packet cap");
            return;
        }
        // submissions count toward the cap whether or not the send works
        sent.fetch_add(1, Ordering::Relaxed);
        match socket.send_to(&payload, (group, port)).await {
            Ok(_) => debug!(sender = %hello.sender, "hello sent"),
            Err(e) => warn!(error = %e, "hello send failed"),
        }
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    peers: Arc<PeerTable>,
    format: WireFormat,
    local_id: String,
) {
    let mut buf = [0u8; RECV_BUFFER_LEN];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!(error = %e, "udp receive failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let hello = match HelloMessage::decode(&buf[..len], format) {
            Ok(hello) => hello,
            Err(e) => {
                warn!(%from, error = %e, "malformed hello received");
                continue;
            }
        };
        if hello.ver != PROTOCOL_VERSION {
            debug!(%from, ver = hello.ver, "hello with foreign protocol version ignored");
            continue;
        }
        if hello.sender.is_empty() {
            warn!(%from, "hello with empty node id ignored");
            continue;
        }
        if hello.sender == local_id {
            continue;
        }
        if hello.host.is_empty() || hello.port == 0 {
            warn!(%from, sender = %hello.sender, "hello without a dialable address ignored");
            continue;
        }

        let known = peers.contains(&hello.sender);
        match peers.ensure(&hello.sender, &hello.host, hello.port) {
            Ok(_) if !known => {
                info!(sender = %hello.sender, host = %hello.host, port = hello.port, "peer located");
            }
            Ok(_) => {}
            Err(e) => warn!(sender = %hello.sender, error = %e, "peer upsert failed"),
        }
    }
}
