//! # TCP Transport
//!
//! Brokerless point-to-point backend. Each node listens on one TCP port;
//! outbound connections are dialed lazily on first send, introduced with a
//! GOSSIP_HELLO frame, and pooled until a keep-alive window of silence
//! closes them. Connections are one-directional: the dialer only writes,
//! the acceptor only reads, so a busy mesh holds at most two sockets per
//! peer pair.
//!
//! There is no broadcast fan-out and no subscription state. Dial targets
//! are resolved from the shared peer table at publish time, which is how
//! addresses learned from gossip and multicast hellos become reachable
//! without any transport-level bookkeeping.
//!
//! ## Failure handling
//!
//! A dial or write error tears the pooled connection down, reports every
//! queued frame through [`InboundHandler::delivery_failed`], and leaves
//! redial policy to the engine. A malformed inbound frame closes its
//! connection, since nothing after a framing error can be trusted.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use crate::config::TransitConfig;
use crate::core::channel::{Channel, ChannelKind};
use crate::core::codec::PacketCodec;
use crate::core::packet::{Packet, PacketKind, HEADER_LEN};
use crate::core::serialization::{WireFormat, WireMessage};
use crate::error::{constants, Result, TransitError};
use crate::mesh::table::PeerTable;
use crate::protocol::message::HelloMessage;
use crate::transport::{InboundHandler, Transport};
use crate::utils::metrics::{global_metrics, Metrics};
use crate::utils::time::now_millis;

/// Frames buffered per outbound connection before publishers wait.
const WRITE_QUEUE_LEN: usize = 256;

struct WriterHandle {
    queue: mpsc::Sender<Packet>,
    last_used: AtomicU64,
}

/// Point-to-point backend over plain TCP sockets.
pub struct TcpTransport {
    node_id: String,
    advertised_host: String,
    port: u16,
    format: WireFormat,
    max_packet_size: usize,
    max_connections: usize,
    keep_alive: Duration,

    bound_port: AtomicU16,
    handler: Mutex<Option<Arc<dyn InboundHandler>>>,
    peers: Mutex<Option<Arc<PeerTable>>>,
    writers: Arc<DashMap<String, WriterHandle>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    connected: AtomicBool,
    metrics: &'static Metrics,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("node_id", &self.node_id)
            .field("port", &self.bound_port.load(Ordering::Relaxed))
            .field("pooled", &self.writers.len())
            .finish()
    }
}

impl TcpTransport {
    pub fn new(config: &TransitConfig) -> Result<Self> {
        Ok(Self {
            node_id: config.node.node_id.clone(),
            advertised_host: config.transport.host.clone(),
            port: config.transport.port,
            format: config.transport.wire_format()?,
            max_packet_size: config.transport.max_packet_size,
            max_connections: config.transport.max_connections,
            keep_alive: config.transport.keep_alive,
            bound_port: AtomicU16::new(0),
            handler: Mutex::new(None),
            peers: Mutex::new(None),
            writers: Arc::new(DashMap::new()),
            listener: Mutex::new(None),
            connected: AtomicBool::new(false),
            metrics: global_metrics(),
        })
    }

    /// Outbound connections currently pooled.
    pub fn pooled_connections(&self) -> usize {
        self.writers.len()
    }

    fn current_handler(&self) -> Result<Arc<dyn InboundHandler>> {
        match &*lock(&self.handler)? {
            Some(handler) => Ok(handler.clone()),
            None => Err(TransitError::NotConnected),
        }
    }

    fn resolve(&self, node_id: &str) -> Result<(String, u16)> {
        let peers = match &*lock(&self.peers)? {
            Some(peers) => peers.clone(),
            None => return Err(TransitError::NotConnected),
        };
        let descriptor = peers
            .get(node_id)
            .ok_or_else(|| TransitError::UnknownNode(node_id.to_string()))?;
        let view = descriptor.view()?;
        if !view.has_address() {
            // placeholder learned from a gossip mention; no endpoint yet
            return Err(TransitError::NodeUnreachable(node_id.to_string()));
        }
        Ok((view.host, view.port))
    }

    /// Fetch or lazily dial the pooled writer for a peer.
    fn writer_for(&self, node_id: &str, host: &str, port: u16) -> Result<mpsc::Sender<Packet>> {
        if let Some(handle) = self.writers.get(node_id) {
            handle.last_used.store(now_millis(), Ordering::Relaxed);
            return Ok(handle.queue.clone());
        }

        let handler = self.current_handler()?;
        self.make_room();

        let hello = HelloMessage::new(
            &self.node_id,
            &self.advertised_host,
            self.bound_port.load(Ordering::SeqCst),
        );
        let introduction = Packet::new(PacketKind::GossipHello, hello.encode(self.format)?);

        let (tx, rx) = mpsc::channel(WRITE_QUEUE_LEN);
        // entry() so concurrent publishes to a new peer share one dial
        let queue = match self.writers.entry(node_id.to_string()) {
            Entry::Occupied(existing) => existing.get().queue.clone(),
            Entry::Vacant(slot) => {
                slot.insert(WriterHandle {
                    queue: tx.clone(),
                    last_used: AtomicU64::new(now_millis()),
                });
                tokio::spawn(writer_loop(
                    node_id.to_string(),
                    host.to_string(),
                    port,
                    introduction,
                    self.max_packet_size,
                    self.keep_alive,
                    rx,
                    tx.clone(),
                    self.writers.clone(),
                    handler,
                    self.metrics,
                ));
                tx
            }
        };
        Ok(queue)
    }

    /// Reap the coldest pooled connection when at capacity.
    fn make_room(&self) {
        if self.writers.len() < self.max_connections {
            return;
        }
        let mut coldest: Option<(String, u64)> = None;
        for entry in self.writers.iter() {
            let used = entry.value().last_used.load(Ordering::Relaxed);
            if coldest.as_ref().map_or(true, |(_, t)| used < *t) {
                coldest = Some((entry.key().clone(), used));
            }
        }
        if let Some((node_id, _)) = coldest {
            if self.writers.remove(&node_id).is_some() {
                debug!(node_id = %node_id, "connection pool full, coldest writer closed");
            }
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(
        &self,
        handler: Arc<dyn InboundHandler>,
        peers: Arc<PeerTable>,
    ) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.port)).await?;
        let port = listener.local_addr()?.port();
        self.bound_port.store(port, Ordering::SeqCst);

        *lock(&self.handler)? = Some(handler.clone());
        *lock(&self.peers)? = Some(peers);

        let task = tokio::spawn(accept_loop(
            listener,
            handler,
            self.max_packet_size,
            self.metrics,
        ));
        if let Some(old) = lock(&self.listener)?.replace(task) {
            old.abort();
        }
        self.connected.store(true, Ordering::SeqCst);
        info!(port, "tcp transport listening");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(task) = lock(&self.listener)?.take() {
            task.abort();
        }
        // dropping the handles closes every writer queue
        self.writers.clear();
        *lock(&self.handler)? = None;
        *lock(&self.peers)? = None;
        debug!("tcp transport stopped");
        Ok(())
    }

    async fn subscribe(&self, _channel: &Channel) -> Result<()> {
        Err(TransitError::TransportError(
            "subscriptions are not supported by the tcp transport".to_string(),
        ))
    }

    async fn publish(&self, channel: &Channel, payload: Bytes) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransitError::NotConnected);
        }
        let node_id = match &channel.node_id {
            Some(node_id) => node_id.clone(),
            None => return Err(TransitError::UnsupportedChannel("broadcast")),
        };
        let kind = channel
            .kind
            .packet_kind()
            .ok_or(TransitError::UnsupportedChannel(channel.kind.token()))?;

        let frame_len = HEADER_LEN + payload.len();
        if frame_len > self.max_packet_size {
            return Err(TransitError::OversizedPacket(frame_len, self.max_packet_size));
        }

        let (host, port) = self.resolve(&node_id)?;
        let queue = self.writer_for(&node_id, &host, port)?;
        let packet = match queue.send(Packet::new(kind, payload)).await {
            Ok(()) => return Ok(()),
            Err(mpsc::error::SendError(packet)) => packet,
        };

        // the pooled writer closed between lookup and send; redial once
        self.writers
            .remove_if(&node_id, |_, handle| handle.queue.same_channel(&queue));
        let queue = self.writer_for(&node_id, &host, port)?;
        queue
            .send(packet)
            .await
            .map_err(|_| TransitError::NodeUnreachable(node_id))?;
        Ok(())
    }

    async fn drop_peer(&self, node_id: &str) {
        if self.writers.remove(node_id).is_some() {
            debug!(node_id, "pooled connection dropped");
        }
    }

    fn uses_heartbeat(&self) -> bool {
        false
    }

    fn point_to_point(&self) -> bool {
        true
    }

    fn local_port(&self) -> Option<u16> {
        match self.bound_port.load(Ordering::SeqCst) {
            0 => None,
            port => Some(port),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| TransitError::Custom(constants::ERR_LOCK_POISONED.to_string()))
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn InboundHandler>,
    max_packet_size: usize,
    metrics: &'static Metrics,
) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                metrics.connection_established();
                debug!(remote = %remote, "inbound connection accepted");
                let handler = handler.clone();
                tokio::spawn(async move {
                    read_loop(stream, handler, max_packet_size, metrics).await;
                    metrics.connection_closed();
                });
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// Drain one inbound connection until EOF or the first bad frame.
async fn read_loop(
    stream: TcpStream,
    handler: Arc<dyn InboundHandler>,
    max_packet_size: usize,
    metrics: &'static Metrics,
) {
    let mut frames = FramedRead::new(stream, PacketCodec::new(max_packet_size));
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(packet) => {
                handler
                    .received(ChannelKind::from_packet(packet.kind), packet.payload)
                    .await;
            }
            Err(e) => {
                metrics.frame_error();
                warn!(error = %e, "bad frame, connection closed");
                return;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn writer_loop(
    node_id: String,
    host: String,
    port: u16,
    introduction: Packet,
    max_packet_size: usize,
    keep_alive: Duration,
    mut queue: mpsc::Receiver<Packet>,
    own_queue: mpsc::Sender<Packet>,
    writers: Arc<DashMap<String, WriterHandle>>,
    handler: Arc<dyn InboundHandler>,
    metrics: &'static Metrics,
) {
    let outcome = drive_writer(
        &node_id,
        &host,
        port,
        introduction,
        max_packet_size,
        keep_alive,
        &mut queue,
        &handler,
        metrics,
    )
    .await;

    // remove only our own registration; a replacement may already exist
    writers.remove_if(&node_id, |_, handle| handle.queue.same_channel(&own_queue));

    if let Err(e) = outcome {
        warn!(node_id = %node_id, error = %e, "outbound connection failed");
        queue.close();
        while let Ok(packet) = queue.try_recv() {
            handler
                .delivery_failed(
                    &node_id,
                    ChannelKind::from_packet(packet.kind),
                    packet.payload,
                )
                .await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn drive_writer(
    node_id: &str,
    host: &str,
    port: u16,
    introduction: Packet,
    max_packet_size: usize,
    keep_alive: Duration,
    queue: &mut mpsc::Receiver<Packet>,
    handler: &Arc<dyn InboundHandler>,
    metrics: &'static Metrics,
) -> Result<()> {
    let stream = TcpStream::connect((host, port)).await?;
    metrics.connection_established();
    debug!(node_id, host, port, "outbound connection opened");

    let mut sink = FramedWrite::new(stream, PacketCodec::new(max_packet_size));
    sink.send(introduction).await?;

    let result = loop {
        match tokio::time::timeout(keep_alive, queue.recv()).await {
            // keep-alive window passed without traffic
            Err(_) => {
                debug!(node_id, "outbound connection idle, closed");
                break Ok(());
            }
            Ok(None) => break Ok(()),
            Ok(Some(packet)) => {
                let kind = packet.kind;
                let payload = packet.payload.clone();
                if let Err(e) = sink.send(packet).await {
                    handler
                        .delivery_failed(node_id, ChannelKind::from_packet(kind), payload)
                        .await;
                    break Err(e);
                }
            }
        }
    };
    metrics.connection_closed();
    result
}
