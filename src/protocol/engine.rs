//! # Transit Engine
//!
//! The coordination core that ties a [`Transport`] backend to the peer
//! table. It owns control-channel dispatch, the liveness timers, the
//! gossip driver, and the UDP locator, and feeds membership changes to
//! the service registry.
//!
//! ## Lifecycle
//!
//! [`Transit::connect`] attaches the engine to its transport as the
//! inbound handler, announces the local node, and starts the periodic
//! drivers. A failed attempt is retried in the background at a fixed
//! delay; `connect` itself never blocks on a broken network.
//! [`Transit::disconnect`] broadcasts a farewell (broker backends only),
//! stops every driver, and closes the transport.
//!
//! ## Dispatch
//!
//! Every inbound payload is decoded by channel kind and passed through
//! one acceptance gate: packets without a sender, packets from this node
//! (broadcast loopback), and packets from a different protocol version
//! are dropped with a log line and never reach the registry.
//!
//! ## Backend modes
//!
//! Broker backends ([`Transport::point_to_point`] false) use the full
//! subscription set, INFO/DISCOVER broadcasts, and heartbeat beacons.
//! Point-to-point backends skip all of that and run the gossip driver
//! plus, unless seed URLs pin the membership, the multicast locator.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::{DiscoveryConfig, TransitConfig};
use crate::core::channel::{Channel, ChannelKind};
use crate::core::serialization::{WireFormat, WireMessage};
use crate::core::PROTOCOL_VERSION;
use crate::error::{Result, TransitError};
use crate::mesh::descriptor::DescriptorView;
use crate::mesh::gossip::{GossipEngine, GossipRequest, GossipResponse};
use crate::mesh::locator::UdpLocator;
use crate::mesh::table::PeerTable;
use crate::mesh::PeerEvent;
use crate::protocol::message::{
    DisconnectMessage, DiscoverMessage, ErrorInfo, EventMessage, HeartbeatMessage, HelloMessage,
    NodeInfo, PingMessage, PongMessage, RequestMessage, ResponseMessage,
};
use crate::protocol::registry::{EventSink, ServiceRegistry};
use crate::transport::{InboundHandler, Transport};
use crate::utils::cpu::CpuMonitor;
use crate::utils::metrics::{global_metrics, Metrics};
use crate::utils::time::{millis_since, now_millis};

/// Buffered peer events per subscriber before lagging receivers drop.
const PEER_EVENT_CAPACITY: usize = 64;

/// Addressed channels every broker-style backend listens on.
const ADDRESSED_CHANNELS: [ChannelKind; 7] = [
    ChannelKind::Event,
    ChannelKind::Request,
    ChannelKind::Response,
    ChannelKind::Discover,
    ChannelKind::Info,
    ChannelKind::Ping,
    ChannelKind::Pong,
];

/// Broadcast channels shared by the whole namespace.
const BROADCAST_CHANNELS: [ChannelKind; 5] = [
    ChannelKind::Discover,
    ChannelKind::Info,
    ChannelKind::Disconnect,
    ChannelKind::Heartbeat,
    ChannelKind::Ping,
];

/// Transport-agnostic membership and messaging engine.
///
/// Construct with [`Transit::new`], then [`Transit::connect`]. All methods
/// take `&self`; the engine is shared behind an [`Arc`] between the caller,
/// the transport's read loops, and its own timer tasks.
pub struct Transit {
    node_id: String,
    host: String,
    format: WireFormat,
    debug_packets: bool,
    static_peers: bool,

    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    offline_timeout: Duration,
    gossip_period: Duration,
    reconnect_delay: Duration,
    discovery: DiscoveryConfig,

    peers: Arc<PeerTable>,
    gossip: GossipEngine,
    transport: Arc<dyn Transport>,
    registry: Arc<dyn ServiceRegistry>,
    events: Arc<dyn EventSink>,

    peer_events: broadcast::Sender<PeerEvent>,
    locator: Mutex<Option<Arc<UdpLocator>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,

    started: AtomicBool,
    connected: AtomicBool,
    ping_seq: AtomicU64,
    cpu: CpuMonitor,
    metrics: &'static Metrics,
}

impl fmt::Debug for Transit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transit")
            .field("node_id", &self.node_id)
            .field("format", &self.format)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .field("peers", &self.peers.len())
            .finish()
    }
}

impl Transit {
    /// Build the engine from a validated configuration and a transport
    /// backend. Fails on any configuration problem (strict validation
    /// runs here) and on malformed seed URLs.
    pub fn new(
        config: &TransitConfig,
        transport: Arc<dyn Transport>,
        registry: Arc<dyn ServiceRegistry>,
        events: Arc<dyn EventSink>,
    ) -> Result<Arc<Self>> {
        config.validate_strict()?;

        let format = config.transport.wire_format()?;
        let seeds = config.transport.seed_peers()?;
        let peers = Arc::new(PeerTable::new(
            &config.node.node_id,
            &config.transport.host,
            config.transport.port,
        ));
        peers.seed(&seeds)?;

        let (peer_events, _) = broadcast::channel(PEER_EVENT_CAPACITY);

        Ok(Arc::new(Self {
            node_id: config.node.node_id.clone(),
            host: config.transport.host.clone(),
            format,
            debug_packets: config.node.debug_packets,
            static_peers: !seeds.is_empty(),
            heartbeat_interval: config.timing.heartbeat_interval,
            heartbeat_timeout: config.timing.heartbeat_timeout,
            offline_timeout: config.timing.offline_timeout,
            gossip_period: config.gossip.period,
            reconnect_delay: config.transport.reconnect_delay,
            discovery: config.discovery.clone(),
            gossip: GossipEngine::new(peers.clone()),
            peers,
            transport,
            registry,
            events,
            peer_events,
            locator: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            ping_seq: AtomicU64::new(0),
            cpu: CpuMonitor::new(),
            metrics: global_metrics(),
        }))
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Attach to the transport and start the periodic drivers.
    ///
    /// Never fails on a broken network: a failed attempt schedules a
    /// background retry at the configured reconnect delay and returns
    /// `Ok`. Calling twice is a no-op.
    #[instrument(skip(self), fields(node_id = %self.node_id))]
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.try_connect().await {
            warn!(
                error = %e,
                delay_ms = self.reconnect_delay.as_millis() as u64,
                "connect failed, retry scheduled"
            );
            self.connected.store(false, Ordering::SeqCst);
            self.stop_tasks();
            self.spawn_reconnect();
        }
        Ok(())
    }

    /// Broadcast a farewell (broker backends), stop every driver, and
    /// close the transport. Safe to call twice.
    #[instrument(skip(self), fields(node_id = %self.node_id))]
    pub async fn disconnect(&self) -> Result<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if self.connected.load(Ordering::SeqCst) && !self.transport.point_to_point() {
            let farewell = DisconnectMessage::new(&self.node_id);
            if let Err(e) = self
                .publish_message(ChannelKind::Disconnect, None, &farewell)
                .await
            {
                warn!(error = %e, "farewell broadcast failed");
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        self.stop_tasks();
        let locator = match self.locator.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(locator) = locator {
            locator.stop();
        }
        self.transport.disconnect().await?;
        self.metrics.connection_closed();
        info!("transit disconnected");
        Ok(())
    }

    async fn try_connect(self: &Arc<Self>) -> Result<()> {
        let handler: Arc<dyn InboundHandler> = self.clone();
        self.transport.connect(handler, self.peers.clone()).await?;
        self.metrics.connection_established();

        // adopt the actually bound port before advertising ourselves
        if let Some(port) = self.transport.local_port() {
            self.peers.local().discover(&self.host, port)?;
        }
        self.peers.local().activate()?;
        self.connected.store(true, Ordering::SeqCst);

        if self.transport.point_to_point() {
            self.start_locator().await;
            self.spawn_gossip_driver();
        } else {
            self.subscribe_all().await?;
            if let Err(e) = self.send_discover(None).await {
                warn!(error = %e, "discover broadcast failed");
            }
            if let Err(e) = self.send_info(None).await {
                warn!(error = %e, "info broadcast failed");
            }
            if self.transport.uses_heartbeat() {
                self.spawn_heartbeat();
            }
        }
        self.spawn_supervisor();
        info!("transit connected");
        Ok(())
    }

    /// Background retry loop after a failed connect. Not tracked in
    /// `tasks`: it terminates on its own once connected or once the
    /// engine is shut down.
    fn spawn_reconnect(self: &Arc<Self>) {
        let transit = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(transit.reconnect_delay).await;
                if !transit.started.load(Ordering::SeqCst) {
                    return;
                }
                info!(node_id = %transit.node_id, "reconnecting");
                match transit.try_connect().await {
                    Ok(()) => return,
                    Err(e) => {
                        warn!(error = %e, "reconnect attempt failed");
                        transit.connected.store(false, Ordering::SeqCst);
                        transit.stop_tasks();
                    }
                }
            }
        });
    }

    async fn subscribe_all(&self) -> Result<()> {
        for kind in ADDRESSED_CHANNELS {
            self.transport
                .subscribe(&Channel::to(kind, &self.node_id))
                .await?;
        }
        for kind in BROADCAST_CHANNELS {
            self.transport.subscribe(&Channel::broadcast(kind)).await?;
        }
        debug!("control channels subscribed");
        Ok(())
    }

    /// Start the multicast locator unless seed URLs pin the membership
    /// or discovery is disabled. A locator that cannot start degrades to
    /// gossip-only operation instead of failing the connect.
    async fn start_locator(&self) {
        if self.static_peers || !self.discovery.enabled {
            return;
        }
        let group: Ipv4Addr = match self.discovery.multicast_host.parse() {
            Ok(group) => group,
            Err(_) => {
                warn!(
                    host = %self.discovery.multicast_host,
                    "multicast group unusable, discovery disabled"
                );
                return;
            }
        };
        let view = match self.peers.local().view() {
            Ok(view) => view,
            Err(e) => {
                warn!(error = %e, "local descriptor unreadable, discovery disabled");
                return;
            }
        };
        let hello = HelloMessage::new(&self.node_id, &view.host, view.port);
        let locator = Arc::new(UdpLocator::new(
            self.peers.clone(),
            self.format,
            group,
            self.discovery.multicast_port,
            self.discovery.period,
            self.discovery.max_packets,
            hello,
        ));
        if let Err(e) = locator.start().await {
            warn!(error = %e, "udp locator failed to start, discovery disabled");
            return;
        }
        match self.locator.lock() {
            Ok(mut slot) => *slot = Some(locator),
            Err(_) => locator.stop(),
        }
    }

    // ---------------------------------------------------------------------
    // Periodic drivers
    // ---------------------------------------------------------------------

    fn spawn_heartbeat(self: &Arc<Self>) {
        let transit = self.clone();
        let period = self.heartbeat_interval;
        self.track(tokio::spawn(async move {
            let mut ticks = delayed_interval(period);
            loop {
                ticks.tick().await;
                if let Err(e) = transit.beat().await {
                    warn!(error = %e, "heartbeat skipped");
                }
            }
        }));
    }

    /// Timeout supervisor. Runs on every backend; the heartbeat pass is
    /// a no-op where liveness comes from gossip instead.
    fn spawn_supervisor(self: &Arc<Self>) {
        let transit = self.clone();
        let period = self.heartbeat_timeout;
        self.track(tokio::spawn(async move {
            let mut ticks = delayed_interval(period);
            loop {
                ticks.tick().await;
                if let Err(e) = transit.sweep().await {
                    warn!(error = %e, "timeout sweep skipped");
                }
            }
        }));
    }

    fn spawn_gossip_driver(self: &Arc<Self>) {
        let transit = self.clone();
        let period = self.gossip_period;
        self.track(tokio::spawn(async move {
            let mut ticks = delayed_interval(period);
            loop {
                ticks.tick().await;
                if let Err(e) = transit.gossip_round().await {
                    warn!(error = %e, "gossip round skipped");
                }
            }
        }));
    }

    async fn beat(&self) -> Result<()> {
        let cpu = self.cpu.sample();
        self.peers.local().update_cpu_local(cpu)?;
        self.publish_message(
            ChannelKind::Heartbeat,
            None,
            &HeartbeatMessage::new(&self.node_id, cpu),
        )
        .await
    }

    /// One supervisor pass: mark heartbeat-silent peers offline, then
    /// evict peers that stayed offline past the retention window.
    async fn sweep(&self) -> Result<()> {
        if self.transport.uses_heartbeat() {
            let timeout = self.heartbeat_timeout.as_millis() as u64;
            for view in self.peers.views() {
                if view.local || !view.is_online() || view.cpu_when == 0 {
                    continue;
                }
                if millis_since(view.cpu_when) <= timeout {
                    continue;
                }
                let descriptor = match self.peers.get(&view.node_id) {
                    Some(descriptor) => descriptor,
                    None => continue,
                };
                if descriptor.mark_offline()? {
                    info!(node_id = %view.node_id, "heartbeat timeout, node marked offline");
                    self.process_events(vec![PeerEvent::Disconnected {
                        node_id: view.node_id,
                        unexpected: true,
                    }])
                    .await?;
                }
            }
        }

        // seeded peers are pinned and never forgotten
        if !self.static_peers {
            let retention = self.offline_timeout.as_millis() as u64;
            for view in self.peers.views() {
                if view.local || view.is_online() || view.offline_since == 0 {
                    continue;
                }
                if millis_since(view.offline_since) <= retention {
                    continue;
                }
                if self.peers.remove(&view.node_id).is_some() {
                    self.metrics.peer_evicted();
                    info!(node_id = %view.node_id, "offline node evicted");
                }
            }
        }
        Ok(())
    }

    async fn gossip_round(&self) -> Result<()> {
        self.peers.local().update_cpu_local(self.cpu.sample())?;
        let round = self.gossip.prepare_round();
        let targets = {
            let mut rng = rand::rng();
            round.pick_targets(&mut rng)
        };
        if targets.is_empty() {
            return Ok(());
        }
        self.metrics.gossip_round();
        for node_id in targets {
            if let Err(e) = self
                .publish_message(ChannelKind::GossipRequest, Some(&node_id), &round.request)
                .await
            {
                debug!(node_id = %node_id, error = %e, "gossip request not delivered");
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Outbound API
    // ---------------------------------------------------------------------

    /// Send an event to one node.
    pub async fn send_event(&self, node_id: &str, event: &EventMessage) -> Result<()> {
        self.publish_message(ChannelKind::Event, Some(node_id), event)
            .await
    }

    /// Send an event to every online peer. Per-target failures are
    /// logged and skipped so one dead peer cannot veto the broadcast.
    pub async fn broadcast_event(&self, event: &EventMessage) -> Result<()> {
        for node_id in self.peers.online_ids() {
            if let Err(e) = self
                .publish_message(ChannelKind::Event, Some(&node_id), event)
                .await
            {
                warn!(node_id = %node_id, error = %e, "event not delivered");
            }
        }
        Ok(())
    }

    /// Send a request to one node. The response arrives through
    /// [`ServiceRegistry::receive_response`].
    pub async fn send_request(&self, node_id: &str, request: &RequestMessage) -> Result<()> {
        self.publish_message(ChannelKind::Request, Some(node_id), request)
            .await
    }

    /// Send a response back to a requester.
    pub async fn send_response(&self, node_id: &str, response: &ResponseMessage) -> Result<()> {
        self.publish_message(ChannelKind::Response, Some(node_id), response)
            .await
    }

    /// Send a latency probe. Returns the probe id; the answer arrives
    /// through [`ServiceRegistry::receive_pong`] with all three
    /// timestamps filled in.
    pub async fn ping(&self, node_id: &str) -> Result<u64> {
        let id = self.ping_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let ping = PingMessage::new(&self.node_id, id, now_millis());
        self.publish_message(ChannelKind::Ping, Some(node_id), &ping)
            .await?;
        Ok(id)
    }

    /// Announce a local service change: bumps the descriptor seq so the
    /// new state wins everywhere, and pushes a fresh INFO broadcast on
    /// broker backends (gossip carries it on point-to-point ones).
    pub async fn announce(&self) -> Result<()> {
        let seq = self.peers.local().bump_seq()?;
        debug!(seq, "local services changed");
        if !self.transport.point_to_point() {
            self.send_info(None).await?;
        }
        Ok(())
    }

    async fn send_info(&self, target: Option<&str>) -> Result<()> {
        let info = self.local_info()?;
        self.publish_message(ChannelKind::Info, target, &info).await
    }

    async fn send_discover(&self, target: Option<&str>) -> Result<()> {
        let discover = DiscoverMessage::new(&self.node_id);
        self.publish_message(ChannelKind::Discover, target, &discover)
            .await
    }

    fn local_info(&self) -> Result<NodeInfo> {
        let view = self.peers.local().view()?;
        Ok(NodeInfo::new(
            &self.node_id,
            view.seq,
            &view.host,
            view.port,
            self.registry.local_services(),
        ))
    }

    async fn publish_message<M: WireMessage>(
        &self,
        kind: ChannelKind,
        target: Option<&str>,
        message: &M,
    ) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransitError::NotConnected);
        }
        let payload = Bytes::from(message.encode(self.format)?);
        if self.debug_packets {
            debug!(
                kind = kind.token(),
                to = target.unwrap_or("*"),
                bytes = payload.len(),
                "packet out"
            );
        }
        let channel = match target {
            Some(node_id) => Channel::to(kind, node_id),
            None => Channel::broadcast(kind),
        };
        self.metrics.packet_sent(payload.len() as u64);
        self.transport.publish(&channel, payload).await
    }

    // ---------------------------------------------------------------------
    // Inbound dispatch
    // ---------------------------------------------------------------------

    /// Common acceptance gate for every inbound control message.
    fn accepts(&self, ver: u8, sender: &str, kind: ChannelKind) -> bool {
        if sender.is_empty() {
            warn!(kind = kind.token(), "packet without sender dropped");
            return false;
        }
        if sender == self.node_id {
            // own broadcast looped back
            return false;
        }
        if ver != PROTOCOL_VERSION {
            warn!(
                kind = kind.token(),
                sender,
                ver,
                expected = PROTOCOL_VERSION,
                "protocol version mismatch, packet dropped"
            );
            return false;
        }
        true
    }

    async fn dispatch(&self, kind: ChannelKind, payload: Bytes) -> Result<()> {
        match kind {
            ChannelKind::Event => {
                let event = EventMessage::decode(&payload, self.format)?;
                if self.accepts(event.ver, &event.sender, kind) {
                    self.events.receive_event(event);
                }
            }
            ChannelKind::Request => {
                let request = RequestMessage::decode(&payload, self.format)?;
                if self.accepts(request.ver, &request.sender, kind) {
                    self.registry.receive_request(request);
                }
            }
            ChannelKind::Response => {
                let response = ResponseMessage::decode(&payload, self.format)?;
                if self.accepts(response.ver, &response.sender, kind) {
                    self.registry.receive_response(response);
                }
            }
            ChannelKind::Discover => {
                let discover = DiscoverMessage::decode(&payload, self.format)?;
                if self.accepts(discover.ver, &discover.sender, kind) {
                    if let Err(e) = self.send_info(Some(&discover.sender)).await {
                        warn!(target = %discover.sender, error = %e, "info reply failed");
                    }
                }
            }
            ChannelKind::Info => {
                let info = NodeInfo::decode(&payload, self.format)?;
                if self.accepts(info.ver, &info.sender, kind) {
                    self.handle_info(info).await?;
                }
            }
            ChannelKind::Disconnect => {
                let farewell = DisconnectMessage::decode(&payload, self.format)?;
                if self.accepts(farewell.ver, &farewell.sender, kind) {
                    self.handle_disconnect(&farewell.sender).await?;
                }
            }
            ChannelKind::Heartbeat => {
                let beat = HeartbeatMessage::decode(&payload, self.format)?;
                if self.accepts(beat.ver, &beat.sender, kind) {
                    self.handle_heartbeat(beat).await?;
                }
            }
            ChannelKind::Ping => {
                let ping = PingMessage::decode(&payload, self.format)?;
                if self.accepts(ping.ver, &ping.sender, kind) {
                    let pong = PongMessage::answering(&ping, &self.node_id, now_millis());
                    if let Err(e) = self
                        .publish_message(ChannelKind::Pong, Some(&ping.sender), &pong)
                        .await
                    {
                        warn!(target = %ping.sender, error = %e, "pong not delivered");
                    }
                }
            }
            ChannelKind::Pong => {
                let mut pong = PongMessage::decode(&payload, self.format)?;
                if self.accepts(pong.ver, &pong.sender, kind) {
                    pong.received = now_millis();
                    self.registry.receive_pong(pong);
                }
            }
            ChannelKind::GossipRequest => {
                let request = GossipRequest::decode(&payload, self.format)?;
                if self.accepts(request.ver, &request.sender, kind) {
                    self.handle_gossip_request(request).await?;
                }
            }
            ChannelKind::GossipResponse => {
                let response = GossipResponse::decode(&payload, self.format)?;
                if self.accepts(response.ver, &response.sender, kind) {
                    let events = self.gossip.handle_response(&response)?;
                    self.process_events(events).await?;
                }
            }
            ChannelKind::GossipHello => {
                let hello = HelloMessage::decode(&payload, self.format)?;
                if self.accepts(hello.ver, &hello.sender, kind) {
                    if hello.host.is_empty() || hello.port == 0 {
                        warn!(sender = %hello.sender, "hello without a usable address dropped");
                    } else {
                        self.peers.ensure(&hello.sender, &hello.host, hello.port)?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_info(&self, info: NodeInfo) -> Result<()> {
        let subject = info.sender.clone();
        let mut events = Vec::new();
        self.gossip.apply_info(&subject, &info, &mut events)?;
        if let Some(descriptor) = self.peers.get(&subject) {
            // a full info push is liveness evidence too
            descriptor.touch_activity()?;
        }
        self.process_events(events).await
    }

    async fn handle_disconnect(&self, sender: &str) -> Result<()> {
        let descriptor = match self.peers.get(sender) {
            Some(descriptor) => descriptor,
            None => return Ok(()),
        };
        if descriptor.mark_offline()? {
            self.process_events(vec![PeerEvent::Disconnected {
                node_id: sender.to_string(),
                unexpected: false,
            }])
            .await?;
        }
        Ok(())
    }

    async fn handle_heartbeat(&self, beat: HeartbeatMessage) -> Result<()> {
        match self.peers.get(&beat.sender) {
            Some(descriptor) if descriptor.is_online()? => {
                descriptor.update_cpu_local(beat.cpu)?;
            }
            _ => {
                // beacon from a stranger: ask who they are
                debug!(sender = %beat.sender, "heartbeat from unknown node");
                if let Err(e) = self.send_discover(Some(&beat.sender)).await {
                    warn!(target = %beat.sender, error = %e, "discover request failed");
                }
            }
        }
        Ok(())
    }

    async fn handle_gossip_request(&self, request: GossipRequest) -> Result<()> {
        let (response, events) = self.gossip.handle_request(&request, || self.local_info())?;
        self.process_events(events).await?;
        if let Some(response) = response {
            if let Err(e) = self
                .publish_message(ChannelKind::GossipResponse, Some(&request.sender), &response)
                .await
            {
                debug!(target = %request.sender, error = %e, "gossip response not delivered");
            }
        }
        Ok(())
    }

    /// Apply membership transitions to the registry, detach dead peers
    /// from the transport, and fan the events out to subscribers.
    async fn process_events(&self, events: Vec<PeerEvent>) -> Result<()> {
        for event in events {
            match &event {
                PeerEvent::Connected {
                    node_id,
                    reconnected,
                } => {
                    if let Some(descriptor) = self.peers.get(node_id) {
                        descriptor.touch_activity()?;
                        if let Some(info) = descriptor.info()? {
                            self.registry.add_actions(node_id, &info.services);
                        }
                    }
                    info!(node_id = %node_id, reconnected, "node connected");
                }
                PeerEvent::Updated { node_id } => {
                    if let Some(descriptor) = self.peers.get(node_id) {
                        if let Some(info) = descriptor.info()? {
                            self.registry.remove_actions(node_id);
                            self.registry.add_actions(node_id, &info.services);
                        }
                    }
                    info!(node_id = %node_id, "node updated");
                }
                PeerEvent::Disconnected { node_id, unexpected } => {
                    self.registry.remove_actions(node_id);
                    self.transport.drop_peer(node_id).await;
                    info!(node_id = %node_id, unexpected, "node disconnected");
                }
            }
            let _ = self.peer_events.send(event);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    /// Local node id.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Whether the transport is currently attached.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Snapshot of every known peer, the local node included.
    pub fn nodes(&self) -> Vec<DescriptorView> {
        self.peers.views()
    }

    /// Snapshot of one peer.
    pub fn node(&self, node_id: &str) -> Option<DescriptorView> {
        self.peers.get(node_id).and_then(|d| d.view().ok())
    }

    /// Subscribe to membership transitions. Slow receivers lag and drop
    /// the oldest events rather than applying backpressure.
    pub fn subscribe_peer_events(&self) -> broadcast::Receiver<PeerEvent> {
        self.peer_events.subscribe()
    }

    // ---------------------------------------------------------------------
    // Task bookkeeping
    // ---------------------------------------------------------------------

    fn track(&self, task: JoinHandle<()>) {
        match self.tasks.lock() {
            Ok(mut tasks) => tasks.push(task),
            Err(_) => task.abort(),
        }
    }

    fn stop_tasks(&self) {
        let drained = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect::<Vec<_>>(),
            Err(_) => return,
        };
        for task in drained {
            task.abort();
        }
    }
}

#[async_trait]
impl InboundHandler for Transit {
    async fn received(&self, kind: ChannelKind, payload: Bytes) {
        self.metrics.packet_received(payload.len() as u64);
        if self.debug_packets {
            debug!(kind = kind.token(), bytes = payload.len(), "packet in");
        }
        if let Err(e) = self.dispatch(kind, payload).await {
            self.metrics.decode_error();
            warn!(kind = kind.token(), error = %e, "inbound packet dropped");
        }
    }

    async fn delivery_failed(&self, node_id: &str, kind: ChannelKind, payload: Bytes) {
        self.metrics.delivery_failure();
        warn!(node_id, kind = kind.token(), "delivery failed");

        if let Some(descriptor) = self.peers.get(node_id) {
            match descriptor.mark_offline() {
                Ok(true) => {
                    let event = PeerEvent::Disconnected {
                        node_id: node_id.to_string(),
                        unexpected: true,
                    };
                    if let Err(e) = self.process_events(vec![event]).await {
                        warn!(error = %e, "offline transition incomplete");
                    }
                }
                Ok(false) => {}
                Err(e) => warn!(error = %e, "offline transition failed"),
            }
        }

        // a lost request still needs an answer: synthesize the failure
        // so the caller's pending invocation resolves instead of timing out
        if kind == ChannelKind::Request {
            match RequestMessage::decode(&payload, self.format) {
                Ok(request) => {
                    let response = ResponseMessage::failure(
                        node_id,
                        &request.id,
                        ErrorInfo::unreachable(node_id),
                    );
                    self.registry.receive_response(response);
                }
                Err(e) => {
                    warn!(error = %e, "undeliverable request payload not decodable");
                }
            }
        }
    }
}

fn delayed_interval(period: Duration) -> tokio::time::Interval {
    // skip the immediate first tick so drivers fire one period from now
    let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::ServiceSpec;
    use crate::transport::memory::{MemoryHub, MemoryTransport};

    #[derive(Debug, Default)]
    struct RecordingRegistry {
        services: Vec<ServiceSpec>,
        added: Mutex<Vec<String>>,
        removed: Mutex<Vec<String>>,
        pongs: Mutex<Vec<PongMessage>>,
    }

    impl ServiceRegistry for RecordingRegistry {
        fn local_services(&self) -> Vec<ServiceSpec> {
            self.services.clone()
        }

        fn add_actions(&self, node_id: &str, _services: &[ServiceSpec]) {
            if let Ok(mut added) = self.added.lock() {
                added.push(node_id.to_string());
            }
        }

        fn remove_actions(&self, node_id: &str) {
            if let Ok(mut removed) = self.removed.lock() {
                removed.push(node_id.to_string());
            }
        }

        fn receive_request(&self, _request: RequestMessage) {}

        fn receive_response(&self, _response: ResponseMessage) {}

        fn receive_pong(&self, pong: PongMessage) {
            if let Ok(mut pongs) = self.pongs.lock() {
                pongs.push(pong);
            }
        }
    }

    #[derive(Debug, Default)]
    struct NullSink;

    impl EventSink for NullSink {
        fn receive_event(&self, _event: EventMessage) {}
    }

    fn test_config(node_id: &str) -> TransitConfig {
        let mut config = TransitConfig::default();
        config.node.node_id = node_id.to_string();
        config.discovery.enabled = false;
        config
    }

    fn build(node_id: &str, hub: &Arc<MemoryHub>) -> Arc<Transit> {
        let config = test_config(node_id);
        let transport = Arc::new(MemoryTransport::new(hub.clone(), &config.node.prefix));
        Transit::new(
            &config,
            transport,
            Arc::new(RecordingRegistry::default()),
            Arc::new(NullSink),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn publish_before_connect_is_rejected() {
        let hub = Arc::new(MemoryHub::new());
        let transit = build("lonely", &hub);
        let event = EventMessage::new("lonely", "user.created", Vec::new(), false);
        let result = transit.send_event("other", &event).await;
        assert!(matches!(result, Err(TransitError::NotConnected)));
    }

    #[tokio::test]
    async fn local_info_reflects_registry_services() {
        let hub = Arc::new(MemoryHub::new());
        let config = test_config("svc-node");
        let transport = Arc::new(MemoryTransport::new(hub, &config.node.prefix));
        let registry = Arc::new(RecordingRegistry {
            services: vec![ServiceSpec::new("math").with_actions(&["math.add"])],
            ..RecordingRegistry::default()
        });
        let transit = Transit::new(&config, transport, registry, Arc::new(NullSink)).unwrap();

        let info = transit.local_info().unwrap();
        assert_eq!(info.sender, "svc-node");
        assert_eq!(info.services.len(), 1);
        assert_eq!(info.services[0].name, "math");
    }

    #[tokio::test]
    async fn inbound_gate_drops_self_and_foreign_versions() {
        let hub = Arc::new(MemoryHub::new());
        let transit = build("gatekeeper", &hub);

        // own broadcast looped back
        assert!(!transit.accepts(PROTOCOL_VERSION, "gatekeeper", ChannelKind::Heartbeat));
        // anonymous packet
        assert!(!transit.accepts(PROTOCOL_VERSION, "", ChannelKind::Info));
        // wrong protocol version
        assert!(!transit.accepts(PROTOCOL_VERSION + 1, "peer", ChannelKind::Info));
        // well-formed foreign packet
        assert!(transit.accepts(PROTOCOL_VERSION, "peer", ChannelKind::Info));
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped_without_panic() {
        let hub = Arc::new(MemoryHub::new());
        let transit = build("hardened", &hub);
        let garbage = Bytes::from_static(&[0xff, 0x00, 0xab, 0x17]);
        transit.received(ChannelKind::Info, garbage).await;
        assert_eq!(transit.nodes().len(), 1);
    }

    #[tokio::test]
    async fn ping_ids_are_monotonic() {
        let hub = Arc::new(MemoryHub::new());
        let transit = build("prober", &hub);
        transit.connect().await.unwrap();

        let first = transit.ping("ghost").await.unwrap();
        let second = transit.ping("ghost").await.unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);

        transit.disconnect().await.unwrap();
        assert!(!transit.is_connected());
    }

    #[tokio::test]
    async fn disconnect_message_marks_peer_offline_once() {
        let hub = Arc::new(MemoryHub::new());
        let transit = build("observer", &hub);

        let peer = transit.peers.ensure("leaver", "10.0.0.9", 7000).unwrap();
        peer.mark_online(NodeInfo::new("leaver", 3, "10.0.0.9", 7000, Vec::new()))
            .unwrap();
        let mut events = transit.subscribe_peer_events();

        let farewell = DisconnectMessage::new("leaver");
        let payload = Bytes::from(farewell.encode(transit.format).unwrap());
        transit
            .received(ChannelKind::Disconnect, payload.clone())
            .await;
        transit.received(ChannelKind::Disconnect, payload).await;

        assert!(!transit.node("leaver").unwrap().is_online());
        let event = events.try_recv().unwrap();
        assert_eq!(
            event,
            PeerEvent::Disconnected {
                node_id: "leaver".into(),
                unexpected: false,
            }
        );
        // second farewell was a no-op
        assert!(events.try_recv().is_err());
    }
}
