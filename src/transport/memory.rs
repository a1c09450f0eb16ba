//! # In-Memory Transport
//!
//! Broker-style backend without a broker process. A shared [`MemoryHub`]
//! owns the topic namespace and fans every published payload out to all
//! subscribers of that topic, the publisher included, which matches the
//! loopback behavior of a real message broker. Intended for tests and
//! single-process deployments.
//!
//! Delivery is ordered per subscriber: each attached transport drains its
//! inbox with a single pump task, so payloads reach the handler in
//! publish order even when the handler itself is slow.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::core::channel::{Channel, ChannelKind};
use crate::error::{constants, Result, TransitError};
use crate::mesh::table::PeerTable;
use crate::transport::{InboundHandler, Transport};

type Inbox = mpsc::UnboundedSender<(ChannelKind, Bytes)>;

#[derive(Debug, Clone)]
struct Subscriber {
    member: u64,
    kind: ChannelKind,
    inbox: Inbox,
}

/// Shared fan-out hub. One hub models one broker instance; every
/// transport attached to it shares the topic namespace.
#[derive(Debug, Default)]
pub struct MemoryHub {
    topics: DashMap<String, Vec<Subscriber>>,
    next_member: AtomicU64,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self) -> u64 {
        self.next_member.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn attach(&self, topic: String, subscriber: Subscriber) {
        self.topics.entry(topic).or_default().push(subscriber);
    }

    /// Fan a payload out to every subscriber of the topic. Returns how
    /// many inboxes accepted it.
    fn fan_out(&self, topic: &str, payload: &Bytes) -> usize {
        let subscribers = match self.topics.get(topic) {
            Some(subscribers) => subscribers,
            None => return 0,
        };
        let mut delivered = 0;
        for subscriber in subscribers.iter() {
            if subscriber
                .inbox
                .send((subscriber.kind, payload.clone()))
                .is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }

    fn forget(&self, member: u64) {
        self.topics.retain(|_, subscribers| {
            subscribers.retain(|s| s.member != member);
            !subscribers.is_empty()
        });
    }

    /// Distinct topics with at least one subscriber.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

/// One attachment to a [`MemoryHub`].
#[derive(Debug)]
pub struct MemoryTransport {
    hub: Arc<MemoryHub>,
    prefix: String,
    member: u64,
    inbox: Mutex<Option<Inbox>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    connected: AtomicBool,
}

impl MemoryTransport {
    pub fn new(hub: Arc<MemoryHub>, prefix: impl Into<String>) -> Self {
        let member = hub.register();
        Self {
            hub,
            prefix: prefix.into(),
            member,
            inbox: Mutex::new(None),
            pump: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    fn lock_inbox(&self) -> Result<MutexGuard<'_, Option<Inbox>>> {
        self.inbox
            .lock()
            .map_err(|_| TransitError::Custom(constants::ERR_LOCK_POISONED.to_string()))
    }

    fn lock_pump(&self) -> Result<MutexGuard<'_, Option<JoinHandle<()>>>> {
        self.pump
            .lock()
            .map_err(|_| TransitError::Custom(constants::ERR_LOCK_POISONED.to_string()))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(
        &self,
        handler: Arc<dyn InboundHandler>,
        _peers: Arc<PeerTable>,
    ) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<(ChannelKind, Bytes)>();
        // one pump per attachment keeps delivery ordered
        let pump = tokio::spawn(async move {
            while let Some((kind, payload)) = rx.recv().await {
                handler.received(kind, payload).await;
            }
        });
        *self.lock_inbox()? = Some(tx);
        if let Some(old) = self.lock_pump()?.replace(pump) {
            old.abort();
        }
        self.connected.store(true, Ordering::SeqCst);
        debug!(member = self.member, "memory transport attached");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.hub.forget(self.member);
        *self.lock_inbox()? = None;
        let pump = self.lock_pump()?.take();
        if let Some(pump) = pump {
            pump.abort();
        }
        debug!(member = self.member, "memory transport detached");
        Ok(())
    }

    async fn subscribe(&self, channel: &Channel) -> Result<()> {
        let inbox = match &*self.lock_inbox()? {
            Some(inbox) => inbox.clone(),
            None => return Err(TransitError::NotConnected),
        };
        self.hub.attach(
            channel.render(&self.prefix),
            Subscriber {
                member: self.member,
                kind: channel.kind,
                inbox,
            },
        );
        Ok(())
    }

    async fn publish(&self, channel: &Channel, payload: Bytes) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransitError::NotConnected);
        }
        let topic = channel.render(&self.prefix);
        let delivered = self.hub.fan_out(&topic, &payload);
        debug!(topic = %topic, delivered, bytes = payload.len(), "published");
        Ok(())
    }

    async fn drop_peer(&self, _node_id: &str) {}

    fn uses_heartbeat(&self) -> bool {
        true
    }

    fn point_to_point(&self) -> bool {
        false
    }

    fn local_port(&self) -> Option<u16> {
        None
    }
}
