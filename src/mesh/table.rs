//! # Peer Table
//!
//! Concurrent arena of [`NodeDescriptor`]s indexed by node id, including the
//! local node. Reads never synchronize with each other; structural inserts
//! and removals are performed only by discovery, gossip, and the timeout
//! sweep. Per-descriptor locks stay independent of the map's shards, so
//! updates to different peers never contend.

use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;

use crate::error::{Result, TransitError};
use crate::mesh::descriptor::{DescriptorView, NodeDescriptor};

/// Statically configured bootstrap peer, parsed from
/// `tcp://host:port/nodeID` (the scheme is optional).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedPeer {
    pub node_id: String,
    pub host: String,
    pub port: u16,
}

impl FromStr for SeedPeer {
    type Err = TransitError;

    fn from_str(url: &str) -> Result<Self> {
        let rest = url.strip_prefix("tcp://").unwrap_or(url);
        let (addr, node_id) = rest
            .split_once('/')
            .ok_or_else(|| TransitError::MalformedSeedUrl(url.to_string()))?;
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| TransitError::MalformedSeedUrl(url.to_string()))?;
        if host.is_empty() || node_id.is_empty() {
            return Err(TransitError::MalformedSeedUrl(url.to_string()));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| TransitError::MalformedSeedUrl(url.to_string()))?;
        Ok(Self {
            node_id: node_id.to_string(),
            host: host.to_string(),
            port,
        })
    }
}

/// Shared membership registry. One per process.
#[derive(Debug)]
pub struct PeerTable {
    local: Arc<NodeDescriptor>,
    nodes: DashMap<String, Arc<NodeDescriptor>>,
}

impl PeerTable {
    pub fn new(local_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        let local = Arc::new(NodeDescriptor::new_local(local_id, host, port));
        let nodes = DashMap::new();
        nodes.insert(local.node_id().to_string(), local.clone());
        Self { local, nodes }
    }

    pub fn local(&self) -> &Arc<NodeDescriptor> {
        &self.local
    }

    pub fn local_id(&self) -> &str {
        self.local.node_id()
    }

    pub fn get(&self, node_id: &str) -> Option<Arc<NodeDescriptor>> {
        self.nodes.get(node_id).map(|e| e.value().clone())
    }

    /// Upsert a peer discovered via hello, seed URL, or a gossip mention.
    /// An empty host leaves any previously known address untouched.
    pub fn ensure(&self, node_id: &str, host: &str, port: u16) -> Result<Arc<NodeDescriptor>> {
        if node_id == self.local_id() {
            return Ok(self.local.clone());
        }
        let descriptor = self
            .nodes
            .entry(node_id.to_string())
            .or_insert_with(|| Arc::new(NodeDescriptor::new_offline(node_id, host, port)))
            .clone();
        if !host.is_empty() {
            descriptor.discover(host, port)?;
        }
        Ok(descriptor)
    }

    /// Seed the table from static bootstrap URLs; the local node's own URL
    /// is tolerated and skipped.
    pub fn seed(&self, seeds: &[SeedPeer]) -> Result<()> {
        for seed in seeds {
            if seed.node_id == self.local_id() {
                continue;
            }
            self.ensure(&seed.node_id, &seed.host, seed.port)?;
        }
        Ok(())
    }

    /// Remove a peer (timeout eviction). The local descriptor is pinned.
    pub fn remove(&self, node_id: &str) -> Option<Arc<NodeDescriptor>> {
        if node_id == self.local_id() {
            return None;
        }
        self.nodes.remove(node_id).map(|(_, d)| d)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Descriptor handles for every known node, local included.
    pub fn snapshot(&self) -> Vec<Arc<NodeDescriptor>> {
        self.nodes.iter().map(|e| e.value().clone()).collect()
    }

    /// Point-in-time views for every known node; descriptors with a
    /// poisoned lock are skipped with a warning rather than failing the
    /// whole pass.
    pub fn views(&self) -> Vec<DescriptorView> {
        self.snapshot()
            .iter()
            .filter_map(|d| match d.view() {
                Ok(view) => Some(view),
                Err(err) => {
                    warn!(node_id = d.node_id(), %err, "skipping unreadable descriptor");
                    None
                }
            })
            .collect()
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.iter().map(|e| e.key().clone()).collect()
    }

    /// Node ids currently believed reachable, excluding the local node.
    pub fn online_ids(&self) -> Vec<String> {
        self.views()
            .into_iter()
            .filter(|v| !v.local && v.is_online())
            .map(|v| v.node_id)
            .collect()
    }
}
