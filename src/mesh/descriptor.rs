//! # Node Descriptors
//!
//! Per-peer versioned state. Every field transition happens under the
//! descriptor's own reader/writer lock, so updates to different peers never
//! contend and each node's state is linearizable in isolation.
//!
//! Two independent version counters order conflicting updates without a
//! global clock: `seq` versions the info payload (0 = never seen online),
//! `cpu_seq` versions the cpu sample. As observed by one process, neither
//! ever decreases for a live incarnation of a node; an explicit full info
//! push may restart `seq` lower after the sender itself restarted.
//!
//! Transition methods return what changed instead of firing callbacks, so
//! callers can emit disconnect/connect notifications strictly after the
//! lock is released.

use std::sync::RwLock;

use crate::error::{constants, Result, TransitError};
use crate::protocol::message::NodeInfo;
use crate::utils::time::now_millis;

/// Result of [`NodeDescriptor::mark_online`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnlineTransition {
    /// First time this node was ever seen online.
    Connected,
    /// Offline to Online again (remote actions must be re-registered).
    Reconnected,
    /// Newer info accepted while online, with service changes.
    Updated,
    /// Rejected as stale, or accepted without any service change.
    Unchanged,
}

/// Point-in-time copy of a descriptor's scalar state, taken under the read
/// lock. Gossip rounds and sweeps work from these instead of holding locks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorView {
    pub node_id: String,
    pub local: bool,
    pub host: String,
    pub port: u16,
    pub seq: u64,
    pub cpu_seq: u64,
    pub cpu: u8,
    pub cpu_when: u64,
    pub offline_since: u64,
}

impl DescriptorView {
    pub fn is_online(&self) -> bool {
        self.offline_since == 0
    }

    /// Placeholders learned from gossip mentions have no address yet and
    /// can be summarized but never dialed.
    pub fn has_address(&self) -> bool {
        !self.host.is_empty() && self.port != 0
    }
}

#[derive(Debug)]
struct DescriptorState {
    host: String,
    port: u16,
    seq: u64,
    cpu_seq: u64,
    cpu: u8,
    cpu_when: u64,
    offline_since: u64,
    info: Option<NodeInfo>,
}

/// Per-peer record of identity, address, version, and liveness.
#[derive(Debug)]
pub struct NodeDescriptor {
    node_id: String,
    local: bool,
    state: RwLock<DescriptorState>,
}

impl NodeDescriptor {
    /// Descriptor for the local node: always reachable, seq starts at 0 and
    /// is activated on first connect.
    pub fn new_local(node_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            node_id: node_id.into(),
            local: true,
            state: RwLock::new(DescriptorState {
                host: host.into(),
                port,
                seq: 0,
                cpu_seq: 0,
                cpu: 0,
                cpu_when: 0,
                offline_since: 0,
                info: None,
            }),
        }
    }

    /// Descriptor for a freshly discovered peer: Offline(seq=0) until an
    /// info block with seq>0 is accepted. An empty host is a placeholder
    /// from a gossip mention.
    pub fn new_offline(node_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            node_id: node_id.into(),
            local: false,
            state: RwLock::new(DescriptorState {
                host: host.into(),
                port,
                seq: 0,
                cpu_seq: 0,
                cpu: 0,
                cpu_when: 0,
                offline_since: now_millis(),
                info: None,
            }),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn view(&self) -> Result<DescriptorView> {
        let s = self.read()?;
        Ok(DescriptorView {
            node_id: self.node_id.clone(),
            local: self.local,
            host: s.host.clone(),
            port: s.port,
            seq: s.seq,
            cpu_seq: s.cpu_seq,
            cpu: s.cpu,
            cpu_when: s.cpu_when,
            offline_since: s.offline_since,
        })
    }

    pub fn is_online(&self) -> Result<bool> {
        Ok(self.read()?.offline_since == 0)
    }

    pub fn seq(&self) -> Result<u64> {
        Ok(self.read()?.seq)
    }

    /// Last accepted info block, if the node was ever seen online.
    pub fn info(&self) -> Result<Option<NodeInfo>> {
        Ok(self.read()?.info.clone())
    }

    /// Refresh the advertised address on re-discovery. Returns true when
    /// the address actually changed.
    pub fn discover(&self, host: &str, port: u16) -> Result<bool> {
        let mut s = self.write()?;
        if s.host == host && s.port == port {
            return Ok(false);
        }
        s.host = host.to_string();
        s.port = port;
        Ok(true)
    }

    /// Apply a full info push.
    ///
    /// Accepted only if the proposed seq is strictly newer, or the node is
    /// currently offline (an explicit push is the reinstatement path after
    /// false suspicion or a sender restart, and may even carry a smaller
    /// seq for a fresh incarnation). [`OnlineTransition::Unchanged`] covers
    /// both rejection and accepted pushes whose service block is identical
    /// while already online, so callers can skip registry churn.
    pub fn mark_online(&self, info: NodeInfo) -> Result<OnlineTransition> {
        if self.local || info.seq == 0 {
            return Ok(OnlineTransition::Unchanged);
        }
        let mut s = self.write()?;

        let was_online = s.offline_since == 0;
        if was_online && info.seq <= s.seq {
            return Ok(OnlineTransition::Unchanged);
        }

        let never_seen = s.seq == 0;
        let services_changed = s
            .info
            .as_ref()
            .map_or(true, |prev| prev.services != info.services);

        s.seq = info.seq;
        s.host = info.host.clone();
        s.port = info.port;
        s.offline_since = 0;
        s.info = Some(info);

        Ok(if never_seen {
            OnlineTransition::Connected
        } else if !was_online {
            OnlineTransition::Reconnected
        } else if services_changed {
            OnlineTransition::Updated
        } else {
            OnlineTransition::Unchanged
        })
    }

    /// Locally observed offline transition (timeout, socket error, or an
    /// orderly DISCONNECT). True only on the Online-to-Offline edge;
    /// callers fire exactly one disconnect notification per true, after
    /// this lock is released.
    pub fn mark_offline(&self) -> Result<bool> {
        if self.local {
            return Ok(false);
        }
        let mut s = self.write()?;
        if s.offline_since != 0 {
            return Ok(false);
        }
        s.offline_since = now_millis();
        Ok(true)
    }

    /// Externally asserted offline marker from gossip. Applied only when
    /// the claimed seq is at least our own (never regress to a stale
    /// marker); adopts the larger seq either way.
    pub fn mark_offline_with_seq(&self, seq: u64) -> Result<bool> {
        if self.local {
            return Ok(false);
        }
        let mut s = self.write()?;
        if seq < s.seq {
            return Ok(false);
        }
        s.seq = seq;
        if s.offline_since != 0 {
            return Ok(false);
        }
        s.offline_since = now_millis();
        Ok(true)
    }

    /// Local cpu self-measurement: assumed monotonic, bumps cpu_seq when
    /// the value changes and always refreshes cpu_when (heartbeat receipt
    /// uses this form too, the beacon itself being the liveness evidence).
    pub fn update_cpu_local(&self, cpu: u8) -> Result<()> {
        let mut s = self.write()?;
        s.cpu_when = now_millis();
        if s.cpu != cpu {
            s.cpu = cpu;
            s.cpu_seq += 1;
        }
        Ok(())
    }

    /// Record liveness evidence without a cpu sample (an accepted info
    /// block counts as activity, so a fresh peer is not swept before its
    /// first beacon).
    pub fn touch_activity(&self) -> Result<()> {
        let mut s = self.write()?;
        s.cpu_when = now_millis();
        Ok(())
    }

    /// Versioned cpu update from gossip: last-writer-wins by cpu_seq.
    pub fn update_cpu(&self, cpu_seq: u64, cpu: u8) -> Result<bool> {
        let mut s = self.write()?;
        if cpu_seq <= s.cpu_seq {
            return Ok(false);
        }
        s.cpu_seq = cpu_seq;
        s.cpu = cpu;
        s.cpu_when = now_millis();
        Ok(true)
    }

    /// Activate the local descriptor on first connect (seq 0 becomes 1).
    pub fn activate(&self) -> Result<u64> {
        let mut s = self.write()?;
        if s.seq == 0 {
            s.seq = 1;
        }
        Ok(s.seq)
    }

    /// Version bump for a local service change announcement.
    pub fn bump_seq(&self) -> Result<u64> {
        let mut s = self.write()?;
        s.seq += 1;
        Ok(s.seq)
    }

    /// Self-defense against false suspicion: raise the local seq past an
    /// offline claim so the refreshed info wins everywhere.
    pub fn defend_seq(&self, claimed: u64) -> Result<u64> {
        let mut s = self.write()?;
        if claimed >= s.seq {
            s.seq = claimed + 1;
        }
        Ok(s.seq)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, DescriptorState>> {
        self.state
            .read()
            .map_err(|_| TransitError::Custom(constants::ERR_LOCK_POISONED.to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, DescriptorState>> {
        self.state
            .write()
            .map_err(|_| TransitError::Custom(constants::ERR_LOCK_POISONED.to_string()))
    }
}
