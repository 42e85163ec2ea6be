//! Peer management
//!
//! This module contains the peer table consulted by station add/remove
//! events and by raw injection mode changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::{mac_to_string, FmacError, Result, ETH_ALEN};

/// Peer table slot identifier
pub type PeerId = usize;

/// Key space of the peer table
///
/// Raw injection uses a reserved key rather than a station address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerKey {
    /// Associated station or AP, by MAC address
    Station([u8; ETH_ALEN]),
    /// Pseudo-peer for raw frame injection
    RawInjection,
}

impl std::fmt::Display for PeerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerKey::Station(mac) => f.write_str(&mac_to_string(mac)),
            PeerKey::RawInjection => f.write_str("raw-injection"),
        }
    }
}

/// Peer capability flags reported by firmware
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerCapabilities {
    /// QoS (WMM) capable
    pub wme: bool,
    /// Legacy (non-HT) station
    pub is_legacy: bool,
}

/// Peer table operations used by the dispatcher
pub trait PeerTable: Send {
    /// Find a peer
    fn lookup(&self, key: &PeerKey) -> Option<PeerId>;

    /// Add a peer owned by interface `if_idx`
    fn add(&mut self, if_idx: u8, key: PeerKey, caps: PeerCapabilities) -> Result<PeerId>;

    /// Remove a peer
    fn remove(&mut self, if_idx: u8, peer_id: PeerId);

    /// Number of peers in the table
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Peer table entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEntry {
    /// Slot identifier
    pub id: PeerId,
    /// Peer key
    pub key: PeerKey,
    /// Owning interface
    pub if_idx: u8,
    /// Capabilities
    pub caps: PeerCapabilities,
    /// When the peer was added
    pub added_at: DateTime<Utc>,
}

impl PeerEntry {
    /// Get age of entry
    pub fn age(&self) -> Duration {
        (Utc::now() - self.added_at).to_std().unwrap_or_default()
    }
}

/// In-memory peer table with a fixed number of station slots
///
/// Station peers occupy ids `0..max_peers`; the raw injection pseudo-peer
/// always gets id `max_peers`.
#[derive(Debug)]
pub struct PeerManager {
    peers: HashMap<PeerKey, PeerEntry>,
    max_peers: usize,
}

impl PeerManager {
    /// Create new peer manager
    pub fn new(max_peers: usize) -> Self {
        Self {
            peers: HashMap::new(),
            max_peers,
        }
    }

    /// Get peer by key
    pub fn get_peer(&self, key: &PeerKey) -> Option<&PeerEntry> {
        self.peers.get(key)
    }

    /// Get peer by slot
    pub fn get_by_id(&self, peer_id: PeerId) -> Option<&PeerEntry> {
        self.peers.values().find(|entry| entry.id == peer_id)
    }

    /// Get all peers
    pub fn get_peers(&self) -> impl Iterator<Item = &PeerEntry> {
        self.peers.values()
    }

    /// Peers owned by an interface
    pub fn peers_of(&self, if_idx: u8) -> impl Iterator<Item = &PeerEntry> {
        self.peers.values().filter(move |entry| entry.if_idx == if_idx)
    }

    /// Maximum number of station peers
    pub fn max_peers(&self) -> usize {
        self.max_peers
    }

    /// Clear all peers
    pub fn clear(&mut self) {
        self.peers.clear();
    }

    fn free_slot(&self) -> Option<PeerId> {
        (0..self.max_peers).find(|id| !self.peers.values().any(|entry| entry.id == *id))
    }
}

impl Default for PeerManager {
    fn default() -> Self {
        Self::new(crate::MAX_PEERS)
    }
}

impl PeerTable for PeerManager {
    fn lookup(&self, key: &PeerKey) -> Option<PeerId> {
        self.peers.get(key).map(|entry| entry.id)
    }

    fn add(&mut self, if_idx: u8, key: PeerKey, caps: PeerCapabilities) -> Result<PeerId> {
        if let Some(entry) = self.peers.get(&key) {
            return Ok(entry.id);
        }

        let id = match key {
            PeerKey::RawInjection => self.max_peers,
            PeerKey::Station(_) => match self.free_slot() {
                Some(id) => id,
                None => {
                    log::warn!("Maximum number of peers ({}) reached", self.max_peers);
                    return Err(FmacError::CommandFailed(format!(
                        "peer table full, cannot add {}",
                        key
                    )));
                }
            },
        };

        self.peers.insert(
            key,
            PeerEntry {
                id,
                key,
                if_idx,
                caps,
                added_at: Utc::now(),
            },
        );
        log::debug!("Added peer {} as {} on interface {}", key, id, if_idx);
        Ok(id)
    }

    fn remove(&mut self, if_idx: u8, peer_id: PeerId) {
        let key = self
            .peers
            .values()
            .find(|entry| entry.id == peer_id)
            .map(|entry| (entry.key, entry.if_idx));

        match key {
            Some((key, owner)) => {
                if owner != if_idx {
                    log::warn!(
                        "Peer {} owned by interface {}, removed via interface {}",
                        key,
                        owner,
                        if_idx
                    );
                }
                self.peers.remove(&key);
                log::debug!("Removed peer {} ({})", key, peer_id);
            }
            None => log::debug!("No peer with id {} to remove", peer_id),
        }
    }

    fn len(&self) -> usize {
        self.peers.len()
    }
}
