//! Device and virtual interface contexts
//!
//! An [`FmacDevice`] exists per attached radio. It owns the VIF slots, the
//! callback table, the peer table and every flag that firmware events
//! toggle. Commands are encoded in [`crate::cmd`], inbound messages are
//! handled in [`crate::dispatch`].
//!
//! The device performs no locking. Hosts delivering events concurrently with
//! command issuance must wrap it in a mutex.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;

use crate::callbacks::CallbackTable;
use crate::config::{Capabilities, FmacConfig};
use crate::dispatch::deferred::DeferredQueues;
use crate::dispatch::DispatchStats;
use crate::peers::{PeerManager, PeerTable};
use crate::proto::IfType;
use crate::radio_test::RadioTestState;
use crate::transport::{DataPlane, Transport};
use crate::wire::{AllocStats, HeapAllocator, MessageAllocator};
use crate::{FmacError, Result, COUNTRY_CODE_LEN, ETH_ALEN, MAX_NUM_VIFS};

/// Opaque back-reference to the OS integration object of an interface
pub type OsVifHandle = Arc<dyn Any + Send + Sync>;

/// Virtual interface context
#[derive(Clone)]
pub struct VifContext {
    pub if_idx: u8,
    pub if_type: IfType,
    /// Raw operating-mode bitmap last confirmed by firmware
    pub mode: u8,
    /// BSSID of the AP the interface is associated with
    pub bssid: [u8; ETH_ALEN],
    pub channel: u32,
    pub packet_filter: u8,
    /// Interface flags confirmed by firmware
    pub ifflags: bool,
    pub txinjection_mode: bool,
    pub promisc_mode: bool,
    pub os_handle: OsVifHandle,
}

impl std::fmt::Debug for VifContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VifContext")
            .field("if_idx", &self.if_idx)
            .field("if_type", &self.if_type)
            .field("mode", &self.mode)
            .field("bssid", &crate::mac_to_string(&self.bssid))
            .field("channel", &self.channel)
            .field("packet_filter", &self.packet_filter)
            .field("ifflags", &self.ifflags)
            .field("txinjection_mode", &self.txinjection_mode)
            .field("promisc_mode", &self.promisc_mode)
            .finish_non_exhaustive()
    }
}

impl VifContext {
    /// Create new interface context
    pub fn new(if_idx: u8, if_type: IfType, os_handle: OsVifHandle) -> Self {
        Self {
            if_idx,
            if_type,
            mode: 0,
            bssid: [0; ETH_ALEN],
            channel: 0,
            packet_filter: 0,
            ifflags: false,
            txinjection_mode: false,
            promisc_mode: false,
            os_handle,
        }
    }
}

/// Regulatory change notification stored in radio test mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegChange {
    pub initiator: u16,
    pub reg_type: i8,
    pub alpha2: [u8; COUNTRY_CODE_LEN],
    pub wiphy_idx: i32,
}

/// Regulatory scratch fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegulatoryState {
    pub alpha2: [u8; COUNTRY_CODE_LEN],
    pub alpha2_valid: bool,
    pub reg_change: Option<RegChange>,
    pub reg_set_status: bool,
}

/// Device context
pub struct FmacDevice {
    config: FmacConfig,
    transport: Arc<dyn Transport>,
    allocator: Arc<dyn MessageAllocator>,
    pub(crate) fw_init_done: bool,
    pub(crate) fw_deinit_done: bool,
    pub(crate) stats_req: bool,
    pub(crate) fw_stats: Option<Bytes>,
    pub(crate) vifs: [Option<VifContext>; MAX_NUM_VIFS],
    pub(crate) callbacks: CallbackTable,
    pub(crate) peers: Box<dyn PeerTable>,
    pub(crate) data_plane: Option<Arc<dyn DataPlane>>,
    pub(crate) deferred: DeferredQueues,
    pub(crate) radio_test: RadioTestState,
    pub(crate) regulatory: RegulatoryState,
    pub(crate) stats: DispatchStats,
}

impl std::fmt::Debug for FmacDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FmacDevice")
            .field("transport", &self.transport.name())
            .field("fw_init_done", &self.fw_init_done)
            .field("fw_deinit_done", &self.fw_deinit_done)
            .field("stats_req", &self.stats_req)
            .field("vifs", &self.vifs)
            .field("callbacks", &self.callbacks)
            .field("peers", &self.peers.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl FmacDevice {
    /// Create new device context attached to `transport`
    pub fn new(config: FmacConfig, transport: Arc<dyn Transport>) -> Self {
        let peers = PeerManager::new(config.peers.max_peers);
        Self {
            config,
            transport,
            allocator: Arc::new(HeapAllocator::new()),
            fw_init_done: false,
            fw_deinit_done: false,
            stats_req: false,
            fw_stats: None,
            vifs: std::array::from_fn(|_| None),
            callbacks: CallbackTable::new(),
            peers: Box::new(peers),
            data_plane: None,
            deferred: DeferredQueues::new(),
            radio_test: RadioTestState::default(),
            regulatory: RegulatoryState::default(),
            stats: DispatchStats::default(),
        }
    }

    /// Use a custom message allocator
    pub fn with_allocator(mut self, allocator: Arc<dyn MessageAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    /// Use an external peer table
    pub fn with_peer_table(mut self, peers: Box<dyn PeerTable>) -> Self {
        self.peers = peers;
        self
    }

    /// Attach the data plane receiving RX/TX hand-offs
    pub fn with_data_plane(mut self, data_plane: Arc<dyn DataPlane>) -> Self {
        self.data_plane = Some(data_plane);
        self
    }

    /// Read RF capture samples from `capture_base`
    pub fn with_capture_base(mut self, capture_base: u32) -> Self {
        self.radio_test = RadioTestState::with_capture_base(capture_base);
        self
    }

    pub fn config(&self) -> &FmacConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.config.capabilities
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn allocator(&self) -> &dyn MessageAllocator {
        self.allocator.as_ref()
    }

    pub fn allocator_stats(&self) -> AllocStats {
        self.allocator.stats()
    }

    /// Firmware confirmed INIT
    pub fn fw_init_done(&self) -> bool {
        self.fw_init_done
    }

    /// Firmware confirmed DEINIT
    pub fn fw_deinit_done(&self) -> bool {
        self.fw_deinit_done
    }

    /// A statistics request is outstanding
    pub fn stats_requested(&self) -> bool {
        self.stats_req
    }

    /// Counters delivered by the last STATS event
    pub fn fw_stats(&self) -> Option<&[u8]> {
        self.fw_stats.as_deref()
    }

    pub fn callbacks(&self) -> &CallbackTable {
        &self.callbacks
    }

    pub fn callbacks_mut(&mut self) -> &mut CallbackTable {
        &mut self.callbacks
    }

    pub fn peers(&self) -> &dyn PeerTable {
        self.peers.as_ref()
    }

    pub fn data_plane(&self) -> Option<&Arc<dyn DataPlane>> {
        self.data_plane.as_ref()
    }

    pub fn radio_test(&self) -> &RadioTestState {
        &self.radio_test
    }

    pub fn radio_test_mut(&mut self) -> &mut RadioTestState {
        &mut self.radio_test
    }

    pub fn regulatory(&self) -> &RegulatoryState {
        &self.regulatory
    }

    pub fn dispatch_stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Validate an interface id taken from a message
    pub fn check_if_idx(if_idx: u64) -> Result<u8> {
        if if_idx >= MAX_NUM_VIFS as u64 {
            return Err(FmacError::MalformedMessage(format!(
                "interface id {} out of range (max {})",
                if_idx,
                MAX_NUM_VIFS - 1
            )));
        }
        Ok(if_idx as u8)
    }

    /// Create an interface in slot `if_idx`
    pub fn add_vif(&mut self, if_idx: u8, if_type: IfType, os_handle: OsVifHandle) -> Result<()> {
        let idx = Self::check_if_idx(if_idx as u64)?;
        let slot = &mut self.vifs[idx as usize];
        if slot.is_some() {
            return Err(FmacError::CommandFailed(format!(
                "interface {} already exists",
                if_idx
            )));
        }

        *slot = Some(VifContext::new(idx, if_type, os_handle));
        log::info!("Added interface {} as {:?}", if_idx, if_type);
        Ok(())
    }

    /// Remove the interface in slot `if_idx`
    pub fn remove_vif(&mut self, if_idx: u8) -> Option<VifContext> {
        let removed = self.vifs.get_mut(if_idx as usize)?.take();
        if removed.is_some() {
            log::info!("Removed interface {}", if_idx);
        }
        removed
    }

    pub fn vif(&self, if_idx: u8) -> Option<&VifContext> {
        self.vifs.get(if_idx as usize)?.as_ref()
    }

    pub fn vif_mut(&mut self, if_idx: u8) -> Option<&mut VifContext> {
        self.vifs.get_mut(if_idx as usize)?.as_mut()
    }

    /// Interface that must exist for an event to be processed
    pub(crate) fn require_vif(&mut self, if_idx: u8) -> Result<&mut VifContext> {
        self.vifs
            .get_mut(if_idx as usize)
            .and_then(|slot| slot.as_mut())
            .ok_or_else(|| {
                FmacError::MalformedMessage(format!("no interface context for id {}", if_idx))
            })
    }

    /// Active interfaces
    pub fn vifs(&self) -> impl Iterator<Item = &VifContext> {
        self.vifs.iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::RecordingTransport;

    fn device() -> FmacDevice {
        FmacDevice::new(FmacConfig::default(), Arc::new(RecordingTransport::new()))
    }

    #[test]
    fn test_new_device_state() {
        let dev = device();
        assert!(!dev.fw_init_done());
        assert!(!dev.fw_deinit_done());
        assert!(!dev.stats_requested());
        assert!(dev.fw_stats().is_none());
        assert_eq!(dev.vifs().count(), 0);
        assert!(dev.peers().is_empty());
    }

    #[test]
    fn test_vif_lifecycle() {
        let mut dev = device();
        dev.add_vif(1, IfType::Ap, Arc::new("wlan1")).unwrap();

        assert!(dev.vif(0).is_none());
        assert_eq!(dev.vif(1).map(|v| v.if_type), Some(IfType::Ap));
        assert!(matches!(
            dev.add_vif(1, IfType::Station, Arc::new(())),
            Err(FmacError::CommandFailed(_))
        ));

        dev.vif_mut(1).unwrap().channel = 11;
        let removed = dev.remove_vif(1).unwrap();
        assert_eq!(removed.channel, 11);
        assert!(dev.remove_vif(1).is_none());
    }

    #[test]
    fn test_vif_index_bounds() {
        let mut dev = device();
        assert!(matches!(
            dev.add_vif(MAX_NUM_VIFS as u8, IfType::Station, Arc::new(())),
            Err(FmacError::MalformedMessage(_))
        ));
        assert!(dev.vif(200).is_none());
        assert!(dev.remove_vif(200).is_none());
        assert!(FmacDevice::check_if_idx(u64::MAX).is_err());
        assert_eq!(FmacDevice::check_if_idx(1).unwrap(), 1);
    }

    #[test]
    fn test_os_handle_downcast() {
        let mut dev = device();
        dev.add_vif(0, IfType::Station, Arc::new(String::from("wlan0")))
            .unwrap();
        let handle = &dev.vif(0).unwrap().os_handle;
        assert_eq!(
            handle.downcast_ref::<String>().map(String::as_str),
            Some("wlan0")
        );
    }
}
