//! Raw and monitor operating modes
//!
//! MODE_SET_DONE reports the operating-mode bitmap the firmware switched an
//! interface to. The bitmap is resolved into a concrete interface type plus
//! the ownership of the raw injection pseudo-peer.

use serde::{Deserialize, Serialize};

use crate::config::Capabilities;
use crate::device::VifContext;
use crate::peers::{PeerCapabilities, PeerKey, PeerTable};
use crate::proto::{mode_bits, IfType};
use crate::{FmacError, Result};

/// What happens to the raw injection pseudo-peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawPeerAction {
    Keep,
    Release,
    /// Bind the pseudo-peer to the interface
    Claim,
}

/// Interface changes implied by an operating-mode bitmap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeChange {
    /// New interface type, `None` leaves it unchanged
    pub if_type: Option<IfType>,
    pub txinjection: bool,
    pub promisc: bool,
    pub raw_peer: RawPeerAction,
}

impl ModeChange {
    fn unchanged() -> Self {
        Self {
            if_type: None,
            txinjection: false,
            promisc: false,
            raw_peer: RawPeerAction::Keep,
        }
    }
}

/// Resolve an operating-mode bitmap
///
/// Only combinations backed by an enabled capability are recognized; any
/// other remainder leaves the base station or monitor type in place.
pub fn decode_mode(op_mode: u8, caps: &Capabilities) -> ModeChange {
    if op_mode & mode_bits::STA == mode_bits::STA {
        let rest = op_mode ^ mode_bits::STA;
        let mut change = ModeChange {
            if_type: Some(IfType::Station),
            raw_peer: RawPeerAction::Release,
            ..ModeChange::unchanged()
        };

        if caps.raw_data_tx
            && caps.promisc_data_rx
            && rest == mode_bits::PROMISCUOUS | mode_bits::TX_INJECTION
        {
            change.if_type = Some(IfType::StaPromiscTxInjector);
            change.raw_peer = RawPeerAction::Claim;
            change.txinjection = true;
            change.promisc = true;
        } else if caps.raw_data_tx && rest == mode_bits::TX_INJECTION {
            change.if_type = Some(IfType::StaTxInjector);
            change.raw_peer = RawPeerAction::Claim;
            change.txinjection = true;
        } else if caps.promisc_data_rx && rest == mode_bits::PROMISCUOUS {
            change.if_type = Some(IfType::StaPromisc);
            change.promisc = true;
        }
        return change;
    }

    if caps.raw_data_rx && op_mode & mode_bits::MONITOR == mode_bits::MONITOR {
        let rest = op_mode ^ mode_bits::MONITOR;
        let mut change = ModeChange {
            if_type: Some(IfType::Monitor),
            raw_peer: RawPeerAction::Release,
            ..ModeChange::unchanged()
        };

        if caps.raw_data_tx && rest == mode_bits::TX_INJECTION {
            change.if_type = Some(IfType::MonitorTxInjector);
            change.raw_peer = RawPeerAction::Claim;
            change.txinjection = true;
        }
        return change;
    }

    ModeChange::unchanged()
}

/// Apply a MODE_SET_DONE report to an interface
pub(crate) fn apply_mode(
    vif: &mut VifContext,
    peers: &mut dyn PeerTable,
    if_idx: u8,
    op_mode: u8,
    status: i32,
    caps: &Capabilities,
) -> Result<ModeChange> {
    if status != 0 {
        log::error!("Set mode failed on interface {} (status {})", if_idx, status);
        return Err(FmacError::CommandFailed(format!(
            "mode set to {:#04x} failed with status {}",
            op_mode, status
        )));
    }

    vif.mode = op_mode;
    let change = decode_mode(op_mode, caps);
    if let Some(if_type) = change.if_type {
        vif.if_type = if_type;
    }
    vif.txinjection_mode = change.txinjection;
    vif.promisc_mode = change.promisc;

    match change.raw_peer {
        RawPeerAction::Keep => {}
        RawPeerAction::Release => {
            if let Some(peer_id) = peers.lookup(&PeerKey::RawInjection) {
                peers.remove(if_idx, peer_id);
            }
        }
        RawPeerAction::Claim => {
            if let Some(peer_id) = peers.lookup(&PeerKey::RawInjection) {
                peers.remove(if_idx, peer_id);
            }
            peers.add(if_idx, PeerKey::RawInjection, PeerCapabilities::default())?;
        }
    }

    log::info!(
        "Interface {} mode {:#04x} -> {:?}",
        if_idx,
        op_mode,
        vif.if_type
    );
    Ok(change)
}
