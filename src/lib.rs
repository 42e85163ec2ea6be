//! # RPU FMAC host interface
//!
//! Host-side command encoder and event dispatcher for split-MAC Wi-Fi radios
//! (nRF70-class "RPU" companion processors). The host issues MAC/PHY control
//! operations as fixed-layout binary commands and receives asynchronous
//! events that are routed to per-interface callbacks or applied directly to
//! device state.
//!
//! ## Architecture
//!
//! The implementation is organized into several modules:
//! - `wire`: Message framing, little-endian reader/writer and buffer allocation
//! - `proto`: Command, event and interface-type enumerations shared with firmware
//! - `init`: The INIT command body and its structured parameters
//! - `config`: Capability set, init policy and configuration file handling
//! - `transport`: Collaborator traits for the bus transport and the data plane
//! - `peers`: Peer table used by station add/remove and raw injection
//! - `callbacks`: Event kinds and the per-device handler registry
//! - `device`: Device and virtual interface contexts
//! - `cmd`: Command encoder
//! - `dispatch`: Inbound message classification and event dispatch
//! - `radio_test`: RF test result decoding
//! - `raw_mode`: Raw/monitor operating mode decoding

pub mod callbacks;
pub mod cmd;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod init;
pub mod peers;
pub mod proto;
pub mod radio_test;
pub mod raw_mode;
pub mod transport;
pub mod wire;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types
pub use crate::{
    callbacks::{CallbackTable, CarrierState, EventContext, EventHandler, EventKind},
    config::{Capabilities, ConfigManager, DeliveryPolicy, FmacConfig},
    device::{FmacDevice, OsVifHandle, VifContext},
    dispatch::{Dispatch, DispatchStats},
    init::InitParams,
    peers::{PeerKey, PeerManager, PeerTable},
    proto::*,
    transport::{DataPlane, Transport, TransportError},
    wire::{HeapAllocator, MessageAllocator, MessageType},
};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FmacError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Message allocation failed")]
    AllocationFailed,

    #[error("Firmware not initialized, cannot send command {command}")]
    NotReady { command: u32 },

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Unsolicited event: {0}")]
    UnsolicitedEvent(String),

    #[error("Protocol mismatch: expected {expected}, received {received}")]
    ProtocolMismatch { expected: String, received: String },

    #[error("Unknown {class} event {code}")]
    UnknownEvent { class: &'static str, code: u32 },

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Deferred delivery error: {0}")]
    Deferred(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, FmacError>;

// Constants
pub const MAX_NUM_VIFS: usize = 2;
pub const MAX_PEERS: usize = 5;
pub const COUNTRY_CODE_LEN: usize = 2;
pub const ETH_ALEN: usize = 6;
pub const RF_PARAMS_SIZE: usize = 200;

// Utility functions
pub fn init_logging() {
    env_logger::init();
}

/// Format a MAC address for log output
pub fn mac_to_string(mac: &[u8; ETH_ALEN]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}
