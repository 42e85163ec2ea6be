//! Collaborator interfaces
//!
//! The bus transport that moves messages to the RPU and the data plane that
//! consumes RX/TX completions are supplied by the integrator. This module
//! defines the traits the encoder and dispatcher call into.

use bytes::Bytes;
use thiserror::Error;

/// Transport layer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Bus busy")]
    Busy,

    #[error("Transport timed out after {0} ms")]
    Timeout(u64),

    #[error("Device not attached")]
    Detached,

    #[error("Memory read at {addr:#x} ({len} bytes) failed")]
    MemRead { addr: u32, len: usize },

    #[error("Transport failure: {0}")]
    Other(String),
}

/// Bus transport to the RPU
pub trait Transport: Send + Sync {
    /// Send a complete message (outer header included) and block until
    /// the bus accepted it
    fn send(&self, msg: Bytes) -> std::result::Result<(), TransportError>;

    /// Read `len` bytes of RPU memory, used for RF test capture data
    fn read_mem(&self, addr: u32, len: usize) -> std::result::Result<Vec<u8>, TransportError> {
        let _ = addr;
        Err(TransportError::MemRead { addr, len })
    }

    /// Transport name for logging
    fn name(&self) -> &str {
        "transport"
    }
}

/// Consumer of data sub-events
///
/// Each method receives one complete sub-event, head included, exactly as
/// it was packed by firmware.
pub trait DataPlane: Send + Sync {
    /// RX buffers ready
    fn rx_event(&self, event: &[u8]) -> crate::Result<()>;

    /// TX buffers released by firmware
    fn tx_done_event(&self, event: &[u8]) -> crate::Result<()>;

    /// AP mode: a station changed power-save state
    fn ap_pm_mode_event(&self, event: &[u8]) -> crate::Result<()> {
        let _ = event;
        Ok(())
    }

    /// AP mode: a sleeping station asked for buffered frames
    fn ap_ps_get_frames_event(&self, event: &[u8]) -> crate::Result<()> {
        let _ = event;
        Ok(())
    }

    /// Raw TX completion reported through the system channel
    fn raw_tx_done_event(&self, event: &[u8]) -> crate::Result<()> {
        let _ = event;
        Ok(())
    }
}
