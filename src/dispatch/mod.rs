//! Inbound message dispatch
//!
//! [`FmacDevice::on_message_received`] is the single entry point for
//! messages delivered by the transport. The outer header selects the
//! handling path:
//! - DATA messages carry packed sub-events walked in [`data`]
//! - UMAC messages carry per-interface control events handled in [`control`]
//! - SYSTEM messages carry device-global events handled in [`system`]
//!
//! Failures are contained per message: they are logged, counted and
//! returned, and leave the device ready for the next message.

pub mod control;
pub mod data;
pub mod deferred;
pub mod system;

use serde::{Deserialize, Serialize};

use crate::device::FmacDevice;
use crate::wire::{MessageType, RpuMsgHeader, RPU_MSG_HDR_LEN};
use crate::{FmacError, Result};

/// Outcome of dispatching one message or sub-event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dispatch {
    /// A handler ran or device state was updated
    Delivered,
    /// Recognized event without a registered handler
    HandlerAbsent,
    /// Event unknown or not enabled by the capability set
    Ignored,
    /// Queued for the deferred worker
    Deferred,
    /// Message class not processed by this device
    Dropped,
}

/// Dispatcher counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    /// Messages received
    pub messages: u64,
    pub system_events: u64,
    pub umac_events: u64,
    pub data_messages: u64,
    pub data_sub_events: u64,
    /// Outcomes
    pub delivered: u64,
    pub handler_absent: u64,
    pub ignored: u64,
    pub deferred: u64,
    pub dropped: u64,
    /// Errors by class
    pub malformed: u64,
    pub unsolicited: u64,
    pub protocol_mismatch: u64,
    pub unknown_events: u64,
    pub failures: u64,
}

impl DispatchStats {
    /// Count an outcome
    pub fn record(&mut self, outcome: Dispatch) {
        match outcome {
            Dispatch::Delivered => self.delivered += 1,
            Dispatch::HandlerAbsent => self.handler_absent += 1,
            Dispatch::Ignored => self.ignored += 1,
            Dispatch::Deferred => self.deferred += 1,
            Dispatch::Dropped => self.dropped += 1,
        }
    }

    /// Count a failed message
    pub fn record_error(&mut self, err: &FmacError) {
        match err {
            FmacError::MalformedMessage(_) => self.malformed += 1,
            FmacError::UnsolicitedEvent(_) => self.unsolicited += 1,
            FmacError::ProtocolMismatch { .. } => self.protocol_mismatch += 1,
            FmacError::UnknownEvent { .. } => self.unknown_events += 1,
            _ => self.failures += 1,
        }
    }

    /// Total failed messages
    pub fn errors(&self) -> u64 {
        self.malformed + self.unsolicited + self.protocol_mismatch + self.unknown_events + self.failures
    }
}

impl FmacDevice {
    /// Process one message delivered by the transport
    ///
    /// `buf` starts at the outer header; bytes past the declared length are
    /// ignored. The input buffer is never modified.
    pub fn on_message_received(&mut self, buf: &[u8]) -> Result<Dispatch> {
        self.stats.messages += 1;

        match self.classify(buf) {
            Ok(outcome) => {
                self.stats.record(outcome);
                Ok(outcome)
            }
            Err(e) => {
                log::error!("Failed to process event: {}", e);
                self.stats.record_error(&e);
                Err(e)
            }
        }
    }

    fn classify(&mut self, buf: &[u8]) -> Result<Dispatch> {
        let header = RpuMsgHeader::parse(buf)?;
        let len = header.len as usize;
        if len < RPU_MSG_HDR_LEN || len > buf.len() {
            return Err(FmacError::MalformedMessage(format!(
                "declared length {} outside [{}, {}]",
                len,
                RPU_MSG_HDR_LEN,
                buf.len()
            )));
        }

        if self.config().logging.trace_events {
            log::info!("Event type {:?} recd", header.msg_type);
        } else {
            log::debug!("Event type {:?} recd", header.msg_type);
        }

        let payload = &buf[RPU_MSG_HDR_LEN..len];
        match header.msg_type {
            MessageType::Data if self.capabilities().system_mode() => {
                self.stats.data_messages += 1;
                self.process_data_events(payload)
            }
            MessageType::Umac => {
                self.stats.umac_events += 1;
                self.process_control_event(payload)
            }
            MessageType::System => {
                self.stats.system_events += 1;
                self.process_sys_event(payload)
            }
            _ => Ok(Dispatch::Dropped),
        }
    }
}
