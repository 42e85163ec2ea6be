//! DATA message sub-events
//!
//! A DATA payload packs sub-events back to back, each starting with a
//! [`DataEventHead`] whose length covers the head. The whole sequence is
//! validated before the first sub-event is processed, so a malformed tail
//! never leaves earlier sub-events half-applied.

use std::sync::Arc;

use crate::callbacks::{CarrierState, EventContext, EventKind};
use crate::config::DeliveryPolicy;
use crate::device::FmacDevice;
use crate::dispatch::deferred::{hand_off, DeferredKind};
use crate::dispatch::Dispatch;
use crate::proto::DataEvent;
use crate::wire::{DataEventHead, WireReader, DATA_EVENT_HEAD_LEN};
use crate::{FmacError, Result};

/// Carrier sub-event: offset of the interface id
const CARRIER_WDEV_ID: usize = DATA_EVENT_HEAD_LEN;

/// Split a DATA payload into its sub-events
///
/// The walk ends exactly at the end of `payload`; a sub-event shorter than
/// its head or running past the payload rejects the whole message.
pub fn split_data_events(payload: &[u8]) -> Result<Vec<(DataEventHead, &[u8])>> {
    let mut events = Vec::new();
    let mut offset = 0;

    while offset < payload.len() {
        let head = DataEventHead::parse(&payload[offset..])?;
        let len = head.len as usize;
        if len < DATA_EVENT_HEAD_LEN {
            return Err(FmacError::MalformedMessage(format!(
                "data sub-event {} at offset {} declares length {}",
                head.cmd, offset, len
            )));
        }

        let end = offset
            .checked_add(len)
            .filter(|end| *end <= payload.len())
            .ok_or_else(|| {
                FmacError::MalformedMessage(format!(
                    "data sub-event {} at offset {} ({} bytes) overruns payload of {}",
                    head.cmd,
                    offset,
                    len,
                    payload.len()
                ))
            })?;

        events.push((head, &payload[offset..end]));
        offset = end;
    }

    Ok(events)
}

/// Precedence of sub-event outcomes when summarizing a message
fn rank(outcome: Dispatch) -> u8 {
    match outcome {
        Dispatch::Delivered => 4,
        Dispatch::Deferred => 3,
        Dispatch::HandlerAbsent => 2,
        Dispatch::Ignored => 1,
        Dispatch::Dropped => 0,
    }
}

impl FmacDevice {
    /// Process every sub-event of a DATA payload in packing order
    pub(crate) fn process_data_events(&mut self, payload: &[u8]) -> Result<Dispatch> {
        let events = split_data_events(payload)?;
        let mut summary = Dispatch::Ignored;

        for (head, event) in events {
            self.stats.data_sub_events += 1;
            let outcome = self.process_data_event(head, event).map_err(|e| {
                log::error!("Failed for data event = {}", head.cmd);
                e
            })?;
            if rank(outcome) > rank(summary) {
                summary = outcome;
            }
        }

        Ok(summary)
    }

    fn process_data_event(&mut self, head: DataEventHead, event: &[u8]) -> Result<Dispatch> {
        let caps = *self.capabilities();
        let code = DataEvent::from(head.cmd);
        log::debug!("Data event {:?} recd ({} bytes)", code, head.len);

        match code {
            DataEvent::RxBuff => self.deliver_data(DeferredKind::Rx, event),
            DataEvent::TxBuffDone if caps.data_tx => self.deliver_data(DeferredKind::TxDone, event),
            DataEvent::CarrierOn if caps.data_tx => self.carrier_event(event, CarrierState::On),
            DataEvent::CarrierOff if caps.data_tx => self.carrier_event(event, CarrierState::Off),
            DataEvent::PmMode if caps.ap => match self.data_plane.clone() {
                Some(plane) => plane.ap_pm_mode_event(event).map(|_| Dispatch::Delivered),
                None => Ok(Dispatch::HandlerAbsent),
            },
            DataEvent::PsGetFrames if caps.ap => match self.data_plane.clone() {
                Some(plane) => plane
                    .ap_ps_get_frames_event(event)
                    .map(|_| Dispatch::Delivered),
                None => Ok(Dispatch::HandlerAbsent),
            },
            other => {
                log::debug!("Ignoring data event {:?}", other);
                Ok(Dispatch::Ignored)
            }
        }
    }

    fn deliver_data(&mut self, kind: DeferredKind, event: &[u8]) -> Result<Dispatch> {
        let plane = match self.data_plane.clone() {
            Some(plane) => plane,
            None => {
                log::warn!("No data plane attached, dropping {:?} event", kind);
                return Ok(Dispatch::HandlerAbsent);
            }
        };

        let policy = match kind {
            DeferredKind::Rx => self.config().delivery.rx,
            DeferredKind::TxDone => self.config().delivery.tx_done,
        };

        match policy {
            DeliveryPolicy::Inline => {
                hand_off(plane.as_ref(), kind, event)?;
                Ok(Dispatch::Delivered)
            }
            DeliveryPolicy::Deferred => {
                self.deferred.get(kind).enqueue(event)?;
                Ok(Dispatch::Deferred)
            }
        }
    }

    fn carrier_event(&mut self, event: &[u8], state: CarrierState) -> Result<Dispatch> {
        let handler = match self.callbacks.get(EventKind::CarrierState) {
            Some(handler) => handler,
            None => {
                log::debug!("No carrier state callback registered");
                return Ok(Dispatch::HandlerAbsent);
            }
        };

        let wdev_id = WireReader::at(event, CARRIER_WDEV_ID)?.read_u32_le()?;
        let if_idx = Self::check_if_idx(wdev_id as u64)?;
        let vif = self.require_vif(if_idx)?;
        let os_handle = Arc::clone(&vif.os_handle);

        let ctx = EventContext::new(EventKind::CarrierState, if_idx, event).with_carrier(state);
        handler.handle_event(&os_handle, &ctx).map_err(|e| {
            log::error!("Carrier {:?} callback failed on interface {}: {}", state, if_idx, e);
            e
        })?;
        Ok(Dispatch::Delivered)
    }
}
