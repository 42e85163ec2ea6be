//! UMAC control events
//!
//! Control events are addressed to an interface through the UMAC header's
//! `wdev_id`. Most are forwarded to the handler registered for their
//! [`EventKind`]; station add/remove and interface flag confirmations also
//! update device state.

use std::sync::Arc;

use crate::callbacks::{EventContext, EventKind};
use crate::config::Capabilities;
use crate::device::{FmacDevice, RegChange};
use crate::dispatch::Dispatch;
use crate::peers::{PeerCapabilities, PeerKey};
use crate::proto::{IfType, UmacEvent};
use crate::wire::{UmacHeader, WireReader, UMAC_HDR_LEN};
use crate::{mac_to_string, FmacError, Result, ETH_ALEN};

/// Station add/remove notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StationEvent {
    pub valid_fields: u32,
    pub wme: bool,
    pub is_sta_legacy: bool,
    pub mac: [u8; ETH_ALEN],
}

impl StationEvent {
    pub fn parse(msg: &[u8]) -> Result<Self> {
        let mut r = WireReader::at(msg, UMAC_HDR_LEN)?;
        Ok(Self {
            valid_fields: r.read_u32_le()?,
            wme: r.read_u8()? != 0,
            is_sta_legacy: r.read_u8()? != 0,
            mac: r.read_array()?,
        })
    }
}

fn read_status(msg: &[u8]) -> Result<i32> {
    WireReader::at(msg, UMAC_HDR_LEN)?.read_i32_le()
}

impl FmacDevice {
    /// Process a UMAC event, `msg` starting at the UMAC header
    pub(crate) fn process_control_event(&mut self, msg: &[u8]) -> Result<Dispatch> {
        let hdr = UmacHeader::parse(msg)?;
        let if_idx = Self::check_if_idx(hdr.ids.wdev_id).map_err(|e| {
            log::error!("Invalid wdev_id recd from UMAC {}", hdr.ids.wdev_id);
            e
        })?;
        let event = UmacEvent::from(hdr.cmd_evnt);
        let more_results = hdr.seq != 0;
        let caps = *self.capabilities();

        if self.config().logging.trace_events {
            log::info!("Event {:?} received from UMAC for interface {}", event, if_idx);
        } else {
            log::debug!("Event {:?} received from UMAC for interface {}", event, if_idx);
        }

        let station = caps.station && caps.system_mode();
        match event {
            UmacEvent::GetReg | UmacEvent::RegChange => {
                self.regulatory_event(event, if_idx, msg, &caps)
            }
            UmacEvent::TriggerScanStart
            | UmacEvent::ScanDone
            | UmacEvent::ScanAborted
            | UmacEvent::ScanDisplayResult
                if caps.system_mode() =>
            {
                self.deliver(event, if_idx, msg, more_results)
            }
            UmacEvent::IfflagsStatus if caps.system_mode() => self.ifflags_status(if_idx, msg),
            _ if !station => Ok(self.ignore(event)),
            UmacEvent::NewStation | UmacEvent::DelStation => {
                self.station_event(event, if_idx, msg)
            }
            UmacEvent::CmdStatus => {
                let mut r = WireReader::at(msg, UMAC_HDR_LEN)?;
                let cmd_id = r.read_u32_le()?;
                let status = r.read_u32_le()?;
                log::debug!("Command {} status {}", cmd_id, status);
                Ok(Dispatch::Delivered)
            }
            UmacEvent::RemainOnChannel | UmacEvent::CancelRemainOnChannel if !caps.p2p => {
                Ok(self.ignore(event))
            }
            _ => self.deliver(event, if_idx, msg, more_results),
        }
    }

    fn ignore(&self, event: UmacEvent) -> Dispatch {
        log::debug!("Event {:?} not handled", event);
        Dispatch::Ignored
    }

    /// Invoke the handler registered for a UMAC event
    fn deliver(
        &mut self,
        event: UmacEvent,
        if_idx: u8,
        msg: &[u8],
        more_results: bool,
    ) -> Result<Dispatch> {
        let kind = match EventKind::from_umac(event) {
            Some(kind) => kind,
            None => return Ok(self.ignore(event)),
        };

        let os_handle = Arc::clone(&self.require_vif(if_idx)?.os_handle);
        let handler = match self.callbacks.get(kind) {
            Some(handler) => handler,
            None => {
                log::warn!("No callback registered for event {:?}", event);
                return Ok(Dispatch::HandlerAbsent);
            }
        };

        let more = more_results && matches!(kind, EventKind::ScanResult | EventKind::ScanDisplayResult);
        let ctx = EventContext::new(kind, if_idx, msg).with_more_results(more);
        handler.handle_event(&os_handle, &ctx)?;
        Ok(Dispatch::Delivered)
    }

    fn ifflags_status(&mut self, if_idx: u8, msg: &[u8]) -> Result<Dispatch> {
        let status = read_status(msg)?;
        if status < 0 {
            log::error!("Interface flags not applied on {} (status {})", if_idx, status);
            return Err(FmacError::CommandFailed(format!(
                "interface {} flags status {}",
                if_idx, status
            )));
        }

        self.require_vif(if_idx)?.ifflags = true;
        Ok(Dispatch::Delivered)
    }

    fn station_event(&mut self, event: UmacEvent, if_idx: u8, msg: &[u8]) -> Result<Dispatch> {
        let sta = StationEvent::parse(msg)?;
        let key = PeerKey::Station(sta.mac);
        let vif = self.require_vif(if_idx)?;

        if event == UmacEvent::NewStation {
            if vif.if_type == IfType::Station {
                vif.bssid = sta.mac;
            }

            if self.peers.lookup(&key).is_none() {
                let caps = PeerCapabilities {
                    wme: sta.wme,
                    is_legacy: sta.is_sta_legacy,
                };
                self.peers.add(if_idx, key, caps).map_err(|e| {
                    log::error!("Can't add new station {}: {}", mac_to_string(&sta.mac), e);
                    e
                })?;
            }
        } else {
            match self.peers.lookup(&key) {
                Some(peer_id) => self.peers.remove(if_idx, peer_id),
                None => log::debug!("Station {} not in peer table", mac_to_string(&sta.mac)),
            }
        }

        Ok(Dispatch::Delivered)
    }

    fn regulatory_event(
        &mut self,
        event: UmacEvent,
        if_idx: u8,
        msg: &[u8],
        caps: &Capabilities,
    ) -> Result<Dispatch> {
        let mut outcome = Dispatch::Ignored;

        if caps.station && caps.system_mode() {
            outcome = self.deliver(event, if_idx, msg, false)?;
        }

        if caps.radio_test {
            let mut r = WireReader::at(msg, UMAC_HDR_LEN)?;
            if event == UmacEvent::GetReg {
                self.regulatory.alpha2 = r.read_array()?;
                self.regulatory.alpha2_valid = true;
            } else {
                self.regulatory.reg_change = Some(RegChange {
                    initiator: r.read_u16_le()?,
                    reg_type: r.read_i8()?,
                    alpha2: r.read_array()?,
                    wiphy_idx: r.read_i32_le()?,
                });
                self.regulatory.reg_set_status = true;
            }
            outcome = Dispatch::Delivered;
        }

        if outcome == Dispatch::Ignored {
            log::debug!("Regulatory event {:?} not handled", event);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{device_with, recording_handler, station_body, umac_msg};
    use crate::MAX_NUM_VIFS;

    const AP_MAC: [u8; 6] = [0x10, 0x22, 0x33, 0x44, 0x55, 0x66];

    fn station_device() -> FmacDevice {
        let (mut dev, _transport) = device_with(Capabilities::station());
        dev.add_vif(0, IfType::Station, Arc::new("wlan0")).unwrap();
        dev.add_vif(1, IfType::Ap, Arc::new("wlan1")).unwrap();
        dev
    }

    #[test]
    fn test_event_resolves_addressed_vif() {
        let mut dev = station_device();
        let (calls, handler) = recording_handler();
        dev.callbacks_mut().register_arc(EventKind::ScanDone, handler);

        for if_idx in 0..MAX_NUM_VIFS as u64 {
            let msg = umac_msg(UmacEvent::ScanDone, if_idx, 0, &[]);
            assert_eq!(dev.on_message_received(&msg).unwrap(), Dispatch::Delivered);
        }

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), MAX_NUM_VIFS);
        assert_eq!(calls[0].handle.as_deref(), Some("wlan0"));
        assert_eq!(calls[1].handle.as_deref(), Some("wlan1"));
    }

    #[test]
    fn test_out_of_range_vif_rejected() {
        let mut dev = station_device();
        let (calls, handler) = recording_handler();
        dev.callbacks_mut().register_arc(EventKind::ScanDone, handler);

        for if_idx in [MAX_NUM_VIFS as u64, 7, 0x1_0000_0000] {
            let msg = umac_msg(UmacEvent::ScanDone, if_idx, 0, &[]);
            assert!(matches!(
                dev.on_message_received(&msg),
                Err(FmacError::MalformedMessage(_))
            ));
        }
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(dev.dispatch_stats().malformed, 3);
    }

    #[test]
    fn test_missing_vif_rejected() {
        let (mut dev, _transport) = device_with(Capabilities::station());
        let (calls, handler) = recording_handler();
        dev.callbacks_mut().register_arc(EventKind::ScanDone, handler);

        let msg = umac_msg(UmacEvent::ScanDone, 1, 0, &[]);
        assert!(matches!(
            dev.on_message_received(&msg),
            Err(FmacError::MalformedMessage(_))
        ));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_same_message_twice_gives_identical_calls() {
        let mut dev = station_device();
        let (calls, handler) = recording_handler();
        dev.callbacks_mut().register_arc(EventKind::MgmtRx, handler);

        let msg = umac_msg(UmacEvent::Frame, 0, 0, &[0xD0, 0x00, 0x3A, 0x01]);
        let before = msg.clone();
        dev.on_message_received(&msg).unwrap();
        dev.on_message_received(&msg).unwrap();
        assert_eq!(msg, before);

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], calls[1]);
        assert_eq!(calls[0].data, msg[12..].to_vec());
    }

    #[test]
    fn test_more_results_flag() {
        let mut dev = station_device();
        let (calls, handler) = recording_handler();
        dev.callbacks_mut().register_arc(EventKind::ScanResult, handler.clone());
        dev.callbacks_mut().register_arc(EventKind::ScanStart, handler);

        dev.on_message_received(&umac_msg(UmacEvent::ScanResult, 0, 3, &[1]))
            .unwrap();
        dev.on_message_received(&umac_msg(UmacEvent::ScanResult, 0, 0, &[2]))
            .unwrap();
        dev.on_message_received(&umac_msg(UmacEvent::TriggerScanStart, 0, 5, &[]))
            .unwrap();

        let more: Vec<bool> = calls.lock().unwrap().iter().map(|c| c.more).collect();
        assert_eq!(more, vec![true, false, false]);
    }

    #[test]
    fn test_handler_absent_is_not_an_error() {
        let mut dev = station_device();
        let msg = umac_msg(UmacEvent::Authenticate, 0, 0, &[]);
        assert_eq!(dev.on_message_received(&msg).unwrap(), Dispatch::HandlerAbsent);
        assert_eq!(dev.dispatch_stats().handler_absent, 1);
        assert_eq!(dev.dispatch_stats().errors(), 0);
    }

    #[test]
    fn test_unknown_event_not_routed_to_any_handler() {
        let mut dev = station_device();
        let (calls, handler) = recording_handler();
        for kind in EventKind::ALL {
            dev.callbacks_mut().register_arc(kind, handler.clone());
        }

        let mut msg = umac_msg(UmacEvent::ScanDone, 0, 0, &[]);
        msg[16..20].copy_from_slice(&0x7777u32.to_le_bytes());
        assert_eq!(dev.on_message_received(&msg).unwrap(), Dispatch::Ignored);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_new_then_del_station_restores_peer_table() {
        let mut dev = station_device();
        let body = station_body(&AP_MAC, true, false);

        let msg = umac_msg(UmacEvent::NewStation, 0, 0, &body);
        dev.on_message_received(&msg).unwrap();
        assert_eq!(dev.peers().len(), 1);
        assert_eq!(dev.vif(0).unwrap().bssid, AP_MAC);

        // Second NEW for the same MAC does not add another entry
        dev.on_message_received(&msg).unwrap();
        assert_eq!(dev.peers().len(), 1);

        let msg = umac_msg(UmacEvent::DelStation, 0, 0, &body);
        dev.on_message_received(&msg).unwrap();
        assert!(dev.peers().is_empty());
        assert_eq!(dev.peers().lookup(&PeerKey::Station(AP_MAC)), None);
    }

    #[test]
    fn test_del_unknown_station_is_noop() {
        let mut dev = station_device();
        let body = station_body(&AP_MAC, false, false);
        let msg = umac_msg(UmacEvent::DelStation, 0, 0, &body);

        assert_eq!(dev.on_message_received(&msg).unwrap(), Dispatch::Delivered);
        assert!(dev.peers().is_empty());
    }

    #[test]
    fn test_new_station_on_ap_keeps_bssid() {
        let mut dev = station_device();
        let body = station_body(&AP_MAC, true, true);
        dev.on_message_received(&umac_msg(UmacEvent::NewStation, 1, 0, &body))
            .unwrap();

        assert_eq!(dev.vif(1).unwrap().bssid, [0; 6]);
        assert_eq!(dev.peers().len(), 1);
    }

    #[test]
    fn test_ifflags_status() {
        let mut dev = station_device();

        let msg = umac_msg(UmacEvent::IfflagsStatus, 0, 0, &(-22i32).to_le_bytes());
        assert!(matches!(
            dev.on_message_received(&msg),
            Err(FmacError::CommandFailed(_))
        ));
        assert!(!dev.vif(0).unwrap().ifflags);

        let msg = umac_msg(UmacEvent::IfflagsStatus, 0, 0, &0i32.to_le_bytes());
        assert_eq!(dev.on_message_received(&msg).unwrap(), Dispatch::Delivered);
        assert!(dev.vif(0).unwrap().ifflags);
    }

    #[test]
    fn test_cmd_status_is_log_only() {
        let mut dev = station_device();
        let body = [4u32.to_le_bytes(), 0u32.to_le_bytes()].concat();
        let msg = umac_msg(UmacEvent::CmdStatus, 0, 0, &body);
        assert_eq!(dev.on_message_received(&msg).unwrap(), Dispatch::Delivered);
        assert!(dev.peers().is_empty());
    }

    #[test]
    fn test_roc_requires_p2p() {
        let mut dev = station_device();
        let (calls, handler) = recording_handler();
        dev.callbacks_mut().register_arc(EventKind::RocStart, handler);

        let msg = umac_msg(UmacEvent::RemainOnChannel, 0, 0, &[]);
        assert_eq!(dev.on_message_received(&msg).unwrap(), Dispatch::Ignored);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_radio_test_stores_regulatory_events() {
        let (mut dev, _transport) = device_with(Capabilities::radio_test());

        let msg = umac_msg(UmacEvent::GetReg, 0, 0, b"DE");
        assert_eq!(dev.on_message_received(&msg).unwrap(), Dispatch::Delivered);
        assert_eq!(&dev.regulatory().alpha2, b"DE");
        assert!(dev.regulatory().alpha2_valid);

        let mut body = vec![];
        body.extend_from_slice(&3u16.to_le_bytes());
        body.push(1);
        body.extend_from_slice(b"US");
        body.extend_from_slice(&0i32.to_le_bytes());
        let msg = umac_msg(UmacEvent::RegChange, 0, 0, &body);
        dev.on_message_received(&msg).unwrap();

        let change = dev.regulatory().reg_change.unwrap();
        assert_eq!(change.initiator, 3);
        assert_eq!(change.reg_type, 1);
        assert_eq!(&change.alpha2, b"US");
        assert!(dev.regulatory().reg_set_status);
    }

    #[test]
    fn test_radio_test_ignores_station_events() {
        let (mut dev, _transport) = device_with(Capabilities::radio_test());
        let body = station_body(&AP_MAC, true, false);
        let msg = umac_msg(UmacEvent::NewStation, 0, 0, &body);
        assert_eq!(dev.on_message_received(&msg).unwrap(), Dispatch::Ignored);
        assert!(dev.peers().is_empty());
    }

    #[test]
    fn test_station_forwards_regulatory_events() {
        let mut dev = station_device();
        let (calls, handler) = recording_handler();
        dev.callbacks_mut().register_arc(EventKind::RegChange, handler);

        let msg = umac_msg(UmacEvent::RegChange, 0, 0, &[0; 9]);
        assert_eq!(dev.on_message_received(&msg).unwrap(), Dispatch::Delivered);
        assert_eq!(calls.lock().unwrap()[0].kind, EventKind::RegChange);
        assert!(dev.regulatory().reg_change.is_none());
    }
}
