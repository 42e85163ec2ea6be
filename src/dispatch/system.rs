//! SYSTEM events
//!
//! Device-global events: INIT/DEINIT confirmations, statistics, radio test
//! results and the raw-mode configuration acknowledgements.

use bytes::Bytes;
use std::sync::Arc;

use crate::device::FmacDevice;
use crate::dispatch::Dispatch;
use crate::proto::SysEvent;
use crate::raw_mode;
use crate::wire::{SysHead, WireReader, SYS_HEAD_LEN};
use crate::{FmacError, Result};

impl FmacDevice {
    /// Process a SYSTEM event, `payload` starting at the system head
    pub(crate) fn process_sys_event(&mut self, payload: &[u8]) -> Result<Dispatch> {
        let head = SysHead::parse(payload)?;
        let len = head.len as usize;
        if len < SYS_HEAD_LEN || len > payload.len() {
            return Err(FmacError::MalformedMessage(format!(
                "system event length {} outside [{}, {}]",
                len,
                SYS_HEAD_LEN,
                payload.len()
            )));
        }

        let event = SysEvent::from(head.cmd_event);
        let body = &payload[..len];
        let caps = *self.capabilities();

        match event {
            SysEvent::InitDone => {
                self.fw_init_done = true;
                log::info!("Firmware initialization done");
                Ok(Dispatch::Delivered)
            }
            SysEvent::DeinitDone => {
                self.fw_deinit_done = true;
                log::info!("Firmware deinitialization done");
                Ok(Dispatch::Delivered)
            }
            SysEvent::Stats => self.stats_event(body),
            SysEvent::RfTest if caps.radio_test => self.rf_test_event(body),
            SysEvent::RadioCmdStatus if caps.radio_test => {
                let status = WireReader::at(body, SYS_HEAD_LEN)?.read_u32_le()?;
                log::debug!("Radio command status {}", status);
                self.radio_test.record_cmd_status(status);
                Ok(Dispatch::Delivered)
            }
            SysEvent::RawTxDone if caps.raw_data_tx => match &self.data_plane {
                Some(plane) => {
                    plane.raw_tx_done_event(body)?;
                    Ok(Dispatch::Delivered)
                }
                None => {
                    log::warn!("Raw TX done without a data plane");
                    Ok(Dispatch::HandlerAbsent)
                }
            },
            SysEvent::ModeSetDone if caps.raw_modes() => {
                let mut r = WireReader::at(body, SYS_HEAD_LEN)?;
                let if_idx = r.read_u8()?;
                let op_mode = r.read_u8()?;
                let status = r.read_i32_le()?;

                let vif = self
                    .vifs
                    .get_mut(if_idx as usize)
                    .and_then(|slot| slot.as_mut())
                    .ok_or_else(|| FmacError::MalformedMessage(format!("no interface {}", if_idx)))?;
                let change =
                    raw_mode::apply_mode(vif, self.peers.as_mut(), if_idx, op_mode, status, &caps)?;
                log::info!("Interface {} mode set to {:#04x}: {:?}", if_idx, op_mode, change);
                Ok(Dispatch::Delivered)
            }
            SysEvent::ChannelSetDone if caps.raw_data_tx || caps.raw_data_rx => {
                let mut r = WireReader::at(body, SYS_HEAD_LEN)?;
                let if_idx = r.read_u8()?;
                let chan = r.read_u32_le()?;
                let status = r.read_i32_le()?;

                let vif = self.require_vif(if_idx)?;
                if status == 0 {
                    vif.channel = chan;
                    log::info!("Interface {} channel set to {}", if_idx, chan);
                } else {
                    log::error!("Channel set failed on interface {} (status {})", if_idx, status);
                }
                Ok(Dispatch::Delivered)
            }
            SysEvent::FilterSetDone if caps.raw_data_rx || caps.promisc_data_rx => {
                let mut r = WireReader::at(body, SYS_HEAD_LEN)?;
                let if_idx = r.read_u8()?;
                let filter = r.read_u8()?;
                let capture_len = r.read_u16_le()?;
                let status = r.read_i32_le()?;

                let vif = self.require_vif(if_idx)?;
                if status == 0 {
                    vif.packet_filter = filter;
                    log::info!(
                        "Interface {} filter set to {:#04x} (capture length {})",
                        if_idx,
                        filter,
                        capture_len
                    );
                } else {
                    log::error!("Filter set failed on interface {} (status {})", if_idx, status);
                }
                Ok(Dispatch::Delivered)
            }
            _ => {
                log::error!("Unknown event recd: {:?}", event);
                Err(FmacError::UnknownEvent {
                    class: "system",
                    code: head.cmd_event,
                })
            }
        }
    }

    fn stats_event(&mut self, body: &[u8]) -> Result<Dispatch> {
        if !self.stats_req {
            return Err(FmacError::UnsolicitedEvent(
                "statistics received without a request".to_string(),
            ));
        }

        self.fw_stats = Some(Bytes::copy_from_slice(&body[SYS_HEAD_LEN..]));
        self.stats_req = false;
        Ok(Dispatch::Delivered)
    }

    fn rf_test_event(&mut self, body: &[u8]) -> Result<Dispatch> {
        let mut r = WireReader::at(body, SYS_HEAD_LEN)?;
        let len = r.read_u32_le()? as usize;
        let rfevent = r.read_bytes(len)?;

        let transport = Arc::clone(self.transport());
        self.radio_test.complete(rfevent, transport.as_ref())?;
        Ok(Dispatch::Delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Capabilities;
    use crate::peers::PeerKey;
    use crate::proto::{mode_bits, IfType, RfTestType};
    use crate::radio_test::RfTestResult;
    use crate::testutil::{device_with, sys_msg, RecordingDataPlane};

    fn raw_caps() -> Capabilities {
        Capabilities {
            raw_data_tx: true,
            raw_data_rx: true,
            promisc_data_rx: true,
            ..Capabilities::station()
        }
    }

    #[test]
    fn test_init_done_sets_flag() {
        let (mut dev, _transport) = device_with(Capabilities::station());
        assert!(!dev.fw_init_done());

        let msg = sys_msg(SysEvent::InitDone.code(), &[]);
        assert_eq!(dev.on_message_received(&msg).unwrap(), Dispatch::Delivered);
        assert!(dev.fw_init_done());
        assert!(!dev.fw_deinit_done());
    }

    #[test]
    fn test_unsolicited_stats_rejected() {
        let (mut dev, _transport) = device_with(Capabilities::station());
        let msg = sys_msg(SysEvent::Stats.code(), &[1, 2, 3, 4]);

        assert!(matches!(
            dev.on_message_received(&msg),
            Err(FmacError::UnsolicitedEvent(_))
        ));
        assert!(dev.fw_stats().is_none());
        assert_eq!(dev.dispatch_stats().unsolicited, 1);
    }

    #[test]
    fn test_stats_copied_once_per_request() {
        let (mut dev, _transport) = device_with(Capabilities::station());
        dev.stats_req = true;

        let msg = sys_msg(SysEvent::Stats.code(), &[1, 2, 3, 4]);
        dev.on_message_received(&msg).unwrap();
        assert_eq!(dev.fw_stats(), Some(&[1u8, 2, 3, 4][..]));
        assert!(!dev.stats_requested());

        // A repeat without a new request leaves the stored counters alone
        let msg = sys_msg(SysEvent::Stats.code(), &[9, 9, 9, 9]);
        assert!(dev.on_message_received(&msg).is_err());
        assert_eq!(dev.fw_stats(), Some(&[1u8, 2, 3, 4][..]));
    }

    #[test]
    fn test_sys_head_length_checked() {
        let (mut dev, _transport) = device_with(Capabilities::station());
        let mut msg = sys_msg(SysEvent::InitDone.code(), &[]);
        msg[16..20].copy_from_slice(&64u32.to_le_bytes());

        assert!(matches!(
            dev.on_message_received(&msg),
            Err(FmacError::MalformedMessage(_))
        ));
        assert!(!dev.fw_init_done());
    }

    #[test]
    fn test_unknown_system_event() {
        let (mut dev, _transport) = device_with(Capabilities::station());
        let msg = sys_msg(0x55, &[]);
        assert!(matches!(
            dev.on_message_received(&msg),
            Err(FmacError::UnknownEvent { class: "system", code: 0x55 })
        ));

        // Radio test events are unknown without the capability
        let msg = sys_msg(SysEvent::RfTest.code(), &[1, 0, 0, 0, 7]);
        assert!(matches!(
            dev.on_message_received(&msg),
            Err(FmacError::UnknownEvent { .. })
        ));
        assert_eq!(dev.dispatch_stats().unknown_events, 2);
    }

    fn rf_event(rfevent: &[u8]) -> Vec<u8> {
        let mut body = (rfevent.len() as u32).to_le_bytes().to_vec();
        body.extend_from_slice(rfevent);
        sys_msg(SysEvent::RfTest.code(), &body)
    }

    #[test]
    fn test_rf_test_result_matches_expected_type() {
        let (mut dev, _transport) = device_with(Capabilities::radio_test());
        dev.radio_test.expect(RfTestType::GetTemperature, 0);

        let mut rfevent = vec![RfTestType::GetTemperature.code() as u8];
        rfevent.extend_from_slice(&42i32.to_le_bytes());
        rfevent.extend_from_slice(&0u32.to_le_bytes());
        dev.on_message_received(&rf_event(&rfevent)).unwrap();

        assert_eq!(dev.radio_test().expected(), None);
        assert!(matches!(
            dev.radio_test().last_result(),
            Some(RfTestResult::Temperature { temperature: 42, .. })
        ));
    }

    #[test]
    fn test_rf_test_mismatch_keeps_expectation() {
        let (mut dev, _transport) = device_with(Capabilities::radio_test());
        dev.radio_test.expect(RfTestType::XoCalib, 0);

        let rfevent = [RfTestType::RfRssi.code() as u8, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            dev.on_message_received(&rf_event(&rfevent)),
            Err(FmacError::ProtocolMismatch { .. })
        ));
        assert_eq!(dev.radio_test().expected(), Some(RfTestType::XoCalib));
        assert!(dev.radio_test().last_result().is_none());
        assert_eq!(dev.dispatch_stats().protocol_mismatch, 1);
    }

    #[test]
    fn test_rf_test_length_beyond_event() {
        let (mut dev, _transport) = device_with(Capabilities::radio_test());
        dev.radio_test.expect(RfTestType::TxTone, 0);

        let msg = sys_msg(SysEvent::RfTest.code(), &[32, 0, 0, 0, 3]);
        assert!(matches!(
            dev.on_message_received(&msg),
            Err(FmacError::MalformedMessage(_))
        ));
        assert_eq!(dev.radio_test().expected(), Some(RfTestType::TxTone));
    }

    #[test]
    fn test_radio_cmd_status() {
        let (mut dev, _transport) = device_with(Capabilities::radio_test());
        assert!(!dev.radio_test().radio_cmd_done());

        let msg = sys_msg(SysEvent::RadioCmdStatus.code(), &5u32.to_le_bytes());
        dev.on_message_received(&msg).unwrap();
        assert!(dev.radio_test().radio_cmd_done());
        assert_eq!(dev.radio_test().radio_cmd_status(), Some(5));
    }

    #[test]
    fn test_raw_tx_done_to_data_plane() {
        let (dev, _transport) = device_with(raw_caps());
        let plane = Arc::new(RecordingDataPlane::new());
        let mut dev = dev.with_data_plane(plane.clone());

        let msg = sys_msg(SysEvent::RawTxDone.code(), &[0xAA; 4]);
        assert_eq!(dev.on_message_received(&msg).unwrap(), Dispatch::Delivered);

        let events = plane.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "raw_tx_done");
        assert_eq!(events[0].1, msg[12..].to_vec());
    }

    #[test]
    fn test_mode_set_done_updates_vif() {
        let (mut dev, _transport) = device_with(raw_caps());
        dev.add_vif(0, IfType::Station, Arc::new(())).unwrap();

        let mut body = vec![0, mode_bits::MONITOR];
        body.extend_from_slice(&0i32.to_le_bytes());
        let msg = sys_msg(SysEvent::ModeSetDone.code(), &body);
        assert_eq!(dev.on_message_received(&msg).unwrap(), Dispatch::Delivered);

        let vif = dev.vif(0).unwrap();
        assert_eq!(vif.mode, mode_bits::MONITOR);
        assert_eq!(vif.if_type, IfType::Monitor);
        assert!(dev.peers().lookup(&PeerKey::RawInjection).is_none());
    }

    #[test]
    fn test_mode_set_failure_leaves_vif() {
        let (mut dev, _transport) = device_with(raw_caps());
        dev.add_vif(0, IfType::Station, Arc::new(())).unwrap();

        let mut body = vec![0, mode_bits::MONITOR];
        body.extend_from_slice(&(-1i32).to_le_bytes());
        let msg = sys_msg(SysEvent::ModeSetDone.code(), &body);
        assert!(matches!(
            dev.on_message_received(&msg),
            Err(FmacError::CommandFailed(_))
        ));
        assert_eq!(dev.vif(0).unwrap().if_type, IfType::Station);
        assert_eq!(dev.vif(0).unwrap().mode, 0);
    }

    #[test]
    fn test_channel_and_filter_set_done() {
        let (mut dev, _transport) = device_with(raw_caps());
        dev.add_vif(1, IfType::Monitor, Arc::new(())).unwrap();

        let mut body = vec![1];
        body.extend_from_slice(&36u32.to_le_bytes());
        body.extend_from_slice(&0i32.to_le_bytes());
        dev.on_message_received(&sys_msg(SysEvent::ChannelSetDone.code(), &body))
            .unwrap();
        assert_eq!(dev.vif(1).unwrap().channel, 36);

        // Failed channel change keeps the old channel
        let mut body = vec![1];
        body.extend_from_slice(&11u32.to_le_bytes());
        body.extend_from_slice(&(-5i32).to_le_bytes());
        dev.on_message_received(&sys_msg(SysEvent::ChannelSetDone.code(), &body))
            .unwrap();
        assert_eq!(dev.vif(1).unwrap().channel, 36);

        let mut body = vec![1, 0x03];
        body.extend_from_slice(&256u16.to_le_bytes());
        body.extend_from_slice(&0i32.to_le_bytes());
        dev.on_message_received(&sys_msg(SysEvent::FilterSetDone.code(), &body))
            .unwrap();
        assert_eq!(dev.vif(1).unwrap().packet_filter, 0x03);
    }

    #[test]
    fn test_channel_set_done_requires_vif() {
        let (mut dev, _transport) = device_with(raw_caps());
        let mut body = vec![0];
        body.extend_from_slice(&6u32.to_le_bytes());
        body.extend_from_slice(&0i32.to_le_bytes());
        assert!(matches!(
            dev.on_message_received(&sys_msg(SysEvent::ChannelSetDone.code(), &body)),
            Err(FmacError::MalformedMessage(_))
        ));
    }
}
