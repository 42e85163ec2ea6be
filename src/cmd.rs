//! Command encoder
//!
//! Every outbound message is allocated zeroed, framed with the outer header
//! and handed to the transport in one blocking send. Nothing but INIT and
//! DEINIT may be sent before firmware confirmed INIT.

use bytes::Bytes;

use crate::device::FmacDevice;
use crate::init::{InitParams, SysInitBody, INIT_BODY_LEN};
use crate::proto::{RfTestType, StatsType, SysCommand};
use crate::radio_test::CAPTURE_SAMPLE_BYTES;
use crate::wire::{
    build_message, MessageType, SysHead, UmacHeader, WireReader, WireWriter, SYS_HEAD_LEN,
    UMAC_HDR_LEN,
};
use crate::{FmacError, Result};

/// Command code carried at the start of a payload
fn command_code(msg_type: MessageType, payload: &[u8]) -> Result<u32> {
    match msg_type {
        MessageType::System => WireReader::new(payload).read_u32_le(),
        MessageType::Umac => WireReader::at(payload, 4)?.read_u32_le(),
        _ => Ok(0),
    }
}

/// Commands accepted before firmware confirmed INIT
fn is_bringup(msg_type: MessageType, command: u32) -> bool {
    msg_type == MessageType::System
        && (command == SysCommand::Init.code() || command == SysCommand::Deinit.code())
}

impl FmacDevice {
    /// Frame `payload` and send it to the RPU
    ///
    /// The payload is copied verbatim after the outer header. Before INIT
    /// completed only INIT and DEINIT are accepted; anything else fails with
    /// `NotReady` before a buffer is allocated.
    pub fn encode_and_send(&self, msg_type: MessageType, payload: &[u8]) -> Result<()> {
        let command = command_code(msg_type, payload)?;
        if !self.fw_init_done && !is_bringup(msg_type, command) {
            log::error!(
                "Command {} ({:?}) issued before firmware initialization",
                command,
                msg_type
            );
            return Err(FmacError::NotReady { command });
        }

        self.trace_command(msg_type, command);
        let msg = build_message(self.allocator(), msg_type, payload.len(), |w| {
            w.write_bytes(payload)
        })?;
        self.send(msg)
    }

    /// Send a UMAC command built from `header` and `body`
    pub fn umac_cmd(&self, header: &UmacHeader, body: &[u8]) -> Result<()> {
        if !self.fw_init_done {
            log::error!("UMAC command {} issued before firmware initialization", header.cmd_evnt);
            return Err(FmacError::NotReady {
                command: header.cmd_evnt,
            });
        }

        self.trace_command(MessageType::Umac, header.cmd_evnt);
        let msg = build_message(
            self.allocator(),
            MessageType::Umac,
            UMAC_HDR_LEN + body.len(),
            |w| {
                header.write(w)?;
                w.write_bytes(body)
            },
        )?;
        self.send(msg)
    }

    /// Send INIT built from `params`, the capabilities and the init policy
    pub fn init(&self, params: &InitParams) -> Result<()> {
        let body = SysInitBody::build(params, self.capabilities(), &self.config().init)?;

        self.trace_command(MessageType::System, SysCommand::Init.code());
        let msg = build_message(self.allocator(), MessageType::System, INIT_BODY_LEN, |w| {
            body.write(w)
        })?;
        self.send(msg)
    }

    pub fn deinit(&self) -> Result<()> {
        self.send_sys_cmd(SysCommand::Deinit, 0, |_| Ok(()))
    }

    /// Configure the SR coexistence hardware
    pub fn srcoex(&self, cmd: &[u8]) -> Result<()> {
        self.send_sys_cmd(SysCommand::Srcoex, 4 + cmd.len(), |w| {
            w.write_u32_le(cmd.len() as u32)?;
            w.write_bytes(cmd)
        })
    }

    /// Configure HE guard interval and LTF; the values are only written when
    /// `enable` is set
    pub fn he_ltf_gi(&self, he_gi_type: u8, he_ltf: u8, enable: bool) -> Result<()> {
        self.send_sys_cmd(SysCommand::HeGiLtfConfig, 3, |w| {
            if enable {
                w.write_u8(he_gi_type)?;
                w.write_u8(he_ltf)?;
            } else {
                w.skip(2)?;
            }
            w.write_u8(enable as u8)
        })
    }

    /// Enter radio test mode with a caller-built configuration
    pub fn radio_test_init(&self, config: &[u8]) -> Result<()> {
        self.send_sys_cmd(SysCommand::RadioTestInit, config.len(), |w| w.write_bytes(config))
    }

    /// Program continuous TX (radio test)
    pub fn prog_tx(&self, config: &[u8]) -> Result<()> {
        self.send_sys_cmd(SysCommand::Tx, config.len(), |w| w.write_bytes(config))
    }

    /// Program RX (radio test)
    pub fn prog_rx(&self, config: &[u8]) -> Result<()> {
        self.send_sys_cmd(SysCommand::Rx, config.len(), |w| w.write_bytes(config))
    }

    /// Send an RF test command; `rfcmd[0]` is the test type
    pub fn rf_test(&self, rfcmd: &[u8]) -> Result<()> {
        self.send_sys_cmd(SysCommand::RfTest, 4 + rfcmd.len(), |w| {
            w.write_u32_le(rfcmd.len() as u32)?;
            w.write_bytes(rfcmd)
        })
    }

    pub fn stats_get(&self, stats_type: StatsType, op_mode: i32) -> Result<()> {
        let radio_test = self.capabilities().radio_test;
        let len = if radio_test { 8 } else { 4 };
        self.send_sys_cmd(SysCommand::GetStats, len, |w| {
            w.write_i32_le(stats_type as i32)?;
            if radio_test {
                w.write_i32_le(op_mode)?;
            }
            Ok(())
        })
    }

    pub fn stats_reset(&self) -> Result<()> {
        self.send_sys_cmd(SysCommand::ResetStatistics, 0, |_| Ok(()))
    }

    /// Configure offloaded raw TX with caller-built parameters
    pub fn offload_raw_tx_conf(&self, params: &[u8]) -> Result<()> {
        self.send_sys_cmd(SysCommand::OffloadRawTxParams, params.len(), |w| {
            w.write_bytes(params)
        })
    }

    pub fn offload_raw_tx_ctrl(&self, ctrl_type: u8) -> Result<()> {
        self.send_sys_cmd(SysCommand::OffloadRawTxCtrl, 1, |w| w.write_u8(ctrl_type))
    }

    /// Request an operating mode; confirmed by MODE_SET_DONE
    pub fn raw_config_mode(&self, if_index: u8, op_mode: u8) -> Result<()> {
        self.send_sys_cmd(SysCommand::RawConfigMode, 2, |w| {
            w.write_u8(if_index)?;
            w.write_u8(op_mode)
        })
    }

    /// Switch channel; confirmed by CHANNEL_SET_DONE
    pub fn channel_set(&self, if_index: u8, chan: u32) -> Result<()> {
        self.send_sys_cmd(SysCommand::Channel, 5, |w| {
            w.write_u8(if_index)?;
            w.write_u32_le(chan)
        })
    }

    /// Set the packet filter; confirmed by FILTER_SET_DONE
    pub fn filter_set(&self, if_index: u8, filter: u8, capture_len: u16) -> Result<()> {
        self.send_sys_cmd(SysCommand::RawConfigFilter, 4, |w| {
            w.write_u8(if_index)?;
            w.write_u8(filter)?;
            w.write_u16_le(capture_len)
        })
    }

    /// Request statistics, expecting a STATS event
    pub fn request_stats(&mut self, stats_type: StatsType, op_mode: i32) -> Result<()> {
        self.stats_req = true;
        self.stats_get(stats_type, op_mode).map_err(|e| {
            self.stats_req = false;
            e
        })
    }

    /// Start an RF test, expecting an RF_TEST event of the same type
    pub fn start_rf_test(&mut self, rfcmd: &[u8]) -> Result<()> {
        let test = match rfcmd.first() {
            Some(&test) => RfTestType::from(test as u32),
            None => return Err(FmacError::CommandFailed("empty RF test command".to_string())),
        };
        self.issue_rf_test(test, rfcmd, 0)
    }

    /// Start an RF capture of `num_samples` samples
    pub fn start_rf_capture(&mut self, rfcmd: &[u8], num_samples: usize) -> Result<()> {
        let test = match rfcmd.first() {
            Some(&test) => RfTestType::from(test as u32),
            None => return Err(FmacError::CommandFailed("empty RF test command".to_string())),
        };
        if !test.is_capture() {
            return Err(FmacError::CommandFailed(format!(
                "{:?} is not a capture test",
                test
            )));
        }
        self.issue_rf_test(test, rfcmd, num_samples * CAPTURE_SAMPLE_BYTES)
    }

    fn issue_rf_test(&mut self, test: RfTestType, rfcmd: &[u8], capture_len: usize) -> Result<()> {
        self.radio_test.expect(test, capture_len);
        self.rf_test(rfcmd).map_err(|e| {
            self.radio_test.cancel();
            e
        })
    }

    fn send_sys_cmd<F>(&self, cmd: SysCommand, body_len: usize, fill: F) -> Result<()>
    where
        F: FnOnce(&mut WireWriter) -> Result<()>,
    {
        if !self.fw_init_done && !is_bringup(MessageType::System, cmd.code()) {
            log::error!("Command {:?} issued before firmware initialization", cmd);
            return Err(FmacError::NotReady {
                command: cmd.code(),
            });
        }

        self.trace_command(MessageType::System, cmd.code());
        let len = SYS_HEAD_LEN + body_len;
        let msg = build_message(self.allocator(), MessageType::System, len, |w| {
            SysHead {
                cmd_event: cmd.code(),
                len: len as u32,
            }
            .write(w)?;
            fill(w)
        })?;
        self.send(msg)
    }

    fn trace_command(&self, msg_type: MessageType, command: u32) {
        if self.config().logging.trace_events {
            log::info!("Sending {:?} command {}", msg_type, command);
        } else {
            log::debug!("Sending {:?} command {}", msg_type, command);
        }
    }

    fn send(&self, msg: Bytes) -> Result<()> {
        let len = msg.len();
        self.transport().send(msg).map_err(|e| {
            log::error!("{} failed to send {} byte message: {}", self.transport().name(), len, e);
            FmacError::Transport(e)
        })
    }
}
