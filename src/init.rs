//! INIT command body
//!
//! The INIT command carries the largest fixed-layout structure sent to the
//! RPU. Every field sits at a fixed little-endian offset:
//!
//! | off | field                    | off | field                   |
//! |-----|--------------------------|-----|-------------------------|
//! | 0   | sys_head.cmd_event (u32) | 266 | temp_vbat config (33)   |
//! | 4   | sys_head.len (u32)       | 299 | country_code [2]        |
//! | 8   | wdev_id (u32)            | 301 | op_band (u32)           |
//! | 12  | sleep_enable (u32)       | 305 | tcp_ip_checksum_offload |
//! | 16  | hw_bringup_time (u32)    | 306 | mgmt_buff_offload       |
//! | 20  | sw_bringup_time (u32)    | 307 | feature_flags (u32)     |
//! | 24  | bcn_time_out (u32)       | 311 | disable_beamforming     |
//! | 28  | calib_sleep_clk (u32)    | 315 | discon_timeout (u32)    |
//! | 32  | phy_calib (u32)          | 319 | display_scan_bss_limit  |
//! | 36  | mac_addr [6]             | 320 | watchdog_timer_val      |
//! | 42  | rf_params [200]          | 324 | keep_alive_enable       |
//! | 242 | rf_params_valid (u8)     | 325 | keep_alive_period (u32) |
//! | 243 | rx_buf_pools [3 x 4]     | 329 | ps_exit_strategy (u8)   |
//! | 255 | data_config (11)         |     |                         |

use serde::{Deserialize, Serialize};

use crate::config::{Capabilities, InitPolicy, TempVbatPolicy};
use crate::proto::{feature_flags, SysCommand};
use crate::wire::{SysHead, WireReader, WireWriter, SYS_HEAD_LEN};
use crate::{FmacError, Result, COUNTRY_CODE_LEN, ETH_ALEN, RF_PARAMS_SIZE};

/// Encoded INIT body length, system head included
pub const INIT_BODY_LEN: usize = 330;

/// Number of RX buffer pools
pub const NUM_RX_BUF_POOLS: usize = 3;

/// Field offsets within the INIT body
pub mod offsets {
    pub const WDEV_ID: usize = 8;
    pub const SYS_PARAMS: usize = 12;
    pub const PHY_CALIB: usize = 32;
    pub const MAC_ADDR: usize = 36;
    pub const RF_PARAMS: usize = 42;
    pub const RF_PARAMS_VALID: usize = 242;
    pub const RX_BUF_POOLS: usize = 243;
    pub const DATA_CONFIG: usize = 255;
    pub const TEMP_VBAT: usize = 266;
    pub const COUNTRY_CODE: usize = 299;
    pub const OP_BAND: usize = 301;
    pub const TCP_IP_CHECKSUM_OFFLOAD: usize = 305;
    pub const MGMT_BUFF_OFFLOAD: usize = 306;
    pub const FEATURE_FLAGS: usize = 307;
    pub const DISABLE_BEAMFORMING: usize = 311;
    pub const DISCON_TIMEOUT: usize = 315;
    pub const DISPLAY_SCAN_BSS_LIMIT: usize = 319;
    pub const WATCHDOG_TIMER_VAL: usize = 320;
    pub const KEEP_ALIVE_ENABLE: usize = 324;
    pub const KEEP_ALIVE_PERIOD: usize = 325;
    pub const PS_EXIT_STRATEGY: usize = 329;
}

/// Board sub-table offsets within `rf_params`
pub mod rf_offsets {
    pub const EDGE_BACKOFF: usize = 152;
    pub const NUM_EDGE_BACKOFF: usize = 33;
    pub const PCB_LOSS: usize = 185;
    pub const NUM_PCB_LOSS: usize = 4;
    pub const ANT_GAIN: usize = 189;
    pub const NUM_ANT_GAIN: usize = 4;
}

/// Number of 5 GHz sub-band edges with backoff entries
pub const NUM_5G_BAND_EDGES: usize = 9;

/// Raw PHY RF parameter table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RfParams(pub [u8; RF_PARAMS_SIZE]);

impl Default for RfParams {
    fn default() -> Self {
        Self([0; RF_PARAMS_SIZE])
    }
}

impl RfParams {
    /// Parse from a byte slice of exactly `RF_PARAMS_SIZE` bytes
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        if data.len() != RF_PARAMS_SIZE {
            return Err(FmacError::Config(format!(
                "RF parameters must be {} bytes, got {}",
                RF_PARAMS_SIZE,
                data.len()
            )));
        }
        let mut params = [0u8; RF_PARAMS_SIZE];
        params.copy_from_slice(data);
        Ok(Self(params))
    }
}

/// Low-power mode requested for the RPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepType {
    #[default]
    Disabled,
    Sw,
    Hw,
}

impl From<SleepType> for u32 {
    fn from(sleep: SleepType) -> Self {
        match sleep {
            SleepType::Disabled => 0,
            SleepType::Sw => 1,
            SleepType::Hw => 2,
        }
    }
}

/// Board PCB losses per band (dB)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardParams {
    pub pcb_loss_2g: u8,
    pub pcb_loss_5g_band1: u8,
    pub pcb_loss_5g_band2: u8,
    pub pcb_loss_5g_band3: u8,
}

impl BoardParams {
    fn to_bytes(self) -> [u8; rf_offsets::NUM_PCB_LOSS] {
        [
            self.pcb_loss_2g,
            self.pcb_loss_5g_band1,
            self.pcb_loss_5g_band2,
            self.pcb_loss_5g_band3,
        ]
    }
}

/// 2.4 GHz band edge backoffs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeBackoff2g {
    pub lo_dsss: u8,
    pub lo_ht: u8,
    pub lo_he: u8,
    pub hi_dsss: u8,
    pub hi_ht: u8,
    pub hi_he: u8,
}

/// Backoffs for one 5 GHz sub-band edge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeBackoff5g {
    pub ht: u8,
    pub vht: u8,
    pub he: u8,
}

/// TX power control: antenna gains and band edge backoffs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxPwrCtrlParams {
    pub ant_gain_2g: u8,
    pub ant_gain_5g_band1: u8,
    pub ant_gain_5g_band2: u8,
    pub ant_gain_5g_band3: u8,
    pub band_edge_2g: EdgeBackoff2g,
    /// UNII-1 low through UNII-4 high
    pub band_edge_5g: [EdgeBackoff5g; NUM_5G_BAND_EDGES],
}

impl TxPwrCtrlParams {
    fn ant_gain_bytes(&self) -> [u8; rf_offsets::NUM_ANT_GAIN] {
        [
            self.ant_gain_2g,
            self.ant_gain_5g_band1,
            self.ant_gain_5g_band2,
            self.ant_gain_5g_band3,
        ]
    }

    fn edge_backoff_bytes(&self) -> [u8; rf_offsets::NUM_EDGE_BACKOFF] {
        let mut out = [0u8; rf_offsets::NUM_EDGE_BACKOFF];
        let e = &self.band_edge_2g;
        out[..6].copy_from_slice(&[e.lo_dsss, e.lo_ht, e.lo_he, e.hi_dsss, e.hi_ht, e.hi_he]);
        for (i, edge) in self.band_edge_5g.iter().enumerate() {
            let at = 6 + i * 3;
            out[at..at + 3].copy_from_slice(&[edge.ht, edge.vht, edge.he]);
        }
        out
    }
}

/// RX buffer pool descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RxBufPool {
    pub buf_sz: u16,
    pub num_bufs: u16,
}

/// Default pool layout used by station firmware
pub const DEFAULT_RX_BUF_POOLS: [RxBufPool; NUM_RX_BUF_POOLS] = [
    RxBufPool { buf_sz: 1600, num_bufs: 16 },
    RxBufPool { buf_sz: 1600, num_bufs: 16 },
    RxBufPool { buf_sz: 1600, num_bufs: 16 },
];

/// Data path configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataConfigParams {
    pub rate_protection_type: u8,
    pub aggregation: u8,
    pub wmm: u8,
    pub max_num_tx_agg_sessions: u8,
    pub max_num_rx_agg_sessions: u8,
    pub max_tx_aggregation: u8,
    pub reorder_buf_size: u8,
    pub max_rxampdu_size: i32,
}

impl Default for DataConfigParams {
    fn default() -> Self {
        Self {
            rate_protection_type: 0,
            aggregation: 1,
            wmm: 1,
            max_num_tx_agg_sessions: 4,
            max_num_rx_agg_sessions: 8,
            max_tx_aggregation: 16,
            reorder_buf_size: 64,
            max_rxampdu_size: 3,
        }
    }
}

impl DataConfigParams {
    fn write(&self, w: &mut WireWriter) -> Result<()> {
        w.write_u8(self.rate_protection_type)?;
        w.write_u8(self.aggregation)?;
        w.write_u8(self.wmm)?;
        w.write_u8(self.max_num_tx_agg_sessions)?;
        w.write_u8(self.max_num_rx_agg_sessions)?;
        w.write_u8(self.max_tx_aggregation)?;
        w.write_u8(self.reorder_buf_size)?;
        w.write_i32_le(self.max_rxampdu_size)
    }

    fn read(r: &mut WireReader) -> Result<Self> {
        Ok(Self {
            rate_protection_type: r.read_u8()?,
            aggregation: r.read_u8()?,
            wmm: r.read_u8()?,
            max_num_tx_agg_sessions: r.read_u8()?,
            max_num_rx_agg_sessions: r.read_u8()?,
            max_tx_aggregation: r.read_u8()?,
            reorder_buf_size: r.read_u8()?,
            max_rxampdu_size: r.read_i32_le()?,
        })
    }
}

/// Caller-supplied INIT parameters
#[derive(Debug, Clone, Default)]
pub struct InitParams {
    pub rf_params: RfParams,
    /// Copy `rf_params` and the board tables into the command
    pub rf_params_valid: bool,
    pub data_config: DataConfigParams,
    pub rx_buf_pools: [RxBufPool; NUM_RX_BUF_POOLS],
    pub sleep_type: SleepType,
    pub phy_calib: u32,
    pub tx_pwr_ctrl: TxPwrCtrlParams,
    pub board: BoardParams,
}

/// Temperature/VBAT calibration block as sent on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TempVbatConfig {
    pub temp_based_calib_en: u8,
    pub temp_calib_bitmap: u32,
    pub vbat_calibp_bitmap: u32,
    pub temp_vbat_mon_period: u32,
    pub vth_very_low: i32,
    pub vth_low: i32,
    pub vth_hi: i32,
    pub temp_threshold: i32,
    pub vbat_threshold: i32,
}

impl From<&TempVbatPolicy> for TempVbatConfig {
    fn from(policy: &TempVbatPolicy) -> Self {
        Self {
            temp_based_calib_en: policy.temp_based_calib_en as u8,
            temp_calib_bitmap: policy.temp_calib_bitmap,
            vbat_calibp_bitmap: policy.vbat_calibp_bitmap,
            temp_vbat_mon_period: policy.temp_vbat_mon_period,
            vth_very_low: policy.vth_very_low,
            vth_low: policy.vth_low,
            vth_hi: policy.vth_hi,
            temp_threshold: policy.temp_threshold,
            vbat_threshold: policy.vbat_threshold,
        }
    }
}

/// System parameters block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysParams {
    pub sleep_enable: u32,
    pub hw_bringup_time: u32,
    pub sw_bringup_time: u32,
    pub bcn_time_out: u32,
    pub calib_sleep_clk: u32,
    pub phy_calib: u32,
    pub mac_addr: [u8; ETH_ALEN],
    pub rf_params: RfParams,
    pub rf_params_valid: u8,
}

/// Decoded INIT command body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysInitBody {
    pub wdev_id: u32,
    pub sys_params: SysParams,
    pub rx_buf_pools: [RxBufPool; NUM_RX_BUF_POOLS],
    pub data_config: DataConfigParams,
    pub temp_vbat: TempVbatConfig,
    pub country_code: [u8; COUNTRY_CODE_LEN],
    pub op_band: u32,
    pub tcp_ip_checksum_offload: u8,
    pub mgmt_buff_offload: u8,
    pub feature_flags: u32,
    pub disable_beamforming: u32,
    pub discon_timeout: u32,
    pub display_scan_bss_limit: u8,
    pub watchdog_timer_val: u32,
    pub keep_alive_enable: u8,
    pub keep_alive_period: u32,
    pub ps_exit_strategy: u8,
}

impl SysInitBody {
    /// Build the body from caller parameters, capabilities and policy
    pub fn build(params: &InitParams, caps: &Capabilities, policy: &InitPolicy) -> Result<Self> {
        let mut rf_params = RfParams::default();
        if params.rf_params_valid {
            rf_params = params.rf_params.clone();
            patch(&mut rf_params, rf_offsets::PCB_LOSS, &params.board.to_bytes());
            patch(&mut rf_params, rf_offsets::ANT_GAIN, &params.tx_pwr_ctrl.ant_gain_bytes());
            patch(
                &mut rf_params,
                rf_offsets::EDGE_BACKOFF,
                &params.tx_pwr_ctrl.edge_backoff_bytes(),
            );
        }

        let sleep_enable = if caps.low_power {
            u32::from(params.sleep_type)
        } else {
            0
        };
        log::debug!(
            "RPU LPM type: {}",
            match sleep_enable {
                2 => "HW",
                1 => "SW",
                _ => "DISABLED",
            }
        );

        let system_mode = caps.system_mode();
        let mut feature = 0;
        if policy.twt_extend_sp_edca {
            feature |= feature_flags::TWT_EXTEND_SP_EDCA;
        }
        if policy.disable_dfs_channels {
            feature |= feature_flags::DISABLE_DFS_CHANNELS;
        }

        if caps.mgmt_buff_offload {
            log::info!("Management buffer offload enabled");
        }
        if caps.keepalive {
            log::debug!("Keepalive enabled with period {}", policy.keep_alive_period);
        }

        Ok(Self {
            wdev_id: 0,
            sys_params: SysParams {
                sleep_enable,
                hw_bringup_time: policy.hw_bringup_time,
                sw_bringup_time: policy.sw_bringup_time,
                bcn_time_out: policy.bcn_time_out,
                calib_sleep_clk: policy.calib_sleep_clk,
                phy_calib: params.phy_calib,
                mac_addr: [0; ETH_ALEN],
                rf_params,
                rf_params_valid: params.rf_params_valid as u8,
            },
            rx_buf_pools: if system_mode {
                params.rx_buf_pools
            } else {
                [RxBufPool::default(); NUM_RX_BUF_POOLS]
            },
            data_config: if system_mode {
                params.data_config
            } else {
                DataConfigParams::zeroed()
            },
            temp_vbat: if system_mode {
                TempVbatConfig::from(&policy.temp_vbat)
            } else {
                TempVbatConfig::default()
            },
            country_code: policy.country_code_bytes()?,
            op_band: policy.op_band.into(),
            tcp_ip_checksum_offload: caps.tcp_ip_checksum_offload as u8,
            mgmt_buff_offload: caps.mgmt_buff_offload as u8,
            feature_flags: feature,
            disable_beamforming: (!policy.beamforming) as u32,
            discon_timeout: policy.discon_timeout,
            display_scan_bss_limit: policy.display_scan_bss_limit,
            watchdog_timer_val: policy.watchdog_timer_val(caps),
            keep_alive_enable: caps.keepalive as u8,
            keep_alive_period: if caps.keepalive {
                policy.keep_alive_period
            } else {
                0
            },
            ps_exit_strategy: policy.ps_exit_strategy.into(),
        })
    }

    /// Serialize into `w`, which must have `INIT_BODY_LEN` bytes left
    pub fn write(&self, w: &mut WireWriter) -> Result<()> {
        SysHead {
            cmd_event: SysCommand::Init.code(),
            len: INIT_BODY_LEN as u32,
        }
        .write(w)?;
        w.write_u32_le(self.wdev_id)?;

        let sp = &self.sys_params;
        w.write_u32_le(sp.sleep_enable)?;
        w.write_u32_le(sp.hw_bringup_time)?;
        w.write_u32_le(sp.sw_bringup_time)?;
        w.write_u32_le(sp.bcn_time_out)?;
        w.write_u32_le(sp.calib_sleep_clk)?;
        w.write_u32_le(sp.phy_calib)?;
        w.write_bytes(&sp.mac_addr)?;
        w.write_bytes(&sp.rf_params.0)?;
        w.write_u8(sp.rf_params_valid)?;

        for pool in &self.rx_buf_pools {
            w.write_u16_le(pool.buf_sz)?;
            w.write_u16_le(pool.num_bufs)?;
        }
        self.data_config.write(w)?;

        let tv = &self.temp_vbat;
        w.write_u8(tv.temp_based_calib_en)?;
        w.write_u32_le(tv.temp_calib_bitmap)?;
        w.write_u32_le(tv.vbat_calibp_bitmap)?;
        w.write_u32_le(tv.temp_vbat_mon_period)?;
        w.write_i32_le(tv.vth_very_low)?;
        w.write_i32_le(tv.vth_low)?;
        w.write_i32_le(tv.vth_hi)?;
        w.write_i32_le(tv.temp_threshold)?;
        w.write_i32_le(tv.vbat_threshold)?;

        w.write_bytes(&self.country_code)?;
        w.write_u32_le(self.op_band)?;
        w.write_u8(self.tcp_ip_checksum_offload)?;
        w.write_u8(self.mgmt_buff_offload)?;
        w.write_u32_le(self.feature_flags)?;
        w.write_u32_le(self.disable_beamforming)?;
        w.write_u32_le(self.discon_timeout)?;
        w.write_u8(self.display_scan_bss_limit)?;
        w.write_u32_le(self.watchdog_timer_val)?;
        w.write_u8(self.keep_alive_enable)?;
        w.write_u32_le(self.keep_alive_period)?;
        w.write_u8(self.ps_exit_strategy)
    }

    /// Parse a body starting at its system head
    pub fn parse(data: &[u8]) -> Result<Self> {
        let head = SysHead::parse(data)?;
        if head.cmd_event != SysCommand::Init.code() || head.len as usize != INIT_BODY_LEN {
            return Err(FmacError::MalformedMessage(format!(
                "not an INIT body: cmd {} len {}",
                head.cmd_event, head.len
            )));
        }

        let mut r = WireReader::at(data, SYS_HEAD_LEN)?;
        let wdev_id = r.read_u32_le()?;
        let sys_params = SysParams {
            sleep_enable: r.read_u32_le()?,
            hw_bringup_time: r.read_u32_le()?,
            sw_bringup_time: r.read_u32_le()?,
            bcn_time_out: r.read_u32_le()?,
            calib_sleep_clk: r.read_u32_le()?,
            phy_calib: r.read_u32_le()?,
            mac_addr: r.read_array()?,
            rf_params: RfParams(r.read_array()?),
            rf_params_valid: r.read_u8()?,
        };

        let mut rx_buf_pools = [RxBufPool::default(); NUM_RX_BUF_POOLS];
        for pool in rx_buf_pools.iter_mut() {
            pool.buf_sz = r.read_u16_le()?;
            pool.num_bufs = r.read_u16_le()?;
        }
        let data_config = DataConfigParams::read(&mut r)?;

        let temp_vbat = TempVbatConfig {
            temp_based_calib_en: r.read_u8()?,
            temp_calib_bitmap: r.read_u32_le()?,
            vbat_calibp_bitmap: r.read_u32_le()?,
            temp_vbat_mon_period: r.read_u32_le()?,
            vth_very_low: r.read_i32_le()?,
            vth_low: r.read_i32_le()?,
            vth_hi: r.read_i32_le()?,
            temp_threshold: r.read_i32_le()?,
            vbat_threshold: r.read_i32_le()?,
        };

        Ok(Self {
            wdev_id,
            sys_params,
            rx_buf_pools,
            data_config,
            temp_vbat,
            country_code: r.read_array()?,
            op_band: r.read_u32_le()?,
            tcp_ip_checksum_offload: r.read_u8()?,
            mgmt_buff_offload: r.read_u8()?,
            feature_flags: r.read_u32_le()?,
            disable_beamforming: r.read_u32_le()?,
            discon_timeout: r.read_u32_le()?,
            display_scan_bss_limit: r.read_u8()?,
            watchdog_timer_val: r.read_u32_le()?,
            keep_alive_enable: r.read_u8()?,
            keep_alive_period: r.read_u32_le()?,
            ps_exit_strategy: r.read_u8()?,
        })
    }

    /// Encode into a standalone byte vector
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; INIT_BODY_LEN];
        self.write(&mut WireWriter::new(&mut buf))?;
        Ok(buf)
    }
}

impl DataConfigParams {
    /// All-zero parameters, sent when the host has no data path
    pub fn zeroed() -> Self {
        Self {
            rate_protection_type: 0,
            aggregation: 0,
            wmm: 0,
            max_num_tx_agg_sessions: 0,
            max_num_rx_agg_sessions: 0,
            max_tx_aggregation: 0,
            reorder_buf_size: 0,
            max_rxampdu_size: 0,
        }
    }
}

fn patch(rf: &mut RfParams, offset: usize, data: &[u8]) {
    rf.0[offset..offset + data.len()].copy_from_slice(data);
}
