//! Host/RPU protocol enumerations
//!
//! Numeric command and event codes exchanged with the RPU firmware. These
//! values are fixed by the firmware interface and must not be renumbered.

use serde::{Deserialize, Serialize};

/// Declare a firmware code enumeration with an `Unknown` fallback
macro_rules! fw_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
            Unknown(u32),
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                match value {
                    $( $value => Self::$variant, )+
                    other => Self::Unknown(other),
                }
            }
        }

        impl From<$name> for u32 {
            fn from(code: $name) -> Self {
                match code {
                    $( $name::$variant => $value, )+
                    $name::Unknown(val) => val,
                }
            }
        }

        impl $name {
            /// Numeric firmware code
            pub fn code(self) -> u32 {
                self.into()
            }
        }
    };
}

fw_enum! {
    /// System (device-global) command codes
    pub enum SysCommand {
        Init = 0,
        Tx = 1,
        IfType = 2,
        Mode = 3,
        GetStats = 4,
        ClearStats = 5,
        Rx = 6,
        Pwr = 7,
        Deinit = 8,
        Srcoex = 9,
        RfTest = 10,
        HeGiLtfConfig = 11,
        UmacIntStats = 12,
        RadioTestInit = 13,
        RtReqSetReg = 14,
        TxFixDataRate = 15,
        Channel = 16,
        RawConfigFilter = 17,
        RawConfigMode = 18,
        RawTxPkt = 19,
        ResetStatistics = 20,
        OffloadRawTxParams = 21,
        OffloadRawTxCtrl = 22,
    }
}

fw_enum! {
    /// System (device-global) event codes
    pub enum SysEvent {
        PwrData = 0,
        InitDone = 1,
        Stats = 2,
        DeinitDone = 3,
        RfTest = 4,
        CoexConfig = 5,
        IntUmacStats = 6,
        RadioCmdStatus = 7,
        ChannelSetDone = 8,
        ModeSetDone = 9,
        FilterSetDone = 10,
        RawTxDone = 11,
        OffloadedRawTxStatus = 12,
    }
}

fw_enum! {
    /// UMAC (per-interface control) event codes
    pub enum UmacEvent {
        Unspecified = 256,
        TriggerScanStart = 257,
        ScanAborted = 258,
        ScanDone = 259,
        ScanResult = 260,
        Authenticate = 261,
        Associate = 262,
        Connect = 263,
        Deauthenticate = 264,
        Disassociate = 265,
        NewStation = 266,
        DelStation = 267,
        GetStation = 268,
        UnprotDeauthenticate = 269,
        UnprotDisassociate = 270,
        NewInterface = 271,
        NewWiphy = 272,
        GetChannel = 273,
        GetTxPower = 274,
        Frame = 275,
        CookieResp = 276,
        FrameTxStatus = 277,
        IfflagsStatus = 278,
        SetInterface = 279,
        ConfigTwt = 280,
        TeardownTwt = 281,
        TwtSleep = 282,
        Coalescing = 283,
        McastFilter = 284,
        Disconnect = 285,
        BeaconHint = 286,
        RemainOnChannel = 287,
        CancelRemainOnChannel = 288,
        GetPowerSaveInfo = 289,
        GetReg = 290,
        ScanDisplayResult = 291,
        CmdStatus = 292,
        BssInfo = 293,
        ConfigExtendedPs = 294,
        GetConnectionInfo = 295,
        RegChange = 296,
    }
}

fw_enum! {
    /// Sub-event codes packed in DATA messages
    pub enum DataEvent {
        MgmtBuffConfig = 0,
        TxBuff = 1,
        TxBuffDone = 2,
        RxBuff = 3,
        CarrierOn = 4,
        CarrierOff = 5,
        PmMode = 6,
        PsGetFrames = 7,
    }
}

fw_enum! {
    /// RF test sub-types carried in RF test commands and events
    pub enum RfTestType {
        RxAdcCap = 0,
        RxStatPktCap = 1,
        RxDynPktCap = 2,
        TxTone = 3,
        Dpd = 4,
        RfRssi = 5,
        Sleep = 6,
        GetTemperature = 7,
        XoCalib = 8,
        XoTune = 9,
    }
}

impl RfTestType {
    /// Whether results include sample memory to read back
    pub fn is_capture(self) -> bool {
        matches!(self, Self::RxAdcCap | Self::RxStatPktCap | Self::RxDynPktCap)
    }
}

fw_enum! {
    /// Interface types, nl80211 numbering plus raw-mode extensions
    pub enum IfType {
        Unspecified = 0,
        Adhoc = 1,
        Station = 2,
        Ap = 3,
        ApVlan = 4,
        Wds = 5,
        Monitor = 6,
        MeshPoint = 7,
        P2pClient = 8,
        P2pGo = 9,
        P2pDevice = 10,
        Ocb = 11,
        Nan = 12,
        StaTxInjector = 13,
        MonitorTxInjector = 14,
        StaPromisc = 15,
        StaPromiscTxInjector = 16,
    }
}

impl Default for IfType {
    fn default() -> Self {
        Self::Station
    }
}

/// Operating-mode bits used by raw mode configuration
pub mod mode_bits {
    pub const STA: u8 = 1 << 0;
    pub const MONITOR: u8 = 1 << 1;
    pub const TX_INJECTION: u8 = 1 << 2;
    pub const PROMISCUOUS: u8 = 1 << 3;
}

/// Feature flags written into the INIT command
pub mod feature_flags {
    pub const TWT_EXTEND_SP_EDCA: u32 = 0x1;
    pub const DISABLE_DFS_CHANNELS: u32 = 0x4;
}

/// PHY calibration flag bits
pub mod phy_calib {
    pub const RXDC: u32 = 1 << 0;
    pub const TXDC: u32 = 1 << 1;
    pub const TXPOW: u32 = 1 << 2;
    pub const TXIQ: u32 = 1 << 3;
    pub const RXIQ: u32 = 1 << 4;
    pub const DPD: u32 = 1 << 5;
}

/// Power-save exit strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PsExitStrategy {
    /// Wake for every TIM
    EveryTim,
    /// Let firmware decide from traffic
    IntPs,
}

impl From<PsExitStrategy> for u8 {
    fn from(strategy: PsExitStrategy) -> Self {
        match strategy {
            PsExitStrategy::EveryTim => 0,
            PsExitStrategy::IntPs => 1,
        }
    }
}

/// Operating band restriction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpBand {
    All,
    Band2g,
    Band5g,
}

impl From<OpBand> for u32 {
    fn from(band: OpBand) -> Self {
        match band {
            OpBand::All => 0,
            OpBand::Band2g => 1,
            OpBand::Band5g => 2,
        }
    }
}

/// Statistics categories for GET_STATS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatsType {
    All = 0,
    Host = 1,
    Umac = 2,
    Lmac = 3,
    Phy = 4,
}
