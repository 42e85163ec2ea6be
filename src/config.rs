//! FMAC configuration module
//!
//! This module handles configuration for the host interface: the capability
//! set that decides which commands and events are supported, the policy
//! constants written into the INIT command, data sub-event delivery policy,
//! peer limits and logging. It provides configuration loading, validation,
//! and management.

use crate::proto::{phy_calib, OpBand, PsExitStrategy};
use crate::{FmacError, Result, COUNTRY_CODE_LEN, MAX_PEERS};

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main FMAC configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FmacConfig {
    /// Enabled feature set
    pub capabilities: Capabilities,
    /// INIT command policy constants
    pub init: InitPolicy,
    /// Data sub-event delivery
    pub delivery: DeliveryConfig,
    /// Peer table limits
    pub peers: PeerConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Capability set resolved once at startup
///
/// Components query these flags instead of relying on separate builds.
/// Unsupported commands and events become runtime no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    /// Station (client) support
    pub station: bool,
    /// Soft AP support
    pub ap: bool,
    /// P2P support
    pub p2p: bool,
    /// Host data path (TX/carrier handling)
    pub data_tx: bool,
    /// RF radio test firmware
    pub radio_test: bool,
    /// Offloaded raw TX firmware
    pub offloaded_raw_tx: bool,
    /// Raw frame injection
    pub raw_data_tx: bool,
    /// Raw frame capture
    pub raw_data_rx: bool,
    /// Promiscuous receive
    pub promisc_data_rx: bool,
    /// RPU low power (sleep) support
    pub low_power: bool,
    /// RPU watchdog based recovery
    pub rpu_recovery: bool,
    /// Management buffer offload to firmware
    pub mgmt_buff_offload: bool,
    /// Firmware keepalive
    pub keepalive: bool,
    /// TCP/IP checksum offload
    pub tcp_ip_checksum_offload: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::station()
    }
}

impl Capabilities {
    /// Station firmware with host data path
    pub fn station() -> Self {
        Self {
            station: true,
            ap: false,
            p2p: false,
            data_tx: true,
            radio_test: false,
            offloaded_raw_tx: false,
            raw_data_tx: false,
            raw_data_rx: false,
            promisc_data_rx: false,
            low_power: true,
            rpu_recovery: false,
            mgmt_buff_offload: false,
            keepalive: false,
            tcp_ip_checksum_offload: false,
        }
    }

    /// Radio test firmware
    pub fn radio_test() -> Self {
        Self {
            station: false,
            data_tx: false,
            low_power: false,
            radio_test: true,
            ..Self::station()
        }
    }

    /// Offloaded raw TX firmware
    pub fn offloaded_raw_tx() -> Self {
        Self {
            station: false,
            data_tx: false,
            offloaded_raw_tx: true,
            ..Self::station()
        }
    }

    /// Neither radio test nor offloaded raw TX
    pub fn system_mode(&self) -> bool {
        !self.radio_test && !self.offloaded_raw_tx
    }

    /// Any raw/monitor mode support
    pub fn raw_modes(&self) -> bool {
        self.raw_data_tx || self.raw_data_rx || self.promisc_data_rx
    }
}

/// Policy constants written into the INIT command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitPolicy {
    /// Hardware bring-up delay (us)
    pub hw_bringup_time: u32,
    /// Software bring-up delay (us)
    pub sw_bringup_time: u32,
    /// Beacon timeout (us)
    pub bcn_time_out: u32,
    /// Sleep clock calibration
    pub calib_sleep_clk: u32,
    /// Active timeout before recovery kicks in (ms)
    pub ps_active_timeout_ms: u32,
    /// AP dead detection timeout (s)
    pub discon_timeout: u32,
    /// Keepalive period (s)
    pub keep_alive_period: u32,
    /// Scan results shown to the host, 0 for no limit
    pub display_scan_bss_limit: u8,
    /// Regulatory domain
    pub country_code: String,
    /// Band restriction
    pub op_band: OpBand,
    /// Beamforming support
    pub beamforming: bool,
    /// Extend TWT service period with EDCA
    pub twt_extend_sp_edca: bool,
    /// Skip DFS channels when scanning
    pub disable_dfs_channels: bool,
    /// Power-save exit strategy
    pub ps_exit_strategy: PsExitStrategy,
    /// Temperature and battery voltage calibration
    pub temp_vbat: TempVbatPolicy,
}

impl Default for InitPolicy {
    fn default() -> Self {
        Self {
            hw_bringup_time: 7000,
            sw_bringup_time: 5000,
            bcn_time_out: 40000,
            calib_sleep_clk: 1,
            ps_active_timeout_ms: 50000,
            discon_timeout: 20,
            keep_alive_period: 60,
            display_scan_bss_limit: 0,
            country_code: "00".to_string(),
            op_band: OpBand::All,
            beamforming: true,
            twt_extend_sp_edca: false,
            disable_dfs_channels: false,
            ps_exit_strategy: PsExitStrategy::IntPs,
            temp_vbat: TempVbatPolicy::default(),
        }
    }
}

impl InitPolicy {
    /// Watchdog value for the INIT command
    pub fn watchdog_timer_val(&self, caps: &Capabilities) -> u32 {
        if caps.rpu_recovery {
            self.ps_active_timeout_ms / 1000
        } else {
            WATCHDOG_DISABLED
        }
    }

    /// Country code as the two bytes sent to firmware
    pub fn country_code_bytes(&self) -> Result<[u8; COUNTRY_CODE_LEN]> {
        let bytes = self.country_code.as_bytes();
        if bytes.len() != COUNTRY_CODE_LEN {
            return Err(FmacError::Config(format!(
                "Country code '{}' must be {} characters",
                self.country_code, COUNTRY_CODE_LEN
            )));
        }
        Ok([bytes[0], bytes[1]])
    }
}

/// Watchdog value that disables RPU recovery
pub const WATCHDOG_DISABLED: u32 = 0xFF_FFFF;

/// Temperature/VBAT calibration policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TempVbatPolicy {
    pub temp_based_calib_en: bool,
    pub temp_calib_bitmap: u32,
    pub vbat_calibp_bitmap: u32,
    /// Monitoring period (us)
    pub temp_vbat_mon_period: u32,
    pub vth_very_low: i32,
    pub vth_low: i32,
    pub vth_hi: i32,
    /// Temperature delta triggering recalibration (C)
    pub temp_threshold: i32,
    pub vbat_threshold: i32,
}

impl Default for TempVbatPolicy {
    fn default() -> Self {
        Self {
            temp_based_calib_en: true,
            temp_calib_bitmap: phy_calib::DPD
                | phy_calib::TXPOW
                | phy_calib::RXDC
                | phy_calib::TXIQ
                | phy_calib::RXIQ,
            vbat_calibp_bitmap: phy_calib::DPD | phy_calib::TXPOW,
            temp_vbat_mon_period: 1024 * 1024,
            vth_very_low: 8,
            vth_low: 12,
            vth_hi: 14,
            temp_threshold: 40,
            vbat_threshold: 0,
        }
    }
}

/// Delivery policy for one data sub-event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    /// Process on the delivery context
    Inline,
    /// Copy into a queue and process on a worker
    Deferred,
}

/// Data sub-event delivery configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// RX buffer ready sub-events
    pub rx: DeliveryPolicy,
    /// TX buffer done sub-events
    pub tx_done: DeliveryPolicy,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            rx: DeliveryPolicy::Deferred,
            tx_done: DeliveryPolicy::Deferred,
        }
    }
}

/// Peer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Maximum number of peers
    pub max_peers: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            max_peers: MAX_PEERS,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log every command and event at info level
    pub trace_events: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            trace_events: false,
        }
    }
}

/// Configuration validation result
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// Whether configuration is valid
    pub valid: bool,
    /// Validation errors
    pub errors: Vec<String>,
    /// Validation warnings
    pub warnings: Vec<String>,
}

/// Configuration manager
#[derive(Debug, Default)]
pub struct ConfigManager {
    /// Current configuration
    config: FmacConfig,
    /// Path to configuration file
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Create new configuration manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration manager with config
    pub fn with_config(config: FmacConfig) -> Self {
        Self {
            config,
            config_path: None,
        }
    }

    /// Load configuration from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| FmacError::Config(format!("Failed to read config file: {}", e)))?;

        let config: FmacConfig = match path.extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| FmacError::Config(format!("Failed to parse JSON config: {}", e)))?,
            Some("toml") => toml::from_str(&content)
                .map_err(|e| FmacError::Config(format!("Failed to parse TOML config: {}", e)))?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .map_err(|e| FmacError::Config(format!("Failed to parse YAML config: {}", e)))?,
            _ => return Err(FmacError::Config("Unsupported config file format".to_string())),
        };

        let manager = Self {
            config,
            config_path: Some(path.to_path_buf()),
        };

        let validation = manager.validate_config(&manager.config);
        for warning in &validation.warnings {
            log::warn!("{}: {}", path.display(), warning);
        }
        if !validation.valid {
            return Err(FmacError::Config(format!(
                "Configuration validation failed: {}",
                validation.errors.join(", ")
            )));
        }

        Ok(manager)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        let content = match path.extension().and_then(|s| s.to_str()) {
            Some("json") => self.to_json()?,
            Some("toml") => self.to_toml()?,
            Some("yaml") | Some("yml") => self.to_yaml()?,
            _ => return Err(FmacError::Config("Unsupported config file format".to_string())),
        };

        fs::write(path, content)
            .map_err(|e| FmacError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Get current configuration
    pub fn get_config(&self) -> &FmacConfig {
        &self.config
    }

    /// Path the configuration was loaded from
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Update configuration
    pub fn update_config(&mut self, new_config: FmacConfig) -> Result<()> {
        let validation = self.validate_config(&new_config);
        if !validation.valid {
            return Err(FmacError::Config(format!(
                "Configuration validation failed: {}",
                validation.errors.join(", ")
            )));
        }

        self.config = new_config;
        Ok(())
    }

    /// Validate configuration
    pub fn validate_config(&self, config: &FmacConfig) -> ValidationResult {
        let mut result = ValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        };
        let caps = &config.capabilities;

        // Firmware flavours are exclusive
        if caps.radio_test && caps.offloaded_raw_tx {
            result
                .errors
                .push("Radio test and offloaded raw TX cannot both be enabled".to_string());
        }

        if caps.radio_test && (caps.station || caps.ap || caps.p2p) {
            result
                .errors
                .push("Radio test firmware does not support station, AP or P2P".to_string());
        }

        if (caps.ap || caps.p2p) && !caps.station {
            result
                .errors
                .push("AP and P2P support require station support".to_string());
        }

        if caps.raw_modes() && !caps.system_mode() {
            result
                .warnings
                .push("Raw modes are ignored by radio test and offloaded raw TX firmware".to_string());
        }

        // Validate init policy
        let country = &config.init.country_code;
        if country.len() != COUNTRY_CODE_LEN || !country.chars().all(|c| c.is_ascii_alphanumeric()) {
            result.errors.push(format!(
                "Country code '{}' must be {} ASCII alphanumerics",
                country, COUNTRY_CODE_LEN
            ));
        }

        if caps.rpu_recovery && config.init.ps_active_timeout_ms < 1000 {
            result
                .errors
                .push("PS active timeout must be at least 1000 ms when recovery is enabled".to_string());
        }

        // Validate peers
        if config.peers.max_peers == 0 || config.peers.max_peers > 32 {
            result
                .errors
                .push("Max peers must be between 1 and 32".to_string());
        } else if config.peers.max_peers > 16 {
            result.warnings.push(format!(
                "Max peers {} exceeds what firmware typically supports",
                config.peers.max_peers
            ));
        }

        // Validate logging config
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.as_str()) {
            result.errors.push(format!(
                "Invalid log level '{}', must be one of: {}",
                config.logging.level,
                valid_levels.join(", ")
            ));
        }

        result.valid = result.errors.is_empty();
        result
    }

    /// Reload configuration from file
    pub fn reload(&mut self) -> Result<()> {
        let path = self
            .config_path
            .clone()
            .ok_or_else(|| FmacError::Config("No config file path set".to_string()))?;
        let new_manager = Self::load_from_file(&path)?;
        self.update_config(new_manager.config)
    }

    /// Get configuration as JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.config)
            .map_err(|e| FmacError::Config(format!("Failed to serialize config to JSON: {}", e)))
    }

    /// Get configuration as TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(&self.config)
            .map_err(|e| FmacError::Config(format!("Failed to serialize config to TOML: {}", e)))
    }

    /// Get configuration as YAML string
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.config)
            .map_err(|e| FmacError::Config(format!("Failed to serialize config to YAML: {}", e)))
    }
}
