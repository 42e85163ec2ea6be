//! FMAC replay tool
//!
//! Feeds a capture of hex-encoded RPU messages through the event dispatcher
//! and reports the dispatch counters as JSON.

use bytes::Bytes;
use clap::{Arg, ArgAction, Command};
use rpu_fmac::{
    ConfigManager, DataPlane, EventContext, EventKind, FmacConfig, FmacDevice, FmacError,
    IfType, OsVifHandle, Result, Transport, TransportError, MAX_NUM_VIFS,
};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Default log level
const DEFAULT_LOG_LEVEL: &str = "info";

/// Transport with nothing behind it; sends are logged and dropped
struct ReplayTransport;

impl Transport for ReplayTransport {
    fn send(&self, msg: Bytes) -> std::result::Result<(), TransportError> {
        debug!("Dropping {} byte outbound message", msg.len());
        Ok(())
    }

    fn name(&self) -> &str {
        "replay"
    }
}

/// Data plane logging every hand-off
struct ReplayDataPlane;

impl DataPlane for ReplayDataPlane {
    fn rx_event(&self, event: &[u8]) -> Result<()> {
        info!(len = event.len(), "RX buffers ready");
        Ok(())
    }

    fn tx_done_event(&self, event: &[u8]) -> Result<()> {
        info!(len = event.len(), "TX buffers done");
        Ok(())
    }

    fn ap_pm_mode_event(&self, event: &[u8]) -> Result<()> {
        info!(len = event.len(), "AP power save mode change");
        Ok(())
    }

    fn ap_ps_get_frames_event(&self, event: &[u8]) -> Result<()> {
        info!(len = event.len(), "AP buffered frames requested");
        Ok(())
    }

    fn raw_tx_done_event(&self, event: &[u8]) -> Result<()> {
        info!(len = event.len(), "Raw TX done");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("fmac-replay")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Replay captured RPU messages through the FMAC event dispatcher")
        .arg(
            Arg::new("input")
                .value_name("FILE")
                .help("Hex-encoded messages, one per line")
                .required(true),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file (json, toml or yaml)"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)")
                .default_value(DEFAULT_LOG_LEVEL),
        )
        .arg(
            Arg::new("vifs")
                .long("vifs")
                .value_name("COUNT")
                .help("Number of station interfaces to create")
                .value_parser(clap::value_parser!(u8).range(0..=MAX_NUM_VIFS as i64))
                .default_value("1"),
        )
        .arg(
            Arg::new("stop-on-error")
                .long("stop-on-error")
                .help("Stop at the first message that fails to dispatch")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = matches
        .get_one::<String>("log-level")
        .map(String::as_str)
        .unwrap_or(DEFAULT_LOG_LEVEL);
    init_logging(log_level)?;

    let input = matches
        .get_one::<String>("input")
        .map(PathBuf::from)
        .ok_or_else(|| FmacError::Config("No input file given".to_string()))?;
    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let vifs = matches.get_one::<u8>("vifs").copied().unwrap_or(1);
    let stop_on_error = matches.get_flag("stop-on-error");

    let config = load_configuration(config_path.as_deref())?;

    match replay(config, &input, vifs, stop_on_error).await {
        Ok(report) => {
            let json = serde_json::to_string_pretty(&report)
                .map_err(|e| FmacError::Serialization(e.to_string()))?;
            println!("{}", json);
            Ok(())
        }
        Err(e) => {
            error!("Replay failed: {}", e);
            process::exit(1);
        }
    }
}

/// Initialize logging system
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .map_err(|e| FmacError::Config(format!("Invalid log level '{}': {}", level, e)))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

fn load_configuration(path: Option<&Path>) -> Result<FmacConfig> {
    match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(ConfigManager::load_from_file(path)?.get_config().clone())
        }
        None => Ok(FmacConfig::default()),
    }
}

/// Decode one capture line; blank lines and `#` comments yield `None`
fn parse_line(line: &str) -> Option<std::result::Result<Vec<u8>, hex::FromHexError>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
    Some(hex::decode(compact))
}

fn register_logging_handlers(device: &mut FmacDevice) {
    for kind in EventKind::ALL {
        device.callbacks_mut().register(
            kind,
            |vif: &OsVifHandle, ctx: &EventContext<'_>| -> Result<()> {
                let name = vif.downcast_ref::<String>().map(String::as_str).unwrap_or("?");
                info!(
                    interface = name,
                    kind = ?ctx.kind,
                    len = ctx.data.len(),
                    more = ctx.more_results,
                    carrier = ?ctx.carrier,
                    "Event delivered"
                );
                Ok(())
            },
        );
    }
}

async fn replay(
    config: FmacConfig,
    input: &Path,
    vifs: u8,
    stop_on_error: bool,
) -> Result<serde_json::Value> {
    let content = tokio::fs::read_to_string(input).await?;

    let mut device = FmacDevice::new(config, Arc::new(ReplayTransport))
        .with_data_plane(Arc::new(ReplayDataPlane));
    for if_idx in 0..vifs {
        let handle: OsVifHandle = Arc::new(format!("wlan{}", if_idx));
        device.add_vif(if_idx, IfType::Station, handle)?;
    }
    register_logging_handlers(&mut device);

    let workers = device.spawn_deferred_workers()?;
    let started = chrono::Utc::now();

    for (lineno, line) in content.lines().enumerate() {
        let msg = match parse_line(line) {
            None => continue,
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                warn!("{}:{}: invalid hex: {}", input.display(), lineno + 1, e);
                if stop_on_error {
                    break;
                }
                continue;
            }
        };

        match device.on_message_received(&msg) {
            Ok(outcome) => debug!("{}:{}: {:?}", input.display(), lineno + 1, outcome),
            Err(e) => {
                warn!("{}:{}: {}", input.display(), lineno + 1, e);
                if stop_on_error {
                    break;
                }
            }
        }
    }

    let mut deferred = 0;
    for worker in workers {
        deferred += worker.stop().await?;
    }
    if device.pending_deferred() > 0 {
        deferred += device.drain_deferred()?;
    }
    info!("Replay done, {} deferred events handed off", deferred);

    Ok(serde_json::json!({
        "input": input.display().to_string(),
        "started": started.to_rfc3339(),
        "fw_init_done": device.fw_init_done(),
        "fw_deinit_done": device.fw_deinit_done(),
        "peers": device.peers().len(),
        "deferred_handed_off": deferred,
        "stats": device.dispatch_stats(),
    }))
}
