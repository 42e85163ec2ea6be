//! Shared test fixtures: recording collaborators and message builders

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::callbacks::{CarrierState, EventContext, EventHandler, EventKind};
use crate::config::{Capabilities, FmacConfig};
use crate::device::{FmacDevice, OsVifHandle};
use crate::proto::UmacEvent;
use crate::transport::{DataPlane, Transport, TransportError};
use crate::wire::{MessageAllocator, MessageType, UmacHeader, RPU_MSG_HDR_LEN};
use crate::{FmacError, Result};

/// Transport keeping every sent message
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Bytes>>,
    fail: Mutex<Option<TransportError>>,
    memory: Vec<u8>,
    mem_reads: Mutex<Vec<(u32, usize)>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `memory` for capture reads
    pub fn with_memory(mut self, memory: Vec<u8>) -> Self {
        self.memory = memory;
        self
    }

    /// Fail every following send with `err`
    pub fn fail_with(&self, err: TransportError) {
        *self.fail.lock().unwrap() = Some(err);
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }

    pub fn mem_reads(&self) -> Vec<(u32, usize)> {
        self.mem_reads.lock().unwrap().clone()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, msg: Bytes) -> std::result::Result<(), TransportError> {
        if let Some(err) = self.fail.lock().unwrap().clone() {
            return Err(err);
        }
        self.sent.lock().unwrap().push(msg);
        Ok(())
    }

    fn read_mem(&self, addr: u32, len: usize) -> std::result::Result<Vec<u8>, TransportError> {
        self.mem_reads.lock().unwrap().push((addr, len));
        self.memory
            .get(..len)
            .map(<[u8]>::to_vec)
            .ok_or(TransportError::MemRead { addr, len })
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Data plane keeping every hand-off as `(kind, event)`
#[derive(Debug, Default)]
pub struct RecordingDataPlane {
    events: Mutex<Vec<(&'static str, Vec<u8>)>>,
    fail: bool,
}

impl RecordingDataPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record hand-offs, then report a failure for each
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<(&'static str, Vec<u8>)> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, kind: &'static str, event: &[u8]) -> Result<()> {
        self.events.lock().unwrap().push((kind, event.to_vec()));
        if self.fail {
            return Err(FmacError::Deferred(format!("{} rejected", kind)));
        }
        Ok(())
    }
}

impl DataPlane for RecordingDataPlane {
    fn rx_event(&self, event: &[u8]) -> Result<()> {
        self.record("rx", event)
    }

    fn tx_done_event(&self, event: &[u8]) -> Result<()> {
        self.record("tx_done", event)
    }

    fn ap_pm_mode_event(&self, event: &[u8]) -> Result<()> {
        self.record("pm_mode", event)
    }

    fn ap_ps_get_frames_event(&self, event: &[u8]) -> Result<()> {
        self.record("ps_get_frames", event)
    }

    fn raw_tx_done_event(&self, event: &[u8]) -> Result<()> {
        self.record("raw_tx_done", event)
    }
}

/// Allocator refusing every request
#[derive(Debug, Default)]
pub struct FailingAllocator {
    attempts: AtomicU64,
}

impl FailingAllocator {
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl MessageAllocator for FailingAllocator {
    fn alloc_zeroed(&self, _len: usize) -> Result<Vec<u8>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(FmacError::AllocationFailed)
    }
}

/// One handler invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub kind: EventKind,
    pub if_idx: u8,
    pub data: Vec<u8>,
    pub more: bool,
    pub carrier: Option<CarrierState>,
    /// Interface handle, when it is a `&'static str`
    pub handle: Option<String>,
}

pub type Calls = Arc<Mutex<Vec<Recorded>>>;

/// Handler recording every invocation
pub fn recording_handler() -> (Calls, Arc<dyn EventHandler>) {
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&calls);
    let handler = move |vif: &OsVifHandle, ctx: &EventContext<'_>| -> Result<()> {
        sink.lock().unwrap().push(Recorded {
            kind: ctx.kind,
            if_idx: ctx.if_idx,
            data: ctx.data.to_vec(),
            more: ctx.more_results,
            carrier: ctx.carrier,
            handle: vif.downcast_ref::<&'static str>().map(|s| s.to_string()),
        });
        Ok(())
    };
    (calls, Arc::new(handler))
}

pub fn device_with(caps: Capabilities) -> (FmacDevice, Arc<RecordingTransport>) {
    let config = FmacConfig {
        capabilities: caps,
        ..FmacConfig::default()
    };
    device_with_config(config)
}

pub fn device_with_config(config: FmacConfig) -> (FmacDevice, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::new());
    let dev = FmacDevice::new(config, transport.clone());
    (dev, transport)
}

fn framed(msg_type: MessageType, payload: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(RPU_MSG_HDR_LEN + payload.len());
    msg.extend_from_slice(&((RPU_MSG_HDR_LEN + payload.len()) as u32).to_le_bytes());
    msg.extend_from_slice(&0u32.to_le_bytes());
    msg.extend_from_slice(&u32::from(msg_type).to_le_bytes());
    msg.extend_from_slice(payload);
    msg
}

/// SYSTEM message carrying event `code` with `body` after the system head
pub fn sys_msg(code: u32, body: &[u8]) -> Vec<u8> {
    let mut payload = code.to_le_bytes().to_vec();
    payload.extend_from_slice(&((8 + body.len()) as u32).to_le_bytes());
    payload.extend_from_slice(body);
    framed(MessageType::System, &payload)
}

/// UMAC message for `event` addressed to `if_idx`
pub fn umac_msg(event: UmacEvent, if_idx: u64, seq: i32, body: &[u8]) -> Vec<u8> {
    let mut header = UmacHeader::new(event.code(), 0);
    header.seq = seq;
    header.ids.wdev_id = if_idx;

    let mut payload = header.to_bytes();
    payload.extend_from_slice(body);
    framed(MessageType::Umac, &payload)
}

/// Data sub-event with its head
pub fn data_sub(code: u32, body: &[u8]) -> Vec<u8> {
    let mut sub = code.to_le_bytes().to_vec();
    sub.extend_from_slice(&((8 + body.len()) as u32).to_le_bytes());
    sub.extend_from_slice(body);
    sub
}

/// DATA message packing `subs` back to back
pub fn data_msg(subs: &[Vec<u8>]) -> Vec<u8> {
    framed(MessageType::Data, &subs.concat())
}

/// NEW/DEL_STATION body
pub fn station_body(mac: &[u8; 6], wme: bool, is_legacy: bool) -> Vec<u8> {
    let mut body = 0u32.to_le_bytes().to_vec();
    body.push(wme as u8);
    body.push(is_legacy as u8);
    body.extend_from_slice(mac);
    body
}
