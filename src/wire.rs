//! RPU wire format handling
//!
//! This module contains the framing shared by every host/RPU message: the
//! outer message header, the system head, the UMAC header and the data
//! sub-event head, together with checked little-endian readers and writers
//! and the allocator used for outbound messages.

use bytes::{Buf, BufMut, Bytes};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{FmacError, Result};

/// Outer RPU message header length
pub const RPU_MSG_HDR_LEN: usize = 12;

/// System command/event head length
pub const SYS_HEAD_LEN: usize = 8;

/// UMAC command/event header length
pub const UMAC_HDR_LEN: usize = 36;

/// Data sub-event head length
pub const DATA_EVENT_HEAD_LEN: usize = 8;

/// Largest message the host will build
pub const RPU_MAX_MESSAGE_LEN: usize = 8192;

/// Outer message classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    System,
    Supplicant,
    Data,
    Umac,
    Unknown(u32),
}

impl From<u32> for MessageType {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::System,
            1 => Self::Supplicant,
            2 => Self::Data,
            3 => Self::Umac,
            other => Self::Unknown(other),
        }
    }
}

impl From<MessageType> for u32 {
    fn from(msg_type: MessageType) -> Self {
        match msg_type {
            MessageType::System => 0,
            MessageType::Supplicant => 1,
            MessageType::Data => 2,
            MessageType::Umac => 3,
            MessageType::Unknown(val) => val,
        }
    }
}

/// Outer header carried by every message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpuMsgHeader {
    /// Total message length, header included
    pub len: u32,
    pub resubmit: u32,
    pub msg_type: MessageType,
}

impl RpuMsgHeader {
    /// Create new header for a payload of `payload_len` bytes
    pub fn new(msg_type: MessageType, payload_len: usize) -> Self {
        Self {
            len: (RPU_MSG_HDR_LEN + payload_len) as u32,
            resubmit: 0,
            msg_type,
        }
    }

    /// Parse header from the start of a buffer
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = WireReader::new(data);
        let len = reader.read_u32_le()?;
        let resubmit = reader.read_u32_le()?;
        let msg_type = MessageType::from(reader.read_u32_le()?);
        Ok(Self { len, resubmit, msg_type })
    }

    /// Write header at the writer's position
    pub fn write(&self, writer: &mut WireWriter) -> Result<()> {
        writer.write_u32_le(self.len)?;
        writer.write_u32_le(self.resubmit)?;
        writer.write_u32_le(self.msg_type.into())
    }

    /// Payload length declared by the header
    pub fn payload_len(&self) -> usize {
        (self.len as usize).saturating_sub(RPU_MSG_HDR_LEN)
    }
}

/// Head of every system command and event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysHead {
    pub cmd_event: u32,
    /// Length of the system body, head included
    pub len: u32,
}

impl SysHead {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = WireReader::new(data);
        Ok(Self {
            cmd_event: reader.read_u32_le()?,
            len: reader.read_u32_le()?,
        })
    }

    pub fn write(&self, writer: &mut WireWriter) -> Result<()> {
        writer.write_u32_le(self.cmd_event)?;
        writer.write_u32_le(self.len)
    }
}

/// Interface and wiphy identifiers carried in the UMAC header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UmacIds {
    pub valid_fields: u32,
    pub ifaceindex: i32,
    pub wiphy_idx: i32,
    pub wdev_id: u64,
}

/// Header of every UMAC (control) command and event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UmacHeader {
    pub portid: u32,
    pub cmd_evnt: u32,
    pub seq: i32,
    pub rpu_ret_val: i32,
    pub ids: UmacIds,
}

impl UmacHeader {
    /// Create new header addressed to an interface
    pub fn new(cmd_evnt: u32, wdev_id: u8) -> Self {
        Self {
            cmd_evnt,
            ids: UmacIds {
                wdev_id: wdev_id as u64,
                ..UmacIds::default()
            },
            ..Self::default()
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = WireReader::new(data);
        Ok(Self {
            portid: reader.read_u32_le()?,
            cmd_evnt: reader.read_u32_le()?,
            seq: reader.read_i32_le()?,
            rpu_ret_val: reader.read_i32_le()?,
            ids: UmacIds {
                valid_fields: reader.read_u32_le()?,
                ifaceindex: reader.read_i32_le()?,
                wiphy_idx: reader.read_i32_le()?,
                wdev_id: reader.read_u64_le()?,
            },
        })
    }

    pub fn write(&self, writer: &mut WireWriter) -> Result<()> {
        writer.write_u32_le(self.portid)?;
        writer.write_u32_le(self.cmd_evnt)?;
        writer.write_i32_le(self.seq)?;
        writer.write_i32_le(self.rpu_ret_val)?;
        writer.write_u32_le(self.ids.valid_fields)?;
        writer.write_i32_le(self.ids.ifaceindex)?;
        writer.write_i32_le(self.ids.wiphy_idx)?;
        writer.write_u64_le(self.ids.wdev_id)
    }

    /// Encode header into a standalone byte vector
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; UMAC_HDR_LEN];
        let mut writer = WireWriter::new(&mut buf);
        // Exact-size buffer, writes cannot run past the end
        let _ = self.write(&mut writer);
        buf
    }
}

/// Head of each sub-event packed in a DATA message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataEventHead {
    pub cmd: u32,
    /// Sub-event length, head included
    pub len: u32,
}

impl DataEventHead {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = WireReader::new(data);
        Ok(Self {
            cmd: reader.read_u32_le()?,
            len: reader.read_u32_le()?,
        })
    }
}

/// Checked little-endian reader over a borrowed buffer
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Create new reader at offset 0
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Create new reader positioned at `offset`
    pub fn at(data: &'a [u8], offset: usize) -> Result<Self> {
        let mut reader = Self::new(data);
        reader.seek(offset)?;
        Ok(reader)
    }

    /// Current read position
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Move to an absolute offset
    pub fn seek(&mut self, offset: usize) -> Result<()> {
        if offset > self.data.len() {
            return Err(FmacError::MalformedMessage(format!(
                "offset {} beyond message length {}",
                offset,
                self.data.len()
            )));
        }
        self.pos = offset;
        Ok(())
    }

    fn ensure(&self, count: usize) -> Result<()> {
        if self.remaining() < count {
            return Err(FmacError::MalformedMessage(format!(
                "truncated: need {} bytes at offset {}, have {}",
                count,
                self.pos,
                self.remaining()
            )));
        }
        Ok(())
    }

    /// Skip bytes
    pub fn skip(&mut self, count: usize) -> Result<()> {
        self.ensure(count)?;
        self.pos += count;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        let value = self.data[self.pos];
        self.pos += 1;
        Ok(value)
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        self.read_u8().map(|v| v as i8)
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        self.ensure(2)?;
        let mut buf = &self.data[self.pos..];
        self.pos += 2;
        Ok(buf.get_u16_le())
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        self.ensure(4)?;
        let mut buf = &self.data[self.pos..];
        self.pos += 4;
        Ok(buf.get_u32_le())
    }

    pub fn read_i32_le(&mut self) -> Result<i32> {
        self.ensure(4)?;
        let mut buf = &self.data[self.pos..];
        self.pos += 4;
        Ok(buf.get_i32_le())
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        self.ensure(8)?;
        let mut buf = &self.data[self.pos..];
        self.pos += 8;
        Ok(buf.get_u64_le())
    }

    /// Borrow the next `count` bytes
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        self.ensure(count)?;
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    /// Read a fixed-size byte array
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }
}

/// Checked little-endian writer over a pre-sized buffer
///
/// The buffer is never grown: outbound messages are allocated at their exact
/// size up front, and a write past the end is a serialization error.
#[derive(Debug)]
pub struct WireWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> WireWriter<'a> {
    /// Create new writer at offset 0
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn seek(&mut self, offset: usize) -> Result<()> {
        if offset > self.buf.len() {
            return Err(FmacError::Serialization(format!(
                "seek to {} beyond buffer length {}",
                offset,
                self.buf.len()
            )));
        }
        self.pos = offset;
        Ok(())
    }

    /// Skip bytes, leaving them untouched
    pub fn skip(&mut self, count: usize) -> Result<()> {
        self.ensure(count)?;
        self.pos += count;
        Ok(())
    }

    fn ensure(&self, count: usize) -> Result<()> {
        if self.remaining() < count {
            return Err(FmacError::Serialization(format!(
                "write of {} bytes at offset {} overruns buffer of {}",
                count,
                self.pos,
                self.buf.len()
            )));
        }
        Ok(())
    }

    fn cursor(&mut self, count: usize) -> Result<&mut [u8]> {
        self.ensure(count)?;
        let start = self.pos;
        self.pos += count;
        Ok(&mut self.buf[start..start + count])
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.cursor(1)?.put_u8(value);
        Ok(())
    }

    pub fn write_i8(&mut self, value: i8) -> Result<()> {
        self.cursor(1)?.put_i8(value);
        Ok(())
    }

    pub fn write_u16_le(&mut self, value: u16) -> Result<()> {
        self.cursor(2)?.put_u16_le(value);
        Ok(())
    }

    pub fn write_u32_le(&mut self, value: u32) -> Result<()> {
        self.cursor(4)?.put_u32_le(value);
        Ok(())
    }

    pub fn write_i32_le(&mut self, value: i32) -> Result<()> {
        self.cursor(4)?.put_i32_le(value);
        Ok(())
    }

    pub fn write_u64_le(&mut self, value: u64) -> Result<()> {
        self.cursor(8)?.put_u64_le(value);
        Ok(())
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.cursor(data.len())?.copy_from_slice(data);
        Ok(())
    }
}

/// Allocator for outbound message buffers
pub trait MessageAllocator: Send + Sync {
    /// Allocate a zero-initialized buffer of exactly `len` bytes
    fn alloc_zeroed(&self, len: usize) -> Result<Vec<u8>>;

    /// Allocation statistics
    fn stats(&self) -> AllocStats {
        AllocStats::default()
    }
}

/// Heap-backed allocator with an optional size limit
#[derive(Debug, Default)]
pub struct HeapAllocator {
    limit: Option<usize>,
    allocated: AtomicU64,
    failed: AtomicU64,
    bytes: AtomicU64,
}

impl HeapAllocator {
    /// Create new allocator capped at `RPU_MAX_MESSAGE_LEN`
    pub fn new() -> Self {
        Self::with_limit(RPU_MAX_MESSAGE_LEN)
    }

    /// Create allocator refusing requests above `limit` bytes
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Create allocator without a size limit
    pub fn unbounded() -> Self {
        Self::default()
    }

    fn fail(&self, len: usize) -> FmacError {
        self.failed.fetch_add(1, Ordering::Relaxed);
        log::error!("Unable to allocate {} byte message", len);
        FmacError::AllocationFailed
    }
}

impl MessageAllocator for HeapAllocator {
    fn alloc_zeroed(&self, len: usize) -> Result<Vec<u8>> {
        if self.limit.map_or(false, |limit| len > limit) {
            return Err(self.fail(len));
        }

        let mut buf = Vec::new();
        if buf.try_reserve_exact(len).is_err() {
            return Err(self.fail(len));
        }
        buf.resize(len, 0);

        self.allocated.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(len as u64, Ordering::Relaxed);
        Ok(buf)
    }

    fn stats(&self) -> AllocStats {
        AllocStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

/// Allocator statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocStats {
    /// Buffers handed out
    pub allocated: u64,
    /// Requests refused
    pub failed: u64,
    /// Total bytes handed out
    pub bytes: u64,
}

impl AllocStats {
    /// Get failure rate
    pub fn failure_rate(&self) -> f64 {
        let total = self.allocated + self.failed;
        if total > 0 {
            self.failed as f64 / total as f64
        } else {
            0.0
        }
    }
}

/// Build a complete outbound message
///
/// Allocates `RPU_MSG_HDR_LEN + payload_len` zeroed bytes, writes the outer
/// header and hands `fill` a writer positioned at the start of the payload.
pub fn build_message<F>(
    allocator: &dyn MessageAllocator,
    msg_type: MessageType,
    payload_len: usize,
    fill: F,
) -> Result<Bytes>
where
    F: FnOnce(&mut WireWriter) -> Result<()>,
{
    let mut buf = allocator.alloc_zeroed(RPU_MSG_HDR_LEN + payload_len)?;
    {
        let mut writer = WireWriter::new(&mut buf);
        RpuMsgHeader::new(msg_type, payload_len).write(&mut writer)?;
        fill(&mut writer)?;
    }
    Ok(Bytes::from(buf))
}
