//! Record layout used by the simulated runtime
//!
//! Each record is an 8 byte header (kind tag, payload length, both
//! little-endian `u32`) followed by the payload, padded so the next record
//! starts on an 8 byte boundary. Kinds without a dedicated payload layout are
//! skipped using the payload length.

use cutrace_shared::{
    ActivityKind, ActivityRecord, ApiActivity, KernelActivity, MemcpyActivity, MemsetActivity,
};

use crate::buffer::BUFFER_ALIGN;
use crate::error::RuntimeError;

pub const HEADER_LEN: usize = 8;

const MEMCPY_PAYLOAD_LEN: usize = 1 + 8 * 2 + 4 * 5 + 8;
const MEMSET_PAYLOAD_LEN: usize = 2 + 8 * 2 + 4 * 4 + 8;
const API_PAYLOAD_LEN: usize = 4 + 8 * 2 + 4 * 3;
const KERNEL_FIXED_LEN: usize = 8 * 2 + 4 * 4 + 4 * 8 + 4;

fn padded(len: usize) -> usize {
    (len + BUFFER_ALIGN - 1) / BUFFER_ALIGN * BUFFER_ALIGN
}

/// Total space a record with `payload_len` payload bytes occupies
pub fn record_len(payload_len: usize) -> usize {
    HEADER_LEN + padded(payload_len)
}

/// Encode a record with an arbitrary kind tag and payload
pub fn encode_raw(kind: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(record_len(payload.len()));
    out.extend_from_slice(&kind.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out.resize(record_len(payload.len()), 0);
    out
}

/// Encode a decoded activity record
pub fn encode(record: &ActivityRecord) -> Vec<u8> {
    let mut payload = Vec::new();
    match record {
        ActivityRecord::Memcpy(m) => {
            payload.push(m.copy_kind);
            put_u64(&mut payload, m.start);
            put_u64(&mut payload, m.end);
            for v in [m.device_id, m.context_id, m.stream_id, m.correlation_id, m.runtime_correlation_id] {
                put_u32(&mut payload, v);
            }
            put_u64(&mut payload, m.bytes);
        }
        ActivityRecord::Memset(m) => {
            payload.extend_from_slice(&m.memory_kind.to_le_bytes());
            put_u64(&mut payload, m.start);
            put_u64(&mut payload, m.end);
            for v in [m.device_id, m.context_id, m.stream_id, m.correlation_id] {
                put_u32(&mut payload, v);
            }
            put_u64(&mut payload, m.bytes);
        }
        ActivityRecord::Driver(api) | ActivityRecord::Runtime(api) => {
            put_u32(&mut payload, api.cbid);
            put_u64(&mut payload, api.start);
            put_u64(&mut payload, api.end);
            for v in [api.process_id, api.thread_id, api.correlation_id] {
                put_u32(&mut payload, v);
            }
        }
        ActivityRecord::Kernel(k) | ActivityRecord::ConcurrentKernel(k) => {
            put_u64(&mut payload, k.start);
            put_u64(&mut payload, k.end);
            for v in [k.device_id, k.context_id, k.stream_id, k.correlation_id] {
                put_u32(&mut payload, v);
            }
            for v in [
                k.grid.0,
                k.grid.1,
                k.grid.2,
                k.block.0,
                k.block.1,
                k.block.2,
                k.static_shared_memory,
                k.dynamic_shared_memory,
            ] {
                payload.extend_from_slice(&v.to_le_bytes());
            }
            put_u32(&mut payload, k.name.len() as u32);
            payload.extend_from_slice(k.name.as_bytes());
        }
        ActivityRecord::Unknown { .. } => {}
    }
    encode_raw(record.raw_kind(), &payload)
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Bounds-checked little-endian reader over one payload
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    record_offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], RuntimeError> {
        let end = self.pos + n;
        if end > self.bytes.len() {
            return Err(RuntimeError::CorruptRecord {
                offset: self.record_offset,
                reason: format!("payload truncated at byte {}", self.pos),
            });
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], RuntimeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, RuntimeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, RuntimeError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, RuntimeError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32, RuntimeError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, RuntimeError> {
        Ok(u64::from_le_bytes(self.array()?))
    }
}

fn corrupt(offset: usize, reason: impl Into<String>) -> RuntimeError {
    RuntimeError::CorruptRecord {
        offset,
        reason: reason.into(),
    }
}

/// Read the header at `offset`, returning the kind tag and payload length
fn read_header(buffer: &[u8], offset: usize) -> Result<(u32, usize), RuntimeError> {
    let header = buffer
        .get(offset..offset + HEADER_LEN)
        .ok_or_else(|| corrupt(offset, "truncated record header"))?;
    let kind = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let payload_len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;

    if kind == 0 {
        return Err(corrupt(offset, "invalid kind tag 0"));
    }
    if offset + HEADER_LEN + payload_len > buffer.len() {
        return Err(corrupt(
            offset,
            format!("payload of {} bytes overruns the buffer", payload_len),
        ));
    }
    Ok((kind, payload_len))
}

/// Offset of the record following the one at `offset`
pub fn next_offset(buffer: &[u8], offset: usize) -> Result<usize, RuntimeError> {
    let (_, payload_len) = read_header(buffer, offset)?;
    Ok(offset + record_len(payload_len))
}

/// Decode the record at `offset`
pub fn decode_at(buffer: &[u8], offset: usize) -> Result<ActivityRecord, RuntimeError> {
    let (kind, payload_len) = read_header(buffer, offset)?;
    let payload_start = offset + HEADER_LEN;
    let payload = &buffer[payload_start..payload_start + payload_len];
    let mut r = Reader {
        bytes: payload,
        pos: 0,
        record_offset: offset,
    };

    let expect_len = |expected: usize| {
        if payload_len == expected {
            Ok(())
        } else {
            Err(corrupt(
                offset,
                format!("kind {} payload is {} bytes, expected {}", kind, payload_len, expected),
            ))
        }
    };

    let record = match ActivityKind::from_raw(kind) {
        Some(ActivityKind::Memcpy) => {
            expect_len(MEMCPY_PAYLOAD_LEN)?;
            ActivityRecord::Memcpy(MemcpyActivity {
                copy_kind: r.u8()?,
                start: r.u64()?,
                end: r.u64()?,
                device_id: r.u32()?,
                context_id: r.u32()?,
                stream_id: r.u32()?,
                correlation_id: r.u32()?,
                runtime_correlation_id: r.u32()?,
                bytes: r.u64()?,
            })
        }
        Some(ActivityKind::Memset) => {
            expect_len(MEMSET_PAYLOAD_LEN)?;
            ActivityRecord::Memset(MemsetActivity {
                memory_kind: r.u16()?,
                start: r.u64()?,
                end: r.u64()?,
                device_id: r.u32()?,
                context_id: r.u32()?,
                stream_id: r.u32()?,
                correlation_id: r.u32()?,
                bytes: r.u64()?,
            })
        }
        Some(api_kind @ (ActivityKind::Driver | ActivityKind::Runtime)) => {
            expect_len(API_PAYLOAD_LEN)?;
            let api = ApiActivity {
                cbid: r.u32()?,
                start: r.u64()?,
                end: r.u64()?,
                process_id: r.u32()?,
                thread_id: r.u32()?,
                correlation_id: r.u32()?,
            };
            if api_kind == ActivityKind::Driver {
                ActivityRecord::Driver(api)
            } else {
                ActivityRecord::Runtime(api)
            }
        }
        Some(kernel_kind @ (ActivityKind::Kernel | ActivityKind::ConcurrentKernel)) => {
            if payload_len < KERNEL_FIXED_LEN {
                return Err(corrupt(offset, "kernel payload too short"));
            }
            let start = r.u64()?;
            let end = r.u64()?;
            let device_id = r.u32()?;
            let context_id = r.u32()?;
            let stream_id = r.u32()?;
            let correlation_id = r.u32()?;
            let grid = (r.i32()?, r.i32()?, r.i32()?);
            let block = (r.i32()?, r.i32()?, r.i32()?);
            let static_shared_memory = r.i32()?;
            let dynamic_shared_memory = r.i32()?;
            let name_len = r.u32()? as usize;
            let name = String::from_utf8_lossy(r.take(name_len)?).into_owned();

            let kernel = KernelActivity {
                name,
                start,
                end,
                device_id,
                context_id,
                stream_id,
                correlation_id,
                grid,
                block,
                static_shared_memory,
                dynamic_shared_memory,
            };
            if kernel_kind == ActivityKind::Kernel {
                ActivityRecord::Kernel(kernel)
            } else {
                ActivityRecord::ConcurrentKernel(kernel)
            }
        }
        _ => ActivityRecord::Unknown { kind },
    };

    Ok(record)
}
