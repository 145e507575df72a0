//! # Wire Codec — Exact-Size Binary Encoding
//!
//! Two-pass codec for the query path: `encoded_size` reports exactly the
//! number of bytes `write_to` will produce, so callers can carve a pooled
//! buffer of precisely that size and fill it with no growth and no
//! over-allocation. The transport reuses those buffers across calls, which
//! makes the size contract an invariant, not a hint.
//!
//! Both passes are driven by one layout description: a type implements
//! [`Wire::walk`] once, visiting its fields in wire order, and the sizing
//! and writing visitors replay the same walk. The two passes cannot drift.
//!
//! Layout rules:
//! - numeric fields are fixed-width little-endian
//! - strings and byte runs are length-prefixed with a `u32`
//! - decoding of truncated or malformed input fails with [`WireError`],
//!   never panics

use crate::{LogEvent, QueryRequest, QueryResult};
use thiserror::Error;

/// Codec failure. `Truncated` and `BadData` come from reading hostile or
/// cut-off input; `Overflow` means a writer was handed a buffer smaller
/// than the value's `encoded_size`, which is a caller bug surfaced as an
/// error rather than a panic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("truncated input: need {need} bytes at offset {at}, have {have}")]
    Truncated { at: usize, need: usize, have: usize },
    #[error("write past end of pre-sized buffer at offset {at}")]
    Overflow { at: usize },
    #[error("malformed input: {0}")]
    BadData(String),
}

// =============================================================================
// Layout walk
// =============================================================================

/// Receiver for one field-by-field walk over a value's wire layout.
pub trait WireVisitor {
    fn u32(&mut self, v: u32) -> Result<(), WireError>;
    fn u64(&mut self, v: u64) -> Result<(), WireError>;
    fn i32(&mut self, v: i32) -> Result<(), WireError>;
    fn i64(&mut self, v: i64) -> Result<(), WireError>;
    fn str(&mut self, v: &str) -> Result<(), WireError>;
}

/// A value with a binary wire layout. `walk` visits every field in wire
/// order; it is the single source of truth for both sizing and writing.
pub trait Wire {
    fn walk<V: WireVisitor>(&self, v: &mut V) -> Result<(), WireError>;
}

/// Object-safe encoding surface used at the transport boundary.
///
/// Blanket-implemented for every [`Wire`] type; transports only ever see
/// `&dyn Writable`.
pub trait Writable {
    /// Exactly the number of bytes `write_to` will produce.
    fn encoded_size(&self) -> usize;
    /// Serialize into `w`. The caller pre-sizes the underlying buffer from
    /// `encoded_size`.
    fn write_to(&self, w: &mut WireWriter<'_>) -> Result<(), WireError>;
}

impl<T: Wire> Writable for T {
    fn encoded_size(&self) -> usize {
        let mut sizer = Sizer(0);
        // The sizing visitor never fails.
        let _ = self.walk(&mut sizer);
        sizer.0
    }

    fn write_to(&self, w: &mut WireWriter<'_>) -> Result<(), WireError> {
        self.walk(w)
    }
}

struct Sizer(usize);

impl WireVisitor for Sizer {
    fn u32(&mut self, _: u32) -> Result<(), WireError> {
        self.0 += 4;
        Ok(())
    }
    fn u64(&mut self, _: u64) -> Result<(), WireError> {
        self.0 += 8;
        Ok(())
    }
    fn i32(&mut self, _: i32) -> Result<(), WireError> {
        self.0 += 4;
        Ok(())
    }
    fn i64(&mut self, _: i64) -> Result<(), WireError> {
        self.0 += 8;
        Ok(())
    }
    fn str(&mut self, v: &str) -> Result<(), WireError> {
        self.0 += 4 + v.len();
        Ok(())
    }
}

// =============================================================================
// Writer
// =============================================================================

/// Writes fixed-layout values into a caller-provided, pre-sized buffer.
pub struct WireWriter<'a> {
    buf: &'a mut [u8],
    off: usize,
}

impl<'a> WireWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, off: 0 }
    }

    /// Bytes written so far.
    #[inline]
    pub fn written(&self) -> usize {
        self.off
    }

    fn put(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        let end = self.off + bytes.len();
        if end > self.buf.len() {
            return Err(WireError::Overflow { at: self.off });
        }
        self.buf[self.off..end].copy_from_slice(bytes);
        self.off = end;
        Ok(())
    }
}

impl WireVisitor for WireWriter<'_> {
    fn u32(&mut self, v: u32) -> Result<(), WireError> {
        self.put(&v.to_le_bytes())
    }
    fn u64(&mut self, v: u64) -> Result<(), WireError> {
        self.put(&v.to_le_bytes())
    }
    fn i32(&mut self, v: i32) -> Result<(), WireError> {
        self.put(&v.to_le_bytes())
    }
    fn i64(&mut self, v: i64) -> Result<(), WireError> {
        self.put(&v.to_le_bytes())
    }
    fn str(&mut self, v: &str) -> Result<(), WireError> {
        self.u32(v.len() as u32)?;
        self.put(v.as_bytes())
    }
}

// =============================================================================
// Reader
// =============================================================================

/// Reads fixed-layout values back out of a byte slice.
pub struct WireReader<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, off: 0 }
    }

    /// Bytes consumed so far.
    #[inline]
    pub fn consumed(&self) -> usize {
        self.off
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        let have = self.buf.len() - self.off;
        if n > have {
            return Err(WireError::Truncated {
                at: self.off,
                need: n,
                have,
            });
        }
        let out = &self.buf[self.off..self.off + n];
        self.off += n;
        Ok(out)
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64, WireError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_i32(&mut self) -> Result<i32, WireError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_i64(&mut self) -> Result<i64, WireError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_str(&mut self) -> Result<String, WireError> {
        let len = self.read_u32()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| WireError::BadData(format!("string is not UTF-8: {e}")))
    }
}

// =============================================================================
// Type layouts
// =============================================================================

impl Wire for LogEvent {
    fn walk<V: WireVisitor>(&self, v: &mut V) -> Result<(), WireError> {
        v.i64(self.timestamp)?;
        v.str(&self.tags)?;
        v.str(&self.message)
    }
}

impl LogEvent {
    pub fn read_from(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            timestamp: r.read_i64()?,
            tags: r.read_str()?,
            message: r.read_str()?,
        })
    }
}

impl Wire for QueryRequest {
    fn walk<V: WireVisitor>(&self, v: &mut V) -> Result<(), WireError> {
        v.u64(self.id)?;
        v.str(&self.query)?;
        v.str(&self.pos)?;
        v.i64(self.limit)?;
        v.i32(self.wait_timeout_secs)
    }
}

impl QueryRequest {
    pub fn read_from(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            id: r.read_u64()?,
            query: r.read_str()?,
            pos: r.read_str()?,
            limit: r.read_i64()?,
            wait_timeout_secs: r.read_i32()?,
        })
    }
}

impl Wire for QueryResult {
    fn walk<V: WireVisitor>(&self, v: &mut V) -> Result<(), WireError> {
        v.u32(self.events.len() as u32)?;
        for ev in &self.events {
            ev.walk(v)?;
        }
        self.next.walk(v)
    }
}

impl QueryResult {
    pub fn read_from(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        let count = r.read_u32()? as usize;
        // A count prefix can claim more events than the buffer could possibly
        // hold; size the Vec from the input, not the claim.
        let mut events = Vec::with_capacity(count.min(r.buf.len() / 12 + 1));
        for _ in 0..count {
            events.push(LogEvent::read_from(r)?);
        }
        Ok(Self {
            events,
            next: QueryRequest::read_from(r)?,
        })
    }
}

/// Length-prefixed UTF-8 text request (the Sources call's request body).
pub struct WritableStr<'a>(pub &'a str);

impl Wire for WritableStr<'_> {
    fn walk<V: WireVisitor>(&self, v: &mut V) -> Result<(), WireError> {
        v.str(self.0)
    }
}

/// Encode any wire value into a fresh, exactly-sized Vec.
///
/// Transports that pool their buffers size them the same way; this helper
/// is for tests and one-off callers.
pub fn encode(value: &dyn Writable) -> Result<Vec<u8>, WireError> {
    let mut buf = vec![0u8; value.encoded_size()];
    let mut w = WireWriter::new(&mut buf);
    value.write_to(&mut w)?;
    debug_assert_eq!(w.written(), buf.len());
    Ok(buf)
}
