//! Record Codec - AbstractRecord and string encoding on a WireBuffer
//!
//! Record layout (big-endian):
//!
//! ```text
//! +------------+---------------+-------------+------------+---------------+-----------+
//! | u32 n_ints | u32 n_doubles | u32 n_chars | n_ints i32 | n_doubles f64 | n_chars u8|
//! +------------+---------------+-------------+------------+---------------+-----------+
//! ```
//!
//! Strings are a `u32` length followed by that many raw bytes, with no
//! terminator on the wire.

use std::str::FromStr;

use morlglue_common::{AbstractRecord, GlueError, Result, MAX_RECORD_FIELD_LEN};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::buffer::WireBuffer;

/// Size of the record header in bytes
pub const RECORD_HEADER_LEN: u32 = 12;

/// How a decoded record's arrays get their storage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeStrategy {
    /// Fresh arrays on every decode
    #[default]
    Reallocate,
    /// Keep the destination's storage when its capacity already suffices
    ReuseCapacity,
}

impl FromStr for DecodeStrategy {
    type Err = GlueError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reallocate" => Ok(DecodeStrategy::Reallocate),
            "reuse" | "reuse_capacity" => Ok(DecodeStrategy::ReuseCapacity),
            other => Err(GlueError::Config(format!(
                "unknown decode strategy '{}', expected 'reallocate' or 'reuse'",
                other
            ))),
        }
    }
}

/// Record encoder/decoder bound to a [`DecodeStrategy`]
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordCodec {
    strategy: DecodeStrategy,
}

impl RecordCodec {
    pub fn new(strategy: DecodeStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> DecodeStrategy {
        self.strategy
    }

    /// See [`encode_record`]
    pub fn encode(
        &self,
        record: Option<&AbstractRecord>,
        buffer: &mut WireBuffer,
        offset: u32,
    ) -> Result<u32> {
        encode_record(record, buffer, offset)
    }

    /// Decode into an existing record, returning the next offset
    pub fn decode(
        &self,
        buffer: &WireBuffer,
        offset: u32,
        record: &mut AbstractRecord,
    ) -> Result<u32> {
        decode_record_with(buffer, offset, record, self.strategy)
    }

    /// Decode into a new record
    pub fn decode_owned(&self, buffer: &WireBuffer, offset: u32) -> Result<(AbstractRecord, u32)> {
        let mut record = AbstractRecord::default();
        let next = self.decode(buffer, offset, &mut record)?;
        Ok((record, next))
    }
}

/// Encode `record` at `offset` and return the offset after it.
///
/// `None` goes out as the empty record (all three counts zero). A record
/// failing its integrity check is rejected before anything is written.
pub fn encode_record(
    record: Option<&AbstractRecord>,
    buffer: &mut WireBuffer,
    offset: u32,
) -> Result<u32> {
    let empty = AbstractRecord::default();
    let record = record.unwrap_or(&empty);

    if let Err(e) = record.check_integrity() {
        error!(error = %e, "Refusing to encode a corrupt record");
        return Err(e.into());
    }

    // check_integrity bounds every length by MAX_RECORD_FIELD_LEN
    let mut off = buffer.write(offset, record.ints.len() as u32)?;
    off = buffer.write(off, record.doubles.len() as u32)?;
    off = buffer.write(off, record.chars.len() as u32)?;
    off = buffer.write_slice(off, &record.ints)?;
    off = buffer.write_slice(off, &record.doubles)?;
    buffer.write_slice(off, &record.chars)
}

/// Decode the record at `offset` into `record` with full reallocation
pub fn decode_record(buffer: &WireBuffer, offset: u32, record: &mut AbstractRecord) -> Result<u32> {
    decode_record_with(buffer, offset, record, DecodeStrategy::Reallocate)
}

fn decode_record_with(
    buffer: &WireBuffer,
    offset: u32,
    record: &mut AbstractRecord,
    strategy: DecodeStrategy,
) -> Result<u32> {
    let (num_ints, off) = buffer.read::<u32>(offset)?;
    let (num_doubles, off) = buffer.read::<u32>(off)?;
    let (num_chars, off) = buffer.read::<u32>(off)?;

    if num_ints > MAX_RECORD_FIELD_LEN
        || num_doubles > MAX_RECORD_FIELD_LEN
        || num_chars > MAX_RECORD_FIELD_LEN
    {
        error!(
            ints = num_ints,
            doubles = num_doubles,
            chars = num_chars,
            "Corrupt datastream: record counts above ceiling"
        );
        return Err(GlueError::CorruptStream {
            ints: num_ints,
            doubles: num_doubles,
            chars: num_chars,
        });
    }

    // Validate the whole body before touching the destination
    let body = num_ints as u64 * 4 + num_doubles as u64 * 8 + num_chars as u64;
    buffer.check_readable(off, body)?;

    let (num_ints, num_doubles, num_chars) =
        (num_ints as usize, num_doubles as usize, num_chars as usize);
    match strategy {
        DecodeStrategy::Reallocate => record.reallocate(num_ints, num_doubles, num_chars),
        DecodeStrategy::ReuseCapacity => record.resize_reusing(num_ints, num_doubles, num_chars),
    }

    let off = buffer.read_slice(off, &mut record.ints)?;
    let off = buffer.read_slice(off, &mut record.doubles)?;
    buffer.read_slice(off, &mut record.chars)
}

/// Encode a length-prefixed string at `offset`
pub fn encode_str<T>(text: &T, buffer: &mut WireBuffer, offset: u32) -> Result<u32>
where
    T: AsRef<[u8]> + ?Sized,
{
    let bytes = text.as_ref();
    let len = u32::try_from(bytes.len()).map_err(|_| GlueError::PayloadTooLarge(bytes.len() as u64))?;
    let off = buffer.write(offset, len)?;
    buffer.write_slice(off, bytes)
}

/// Decode a length-prefixed string at `offset`.
///
/// The bytes are returned as sent; no text encoding is assumed.
pub fn decode_string(buffer: &WireBuffer, offset: u32) -> Result<(Vec<u8>, u32)> {
    let (len, off) = buffer.read::<u32>(offset)?;
    buffer.check_readable(off, len as u64)?;

    let mut bytes = vec![0u8; len as usize];
    let next = buffer.read_slice(off, &mut bytes)?;
    Ok((bytes, next))
}
