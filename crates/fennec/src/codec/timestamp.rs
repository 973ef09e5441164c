//! Delta-of-delta timestamp coder.
//!
//! Timestamps are exchanged as nanoseconds; the stream's current time unit
//! sets the granularity at which deltas are measured. The coder shares the
//! encoder's bitstream, interleaving its bits into each datapoint record.
//!
//! # Format
//!
//! ```text
//! First  := unit(4 bits) timestamp(64 bits, ns)
//! Next   := '0'                                ; dod == 0 (in unit ticks)
//!        |  '10'    dod+63   (7 bits)          ; dod in [-63, 64]
//!        |  '110'   dod+255  (9 bits)          ; dod in [-255, 256]
//!        |  '1110'  dod+2047 (12 bits)         ; dod in [-2047, 2048]
//!        |  '11110' dod      (32 bits, i32)
//!        |  '11111' unit(4 bits) timestamp(64 bits, ns)   ; re-anchor
//! ```
//!
//! The re-anchor escape is taken when the caller's unit differs from the
//! stream's, when a delta is not a whole number of unit ticks, or when the
//! delta-of-delta overflows 32 bits. After an anchor the previous delta is
//! zero on both sides.

use crate::codec::stream::{BitReader, BitWriter};
use crate::error::{CodecError, Result};

/// Granularity at which timestamp deltas are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeUnit {
    /// One-second ticks.
    Seconds,
    /// One-millisecond ticks.
    Milliseconds,
    /// One-microsecond ticks.
    Microseconds,
    /// One-nanosecond ticks.
    #[default]
    Nanoseconds,
}

impl TimeUnit {
    /// Returns the tick size in nanoseconds.
    pub fn nanos(&self) -> i64 {
        match self {
            TimeUnit::Seconds => 1_000_000_000,
            TimeUnit::Milliseconds => 1_000_000,
            TimeUnit::Microseconds => 1_000,
            TimeUnit::Nanoseconds => 1,
        }
    }

    /// Returns the 4-bit wire code for this unit.
    pub(crate) fn wire_code(&self) -> u8 {
        match self {
            TimeUnit::Seconds => 0,
            TimeUnit::Milliseconds => 1,
            TimeUnit::Microseconds => 2,
            TimeUnit::Nanoseconds => 3,
        }
    }

    pub(crate) fn from_wire_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(TimeUnit::Seconds),
            1 => Ok(TimeUnit::Milliseconds),
            2 => Ok(TimeUnit::Microseconds),
            3 => Ok(TimeUnit::Nanoseconds),
            other => Err(CodecError::InvalidTimeUnit(other)),
        }
    }
}

const NUM_UNIT_BITS: u32 = 4;
const ESCAPE_MARKER: u64 = 0b11111;

/// Streaming delta-of-delta timestamp encoder.
#[derive(Debug)]
pub struct TimestampEncoder {
    unit: TimeUnit,
    prev_ts: i64,
    prev_delta: i64,
}

impl TimestampEncoder {
    /// Creates an encoder anchored at `start` nanoseconds.
    pub fn new(start: i64) -> Self {
        Self {
            unit: TimeUnit::default(),
            prev_ts: start,
            prev_delta: 0,
        }
    }

    /// Writes the stream's first timestamp: a unit tag and the raw 64-bit
    /// nanosecond timestamp.
    pub fn write_first(&mut self, w: &mut BitWriter, t: i64, unit: TimeUnit) {
        w.write_bits(u64::from(unit.wire_code()), NUM_UNIT_BITS);
        w.write_bits(t as u64, 64);
        self.unit = unit;
        self.prev_ts = t;
        self.prev_delta = 0;
    }

    /// Writes a subsequent timestamp as a delta-of-delta in unit ticks,
    /// re-anchoring when the delta cannot be expressed in the current unit.
    pub fn write_next(&mut self, w: &mut BitWriter, t: i64, unit: TimeUnit) {
        let delta_ns = t.wrapping_sub(self.prev_ts);
        if unit != self.unit || delta_ns % self.unit.nanos() != 0 {
            let anchor_unit = if delta_ns % unit.nanos() == 0 {
                unit
            } else {
                TimeUnit::Nanoseconds
            };
            self.write_anchor(w, t, anchor_unit);
            return;
        }

        let delta = delta_ns / self.unit.nanos();
        let dod = delta.wrapping_sub(self.prev_delta);

        if dod == 0 {
            w.write_bit(false);
        } else if (-63..=64).contains(&dod) {
            w.write_bits(0b10, 2);
            w.write_bits((dod + 63) as u64, 7);
        } else if (-255..=256).contains(&dod) {
            w.write_bits(0b110, 3);
            w.write_bits((dod + 255) as u64, 9);
        } else if (-2047..=2048).contains(&dod) {
            w.write_bits(0b1110, 4);
            w.write_bits((dod + 2047) as u64, 12);
        } else if let Ok(dod32) = i32::try_from(dod) {
            w.write_bits(0b11110, 5);
            w.write_bits(u64::from(dod32 as u32), 32);
        } else {
            self.write_anchor(w, t, self.unit);
            return;
        }

        self.prev_delta = delta;
        self.prev_ts = t;
    }

    fn write_anchor(&mut self, w: &mut BitWriter, t: i64, unit: TimeUnit) {
        w.write_bits(ESCAPE_MARKER, 5);
        w.write_bits(u64::from(unit.wire_code()), NUM_UNIT_BITS);
        w.write_bits(t as u64, 64);
        self.unit = unit;
        self.prev_ts = t;
        self.prev_delta = 0;
    }
}

/// Streaming delta-of-delta timestamp decoder, the mirror of
/// [`TimestampEncoder`].
#[derive(Debug, Default)]
pub struct TimestampDecoder {
    unit: TimeUnit,
    prev_ts: i64,
    prev_delta: i64,
}

impl TimestampDecoder {
    /// Creates a decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the stream's first timestamp.
    pub fn read_first(&mut self, r: &mut BitReader<'_>) -> Result<i64> {
        let code = r
            .read_bits(NUM_UNIT_BITS)
            .ok_or(CodecError::UnexpectedEndOfStream)?;
        self.unit = TimeUnit::from_wire_code(code as u8)?;
        let t = r.read_bits(64).ok_or(CodecError::UnexpectedEndOfStream)? as i64;
        self.prev_ts = t;
        self.prev_delta = 0;
        Ok(t)
    }

    /// Reads a subsequent timestamp.
    pub fn read_next(&mut self, r: &mut BitReader<'_>) -> Result<i64> {
        let mut prefix = 0u32;
        while prefix < 5 {
            match r.read_bit() {
                Some(true) => prefix += 1,
                Some(false) => break,
                None => return Err(CodecError::UnexpectedEndOfStream),
            }
        }

        let dod = match prefix {
            0 => 0,
            1 => {
                let v = r.read_bits(7).ok_or(CodecError::UnexpectedEndOfStream)?;
                v as i64 - 63
            }
            2 => {
                let v = r.read_bits(9).ok_or(CodecError::UnexpectedEndOfStream)?;
                v as i64 - 255
            }
            3 => {
                let v = r.read_bits(12).ok_or(CodecError::UnexpectedEndOfStream)?;
                v as i64 - 2047
            }
            4 => {
                let v = r.read_bits(32).ok_or(CodecError::UnexpectedEndOfStream)?;
                i64::from(v as u32 as i32)
            }
            _ => {
                // Re-anchor escape.
                let code = r
                    .read_bits(NUM_UNIT_BITS)
                    .ok_or(CodecError::UnexpectedEndOfStream)?;
                self.unit = TimeUnit::from_wire_code(code as u8)?;
                let t = r.read_bits(64).ok_or(CodecError::UnexpectedEndOfStream)? as i64;
                self.prev_ts = t;
                self.prev_delta = 0;
                return Ok(t);
            }
        };

        let delta = self.prev_delta.wrapping_add(dod);
        let t = self
            .prev_ts
            .wrapping_add(delta.wrapping_mul(self.unit.nanos()));
        self.prev_delta = delta;
        self.prev_ts = t;
        Ok(t)
    }
}
