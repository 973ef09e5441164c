//! Integer and float value coders.
//!
//! # Integer encoding (delta + significant bits)
//!
//! The first value of a field is written in full: its significant-bit count
//! through the tracker encoding, a sign bit, then that many magnitude bits.
//! Subsequent values are written as deltas against the previous value, with
//! a one-bit fast path for unchanged values. The tracker remembers the
//! widest significant-bit count it has emitted and refuses to narrow, so in
//! the common case a record needs no explicit width prefix:
//!
//! ```text
//! SigUpdate := '0'                       ; same as the tracker's current width
//!           |  '1' '0'                   ; width = 0
//!           |  '1' '1' width-1 (6 bits)  ; width in [1, 64]
//! ```
//!
//! # Float encoding (XOR)
//!
//! The first value of a field is its raw 64-bit IEEE-754 pattern.
//! Subsequent values XOR against the previous pattern and write one of
//! three runs, reusing the previous XOR's zero window when it still holds:
//!
//! ```text
//! XorRun := '0'                                   ; xor == 0
//!        |  '10' meaningful bits                  ; previous window holds
//!        |  '11' leading(6 bits) len-1(6 bits) meaningful bits
//! ```

use crate::codec::stream::{BitReader, BitWriter};
use crate::codec::{OP_CHANGE, OP_INT_SIGN_NEG, OP_INT_SIGN_POS, OP_NO_CHANGE};
use crate::error::{CodecError, Result};

const NUM_SIG_BITS: u32 = 6;

/// Returns the minimum number of bits needed to represent `v`.
pub(crate) fn num_sig_bits(v: u64) -> u8 {
    (64 - v.leading_zeros()) as u8
}

/// Widen-only estimator of the bit width needed for recent integer deltas.
///
/// The tracker remembers the widest count it has written; asking it to
/// track a narrower one returns the current width unchanged, which is what
/// lets the decoder follow along without a per-record width prefix.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SigBitsTracker {
    num_sig: u8,
}

impl SigBitsTracker {
    /// Returns the effective width for a delta needing `sig` bits.
    pub(crate) fn track(&self, sig: u8) -> u8 {
        self.num_sig.max(sig)
    }

    /// Writes `sig` through the tracker encoding and adopts it as the
    /// current width.
    pub(crate) fn write_sig(&mut self, w: &mut BitWriter, sig: u8) {
        if self.num_sig == sig {
            w.write_bit(false);
        } else {
            w.write_bit(true);
            if sig == 0 {
                w.write_bit(false);
            } else {
                w.write_bit(true);
                w.write_bits(u64::from(sig - 1), NUM_SIG_BITS);
            }
        }
        self.num_sig = sig;
    }

    /// Reads a width through the tracker encoding and adopts it.
    pub(crate) fn read_sig(&mut self, r: &mut BitReader<'_>) -> Result<u8> {
        let updated = r.read_bit().ok_or(CodecError::UnexpectedEndOfStream)?;
        if updated {
            let non_zero = r.read_bit().ok_or(CodecError::UnexpectedEndOfStream)?;
            self.num_sig = if non_zero {
                let v = r
                    .read_bits(NUM_SIG_BITS)
                    .ok_or(CodecError::UnexpectedEndOfStream)?;
                v as u8 + 1
            } else {
                0
            };
        }
        Ok(self.num_sig)
    }
}

/// Per-field state for the integer delta coder. The previous value is held
/// as its 64-bit pattern regardless of the field's logical width or sign.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct IntCoderState {
    prev_bits: u64,
    tracker: SigBitsTracker,
}

impl IntCoderState {
    pub(crate) fn write_first_signed(&mut self, w: &mut BitWriter, v: i64) {
        let neg = v < 0;
        let magnitude = v.unsigned_abs();
        let sig = num_sig_bits(magnitude);
        self.tracker.write_sig(w, sig);
        write_int_diff(w, magnitude, neg, sig);
        self.prev_bits = v as u64;
    }

    pub(crate) fn write_next_signed(&mut self, w: &mut BitWriter, v: i64) {
        let prev = self.prev_bits as i64;
        let diff = v.wrapping_sub(prev);
        if diff == 0 {
            w.write_bit(OP_NO_CHANGE);
            return;
        }
        w.write_bit(OP_CHANGE);

        let neg = diff < 0;
        let magnitude = diff.unsigned_abs();
        let sig = self.tracker.track(num_sig_bits(magnitude));
        self.tracker.write_sig(w, sig);
        write_int_diff(w, magnitude, neg, sig);
        self.prev_bits = v as u64;
    }

    pub(crate) fn write_first_unsigned(&mut self, w: &mut BitWriter, v: u64) {
        let sig = num_sig_bits(v);
        self.tracker.write_sig(w, sig);
        write_int_diff(w, v, false, sig);
        self.prev_bits = v;
    }

    pub(crate) fn write_next_unsigned(&mut self, w: &mut BitWriter, v: u64) {
        let prev = self.prev_bits;
        // Branch on direction to avoid underflow.
        let (diff, neg) = if v > prev {
            (v - prev, false)
        } else {
            (prev - v, true)
        };
        if diff == 0 {
            w.write_bit(OP_NO_CHANGE);
            return;
        }
        w.write_bit(OP_CHANGE);

        let sig = self.tracker.track(num_sig_bits(diff));
        self.tracker.write_sig(w, sig);
        write_int_diff(w, diff, neg, sig);
        self.prev_bits = v;
    }

    pub(crate) fn read_first_signed(&mut self, r: &mut BitReader<'_>) -> Result<i64> {
        let sig = self.tracker.read_sig(r)?;
        let (magnitude, neg) = read_int_diff(r, sig)?;
        let v = apply_signed_diff(0, magnitude, neg);
        self.prev_bits = v as u64;
        Ok(v)
    }

    pub(crate) fn read_next_signed(&mut self, r: &mut BitReader<'_>) -> Result<i64> {
        let changed = r.read_bit().ok_or(CodecError::UnexpectedEndOfStream)?;
        if !changed {
            return Ok(self.prev_bits as i64);
        }
        let sig = self.tracker.read_sig(r)?;
        let (magnitude, neg) = read_int_diff(r, sig)?;
        let v = apply_signed_diff(self.prev_bits as i64, magnitude, neg);
        self.prev_bits = v as u64;
        Ok(v)
    }

    pub(crate) fn read_first_unsigned(&mut self, r: &mut BitReader<'_>) -> Result<u64> {
        let sig = self.tracker.read_sig(r)?;
        let (magnitude, _neg) = read_int_diff(r, sig)?;
        self.prev_bits = magnitude;
        Ok(magnitude)
    }

    pub(crate) fn read_next_unsigned(&mut self, r: &mut BitReader<'_>) -> Result<u64> {
        let changed = r.read_bit().ok_or(CodecError::UnexpectedEndOfStream)?;
        if !changed {
            return Ok(self.prev_bits);
        }
        let sig = self.tracker.read_sig(r)?;
        let (magnitude, neg) = read_int_diff(r, sig)?;
        let v = if neg {
            self.prev_bits.wrapping_sub(magnitude)
        } else {
            self.prev_bits.wrapping_add(magnitude)
        };
        self.prev_bits = v;
        Ok(v)
    }
}

fn write_int_diff(w: &mut BitWriter, magnitude: u64, neg: bool, sig: u8) {
    w.write_bit(if neg { OP_INT_SIGN_NEG } else { OP_INT_SIGN_POS });
    w.write_bits(magnitude, u32::from(sig));
}

fn read_int_diff(r: &mut BitReader<'_>, sig: u8) -> Result<(u64, bool)> {
    let neg = r.read_bit().ok_or(CodecError::UnexpectedEndOfStream)? == OP_INT_SIGN_NEG;
    let magnitude = r
        .read_bits(u32::from(sig))
        .ok_or(CodecError::UnexpectedEndOfStream)?;
    Ok((magnitude, neg))
}

fn apply_signed_diff(prev: i64, magnitude: u64, neg: bool) -> i64 {
    if neg {
        prev.wrapping_sub(magnitude as i64)
    } else {
        prev.wrapping_add(magnitude as i64)
    }
}

/// Per-field state for the XOR float coder.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FloatCoderState {
    prev_bits: u64,
    prev_xor: u64,
}

impl FloatCoderState {
    pub(crate) fn write_first(&mut self, w: &mut BitWriter, v: f64) {
        let bits = v.to_bits();
        w.write_bits(bits, 64);
        self.prev_bits = bits;
        self.prev_xor = bits;
    }

    pub(crate) fn write_next(&mut self, w: &mut BitWriter, v: f64) {
        let cur_bits = v.to_bits();
        let xor = self.prev_bits ^ cur_bits;
        write_xor(w, self.prev_xor, xor);
        self.prev_bits = cur_bits;
        self.prev_xor = xor;
    }

    pub(crate) fn read_first(&mut self, r: &mut BitReader<'_>) -> Result<f64> {
        let bits = r.read_bits(64).ok_or(CodecError::UnexpectedEndOfStream)?;
        self.prev_bits = bits;
        self.prev_xor = bits;
        Ok(f64::from_bits(bits))
    }

    pub(crate) fn read_next(&mut self, r: &mut BitReader<'_>) -> Result<f64> {
        let xor = read_xor(r, self.prev_xor)?;
        let bits = self.prev_bits ^ xor;
        self.prev_bits = bits;
        self.prev_xor = xor;
        Ok(f64::from_bits(bits))
    }
}

/// Returns `(leading, trailing)` zero counts of `v`, with the sentinel
/// window `(64, 0)` for zero so a zero previous XOR never contains the
/// current one.
fn leading_and_trailing_zeros(v: u64) -> (u32, u32) {
    if v == 0 {
        return (64, 0);
    }
    (v.leading_zeros(), v.trailing_zeros())
}

/// Writes one XOR run, reusing the previous XOR's zero window when it
/// still holds.
pub(crate) fn write_xor(w: &mut BitWriter, prev_xor: u64, cur_xor: u64) {
    if cur_xor == 0 {
        w.write_bit(false);
        return;
    }

    let (prev_leading, prev_trailing) = leading_and_trailing_zeros(prev_xor);
    let (cur_leading, cur_trailing) = leading_and_trailing_zeros(cur_xor);
    if cur_leading >= prev_leading && cur_trailing >= prev_trailing {
        w.write_bits(0b10, 2);
        w.write_bits(cur_xor >> prev_trailing, 64 - prev_leading - prev_trailing);
        return;
    }

    let meaningful = 64 - cur_leading - cur_trailing;
    w.write_bits(0b11, 2);
    w.write_bits(u64::from(cur_leading), 6);
    w.write_bits(u64::from(meaningful - 1), 6);
    w.write_bits(cur_xor >> cur_trailing, meaningful);
}

/// Reads one XOR run written by [`write_xor`].
pub(crate) fn read_xor(r: &mut BitReader<'_>, prev_xor: u64) -> Result<u64> {
    if !r.read_bit().ok_or(CodecError::UnexpectedEndOfStream)? {
        return Ok(0);
    }

    let new_window = r.read_bit().ok_or(CodecError::UnexpectedEndOfStream)?;
    if !new_window {
        let (prev_leading, prev_trailing) = leading_and_trailing_zeros(prev_xor);
        let meaningful = 64 - prev_leading - prev_trailing;
        let v = r
            .read_bits(meaningful)
            .ok_or(CodecError::UnexpectedEndOfStream)?;
        return Ok(v << prev_trailing);
    }

    let leading = r.read_bits(6).ok_or(CodecError::UnexpectedEndOfStream)? as u32;
    let meaningful = r.read_bits(6).ok_or(CodecError::UnexpectedEndOfStream)? as u32 + 1;
    if leading + meaningful > 64 {
        return Err(CodecError::MalformedStream(
            "xor window exceeds 64 bits".to_string(),
        ));
    }
    let trailing = 64 - leading - meaningful;
    let v = r
        .read_bits(meaningful)
        .ok_or(CodecError::UnexpectedEndOfStream)?;
    Ok(v << trailing)
}
