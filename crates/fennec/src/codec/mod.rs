//! Streaming codec for `(timestamp, protobuf message)` datapoints.
//!
//! The encoder decomposes each message by schema field and applies a
//! specialized coder per field (delta-of-delta timestamps, XOR floats,
//! significant-bits integer deltas, an LRU byte dictionary) and falls
//! back to a schema-diffed generic marshal for everything else. The
//! decoder replays the stream losslessly. See the module docs of
//! [`encoder`] for the record layout.

pub mod decoder;
pub mod dictionary;
pub mod encoder;
pub mod numeric;
pub mod plan;
pub mod stream;
pub mod timestamp;

pub use decoder::Decoder;
pub use encoder::{Encoder, EncoderOptions, Segment};
pub use plan::CustomFieldKind;
pub use stream::{BitReader, BitWriter};
pub use timestamp::{TimeUnit, TimestampDecoder, TimestampEncoder};

/// Version tag written at the head of every stream.
pub const ENCODING_SCHEME_VERSION: u64 = 1;

/// Number of bits for each custom-type code in the schema preamble.
pub(crate) const NUM_BITS_CUSTOM_TYPE: u32 = 3;

// Control-bit values. These are part of the wire format: encoder and
// decoder must agree on every one of them.
pub(crate) const OP_MORE_DATA: bool = true;
pub(crate) const OP_CHANGE: bool = true;
pub(crate) const OP_NO_CHANGE: bool = false;
pub(crate) const OP_BYTES_NEW_BLOB: bool = false;
pub(crate) const OP_BYTES_LRU_INDEX: bool = true;
pub(crate) const OP_NO_FIELDS_SET_TO_DEFAULT: bool = false;
pub(crate) const OP_FIELDS_SET_TO_DEFAULT: bool = true;
pub(crate) const OP_INT_SIGN_POS: bool = false;
pub(crate) const OP_INT_SIGN_NEG: bool = true;
pub(crate) const OP_BITSET_SET: bool = true;
pub(crate) const OP_BITSET_UNSET: bool = false;

/// A single time-series datapoint.
///
/// The codec is schema-driven: the message payload is authoritative and
/// the `value` field is ignored by the encoder. It exists so datapoints
/// carry the same shape as the rest of the storage engine; decoders always
/// report `0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Datapoint {
    /// Timestamp in nanoseconds.
    pub timestamp: i64,
    /// Scalar value slot, unused by the protobuf codec.
    pub value: f64,
}

impl Datapoint {
    /// Creates a datapoint at `timestamp` nanoseconds.
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}
