//! Error and Result types for Fennec codec operations.

use thiserror::Error;

/// A convenience `Result` type for Fennec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// The error type for encoding and decoding operations.
#[derive(Debug, Error)]
pub enum CodecError {
    /// `encode` was called before a schema was set.
    #[error("Encoder requires a schema, call set_schema first")]
    SchemaRequired,

    /// An operation was attempted on a closed encoder.
    #[error("Encoder is closed")]
    EncoderClosed,

    /// The encoder hit a hard error and must be reset before reuse.
    #[error("Encoder stream is corrupted, reset required")]
    StreamCorrupted,

    /// The payload bytes could not be parsed under the schema.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// The schema could not be constructed.
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// The parsed message contains a field outside the schema.
    #[error("Message has unknown field: {field_num}")]
    UnknownFields {
        /// First unknown field number encountered.
        field_num: u32,
    },

    /// A custom field held a value of an unexpected type.
    #[error("Type mismatch on field {field_num}: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Field number of the offending field.
        field_num: u32,
        /// Type the custom-field coder expected.
        expected: &'static str,
        /// Type actually present in the message.
        actual: &'static str,
    },

    /// A byte-dictionary entry points outside the current stream bounds.
    ///
    /// This is a hard error: the encoder must be considered corrupt.
    #[error(
        "Dictionary entry outside stream bounds: stream is {stream_len} bytes, \
         entry starts at {start} with length {length}"
    )]
    DictInconsistency {
        /// Current stream length in bytes.
        stream_len: usize,
        /// Byte offset recorded by the dictionary entry.
        start: usize,
        /// Length recorded by the dictionary entry.
        length: usize,
    },

    /// `last_encoded` was called before any successful `encode`.
    #[error("Encoder has no encoded datapoints")]
    NoDatapoints,

    /// The stream header carries an encoding scheme version this build
    /// does not understand.
    #[error("Unsupported encoding scheme version: {0}")]
    UnsupportedVersion(u64),

    /// The decoder ran off the end of the stream mid-record.
    #[error("Unexpected end of stream")]
    UnexpectedEndOfStream,

    /// The stream header carries an unknown time unit code.
    #[error("Invalid time unit code: {0}")]
    InvalidTimeUnit(u8),

    /// The decoded stream violates the format in a way that cannot be
    /// attributed to truncation.
    #[error("Malformed stream: {0}")]
    MalformedStream(String),
}
