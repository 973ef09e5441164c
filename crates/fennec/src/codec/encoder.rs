//! Streaming protobuf datapoint encoder.
//!
//! The encoder consumes an ordered sequence of `(timestamp, payload)`
//! datapoints sharing one schema and emits a self-describing bitstream.
//! Each record interleaves, in order: a more-data control bit, the
//! delta-of-delta timestamp bits, one custom value per planned field, and
//! a proto tail carrying whatever the custom coders did not.
//!
//! # Stream layout
//!
//! ```text
//! Stream    := Header (MoreDataBit Record)*
//! Header    := varint(scheme_version)
//!              varint(byte_field_dict_lru_size)
//!              varint(max_custom_field_num)          ; 0 = no custom fields
//!              (custom_type_code(3 bits) x max_custom_field_num)
//! Record    := TimestampBits CustomValueBits* ProtoTail
//! ProtoTail := '0'                                   ; nothing changed
//!           |  '1' '0'          varint(len) bytes    ; sparse marshal
//!           |  '1' '1' Bitset   varint(len) bytes    ; + fields now default
//! Bitset    := varint(max) (bit x max)               ; bit i set = field i+1
//! ```
//!
//! The stream ends implicitly: a zero more-data bit, whether written or
//! read from the zero padding of the final byte, terminates iteration.

use crate::codec::dictionary::{self, encode_bytes_value};
use crate::codec::plan::{reset_custom_field_states, CoderState, CustomFieldKind, CustomFieldState};
use crate::codec::stream::BitWriter;
use crate::codec::timestamp::{TimeUnit, TimestampEncoder};
use crate::codec::{
    Datapoint, ENCODING_SCHEME_VERSION, NUM_BITS_CUSTOM_TYPE, OP_BITSET_SET, OP_BITSET_UNSET,
    OP_CHANGE, OP_FIELDS_SET_TO_DEFAULT, OP_MORE_DATA, OP_NO_CHANGE,
    OP_NO_FIELDS_SET_TO_DEFAULT,
};
use crate::error::{CodecError, Result};
use crate::proto::{Message, MessageSchema, Value};
use std::sync::Arc;
use tracing::debug;

/// Default byte-dictionary LRU capacity per `bytes` field.
pub const DEFAULT_BYTE_FIELD_DICT_LRU_SIZE: usize = 4;

/// Default initial stream buffer capacity in bytes.
pub const DEFAULT_INITIAL_CAPACITY: usize = 1024;

/// Encoder configuration.
#[derive(Debug, Clone)]
pub struct EncoderOptions {
    /// Capacity of each `bytes` field's LRU dictionary. Also fixes the
    /// width of back-reference indices (`ceil(log2(size))` bits), so it is
    /// written into the stream header.
    pub byte_field_dictionary_lru_size: usize,
    /// Bytes to preallocate for the output stream.
    pub initial_capacity: usize,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            byte_field_dictionary_lru_size: DEFAULT_BYTE_FIELD_DICT_LRU_SIZE,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
        }
    }
}

/// An encoded stream segment: the raw bytes handed out by
/// [`Encoder::stream`] / [`Encoder::discard`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segment {
    bytes: Vec<u8>,
}

impl Segment {
    /// Returns the segment length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the segment holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Borrows the segment bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the segment, yielding its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Streaming encoder for schema-conformant protobuf datapoints.
///
/// Single-threaded and non-reentrant; all emissions are totally ordered by
/// the sequence of [`Encoder::encode`] calls. Errors are surfaced
/// immediately and never retried internally: a soft error (bad payload,
/// unknown field, type mismatch) leaves the encoder usable but may leave a
/// partially-written record behind, while a hard dictionary inconsistency
/// latches the encoder until [`Encoder::reset`].
#[derive(Debug)]
pub struct Encoder {
    options: EncoderOptions,
    stream: BitWriter,
    schema: Option<Arc<MessageSchema>>,
    ts_encoder: TimestampEncoder,
    custom_fields: Vec<CustomFieldState>,
    num_index_bits: u32,

    num_encoded: usize,
    last_encoded: Option<Message>,
    last_encoded_dp: Datapoint,

    // Scratch, truncated at the top of each call.
    changed_fields: Vec<u32>,
    fields_changed_to_default: Vec<u32>,

    has_encoded_first_custom_values: bool,
    closed: bool,
    corrupt: bool,
}

impl Encoder {
    /// Creates an encoder anchored at `start` nanoseconds.
    pub fn new(start: i64, options: EncoderOptions) -> Self {
        let stream = BitWriter::with_capacity(options.initial_capacity);
        let num_index_bits = dictionary::num_index_bits(options.byte_field_dictionary_lru_size);
        Self {
            options,
            stream,
            schema: None,
            ts_encoder: TimestampEncoder::new(start),
            custom_fields: Vec::new(),
            num_index_bits,
            num_encoded: 0,
            last_encoded: None,
            last_encoded_dp: Datapoint::default(),
            changed_fields: Vec::new(),
            fields_changed_to_default: Vec::new(),
            has_encoded_first_custom_values: false,
            closed: false,
            corrupt: false,
        }
    }

    /// Sets the schema. Must be called before the first [`Encoder::encode`];
    /// changing the schema mid-stream is not supported.
    pub fn set_schema(&mut self, schema: Arc<MessageSchema>) {
        reset_custom_field_states(
            &mut self.custom_fields,
            &schema,
            self.options.byte_field_dictionary_lru_size,
        );
        self.schema = Some(schema);
    }

    /// Encodes one datapoint. `payload` must be a wire-format message
    /// conforming to the schema; the datapoint's `value` field is ignored.
    pub fn encode(&mut self, dp: Datapoint, unit: TimeUnit, payload: &[u8]) -> Result<()> {
        if self.closed {
            return Err(CodecError::EncoderClosed);
        }
        if self.corrupt {
            return Err(CodecError::StreamCorrupted);
        }
        let schema = self.schema.clone().ok_or(CodecError::SchemaRequired)?;

        // Parse up front so an invalid payload fails before any bits are
        // written.
        let mut msg = Message::decode(&schema, payload)?;

        if self.num_encoded == 0 {
            self.encode_header();
        }

        self.stream.write_bit(OP_MORE_DATA);

        if !self.has_encoded_first_custom_values {
            self.ts_encoder
                .write_first(&mut self.stream, dp.timestamp, unit);
        } else {
            self.ts_encoder
                .write_next(&mut self.stream, dp.timestamp, unit);
        }

        if let Err(err) = self.encode_record(&schema, &mut msg) {
            if matches!(err, CodecError::DictInconsistency { .. }) {
                self.corrupt = true;
            }
            return Err(err);
        }

        self.num_encoded += 1;
        self.last_encoded_dp = dp;
        Ok(())
    }

    /// Returns the stream length in bytes, counting a trailing partial
    /// byte as a full byte.
    pub fn len(&self) -> usize {
        self.stream.byte_len()
    }

    /// Returns true if nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.stream.len_bits() == 0
    }

    /// Returns the number of successfully encoded datapoints.
    pub fn num_encoded(&self) -> usize {
        self.num_encoded
    }

    /// Returns the most recently encoded datapoint.
    pub fn last_encoded(&self) -> Result<Datapoint> {
        if self.num_encoded == 0 {
            return Err(CodecError::NoDatapoints);
        }
        Ok(self.last_encoded_dp)
    }

    /// Returns a copy of the stream, or `None` if nothing has been
    /// written.
    pub fn stream(&self) -> Option<Segment> {
        if self.stream.len_bits() == 0 {
            return None;
        }
        Some(Segment {
            bytes: self.stream.as_raw_slice().to_vec(),
        })
    }

    /// Borrows the raw stream bytes without copying. The borrow reflects
    /// whatever has been written so far, including any partially-written
    /// record left by a failed encode.
    pub fn bytes(&self) -> Result<&[u8]> {
        if self.closed {
            return Err(CodecError::EncoderClosed);
        }
        Ok(self.stream.as_raw_slice())
    }

    /// Resets the encoder for reuse: drops all per-field coder state, the
    /// last-encoded snapshot, and the stream, and clears the closed and
    /// corrupt latches.
    pub fn reset(&mut self, start: i64, capacity: usize) {
        self.stream.reset_with_capacity(capacity);
        self.ts_encoder = TimestampEncoder::new(start);
        self.last_encoded = None;
        self.last_encoded_dp = Datapoint::default();
        if let Some(schema) = self.schema.clone() {
            reset_custom_field_states(
                &mut self.custom_fields,
                &schema,
                self.options.byte_field_dictionary_lru_size,
            );
        }
        self.has_encoded_first_custom_values = false;
        self.closed = false;
        self.corrupt = false;
        self.num_encoded = 0;
        debug!(start, capacity, "encoder reset");
    }

    /// Closes the encoder. Idempotent; further encodes are rejected until
    /// [`Encoder::reset`].
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stream.reset();
    }

    /// Hands the stream to the caller and closes the encoder.
    pub fn discard(&mut self) -> Segment {
        let segment = Segment {
            bytes: self.stream.take_bytes(),
        };
        self.close();
        segment
    }

    /// Hands the stream to the caller and reinitializes for reuse.
    pub fn discard_reset(&mut self, start: i64, capacity: usize) -> Segment {
        let segment = Segment {
            bytes: self.stream.take_bytes(),
        };
        self.reset(start, capacity);
        segment
    }

    fn encode_header(&mut self) {
        self.stream.write_varint(ENCODING_SCHEME_VERSION);
        self.stream
            .write_varint(self.options.byte_field_dictionary_lru_size as u64);
        self.encode_custom_schema_types();
        debug!(
            num_custom_fields = self.custom_fields.len(),
            lru_size = self.options.byte_field_dictionary_lru_size,
            "emitted stream header"
        );
    }

    /// Writes the custom-schema preamble: the maximum custom field number,
    /// then one 3-bit type code per field number from 1 up to the maximum
    /// (code 0 for non-custom fields).
    fn encode_custom_schema_types(&mut self) {
        let max_field_num = match self.custom_fields.last() {
            Some(state) => state.field_num,
            None => {
                self.stream.write_varint(0);
                return;
            }
        };
        self.stream.write_varint(u64::from(max_field_num));

        for num in 1..=max_field_num {
            let code = self
                .custom_fields
                .iter()
                .find(|state| state.field_num == num)
                .map_or(0, |state| state.kind.wire_code());
            self.stream.write_bits(code, NUM_BITS_CUSTOM_TYPE);
        }
    }

    fn encode_record(&mut self, schema: &MessageSchema, msg: &mut Message) -> Result<()> {
        self.encode_custom_values(schema, msg)?;
        if let Some(&field_num) = msg.unknown_fields().first() {
            return Err(CodecError::UnknownFields { field_num });
        }
        self.encode_proto_values(schema, msg)
    }

    fn encode_custom_values(&mut self, schema: &MessageSchema, msg: &mut Message) -> Result<()> {
        let first = !self.has_encoded_first_custom_values;

        for i in 0..self.custom_fields.len() {
            let field_num = self.custom_fields[i].field_num;
            let value = match msg.get(field_num) {
                Some(value) => value.clone(),
                None => schema
                    .field(field_num)
                    .expect("custom field plan is built from the schema")
                    .default_value(),
            };

            let state = &mut self.custom_fields[i];
            match &mut state.coder {
                CoderState::Float(float_state) => {
                    let v = match (state.kind, &value) {
                        (CustomFieldKind::Float64, Value::Double(v)) => *v,
                        (CustomFieldKind::Float32, Value::Float(v)) => f64::from(*v),
                        (kind, other) => return Err(type_mismatch(field_num, kind, other)),
                    };
                    if first {
                        float_state.write_first(&mut self.stream, v);
                    } else {
                        float_state.write_next(&mut self.stream, v);
                    }
                }
                CoderState::Int(int_state) => match (state.kind, &value) {
                    (CustomFieldKind::Signed64, Value::Int64(v)) => {
                        if first {
                            int_state.write_first_signed(&mut self.stream, *v);
                        } else {
                            int_state.write_next_signed(&mut self.stream, *v);
                        }
                    }
                    (CustomFieldKind::Signed32, Value::Int32(v)) => {
                        if first {
                            int_state.write_first_signed(&mut self.stream, i64::from(*v));
                        } else {
                            int_state.write_next_signed(&mut self.stream, i64::from(*v));
                        }
                    }
                    (CustomFieldKind::Unsigned64, Value::UInt64(v)) => {
                        if first {
                            int_state.write_first_unsigned(&mut self.stream, *v);
                        } else {
                            int_state.write_next_unsigned(&mut self.stream, *v);
                        }
                    }
                    (CustomFieldKind::Unsigned32, Value::UInt32(v)) => {
                        if first {
                            int_state.write_first_unsigned(&mut self.stream, u64::from(*v));
                        } else {
                            int_state.write_next_unsigned(&mut self.stream, u64::from(*v));
                        }
                    }
                    (kind, other) => return Err(type_mismatch(field_num, kind, other)),
                },
                CoderState::Bytes(dict) => {
                    let blob = match &value {
                        Value::Bytes(blob) => blob,
                        other => return Err(type_mismatch(field_num, state.kind, other)),
                    };
                    encode_bytes_value(&mut self.stream, dict, self.num_index_bits, blob)?;
                }
            }

            // Custom fields never reach the generic marshaller.
            msg.clear(field_num);
        }

        self.has_encoded_first_custom_values = true;
        Ok(())
    }

    /// Encodes the non-custom tail: diff against the last encoded message,
    /// strip unchanged fields, and transmit the sparse remainder with a
    /// bitset for fields that changed *to* their default (the marshaller
    /// omits defaults, so the decoder needs them called out explicitly).
    fn encode_proto_values(&mut self, schema: &MessageSchema, msg: &mut Message) -> Result<()> {
        self.changed_fields.clear();
        self.fields_changed_to_default.clear();

        if let Some(last) = self.last_encoded.as_mut() {
            for field in schema.fields() {
                let field_num = field.number;
                let cur = match msg.get(field_num) {
                    Some(value) => value.clone(),
                    None => field.default_value(),
                };
                let prev = match last.get(field_num) {
                    Some(value) => value.clone(),
                    None => field.default_value(),
                };

                if cur.bitwise_eq(&prev) {
                    msg.clear(field_num);
                } else {
                    if cur.is_default() {
                        self.fields_changed_to_default.push(field_num);
                    }
                    self.changed_fields.push(field_num);
                    last.set(field_num, cur);
                }
            }
        }

        if self.changed_fields.is_empty() && self.last_encoded.is_some() {
            self.stream.write_bit(OP_NO_CHANGE);
            return Ok(());
        }

        let marshalled = msg.marshal(schema);

        self.stream.write_bit(OP_CHANGE);
        if self.fields_changed_to_default.is_empty() {
            self.stream.write_bit(OP_NO_FIELDS_SET_TO_DEFAULT);
        } else {
            self.stream.write_bit(OP_FIELDS_SET_TO_DEFAULT);
            write_bitset(&mut self.stream, &self.fields_changed_to_default);
        }
        self.stream.write_varint(marshalled.len() as u64);
        self.stream.write_bytes(&marshalled);

        if self.last_encoded.is_none() {
            // Seed the diff base so subsequent records only transmit
            // changed fields.
            self.last_encoded = Some(msg.clone());
        }
        Ok(())
    }
}

fn type_mismatch(field_num: u32, kind: CustomFieldKind, value: &Value) -> CodecError {
    let expected = match kind {
        CustomFieldKind::Float64 => "double",
        CustomFieldKind::Float32 => "float",
        CustomFieldKind::Signed64 => "int64",
        CustomFieldKind::Signed32 => "int32",
        CustomFieldKind::Unsigned64 => "uint64",
        CustomFieldKind::Unsigned32 => "uint32",
        CustomFieldKind::Bytes => "bytes",
    };
    CodecError::TypeMismatch {
        field_num,
        expected,
        actual: value.type_name(),
    }
}

/// Writes a 1-indexed bitset: the maximum member as a varint, then one bit
/// per position from 1 to the maximum.
fn write_bitset(w: &mut BitWriter, values: &[u32]) {
    let max = values.iter().copied().max().unwrap_or(0);
    w.write_varint(u64::from(max));
    for i in 1..=max {
        w.write_bit(if values.contains(&i) {
            OP_BITSET_SET
        } else {
            OP_BITSET_UNSET
        });
    }
}
