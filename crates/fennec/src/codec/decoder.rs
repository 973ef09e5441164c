//! Streaming protobuf datapoint decoder.
//!
//! The decoder is the exact mirror of the encoder: it walks the same
//! custom-field plan in lockstep, maintains mirrored per-field coder state
//! (with byte-dictionary back-references resolved against the *input*
//! slice), and folds each record's proto tail into a running message. A
//! zero more-data bit, whether written explicitly or read from the zero
//! padding of the final byte, ends iteration.

use crate::codec::dictionary::{self, hash_bytes, DictEntry};
use crate::codec::plan::{CoderState, CustomFieldKind, CustomFieldState};
use crate::codec::stream::BitReader;
use crate::codec::timestamp::TimestampDecoder;
use crate::codec::{
    Datapoint, ENCODING_SCHEME_VERSION, NUM_BITS_CUSTOM_TYPE, OP_BITSET_SET, OP_BYTES_LRU_INDEX,
    OP_CHANGE, OP_FIELDS_SET_TO_DEFAULT,
};
use crate::error::{CodecError, Result};
use crate::proto::{Message, MessageSchema, Value};
use std::sync::Arc;

/// Streaming decoder over an encoded segment.
///
/// Yields `(Datapoint, Message)` pairs. The datapoint's `value` is always
/// `0.0`; the message is the full merged state of the record, custom
/// fields included.
#[derive(Debug)]
pub struct Decoder<'a> {
    schema: Arc<MessageSchema>,
    reader: BitReader<'a>,
    ts_decoder: TimestampDecoder,
    custom_fields: Vec<CustomFieldState>,
    num_index_bits: u32,
    current: Message,
    num_decoded: usize,
    header_read: bool,
    done: bool,
}

impl<'a> Decoder<'a> {
    /// Creates a decoder over `bytes`, which must be a stream produced
    /// with the same schema.
    pub fn new(schema: Arc<MessageSchema>, bytes: &'a [u8]) -> Self {
        Self {
            schema,
            reader: BitReader::new(bytes),
            ts_decoder: TimestampDecoder::new(),
            custom_fields: Vec::new(),
            num_index_bits: 0,
            current: Message::new(),
            num_decoded: 0,
            header_read: false,
            done: false,
        }
    }

    /// Decodes the next datapoint, or `Ok(None)` at the end of the stream.
    pub fn next_datapoint(&mut self) -> Result<Option<(Datapoint, Message)>> {
        if self.done {
            return Ok(None);
        }
        if !self.header_read {
            if self.reader.input_len() == 0 {
                self.done = true;
                return Ok(None);
            }
            self.read_header()?;
        }

        match self.reader.read_bit() {
            Some(true) => {}
            Some(false) | None => {
                self.done = true;
                return Ok(None);
            }
        }

        let timestamp = if self.num_decoded == 0 {
            self.ts_decoder.read_first(&mut self.reader)?
        } else {
            self.ts_decoder.read_next(&mut self.reader)?
        };

        self.decode_custom_values()?;
        self.decode_proto_values()?;

        self.num_decoded += 1;
        Ok(Some((Datapoint::new(timestamp, 0.0), self.current.clone())))
    }

    /// Decodes the remainder of the stream into a vector.
    pub fn decode_all(mut self) -> Result<Vec<(Datapoint, Message)>> {
        let mut out = Vec::new();
        while let Some(item) = self.next_datapoint()? {
            out.push(item);
        }
        Ok(out)
    }

    /// Reads the stream header and rebuilds the custom-field plan from the
    /// embedded preamble. Streams encoded under a different scheme version
    /// (a future schema-change extension, for instance) are rejected.
    fn read_header(&mut self) -> Result<()> {
        let version = self
            .reader
            .read_varint()
            .ok_or(CodecError::UnexpectedEndOfStream)?;
        if version != ENCODING_SCHEME_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }

        let lru_size = self
            .reader
            .read_varint()
            .ok_or(CodecError::UnexpectedEndOfStream)? as usize;
        self.num_index_bits = dictionary::num_index_bits(lru_size);

        let max_field_num = self
            .reader
            .read_varint()
            .ok_or(CodecError::UnexpectedEndOfStream)?;
        if max_field_num > self.reader.remaining_bits() as u64 {
            return Err(CodecError::UnexpectedEndOfStream);
        }
        for num in 1..=max_field_num {
            let code = self
                .reader
                .read_bits(NUM_BITS_CUSTOM_TYPE)
                .ok_or(CodecError::UnexpectedEndOfStream)?;
            if let Some(kind) = CustomFieldKind::from_wire_code(code)? {
                self.custom_fields
                    .push(CustomFieldState::new(num as u32, kind, lru_size));
            }
        }

        self.header_read = true;
        Ok(())
    }

    fn decode_custom_values(&mut self) -> Result<()> {
        let first = self.num_decoded == 0;

        for i in 0..self.custom_fields.len() {
            let state = &mut self.custom_fields[i];
            let field_num = state.field_num;

            let value = match &mut state.coder {
                CoderState::Float(float_state) => {
                    let v = if first {
                        float_state.read_first(&mut self.reader)?
                    } else {
                        float_state.read_next(&mut self.reader)?
                    };
                    if state.kind == CustomFieldKind::Float32 {
                        Value::Float(v as f32)
                    } else {
                        Value::Double(v)
                    }
                }
                CoderState::Int(int_state) => match state.kind {
                    CustomFieldKind::Signed64 => Value::Int64(if first {
                        int_state.read_first_signed(&mut self.reader)?
                    } else {
                        int_state.read_next_signed(&mut self.reader)?
                    }),
                    CustomFieldKind::Signed32 => {
                        let v = if first {
                            int_state.read_first_signed(&mut self.reader)?
                        } else {
                            int_state.read_next_signed(&mut self.reader)?
                        };
                        Value::Int32(v as i32)
                    }
                    CustomFieldKind::Unsigned64 => Value::UInt64(if first {
                        int_state.read_first_unsigned(&mut self.reader)?
                    } else {
                        int_state.read_next_unsigned(&mut self.reader)?
                    }),
                    CustomFieldKind::Unsigned32 => {
                        let v = if first {
                            int_state.read_first_unsigned(&mut self.reader)?
                        } else {
                            int_state.read_next_unsigned(&mut self.reader)?
                        };
                        Value::UInt32(v as u32)
                    }
                    _ => {
                        return Err(CodecError::MalformedStream(
                            "custom coder state out of sync with plan".to_string(),
                        ))
                    }
                },
                CoderState::Bytes(dict) => {
                    let changed = self
                        .reader
                        .read_bit()
                        .ok_or(CodecError::UnexpectedEndOfStream)?;

                    let (start, length) = if changed != OP_CHANGE {
                        let last = dict.entries().last().ok_or_else(|| {
                            CodecError::MalformedStream(
                                "bytes no-change with an empty dictionary".to_string(),
                            )
                        })?;
                        (last.start, last.length)
                    } else {
                        let is_index = self
                            .reader
                            .read_bit()
                            .ok_or(CodecError::UnexpectedEndOfStream)?;
                        if is_index == OP_BYTES_LRU_INDEX {
                            let idx = self
                                .reader
                                .read_bits(self.num_index_bits)
                                .ok_or(CodecError::UnexpectedEndOfStream)?
                                as usize;
                            let entry = *dict.entries().get(idx).ok_or_else(|| {
                                CodecError::MalformedStream(format!(
                                    "lru index {} out of dictionary range",
                                    idx
                                ))
                            })?;
                            dict.move_to_end(idx);
                            (entry.start, entry.length)
                        } else {
                            let length = self
                                .reader
                                .read_varint()
                                .ok_or(CodecError::UnexpectedEndOfStream)?
                                as usize;
                            self.reader.align_to_next_byte();
                            let start = self.reader.byte_pos();
                            let blob = self
                                .reader
                                .read_bytes(length)
                                .ok_or(CodecError::UnexpectedEndOfStream)?;
                            dict.push(DictEntry {
                                hash: hash_bytes(&blob),
                                start,
                                length,
                            });
                            (start, length)
                        }
                    };

                    let blob = self.reader.slice_at(start, length).ok_or(
                        CodecError::DictInconsistency {
                            stream_len: self.reader.input_len(),
                            start,
                            length,
                        },
                    )?;
                    Value::Bytes(blob.to_vec())
                }
            };

            self.current.set(field_num, value);
        }

        Ok(())
    }

    fn decode_proto_values(&mut self) -> Result<()> {
        let changed = self
            .reader
            .read_bit()
            .ok_or(CodecError::UnexpectedEndOfStream)?;
        if changed != OP_CHANGE {
            return Ok(());
        }

        let has_defaults = self
            .reader
            .read_bit()
            .ok_or(CodecError::UnexpectedEndOfStream)?;
        if has_defaults == OP_FIELDS_SET_TO_DEFAULT {
            for field_num in self.read_bitset()? {
                // The marshal below omits these, so drop the stale values
                // now; an absent field reads as its default.
                self.current.clear(field_num);
            }
        }

        let len = self
            .reader
            .read_varint()
            .ok_or(CodecError::UnexpectedEndOfStream)? as usize;
        let marshalled = self
            .reader
            .read_bytes(len)
            .ok_or(CodecError::UnexpectedEndOfStream)?;
        let tail = Message::decode(&self.schema, &marshalled)?;
        for (field_num, value) in tail.iter() {
            self.current.set(field_num, value.clone());
        }

        Ok(())
    }

    fn read_bitset(&mut self) -> Result<Vec<u32>> {
        let max = self
            .reader
            .read_varint()
            .ok_or(CodecError::UnexpectedEndOfStream)?;
        if max > self.reader.remaining_bits() as u64 {
            return Err(CodecError::UnexpectedEndOfStream);
        }

        let mut set = Vec::new();
        for i in 1..=max {
            let bit = self
                .reader
                .read_bit()
                .ok_or(CodecError::UnexpectedEndOfStream)?;
            if bit == OP_BITSET_SET {
                set.push(i as u32);
            }
        }
        Ok(set)
    }
}

impl<'a> Iterator for Decoder<'a> {
    type Item = Result<(Datapoint, Message)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_datapoint().transpose()
    }
}
