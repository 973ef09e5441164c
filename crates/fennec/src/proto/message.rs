//! Dynamic message container with protobuf wire-format parse and marshal.
//!
//! Parsing is schema-directed: wire fields present in the schema are decoded
//! into typed [`Value`]s, wire fields outside the schema are skipped but
//! recorded so the encoder can reject them. The canonical marshaller writes
//! fields in ascending field-number order and omits fields equal to their
//! default, which is what lets the schema-diff encoder strip unchanged
//! fields and transmit only a sparse tail.

use crate::error::{CodecError, Result};
use crate::proto::schema::{FieldType, MessageSchema};
use crate::proto::value::Value;
use std::collections::BTreeMap;

/// Protobuf wire types.
const WIRE_VARINT: u32 = 0;
const WIRE_FIXED64: u32 = 1;
const WIRE_LENGTH_DELIMITED: u32 = 2;
const WIRE_FIXED32: u32 = 5;

/// A schema-conformant message: a sparse, ordered map from field number to
/// value. Absent fields are logically equal to their schema default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    fields: BTreeMap<u32, Value>,
    unknown_fields: Vec<u32>,
}

impl Message {
    /// Creates an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a message from protobuf wire-format bytes under the schema.
    ///
    /// Wire fields whose numbers are not in the schema are skipped and
    /// recorded as unknown. If the same field occurs more than once the
    /// last occurrence wins.
    pub fn decode(schema: &MessageSchema, payload: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(payload);
        let mut msg = Message::new();

        while !cursor.is_empty() {
            let key = cursor.read_varint()?;
            let field_num = u32::try_from(key >> 3)
                .map_err(|_| CodecError::InvalidPayload(format!("field number {} too large", key >> 3)))?;
            let wire_type = (key & 0x7) as u32;
            if field_num == 0 {
                return Err(CodecError::InvalidPayload(
                    "field number 0 is not valid".to_string(),
                ));
            }

            let field = match schema.field(field_num) {
                Some(field) => field,
                None => {
                    cursor.skip_value(wire_type)?;
                    if !msg.unknown_fields.contains(&field_num) {
                        msg.unknown_fields.push(field_num);
                    }
                    continue;
                }
            };

            let expected = wire_type_for(field.field_type);
            if wire_type != expected {
                return Err(CodecError::InvalidPayload(format!(
                    "field {} has wire type {}, expected {}",
                    field_num, wire_type, expected
                )));
            }

            let value = cursor.read_value(field.field_type)?;
            msg.fields.insert(field_num, value);
        }

        Ok(msg)
    }

    /// Marshals the message into canonical protobuf wire format: fields in
    /// ascending field-number order, fields equal to their default omitted.
    pub fn marshal(&self, schema: &MessageSchema) -> Vec<u8> {
        let mut out = Vec::new();
        for (&field_num, value) in &self.fields {
            if value.is_default() {
                continue;
            }
            let field = match schema.field(field_num) {
                Some(field) => field,
                // Fields outside the schema are never stored, see decode.
                None => continue,
            };
            write_varint(&mut out, u64::from(field_num) << 3 | u64::from(wire_type_for(field.field_type)));
            write_value(&mut out, field.field_type, value);
        }
        out
    }

    /// Returns the value of a field, if present.
    pub fn get(&self, field_num: u32) -> Option<&Value> {
        self.fields.get(&field_num)
    }

    /// Returns the value of a field, or the schema default if absent.
    pub fn get_or_default(&self, schema: &MessageSchema, field_num: u32) -> Option<Value> {
        match self.fields.get(&field_num) {
            Some(value) => Some(value.clone()),
            None => schema.field(field_num).map(|f| f.default_value()),
        }
    }

    /// Sets the value of a field.
    pub fn set(&mut self, field_num: u32, value: Value) {
        self.fields.insert(field_num, value);
    }

    /// Removes a field from the message.
    pub fn clear(&mut self, field_num: u32) {
        self.fields.remove(&field_num);
    }

    /// Iterates over the fields present in the message, in ascending
    /// field-number order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Value)> {
        self.fields.iter().map(|(&num, value)| (num, value))
    }

    /// Returns true if parsing encountered fields outside the schema.
    pub fn has_unknown_fields(&self) -> bool {
        !self.unknown_fields.is_empty()
    }

    /// Returns the field numbers of unknown fields, in encounter order.
    pub fn unknown_fields(&self) -> &[u32] {
        &self.unknown_fields
    }
}

fn wire_type_for(field_type: FieldType) -> u32 {
    match field_type {
        FieldType::Double => WIRE_FIXED64,
        FieldType::Float => WIRE_FIXED32,
        FieldType::Int32
        | FieldType::Int64
        | FieldType::UInt32
        | FieldType::UInt64
        | FieldType::Sint32
        | FieldType::Sint64
        | FieldType::Bool => WIRE_VARINT,
        FieldType::String | FieldType::Bytes => WIRE_LENGTH_DELIMITED,
    }
}

fn write_varint(out: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        out.push((v as u8) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}

fn zigzag_encode32(v: i32) -> u64 {
    u64::from(((v << 1) ^ (v >> 31)) as u32)
}

fn zigzag_encode64(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn zigzag_decode32(v: u64) -> i32 {
    let v = v as u32;
    ((v >> 1) as i32) ^ -((v & 1) as i32)
}

fn zigzag_decode64(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

fn write_value(out: &mut Vec<u8>, field_type: FieldType, value: &Value) {
    match (field_type, value) {
        (FieldType::Double, Value::Double(v)) => out.extend_from_slice(&v.to_bits().to_le_bytes()),
        (FieldType::Float, Value::Float(v)) => out.extend_from_slice(&v.to_bits().to_le_bytes()),
        // int32 is sign-extended to 64 bits on the wire.
        (FieldType::Int32, Value::Int32(v)) => write_varint(out, i64::from(*v) as u64),
        (FieldType::Int64, Value::Int64(v)) => write_varint(out, *v as u64),
        (FieldType::UInt32, Value::UInt32(v)) => write_varint(out, u64::from(*v)),
        (FieldType::UInt64, Value::UInt64(v)) => write_varint(out, *v),
        (FieldType::Sint32, Value::Int32(v)) => write_varint(out, zigzag_encode32(*v)),
        (FieldType::Sint64, Value::Int64(v)) => write_varint(out, zigzag_encode64(*v)),
        (FieldType::Bool, Value::Bool(v)) => write_varint(out, u64::from(*v)),
        (FieldType::String, Value::String(v)) => {
            write_varint(out, v.len() as u64);
            out.extend_from_slice(v.as_bytes());
        }
        (FieldType::Bytes, Value::Bytes(v)) => {
            write_varint(out, v.len() as u64);
            out.extend_from_slice(v);
        }
        // Values are typed by the schema at decode/set time, so a mismatch
        // here cannot occur through the public API.
        _ => debug_assert!(false, "value type does not match schema type"),
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn read_varint(&mut self) -> Result<u64> {
        let mut result: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = *self.bytes.get(self.pos).ok_or_else(|| {
                CodecError::InvalidPayload("truncated varint".to_string())
            })?;
            self.pos += 1;
            if shift == 63 && byte > 1 {
                return Err(CodecError::InvalidPayload("varint overflows 64 bits".to_string()));
            }
            result |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift > 63 {
                return Err(CodecError::InvalidPayload("varint too long".to_string()));
            }
        }
    }

    fn read_exact(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|&end| end <= self.bytes.len());
        match end {
            Some(end) => {
                let slice = &self.bytes[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(CodecError::InvalidPayload("truncated field value".to_string())),
        }
    }

    fn read_value(&mut self, field_type: FieldType) -> Result<Value> {
        let value = match field_type {
            FieldType::Double => {
                let bytes: [u8; 8] = self.read_exact(8)?.try_into().unwrap();
                Value::Double(f64::from_bits(u64::from_le_bytes(bytes)))
            }
            FieldType::Float => {
                let bytes: [u8; 4] = self.read_exact(4)?.try_into().unwrap();
                Value::Float(f32::from_bits(u32::from_le_bytes(bytes)))
            }
            FieldType::Int32 => Value::Int32(self.read_varint()? as i64 as i32),
            FieldType::Int64 => Value::Int64(self.read_varint()? as i64),
            FieldType::UInt32 => {
                let v = self.read_varint()?;
                Value::UInt32(u32::try_from(v).map_err(|_| {
                    CodecError::InvalidPayload(format!("uint32 field value {} out of range", v))
                })?)
            }
            FieldType::UInt64 => Value::UInt64(self.read_varint()?),
            FieldType::Sint32 => Value::Int32(zigzag_decode32(self.read_varint()?)),
            FieldType::Sint64 => Value::Int64(zigzag_decode64(self.read_varint()?)),
            FieldType::Bool => Value::Bool(self.read_varint()? != 0),
            FieldType::String => {
                let len = self.read_varint()? as usize;
                let bytes = self.read_exact(len)?;
                Value::String(String::from_utf8(bytes.to_vec()).map_err(|_| {
                    CodecError::InvalidPayload("string field is not valid UTF-8".to_string())
                })?)
            }
            FieldType::Bytes => {
                let len = self.read_varint()? as usize;
                Value::Bytes(self.read_exact(len)?.to_vec())
            }
        };
        Ok(value)
    }

    fn skip_value(&mut self, wire_type: u32) -> Result<()> {
        match wire_type {
            WIRE_VARINT => {
                self.read_varint()?;
            }
            WIRE_FIXED64 => {
                self.read_exact(8)?;
            }
            WIRE_LENGTH_DELIMITED => {
                let len = self.read_varint()? as usize;
                self.read_exact(len)?;
            }
            WIRE_FIXED32 => {
                self.read_exact(4)?;
            }
            other => {
                return Err(CodecError::InvalidPayload(format!(
                    "unsupported wire type {}",
                    other
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::schema::FieldDescriptor;

    fn test_schema() -> MessageSchema {
        MessageSchema::new(vec![
            FieldDescriptor::new(1, "count", FieldType::Int64),
            FieldDescriptor::new(2, "name", FieldType::String),
            FieldDescriptor::new(3, "ratio", FieldType::Double),
            FieldDescriptor::new(4, "blob", FieldType::Bytes),
            FieldDescriptor::new(5, "offset", FieldType::Sint32),
            FieldDescriptor::new(6, "flag", FieldType::Bool),
        ])
        .unwrap()
    }

    #[test]
    fn test_marshal_decode_roundtrip() {
        let schema = test_schema();
        let mut msg = Message::new();
        msg.set(1, Value::Int64(-42));
        msg.set(2, Value::String("hello".to_string()));
        msg.set(3, Value::Double(1.5));
        msg.set(4, Value::Bytes(vec![0xde, 0xad]));
        msg.set(5, Value::Int32(-7));
        msg.set(6, Value::Bool(true));

        let bytes = msg.marshal(&schema);
        let decoded = Message::decode(&schema, &bytes).unwrap();

        assert_eq!(decoded.get(1), Some(&Value::Int64(-42)));
        assert_eq!(decoded.get(2), Some(&Value::String("hello".to_string())));
        assert_eq!(decoded.get(3), Some(&Value::Double(1.5)));
        assert_eq!(decoded.get(4), Some(&Value::Bytes(vec![0xde, 0xad])));
        assert_eq!(decoded.get(5), Some(&Value::Int32(-7)));
        assert_eq!(decoded.get(6), Some(&Value::Bool(true)));
        assert!(!decoded.has_unknown_fields());
    }

    #[test]
    fn test_marshal_omits_defaults() {
        let schema = test_schema();
        let mut msg = Message::new();
        msg.set(1, Value::Int64(0));
        msg.set(2, Value::String(String::new()));
        assert!(msg.marshal(&schema).is_empty());
    }

    #[test]
    fn test_decode_records_unknown_fields() {
        let schema = test_schema();
        // Field 9 (varint) is not in the schema.
        let mut payload = Vec::new();
        write_varint(&mut payload, 9 << 3 | u64::from(WIRE_VARINT));
        write_varint(&mut payload, 1234);
        write_varint(&mut payload, 1 << 3 | u64::from(WIRE_VARINT));
        write_varint(&mut payload, 5);

        let msg = Message::decode(&schema, &payload).unwrap();
        assert!(msg.has_unknown_fields());
        assert_eq!(msg.unknown_fields(), &[9]);
        assert_eq!(msg.get(1), Some(&Value::Int64(5)));
    }

    #[test]
    fn test_decode_rejects_truncated_payload() {
        let schema = test_schema();
        // Key for field 2 (length-delimited) claiming 10 bytes, with only 2.
        let mut payload = Vec::new();
        write_varint(&mut payload, 2 << 3 | u64::from(WIRE_LENGTH_DELIMITED));
        write_varint(&mut payload, 10);
        payload.extend_from_slice(b"hi");

        assert!(matches!(
            Message::decode(&schema, &payload),
            Err(CodecError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_decode_rejects_wire_type_mismatch() {
        let schema = test_schema();
        // Field 3 is a double but encoded as a varint.
        let mut payload = Vec::new();
        write_varint(&mut payload, 3 << 3 | u64::from(WIRE_VARINT));
        write_varint(&mut payload, 1);

        assert!(matches!(
            Message::decode(&schema, &payload),
            Err(CodecError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_negative_int_roundtrip() {
        let schema = test_schema();
        let mut msg = Message::new();
        msg.set(1, Value::Int64(i64::MIN));
        msg.set(5, Value::Int32(i32::MIN));

        let bytes = msg.marshal(&schema);
        let decoded = Message::decode(&schema, &bytes).unwrap();
        assert_eq!(decoded.get(1), Some(&Value::Int64(i64::MIN)));
        assert_eq!(decoded.get(5), Some(&Value::Int32(i32::MIN)));
    }

    #[test]
    fn test_last_occurrence_wins() {
        let schema = test_schema();
        let mut payload = Vec::new();
        write_varint(&mut payload, 1 << 3 | u64::from(WIRE_VARINT));
        write_varint(&mut payload, 5);
        write_varint(&mut payload, 1 << 3 | u64::from(WIRE_VARINT));
        write_varint(&mut payload, 6);

        let msg = Message::decode(&schema, &payload).unwrap();
        assert_eq!(msg.get(1), Some(&Value::Int64(6)));
    }
}
