//! Message schema descriptions.
//!
//! A [`MessageSchema`] is an immutable, ordered list of field descriptors.
//! Field numbers are 1-indexed and totally ordered; they do not need to be
//! contiguous. The schema determines how payload bytes are parsed, which
//! fields get specialized per-field coders, and what the default value of
//! an absent field is.

use crate::error::{CodecError, Result};
use crate::proto::value::Value;

/// The logical type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// 64-bit IEEE-754 float (`double`).
    Double,
    /// 32-bit IEEE-754 float (`float`).
    Float,
    /// Varint-encoded signed 32-bit integer (`int32`).
    Int32,
    /// Varint-encoded signed 64-bit integer (`int64`).
    Int64,
    /// Varint-encoded unsigned 32-bit integer (`uint32`).
    UInt32,
    /// Varint-encoded unsigned 64-bit integer (`uint64`).
    UInt64,
    /// Zigzag varint-encoded signed 32-bit integer (`sint32`).
    Sint32,
    /// Zigzag varint-encoded signed 64-bit integer (`sint64`).
    Sint64,
    /// Varint-encoded boolean (`bool`).
    Bool,
    /// Length-delimited UTF-8 string (`string`).
    String,
    /// Length-delimited byte blob (`bytes`).
    Bytes,
}

impl FieldType {
    /// Returns the default value implied by this type (proto3 semantics:
    /// zero, empty, or false).
    pub fn default_value(&self) -> Value {
        match self {
            FieldType::Double => Value::Double(0.0),
            FieldType::Float => Value::Float(0.0),
            FieldType::Int32 | FieldType::Sint32 => Value::Int32(0),
            FieldType::Int64 | FieldType::Sint64 => Value::Int64(0),
            FieldType::UInt32 => Value::UInt32(0),
            FieldType::UInt64 => Value::UInt64(0),
            FieldType::Bool => Value::Bool(false),
            FieldType::String => Value::String(String::new()),
            FieldType::Bytes => Value::Bytes(Vec::new()),
        }
    }
}

/// Description of a single message field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// 1-indexed field number.
    pub number: u32,
    /// Field name, informational only.
    pub name: String,
    /// Logical type of the field.
    pub field_type: FieldType,
}

impl FieldDescriptor {
    /// Creates a new field descriptor.
    pub fn new(number: u32, name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            number,
            name: name.into(),
            field_type,
        }
    }

    /// Returns the default value of this field.
    pub fn default_value(&self) -> Value {
        self.field_type.default_value()
    }
}

/// An immutable description of a message's fields, ordered by field number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSchema {
    fields: Vec<FieldDescriptor>,
}

impl MessageSchema {
    /// Creates a schema from a list of field descriptors.
    ///
    /// Fields are sorted by ascending field number. Returns an error if a
    /// field number is zero or appears more than once.
    pub fn new(mut fields: Vec<FieldDescriptor>) -> Result<Self> {
        fields.sort_by_key(|f| f.number);
        for pair in fields.windows(2) {
            if pair[0].number == pair[1].number {
                return Err(CodecError::InvalidSchema(format!(
                    "duplicate field number {}",
                    pair[0].number
                )));
            }
        }
        if fields.iter().any(|f| f.number == 0) {
            return Err(CodecError::InvalidSchema(
                "field numbers are 1-indexed, 0 is not a valid field number".to_string(),
            ));
        }
        Ok(Self { fields })
    }

    /// Returns the field descriptors in ascending field-number order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Looks up a field descriptor by field number.
    pub fn field(&self, number: u32) -> Option<&FieldDescriptor> {
        self.fields
            .binary_search_by_key(&number, |f| f.number)
            .ok()
            .map(|idx| &self.fields[idx])
    }

    /// Returns true if the schema contains the given field number.
    pub fn contains(&self, number: u32) -> bool {
        self.field(number).is_some()
    }
}
