//! Dynamic field values.

use crate::proto::schema::FieldType;

/// A dynamically-typed field value.
///
/// `sint32`/`sint64` schema fields share the [`Value::Int32`]/[`Value::Int64`]
/// variants; the zigzag transform is a wire-format concern handled by the
/// message marshaller.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// 64-bit float.
    Double(f64),
    /// 32-bit float.
    Float(f32),
    /// Signed 32-bit integer.
    Int32(i32),
    /// Signed 64-bit integer.
    Int64(i64),
    /// Unsigned 32-bit integer.
    UInt32(u32),
    /// Unsigned 64-bit integer.
    UInt64(u64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    String(String),
    /// Byte blob.
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns a short name for the value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Double(_) => "double",
            Value::Float(_) => "float",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::UInt32(_) => "uint32",
            Value::UInt64(_) => "uint64",
            Value::Bool(_) => "bool",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
        }
    }

    /// Returns true if this value equals the default for its type.
    pub fn is_default(&self) -> bool {
        match self {
            Value::Double(v) => *v == 0.0,
            Value::Float(v) => *v == 0.0,
            Value::Int32(v) => *v == 0,
            Value::Int64(v) => *v == 0,
            Value::UInt32(v) => *v == 0,
            Value::UInt64(v) => *v == 0,
            Value::Bool(v) => !*v,
            Value::String(v) => v.is_empty(),
            Value::Bytes(v) => v.is_empty(),
        }
    }

    /// Deep equality on the logical value.
    ///
    /// Unlike `PartialEq`, floats compare by bit pattern so that identical
    /// NaN payloads are equal and `0.0 != -0.0`. This is the equality the
    /// schema-diff path uses: a value only round-trips bit-exactly if the
    /// diff treats bit-identical values as unchanged.
    pub fn bitwise_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }

    /// Returns true if this value's type matches the given schema type.
    pub fn matches_type(&self, field_type: FieldType) -> bool {
        matches!(
            (self, field_type),
            (Value::Double(_), FieldType::Double)
                | (Value::Float(_), FieldType::Float)
                | (Value::Int32(_), FieldType::Int32 | FieldType::Sint32)
                | (Value::Int64(_), FieldType::Int64 | FieldType::Sint64)
                | (Value::UInt32(_), FieldType::UInt32)
                | (Value::UInt64(_), FieldType::UInt64)
                | (Value::Bool(_), FieldType::Bool)
                | (Value::String(_), FieldType::String)
                | (Value::Bytes(_), FieldType::Bytes)
        )
    }
}
