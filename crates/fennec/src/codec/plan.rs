//! Custom-field planning.
//!
//! From a schema, derive the ordered list of fields that bypass the
//! generic marshaller in favor of a specialized per-field coder. The plan
//! order (ascending field number) is shared by encoder and decoder and is
//! part of the wire format: both walk the same list in lockstep for every
//! record.

use crate::codec::dictionary::ByteDictionary;
use crate::codec::numeric::{FloatCoderState, IntCoderState};
use crate::error::{CodecError, Result};
use crate::proto::schema::{FieldType, MessageSchema};

/// The specialized coder assigned to a custom field, with its 3-bit wire
/// code. Code 0 is reserved for "not custom" in the schema preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomFieldKind {
    /// XOR-compressed 64-bit float.
    Float64 = 1,
    /// XOR-compressed 32-bit float (upcast to 64 bits on the wire).
    Float32 = 2,
    /// Delta-compressed signed 64-bit integer.
    Signed64 = 3,
    /// Delta-compressed signed 32-bit integer.
    Signed32 = 4,
    /// Delta-compressed unsigned 64-bit integer.
    Unsigned64 = 5,
    /// Delta-compressed unsigned 32-bit integer.
    Unsigned32 = 6,
    /// LRU byte-dictionary blob.
    Bytes = 7,
}

impl CustomFieldKind {
    /// Returns the coder kind for a schema type, or `None` for fields that
    /// go through the generic marshaller.
    pub fn for_field_type(field_type: FieldType) -> Option<Self> {
        match field_type {
            FieldType::Double => Some(CustomFieldKind::Float64),
            FieldType::Float => Some(CustomFieldKind::Float32),
            FieldType::Int64 | FieldType::Sint64 => Some(CustomFieldKind::Signed64),
            FieldType::Int32 | FieldType::Sint32 => Some(CustomFieldKind::Signed32),
            FieldType::UInt64 => Some(CustomFieldKind::Unsigned64),
            FieldType::UInt32 => Some(CustomFieldKind::Unsigned32),
            FieldType::Bytes => Some(CustomFieldKind::Bytes),
            FieldType::Bool | FieldType::String => None,
        }
    }

    /// Returns the 3-bit wire code.
    pub(crate) fn wire_code(&self) -> u64 {
        *self as u64
    }

    /// Decodes a 3-bit preamble code; `Ok(None)` is "not custom".
    pub(crate) fn from_wire_code(code: u64) -> Result<Option<Self>> {
        match code {
            0 => Ok(None),
            1 => Ok(Some(CustomFieldKind::Float64)),
            2 => Ok(Some(CustomFieldKind::Float32)),
            3 => Ok(Some(CustomFieldKind::Signed64)),
            4 => Ok(Some(CustomFieldKind::Signed32)),
            5 => Ok(Some(CustomFieldKind::Unsigned64)),
            6 => Ok(Some(CustomFieldKind::Unsigned32)),
            7 => Ok(Some(CustomFieldKind::Bytes)),
            other => Err(CodecError::MalformedStream(format!(
                "invalid custom field type code {}",
                other
            ))),
        }
    }
}

/// Per-field coder state, tagged by coder family. Dispatch is decided once
/// at plan construction; the per-datapoint hot loop only matches on the
/// sealed variants.
#[derive(Debug)]
pub(crate) enum CoderState {
    Float(FloatCoderState),
    Int(IntCoderState),
    Bytes(ByteDictionary),
}

/// State for one custom field: its plan entry plus its coder's memory.
#[derive(Debug)]
pub(crate) struct CustomFieldState {
    pub(crate) field_num: u32,
    pub(crate) kind: CustomFieldKind,
    pub(crate) coder: CoderState,
}

impl CustomFieldState {
    pub(crate) fn new(field_num: u32, kind: CustomFieldKind, lru_size: usize) -> Self {
        let coder = match kind {
            CustomFieldKind::Float64 | CustomFieldKind::Float32 => {
                CoderState::Float(FloatCoderState::default())
            }
            CustomFieldKind::Signed64
            | CustomFieldKind::Signed32
            | CustomFieldKind::Unsigned64
            | CustomFieldKind::Unsigned32 => CoderState::Int(IntCoderState::default()),
            CustomFieldKind::Bytes => CoderState::Bytes(ByteDictionary::new(lru_size)),
        };
        Self {
            field_num,
            kind,
            coder,
        }
    }
}

/// Upper bound on the custom-field state capacity retained across resets.
const MAX_CUSTOM_FIELDS_CAPACITY_RETAIN: usize = 24;

/// Builds the custom-field plan for a schema: every custom-codable field,
/// ascending by field number.
pub(crate) fn build_plan(schema: &MessageSchema) -> Vec<(u32, CustomFieldKind)> {
    schema
        .fields()
        .iter()
        .filter_map(|f| CustomFieldKind::for_field_type(f.field_type).map(|k| (f.number, k)))
        .collect()
}

/// Rebuilds `states` from the schema, dropping all coder memory. Retained
/// capacity is capped so a schema with many custom fields does not pin a
/// large allocation forever.
pub(crate) fn reset_custom_field_states(
    states: &mut Vec<CustomFieldState>,
    schema: &MessageSchema,
    lru_size: usize,
) {
    if states.capacity() > MAX_CUSTOM_FIELDS_CAPACITY_RETAIN {
        *states = Vec::new();
    } else {
        states.clear();
    }
    for (field_num, kind) in build_plan(schema) {
        states.push(CustomFieldState::new(field_num, kind, lru_size));
    }
}
