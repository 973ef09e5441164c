//! Schema-aware dynamic protobuf message model.
//!
//! The codec never works with generated message types: callers hand it a
//! [`MessageSchema`] describing the fields of a message and raw payload
//! bytes in standard protobuf wire format. This module provides the schema
//! description, the dynamic [`Value`] union, and the [`Message`] container
//! with its wire-format parser and canonical marshaller.

pub mod message;
pub mod schema;
pub mod value;

pub use message::Message;
pub use schema::{FieldDescriptor, FieldType, MessageSchema};
pub use value::Value;
