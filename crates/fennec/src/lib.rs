//! Fennec - Alopex Protobuf Time Series Codec
//!
//! This crate provides a columnar, schema-aware compression codec for
//! streams of `(timestamp, protobuf message)` datapoints. Instead of
//! treating serialized payloads as opaque blobs, the encoder decomposes
//! each message by schema field and applies a specialized coder per
//! field:
//!
//! - **Timestamps**: delta-of-delta encoding with a unit-tagged header
//! - **Floats**: XOR-with-previous encoding (Gorilla-style)
//! - **Integers**: delta encoding with a widen-only significant-bits tracker
//! - **Bytes**: a per-field LRU dictionary with in-stream back-references
//! - **Everything else**: a schema-diffed, length-prefixed generic marshal
//!
//! # Components
//!
//! - [`Encoder`]: streaming encoder with reset / close / discard lifecycle
//! - [`Decoder`]: streaming decoder yielding `(Datapoint, Message)` pairs
//! - [`MessageSchema`] / [`Message`]: the dynamic message model the codec
//!   is driven by
//!
//! # Example
//!
//! ```rust,ignore
//! use alopex_fennec::{Datapoint, Decoder, Encoder, EncoderOptions, TimeUnit};
//! use alopex_fennec::{FieldDescriptor, FieldType, Message, MessageSchema, Value};
//! use std::sync::Arc;
//!
//! let schema = Arc::new(MessageSchema::new(vec![
//!     FieldDescriptor::new(1, "latency_ns", FieldType::Int64),
//!     FieldDescriptor::new(2, "endpoint", FieldType::Bytes),
//! ])?);
//!
//! let mut encoder = Encoder::new(start_ns, EncoderOptions::default());
//! encoder.set_schema(schema.clone());
//! for (ts, payload) in points {
//!     encoder.encode(Datapoint::new(ts, 0.0), TimeUnit::Nanoseconds, &payload)?;
//! }
//!
//! let segment = encoder.discard();
//! for item in Decoder::new(schema, segment.as_slice()) {
//!     let (dp, msg) = item?;
//!     // ...
//! }
//! ```

#![deny(missing_docs)]

pub mod codec;
pub mod error;
pub mod proto;

pub use codec::{Datapoint, Decoder, Encoder, EncoderOptions, Segment, TimeUnit};
pub use error::{CodecError, Result};
pub use proto::{FieldDescriptor, FieldType, Message, MessageSchema, Value};
