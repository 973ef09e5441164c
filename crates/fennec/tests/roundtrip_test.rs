//! Property-based tests for the protobuf datapoint codec.
//!
//! Uses proptest to verify lossless round-trip encoding for arbitrary
//! schema-conformant message sequences: timestamps must match bit-exactly
//! and every schema field must compare equal (bit-equal for floats) after
//! decoding.

use alopex_fennec::{
    Datapoint, Decoder, Encoder, EncoderOptions, FieldDescriptor, FieldType, Message,
    MessageSchema, TimeUnit, Value,
};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::sync::Arc;

fn mixed_schema() -> Arc<MessageSchema> {
    Arc::new(
        MessageSchema::new(vec![
            FieldDescriptor::new(1, "gauge", FieldType::Double),
            FieldDescriptor::new(2, "counter", FieldType::Int64),
            FieldDescriptor::new(3, "events", FieldType::UInt32),
            FieldDescriptor::new(4, "tag", FieldType::Bytes),
            FieldDescriptor::new(5, "host", FieldType::String),
            FieldDescriptor::new(6, "healthy", FieldType::Bool),
        ])
        .unwrap(),
    )
}

#[derive(Debug, Clone)]
struct Record {
    gauge: f64,
    counter: i64,
    events: u32,
    tag: Vec<u8>,
    host: String,
    healthy: bool,
}

impl Record {
    fn payload(&self, schema: &MessageSchema) -> Vec<u8> {
        let mut msg = Message::new();
        msg.set(1, Value::Double(self.gauge));
        msg.set(2, Value::Int64(self.counter));
        msg.set(3, Value::UInt32(self.events));
        msg.set(4, Value::Bytes(self.tag.clone()));
        msg.set(5, Value::String(self.host.clone()));
        msg.set(6, Value::Bool(self.healthy));
        msg.marshal(schema)
    }
}

/// Strategy: blobs and hosts from small pools, so runs exercise all three
/// dictionary paths (no-change, back-reference, new blob) and the
/// no-change proto tail.
fn record_strategy() -> impl Strategy<Value = Record> {
    (
        -1_000_000.0f64..1_000_000.0,
        any::<i64>(),
        any::<u32>(),
        prop::sample::select(vec![
            b"".to_vec(),
            b"eu-west".to_vec(),
            b"us-east".to_vec(),
            b"ap-south".to_vec(),
            b"sa-east-long-region-name".to_vec(),
        ]),
        prop::sample::select(vec![
            String::new(),
            "db-1".to_string(),
            "db-2".to_string(),
        ]),
        any::<bool>(),
    )
        .prop_map(|(gauge, counter, events, tag, host, healthy)| Record {
            gauge,
            counter,
            events,
            tag,
            host,
            healthy,
        })
}

/// Strategy for sorted timestamps with bounded, positive deltas.
fn timestamp_strategy(len: usize) -> impl Strategy<Value = Vec<i64>> {
    (
        0i64..1_000_000_000_000i64,
        prop::collection::vec(1i64..10_000_000_000, len.saturating_sub(1)),
    )
        .prop_map(|(base, deltas)| {
            let mut timestamps = vec![base];
            let mut current = base;
            for delta in deltas {
                current = current.saturating_add(delta);
                timestamps.push(current);
            }
            timestamps
        })
}

fn sequence_strategy() -> impl Strategy<Value = (Vec<i64>, Vec<Record>)> {
    prop::collection::vec(record_strategy(), 1..60).prop_flat_map(|records| {
        let len = records.len();
        (timestamp_strategy(len), Just(records))
    })
}

fn roundtrip(
    schema: &Arc<MessageSchema>,
    lru_size: usize,
    timestamps: &[i64],
    records: &[Record],
) -> Result<(), TestCaseError> {
    let mut enc = Encoder::new(0, EncoderOptions {
        byte_field_dictionary_lru_size: lru_size,
        ..EncoderOptions::default()
    });
    enc.set_schema(schema.clone());
    for (ts, record) in timestamps.iter().zip(records.iter()) {
        enc.encode(
            Datapoint::new(*ts, 0.0),
            TimeUnit::Nanoseconds,
            &record.payload(schema),
        )
        .unwrap();
    }

    let bytes = enc.bytes().unwrap().to_vec();
    let decoded = Decoder::new(schema.clone(), &bytes).decode_all().unwrap();
    prop_assert_eq!(decoded.len(), records.len());

    for ((ts, record), (dp, msg)) in timestamps.iter().zip(records.iter()).zip(decoded.iter()) {
        prop_assert_eq!(dp.timestamp, *ts, "timestamp mismatch");

        let gauge = msg.get_or_default(schema, 1).unwrap();
        prop_assert!(
            gauge.bitwise_eq(&Value::Double(record.gauge)),
            "gauge mismatch: {:?} vs {}",
            gauge,
            record.gauge
        );
        prop_assert_eq!(
            msg.get_or_default(schema, 2).unwrap(),
            Value::Int64(record.counter)
        );
        prop_assert_eq!(
            msg.get_or_default(schema, 3).unwrap(),
            Value::UInt32(record.events)
        );
        prop_assert_eq!(
            msg.get_or_default(schema, 4).unwrap(),
            Value::Bytes(record.tag.clone())
        );
        prop_assert_eq!(
            msg.get_or_default(schema, 5).unwrap(),
            Value::String(record.host.clone())
        );
        prop_assert_eq!(
            msg.get_or_default(schema, 6).unwrap(),
            Value::Bool(record.healthy)
        );
    }
    Ok(())
}

proptest! {
    /// Arbitrary mixed-field sequences round-trip losslessly.
    #[test]
    fn test_mixed_sequence_roundtrip((timestamps, records) in sequence_strategy()) {
        let schema = mixed_schema();
        roundtrip(&schema, 4, &timestamps, &records)?;
    }

    /// A tiny dictionary forces constant eviction; round-trip must still
    /// hold.
    #[test]
    fn test_roundtrip_with_tiny_dictionary((timestamps, records) in sequence_strategy()) {
        let schema = mixed_schema();
        roundtrip(&schema, 1, &timestamps, &records)?;
    }

    /// Arbitrary i64 sequences through a single custom integer field.
    #[test]
    fn test_int64_field_roundtrip(values in prop::collection::vec(any::<i64>(), 1..100)) {
        let schema = Arc::new(MessageSchema::new(vec![
            FieldDescriptor::new(1, "v", FieldType::Int64),
        ]).unwrap());

        let mut enc = Encoder::new(0, EncoderOptions::default());
        enc.set_schema(schema.clone());
        for (i, v) in values.iter().enumerate() {
            let mut msg = Message::new();
            msg.set(1, Value::Int64(*v));
            enc.encode(
                Datapoint::new(1_000_000 + i as i64 * 1000, 0.0),
                TimeUnit::Nanoseconds,
                &msg.marshal(&schema),
            ).unwrap();
        }

        let bytes = enc.bytes().unwrap().to_vec();
        let decoded = Decoder::new(schema.clone(), &bytes).decode_all().unwrap();
        prop_assert_eq!(decoded.len(), values.len());
        for (v, (_, msg)) in values.iter().zip(decoded.iter()) {
            prop_assert_eq!(msg.get_or_default(&schema, 1).unwrap(), Value::Int64(*v));
        }
    }

    /// Arbitrary f64 bit patterns (NaNs included) through a custom float
    /// field round-trip bit-exactly.
    #[test]
    fn test_double_field_roundtrip(bits in prop::collection::vec(any::<u64>(), 1..100)) {
        let schema = Arc::new(MessageSchema::new(vec![
            FieldDescriptor::new(1, "v", FieldType::Double),
        ]).unwrap());

        let mut enc = Encoder::new(0, EncoderOptions::default());
        enc.set_schema(schema.clone());
        for (i, b) in bits.iter().enumerate() {
            let mut msg = Message::new();
            msg.set(1, Value::Double(f64::from_bits(*b)));
            enc.encode(
                Datapoint::new(1_000_000 + i as i64 * 1000, 0.0),
                TimeUnit::Nanoseconds,
                &msg.marshal(&schema),
            ).unwrap();
        }

        let bytes = enc.bytes().unwrap().to_vec();
        let decoded = Decoder::new(schema.clone(), &bytes).decode_all().unwrap();
        prop_assert_eq!(decoded.len(), bits.len());
        for (b, (_, msg)) in bits.iter().zip(decoded.iter()) {
            match msg.get_or_default(&schema, 1).unwrap() {
                Value::Double(v) => prop_assert_eq!(v.to_bits(), *b),
                other => prop_assert!(false, "expected a double, got {:?}", other),
            }
        }
    }

    /// Encoding the same sequence twice through reset produces identical
    /// bytes.
    #[test]
    fn test_reset_determinism((timestamps, records) in sequence_strategy()) {
        let schema = mixed_schema();
        let mut enc = Encoder::new(0, EncoderOptions::default());
        enc.set_schema(schema.clone());

        for (ts, record) in timestamps.iter().zip(records.iter()) {
            enc.encode(
                Datapoint::new(*ts, 0.0),
                TimeUnit::Nanoseconds,
                &record.payload(&schema),
            ).unwrap();
        }
        let first = enc.bytes().unwrap().to_vec();

        enc.reset(0, 0);
        for (ts, record) in timestamps.iter().zip(records.iter()) {
            enc.encode(
                Datapoint::new(*ts, 0.0),
                TimeUnit::Nanoseconds,
                &record.payload(&schema),
            ).unwrap();
        }
        prop_assert_eq!(enc.bytes().unwrap(), first.as_slice());
    }
}

#[cfg(test)]
mod compression_tests {
    use super::*;

    /// Steady-state telemetry (unchanged fields, rotating tags) should
    /// compress far below the raw payload size.
    #[test]
    fn test_steady_state_compression() {
        let schema = mixed_schema();
        let mut enc = Encoder::new(0, EncoderOptions::default());
        enc.set_schema(schema.clone());

        let mut raw_size = 0;
        for i in 0..1000i64 {
            let record = Record {
                gauge: 42.0,
                counter: 100 + i,
                events: 7,
                tag: b"eu-west".to_vec(),
                host: "db-1".to_string(),
                healthy: true,
            };
            let payload = record.payload(&schema);
            raw_size += payload.len();
            enc.encode(
                Datapoint::new(1_000_000_000 + i * 10_000_000, 0.0),
                TimeUnit::Nanoseconds,
                &payload,
            )
            .unwrap();
        }

        let encoded_size = enc.len();
        let ratio = raw_size as f64 / encoded_size as f64;
        assert!(
            ratio > 5.0,
            "Expected compression ratio >5:1, got {:.2}:1 ({} raw, {} encoded)",
            ratio,
            raw_size,
            encoded_size
        );

        let decoded = Decoder::new(schema, enc.bytes().unwrap())
            .decode_all()
            .unwrap();
        assert_eq!(decoded.len(), 1000);
    }
}
