//! Value Serializer Tests
//!
//! Round-trip fidelity across the closed set of typed values.

use serde::{Deserialize, Serialize};

use mcbin::value::{
    decode_value, encode_value, FLAG_BIG_INTEGER, FLAG_INTEGER, FLAG_OBJECT, FLAG_RAW,
};
use mcbin::{McError, ObjectCodec, Passthrough, Value};

fn round_trip(value: Value) -> Value {
    let (flags, data) = encode_value(&value, &Passthrough).unwrap();
    decode_value(flags, &data, &Passthrough).unwrap()
}

// =============================================================================
// Round-trip Tests
// =============================================================================

#[test]
fn test_raw_round_trip() {
    let original = Value::from("some text");
    assert_eq!(round_trip(original.clone()), original);
}

#[test]
fn test_empty_string_round_trip() {
    let original = Value::Raw(Vec::new());
    assert_eq!(round_trip(original.clone()), original);
}

#[test]
fn test_integer_round_trip() {
    for n in [0i32, 1, -1, i32::MAX, i32::MIN] {
        let original = Value::Int(n);
        assert_eq!(round_trip(original.clone()), original);
    }
}

#[test]
fn test_big_integer_round_trip() {
    for n in [0i64, 1 << 40, i64::MAX, i64::MIN] {
        let original = Value::BigInt(n);
        assert_eq!(round_trip(original.clone()), original);
    }
}

#[test]
fn test_object_round_trip() {
    let original = Value::Object(vec![0x00, 0xff, 0x10, 0x20]);
    assert_eq!(round_trip(original.clone()), original);
}

#[test]
fn test_flags_match_the_table() {
    let cases: Vec<(Value, u32)> = vec![
        (Value::from("text"), FLAG_RAW),
        (Value::Object(vec![1]), FLAG_OBJECT),
        (Value::Int(5), FLAG_INTEGER),
        (Value::BigInt(5), FLAG_BIG_INTEGER),
    ];
    for (value, expected_flags) in cases {
        let (flags, _) = encode_value(&value, &Passthrough).unwrap();
        assert_eq!(flags, expected_flags);
    }
}

#[test]
fn test_unknown_flags_rejected() {
    let err = decode_value(0x4000, b"data", &Passthrough).unwrap_err();
    assert!(matches!(err, McError::Serialization(_)));
}

// =============================================================================
// Structured-object codec
// =============================================================================

/// XORs every byte, so encoded bytes observably differ from the blob
struct XorCodec(u8);

impl ObjectCodec for XorCodec {
    fn encode(&self, object: &[u8]) -> mcbin::Result<Vec<u8>> {
        Ok(object.iter().map(|b| b ^ self.0).collect())
    }

    fn decode(&self, data: &[u8]) -> mcbin::Result<Vec<u8>> {
        Ok(data.iter().map(|b| b ^ self.0).collect())
    }
}

#[test]
fn test_injectable_codec_transforms_only_objects() {
    let codec = XorCodec(0xaa);

    let (_, data) = encode_value(&Value::Object(vec![0x01, 0x02]), &codec).unwrap();
    assert_eq!(data, vec![0xab, 0xa8]);
    let decoded = decode_value(FLAG_OBJECT, &data, &codec).unwrap();
    assert_eq!(decoded, Value::Object(vec![0x01, 0x02]));

    // Raw values never pass through the object codec
    let (_, data) = encode_value(&Value::from("plain"), &codec).unwrap();
    assert_eq!(data, b"plain");
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Record {
    name: String,
    count: u32,
}

#[test]
fn test_bincode_convenience_layer() {
    let record = Record {
        name: "widget".to_string(),
        count: 7,
    };
    let value = Value::from_serialize(&record).unwrap();
    assert!(matches!(value, Value::Object(_)));

    let restored: Record = round_trip(value).deserialize().unwrap();
    assert_eq!(restored, record);
}

#[test]
fn test_deserialize_requires_an_object() {
    let err = Value::Int(1).deserialize::<Record>().unwrap_err();
    assert!(matches!(err, McError::Serialization(_)));
}
