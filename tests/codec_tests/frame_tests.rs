//! Tests for the record codec
//!
//! These tests verify:
//! - Write and tombstone frames decode to what was encoded
//! - Frame layout (kind byte, lengths, checksum trailer)
//! - Truncated, corrupted and garbage input is rejected
//! - Key parsing and typing rules

use serde_json::json;
use tablekv::codec::{
    parse_record, Decoded, Frame, FrameKind, Key, KeyType, Record, FRAME_OVERHEAD,
};
use tablekv::StoreError;

// =============================================================================
// Helper Functions
// =============================================================================

fn record(value: serde_json::Value) -> Record {
    value.as_object().unwrap().clone()
}

fn sample_frame() -> Frame {
    Frame::write(
        Key::Int(1),
        7,
        record(json!({"id": 1, "name": "John", "tags": ["a", "b"], "score": 1.5})),
    )
}

// =============================================================================
// Encode / Decode Tests
// =============================================================================

#[test]
fn test_write_frame_decodes_to_same_record() {
    let frame = sample_frame();
    let bytes = frame.encode().unwrap();

    let decoded = Frame::decode(&bytes).unwrap();

    assert_eq!(decoded, frame);
    assert_eq!(decoded.kind, FrameKind::Write);
    assert_eq!(decoded.sequence, 7);
}

#[test]
fn test_tombstone_has_no_value() {
    let frame = Frame::tombstone(Key::Str("user-1".to_string()), 9);
    let bytes = frame.encode().unwrap();

    // kind + key_len + (tag + 6 bytes) + seq + value_len + crc
    assert_eq!(bytes.len(), FRAME_OVERHEAD + 7);

    let decoded = Frame::decode(&bytes).unwrap();
    assert!(decoded.is_tombstone());
    assert_eq!(decoded.value, None);
    assert_eq!(decoded.key, Key::Str("user-1".to_string()));
}

#[test]
fn test_encoding_is_deterministic() {
    let a = sample_frame().encode().unwrap();
    let b = sample_frame().encode().unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_nested_values_survive() {
    let value = record(json!({
        "id": "x",
        "profile": {"address": {"city": "Oslo", "zip": null}},
        "flags": [true, false],
        "big": i64::MAX,
        "neg": -42,
        "text": "unicode ✓ \"quoted\"",
    }));
    let frame = Frame::write(Key::Str("x".to_string()), 1, value.clone());

    let decoded = Frame::decode(&frame.encode().unwrap()).unwrap();
    assert_eq!(decoded.value, Some(value));
}

#[test]
fn test_floats_survive_bit_for_bit() {
    let mut values = vec![
        1.0715660391465826e-75,
        -1.81996730402717e-179,
        -1.603964615428183e143,
        0.1,
        -0.0,
        f64::MIN_POSITIVE,
        f64::MAX,
        5e-324,
    ];

    // Spread of bit patterns across the whole exponent range
    let mut state = 0x9e37_79b9_7f4a_7c15u64;
    while values.len() < 2000 {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let f = f64::from_bits(state);
        if f.is_finite() {
            values.push(f);
        }
    }

    for f in values {
        let value = record(json!({"id": 1, "x": f}));
        let frame = Frame::write(Key::Int(1), 1, value);

        let decoded = Frame::decode(&frame.encode().unwrap()).unwrap();
        let got = decoded.value.as_ref().unwrap()["x"].as_f64().unwrap();
        assert_eq!(got.to_bits(), f.to_bits(), "{:e} came back as {:e}", f, got);
        assert_eq!(decoded, frame);
    }
}

#[test]
fn test_first_byte_is_kind() {
    let write = sample_frame().encode().unwrap();
    let tombstone = Frame::tombstone(Key::Int(1), 2).encode().unwrap();

    assert_eq!(write[0], 0x01);
    assert_eq!(tombstone[0], 0x02);
}

// =============================================================================
// Prefix Decoding Tests
// =============================================================================

#[test]
fn test_decode_prefix_reports_length_of_first_frame() {
    let first = sample_frame().encode().unwrap();
    let second = Frame::tombstone(Key::Int(2), 8).encode().unwrap();

    let mut buf = first.clone();
    buf.extend_from_slice(&second);

    match Frame::decode_prefix(&buf).unwrap() {
        Decoded::Complete { frame, len } => {
            assert_eq!(len, first.len());
            assert_eq!(frame.sequence, 7);
        }
        other => panic!("expected a complete frame, got {:?}", other),
    }
}

#[test]
fn test_decode_prefix_incomplete_at_every_cut() {
    let bytes = sample_frame().encode().unwrap();

    for cut in 0..bytes.len() {
        match Frame::decode_prefix(&bytes[..cut]).unwrap() {
            Decoded::Incomplete => {}
            other => panic!("cut at {} gave {:?}", cut, other),
        }
    }
}

#[test]
fn test_decode_prefix_reports_checksum_mismatch() {
    let mut bytes = sample_frame().encode().unwrap();
    let last_value_byte = bytes.len() - 5;
    bytes[last_value_byte] ^= 0xFF;

    match Frame::decode_prefix(&bytes).unwrap() {
        Decoded::ChecksumMismatch { len } => assert_eq!(len, bytes.len()),
        other => panic!("expected checksum mismatch, got {:?}", other),
    }
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_decode_rejects_truncated_frame() {
    let bytes = sample_frame().encode().unwrap();
    let err = Frame::decode(&bytes[..bytes.len() - 1]).unwrap_err();
    assert!(matches!(err, StoreError::CorruptFrame(_)));
}

#[test]
fn test_decode_rejects_trailing_bytes() {
    let mut bytes = sample_frame().encode().unwrap();
    bytes.push(0);
    let err = Frame::decode(&bytes).unwrap_err();
    assert!(matches!(err, StoreError::CorruptFrame(_)));
}

#[test]
fn test_decode_rejects_flipped_bit() {
    let mut bytes = sample_frame().encode().unwrap();
    bytes[10] ^= 0x01;
    let err = Frame::decode(&bytes).unwrap_err();
    assert!(matches!(err, StoreError::CorruptFrame(_)));
}

#[test]
fn test_decode_rejects_unknown_kind() {
    let mut bytes = sample_frame().encode().unwrap();
    bytes[0] = 0x09;
    let err = Frame::decode_prefix(&bytes).unwrap_err();
    assert!(matches!(err, StoreError::CorruptFrame(_)));
}

#[test]
fn test_decode_rejects_huge_key_length() {
    let mut bytes = sample_frame().encode().unwrap();
    bytes[1..5].copy_from_slice(&u32::MAX.to_le_bytes());
    let err = Frame::decode_prefix(&bytes).unwrap_err();
    assert!(matches!(err, StoreError::CorruptFrame(_)));
}

#[test]
fn test_decode_rejects_zero_key_length() {
    let mut bytes = sample_frame().encode().unwrap();
    bytes[1..5].copy_from_slice(&0u32.to_le_bytes());
    let err = Frame::decode_prefix(&bytes).unwrap_err();
    assert!(matches!(err, StoreError::CorruptFrame(_)));
}

#[test]
fn test_decode_rejects_all_zero_bytes() {
    let zeros = vec![0u8; 64];
    assert!(matches!(
        Frame::decode_prefix(&zeros),
        Err(StoreError::CorruptFrame(_))
    ));
}

// =============================================================================
// Key Tests
// =============================================================================

#[test]
fn test_key_parse_follows_declared_type() {
    assert_eq!(Key::parse("1", KeyType::Integer).unwrap(), Key::Int(1));
    assert_eq!(
        Key::parse("1", KeyType::String).unwrap(),
        Key::Str("1".to_string())
    );

    let err = Key::parse("one", KeyType::Integer).unwrap_err();
    assert!(matches!(
        err,
        StoreError::KeyTypeMismatch {
            expected: KeyType::Integer,
            ..
        }
    ));
}

#[test]
fn test_key_from_json_does_not_coerce() {
    assert_eq!(
        Key::from_json(&json!(5), KeyType::Integer).unwrap(),
        Key::Int(5)
    );
    assert!(Key::from_json(&json!("5"), KeyType::Integer).is_err());
    assert!(Key::from_json(&json!(5), KeyType::String).is_err());
    assert!(Key::from_json(&json!(1.5), KeyType::Integer).is_err());
}

#[test]
fn test_key_ordering_puts_integers_first() {
    let mut keys = vec![
        Key::Str("b".to_string()),
        Key::Int(10),
        Key::Str("a".to_string()),
        Key::Int(-3),
    ];
    keys.sort();

    assert_eq!(
        keys,
        vec![
            Key::Int(-3),
            Key::Int(10),
            Key::Str("a".to_string()),
            Key::Str("b".to_string()),
        ]
    );
}

#[test]
fn test_key_type_from_str() {
    assert_eq!("integer".parse::<KeyType>().unwrap(), KeyType::Integer);
    assert_eq!("INT".parse::<KeyType>().unwrap(), KeyType::Integer);
    assert_eq!("string".parse::<KeyType>().unwrap(), KeyType::String);
    assert!(matches!(
        "float".parse::<KeyType>(),
        Err(StoreError::InvalidArgument(_))
    ));
}

// =============================================================================
// Record Parsing Tests
// =============================================================================

#[test]
fn test_parse_record_requires_object() {
    let rec = parse_record(r#"{"id": 1, "name": "John"}"#).unwrap();
    assert_eq!(rec["name"], json!("John"));

    assert!(matches!(
        parse_record("[1, 2]"),
        Err(StoreError::InvalidRecord(_))
    ));
    assert!(matches!(
        parse_record("{not json"),
        Err(StoreError::InvalidRecord(_))
    ));
}
