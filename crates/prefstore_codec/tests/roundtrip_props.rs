//! Property-based round-trip tests for the codec.

use prefstore_codec::{from_bytes, to_bytes, TypedArray, Value};
use proptest::prelude::*;

fn arb_float() -> impl Strategy<Value = f64> {
    prop_oneof![
        any::<f64>(),
        Just(f64::NAN),
        Just(f64::INFINITY),
        Just(f64::NEG_INFINITY),
        Just(-0.0),
    ]
}

fn arb_typed_array() -> impl Strategy<Value = TypedArray> {
    prop_oneof![
        prop::collection::vec(any::<i8>(), 0..16).prop_map(TypedArray::Int8),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(TypedArray::Uint8),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(TypedArray::Uint8Clamped),
        prop::collection::vec(any::<i16>(), 0..16).prop_map(TypedArray::Int16),
        prop::collection::vec(any::<u16>(), 0..16).prop_map(TypedArray::Uint16),
        prop::collection::vec(any::<i32>(), 0..16).prop_map(TypedArray::Int32),
        prop::collection::vec(any::<u32>(), 0..16).prop_map(TypedArray::Uint32),
        prop::collection::vec(any::<f32>(), 0..16).prop_map(TypedArray::Float32),
        prop::collection::vec(arb_float(), 0..16).prop_map(TypedArray::Float64),
    ]
}

fn arb_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        arb_float().prop_map(Value::Float),
        ".{0,12}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
        arb_typed_array().prop_map(Value::TypedArray),
    ];

    leaf.prop_recursive(4, 64, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..8).prop_map(Value::Array),
            // unique keys
            prop::collection::btree_map(".{0,8}", inner, 0..8)
                .prop_map(|entries| Value::Map(entries.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn decode_inverts_encode(value in arb_value()) {
        let bytes = to_bytes(&value).unwrap();
        prop_assert_eq!(from_bytes(&bytes).unwrap(), value);
    }

    #[test]
    fn encoding_is_deterministic(value in arb_value()) {
        let first = to_bytes(&value).unwrap();
        let decoded = from_bytes(&first).unwrap();
        prop_assert_eq!(to_bytes(&decoded).unwrap(), first);
    }

    #[test]
    fn truncated_input_never_decodes(value in arb_value(), cut in 1usize..8) {
        let bytes = to_bytes(&value).unwrap();
        let keep = bytes.len().saturating_sub(cut);
        prop_assert!(from_bytes(&bytes[..keep]).is_err());
    }
}
