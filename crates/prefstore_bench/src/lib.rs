//! Benchmark utilities.

use prefstore_codec::{TypedArray, Value};
use rand::Rng;

/// Generate random bytes of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// A small settings-like record.
pub fn simple_map() -> Value {
    Value::map([
        ("theme", Value::from("dark")),
        ("fontSize", Value::Integer(14)),
        ("scale", Value::Float(1.25)),
        ("telemetry", Value::Bool(false)),
    ])
}

/// A map nested `depth` levels deep with `width` children per level.
pub fn nested_map(depth: usize, width: usize) -> Value {
    if depth == 0 {
        return Value::from("leaf");
    }
    Value::map((0..width).map(|i| (format!("key_{i}"), nested_map(depth - 1, width))))
}

/// A float typed array of `len` random elements.
pub fn random_samples(len: usize) -> Value {
    let mut rng = rand::thread_rng();
    Value::TypedArray(TypedArray::Float64((0..len).map(|_| rng.gen()).collect()))
}

/// Keys `key_0000` .. in ascending order.
pub fn keys(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("key_{i:04}")).collect()
}
