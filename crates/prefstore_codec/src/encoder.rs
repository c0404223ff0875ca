//! Value encoder.

use crate::error::{CodecError, CodecResult};
use crate::value::{cmp_map_keys, SharedValue, TypedArray, Value};
use crate::MAX_DEPTH;

/// Encode a value to bytes.
///
/// The output is deterministic:
/// - map keys are emitted in canonical order (length-first, then bytewise)
/// - integer arguments use the shortest encoding
/// - floats are always emitted as 64-bit, bit for bit
/// - no indefinite-length items
///
/// # Errors
///
/// Returns [`CodecError::CyclicValue`] if a shared node is reachable from
/// itself, [`CodecError::DuplicateKey`] for a map with repeated keys, and
/// [`CodecError::DepthLimitExceeded`] for values nested too deeply.
pub fn to_bytes(value: &Value) -> CodecResult<Vec<u8>> {
    let mut encoder = Encoder::new();
    encoder.encode(value)?;
    Ok(encoder.into_bytes())
}

/// Encode an optional value. `None` encodes exactly like [`Value::Null`].
///
/// # Errors
///
/// Same as [`to_bytes`].
pub fn encode_optional(value: Option<&Value>) -> CodecResult<Vec<u8>> {
    to_bytes(value.unwrap_or(&Value::Null))
}

/// A streaming value encoder.
///
/// After an error the buffered output is unspecified; start a new encoder.
pub struct Encoder {
    buffer: Vec<u8>,
    /// Shared nodes on the path from the root to the node being encoded.
    active: Vec<usize>,
    depth: usize,
}

impl Encoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a new encoder with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            active: Vec::new(),
            depth: 0,
        }
    }

    /// Encode a value.
    pub fn encode(&mut self, value: &Value) -> CodecResult<()> {
        if self.depth >= MAX_DEPTH {
            return Err(CodecError::DepthLimitExceeded {
                max_depth: MAX_DEPTH,
            });
        }
        self.depth += 1;
        let result = self.encode_node(value);
        self.depth -= 1;
        result
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get a reference to the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    fn encode_node(&mut self, value: &Value) -> CodecResult<()> {
        match value {
            Value::Null => self.buffer.push(0xf6),
            Value::Bool(b) => self.buffer.push(if *b { 0xf5 } else { 0xf4 }),
            Value::Integer(n) => self.encode_integer(*n),
            Value::Float(f) => self.encode_float(*f),
            Value::Bytes(b) => self.encode_bytes(b),
            Value::Text(s) => self.encode_text(s),
            Value::TypedArray(array) => self.encode_typed_array(array),
            Value::Array(items) => return self.encode_array(items),
            Value::Map(pairs) => return self.encode_map(pairs),
            Value::Shared(node) => return self.encode_shared(node),
        }
        Ok(())
    }

    #[allow(clippy::cast_sign_loss)]
    fn encode_integer(&mut self, n: i64) {
        if n >= 0 {
            self.encode_unsigned(0, n as u64);
        } else {
            // -1 encodes as argument 0, -2 as 1, and so on
            self.encode_unsigned(1, (-(n + 1)) as u64);
        }
    }

    fn encode_float(&mut self, f: f64) {
        self.buffer.push(0xfb);
        self.buffer.extend_from_slice(&f.to_bits().to_be_bytes());
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_unsigned(&mut self, major_type: u8, value: u64) {
        let mt = major_type << 5;

        if value < 24 {
            self.buffer.push(mt | (value as u8));
        } else if u8::try_from(value).is_ok() {
            self.buffer.push(mt | 24);
            self.buffer.push(value as u8);
        } else if u16::try_from(value).is_ok() {
            self.buffer.push(mt | 25);
            self.buffer.extend_from_slice(&(value as u16).to_be_bytes());
        } else if u32::try_from(value).is_ok() {
            self.buffer.push(mt | 26);
            self.buffer.extend_from_slice(&(value as u32).to_be_bytes());
        } else {
            self.buffer.push(mt | 27);
            self.buffer.extend_from_slice(&value.to_be_bytes());
        }
    }

    fn encode_bytes(&mut self, bytes: &[u8]) {
        self.encode_unsigned(2, bytes.len() as u64);
        self.buffer.extend_from_slice(bytes);
    }

    fn encode_text(&mut self, text: &str) {
        self.encode_unsigned(3, text.len() as u64);
        self.buffer.extend_from_slice(text.as_bytes());
    }

    fn encode_typed_array(&mut self, array: &TypedArray) {
        self.encode_unsigned(6, array.element_type().tag());
        self.encode_bytes(&array.to_le_bytes());
    }

    fn encode_array(&mut self, items: &[Value]) -> CodecResult<()> {
        self.encode_unsigned(4, items.len() as u64);
        for item in items {
            self.encode(item)?;
        }
        Ok(())
    }

    fn encode_map(&mut self, pairs: &[(String, Value)]) -> CodecResult<()> {
        let mut sorted: Vec<&(String, Value)> = pairs.iter().collect();
        sorted.sort_by(|a, b| cmp_map_keys(&a.0, &b.0));

        if let Some(pair) = sorted.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(CodecError::DuplicateKey {
                key: pair[0].0.clone(),
            });
        }

        self.encode_unsigned(5, sorted.len() as u64);
        for (key, value) in sorted {
            self.encode_text(key);
            self.encode(value)?;
        }
        Ok(())
    }

    fn encode_shared(&mut self, node: &SharedValue) -> CodecResult<()> {
        let addr = node.addr();
        if self.active.contains(&addr) {
            return Err(CodecError::CyclicValue);
        }

        self.active.push(addr);
        let result = {
            let inner = node.read();
            self.encode(&inner)
        };
        self.active.pop();
        result
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_simple_values() {
        assert_eq!(to_bytes(&Value::Null).unwrap(), vec![0xf6]);
        assert_eq!(to_bytes(&Value::Bool(false)).unwrap(), vec![0xf4]);
        assert_eq!(to_bytes(&Value::Bool(true)).unwrap(), vec![0xf5]);
    }

    #[test]
    fn absent_encodes_as_null() {
        assert_eq!(encode_optional(None).unwrap(), to_bytes(&Value::Null).unwrap());
        assert_eq!(
            encode_optional(Some(&Value::Integer(1))).unwrap(),
            vec![0x01]
        );
    }

    #[test]
    fn encode_integers() {
        assert_eq!(to_bytes(&Value::Integer(0)).unwrap(), vec![0x00]);
        assert_eq!(to_bytes(&Value::Integer(23)).unwrap(), vec![0x17]);
        assert_eq!(to_bytes(&Value::Integer(24)).unwrap(), vec![0x18, 24]);
        assert_eq!(
            to_bytes(&Value::Integer(256)).unwrap(),
            vec![0x19, 0x01, 0x00]
        );
        assert_eq!(to_bytes(&Value::Integer(-1)).unwrap(), vec![0x20]);
        assert_eq!(to_bytes(&Value::Integer(-100)).unwrap(), vec![0x38, 99]);
        assert_eq!(
            to_bytes(&Value::Integer(i64::MIN)).unwrap(),
            vec![0x3b, 0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
        );
    }

    #[test]
    fn encode_floats_as_double() {
        assert_eq!(
            to_bytes(&Value::Float(1.5)).unwrap(),
            vec![0xfb, 0x3f, 0xf8, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(
            to_bytes(&Value::Float(f64::INFINITY)).unwrap(),
            vec![0xfb, 0x7f, 0xf0, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(
            to_bytes(&Value::Float(-0.0)).unwrap(),
            vec![0xfb, 0x80, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn encode_typed_array_as_tagged_bytes() {
        let value = Value::TypedArray(TypedArray::Uint16(vec![1, 0x0203]));
        // tag 69, then a 4-byte string of little-endian elements
        assert_eq!(
            to_bytes(&value).unwrap(),
            vec![0xd8, 69, 0x44, 0x01, 0x00, 0x03, 0x02]
        );

        let value = Value::TypedArray(TypedArray::Uint8(vec![]));
        assert_eq!(to_bytes(&value).unwrap(), vec![0xd8, 64, 0x40]);
    }

    #[test]
    fn encode_map_sorted() {
        let map = Value::Map(vec![
            ("bb".to_string(), Value::Integer(2)),
            ("a".to_string(), Value::Integer(1)),
        ]);
        assert_eq!(
            to_bytes(&map).unwrap(),
            vec![0xa2, 0x61, b'a', 0x01, 0x62, b'b', b'b', 0x02]
        );
    }

    #[test]
    fn deterministic_encoding() {
        let map1 = Value::Map(vec![
            ("z".to_string(), Value::Integer(1)),
            ("a".to_string(), Value::Integer(2)),
        ]);
        let map2 = Value::Map(vec![
            ("a".to_string(), Value::Integer(2)),
            ("z".to_string(), Value::Integer(1)),
        ]);
        assert_eq!(to_bytes(&map1).unwrap(), to_bytes(&map2).unwrap());
    }

    #[test]
    fn duplicate_map_key_rejected() {
        let map = Value::Map(vec![
            ("k".to_string(), Value::Integer(1)),
            ("k".to_string(), Value::Integer(2)),
        ]);
        assert_eq!(
            to_bytes(&map),
            Err(CodecError::DuplicateKey {
                key: "k".to_string()
            })
        );
    }

    #[test]
    fn self_reference_is_rejected() {
        let node = SharedValue::new(Value::Null);
        node.set(Value::map([("self", Value::Shared(node.clone()))]));

        assert_eq!(
            to_bytes(&Value::Shared(node.clone())),
            Err(CodecError::CyclicValue)
        );
        node.set(Value::Null);
    }

    #[test]
    fn indirect_cycle_is_rejected() {
        let a = SharedValue::new(Value::Null);
        let b = SharedValue::new(Value::array([Value::Shared(a.clone())]));
        a.set(Value::map([("b", Value::Shared(b.clone()))]));

        let root = Value::array([Value::Integer(1), Value::Shared(a.clone())]);
        assert_eq!(to_bytes(&root), Err(CodecError::CyclicValue));
        a.set(Value::Null);
    }

    #[test]
    fn shared_without_cycle_encodes_by_value() {
        let leaf = SharedValue::new(Value::from("leaf"));
        let value = Value::array([Value::Shared(leaf.clone()), Value::Shared(leaf)]);
        let plain = Value::array([Value::from("leaf"), Value::from("leaf")]);
        assert_eq!(to_bytes(&value).unwrap(), to_bytes(&plain).unwrap());
    }

    #[test]
    fn depth_limit() {
        let mut value = Value::Null;
        for _ in 0..MAX_DEPTH {
            value = Value::Array(vec![value]);
        }
        assert!(matches!(
            to_bytes(&value),
            Err(CodecError::DepthLimitExceeded { .. })
        ));
    }
}
