//! Dynamic value type for the extended value domain.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// A dynamically typed value.
///
/// Covers JSON-like data plus binary buffers, typed numeric arrays and
/// non-finite floats. Integers and floats are distinct number classes and
/// survive a round trip as such.
///
/// # Equality
///
/// Equality is deep and structural:
/// - floats compare by bit pattern, except that every NaN equals every NaN
///   (so `0.0 != -0.0`)
/// - maps compare as unordered sets of entries
/// - [`Value::Shared`] compares by the value it currently holds
#[derive(Debug, Clone)]
pub enum Value {
    /// Null value. Absent values are represented as null.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer (full i64 range).
    Integer(i64),
    /// IEEE-754 double, including NaN and the infinities.
    Float(f64),
    /// Binary buffer.
    Bytes(Vec<u8>),
    /// Text string (UTF-8).
    Text(String),
    /// Typed numeric array.
    TypedArray(TypedArray),
    /// Ordered sequence of values.
    Array(Vec<Value>),
    /// String-keyed mapping. Keys must be unique.
    Map(Vec<(String, Value)>),
    /// An aliased node that may be referenced from several places.
    Shared(SharedValue),
}

impl Value {
    /// Create a map value with keys in canonical order.
    pub fn map<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Self {
        let mut pairs: Vec<(String, Value)> =
            pairs.into_iter().map(|(k, v)| (k.into(), v)).collect();
        pairs.sort_by(|a, b| cmp_map_keys(&a.0, &b.0));
        Value::Map(pairs)
    }

    /// Create an array value.
    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Array(items.into_iter().collect())
    }

    /// Wrap a value in a new shared node.
    pub fn shared(value: Value) -> Self {
        Value::Shared(SharedValue::new(value))
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Shared(node) => node.read().is_null(),
            _ => false,
        }
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as an `f64` if it is any number.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Get this value as bytes, if it is a binary buffer.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get this value as a string, if it is a text string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as a typed array, if it is one.
    pub fn as_typed_array(&self) -> Option<&TypedArray> {
        match self {
            Value::TypedArray(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as a map, if it is one.
    pub fn as_map(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a key in this map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(pairs) => pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Shared(a), Value::Shared(b)) if a.ptr_eq(b) => true,
            (Value::Shared(a), b) => *a.read() == *b,
            (a, Value::Shared(b)) => *a == *b.read(),
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => same_f64(*a, *b),
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::TypedArray(a), Value::TypedArray(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(key, value)| b.iter().any(|(k, v)| k == key && v == value))
            }
            _ => false,
        }
    }
}

/// Canonical map key order: shorter UTF-8 encodings first, then bytewise.
///
/// This matches the order of the keys' encoded forms.
pub(crate) fn cmp_map_keys(a: &str, b: &str) -> Ordering {
    match a.len().cmp(&b.len()) {
        Ordering::Equal => a.as_bytes().cmp(b.as_bytes()),
        other => other,
    }
}

fn same_f64(a: f64, b: f64) -> bool {
    a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan())
}

fn same_f32(a: f32, b: f32) -> bool {
    a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan())
}

/// A shared, interior-mutable value node.
///
/// Cloning a `SharedValue` clones the handle, not the value, so the same
/// node can appear at several positions of a value graph. A node that ends
/// up reachable from itself forms a cycle, which the encoder rejects.
///
/// Cycles built from `SharedValue` are reference cycles and are not freed
/// until broken with [`SharedValue::set`].
#[derive(Clone)]
pub struct SharedValue(Arc<RwLock<Value>>);

impl SharedValue {
    /// Create a new node holding `value`.
    pub fn new(value: Value) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    /// Borrow the current value.
    pub fn read(&self) -> RwLockReadGuard<'_, Value> {
        self.0.read()
    }

    /// Mutably borrow the current value.
    pub fn write(&self) -> RwLockWriteGuard<'_, Value> {
        self.0.write()
    }

    /// Replace the current value, returning the previous one.
    pub fn set(&self, value: Value) -> Value {
        std::mem::replace(&mut *self.0.write(), value)
    }

    /// Returns `true` if both handles point at the same node.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Identity of the node, stable for its lifetime.
    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0).cast::<()>() as usize
    }
}

impl fmt::Debug for SharedValue {
    // Never descends into the node: it may be part of a cycle.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedValue({:p})", Arc::as_ptr(&self.0))
    }
}

/// Element type of a [`TypedArray`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// Signed 8-bit integers.
    Int8,
    /// Unsigned 8-bit integers.
    Uint8,
    /// Unsigned 8-bit integers with clamping semantics.
    Uint8Clamped,
    /// Signed 16-bit integers.
    Int16,
    /// Unsigned 16-bit integers.
    Uint16,
    /// Signed 32-bit integers.
    Int32,
    /// Unsigned 32-bit integers.
    Uint32,
    /// 32-bit floats.
    Float32,
    /// 64-bit floats.
    Float64,
}

impl ElementType {
    /// All element types.
    pub const ALL: [ElementType; 9] = [
        Self::Int8,
        Self::Uint8,
        Self::Uint8Clamped,
        Self::Int16,
        Self::Uint16,
        Self::Int32,
        Self::Uint32,
        Self::Float32,
        Self::Float64,
    ];

    /// RFC 8746 tag for a little-endian array of this element type.
    #[must_use]
    pub const fn tag(self) -> u64 {
        match self {
            Self::Uint8 => 64,
            Self::Uint8Clamped => 68,
            Self::Uint16 => 69,
            Self::Uint32 => 70,
            Self::Int8 => 72,
            Self::Int16 => 77,
            Self::Int32 => 78,
            Self::Float32 => 85,
            Self::Float64 => 86,
        }
    }

    /// Looks up the element type for an RFC 8746 tag.
    #[must_use]
    pub fn from_tag(tag: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag() == tag)
    }

    /// Width of one element in bytes.
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 | Self::Uint8Clamped => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    /// Conventional name of the array type.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int8 => "Int8Array",
            Self::Uint8 => "Uint8Array",
            Self::Uint8Clamped => "Uint8ClampedArray",
            Self::Int16 => "Int16Array",
            Self::Uint16 => "Uint16Array",
            Self::Int32 => "Int32Array",
            Self::Uint32 => "Uint32Array",
            Self::Float32 => "Float32Array",
            Self::Float64 => "Float64Array",
        }
    }
}

/// A typed numeric array. The element type is part of the value.
#[derive(Debug, Clone)]
pub enum TypedArray {
    /// `Int8Array`.
    Int8(Vec<i8>),
    /// `Uint8Array`.
    Uint8(Vec<u8>),
    /// `Uint8ClampedArray`.
    Uint8Clamped(Vec<u8>),
    /// `Int16Array`.
    Int16(Vec<i16>),
    /// `Uint16Array`.
    Uint16(Vec<u16>),
    /// `Int32Array`.
    Int32(Vec<i32>),
    /// `Uint32Array`.
    Uint32(Vec<u32>),
    /// `Float32Array`.
    Float32(Vec<f32>),
    /// `Float64Array`.
    Float64(Vec<f64>),
}

macro_rules! le_bytes {
    ($items:expr) => {
        $items.iter().flat_map(|x| x.to_le_bytes()).collect()
    };
}

fn from_chunks<const N: usize, T>(bytes: &[u8], convert: fn([u8; N]) -> T) -> Vec<T> {
    bytes
        .chunks_exact(N)
        .map(|chunk| {
            let mut buf = [0u8; N];
            buf.copy_from_slice(chunk);
            convert(buf)
        })
        .collect()
}

impl TypedArray {
    /// The element type of this array.
    #[must_use]
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::Int8(_) => ElementType::Int8,
            Self::Uint8(_) => ElementType::Uint8,
            Self::Uint8Clamped(_) => ElementType::Uint8Clamped,
            Self::Int16(_) => ElementType::Int16,
            Self::Uint16(_) => ElementType::Uint16,
            Self::Int32(_) => ElementType::Int32,
            Self::Uint32(_) => ElementType::Uint32,
            Self::Float32(_) => ElementType::Float32,
            Self::Float64(_) => ElementType::Float64,
        }
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Int8(v) => v.len(),
            Self::Uint8(v) | Self::Uint8Clamped(v) => v.len(),
            Self::Int16(v) => v.len(),
            Self::Uint16(v) => v.len(),
            Self::Int32(v) => v.len(),
            Self::Uint32(v) => v.len(),
            Self::Float32(v) => v.len(),
            Self::Float64(v) => v.len(),
        }
    }

    /// Returns `true` if the array has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element data as little-endian bytes.
    #[must_use]
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            Self::Uint8(v) | Self::Uint8Clamped(v) => v.clone(),
            Self::Int8(v) => le_bytes!(v),
            Self::Int16(v) => le_bytes!(v),
            Self::Uint16(v) => le_bytes!(v),
            Self::Int32(v) => le_bytes!(v),
            Self::Uint32(v) => le_bytes!(v),
            Self::Float32(v) => le_bytes!(v),
            Self::Float64(v) => le_bytes!(v),
        }
    }

    /// Rebuilds an array from little-endian element data.
    ///
    /// Returns `None` if `bytes` is not a whole number of elements.
    #[must_use]
    pub fn from_le_bytes(element_type: ElementType, bytes: &[u8]) -> Option<Self> {
        if bytes.len() % element_type.width() != 0 {
            return None;
        }
        let array = match element_type {
            ElementType::Int8 => Self::Int8(from_chunks(bytes, i8::from_le_bytes)),
            ElementType::Uint8 => Self::Uint8(bytes.to_vec()),
            ElementType::Uint8Clamped => Self::Uint8Clamped(bytes.to_vec()),
            ElementType::Int16 => Self::Int16(from_chunks(bytes, i16::from_le_bytes)),
            ElementType::Uint16 => Self::Uint16(from_chunks(bytes, u16::from_le_bytes)),
            ElementType::Int32 => Self::Int32(from_chunks(bytes, i32::from_le_bytes)),
            ElementType::Uint32 => Self::Uint32(from_chunks(bytes, u32::from_le_bytes)),
            ElementType::Float32 => Self::Float32(from_chunks(bytes, f32::from_le_bytes)),
            ElementType::Float64 => Self::Float64(from_chunks(bytes, f64::from_le_bytes)),
        };
        Some(array)
    }
}

impl PartialEq for TypedArray {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int8(a), Self::Int8(b)) => a == b,
            (Self::Uint8(a), Self::Uint8(b)) | (Self::Uint8Clamped(a), Self::Uint8Clamped(b)) => {
                a == b
            }
            (Self::Int16(a), Self::Int16(b)) => a == b,
            (Self::Uint16(a), Self::Uint16(b)) => a == b,
            (Self::Int32(a), Self::Int32(b)) => a == b,
            (Self::Uint32(a), Self::Uint32(b)) => a == b,
            (Self::Float32(a), Self::Float32(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| same_f32(*x, *y))
            }
            (Self::Float64(a), Self::Float64(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| same_f64(*x, *y))
            }
            _ => false,
        }
    }
}

macro_rules! typed_array_from {
    ($($elem:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<Vec<$elem>> for TypedArray {
                fn from(v: Vec<$elem>) -> Self {
                    TypedArray::$variant(v)
                }
            }
        )*
    };
}

typed_array_from! {
    i8 => Int8,
    u8 => Uint8,
    i16 => Int16,
    u16 => Uint16,
    i32 => Int32,
    u32 => Uint32,
    f32 => Float32,
    f64 => Float64,
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl From<TypedArray> for Value {
    fn from(a: TypedArray) -> Self {
        Value::TypedArray(a)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<SharedValue> for Value {
    fn from(node: SharedValue) -> Self {
        Value::Shared(node)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
