//! # prefstore codec
//!
//! Self-describing binary encoding for the prefstore value domain.
//!
//! Every stored value is a single item in a CBOR-family encoding (RFC 8949
//! major types), so a decoder needs no schema. The domain goes beyond JSON:
//!
//! - integers and floats are distinct; floats keep NaN, the infinities and
//!   the sign of zero
//! - binary buffers are byte strings
//! - typed numeric arrays are RFC 8746 tagged byte strings, so the element
//!   type survives a round trip
//! - absent values encode as null
//!
//! Encoding a value whose shared nodes form a cycle fails with
//! [`CodecError::CyclicValue`].
//!
//! ## Usage
//!
//! ```
//! use prefstore_codec::{from_bytes, to_bytes, TypedArray, Value};
//!
//! let value = Value::map([
//!     ("ratio", Value::Float(f64::NAN)),
//!     ("samples", Value::TypedArray(TypedArray::Int16(vec![-1, 2]))),
//! ]);
//! let bytes = to_bytes(&value).unwrap();
//! assert_eq!(from_bytes(&bytes).unwrap(), value);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod value;

pub use decoder::{from_bytes, Decoder};
pub use encoder::{encode_optional, to_bytes, Encoder};
pub use error::{CodecError, CodecResult};
pub use value::{ElementType, SharedValue, TypedArray, Value};

/// Maximum nesting depth accepted by the encoder and decoder.
pub const MAX_DEPTH: usize = 256;

/// Trait for types that can be encoded to bytes.
pub trait Encode {
    /// Encode this value.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Trait for types that can be decoded from bytes.
pub trait Decode: Sized {
    /// Decode a value from bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl Encode for Value {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_bytes(self)
    }
}

impl Decode for Value {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_bytes(bytes)
    }
}
