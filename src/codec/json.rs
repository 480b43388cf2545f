//! JSON codec for arguments, results and stream values.
//!
//! # Example
//!
//! ```
//! use seamless_rpc::codec::JsonCodec;
//!
//! let args = JsonCodec::decode_args(br#"["hello", 42]"#).unwrap();
//! assert_eq!(args.len(), 2);
//!
//! assert!(JsonCodec::decode_args(br#"{"not": "an array"}"#).is_err());
//! ```

use std::ops::{Deref, DerefMut};

use serde_json::Value;

use crate::error::Result;
use crate::procedure::RpcError;

/// JSON codec for structured data.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to JSON bytes.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Encode a value to a JSON string.
    #[inline]
    pub fn encode_string<T: serde::Serialize>(value: &T) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    /// Decode JSON bytes to a value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Convert a value into a JSON tree.
    #[inline]
    pub fn to_value<T: serde::Serialize>(value: &T) -> Result<Value> {
        Ok(serde_json::to_value(value)?)
    }

    /// Convert a JSON tree into a value.
    #[inline]
    pub fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
        Ok(serde_json::from_value(value)?)
    }

    /// Decode a request body into the positional argument list.
    ///
    /// Anything that is not valid JSON, or valid JSON that is not an array,
    /// is an invalid request body.
    pub fn decode_args(body: &[u8]) -> std::result::Result<Vec<Value>, RpcError> {
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Array(args)) => Ok(args),
            _ => Err(RpcError::InvalidRequestBody),
        }
    }
}

/// Wrapper marking a value as "serialize/deserialize as JSON".
///
/// Procedures return `Json<T>` for any `T: Serialize`; clients ask for
/// `Json<T>` to decode a reply into any `T: DeserializeOwned`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    /// Unwrap the inner value.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for Json<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for Json<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

impl<T> From<T> for Json<T> {
    fn from(value: T) -> Self {
        Json(value)
    }
}
