//! Codec module - JSON encoding for arguments, results and stream values.
//!
//! - [`JsonCodec`] - encode/decode helpers and request-body argument parsing
//! - [`Json`] - marker wrapper for "any serde type, as JSON"
//!
//! Codecs are marker structs with static methods rather than trait objects.

mod json;

pub use json::{Json, JsonCodec};
