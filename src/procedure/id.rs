//! Procedure id derivation.
//!
//! Every procedure has two ids built from the source path (relative to the
//! registry root) and the export name:
//!
//! - plain: `components/chat_server/login`
//! - hashed: `<16 url-safe chars>/login`
//!
//! Only the last extension of the path is dropped, so `chat_server.rs` and
//! `chat_server.js` name the same procedure group.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Length of the hashed path component.
pub const SHORT_HASH_LEN: usize = 16;

/// Drop the final extension of the last path component.
///
/// A leading dot (dotfile) is not treated as an extension.
pub fn strip_file_extension(path: &str) -> &str {
    let file_start = path.rfind('/').map_or(0, |i| i + 1);
    match path[file_start..].rfind('.') {
        Some(0) | None => path,
        Some(dot) => &path[..file_start + dot],
    }
}

/// First 16 characters of the base64url (unpadded) SHA-256 digest of `input`.
pub fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut encoded = URL_SAFE_NO_PAD.encode(digest);
    encoded.truncate(SHORT_HASH_LEN);
    encoded
}

/// Plain id: path without extension, `/`, export name.
pub fn plain_id(path: &str, name: &str) -> String {
    format!("{}/{}", strip_file_extension(path), name)
}

/// Hashed id: short hash of the path without extension, `/`, export name.
pub fn hashed_id(path: &str, name: &str) -> String {
    format!("{}/{}", short_hash(strip_file_extension(path)), name)
}
