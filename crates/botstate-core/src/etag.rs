//! eTag generation
//!
//! An eTag is a BLAKE3 digest prefix of the payload followed by a random
//! UUID v4, so two writes of identical content still receive different tags
//! and tags stay unique across process restarts.

use uuid::Uuid;

/// Number of digest bytes kept in an eTag
const DIGEST_PREFIX_LEN: usize = 8;

/// Generate a fresh eTag for a serialized payload
pub fn generate(payload: &[u8]) -> String {
    let digest = blake3::hash(payload);
    format!(
        "{}-{}",
        hex::encode(&digest.as_bytes()[..DIGEST_PREFIX_LEN]),
        Uuid::new_v4().simple()
    )
}

/// Generate a fresh eTag for a document's payload fields
pub fn generate_for(fields: &serde_json::Map<String, serde_json::Value>) -> String {
    // Map<String, Value> serialization cannot fail
    let payload = serde_json::to_vec(fields).unwrap_or_default();
    generate(&payload)
}
