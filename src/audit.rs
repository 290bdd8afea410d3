//! Fingerprints for fused conversations
//!
//! Fusion is deterministic, so identical inputs and upstream answers must
//! hash identically. The fingerprint is logged per request to make that
//! observable without logging the prompt itself.

use crate::models::ConversationTurn;
use sha2::{Digest, Sha256};
use std::io::Write;

/// SHA-256 (hex) of the conversation's JSON serialization.
/// Streams the JSON straight into the hasher.
pub fn fingerprint(conversation: &[ConversationTurn]) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), conversation).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
