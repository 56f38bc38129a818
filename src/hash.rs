//! Opaque identifiers for mails and links.
//!
//! These end up in public tracking URLs, so they must be unguessable: each one is a digest of a
//! process-wide counter, the current time and 128 random bits.

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use sha2::{Digest, Sha256};

/// The length (in hex characters) of every generated hash.
pub const HASH_LEN: usize = 32;

static COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Generates a fresh hash identity.
pub fn generate() -> String {
    let serial = COUNTER.fetch_add(1, Ordering::Relaxed) as u64;
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let salt: [u8; 16] = ::rand::random();

    let mut hasher = Sha256::new();
    hasher.update(serial.to_be_bytes());
    hasher.update(nanos.to_be_bytes());
    hasher.update(salt);
    let digest = hasher.finalize();
    ::hex::encode(&digest[..HASH_LEN / 2])
}

/// Whether the string could be a hash produced by `generate`. Used to reject junk from tracking
/// URLs before touching the database.
pub fn is_well_formed(s: &str) -> bool {
    s.len() == HASH_LEN && s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}
