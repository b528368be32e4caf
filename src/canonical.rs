//! Canonical hashing of build option maps.
//!
//! Configuration keys are identified by a checksum of their options. The
//! checksum must not depend on insertion order or on how the options were
//! serialized, so options are hashed from a `BTreeMap` (sorted keys) with
//! every key and value length-prefixed.
//!
//! ## Determinism Guarantees
//!
//! - Stable key order: `BTreeMap` iterates in key order
//! - No ambiguity: `{"a": "bc"}` and `{"ab": "c"}` hash differently
//! - Fixed seed: xxh64 with seed 0

use std::collections::BTreeMap;

use xxhash_rust::xxh64::Xxh64;

/// Serialize an option map to canonical bytes.
pub fn to_canonical_bytes(options: &BTreeMap<String, String>) -> Vec<u8> {
    let mut bytes = Vec::new();
    for (key, value) in options {
        bytes.extend_from_slice(&(key.len() as u64).to_le_bytes());
        bytes.extend_from_slice(key.as_bytes());
        bytes.extend_from_slice(&(value.len() as u64).to_le_bytes());
        bytes.extend_from_slice(value.as_bytes());
    }
    bytes
}

/// Compute canonical hash of an option map.
pub fn canonical_hash(options: &BTreeMap<String, String>) -> u64 {
    let mut hasher = Xxh64::new(0);
    hasher.update(&to_canonical_bytes(options));
    hasher.digest()
}

/// Compute canonical hash and return as hex string.
pub fn canonical_hash_hex(options: &BTreeMap<String, String>) -> String {
    format!("{:016x}", canonical_hash(options))
}
