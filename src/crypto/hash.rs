//! SHA-256 helpers and the proof-of-work target check

use sha2::{Digest, Sha256};

/// SHA-256 of `data`
pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// SHA-256 applied twice, used for block header hashes
pub fn double_sha256(data: &[u8]) -> Vec<u8> {
    sha256(&sha256(data))
}

/// Whether `hash` starts with at least `difficulty` zero bits
pub fn meets_difficulty(hash: &[u8], difficulty: u32) -> bool {
    let zero_bytes = difficulty as usize / 8;
    let zero_bits = difficulty as usize % 8;

    if hash.len() < zero_bytes {
        return false;
    }
    if hash.iter().take(zero_bytes).any(|b| *b != 0) {
        return false;
    }

    if zero_bits > 0 {
        let mask = 0xFFu8 << (8 - zero_bits);
        match hash.get(zero_bytes) {
            Some(byte) => byte & mask == 0,
            None => false,
        }
    } else {
        true
    }
}
