//! Merkle root over transaction ids

use super::hash::sha256;

/// Merkle root of `leaves`, duplicating the last node of odd levels.
///
/// An empty leaf set hashes to `sha256("")`.
pub fn merkle_root(leaves: &[Vec<u8>]) -> Vec<u8> {
    if leaves.is_empty() {
        return sha256(b"");
    }

    let mut level: Vec<Vec<u8>> = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                let mut data = left.clone();
                data.extend_from_slice(right);
                sha256(&data)
            })
            .collect();
    }

    level.remove(0)
}
