//! Hashing, key and address helpers
//!
//! Block ids, transaction ids and merkle roots are SHA-256 based. Signatures
//! are ECDSA over secp256k1 and addresses use Base58Check like Bitcoin.

pub mod hash;
pub mod keys;
pub mod merkle;

pub use hash::{double_sha256, meets_difficulty, sha256};
pub use keys::{
    is_valid_address, public_key_from_hex, public_key_to_address, sign_message, verify_signature,
    KeyError, KeyPair,
};
pub use merkle::merkle_root;
