use sha2::{Digest, Sha224, Sha256};

/// Hex SHA-256 of a string. Used for magnets and CGraph hashes.
pub fn sha256_hex(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Hex SHA-224 of a string. Used to fingerprint serialized subtrees.
pub fn sha224_hex(text: &str) -> String {
    format!("{:x}", Sha224::digest(text.as_bytes()))
}
