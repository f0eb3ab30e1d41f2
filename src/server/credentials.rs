//! Password hashing
//!
//! Passwords are stored as the hex SHA-256 of the password. The hash is
//! computed on the primary before the write command is built, so standbys
//! replay the same stored value.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Hash a password for storage.
pub fn hash_password(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Check a password against a stored hash.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    constant_time_str_eq(&hash_password(password), stored_hash)
}

/// Constant-time comparison of two strings
pub fn constant_time_str_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
