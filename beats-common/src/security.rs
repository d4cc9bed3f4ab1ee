//! Credential hashing and session token helpers
//!
//! # Password encoding
//!
//! Stored passwords use the self-describing form
//! `sha256$<iterations>$<salt hex>$<digest hex>`:
//!
//! 1. Generate 16 random salt bytes
//! 2. digest = SHA-256(salt || password)
//! 3. Repeat digest = SHA-256(salt || digest) `iterations - 1` more times
//!
//! # Session tokens
//!
//! Tokens handed to clients are 32 random bytes, hex encoded. Only the
//! SHA-256 of a token is ever persisted.
//!
//! Pure functions only; storage lives in the services.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Scheme tag at the start of every encoded password
const SCHEME: &str = "sha256";

/// Default iteration count for new password hashes
pub const DEFAULT_ITERATIONS: u32 = 10_000;

const SALT_LEN: usize = 16;
const TOKEN_LEN: usize = 32;

/// Hash a password with a fresh random salt
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    encode_password(password, &salt, DEFAULT_ITERATIONS)
}

/// Check a password against an encoded hash produced by [`hash_password`]
///
/// Malformed encodings never verify.
pub fn verify_password(password: &str, encoded: &str) -> bool {
    let mut parts = encoded.split('$');
    let (Some(scheme), Some(iterations), Some(salt), Some(expected), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };

    if scheme != SCHEME {
        return false;
    }
    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };
    if iterations == 0 {
        return false;
    }
    let (Ok(salt), Ok(expected)) = (hex::decode(salt), hex::decode(expected)) else {
        return false;
    };

    let actual = digest_password(password, &salt, iterations);
    constant_time_eq(&actual, &expected)
}

/// Generate a new opaque session token (64 hex characters)
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; TOKEN_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Digest of a session token, as stored server-side
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn encode_password(password: &str, salt: &[u8], iterations: u32) -> String {
    format!(
        "{}${}${}${}",
        SCHEME,
        iterations,
        hex::encode(salt),
        hex::encode(digest_password(password, salt, iterations))
    )
}

fn digest_password(password: &str, salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    let mut digest = hasher.finalize();

    for _ in 1..iterations {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(digest);
        digest = hasher.finalize();
    }

    digest.to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
