use sha2::{Digest, Sha256};

use crate::types::{PayloadDigest, PublicKey};

/// SHA-256 over an arbitrary payload.
pub fn sha256_digest(data: &[u8]) -> PayloadDigest {
    PayloadDigest(Sha256::digest(data).into())
}

/// Short, stable fingerprint of a public key for logs and display.
///
/// Formula: Base58(SHA-256(pubkey)[0:20])
pub fn key_fingerprint(key: &PublicKey) -> String {
    let hash = Sha256::digest(key.as_bytes());
    bs58::encode(&hash[..20]).into_string()
}
