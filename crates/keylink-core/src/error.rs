use thiserror::Error;

use crate::types::PublicKey;

/// Errors raised by collaborators: key custody, identity store, state loading.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("entropy source unavailable: {0}")]
    EntropyUnavailable(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("key {0} is not held locally")]
    KeyNotHeld(PublicKey),

    #[error("key {key} is already mapped to {existing}, refusing to map it to {requested}")]
    KeyAlreadyMapped {
        key: PublicKey,
        existing: String,
        requested: String,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_already_mapped_display() {
        let e = CoreError::KeyAlreadyMapped {
            key: PublicKey([0x11; 32]),
            existing: "O=Alice".into(),
            requested: "O=Bob".into(),
        };
        let s = e.to_string();
        assert!(s.contains("O=Alice"));
        assert!(s.contains("O=Bob"));
    }

    #[test]
    fn test_storage_display() {
        let e = CoreError::Storage("lock poisoned".into());
        assert_eq!(e.to_string(), "storage error: lock poisoned");
    }
}
