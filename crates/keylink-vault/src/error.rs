use keylink_core::{CoreError, PublicKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("key {0} is not held by this vault")]
    KeyNotHeld(PublicKey),

    #[error("key {0} is already held by this vault")]
    Collision(PublicKey),
}

impl From<VaultError> for CoreError {
    fn from(e: VaultError) -> Self {
        match e {
            VaultError::KeyNotHeld(key) => CoreError::KeyNotHeld(key),
            VaultError::Storage(msg) => CoreError::Storage(msg),
            VaultError::KeyDerivation(msg) => CoreError::Crypto(msg),
            collision @ VaultError::Collision(_) => CoreError::Internal(collision.to_string()),
        }
    }
}

pub type VaultResult<T> = Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_not_held_converts() {
        let key = PublicKey([0x21; 32]);
        let core: CoreError = VaultError::KeyNotHeld(key).into();
        assert!(matches!(core, CoreError::KeyNotHeld(k) if k == key));
    }

    #[test]
    fn test_collision_becomes_internal() {
        let core: CoreError = VaultError::Collision(PublicKey([0x22; 32])).into();
        assert!(matches!(core, CoreError::Internal(_)));
    }
}
