use ed25519_dalek::{Signer as DalekSigner, SigningKey, VerifyingKey};
use hkdf::Hkdf;
use keylink_core::{Party, PublicKey, SignatureBytes};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{VaultError, VaultResult};

/// The node's long-term legal identity key.
///
/// Its public half is the `owning_key` of the node's well-known [`Party`] and
/// the key peers see as the session counterparty.
pub struct NodeSigner {
    signing_key: Zeroizing<[u8; 32]>,
    verifying_key: PublicKey,
}

impl NodeSigner {
    /// Derive the legal identity key from a 32-byte node seed.
    pub fn from_seed(seed: &[u8; 32]) -> VaultResult<Self> {
        let hk = Hkdf::<Sha256>::new(Some(b"keylink-legal-identity"), seed);
        let mut okm = Zeroizing::new([0u8; 32]);
        hk.expand(b"keylink-node-signing-key", &mut *okm)
            .map_err(|e| VaultError::KeyDerivation(format!("HKDF expand failed: {}", e)))?;
        Ok(Self::from_bytes(*okm))
    }

    /// Create a signer from raw key bytes (for testing).
    pub fn from_bytes(key_bytes: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&key_bytes);
        let verifying_key = PublicKey(signing_key.verifying_key().to_bytes());

        Self {
            signing_key: Zeroizing::new(key_bytes),
            verifying_key,
        }
    }

    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        Self::from_bytes(signing_key.to_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        self.verifying_key
    }

    /// The well-known party this key represents.
    pub fn party(&self, name: impl Into<String>) -> Party {
        Party::new(name, self.verifying_key)
    }

    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        let signing_key = SigningKey::from_bytes(&self.signing_key);
        SignatureBytes(signing_key.sign(message).to_bytes())
    }

    /// Verify a signature against this signer's public key.
    pub fn verify(&self, message: &[u8], signature: &SignatureBytes) -> bool {
        match VerifyingKey::from_bytes(self.verifying_key.as_bytes()) {
            Ok(vk) => {
                let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
                vk.verify_strict(message, &sig).is_ok()
            }
            Err(_) => false,
        }
    }

    pub(crate) fn secret_bytes(&self) -> &Zeroizing<[u8; 32]> {
        &self.signing_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_seed_deterministic() {
        let s1 = NodeSigner::from_seed(&[0x42; 32]).unwrap();
        let s2 = NodeSigner::from_seed(&[0x42; 32]).unwrap();
        assert_eq!(s1.public_key(), s2.public_key());
    }

    #[test]
    fn test_from_seed_differs_from_raw_key() {
        let derived = NodeSigner::from_seed(&[0x42; 32]).unwrap();
        let raw = NodeSigner::from_bytes([0x42; 32]);
        assert_ne!(derived.public_key(), raw.public_key());
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = NodeSigner::from_bytes([0x42; 32]);
        let sig = signer.sign(b"hello");
        assert!(signer.verify(b"hello", &sig));
        assert!(!signer.verify(b"hullo", &sig));
    }

    #[test]
    fn test_party_uses_legal_key() {
        let signer = NodeSigner::generate();
        let party = signer.party("O=Alice,L=London,C=GB");
        assert_eq!(party.owning_key, signer.public_key());
        assert_eq!(party.to_string(), "O=Alice,L=London,C=GB");
    }
}
