use ed25519_dalek::{Signer as DalekSigner, SigningKey};
use keylink_core::{
    CoreResult, ExternalId, KeyCustody, PayloadDigest, PublicKey, SignatureBytes,
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use zeroize::Zeroizing;

use crate::error::{VaultError, VaultResult};
use crate::signer::NodeSigner;

struct HeldKey {
    secret: Zeroizing<[u8; 32]>,
    external_id: Option<ExternalId>,
}

/// In-memory key custody implementing [`KeyCustody`].
///
/// Every call to [`MemoryKeyCustody::mint_key`] mints a new key pair, even
/// for an external id that already has keys. Callers wanting a stable key per
/// external id must keep the key they were given.
pub struct MemoryKeyCustody {
    keys: Mutex<HashMap<PublicKey, HeldKey>>,
}

fn lock_keys(
    mutex: &Mutex<HashMap<PublicKey, HeldKey>>,
) -> VaultResult<MutexGuard<'_, HashMap<PublicKey, HeldKey>>> {
    mutex
        .lock()
        .map_err(|e| VaultError::Storage(format!("lock poisoned: {}", e)))
}

impl MemoryKeyCustody {
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Custody that also holds the node's legal identity key.
    pub fn with_signer(signer: &NodeSigner) -> VaultResult<Self> {
        let custody = Self::new();
        custody.import_key(**signer.secret_bytes(), None)?;
        Ok(custody)
    }

    /// Take custody of an existing private key.
    pub fn import_key(
        &self,
        secret: [u8; 32],
        external_id: Option<ExternalId>,
    ) -> VaultResult<PublicKey> {
        let secret = Zeroizing::new(secret);
        let public = PublicKey(SigningKey::from_bytes(&secret).verifying_key().to_bytes());
        let mut keys = lock_keys(&self.keys)?;
        if keys.contains_key(&public) {
            return Err(VaultError::Collision(public));
        }
        keys.insert(
            public,
            HeldKey {
                secret,
                external_id,
            },
        );
        Ok(public)
    }

    /// Mint a new key pair bound to `external_id`.
    pub fn mint_key(&self, external_id: &ExternalId) -> VaultResult<PublicKey> {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let public = self.import_key(signing_key.to_bytes(), Some(*external_id))?;
        tracing::debug!(
            key = %public.fingerprint(),
            external_id = %external_id,
            "minted fresh key"
        );
        Ok(public)
    }

    pub fn keys_for_external_id(&self, external_id: &ExternalId) -> Vec<PublicKey> {
        lock_keys(&self.keys)
            .map(|keys| {
                keys.iter()
                    .filter(|(_, held)| held.external_id.as_ref() == Some(external_id))
                    .map(|(k, _)| *k)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn key_count(&self) -> usize {
        lock_keys(&self.keys).map(|k| k.len()).unwrap_or(0)
    }

    fn sign(&self, key: &PublicKey, digest: &PayloadDigest) -> VaultResult<SignatureBytes> {
        let keys = lock_keys(&self.keys)?;
        let held = keys.get(key).ok_or(VaultError::KeyNotHeld(*key))?;
        let signing_key = SigningKey::from_bytes(&held.secret);
        Ok(SignatureBytes(signing_key.sign(digest.as_bytes()).to_bytes()))
    }
}

impl Default for MemoryKeyCustody {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyCustody for MemoryKeyCustody {
    fn fresh_key(&self, external_id: &ExternalId) -> CoreResult<PublicKey> {
        Ok(self.mint_key(external_id)?)
    }

    fn sign_with_known_key(
        &self,
        key: &PublicKey,
        digest: &PayloadDigest,
    ) -> CoreResult<SignatureBytes> {
        Ok(self.sign(key, digest)?)
    }

    fn holds_key(&self, key: &PublicKey) -> bool {
        lock_keys(&self.keys)
            .map(|k| k.contains_key(key))
            .unwrap_or(false)
    }
}
