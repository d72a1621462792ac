use ed25519_dalek::VerifyingKey;
use keylink_core::{ExternalId, KeyCustody, PayloadDigest, PublicKey, SignatureBytes};
use std::sync::Arc;

use crate::error::{FlowError, FlowResult};

/// Which key a request refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyHandle {
    /// Mint a new key bound to the external id.
    Fresh(ExternalId),
    /// Sign with a key whose private half is already held.
    Known(PublicKey),
}

/// Signs through the node's key custody and verifies Ed25519 signatures.
#[derive(Clone)]
pub struct SignatureEngine {
    custody: Arc<dyn KeyCustody>,
}

impl SignatureEngine {
    pub fn new(custody: Arc<dyn KeyCustody>) -> Self {
        Self { custody }
    }

    /// Turn a handle into a concrete key held by custody.
    ///
    /// `Fresh` mints a new key on every call; `Known` fails with `KeyNotHeld`
    /// rather than falling back to a different key.
    pub fn resolve_handle(&self, handle: &KeyHandle) -> FlowResult<PublicKey> {
        match handle {
            KeyHandle::Fresh(external_id) => Ok(self.custody.fresh_key(external_id)?),
            KeyHandle::Known(key) => {
                if !self.custody.holds_key(key) {
                    return Err(FlowError::KeyNotHeld(*key));
                }
                Ok(*key)
            }
        }
    }

    /// Sign with a key already resolved through [`Self::resolve_handle`].
    /// A claim embeds the key it is about, so the key must exist before
    /// anything is signed.
    pub fn sign(&self, digest: &PayloadDigest, key: &PublicKey) -> FlowResult<SignatureBytes> {
        Ok(self.custody.sign_with_known_key(key, digest)?)
    }

    /// Verify `signature` over `digest` under `expected_signer`.
    pub fn verify(
        digest: &PayloadDigest,
        signature: &SignatureBytes,
        expected_signer: &PublicKey,
    ) -> FlowResult<()> {
        let vk = VerifyingKey::from_bytes(expected_signer.as_bytes())
            .map_err(|_| FlowError::MalformedSignatureEncoding)?;
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        vk.verify_strict(digest.as_bytes(), &sig)
            .map_err(|_| FlowError::InvalidSignature)
    }
}
