use crate::error::CoreResult;
use crate::ledger::{ContractState, StateRef};
use crate::types::{
    ExternalId, KeyMapping, Party, PayloadDigest, PublicKey, Registration, SignatureBytes,
};

// ---------------------------------------------------------------------------
// KeyCustody: holds private keys and signs on their behalf
// ---------------------------------------------------------------------------

pub trait KeyCustody: Send + Sync {
    /// Mint a new key pair bound to `external_id`. Every call returns a new key.
    fn fresh_key(&self, external_id: &ExternalId) -> CoreResult<PublicKey>;

    /// Sign with an existing key. Fails with `KeyNotHeld` if the private half
    /// is not held locally.
    fn sign_with_known_key(
        &self,
        key: &PublicKey,
        digest: &PayloadDigest,
    ) -> CoreResult<SignatureBytes>;

    fn holds_key(&self, key: &PublicKey) -> bool;
}

// ---------------------------------------------------------------------------
// IdentityService: network map plus confidential key mappings
//
// Registration must be atomic per key: of two concurrent registrations for
// the same key, at most one creates the mapping.
// ---------------------------------------------------------------------------

pub trait IdentityService: Send + Sync {
    /// Look up the well-known party whose legal identity key is `key`.
    fn party_from_legal_key(&self, key: &PublicKey) -> CoreResult<Option<Party>>;

    /// Resolve any key (legal or confidential) to its well-known party.
    fn resolve_party(&self, key: &PublicKey) -> CoreResult<Option<Party>>;

    /// Record `key -> party`. Returns `Unchanged` if the same mapping exists
    /// and `CoreError::KeyAlreadyMapped` if the key belongs to another party.
    fn register_mapping(&self, key: &PublicKey, party: &Party) -> CoreResult<Registration>;

    /// All confidential mappings currently known.
    fn mappings(&self) -> CoreResult<Vec<KeyMapping>>;
}

// ---------------------------------------------------------------------------
// StateLoader: resolves input state references
// ---------------------------------------------------------------------------

pub trait StateLoader: Send + Sync {
    /// `Ok(None)` when the backing transaction is unknown locally.
    fn load_state(&self, state_ref: &StateRef) -> CoreResult<Option<ContractState>>;
}
