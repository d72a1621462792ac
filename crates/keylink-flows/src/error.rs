use keylink_core::{CoreError, PublicKey};
use thiserror::Error;

/// Error type for the attestation and sync protocols.
///
/// Verification failures name the failing check and the public key involved.
/// No private material appears in any variant.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FlowError {
    #[error("entropy source unavailable")]
    EntropyUnavailable,

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("signature does not verify under the claimed key")]
    InvalidSignature,

    #[error("malformed signature or public key encoding")]
    MalformedSignatureEncoding,

    #[error("challenge mismatch")]
    ChallengeMismatch,

    #[error("claim signed by {signer} asserts ownership of {claimed}")]
    SignerMismatch { signer: PublicKey, claimed: PublicKey },

    #[error("requested attestation of {requested} but received a claim over {attested}")]
    AttestedKeyMismatch {
        requested: PublicKey,
        attested: PublicKey,
    },

    #[error("counterparty key {0} does not resolve to a well-known party")]
    UnresolvableCounterparty(PublicKey),

    #[error("key {key} is already mapped to {existing}, cannot map it to {requested}")]
    KeyAlreadyMapped {
        key: PublicKey,
        existing: String,
        requested: String,
    },

    #[error("key {0} is not held locally")]
    KeyNotHeld(PublicKey),

    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] Violation),

    #[error("key {key} was offered for {claimed} but attested by {attested}")]
    ClaimedPartyMismatch {
        key: PublicKey,
        claimed: String,
        attested: String,
    },

    #[error("counterparty declined: {0}")]
    Declined(String),

    #[error("counterparty aborted: {0}")]
    Aborted(String),

    #[error("{} of {} identities failed to synchronize", .failed.len(), .total)]
    PartialBatchFailure { failed: Vec<PublicKey>, total: usize },

    #[error("session error: {0}")]
    Session(String),

    #[error("collaborator error: {0}")]
    Collaborator(CoreError),
}

/// Malformed or contradictory protocol input from a peer or caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("request must set exactly one of external id or known key")]
    MalformedRequest,

    #[error("identity {0} was not part of the offered set")]
    UnsolicitedIdentity(PublicKey),

    #[error("expected {expected} message, received {received}")]
    UnexpectedMessage {
        expected: &'static str,
        received: &'static str,
    },

    #[error("a transaction or a non-empty identity list is required")]
    EmptySyncInput,
}

impl FlowError {
    /// Whether this error leaves the session unusable for further rounds.
    ///
    /// Per-identity failures inside a sync batch are collected; these abort
    /// the whole batch.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            FlowError::Session(_)
                | FlowError::Aborted(_)
                | FlowError::ProtocolViolation(Violation::UnexpectedMessage { .. })
        )
    }

    pub(crate) fn unexpected(expected: &'static str, received: &'static str) -> Self {
        FlowError::ProtocolViolation(Violation::UnexpectedMessage { expected, received })
    }
}

impl From<CoreError> for FlowError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::EntropyUnavailable(_) => FlowError::EntropyUnavailable,
            CoreError::KeyNotHeld(key) => FlowError::KeyNotHeld(key),
            CoreError::KeyAlreadyMapped {
                key,
                existing,
                requested,
            } => FlowError::KeyAlreadyMapped {
                key,
                existing,
                requested,
            },
            CoreError::Serialization(msg) => FlowError::Encoding(msg),
            other => FlowError::Collaborator(other),
        }
    }
}

pub type FlowResult<T> = Result<T, FlowError>;
