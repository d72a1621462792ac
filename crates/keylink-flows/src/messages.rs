use keylink_core::{Challenge, ExternalId, KeyMapping, PublicKey};
use serde::{Deserialize, Serialize};

use crate::claim::SignedOwnershipClaim;
use crate::error::{FlowError, FlowResult, Violation};

/// What a requester wants attested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRequest {
    /// A freshly minted key bound to this external identifier.
    FreshKey(ExternalId),
    /// A key the responder already holds.
    KnownKey(PublicKey),
}

impl KeyRequest {
    pub fn known_key(&self) -> Option<PublicKey> {
        match self {
            KeyRequest::KnownKey(key) => Some(*key),
            KeyRequest::FreshKey(_) => None,
        }
    }
}

/// Wire form of an attestation request. Exactly one of `external_id` and
/// `known_key` must be set; [`RequestKeyForAccount::key_request`] enforces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestKeyForAccount {
    pub challenge: Challenge,
    pub external_id: Option<ExternalId>,
    pub known_key: Option<PublicKey>,
}

impl RequestKeyForAccount {
    pub fn new(challenge: Challenge, request: &KeyRequest) -> Self {
        match request {
            KeyRequest::FreshKey(id) => Self {
                challenge,
                external_id: Some(*id),
                known_key: None,
            },
            KeyRequest::KnownKey(key) => Self {
                challenge,
                external_id: None,
                known_key: Some(*key),
            },
        }
    }

    pub fn key_request(&self) -> FlowResult<KeyRequest> {
        match (self.external_id, self.known_key) {
            (Some(id), None) => Ok(KeyRequest::FreshKey(id)),
            (None, Some(key)) => Ok(KeyRequest::KnownKey(key)),
            _ => Err(Violation::MalformedRequest.into()),
        }
    }
}

/// Every message exchanged between two peers running these protocols.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowMessage {
    RequestKey(RequestKeyForAccount),
    SignedClaim(SignedOwnershipClaim),
    /// Sharer announces it is about to attest a fresh key for `external_id`.
    ShareKey { external_id: ExternalId },
    /// Initiator's candidate confidential identities.
    SyncCandidates(Vec<PublicKey>),
    /// Counterparty's subset of candidates it cannot resolve.
    SyncRequest(Vec<PublicKey>),
    /// Initiator's resolutions for the requested keys, in proof order.
    SyncResolutions(Vec<KeyMapping>),
    /// Counterparty registered the mapping for `key` after its proof round.
    SyncAck { key: PublicKey },
    /// Refusal of a single exchange; the session stays usable.
    Decline { reason: String },
    /// The sender is abandoning the whole session.
    Abort { reason: String },
}

impl FlowMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            FlowMessage::RequestKey(_) => "RequestKey",
            FlowMessage::SignedClaim(_) => "SignedClaim",
            FlowMessage::ShareKey { .. } => "ShareKey",
            FlowMessage::SyncCandidates(_) => "SyncCandidates",
            FlowMessage::SyncRequest(_) => "SyncRequest",
            FlowMessage::SyncResolutions(_) => "SyncResolutions",
            FlowMessage::SyncAck { .. } => "SyncAck",
            FlowMessage::Decline { .. } => "Decline",
            FlowMessage::Abort { .. } => "Abort",
        }
    }

    pub fn to_frame(&self) -> FlowResult<Vec<u8>> {
        postcard::to_allocvec(self).map_err(|e| FlowError::Encoding(e.to_string()))
    }

    /// A frame that does not decode means the channel is corrupt, which is
    /// fatal to the session rather than to a single exchange.
    pub fn from_frame(frame: &[u8]) -> FlowResult<Self> {
        postcard::from_bytes(frame)
            .map_err(|e| FlowError::Session(format!("undecodable frame: {}", e)))
    }
}
