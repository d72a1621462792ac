//! Key-ownership attestation and mapping synchronization between peers.
//!
//! Two protocols run over a [`Session`]:
//!
//! - [`attestation`]: a requester challenges a responder to prove control of
//!   a key (fresh or already known) with a self-signed ownership claim, then
//!   maps that key to the responder's well-known party.
//! - [`sync`]: an initiator offers the confidential keys referenced by a
//!   transaction; the counterparty asks back for the ones it cannot resolve
//!   and runs one attestation round per key the initiator can resolve.
//!
//! Collaborators (identity store, key custody, state loading) are passed in
//! through a [`FlowContext`]; nothing here holds global state.

pub mod attestation;
pub mod claim;
pub mod context;
pub mod error;
pub mod messages;
pub mod scheme;
pub mod session;
pub mod signature;
pub mod sync;

pub use attestation::{
    receive_shared_key, register_verified, request_key, respond_to_key_request, share_key,
    verify_claim, AttestedKey, KeyRequester, KeyResponder, RequesterState, ResponderState,
    VerifiedOwnership,
};
pub use claim::{CanonicalBytes, OwnershipClaim, SignedOwnershipClaim};
pub use context::{FlowContext, IdentityResolver};
pub use error::{FlowError, FlowResult, Violation};
pub use messages::{FlowMessage, KeyRequest, RequestKeyForAccount};
pub use scheme::{ChallengeScheme, DoubleChallenge, NonceBinding, SchemeKind, SingleChallenge};
pub use session::{memory_session_pair, MemorySession, Session};
pub use signature::{KeyHandle, SignatureEngine};
pub use sync::{verify_and_add, SyncFailure, SyncInitiator, SyncReport, SyncResponder};
