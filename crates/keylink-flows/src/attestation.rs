//! Key-ownership attestation.
//!
//! The requester sends a fresh challenge and asks the responder to attest
//! either a freshly minted key or one it already holds. The responder
//! answers with an [`OwnershipClaim`] over that key, signed by the key
//! itself. The requester accepts the claim only if it is self-signed, verifies,
//! and carries a nonce derived from this run's challenge; it then maps the
//! key to the responder's well-known party.
//!
//! Both roles consume `self` on `run`, so a protocol instance cannot be
//! driven twice.

use keylink_core::{Challenge, ExternalId, Party, PublicKey, Registration};
use tracing::{debug, info, warn};

use crate::claim::{self, OwnershipClaim, SignedOwnershipClaim};
use crate::context::FlowContext;
use crate::error::{FlowError, FlowResult, Violation};
use crate::messages::{FlowMessage, KeyRequest, RequestKeyForAccount};
use crate::scheme::ChallengeScheme;
use crate::session::Session;
use crate::signature::{KeyHandle, SignatureEngine};

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequesterState {
    Init,
    AwaitingResponse,
    Verifying,
    Done,
    Failed,
}

impl RequesterState {
    fn can_advance_to(self, next: RequesterState) -> bool {
        use RequesterState::*;
        matches!(
            (self, next),
            (Init, AwaitingResponse)
                | (AwaitingResponse, Verifying)
                | (Verifying, Done)
                | (Init, Failed)
                | (AwaitingResponse, Failed)
                | (Verifying, Failed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderState {
    Waiting,
    Responding,
    Done,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A claim that passed every requester check, not yet registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedOwnership {
    pub key: PublicKey,
    pub party: Party,
    pub claim: SignedOwnershipClaim,
}

/// An attested key and the outcome of registering it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedKey {
    pub key: PublicKey,
    pub party: Party,
    pub registration: Registration,
}

// ---------------------------------------------------------------------------
// Claim verification
// ---------------------------------------------------------------------------

/// Check a received claim against the challenge this run sent.
///
/// Order: the claim decodes; it is self-signed; for a known-key request it is
/// about the requested key; the signature verifies; the nonce derives from
/// `challenge` under `scheme`. Returns the attested key.
pub fn verify_claim(
    scheme: &dyn ChallengeScheme,
    challenge: &Challenge,
    request: &KeyRequest,
    signed: &SignedOwnershipClaim,
) -> FlowResult<PublicKey> {
    let claim = signed.claim()?;

    if signed.signer_key != claim.key {
        return Err(FlowError::SignerMismatch {
            signer: signed.signer_key,
            claimed: claim.key,
        });
    }
    if let Some(requested) = request.known_key() {
        if claim.key != requested {
            return Err(FlowError::AttestedKeyMismatch {
                requested,
                attested: claim.key,
            });
        }
    }

    SignatureEngine::verify(&signed.digest(), &signed.signature, &signed.signer_key)?;
    scheme.check(challenge, &claim.nonce, signed.additional_challenge.as_ref())?;
    Ok(claim.key)
}

// ---------------------------------------------------------------------------
// Requester
// ---------------------------------------------------------------------------

pub struct KeyRequester {
    ctx: FlowContext,
    request: KeyRequest,
    state: RequesterState,
}

impl KeyRequester {
    pub fn new(ctx: &FlowContext, request: KeyRequest) -> Self {
        Self {
            ctx: ctx.clone(),
            request,
            state: RequesterState::Init,
        }
    }

    pub fn state(&self) -> RequesterState {
        self.state
    }

    fn advance(&mut self, next: RequesterState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "invalid requester transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(from = ?self.state, to = ?next, "requester transition");
        self.state = next;
    }

    /// Run the exchange, then register the attested key against the
    /// counterparty's well-known party.
    pub async fn run<S: Session + ?Sized>(self, session: &mut S) -> FlowResult<AttestedKey> {
        let ctx = self.ctx.clone();
        let verified = self.verify(session).await?;
        let registration = register_verified(&ctx, &verified)?;
        info!(
            key = %verified.key.fingerprint(),
            party = %verified.party,
            ?registration,
            "key attested"
        );
        Ok(AttestedKey {
            key: verified.key,
            party: verified.party,
            registration,
        })
    }

    /// Run the exchange and every check, without registering.
    pub async fn verify<S: Session + ?Sized>(
        mut self,
        session: &mut S,
    ) -> FlowResult<VerifiedOwnership> {
        match self.exchange(session).await {
            Ok(verified) => {
                self.advance(RequesterState::Done);
                Ok(verified)
            }
            Err(e) => {
                self.advance(RequesterState::Failed);
                warn!(
                    counterparty = %session.counterparty_key().fingerprint(),
                    error = %e,
                    "key attestation failed"
                );
                Err(e)
            }
        }
    }

    async fn exchange<S: Session + ?Sized>(
        &mut self,
        session: &mut S,
    ) -> FlowResult<VerifiedOwnership> {
        let challenge = Challenge::generate()?;
        session
            .send(FlowMessage::RequestKey(RequestKeyForAccount::new(
                challenge,
                &self.request,
            )))
            .await?;
        self.advance(RequesterState::AwaitingResponse);

        let signed = match session.receive().await? {
            FlowMessage::SignedClaim(signed) => signed,
            FlowMessage::Decline { reason } => return Err(FlowError::Declined(reason)),
            FlowMessage::Abort { reason } => return Err(FlowError::Aborted(reason)),
            other => return Err(FlowError::unexpected("SignedClaim", other.kind())),
        };
        self.advance(RequesterState::Verifying);

        let key = verify_claim(self.ctx.scheme.as_ref(), &challenge, &self.request, &signed)?;
        let party = self
            .ctx
            .resolver
            .resolve_counterparty(&session.counterparty_key())?;

        Ok(VerifiedOwnership {
            key,
            party,
            claim: signed,
        })
    }
}

/// Record a verified key against the party that attested it.
pub fn register_verified(
    ctx: &FlowContext,
    verified: &VerifiedOwnership,
) -> FlowResult<Registration> {
    ctx.resolver.register(&verified.key, &verified.party)
}

// ---------------------------------------------------------------------------
// Responder
// ---------------------------------------------------------------------------

pub struct KeyResponder {
    ctx: FlowContext,
    expected: Option<KeyRequest>,
    state: ResponderState,
}

impl KeyResponder {
    pub fn new(ctx: &FlowContext) -> Self {
        Self {
            ctx: ctx.clone(),
            expected: None,
            state: ResponderState::Waiting,
        }
    }

    /// Only answer a request for exactly `request`; anything else is
    /// declined as unsolicited.
    pub fn expecting(mut self, request: KeyRequest) -> Self {
        self.expected = Some(request);
        self
    }

    pub fn state(&self) -> ResponderState {
        self.state
    }

    /// Wait for a request and answer it. Returns the attested key.
    ///
    /// A request that cannot be honoured is answered with `Decline` so the
    /// requester does not wait forever, and the reason is returned here too.
    pub async fn run<S: Session + ?Sized>(mut self, session: &mut S) -> FlowResult<PublicKey> {
        let request = match session.receive().await? {
            FlowMessage::RequestKey(request) => request,
            // The requester may refuse a round it never asked for.
            FlowMessage::Decline { reason } => return Err(FlowError::Declined(reason)),
            FlowMessage::Abort { reason } => return Err(FlowError::Aborted(reason)),
            other => return Err(FlowError::unexpected("RequestKey", other.kind())),
        };
        self.state = ResponderState::Responding;

        match self.respond(&request) {
            Ok(signed) => {
                let key = signed.signer_key;
                session.send(FlowMessage::SignedClaim(signed)).await?;
                self.state = ResponderState::Done;
                debug!(
                    key = %key.fingerprint(),
                    to = %session.counterparty_key().fingerprint(),
                    "ownership claim sent"
                );
                Ok(key)
            }
            Err(e) => {
                session
                    .send(FlowMessage::Decline {
                        reason: e.to_string(),
                    })
                    .await?;
                self.state = ResponderState::Done;
                warn!(
                    to = %session.counterparty_key().fingerprint(),
                    error = %e,
                    "declined key request"
                );
                Err(e)
            }
        }
    }

    fn respond(&self, request: &RequestKeyForAccount) -> FlowResult<SignedOwnershipClaim> {
        let key_request = request.key_request()?;
        if let Some(expected) = self.expected {
            if expected != key_request {
                return Err(match key_request.known_key() {
                    Some(key) => Violation::UnsolicitedIdentity(key).into(),
                    None => Violation::MalformedRequest.into(),
                });
            }
        }

        let handle = match key_request {
            KeyRequest::FreshKey(id) => KeyHandle::Fresh(id),
            KeyRequest::KnownKey(key) => KeyHandle::Known(key),
        };
        let key = self.ctx.signatures.resolve_handle(&handle)?;

        let binding = self.ctx.scheme.bind(&request.challenge)?;
        let raw = claim::encode(&OwnershipClaim {
            nonce: binding.nonce,
            key,
        })?;
        let signature = self.ctx.signatures.sign(&claim::digest(&raw), &key)?;

        Ok(SignedOwnershipClaim {
            raw,
            signature,
            signer_key: key,
            additional_challenge: binding.additional,
        })
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Ask the counterparty to attest a key and register it on success.
pub async fn request_key<S: Session + ?Sized>(
    ctx: &FlowContext,
    session: &mut S,
    request: KeyRequest,
) -> FlowResult<AttestedKey> {
    KeyRequester::new(ctx, request).run(session).await
}

/// Answer one attestation request from the counterparty.
pub async fn respond_to_key_request<S: Session + ?Sized>(
    ctx: &FlowContext,
    session: &mut S,
) -> FlowResult<PublicKey> {
    KeyResponder::new(ctx).run(session).await
}

/// Proactively give the counterparty a fresh key for `external_id`, attested
/// so it can map the key to us.
pub async fn share_key<S: Session + ?Sized>(
    ctx: &FlowContext,
    session: &mut S,
    external_id: ExternalId,
) -> FlowResult<PublicKey> {
    session.send(FlowMessage::ShareKey { external_id }).await?;
    KeyResponder::new(ctx)
        .expecting(KeyRequest::FreshKey(external_id))
        .run(session)
        .await
}

/// Counterpart of [`share_key`]: wait for the announcement, then request and
/// register the shared key.
pub async fn receive_shared_key<S: Session + ?Sized>(
    ctx: &FlowContext,
    session: &mut S,
) -> FlowResult<AttestedKey> {
    let external_id = match session.receive().await? {
        FlowMessage::ShareKey { external_id } => external_id,
        FlowMessage::Abort { reason } => return Err(FlowError::Aborted(reason)),
        other => return Err(FlowError::unexpected("ShareKey", other.kind())),
    };
    request_key(ctx, session, KeyRequest::FreshKey(external_id)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::{DoubleChallenge, SchemeKind, SingleChallenge};
    use crate::session::memory_session_pair;
    use keylink_core::KeyCustody;
    use keylink_vault::{MemoryIdentityStore, MemoryKeyCustody};
    use std::sync::Arc;

    struct Peer {
        party: Party,
        custody: Arc<MemoryKeyCustody>,
        ctx: FlowContext,
    }

    fn peer(name: &str, key_byte: u8, store: &Arc<MemoryIdentityStore>) -> Peer {
        let party = Party::new(name, PublicKey([key_byte; 32]));
        store.add_well_known(party.clone()).unwrap();
        let custody = Arc::new(MemoryKeyCustody::new());
        let ctx = FlowContext::new(store.clone(), custody.clone(), SchemeKind::Double);
        Peer {
            party,
            custody,
            ctx,
        }
    }

    fn pair() -> (Peer, Peer) {
        let alice_store = Arc::new(MemoryIdentityStore::new());
        let bob_store = Arc::new(MemoryIdentityStore::new());
        let alice = peer("O=Alice", 0xa1, &alice_store);
        let bob = peer("O=Bob", 0xb0, &bob_store);
        alice_store.add_well_known(bob.party.clone()).unwrap();
        bob_store.add_well_known(alice.party.clone()).unwrap();
        (alice, bob)
    }

    fn signed_claim_for(
        custody: &MemoryKeyCustody,
        nonce: Challenge,
        additional: Option<Challenge>,
    ) -> SignedOwnershipClaim {
        let key = custody.mint_key(&ExternalId::new_random()).unwrap();
        let raw = claim::encode(&OwnershipClaim { nonce, key }).unwrap();
        let signature = custody
            .sign_with_known_key(&key, &claim::digest(&raw))
            .unwrap();
        SignedOwnershipClaim {
            raw,
            signature,
            signer_key: key,
            additional_challenge: additional,
        }
    }

    #[test]
    fn test_requester_transitions() {
        use RequesterState::*;
        assert!(Init.can_advance_to(AwaitingResponse));
        assert!(Verifying.can_advance_to(Done));
        assert!(AwaitingResponse.can_advance_to(Failed));
        assert!(!Init.can_advance_to(Done));
        assert!(!Done.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Verifying));
    }

    #[test]
    fn test_verify_claim_single_scheme() {
        let custody = MemoryKeyCustody::new();
        let challenge = Challenge::generate().unwrap();
        let signed = signed_claim_for(&custody, challenge, None);
        let request = KeyRequest::FreshKey(ExternalId::new_random());
        let key = verify_claim(&SingleChallenge, &challenge, &request, &signed).unwrap();
        assert_eq!(key, signed.signer_key);
    }

    #[test]
    fn test_verify_claim_rejects_foreign_signer() {
        let custody = MemoryKeyCustody::new();
        let challenge = Challenge::generate().unwrap();
        let mut signed = signed_claim_for(&custody, challenge, None);
        let other = custody.mint_key(&ExternalId::new_random()).unwrap();
        signed.signer_key = other;
        let request = KeyRequest::FreshKey(ExternalId::new_random());
        assert!(matches!(
            verify_claim(&SingleChallenge, &challenge, &request, &signed),
            Err(FlowError::SignerMismatch { .. })
        ));
    }

    #[test]
    fn test_verify_claim_rejects_other_known_key() {
        let custody = MemoryKeyCustody::new();
        let challenge = Challenge::generate().unwrap();
        let signed = signed_claim_for(&custody, challenge, None);
        let request = KeyRequest::KnownKey(PublicKey([0x77; 32]));
        assert!(matches!(
            verify_claim(&SingleChallenge, &challenge, &request, &signed),
            Err(FlowError::AttestedKeyMismatch { .. })
        ));
    }

    #[test]
    fn test_verify_claim_double_needs_additional() {
        let custody = MemoryKeyCustody::new();
        let challenge = Challenge::generate().unwrap();
        let extra = Challenge::generate().unwrap();
        let request = KeyRequest::FreshKey(ExternalId::new_random());

        let good = signed_claim_for(&custody, challenge.hash_concat(&extra), Some(extra));
        verify_claim(&DoubleChallenge, &challenge, &request, &good).unwrap();

        // A plain echo is not acceptable under the double scheme.
        let echo = signed_claim_for(&custody, challenge, Some(extra));
        assert!(matches!(
            verify_claim(&DoubleChallenge, &challenge, &request, &echo),
            Err(FlowError::ChallengeMismatch)
        ));
    }

    #[tokio::test]
    async fn test_fresh_key_round_trip_registers() {
        let (alice, bob) = pair();
        let (mut a, mut b) = memory_session_pair(alice.party.owning_key, bob.party.owning_key);
        let external_id = ExternalId::new_random();

        let (requested, responded) = tokio::join!(
            request_key(&alice.ctx, &mut a, KeyRequest::FreshKey(external_id)),
            respond_to_key_request(&bob.ctx, &mut b)
        );
        let attested = requested.unwrap();
        let key = responded.unwrap();

        assert_eq!(attested.key, key);
        assert_eq!(attested.party, bob.party);
        assert_eq!(attested.registration, Registration::Created);
        assert!(bob.custody.holds_key(&key));
        assert_eq!(bob.custody.keys_for_external_id(&external_id), vec![key]);
        assert_eq!(
            alice.ctx.resolver.resolve_party(&key).unwrap(),
            Some(bob.party.clone())
        );
    }

    #[tokio::test]
    async fn test_known_key_not_held_is_declined() {
        let (alice, bob) = pair();
        let (mut a, mut b) = memory_session_pair(alice.party.owning_key, bob.party.owning_key);
        let stranger = PublicKey([0x99; 32]);

        let (requested, responded) = tokio::join!(
            request_key(&alice.ctx, &mut a, KeyRequest::KnownKey(stranger)),
            respond_to_key_request(&bob.ctx, &mut b)
        );
        assert!(matches!(requested, Err(FlowError::Declined(_))));
        assert!(matches!(responded, Err(FlowError::KeyNotHeld(k)) if k == stranger));
        assert!(alice.ctx.resolver.resolve_party(&stranger).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_counterparty_not_registered() {
        let (alice, _) = pair();
        let mallory_store = Arc::new(MemoryIdentityStore::new());
        let mallory = peer("O=Mallory", 0x66, &mallory_store);
        let (mut a, mut m) =
            memory_session_pair(alice.party.owning_key, mallory.party.owning_key);

        let (requested, _) = tokio::join!(
            request_key(
                &alice.ctx,
                &mut a,
                KeyRequest::FreshKey(ExternalId::new_random())
            ),
            respond_to_key_request(&mallory.ctx, &mut m)
        );
        assert!(matches!(
            requested,
            Err(FlowError::UnresolvableCounterparty(k)) if k == mallory.party.owning_key
        ));
        assert!(alice.ctx.resolver.mappings().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_requester_rejects_unexpected_reply() {
        let (alice, bob) = pair();
        let (mut a, mut b) = memory_session_pair(alice.party.owning_key, bob.party.owning_key);

        let (requested, _) = tokio::join!(
            request_key(
                &alice.ctx,
                &mut a,
                KeyRequest::FreshKey(ExternalId::new_random())
            ),
            async {
                b.receive().await.unwrap();
                b.send(FlowMessage::SyncRequest(vec![])).await.unwrap();
            }
        );
        let err = requested.unwrap_err();
        assert!(err.is_session_fatal());
        assert!(matches!(
            err,
            FlowError::ProtocolViolation(Violation::UnexpectedMessage {
                expected: "SignedClaim",
                received: "SyncRequest"
            })
        ));
    }

    #[tokio::test]
    async fn test_share_key() {
        let (alice, bob) = pair();
        let (mut a, mut b) = memory_session_pair(alice.party.owning_key, bob.party.owning_key);
        let external_id = ExternalId::new_random();

        let (shared, received) = tokio::join!(
            share_key(&alice.ctx, &mut a, external_id),
            receive_shared_key(&bob.ctx, &mut b)
        );
        let key = shared.unwrap();
        let received = received.unwrap();
        assert_eq!(received.key, key);
        assert_eq!(received.party, alice.party);
        assert_eq!(alice.custody.keys_for_external_id(&external_id), vec![key]);
    }

    #[tokio::test]
    async fn test_sharer_declines_other_request() {
        let (alice, bob) = pair();
        let (mut a, mut b) = memory_session_pair(alice.party.owning_key, bob.party.owning_key);
        let held = alice.custody.mint_key(&ExternalId::new_random()).unwrap();

        let (shared, requested) = tokio::join!(
            share_key(&alice.ctx, &mut a, ExternalId::new_random()),
            async {
                b.receive().await.unwrap();
                request_key(&bob.ctx, &mut b, KeyRequest::KnownKey(held)).await
            }
        );
        assert!(matches!(
            shared,
            Err(FlowError::ProtocolViolation(Violation::UnsolicitedIdentity(k))) if k == held
        ));
        assert!(matches!(requested, Err(FlowError::Declined(_))));
    }
}
