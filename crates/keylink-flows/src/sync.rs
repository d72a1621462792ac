//! Confidential-identity synchronization for a transaction.
//!
//! The initiator offers every confidential key referenced by a transaction
//! (or an explicit list). The counterparty replies with the subset it cannot
//! resolve. For each requested key the initiator can resolve, it sends the
//! mapping and then proves ownership in one attestation round, with the
//! initiator as responder and the counterparty as requester. The counterparty
//! registers each mapping that verifies and answers every round with either
//! `SyncAck` or `Decline`, unless the initiator already declined the round
//! itself.
//!
//! Per-identity failures are collected in a [`SyncReport`]; only errors that
//! leave the session unusable abort the batch.

use keylink_core::{KeyMapping, PublicKey, WireTransaction};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::attestation::{register_verified, AttestedKey, KeyRequester, KeyResponder};
use crate::context::FlowContext;
use crate::error::{FlowError, FlowResult, Violation};
use crate::messages::{FlowMessage, KeyRequest};
use crate::session::Session;

/// One identity that could not be synchronized, and why.
#[derive(Debug)]
pub struct SyncFailure {
    pub key: PublicKey,
    pub error: FlowError,
}

/// Outcome of one synchronization run, from the side that produced it.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Confidential keys offered by the initiator.
    pub candidates: Vec<PublicKey>,
    /// Keys the counterparty asked about.
    pub requested: Vec<PublicKey>,
    /// Mappings the counterparty registered. On the initiator side, only
    /// those it acknowledged.
    pub synced: Vec<KeyMapping>,
    /// Requested keys nobody could resolve.
    pub unresolved: Vec<PublicKey>,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_keys(&self) -> Vec<PublicKey> {
        self.failures.iter().map(|f| f.key).collect()
    }

    /// Turn any per-identity failure into `PartialBatchFailure`.
    pub fn into_result(self) -> FlowResult<SyncReport> {
        if self.failures.is_empty() {
            return Ok(self);
        }
        Err(FlowError::PartialBatchFailure {
            failed: self.failed_keys(),
            total: self.requested.len(),
        })
    }

    fn record_failure(&mut self, key: PublicKey, error: FlowError) -> FlowResult<()> {
        if error.is_session_fatal() {
            return Err(error);
        }
        warn!(key = %key.fingerprint(), error = %error, "identity not synchronized");
        self.failures.push(SyncFailure { key, error });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Initiator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitiatorPhase {
    Extract,
    Exchange,
    ResolveEach,
    Done,
}

pub struct SyncInitiator {
    ctx: FlowContext,
    phase: InitiatorPhase,
}

impl SyncInitiator {
    pub fn new(ctx: &FlowContext) -> Self {
        Self {
            ctx: ctx.clone(),
            phase: InitiatorPhase::Extract,
        }
    }

    fn enter(&mut self, next: InitiatorPhase) {
        debug!(from = ?self.phase, to = ?next, "sync initiator");
        self.phase = next;
    }

    /// Confidential keys referenced by `tx`: participants of its outputs and
    /// of every input state that can be loaded. Inputs whose backing
    /// transaction is unknown are skipped.
    pub fn candidates_from_transaction(
        &self,
        tx: &WireTransaction,
    ) -> FlowResult<BTreeSet<PublicKey>> {
        let mut keys = Vec::new();
        for input in &tx.inputs {
            let state = match &self.ctx.states {
                Some(loader) => loader.load_state(input)?,
                None => None,
            };
            match state {
                Some(state) => keys.extend(state.participant_keys()),
                None => warn!(input = %input, tx = %tx.id, "skipping unresolvable input state"),
            }
        }
        for state in &tx.outputs {
            keys.extend(state.participant_keys());
        }
        self.candidates_from_identities(&keys)
    }

    /// Deduplicate `keys`, dropping legal identity keys of well-known parties.
    pub fn candidates_from_identities(
        &self,
        keys: &[PublicKey],
    ) -> FlowResult<BTreeSet<PublicKey>> {
        let mut candidates = BTreeSet::new();
        for key in keys {
            if !self.ctx.resolver.is_well_known_key(key)? {
                candidates.insert(*key);
            }
        }
        Ok(candidates)
    }

    pub async fn sync_transaction<S: Session + ?Sized>(
        self,
        session: &mut S,
        tx: &WireTransaction,
    ) -> FlowResult<SyncReport> {
        let candidates = self.candidates_from_transaction(tx)?;
        self.run(session, candidates).await
    }

    /// Synchronize an explicit identity list. An empty list is rejected and
    /// the counterparty is told so.
    pub async fn sync_identities<S: Session + ?Sized>(
        self,
        session: &mut S,
        keys: &[PublicKey],
    ) -> FlowResult<SyncReport> {
        if keys.is_empty() {
            let violation = Violation::EmptySyncInput;
            session
                .send(FlowMessage::Abort {
                    reason: violation.to_string(),
                })
                .await?;
            return Err(violation.into());
        }
        let candidates = self.candidates_from_identities(keys)?;
        self.run(session, candidates).await
    }

    async fn run<S: Session + ?Sized>(
        mut self,
        session: &mut S,
        candidates: BTreeSet<PublicKey>,
    ) -> FlowResult<SyncReport> {
        let mut report = SyncReport {
            candidates: candidates.iter().copied().collect(),
            ..SyncReport::default()
        };

        self.enter(InitiatorPhase::Exchange);
        let reply = session
            .send_and_receive(FlowMessage::SyncCandidates(report.candidates.clone()))
            .await?;
        let requested = match reply {
            FlowMessage::SyncRequest(keys) => keys,
            FlowMessage::Abort { reason } => return Err(FlowError::Aborted(reason)),
            other => return Err(FlowError::unexpected("SyncRequest", other.kind())),
        };
        if let Some(stray) = requested.iter().find(|k| !candidates.contains(*k)) {
            let violation = Violation::UnsolicitedIdentity(*stray);
            warn!(
                key = %stray.fingerprint(),
                counterparty = %session.counterparty_key().fingerprint(),
                "counterparty requested an identity that was not offered"
            );
            session
                .send(FlowMessage::Abort {
                    reason: violation.to_string(),
                })
                .await?;
            return Err(violation.into());
        }
        let requested: BTreeSet<PublicKey> = requested.into_iter().collect();
        report.requested = requested.iter().copied().collect();

        self.enter(InitiatorPhase::ResolveEach);
        let mut resolutions = Vec::new();
        for key in &requested {
            match self.ctx.resolver.resolve_party(key) {
                Ok(Some(party)) => resolutions.push(KeyMapping { key: *key, party }),
                Ok(None) => report.unresolved.push(*key),
                Err(e) => report.record_failure(*key, e)?,
            }
        }
        session
            .send(FlowMessage::SyncResolutions(resolutions.clone()))
            .await?;

        for mapping in resolutions {
            match self.prove(session, &mapping).await {
                Ok(()) => report.synced.push(mapping),
                Err(e) => report.record_failure(mapping.key, e)?,
            }
        }

        self.enter(InitiatorPhase::Done);
        info!(
            counterparty = %session.counterparty_key().fingerprint(),
            candidates = report.candidates.len(),
            requested = report.requested.len(),
            synced = report.synced.len(),
            failed = report.failures.len(),
            "identity sync finished"
        );
        Ok(report)
    }

    /// Answer the proof round for `mapping`, then wait for the counterparty's
    /// verdict on it.
    async fn prove<S: Session + ?Sized>(
        &self,
        session: &mut S,
        mapping: &KeyMapping,
    ) -> FlowResult<()> {
        KeyResponder::new(&self.ctx)
            .expecting(KeyRequest::KnownKey(mapping.key))
            .run(session)
            .await?;
        match session.receive().await? {
            FlowMessage::SyncAck { key } if key == mapping.key => Ok(()),
            FlowMessage::SyncAck { key } => Err(Violation::UnsolicitedIdentity(key).into()),
            FlowMessage::Decline { reason } => Err(FlowError::Declined(reason)),
            FlowMessage::Abort { reason } => Err(FlowError::Aborted(reason)),
            other => Err(FlowError::unexpected("SyncAck", other.kind())),
        }
    }
}

// ---------------------------------------------------------------------------
// Counterparty
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponderPhase {
    ReceiveCandidates,
    RequestUnknown,
    AwaitProofs,
    Register,
    Done,
}

pub struct SyncResponder {
    ctx: FlowContext,
    phase: ResponderPhase,
}

impl SyncResponder {
    pub fn new(ctx: &FlowContext) -> Self {
        Self {
            ctx: ctx.clone(),
            phase: ResponderPhase::ReceiveCandidates,
        }
    }

    fn enter(&mut self, next: ResponderPhase) {
        debug!(from = ?self.phase, to = ?next, "sync responder");
        self.phase = next;
    }

    pub async fn run<S: Session + ?Sized>(mut self, session: &mut S) -> FlowResult<SyncReport> {
        let candidates: BTreeSet<PublicKey> = match session.receive().await? {
            FlowMessage::SyncCandidates(keys) => keys.into_iter().collect(),
            FlowMessage::Abort { reason } => return Err(FlowError::Aborted(reason)),
            other => return Err(FlowError::unexpected("SyncCandidates", other.kind())),
        };

        self.enter(ResponderPhase::RequestUnknown);
        let mut unknown = BTreeSet::new();
        for key in &candidates {
            if self.ctx.resolver.resolve_party(key)?.is_none() {
                unknown.insert(*key);
            }
        }
        let mut report = SyncReport {
            candidates: candidates.into_iter().collect(),
            requested: unknown.iter().copied().collect(),
            ..SyncReport::default()
        };
        session
            .send(FlowMessage::SyncRequest(report.requested.clone()))
            .await?;

        self.enter(ResponderPhase::AwaitProofs);
        let resolutions = match session.receive().await? {
            FlowMessage::SyncResolutions(mappings) => mappings,
            FlowMessage::Abort { reason } => return Err(FlowError::Aborted(reason)),
            other => return Err(FlowError::unexpected("SyncResolutions", other.kind())),
        };

        self.enter(ResponderPhase::Register);
        let mut pending = unknown;
        for mapping in resolutions {
            // Each offered mapping is followed by a proof round that must be
            // consumed, even when the mapping is refused.
            if !pending.remove(&mapping.key) {
                let violation = Violation::UnsolicitedIdentity(mapping.key);
                session
                    .send(FlowMessage::Decline {
                        reason: violation.to_string(),
                    })
                    .await?;
                report.record_failure(mapping.key, violation.into())?;
                continue;
            }
            match verify_and_add(&self.ctx, session, &mapping).await {
                Ok(attested) => {
                    session
                        .send(FlowMessage::SyncAck { key: attested.key })
                        .await?;
                    report.synced.push(KeyMapping {
                        key: attested.key,
                        party: attested.party,
                    });
                }
                // The initiator refused its own round and expects no verdict.
                Err(e @ FlowError::Declined(_)) => report.record_failure(mapping.key, e)?,
                Err(e) => {
                    // Fills whichever slot the initiator is waiting on: the
                    // request, if it was never sent, or the verdict.
                    if !e.is_session_fatal() {
                        session
                            .send(FlowMessage::Decline {
                                reason: e.to_string(),
                            })
                            .await?;
                    }
                    report.record_failure(mapping.key, e)?;
                }
            }
        }
        report.unresolved = pending.into_iter().collect();

        self.enter(ResponderPhase::Done);
        info!(
            counterparty = %session.counterparty_key().fingerprint(),
            requested = report.requested.len(),
            registered = report.synced.len(),
            failed = report.failures.len(),
            "identity sync received"
        );
        Ok(report)
    }
}

/// Challenge the counterparty to prove it holds `mapping.key`, check that it
/// is the party the mapping names, and register the mapping.
pub async fn verify_and_add<S: Session + ?Sized>(
    ctx: &FlowContext,
    session: &mut S,
    mapping: &KeyMapping,
) -> FlowResult<AttestedKey> {
    let verified = KeyRequester::new(ctx, KeyRequest::KnownKey(mapping.key))
        .verify(session)
        .await?;
    if verified.party != mapping.party {
        return Err(FlowError::ClaimedPartyMismatch {
            key: mapping.key,
            claimed: mapping.party.name.clone(),
            attested: verified.party.name.clone(),
        });
    }
    let registration = register_verified(ctx, &verified)?;
    Ok(AttestedKey {
        key: verified.key,
        party: verified.party,
        registration,
    })
}
