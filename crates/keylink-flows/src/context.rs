use keylink_core::{
    IdentityService, KeyCustody, KeyMapping, Party, PublicKey, Registration, StateLoader,
};
use std::sync::Arc;
use tracing::debug;

use crate::error::{FlowError, FlowResult};
use crate::scheme::{ChallengeScheme, SchemeKind};
use crate::signature::SignatureEngine;

/// Thin wrapper over the identity collaborator.
#[derive(Clone)]
pub struct IdentityResolver {
    service: Arc<dyn IdentityService>,
}

impl IdentityResolver {
    pub fn new(service: Arc<dyn IdentityService>) -> Self {
        Self { service }
    }

    pub fn resolve_party(&self, key: &PublicKey) -> FlowResult<Option<Party>> {
        Ok(self.service.resolve_party(key)?)
    }

    /// True when `key` is the legal identity key of a well-known party.
    pub fn is_well_known_key(&self, key: &PublicKey) -> FlowResult<bool> {
        Ok(self.service.party_from_legal_key(key)?.is_some())
    }

    /// The well-known party at the other end of a session.
    pub fn resolve_counterparty(&self, legal_key: &PublicKey) -> FlowResult<Party> {
        self.service
            .party_from_legal_key(legal_key)?
            .ok_or(FlowError::UnresolvableCounterparty(*legal_key))
    }

    /// Record `key -> party`. Re-registering the same mapping succeeds with
    /// `Unchanged`; a mapping to another party fails with `KeyAlreadyMapped`.
    pub fn register(&self, key: &PublicKey, party: &Party) -> FlowResult<Registration> {
        let outcome = self.service.register_mapping(key, party)?;
        if outcome == Registration::Unchanged {
            debug!(key = %key.fingerprint(), party = %party, "mapping already present");
        }
        Ok(outcome)
    }

    pub fn mappings(&self) -> FlowResult<Vec<KeyMapping>> {
        Ok(self.service.mappings()?)
    }
}

/// Collaborators a protocol instance runs against. Cloning is cheap; clones
/// share the same underlying stores.
#[derive(Clone)]
pub struct FlowContext {
    pub resolver: IdentityResolver,
    pub signatures: SignatureEngine,
    pub scheme: Arc<dyn ChallengeScheme>,
    pub states: Option<Arc<dyn StateLoader>>,
}

impl FlowContext {
    pub fn new(
        identities: Arc<dyn IdentityService>,
        custody: Arc<dyn KeyCustody>,
        scheme: SchemeKind,
    ) -> Self {
        Self {
            resolver: IdentityResolver::new(identities),
            signatures: SignatureEngine::new(custody),
            scheme: scheme.scheme(),
            states: None,
        }
    }

    pub fn with_state_loader(mut self, states: Arc<dyn StateLoader>) -> Self {
        self.states = Some(states);
        self
    }
}
