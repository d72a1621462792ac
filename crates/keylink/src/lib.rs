//! keylink node: wires the in-memory vault into the attestation and sync
//! protocols.
//!
//! A [`Node`] owns its legal identity, key custody, identity store and state
//! store, and exposes the protocols as async methods over any [`Session`].

pub mod config;
pub mod error;

pub use config::{AttestationConfig, NodeConfig};
pub use error::{NodeError, NodeResult};

use keylink_core::{ExternalId, IdentityService, Party, PublicKey, Registration, WireTransaction};
use keylink_flows::{
    memory_session_pair, AttestedKey, FlowContext, KeyRequest, MemorySession, Session,
    SyncInitiator, SyncReport, SyncResponder,
};
use keylink_vault::{MemoryIdentityStore, MemoryKeyCustody, MemoryStateLoader, NodeSigner};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// One confidential mapping as shown to operators.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MappingEntry {
    pub key: String,
    pub fingerprint: String,
    pub party: String,
    pub registered_at: String,
}

pub struct Node {
    config: NodeConfig,
    party: Party,
    identities: Arc<MemoryIdentityStore>,
    custody: Arc<MemoryKeyCustody>,
    states: Arc<MemoryStateLoader>,
    ctx: FlowContext,
}

impl Node {
    /// Build a node from validated configuration.
    pub fn new(config: NodeConfig) -> NodeResult<Self> {
        config.validate()?;
        let signer = match config.seed_bytes()? {
            Some(seed) => NodeSigner::from_seed(&seed)?,
            None => NodeSigner::generate(),
        };
        let party = signer.party(config.node_name.clone());

        let identities = Arc::new(MemoryIdentityStore::new());
        identities.add_well_known(party.clone())?;
        let custody = Arc::new(MemoryKeyCustody::with_signer(&signer)?);
        let states = Arc::new(MemoryStateLoader::new());
        let ctx = FlowContext::new(
            identities.clone(),
            custody.clone(),
            config.attestation.scheme,
        )
        .with_state_loader(states.clone());

        info!(
            party = %party,
            legal_key = %party.owning_key.fingerprint(),
            scheme = %config.attestation.scheme,
            "node started"
        );
        Ok(Self {
            config,
            party,
            identities,
            custody,
            states,
            ctx,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn party(&self) -> &Party {
        &self.party
    }

    pub fn identities(&self) -> &Arc<MemoryIdentityStore> {
        &self.identities
    }

    pub fn custody(&self) -> &Arc<MemoryKeyCustody> {
        &self.custody
    }

    pub fn context(&self) -> &FlowContext {
        &self.ctx
    }

    /// Add a peer to this node's network map.
    pub fn add_peer(&self, party: Party) -> NodeResult<()> {
        self.identities.add_well_known(party)?;
        Ok(())
    }

    /// Put two nodes in each other's network map.
    pub fn introduce(&self, other: &Node) -> NodeResult<()> {
        self.add_peer(other.party.clone())?;
        other.add_peer(self.party.clone())
    }

    /// In-process session pair: the first end belongs to `self`.
    pub fn connect(&self, other: &Node) -> (MemorySession, MemorySession) {
        memory_session_pair(self.party.owning_key, other.party.owning_key)
    }

    /// Mint a confidential key for `external_id` and map it to this node.
    pub fn new_confidential_key(&self, external_id: &ExternalId) -> NodeResult<PublicKey> {
        let key = self.custody.mint_key(external_id)?;
        self.identities.register_mapping(&key, &self.party)?;
        Ok(key)
    }

    pub fn record_transaction(&self, tx: &WireTransaction) -> NodeResult<()> {
        self.states.record_transaction(tx)?;
        Ok(())
    }

    pub fn resolve(&self, key: &PublicKey) -> NodeResult<Option<Party>> {
        Ok(self.identities.resolve_party(key)?)
    }

    /// Confidential mappings, oldest first.
    pub fn mapping_audit(&self) -> NodeResult<Vec<MappingEntry>> {
        let mut records = self.identities.snapshot()?;
        records.sort_by(|a, b| {
            a.1.registered_at
                .cmp(&b.1.registered_at)
                .then_with(|| a.0.cmp(&b.0))
        });
        Ok(records
            .into_iter()
            .map(|(key, record)| MappingEntry {
                key: key.to_string(),
                fingerprint: key.fingerprint(),
                party: record.party.name,
                registered_at: record.registered_at.to_rfc3339(),
            })
            .collect())
    }

    // -----------------------------------------------------------------------
    // Protocols
    // -----------------------------------------------------------------------

    pub async fn request_fresh_key<S: Session + ?Sized>(
        &self,
        session: &mut S,
        external_id: ExternalId,
    ) -> NodeResult<AttestedKey> {
        self.request_key(session, KeyRequest::FreshKey(external_id))
            .await
    }

    pub async fn request_key<S: Session + ?Sized>(
        &self,
        session: &mut S,
        request: KeyRequest,
    ) -> NodeResult<AttestedKey> {
        Ok(keylink_flows::request_key(&self.ctx, session, request).await?)
    }

    /// Answer one attestation request. A fresh key minted here is also
    /// mapped to this node locally.
    pub async fn respond_to_key_request<S: Session + ?Sized>(
        &self,
        session: &mut S,
    ) -> NodeResult<PublicKey> {
        let key = keylink_flows::respond_to_key_request(&self.ctx, session).await?;
        self.map_own_key(&key)?;
        Ok(key)
    }

    pub async fn share_key<S: Session + ?Sized>(
        &self,
        session: &mut S,
        external_id: ExternalId,
    ) -> NodeResult<PublicKey> {
        let key = keylink_flows::share_key(&self.ctx, session, external_id).await?;
        self.map_own_key(&key)?;
        Ok(key)
    }

    pub async fn receive_shared_key<S: Session + ?Sized>(
        &self,
        session: &mut S,
    ) -> NodeResult<AttestedKey> {
        Ok(keylink_flows::receive_shared_key(&self.ctx, session).await?)
    }

    pub async fn sync_transaction<S: Session + ?Sized>(
        &self,
        session: &mut S,
        tx: &WireTransaction,
    ) -> NodeResult<SyncReport> {
        Ok(SyncInitiator::new(&self.ctx)
            .sync_transaction(session, tx)
            .await?)
    }

    pub async fn sync_identities<S: Session + ?Sized>(
        &self,
        session: &mut S,
        keys: &[PublicKey],
    ) -> NodeResult<SyncReport> {
        Ok(SyncInitiator::new(&self.ctx)
            .sync_identities(session, keys)
            .await?)
    }

    pub async fn respond_to_sync<S: Session + ?Sized>(
        &self,
        session: &mut S,
    ) -> NodeResult<SyncReport> {
        Ok(SyncResponder::new(&self.ctx).run(session).await?)
    }

    fn map_own_key(&self, key: &PublicKey) -> NodeResult<Registration> {
        if *key == self.party.owning_key {
            return Ok(Registration::Unchanged);
        }
        Ok(self.identities.register_mapping(key, &self.party)?)
    }
}
