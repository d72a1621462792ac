use keylink_core::{
    CoreError, CoreResult, IdentityService, KeyMapping, Party, PublicKey, Registration,
    Timestamp,
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// A confidential key mapping and when it was recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingRecord {
    pub party: Party,
    pub registered_at: Timestamp,
}

#[derive(Default)]
struct StoreInner {
    network_map: HashMap<PublicKey, Party>,
    confidential: HashMap<PublicKey, MappingRecord>,
}

/// In-memory identity store implementing [`IdentityService`].
///
/// Holds the network map (well-known parties by legal identity key) and the
/// verified confidential mappings. A single lock covers both so that the
/// check-then-insert in `register_mapping` is atomic.
pub struct MemoryIdentityStore {
    inner: Mutex<StoreInner>,
}

fn lock_inner(mutex: &Mutex<StoreInner>) -> CoreResult<MutexGuard<'_, StoreInner>> {
    mutex
        .lock()
        .map_err(|e| CoreError::Storage(format!("lock poisoned: {}", e)))
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
        }
    }

    /// Add a well-known party to the network map.
    pub fn add_well_known(&self, party: Party) -> CoreResult<()> {
        let mut inner = lock_inner(&self.inner)?;
        inner.network_map.insert(party.owning_key, party);
        Ok(())
    }

    pub fn mapping_count(&self) -> usize {
        lock_inner(&self.inner)
            .map(|i| i.confidential.len())
            .unwrap_or(0)
    }

    /// Confidential mappings with their registration times.
    pub fn snapshot(&self) -> CoreResult<Vec<(PublicKey, MappingRecord)>> {
        let inner = lock_inner(&self.inner)?;
        Ok(inner
            .confidential
            .iter()
            .map(|(k, r)| (*k, r.clone()))
            .collect())
    }
}

impl Default for MemoryIdentityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityService for MemoryIdentityStore {
    fn party_from_legal_key(&self, key: &PublicKey) -> CoreResult<Option<Party>> {
        let inner = lock_inner(&self.inner)?;
        Ok(inner.network_map.get(key).cloned())
    }

    fn resolve_party(&self, key: &PublicKey) -> CoreResult<Option<Party>> {
        let inner = lock_inner(&self.inner)?;
        if let Some(party) = inner.network_map.get(key) {
            return Ok(Some(party.clone()));
        }
        Ok(inner.confidential.get(key).map(|r| r.party.clone()))
    }

    fn register_mapping(&self, key: &PublicKey, party: &Party) -> CoreResult<Registration> {
        let mut inner = lock_inner(&self.inner)?;

        let existing = inner
            .network_map
            .get(key)
            .or_else(|| inner.confidential.get(key).map(|r| &r.party));
        if let Some(existing) = existing {
            if existing == party {
                return Ok(Registration::Unchanged);
            }
            return Err(CoreError::KeyAlreadyMapped {
                key: *key,
                existing: existing.name.clone(),
                requested: party.name.clone(),
            });
        }

        inner.confidential.insert(
            *key,
            MappingRecord {
                party: party.clone(),
                registered_at: Timestamp::now(),
            },
        );
        tracing::info!(key = %key.fingerprint(), party = %party, "registered key mapping");
        Ok(Registration::Created)
    }

    fn mappings(&self) -> CoreResult<Vec<KeyMapping>> {
        let inner = lock_inner(&self.inner)?;
        Ok(inner
            .confidential
            .iter()
            .map(|(key, r)| KeyMapping {
                key: *key,
                party: r.party.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn alice() -> Party {
        Party::new("O=Alice", PublicKey([0xA1; 32]))
    }

    fn bob() -> Party {
        Party::new("O=Bob", PublicKey([0xB0; 32]))
    }

    #[test]
    fn test_register_then_resolve() {
        let store = MemoryIdentityStore::new();
        let key = PublicKey([0x01; 32]);
        assert!(store.resolve_party(&key).unwrap().is_none());
        assert_eq!(
            store.register_mapping(&key, &alice()).unwrap(),
            Registration::Created
        );
        assert_eq!(store.resolve_party(&key).unwrap(), Some(alice()));
        assert_eq!(store.mapping_count(), 1);
    }

    #[test]
    fn test_register_same_party_is_idempotent() {
        let store = MemoryIdentityStore::new();
        let key = PublicKey([0x02; 32]);
        store.register_mapping(&key, &alice()).unwrap();
        assert_eq!(
            store.register_mapping(&key, &alice()).unwrap(),
            Registration::Unchanged
        );
        assert_eq!(store.mapping_count(), 1);
    }

    #[test]
    fn test_register_other_party_conflicts() {
        let store = MemoryIdentityStore::new();
        let key = PublicKey([0x03; 32]);
        store.register_mapping(&key, &alice()).unwrap();
        let err = store.register_mapping(&key, &bob()).unwrap_err();
        assert!(matches!(err, CoreError::KeyAlreadyMapped { .. }));
        assert_eq!(store.resolve_party(&key).unwrap(), Some(alice()));
    }

    #[test]
    fn test_legal_key_cannot_be_remapped() {
        let store = MemoryIdentityStore::new();
        store.add_well_known(alice()).unwrap();
        let err = store
            .register_mapping(&alice().owning_key, &bob())
            .unwrap_err();
        assert!(matches!(err, CoreError::KeyAlreadyMapped { .. }));
        assert_eq!(
            store
                .register_mapping(&alice().owning_key, &alice())
                .unwrap(),
            Registration::Unchanged
        );
        assert_eq!(store.mapping_count(), 0);
    }

    #[test]
    fn test_party_from_legal_key_ignores_confidential() {
        let store = MemoryIdentityStore::new();
        store.add_well_known(alice()).unwrap();
        let key = PublicKey([0x04; 32]);
        store.register_mapping(&key, &alice()).unwrap();
        assert_eq!(
            store.party_from_legal_key(&alice().owning_key).unwrap(),
            Some(alice())
        );
        assert!(store.party_from_legal_key(&key).unwrap().is_none());
    }

    #[test]
    fn test_concurrent_registration_single_winner() {
        let store = Arc::new(MemoryIdentityStore::new());
        let key = PublicKey([0x05; 32]);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let party = if i % 2 == 0 { alice() } else { bob() };
                    store.register_mapping(&key, &party).map(|r| (r, party))
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let created = results
            .iter()
            .filter(|r| matches!(r, Ok((Registration::Created, _))))
            .count();
        assert_eq!(created, 1);

        let winner = store.resolve_party(&key).unwrap().unwrap();
        for result in results {
            match result {
                Ok((_, party)) => assert_eq!(party, winner),
                Err(CoreError::KeyAlreadyMapped { existing, .. }) => {
                    assert_eq!(existing, winner.name)
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
    }
}
