use keylink_core::{ContractState, CoreError, CoreResult, StateLoader, StateRef, WireTransaction};
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory record of transaction outputs, keyed by [`StateRef`].
pub struct MemoryStateLoader {
    states: Mutex<HashMap<StateRef, ContractState>>,
}

impl MemoryStateLoader {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Record every output of `tx` so later transactions can resolve them.
    pub fn record_transaction(&self, tx: &WireTransaction) -> CoreResult<()> {
        let mut states = self
            .states
            .lock()
            .map_err(|e| CoreError::Storage(format!("lock poisoned: {}", e)))?;
        for (state_ref, state) in tx.output_refs() {
            states.insert(state_ref, state.clone());
        }
        Ok(())
    }
}

impl Default for MemoryStateLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl StateLoader for MemoryStateLoader {
    fn load_state(&self, state_ref: &StateRef) -> CoreResult<Option<ContractState>> {
        let states = self
            .states
            .lock()
            .map_err(|e| CoreError::Storage(format!("lock poisoned: {}", e)))?;
        Ok(states.get(state_ref).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keylink_core::{Participant, PublicKey, TxId};

    #[test]
    fn test_recorded_outputs_resolve() {
        let loader = MemoryStateLoader::new();
        let state = ContractState::new(vec![Participant::Anonymous(PublicKey([7; 32]))]);
        let tx = WireTransaction {
            id: TxId([1; 32]),
            inputs: vec![],
            outputs: vec![state.clone()],
        };
        loader.record_transaction(&tx).unwrap();

        let hit = StateRef {
            tx_id: TxId([1; 32]),
            index: 0,
        };
        let miss = StateRef {
            tx_id: TxId([2; 32]),
            index: 0,
        };
        assert_eq!(loader.load_state(&hit).unwrap(), Some(state));
        assert!(loader.load_state(&miss).unwrap().is_none());
    }
}
