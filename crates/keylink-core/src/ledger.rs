//! Minimal ledger view: just enough transaction structure to find the
//! participants referenced by a transaction.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Participant, PublicKey};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxId(pub [u8; 32]);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", hex::encode(&self.0[..8]))
    }
}

/// Pointer to an output state of an earlier transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateRef {
    pub tx_id: TxId,
    pub index: u32,
}

impl fmt::Display for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.tx_id, self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractState {
    pub participants: Vec<Participant>,
}

impl ContractState {
    pub fn new(participants: Vec<Participant>) -> Self {
        Self { participants }
    }

    pub fn participant_keys(&self) -> impl Iterator<Item = PublicKey> + '_ {
        self.participants.iter().map(Participant::owning_key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTransaction {
    pub id: TxId,
    pub inputs: Vec<StateRef>,
    pub outputs: Vec<ContractState>,
}

impl WireTransaction {
    /// References to this transaction's outputs, in order.
    pub fn output_refs(&self) -> impl Iterator<Item = (StateRef, &ContractState)> + '_ {
        self.outputs.iter().enumerate().map(move |(i, state)| {
            (
                StateRef {
                    tx_id: self.id,
                    index: i as u32,
                },
                state,
            )
        })
    }
}
