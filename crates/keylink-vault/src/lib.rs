pub mod custody;
pub mod error;
pub mod identity_store;
pub mod signer;
pub mod state_store;

pub use custody::MemoryKeyCustody;
pub use error::*;
pub use identity_store::{MappingRecord, MemoryIdentityStore};
pub use signer::NodeSigner;
pub use state_store::MemoryStateLoader;
