pub mod crypto;
pub mod error;
pub mod ledger;
pub mod traits;
pub mod types;

pub use crypto::*;
pub use error::*;
pub use ledger::*;
pub use traits::*;
pub use types::*;
