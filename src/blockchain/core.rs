// core.rs splits ledger responsibilities into submodules: commitment, block
// sealing, chain validation and the shared ledger engine.
pub mod block;
pub mod chain;
pub mod merkle;
pub mod validation;

pub use block::*;
pub use chain::*;
pub use merkle::*;
pub use validation::*;
