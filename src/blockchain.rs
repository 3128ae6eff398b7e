// Thin re-export module: implementation is in `blockchain/core.rs` so the
// ledger can be split by responsibility (merkle commitment, block sealing,
// validation, chain management).

pub mod core;
pub use core::*;
