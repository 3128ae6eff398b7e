use crate::error::ChainError;

use super::block::Block;

/// Which target a historical block's proof-of-work is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifficultyCheck {
    /// The ledger's difficulty now, regardless of when the block was sealed.
    Current(u32),
    /// The difficulty recorded on each block when it was sealed.
    AsSealed,
}

/// Walks the chain once and reports the first broken block.
///
/// Genesis is not checked; every later block must reproduce its own hash,
/// point at its predecessor's hash, carry the next index and meet the target
/// selected by `check`.
pub fn validate_chain(blocks: &[Block], check: DifficultyCheck) -> Result<(), ChainError> {
    for pair in blocks.windows(2) {
        let (prev, current) = (&pair[0], &pair[1]);

        if current.hash != current.calculate_hash() {
            return Err(ChainError::HashMismatch { index: current.index });
        }

        if current.prev_hash != prev.hash {
            return Err(ChainError::InvalidBlockLinkage { index: current.index });
        }

        if current.index != prev.index + 1 {
            return Err(ChainError::InvalidBlockIndex {
                expected: prev.index + 1,
                found: current.index,
            });
        }

        let difficulty = match check {
            DifficultyCheck::Current(d) => d,
            DifficultyCheck::AsSealed => current.difficulty,
        };
        if !current.is_valid(difficulty) {
            return Err(ChainError::InvalidProofOfWork {
                index: current.index,
                difficulty,
            });
        }
    }
    Ok(())
}
