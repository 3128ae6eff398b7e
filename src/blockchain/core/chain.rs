use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use tracing::info;

use crate::error::ChainError;

use super::block::{Block, MAX_DIFFICULTY};
use super::validation::{validate_chain, DifficultyCheck};

pub const GENESIS_TRANSACTION: &str = "Genesis Transaction - Blockchain Created";
pub const GENESIS_PREV_HASH: &str = "0";

/// Chain and pending pool, only ever touched under `Blockchain::state`.
#[derive(Debug)]
struct ChainState {
    blocks: Vec<Block>,
    pending: Vec<String>,
    difficulty: u32,
}

/// Counters mirrored from the locked state so observers can read them while a
/// miner holds the lock.
#[derive(Debug, Default)]
struct SummaryCells {
    chain_len: AtomicUsize,
    pending: AtomicUsize,
    difficulty: AtomicU32,
    last_hashrate: AtomicU64,
}

/// Point-in-time counters of the ledger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedgerSummary {
    pub chain_len: usize,
    pub pending: usize,
    pub difficulty: u32,
    pub last_hashrate: f64,
}

/// The ledger engine. Reads share the lock, mutations take it exclusively.
/// Mining holds an upgradable read for the nonce search, so reads continue
/// while all other writers (and other miners) wait. Readers arriving behind a
/// queued writer wait as well; use [`Blockchain::summary`] where that matters.
#[derive(Debug)]
pub struct Blockchain {
    state: RwLock<ChainState>,
    summary: SummaryCells,
}

impl Blockchain {
    /// Create a ledger whose genesis block is sealed at `difficulty`.
    pub fn new(difficulty: u32) -> Result<Self, ChainError> {
        check_difficulty(i64::from(difficulty))?;

        let mut genesis = Block::new(0, vec![GENESIS_TRANSACTION.to_string()], GENESIS_PREV_HASH);
        let report = genesis.mine(difficulty);

        let blockchain = Blockchain {
            state: RwLock::new(ChainState {
                blocks: vec![genesis],
                pending: Vec::new(),
                difficulty,
            }),
            summary: SummaryCells::default(),
        };
        blockchain.summary.chain_len.store(1, Ordering::Relaxed);
        blockchain.summary.difficulty.store(difficulty, Ordering::Relaxed);
        blockchain.store_hashrate(report.hashrate());

        info!(difficulty, "blockchain created with genesis block");
        Ok(blockchain)
    }

    pub fn add_transaction(&self, tx: impl Into<String>) {
        let tx = tx.into();
        let mut state = self.state.write();
        state.pending.push(tx);
        self.summary.pending.store(state.pending.len(), Ordering::Relaxed);
        info!(pending = state.pending.len(), "transaction added to pending pool");
    }

    /// Seal every pending transaction into a new block.
    ///
    /// Returns `None` when the pending pool is empty. The sealed block holds
    /// exactly the pending set seen when mining started; transactions added
    /// meanwhile wait for the write lock and stay pending for the next block.
    pub fn mine_block(&self) -> Option<Block> {
        let state = self.state.upgradable_read();

        if state.pending.is_empty() {
            info!("no pending transactions to mine");
            return None;
        }

        let latest = state.blocks.last()?;
        let mut block = Block::new(latest.index + 1, state.pending.clone(), latest.hash.clone());
        info!(
            index = block.index,
            transactions = block.transactions.len(),
            difficulty = state.difficulty,
            "mining new block"
        );
        let report = block.mine(state.difficulty);

        let mut state = RwLockUpgradableReadGuard::upgrade(state);
        state.blocks.push(block.clone());
        state.pending.clear();
        self.summary.chain_len.store(state.blocks.len(), Ordering::Relaxed);
        self.summary.pending.store(0, Ordering::Relaxed);
        self.store_hashrate(report.hashrate());

        info!(index = block.index, "block added to chain, pending transactions cleared");
        Some(block)
    }

    /// Replace the difficulty used by future sealing. Existing blocks are
    /// never re-sealed.
    pub fn set_difficulty(&self, difficulty: i64) -> Result<u32, ChainError> {
        let difficulty = check_difficulty(difficulty)?;
        let mut state = self.state.write();
        state.difficulty = difficulty;
        self.summary.difficulty.store(difficulty, Ordering::Relaxed);
        info!(difficulty, "difficulty updated");
        Ok(difficulty)
    }

    pub fn get_difficulty(&self) -> u32 {
        self.state.read().difficulty
    }

    /// Hash rate of the most recent sealing, in hashes per second.
    pub fn last_hashrate(&self) -> f64 {
        f64::from_bits(self.summary.last_hashrate.load(Ordering::Relaxed))
    }

    pub fn get_chain(&self) -> Vec<Block> {
        self.state.read().blocks.clone()
    }

    pub fn get_pending_transactions(&self) -> Vec<String> {
        self.state.read().pending.clone()
    }

    pub fn latest_block(&self) -> Option<Block> {
        self.state.read().blocks.last().cloned()
    }

    pub fn len(&self) -> usize {
        self.state.read().blocks.len()
    }

    /// Lock-free counters; may trail an in-flight mutation.
    pub fn summary(&self) -> LedgerSummary {
        LedgerSummary {
            chain_len: self.summary.chain_len.load(Ordering::Relaxed),
            pending: self.summary.pending.load(Ordering::Relaxed),
            difficulty: self.summary.difficulty.load(Ordering::Relaxed),
            last_hashrate: self.last_hashrate(),
        }
    }

    /// Validate every non-genesis block against the current difficulty.
    pub fn validate(&self) -> Result<(), ChainError> {
        let state = self.state.read();
        validate_chain(&state.blocks, DifficultyCheck::Current(state.difficulty))
    }

    /// Validate every non-genesis block against the difficulty it was sealed at.
    pub fn validate_as_sealed(&self) -> Result<(), ChainError> {
        let state = self.state.read();
        validate_chain(&state.blocks, DifficultyCheck::AsSealed)
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Blocks, in chain order, with a transaction containing `query`
    /// case-insensitively.
    pub fn search_data(&self, query: &str) -> Vec<Block> {
        let needle = query.to_lowercase();
        let state = self.state.read();
        state
            .blocks
            .iter()
            .filter(|block| block.contains(&needle))
            .cloned()
            .collect()
    }

    fn store_hashrate(&self, hashrate: f64) {
        self.summary
            .last_hashrate
            .store(hashrate.to_bits(), Ordering::Relaxed);
    }
}

fn check_difficulty(difficulty: i64) -> Result<u32, ChainError> {
    if (0..=i64::from(MAX_DIFFICULTY)).contains(&difficulty) {
        Ok(difficulty as u32)
    } else {
        Err(ChainError::InvalidDifficulty(difficulty))
    }
}
