use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::merkle::{merkle_root, sha256_hex};

/// Nonce interval between mining progress events.
const PROGRESS_INTERVAL: u64 = 10_000;

/// A hex SHA-256 digest has 64 characters, so no larger target can be met.
pub const MAX_DIFFICULTY: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub transactions: Vec<String>,
    pub prev_hash: String,
    pub hash: String,
    pub nonce: u64,
    pub merkle_root: String,
    /// Difficulty in force when the block was sealed. Not covered by `hash`.
    #[serde(default)]
    pub difficulty: u32,
}

/// Outcome of a nonce search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MiningReport {
    pub attempts: u64,
    pub elapsed: Duration,
}

impl MiningReport {
    /// Hashes per second over the whole search.
    pub fn hashrate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.attempts as f64 / secs
        } else {
            0.0
        }
    }
}

impl Block {
    pub fn new(index: u64, transactions: Vec<String>, prev_hash: impl Into<String>) -> Self {
        let merkle_root = merkle_root(&transactions);
        let mut block = Block {
            index,
            timestamp: Utc::now(),
            transactions,
            prev_hash: prev_hash.into(),
            hash: String::new(),
            nonce: 0,
            merkle_root,
            difficulty: 0,
        };
        block.hash = block.calculate_hash();
        block
    }

    /// Commitment over index, timestamp, concatenated transactions, nonce and
    /// predecessor hash. The Merkle root is derived from the transactions and
    /// is not hashed a second time.
    pub fn calculate_hash(&self) -> String {
        let data = format!(
            "{}{}{}{}{}",
            self.index,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.transactions.concat(),
            self.nonce,
            self.prev_hash
        );
        sha256_hex(data.as_bytes())
    }

    /// Brute-force nonce search from zero until the hash has `difficulty`
    /// leading `'0'` characters.
    pub fn mine(&mut self, difficulty: u32) -> MiningReport {
        let start = Instant::now();
        let mut attempts = 0u64;
        self.nonce = 0;
        self.difficulty = difficulty;

        loop {
            self.hash = self.calculate_hash();
            attempts += 1;
            if meets_difficulty(&self.hash, difficulty) {
                break;
            }
            self.nonce += 1;

            if self.nonce % PROGRESS_INTERVAL == 0 {
                debug!(index = self.index, nonce = self.nonce, hash = %self.hash, "mining in progress");
            }
        }

        let report = MiningReport {
            attempts,
            elapsed: start.elapsed(),
        };
        info!(
            index = self.index,
            nonce = self.nonce,
            hash = %self.hash,
            hashrate = report.hashrate(),
            "block sealed"
        );
        report
    }

    /// Self-consistency and proof-of-work at `difficulty`. Linkage to the
    /// predecessor is checked by the chain.
    pub fn is_valid(&self, difficulty: u32) -> bool {
        meets_difficulty(&self.hash, difficulty) && self.hash == self.calculate_hash()
    }

    pub fn contains(&self, needle_lowercase: &str) -> bool {
        self.transactions
            .iter()
            .any(|tx| tx.to_lowercase().contains(needle_lowercase))
    }
}

/// True if the first `difficulty` characters of `hash` are all `'0'`.
pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
    let required = difficulty as usize;
    hash.len() >= required && hash.bytes().take(required).all(|b| b == b'0')
}
