//! Merkle commitment over an ordered list of transaction strings.
//!
//! Leaves are the hex SHA-256 of each transaction. Each parent is the hex
//! SHA-256 of its two children's hex strings concatenated. A level with an
//! odd count duplicates its last node before pairing.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Merkle root of `transactions`; the empty list commits to `""`.
///
/// Folds one level at a time until a single node is left.
pub fn merkle_root<S: AsRef<str>>(transactions: &[S]) -> String {
    let mut level: Vec<String> = transactions
        .iter()
        .map(|tx| sha256_hex(tx.as_ref().as_bytes()))
        .collect();
    if level.is_empty() {
        return String::new();
    }

    while level.len() > 1 {
        if level.len() % 2 != 0 {
            if let Some(last) = level.last().cloned() {
                level.push(last);
            }
        }

        level = level
            .chunks_exact(2)
            .map(|pair| {
                let mut combined = String::with_capacity(pair[0].len() + pair[1].len());
                combined.push_str(&pair[0]);
                combined.push_str(&pair[1]);
                sha256_hex(combined.as_bytes())
            })
            .collect();
    }

    level.pop().unwrap_or_default()
}
