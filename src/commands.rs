//! Ledger commands shared by the websocket sessions and the HTTP routes.
//!
//! Each call runs the synchronous ledger operation on the blocking pool and
//! publishes whatever the viewers should hear about the change.

use std::sync::Arc;

use crate::blockchain::{Block, Blockchain};
use crate::error::ChainError;
use crate::hub::HubHandle;
use crate::protocol::{MiningStatus, Outbound};

#[derive(Debug, Clone)]
pub struct Commands {
    ledger: Arc<Blockchain>,
    hub: HubHandle,
}

/// Result of a chain validation pass.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub blocks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Commands {
    pub fn new(ledger: Arc<Blockchain>, hub: HubHandle) -> Self {
        Self { ledger, hub }
    }

    pub fn ledger(&self) -> &Arc<Blockchain> {
        &self.ledger
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Append `data` to the pending pool. Returns the new pending count.
    pub async fn add_transaction(&self, data: String) -> Result<usize, ChainError> {
        if data.is_empty() {
            return Err(ChainError::InvalidInput(
                "Transaction data cannot be empty".to_string(),
            ));
        }
        let pending = self
            .blocking(move |ledger| {
                ledger.add_transaction(data);
                ledger.summary().pending
            })
            .await?;
        self.hub.publish_metrics();
        Ok(pending)
    }

    /// Seal the pending pool into a block, telling every viewer before and
    /// after. `None` means there was nothing to mine.
    ///
    /// The seal and its announcements run on their own task, so dropping the
    /// caller mid-seal still leaves every viewer with the new chain.
    pub async fn mine_block(&self) -> Result<Option<Block>, ChainError> {
        let commands = self.clone();
        tokio::spawn(async move { commands.seal_and_announce().await }).await?
    }

    async fn seal_and_announce(&self) -> Result<Option<Block>, ChainError> {
        let summary = self.ledger.summary();
        let mut status = MiningStatus {
            mining: true,
            block_index: summary.chain_len as u64,
            difficulty: summary.difficulty,
        };
        self.hub.broadcast(&Outbound::MiningStatus(status.clone()));

        let mined = self.blocking(|ledger| ledger.mine_block()).await;

        status.mining = false;
        self.hub.broadcast(&Outbound::MiningStatus(status));

        let mined = mined?;
        if mined.is_some() {
            let blocks = self.blocking(|ledger| ledger.get_chain()).await?;
            self.hub.broadcast(&Outbound::Chain { blocks });
            self.hub.publish_metrics();
        }
        Ok(mined)
    }

    pub async fn set_difficulty(&self, difficulty: Option<i64>) -> Result<u32, ChainError> {
        let difficulty = difficulty.ok_or_else(|| {
            ChainError::InvalidInput("Difficulty value is required".to_string())
        })?;
        let difficulty = self
            .blocking(move |ledger| ledger.set_difficulty(difficulty))
            .await??;
        self.hub.publish_metrics();
        Ok(difficulty)
    }

    pub async fn search(&self, query: String) -> Result<Vec<Block>, ChainError> {
        if query.is_empty() {
            return Err(ChainError::InvalidInput(
                "Query parameter is required".to_string(),
            ));
        }
        self.blocking(move |ledger| ledger.search_data(&query)).await
    }

    pub async fn pending(&self) -> Result<Vec<String>, ChainError> {
        self.blocking(|ledger| ledger.get_pending_transactions()).await
    }

    pub async fn chain(&self) -> Result<Vec<Block>, ChainError> {
        self.blocking(|ledger| ledger.get_chain()).await
    }

    pub async fn difficulty(&self) -> Result<u32, ChainError> {
        self.blocking(|ledger| ledger.get_difficulty()).await
    }

    pub async fn validate(&self) -> Result<ValidationReport, ChainError> {
        self.blocking(|ledger| {
            let result = ledger.validate();
            ValidationReport {
                valid: result.is_ok(),
                blocks: ledger.len(),
                error: result.err().map(|e| e.to_string()),
            }
        })
        .await
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, ChainError>
    where
        F: FnOnce(&Blockchain) -> T + Send + 'static,
        T: Send + 'static,
    {
        let ledger = Arc::clone(&self.ledger);
        Ok(tokio::task::spawn_blocking(move || op(&ledger)).await?)
    }
}

/// Message text for a failed command, without the error-kind prefix.
pub fn failure_message(err: &ChainError) -> String {
    match err {
        ChainError::InvalidInput(msg) => msg.clone(),
        other => other.to_string(),
    }
}
