//! JSON messages exchanged with viewers over the websocket.
//!
//! Every message is an object with a `type` tag. Inbound messages are viewer
//! commands; outbound messages are pushes and per-command responses.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::blockchain::Block;
use crate::error::ChainError;

/// An encoded outbound message, shared between every queue it is pushed to.
pub type Payload = Arc<str>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    Hello {
        #[serde(default)]
        name: String,
    },
    Hashrate {
        #[serde(default)]
        hps: f64,
    },
    AddTransaction {
        #[serde(default)]
        data: String,
    },
    MineBlock,
    SetDifficulty {
        #[serde(default)]
        difficulty: Option<i64>,
    },
    SearchChain {
        #[serde(default)]
        query: String,
    },
    GetPending,
    GetChain,
}

impl Inbound {
    pub fn parse(text: &str) -> Result<Self, ChainError> {
        serde_json::from_str(text).map_err(|e| ChainError::InvalidInput(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub miners: usize,
    pub total_hashrate: f64,
    pub pending: usize,
    pub chain_len: usize,
    pub difficulty: u32,
    pub server_hashrate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiningStatus {
    pub mining: bool,
    pub block_index: u64,
    pub difficulty: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<Block>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<Block>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_results(mut self, results: Vec<Block>) -> Self {
        self.results = Some(results);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Metrics(Metrics),
    Chain { blocks: Vec<Block> },
    MiningStatus(MiningStatus),
    PendingTransactions { transactions: Vec<String> },
    AddTransactionResponse(CommandResponse),
    MineBlockResponse(CommandResponse),
    SetDifficultyResponse(CommandResponse),
    SearchChainResponse(CommandResponse),
    Error { message: String },
}

impl Outbound {
    pub fn encode(&self) -> Result<Payload, ChainError> {
        Ok(Arc::from(serde_json::to_string(self)?))
    }

    pub fn decode(text: &str) -> Result<Self, ChainError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            Inbound::parse(r#"{"type":"hello","name":"ada"}"#).unwrap(),
            Inbound::Hello { name: "ada".to_string() }
        );
        assert_eq!(
            Inbound::parse(r#"{"type":"mine_block"}"#).unwrap(),
            Inbound::MineBlock
        );
        assert_eq!(
            Inbound::parse(r#"{"type":"set_difficulty","difficulty":3}"#).unwrap(),
            Inbound::SetDifficulty { difficulty: Some(3) }
        );
        assert_eq!(
            Inbound::parse(r#"{"type":"set_difficulty"}"#).unwrap(),
            Inbound::SetDifficulty { difficulty: None }
        );
        assert_eq!(
            Inbound::parse(r#"{"type":"search_chain"}"#).unwrap(),
            Inbound::SearchChain { query: String::new() }
        );
    }

    #[test]
    fn test_malformed_command_is_invalid_input() {
        assert!(matches!(Inbound::parse("not json"), Err(ChainError::InvalidInput(_))));
        assert!(matches!(
            Inbound::parse(r#"{"type":"launch_rockets"}"#),
            Err(ChainError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_outbound_tags() {
        let metrics = Outbound::Metrics(Metrics {
            miners: 2,
            total_hashrate: 10.0,
            pending: 1,
            chain_len: 3,
            difficulty: 2,
            server_hashrate: 0.0,
        });
        let value: Value = serde_json::from_str(&metrics.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "metrics");
        assert_eq!(value["chain_len"], 3);

        let response = Outbound::SetDifficultyResponse(
            CommandResponse::ok("Difficulty updated").with_data(json!({ "difficulty": 4 })),
        );
        let value: Value = serde_json::from_str(&response.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "set_difficulty_response");
        assert_eq!(value["success"], true);
        assert_eq!(value["data"]["difficulty"], 4);
        assert!(value.get("block").is_none());
        assert!(value.get("results").is_none());
    }

    #[test]
    fn test_outbound_decode() {
        let text = r#"{"type":"mining_status","mining":true,"block_index":4,"difficulty":2}"#;
        assert_eq!(
            Outbound::decode(text).unwrap(),
            Outbound::MiningStatus(MiningStatus {
                mining: true,
                block_index: 4,
                difficulty: 2
            })
        );
    }
}
