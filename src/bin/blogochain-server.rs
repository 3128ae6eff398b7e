#![forbid(unsafe_code)]
//! Blogochain server: ledger, viewer hub, JSON API and web interface in one
//! process

use blogochain::config::load_config;
use blogochain::node::{init_tracing, Node};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    init_tracing(&config.log_level);

    let node = Node::init(config)?;
    node.start().await?;
    Ok(())
}
