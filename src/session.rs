//! Per-connection viewer session
//!
//! A session runs two tasks over one websocket: a reader that decodes one
//! command at a time and dispatches it, and a writer that drains the viewer's
//! outbound queue in order and pings when the queue has been quiet. When
//! either side finishes, the other is cancelled and the viewer leaves the hub.

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::commands::{failure_message, Commands};
use crate::config::SessionConfig;
use crate::hub::ViewerId;
use crate::protocol::{CommandResponse, Inbound, Outbound, Payload};

/// The command-handling half of a session. Owns the viewer's display name;
/// all output goes through the hub to the viewer's queue.
#[derive(Debug)]
pub struct ViewerSession {
    id: ViewerId,
    name: Option<String>,
    commands: Commands,
}

impl ViewerSession {
    pub fn new(id: ViewerId, commands: Commands) -> Self {
        Self {
            id,
            name: None,
            commands,
        }
    }

    pub fn id(&self) -> ViewerId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Decode and dispatch one inbound text frame. Undecodable input is
    /// answered with an `error` message.
    pub async fn handle_text(&mut self, text: &str) {
        match Inbound::parse(text) {
            Ok(command) => self.dispatch(command).await,
            Err(e) => {
                debug!(viewer = self.id, error = %e, "unparsable viewer message");
                self.reply(Outbound::Error {
                    message: failure_message(&e),
                });
            }
        }
    }

    pub async fn dispatch(&mut self, command: Inbound) {
        match command {
            Inbound::Hello { name } => {
                self.commands.hub().set_name(self.id, name.clone());
                self.name = Some(name);
            }
            Inbound::Hashrate { hps } => self.commands.hub().set_hashrate(self.id, hps),
            Inbound::AddTransaction { data } => self.add_transaction(data).await,
            Inbound::MineBlock => self.mine_block().await,
            Inbound::SetDifficulty { difficulty } => self.set_difficulty(difficulty).await,
            Inbound::SearchChain { query } => self.search_chain(query).await,
            Inbound::GetPending => match self.commands.pending().await {
                Ok(transactions) => self.reply(Outbound::PendingTransactions { transactions }),
                Err(e) => self.reply_error(&e),
            },
            Inbound::GetChain => match self.commands.chain().await {
                Ok(blocks) => self.reply(Outbound::Chain { blocks }),
                Err(e) => self.reply_error(&e),
            },
        }
    }

    async fn add_transaction(&self, data: String) {
        let response = match self.commands.add_transaction(data).await {
            Ok(pending) => {
                info!(viewer = self.id, pending, "transaction added");
                CommandResponse::ok("Transaction added successfully")
            }
            Err(e) => CommandResponse::failed(failure_message(&e)),
        };
        self.reply(Outbound::AddTransactionResponse(response));
    }

    async fn mine_block(&self) {
        info!(viewer = self.id, "mining block requested");
        let response = match self.commands.mine_block().await {
            Ok(Some(block)) => {
                info!(viewer = self.id, index = block.index, "block mined");
                CommandResponse::ok("Block mined successfully").with_data(json!({ "block": block }))
            }
            Ok(None) => CommandResponse::failed("No pending transactions to mine"),
            Err(e) => CommandResponse::failed(failure_message(&e)),
        };
        self.reply(Outbound::MineBlockResponse(response));
    }

    async fn set_difficulty(&self, difficulty: Option<i64>) {
        let response = match self.commands.set_difficulty(difficulty).await {
            Ok(difficulty) => {
                info!(viewer = self.id, difficulty, "difficulty set");
                CommandResponse::ok("Difficulty updated")
                    .with_data(json!({ "difficulty": difficulty }))
            }
            Err(e) => CommandResponse::failed(failure_message(&e)),
        };
        self.reply(Outbound::SetDifficultyResponse(response));
    }

    async fn search_chain(&self, query: String) {
        let response = match self.commands.search(query.clone()).await {
            Ok(results) => {
                info!(viewer = self.id, query = %query, results = results.len(), "search");
                CommandResponse::ok("Search completed").with_results(results)
            }
            Err(e) => CommandResponse::failed(failure_message(&e)),
        };
        self.reply(Outbound::SearchChainResponse(response));
    }

    fn reply(&self, message: Outbound) {
        self.commands.hub().send_to(self.id, &message);
    }

    fn reply_error(&self, err: &crate::error::ChainError) {
        self.reply(Outbound::Error {
            message: failure_message(err),
        });
    }
}

/// Drive a websocket connection until it closes, times out, or the hub drops
/// the viewer.
pub async fn run(socket: WebSocket, commands: Commands, config: SessionConfig) {
    let (id, queue) = commands.hub().join();
    info!(viewer = id, "viewer connected");

    let (sink, stream) = socket.split();
    let session = ViewerSession::new(id, commands.clone());

    let mut writer = tokio::spawn(write_pump(id, sink, queue, config.clone()));
    let mut reader = tokio::spawn(read_pump(session, stream, config));

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    commands.hub().leave(id);
    info!(viewer = id, "viewer disconnected");
}

async fn read_pump(mut session: ViewerSession, mut stream: SplitStream<WebSocket>, config: SessionConfig) {
    let id = session.id();
    loop {
        // Any inbound frame, pongs included, refreshes the deadline.
        let frame = match time::timeout(config.pong_timeout, stream.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                debug!(viewer = id, error = %e, "read failed");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                warn!(viewer = id, "viewer missed liveness deadline");
                break;
            }
        };

        match frame {
            Message::Text(text) => session.handle_text(&text).await,
            Message::Close(_) => break,
            Message::Binary(_) => debug!(viewer = id, "ignoring binary frame"),
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}

async fn write_pump(
    id: ViewerId,
    mut sink: SplitSink<WebSocket, Message>,
    mut queue: mpsc::Receiver<Payload>,
    config: SessionConfig,
) {
    let ping = time::sleep(config.ping_interval);
    tokio::pin!(ping);

    loop {
        tokio::select! {
            payload = queue.recv() => {
                let Some(payload) = payload else {
                    // The hub closed the queue.
                    let _ = time::timeout(config.write_timeout, sink.send(Message::Close(None))).await;
                    break;
                };
                if !send_frame(&mut sink, Message::Text(payload.to_string()), &config).await {
                    debug!(viewer = id, "write failed");
                    break;
                }
                ping.as_mut().reset(Instant::now() + config.ping_interval);
            }
            _ = &mut ping => {
                if !send_frame(&mut sink, Message::Ping(Vec::new()), &config).await {
                    debug!(viewer = id, "ping failed");
                    break;
                }
                ping.as_mut().reset(Instant::now() + config.ping_interval);
            }
        }
    }
}

async fn send_frame(sink: &mut SplitSink<WebSocket, Message>, frame: Message, config: &SessionConfig) -> bool {
    matches!(time::timeout(config.write_timeout, sink.send(frame)).await, Ok(Ok(())))
}
