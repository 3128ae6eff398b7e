//! Hub fan-out and live websocket sessions against a real listener

use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use blogochain::api::{self, build_api_router, AppState};
use blogochain::blockchain::Blockchain;
use blogochain::commands::Commands;
use blogochain::config::{HubConfig, SessionConfig};
use blogochain::hub::Hub;
use blogochain::protocol::{Outbound, Payload};

fn quiet_hub() -> HubConfig {
    HubConfig {
        tick_interval: Duration::from_secs(3600),
        viewer_queue_capacity: 256,
    }
}

#[tokio::test]
async fn test_stalled_viewer_dropped_others_receive_broadcast() {
    tokio::time::timeout(Duration::from_secs(10), async {
        let ledger = Arc::new(Blockchain::new(0).unwrap());
        let (hub, _task) = Hub::spawn(ledger, quiet_hub());

        let mut healthy: Vec<mpsc::Receiver<Payload>> = Vec::new();
        for _ in 0..49 {
            let (_id, rx) = hub.join();
            healthy.push(rx);
        }

        // Joined last with room for one message; after its snapshot nobody
        // reads it again.
        let (stalled_tx, mut stalled_rx) = mpsc::channel::<Payload>(1);
        let filler = stalled_tx.clone();
        hub.join_with(stalled_tx);
        let snapshot = stalled_rx.recv().await.expect("stalled viewer got no snapshot");
        assert!(matches!(Outbound::decode(&snapshot).unwrap(), Outbound::Chain { .. }));
        let _ = filler.try_send(Payload::from("stall"));

        let announcement = Outbound::PendingTransactions {
            transactions: vec!["announcement".to_string()],
        };
        hub.broadcast(&announcement);

        assert_eq!(hub.stats().await.unwrap().viewers, 49);

        for rx in healthy.iter_mut() {
            loop {
                let payload = rx.recv().await.expect("healthy viewer queue closed");
                if Outbound::decode(&payload).unwrap() == announcement {
                    break;
                }
            }
        }
    })
    .await
    .expect("test_stalled_viewer_dropped_others_receive_broadcast timed out");
}

type Client = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn start_server() -> (String, Commands) {
    start_server_with(SessionConfig::default()).await
}

async fn start_server_with(session: SessionConfig) -> (String, Commands) {
    let ledger = Arc::new(Blockchain::new(0).unwrap());
    let (hub, _task) = Hub::spawn(Arc::clone(&ledger), quiet_hub());
    let commands = Commands::new(ledger, hub);
    let state = AppState::new(commands.clone(), session);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(api::serve(listener, build_api_router(state, "web")));

    (format!("ws://{}/ws", addr), commands)
}

async fn next_message(client: &mut Client) -> Outbound {
    loop {
        match client.next().await.expect("socket closed").expect("socket error") {
            Message::Text(text) => return Outbound::decode(&text).expect("undecodable frame"),
            _ => continue,
        }
    }
}

async fn send(client: &mut Client, value: serde_json::Value) {
    client.send(Message::Text(value.to_string())).await.unwrap();
}

#[tokio::test]
async fn test_websocket_viewer_session() {
    tokio::time::timeout(Duration::from_secs(10), async {
        let (url, commands) = start_server().await;
        let (mut client, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

        // Initial chain snapshot arrives unprompted.
        loop {
            if let Outbound::Chain { blocks } = next_message(&mut client).await {
                assert_eq!(blocks.len(), 1);
                break;
            }
        }

        send(&mut client, json!({"type": "hello", "name": "alice"})).await;
        send(&mut client, json!({"type": "hashrate", "hps": 42.0})).await;
        send(&mut client, json!({"type": "add_transaction", "data": "hello over ws"})).await;
        loop {
            if let Outbound::AddTransactionResponse(r) = next_message(&mut client).await {
                assert!(r.success);
                break;
            }
        }
        let stats = commands.hub().stats().await.unwrap();
        assert_eq!(stats.viewers, 1);
        assert_eq!(stats.total_hashrate, 42.0);

        send(&mut client, json!({"type": "mine_block"})).await;
        let mut sequence = Vec::new();
        loop {
            match next_message(&mut client).await {
                Outbound::Metrics(_) => continue,
                Outbound::MiningStatus(s) => sequence.push(if s.mining { "start" } else { "stop" }),
                Outbound::Chain { blocks } => {
                    assert_eq!(blocks.len(), 2);
                    assert_eq!(blocks[1].transactions, vec!["hello over ws".to_string()]);
                    sequence.push("chain");
                }
                Outbound::MineBlockResponse(r) => {
                    assert!(r.success);
                    sequence.push("response");
                    break;
                }
                other => panic!("unexpected message {:?}", other),
            }
        }
        assert_eq!(sequence, vec!["start", "stop", "chain", "response"]);

        client.send(Message::Text("not json".to_string())).await.unwrap();
        loop {
            if let Outbound::Error { .. } = next_message(&mut client).await {
                break;
            }
        }

        send(&mut client, json!({"type": "set_difficulty", "difficulty": -3})).await;
        loop {
            if let Outbound::SetDifficultyResponse(r) = next_message(&mut client).await {
                assert!(!r.success);
                break;
            }
        }

        client.close(None).await.unwrap();
        for _ in 0..50 {
            if commands.hub().stats().await.unwrap().viewers == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("viewer was not unregistered after close");
    })
    .await
    .expect("test_websocket_viewer_session timed out");
}

#[tokio::test]
async fn test_mining_is_announced_to_every_viewer() {
    tokio::time::timeout(Duration::from_secs(10), async {
        let (url, commands) = start_server().await;
        let (mut a, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        let (mut b, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

        for _ in 0..50 {
            if commands.hub().stats().await.unwrap().viewers == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        send(&mut a, json!({"type": "add_transaction", "data": "shared"})).await;
        send(&mut a, json!({"type": "mine_block"})).await;

        for client in [&mut a, &mut b] {
            loop {
                if let Outbound::Chain { blocks } = next_message(client).await {
                    if blocks.len() == 2 {
                        break;
                    }
                }
            }
        }
    })
    .await
    .expect("test_mining_is_announced_to_every_viewer timed out");
}

fn fast_liveness() -> SessionConfig {
    SessionConfig {
        ping_interval: Duration::from_millis(50),
        pong_timeout: Duration::from_millis(150),
        ..SessionConfig::default()
    }
}

async fn wait_for_viewers(commands: &Commands, expected: usize) {
    loop {
        if commands.hub().stats().await.unwrap().viewers == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_silent_viewer_disconnected_after_pong_timeout() {
    tokio::time::timeout(Duration::from_secs(5), async {
        let (url, commands) = start_server_with(fast_liveness()).await;

        // Never polled, so no pong is ever written back.
        let (_client, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        wait_for_viewers(&commands, 1).await;
        wait_for_viewers(&commands, 0).await;
    })
    .await
    .expect("test_silent_viewer_disconnected_after_pong_timeout timed out");
}

#[tokio::test]
async fn test_quiet_connection_is_pinged_and_kept_alive() {
    tokio::time::timeout(Duration::from_secs(5), async {
        let (url, commands) = start_server_with(fast_liveness()).await;
        let (mut client, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

        loop {
            match client.next().await.expect("socket closed").expect("socket error") {
                Message::Ping(_) => break,
                _ => continue,
            }
        }

        // Reading keeps answering pings, well past the pong timeout.
        let keep_reading = async {
            while let Some(frame) = client.next().await {
                frame.expect("socket error");
            }
        };
        let _ = tokio::time::timeout(Duration::from_millis(500), keep_reading).await;

        assert_eq!(commands.hub().stats().await.unwrap().viewers, 1);
    })
    .await
    .expect("test_quiet_connection_is_pinged_and_kept_alive timed out");
}
