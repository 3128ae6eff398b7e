//! Broadcast hub for connected viewers
//!
//! A single task owns the viewer registry. Everything else talks to it through
//! [`HubHandle`], which only posts events onto the hub's queue. Each viewer has
//! a bounded outbound queue; a viewer whose queue is full is dropped rather
//! than allowed to hold up the hub or the other viewers.
//!
//! A new viewer gets the full chain before anything else. Until that snapshot
//! is delivered, messages for it wait in a backlog of the same capacity.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::blockchain::{Block, Blockchain};
use crate::config::HubConfig;
use crate::protocol::{Metrics, Outbound, Payload};

pub type ViewerId = u64;

/// Registry counters reported by [`HubHandle::stats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HubStats {
    pub viewers: usize,
    pub total_hashrate: f64,
}

#[derive(Debug)]
enum HubEvent {
    Join {
        id: ViewerId,
        queue: mpsc::Sender<Payload>,
    },
    Welcome {
        id: ViewerId,
        blocks: Vec<Block>,
    },
    Leave {
        id: ViewerId,
    },
    Broadcast(Payload),
    SendTo {
        id: ViewerId,
        payload: Payload,
    },
    Hashrate {
        id: ViewerId,
        hps: f64,
    },
    Rename {
        id: ViewerId,
        name: String,
    },
    PublishMetrics,
    Stats(oneshot::Sender<HubStats>),
}

#[derive(Debug)]
struct ViewerEntry {
    queue: mpsc::Sender<Payload>,
    hashrate: f64,
    name: Option<String>,
    /// Held until the chain snapshot goes out; `None` once it has.
    backlog: Option<Vec<Payload>>,
}

/// Cheap, cloneable entry point to the hub task.
#[derive(Debug, Clone)]
pub struct HubHandle {
    events: mpsc::UnboundedSender<HubEvent>,
    next_id: Arc<AtomicU64>,
    queue_capacity: usize,
}

impl HubHandle {
    /// Register a viewer with a fresh outbound queue of the configured
    /// capacity. The receiver is the viewer's end of that queue.
    pub fn join(&self) -> (ViewerId, mpsc::Receiver<Payload>) {
        let (queue, receiver) = mpsc::channel(self.queue_capacity);
        (self.join_with(queue), receiver)
    }

    /// Register a viewer that supplies its own outbound queue.
    pub fn join_with(&self, queue: mpsc::Sender<Payload>) -> ViewerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.post(HubEvent::Join { id, queue });
        id
    }

    pub fn leave(&self, id: ViewerId) {
        self.post(HubEvent::Leave { id });
    }

    /// Queue `message` for every registered viewer.
    pub fn broadcast(&self, message: &Outbound) {
        match message.encode() {
            Ok(payload) => self.broadcast_payload(payload),
            Err(e) => warn!(error = %e, "failed to encode broadcast"),
        }
    }

    pub fn broadcast_payload(&self, payload: Payload) {
        self.post(HubEvent::Broadcast(payload));
    }

    /// Queue `message` for one viewer only.
    pub fn send_to(&self, id: ViewerId, message: &Outbound) {
        match message.encode() {
            Ok(payload) => self.post(HubEvent::SendTo { id, payload }),
            Err(e) => warn!(viewer = id, error = %e, "failed to encode message"),
        }
    }

    pub fn set_hashrate(&self, id: ViewerId, hps: f64) {
        self.post(HubEvent::Hashrate { id, hps });
    }

    pub fn set_name(&self, id: ViewerId, name: String) {
        self.post(HubEvent::Rename { id, name });
    }

    /// Push a metrics snapshot to every viewer now, outside the regular tick.
    pub fn publish_metrics(&self) {
        self.post(HubEvent::PublishMetrics);
    }

    /// Current registry counters, or `None` once the hub has stopped.
    pub async fn stats(&self) -> Option<HubStats> {
        let (reply, response) = oneshot::channel();
        self.post(HubEvent::Stats(reply));
        response.await.ok()
    }

    fn post(&self, event: HubEvent) {
        if self.events.send(event).is_err() {
            debug!("hub stopped; event discarded");
        }
    }
}

pub struct Hub {
    ledger: Arc<Blockchain>,
    config: HubConfig,
    events: mpsc::UnboundedReceiver<HubEvent>,
    /// Routes asynchronously built snapshots back through the queue without
    /// keeping the hub alive on its own.
    loopback: mpsc::WeakUnboundedSender<HubEvent>,
    viewers: HashMap<ViewerId, ViewerEntry>,
}

impl Hub {
    /// Start the hub task. It runs until every [`HubHandle`] has been dropped.
    pub fn spawn(ledger: Arc<Blockchain>, config: HubConfig) -> (HubHandle, JoinHandle<()>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = HubHandle {
            events: events_tx.clone(),
            next_id: Arc::new(AtomicU64::new(1)),
            queue_capacity: config.viewer_queue_capacity,
        };
        let hub = Hub {
            ledger,
            config,
            events: events_rx,
            loopback: events_tx.downgrade(),
            viewers: HashMap::new(),
        };
        let task = tokio::spawn(hub.run());
        (handle, task)
    }

    async fn run(mut self) {
        let mut ticker = time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(tick = ?self.config.tick_interval, "hub started");

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
                _ = ticker.tick() => self.broadcast_metrics(),
            }
        }

        info!("hub stopped");
    }

    fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::Join { id, queue } => {
                info!(viewer = id, "viewer registered");
                self.viewers.insert(
                    id,
                    ViewerEntry {
                        queue,
                        hashrate: 0.0,
                        name: None,
                        backlog: Some(Vec::new()),
                    },
                );
                self.snapshot_chain_for(id);
            }
            HubEvent::Welcome { id, blocks } => self.welcome(id, blocks),
            HubEvent::Leave { id } => {
                if let Some(entry) = self.viewers.remove(&id) {
                    info!(viewer = id, name = ?entry.name, "viewer unregistered");
                    self.broadcast_metrics();
                }
            }
            HubEvent::Broadcast(payload) => self.broadcast(payload),
            HubEvent::SendTo { id, payload } => {
                self.deliver(id, payload);
            }
            HubEvent::Hashrate { id, hps } => {
                if let Some(entry) = self.viewers.get_mut(&id) {
                    entry.hashrate = hps;
                }
            }
            HubEvent::Rename { id, name } => {
                if let Some(entry) = self.viewers.get_mut(&id) {
                    debug!(viewer = id, name = %name, "viewer named");
                    entry.name = Some(name);
                }
            }
            HubEvent::PublishMetrics => self.broadcast_metrics(),
            HubEvent::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn stats(&self) -> HubStats {
        HubStats {
            viewers: self.viewers.len(),
            total_hashrate: self.viewers.values().map(|v| v.hashrate).sum(),
        }
    }

    /// Try to queue `payload` for one viewer, dropping it if its queue is
    /// full or closed. Returns whether the viewer is still registered.
    fn deliver(&mut self, id: ViewerId, payload: Payload) -> bool {
        let capacity = self.config.viewer_queue_capacity;
        let Some(entry) = self.viewers.get_mut(&id) else {
            return false;
        };
        if let Some(backlog) = entry.backlog.as_mut() {
            if hold(backlog, payload, capacity) {
                return true;
            }
            warn!(viewer = id, "viewer backlog full; dropping viewer");
            self.viewers.remove(&id);
            return false;
        }
        match entry.queue.try_send(payload) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(viewer = id, "viewer queue full; dropping viewer");
                self.viewers.remove(&id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(viewer = id, "viewer queue closed; dropping viewer");
                self.viewers.remove(&id);
                false
            }
        }
    }

    fn broadcast(&mut self, payload: Payload) {
        let capacity = self.config.viewer_queue_capacity;
        let dead: Vec<ViewerId> = self
            .viewers
            .iter_mut()
            .filter_map(|(id, entry)| {
                let queued = match entry.backlog.as_mut() {
                    Some(backlog) => hold(backlog, Arc::clone(&payload), capacity),
                    None => entry.queue.try_send(Arc::clone(&payload)).is_ok(),
                };
                (!queued).then_some(*id)
            })
            .collect();

        for id in dead {
            warn!(viewer = id, "viewer queue full or closed on broadcast; dropping viewer");
            self.viewers.remove(&id);
        }
    }

    fn broadcast_metrics(&mut self) {
        if self.viewers.is_empty() {
            return;
        }
        let summary = self.ledger.summary();
        let stats = self.stats();
        let metrics = Outbound::Metrics(Metrics {
            miners: stats.viewers,
            total_hashrate: stats.total_hashrate,
            pending: summary.pending,
            chain_len: summary.chain_len,
            difficulty: summary.difficulty,
            server_hashrate: summary.last_hashrate,
        });
        match metrics.encode() {
            Ok(payload) => self.broadcast(payload),
            Err(e) => warn!(error = %e, "failed to encode metrics"),
        }
    }

    /// The chain is copied under the ledger's read lock, which can wait behind
    /// a queued writer, so the snapshot is taken off the hub task and comes
    /// back as a [`HubEvent::Welcome`].
    fn snapshot_chain_for(&self, id: ViewerId) {
        let Some(loopback) = self.loopback.upgrade() else {
            return;
        };
        let ledger = Arc::clone(&self.ledger);
        tokio::spawn(async move {
            match tokio::task::spawn_blocking(move || ledger.get_chain()).await {
                Ok(blocks) => {
                    let _ = loopback.send(HubEvent::Welcome { id, blocks });
                }
                Err(e) => warn!(viewer = id, error = %e, "chain snapshot failed"),
            }
        });
    }

    /// Deliver the snapshot, then whatever was held for the viewer, then tell
    /// everyone about the new viewer.
    fn welcome(&mut self, id: ViewerId, blocks: Vec<Block>) {
        if !self.viewers.contains_key(&id) {
            return;
        }
        // A block sealed after the copy was taken may already be announced.
        if blocks.len() < self.ledger.summary().chain_len {
            debug!(viewer = id, "chain snapshot outdated; taking another");
            self.snapshot_chain_for(id);
            return;
        }

        let backlog = self
            .viewers
            .get_mut(&id)
            .and_then(|entry| entry.backlog.take())
            .unwrap_or_default();
        match (Outbound::Chain { blocks }).encode() {
            Ok(payload) => {
                if !self.deliver(id, payload) {
                    return;
                }
            }
            Err(e) => warn!(viewer = id, error = %e, "failed to encode chain"),
        }
        for payload in backlog {
            if !self.deliver(id, payload) {
                return;
            }
        }

        debug!(viewer = id, "viewer caught up");
        self.broadcast_metrics();
    }
}

fn hold(backlog: &mut Vec<Payload>, payload: Payload, capacity: usize) -> bool {
    if backlog.len() >= capacity {
        return false;
    }
    backlog.push(payload);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config(capacity: usize) -> HubConfig {
        HubConfig {
            tick_interval: Duration::from_secs(3600),
            viewer_queue_capacity: capacity,
        }
    }

    async fn next_outbound(rx: &mut mpsc::Receiver<Payload>) -> Outbound {
        let payload = rx.recv().await.expect("queue closed");
        Outbound::decode(&payload).expect("undecodable payload")
    }

    #[tokio::test]
    async fn test_join_receives_chain_and_metrics() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let ledger = Arc::new(Blockchain::new(0).unwrap());
            let (hub, _task) = Hub::spawn(ledger, test_config(16));

            let (_id, mut rx) = hub.join();
            match next_outbound(&mut rx).await {
                Outbound::Chain { blocks } => assert_eq!(blocks.len(), 1),
                other => panic!("expected chain first, got {:?}", other),
            }
            match next_outbound(&mut rx).await {
                Outbound::Metrics(m) => {
                    assert_eq!(m.miners, 1);
                    assert_eq!(m.chain_len, 1);
                }
                other => panic!("expected metrics second, got {:?}", other),
            }
        })
        .await
        .expect("test_join_receives_chain_and_metrics timed out");
    }

    #[tokio::test]
    async fn test_hashrate_and_leave_update_stats() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let ledger = Arc::new(Blockchain::new(0).unwrap());
            let (hub, _task) = Hub::spawn(ledger, test_config(64));

            let (a, _rx_a) = hub.join();
            let (b, _rx_b) = hub.join();
            hub.set_hashrate(a, 100.0);
            hub.set_hashrate(b, 50.5);

            let stats = hub.stats().await.unwrap();
            assert_eq!(stats.viewers, 2);
            assert_eq!(stats.total_hashrate, 150.5);

            hub.leave(a);
            let stats = hub.stats().await.unwrap();
            assert_eq!(stats.viewers, 1);
            assert_eq!(stats.total_hashrate, 50.5);
        })
        .await
        .expect("test_hashrate_and_leave_update_stats timed out");
    }

    #[tokio::test]
    async fn test_send_to_reaches_only_target() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let ledger = Arc::new(Blockchain::new(0).unwrap());
            let (hub, _task) = Hub::spawn(ledger, test_config(64));

            let (a, mut rx_a) = hub.join();
            let (_b, mut rx_b) = hub.join();
            let message = Outbound::Error { message: "only a".to_string() };
            hub.send_to(a, &message);
            hub.broadcast(&Outbound::Error { message: "everyone".to_string() });

            let mut seen_direct = false;
            loop {
                match next_outbound(&mut rx_a).await {
                    Outbound::Error { message } if message == "only a" => seen_direct = true,
                    Outbound::Error { message } if message == "everyone" => break,
                    _ => {}
                }
            }
            assert!(seen_direct);

            loop {
                match next_outbound(&mut rx_b).await {
                    Outbound::Error { message } => {
                        assert_eq!(message, "everyone");
                        break;
                    }
                    _ => {}
                }
            }
        })
        .await
        .expect("test_send_to_reaches_only_target timed out");
    }

    #[tokio::test]
    async fn test_full_queue_drops_viewer() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let ledger = Arc::new(Blockchain::new(0).unwrap());
            let (hub, _task) = Hub::spawn(ledger, test_config(64));

            let (stalled_tx, mut stalled_rx) = mpsc::channel(1);
            hub.join_with(stalled_tx);
            for i in 0..4 {
                hub.broadcast(&Outbound::Error { message: format!("msg-{}", i) });
            }

            // The snapshot fits; the held broadcasts overflow and close the queue.
            let first = stalled_rx.recv().await.unwrap();
            assert!(matches!(Outbound::decode(&first).unwrap(), Outbound::Chain { .. }));
            assert!(stalled_rx.recv().await.is_none());

            let stats = hub.stats().await.unwrap();
            assert_eq!(stats.viewers, 0);
        })
        .await
        .expect("test_full_queue_drops_viewer timed out");
    }

    #[tokio::test]
    async fn test_messages_before_snapshot_are_held_in_order() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let ledger = Arc::new(Blockchain::new(0).unwrap());
            let (hub, _task) = Hub::spawn(ledger, test_config(16));

            let (id, mut rx) = hub.join();
            hub.send_to(id, &Outbound::Error { message: "direct".to_string() });
            hub.broadcast(&Outbound::Error { message: "broadcast".to_string() });

            assert!(matches!(next_outbound(&mut rx).await, Outbound::Chain { .. }));
            assert_eq!(
                next_outbound(&mut rx).await,
                Outbound::Error { message: "direct".to_string() }
            );
            assert_eq!(
                next_outbound(&mut rx).await,
                Outbound::Error { message: "broadcast".to_string() }
            );
            assert!(matches!(next_outbound(&mut rx).await, Outbound::Metrics(_)));
        })
        .await
        .expect("test_messages_before_snapshot_are_held_in_order timed out");
    }

    #[tokio::test]
    async fn test_snapshot_taken_after_seal_is_current() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let ledger = Arc::new(Blockchain::new(0).unwrap());
            let (hub, _task) = Hub::spawn(Arc::clone(&ledger), test_config(16));

            let (_id, mut rx) = hub.join();
            ledger.add_transaction("sealed while joining");
            ledger.mine_block().unwrap();

            match next_outbound(&mut rx).await {
                Outbound::Chain { blocks } => assert_eq!(blocks.len(), ledger.len()),
                other => panic!("expected chain first, got {:?}", other),
            }
        })
        .await
        .expect("test_snapshot_taken_after_seal_is_current timed out");
    }

    #[tokio::test]
    async fn test_hub_stops_when_handles_dropped() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let ledger = Arc::new(Blockchain::new(0).unwrap());
            let (hub, task) = Hub::spawn(ledger, test_config(4));
            drop(hub);
            task.await.unwrap();
        })
        .await
        .expect("test_hub_stops_when_handles_dropped timed out");
    }
}
