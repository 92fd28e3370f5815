//! Stream state and fan-out to subscribers

use super::buffer::BoundedBuffer;
use super::client::StreamStatus;
use super::records::{Exchange, LogEntry, TrafficSample};
use super::registry::{Subscribers, Subscription};
use proxyui_common::{
    constants, ConnectionInfo, HttpExchange, LogLevel, LogRecord, ServerMessage,
    SubscriptionConfig, SubscriptionUpdate, TrafficDelta,
};
use tokio::sync::{broadcast, RwLock};

/// Events broadcast to async consumers
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Traffic(TrafficSample),
    Connections(Vec<ConnectionInfo>),
    Log(LogEntry),
    MitmExchange(Exchange),
    StatusChanged(StreamStatus),
}

/// Buffered history per topic, the current subscription and the subscriber registries
pub struct StreamStore {
    traffic: RwLock<BoundedBuffer<TrafficSample>>,
    connections: RwLock<Vec<ConnectionInfo>>,
    logs: RwLock<BoundedBuffer<LogEntry>>,
    exchanges: RwLock<BoundedBuffer<Exchange>>,
    subscriptions: RwLock<SubscriptionConfig>,

    traffic_subscribers: Subscribers<TrafficSample>,
    connection_subscribers: Subscribers<Vec<ConnectionInfo>>,
    log_subscribers: Subscribers<LogEntry>,
    mitm_subscribers: Subscribers<Exchange>,

    broadcast_tx: broadcast::Sender<StreamEvent>,
}

impl StreamStore {
    pub fn new() -> Self {
        Self::with_subscriptions(SubscriptionConfig::default())
    }

    pub fn with_subscriptions(subscriptions: SubscriptionConfig) -> Self {
        let (broadcast_tx, _) = broadcast::channel(256);
        Self {
            traffic: RwLock::new(BoundedBuffer::new(constants::MAX_TRAFFIC_HISTORY)),
            connections: RwLock::new(Vec::new()),
            logs: RwLock::new(BoundedBuffer::new(constants::MAX_LOGS)),
            exchanges: RwLock::new(BoundedBuffer::new(constants::MAX_MITM_EXCHANGES)),
            subscriptions: RwLock::new(subscriptions),
            traffic_subscribers: Subscribers::new(),
            connection_subscribers: Subscribers::new(),
            log_subscribers: Subscribers::new(),
            mitm_subscribers: Subscribers::new(),
            broadcast_tx,
        }
    }

    /// Route a decoded server message to its topic handler
    pub async fn handle_message(&self, message: ServerMessage) {
        match message {
            ServerMessage::Traffic(delta) => {
                self.handle_traffic(delta).await;
            }
            ServerMessage::Connections(list) => {
                self.handle_connections(list).await;
            }
            ServerMessage::Log(record) => {
                self.handle_log(record).await;
            }
            ServerMessage::MitmExchange(exchange) => {
                self.handle_mitm_exchange(exchange).await;
            }
        }
    }

    pub async fn handle_traffic(&self, delta: TrafficDelta) -> TrafficSample {
        let sample = TrafficSample::received_now(delta);
        self.traffic.write().await.push(sample.clone());

        self.traffic_subscribers.emit(&sample);
        let _ = self.broadcast_tx.send(StreamEvent::Traffic(sample.clone()));
        sample
    }

    /// Connections arrive as whole snapshots; the latest one replaces the previous
    pub async fn handle_connections(&self, list: Vec<ConnectionInfo>) {
        *self.connections.write().await = list.clone();

        self.connection_subscribers.emit(&list);
        let _ = self.broadcast_tx.send(StreamEvent::Connections(list));
    }

    pub async fn handle_log(&self, record: LogRecord) -> LogEntry {
        let entry = LogEntry::from(record);
        self.logs.write().await.push(entry.clone());

        self.log_subscribers.emit(&entry);
        let _ = self.broadcast_tx.send(StreamEvent::Log(entry.clone()));
        entry
    }

    pub async fn handle_mitm_exchange(&self, raw: HttpExchange) -> Exchange {
        let exchange = Exchange::from(raw);
        self.exchanges.write().await.push(exchange.clone());

        self.mitm_subscribers.emit(&exchange);
        let _ = self
            .broadcast_tx
            .send(StreamEvent::MitmExchange(exchange.clone()));
        exchange
    }

    pub(crate) fn publish_status(&self, status: StreamStatus) {
        let _ = self.broadcast_tx.send(StreamEvent::StatusChanged(status));
    }

    /// Traffic samples, oldest first
    pub async fn traffic_history(&self) -> Vec<TrafficSample> {
        self.traffic.read().await.to_vec()
    }

    /// Latest connections snapshot
    pub async fn connections(&self) -> Vec<ConnectionInfo> {
        self.connections.read().await.clone()
    }

    pub async fn logs(&self) -> Vec<LogEntry> {
        self.logs.read().await.to_vec()
    }

    /// Stored logs at or above `level`
    pub async fn logs_at_least(&self, level: LogLevel) -> Vec<LogEntry> {
        self.logs
            .read()
            .await
            .iter()
            .filter(|entry| level.admits(&entry.level))
            .cloned()
            .collect()
    }

    pub async fn mitm_exchanges(&self) -> Vec<Exchange> {
        self.exchanges.read().await.to_vec()
    }

    /// Get a stored exchange by its server-issued ID
    pub async fn find_exchange(&self, id: i64) -> Option<Exchange> {
        self.exchanges
            .read()
            .await
            .iter()
            .find(|exchange| exchange.id == id)
            .cloned()
    }

    pub async fn clear_logs(&self) {
        self.logs.write().await.clear();
    }

    pub async fn clear_mitm_exchanges(&self) {
        self.exchanges.write().await.clear();
    }

    pub async fn subscriptions(&self) -> SubscriptionConfig {
        self.subscriptions.read().await.clone()
    }

    /// Merge a partial update and return the resulting configuration
    pub async fn update_subscriptions(&self, update: &SubscriptionUpdate) -> SubscriptionConfig {
        let mut subscriptions = self.subscriptions.write().await;
        subscriptions.merge(update);
        subscriptions.clone()
    }

    pub fn subscribe_traffic<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&TrafficSample) + Send + Sync + 'static,
    {
        self.traffic_subscribers.subscribe(callback)
    }

    pub fn subscribe_connections<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Vec<ConnectionInfo>) + Send + Sync + 'static,
    {
        self.connection_subscribers.subscribe(callback)
    }

    pub fn subscribe_logs<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&LogEntry) + Send + Sync + 'static,
    {
        self.log_subscribers.subscribe(callback)
    }

    pub fn subscribe_mitm<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Exchange) + Send + Sync + 'static,
    {
        self.mitm_subscribers.subscribe(callback)
    }

    /// Subscribe to all stream events as a channel
    pub fn events(&self) -> broadcast::Receiver<StreamEvent> {
        self.broadcast_tx.subscribe()
    }
}

impl Default for StreamStore {
    fn default() -> Self {
        Self::new()
    }
}
