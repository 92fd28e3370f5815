//! Event stream synchronizer with fixed-delay reconnection
//!
//! A [`StreamClient`] owns at most one connection task. The task opens the
//! `/start` stream, sends the current subscription, feeds inbound messages to
//! the [`StreamStore`] and writes queued control messages. When the stream
//! drops it waits a fixed delay and reconnects, forever, unless the close was
//! requested through [`StreamClient::disconnect`] or the server rejected the
//! token.

use super::store::StreamStore;
use crate::api::websocket_url;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use proxyui_common::{
    constants, ClientMessage, ServerMessage, SubscriptionConfig, SubscriptionUpdate,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
    MaybeTlsStream, WebSocketStream,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// Never connected
    Idle,
    Connecting,
    Open,
    /// Dropped; waiting out the reconnect delay
    Reconnecting,
    /// Intentional close in progress
    Closing,
    /// Closed on request; no reconnect scheduled
    Closed,
    /// Server refused the token (HTTP 401 or close code 1008); no reconnect scheduled
    Rejected,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamStatus::Idle => "idle",
            StreamStatus::Connecting => "connecting",
            StreamStatus::Open => "open",
            StreamStatus::Reconnecting => "reconnecting",
            StreamStatus::Closing => "closing",
            StreamStatus::Closed => "closed",
            StreamStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Invalid stream address: {0}")]
    InvalidAddress(String),

    #[error("Stream is not connected")]
    NotConnected,
}

/// Tunables for the connection task
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub reconnect_delay: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(constants::RECONNECT_DELAY_SECONDS),
        }
    }
}

struct ConnectionHandle {
    command_tx: mpsc::UnboundedSender<ClientMessage>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Session context: the store plus the handle to the live connection task
pub struct StreamClient {
    store: Arc<StreamStore>,
    options: StreamOptions,
    status_tx: Arc<watch::Sender<StreamStatus>>,
    connection: Option<ConnectionHandle>,
}

impl StreamClient {
    pub fn new(store: Arc<StreamStore>, options: StreamOptions) -> Self {
        let (status_tx, _) = watch::channel(StreamStatus::Idle);
        Self {
            store,
            options,
            status_tx: Arc::new(status_tx),
            connection: None,
        }
    }

    pub fn store(&self) -> &Arc<StreamStore> {
        &self.store
    }

    pub fn status(&self) -> StreamStatus {
        *self.status_tx.borrow()
    }

    /// Receiver that observes every status transition
    pub fn watch_status(&self) -> watch::Receiver<StreamStatus> {
        self.status_tx.subscribe()
    }

    /// Replace any existing connection with a new one to `api_url`.
    ///
    /// Returns once the connection task is started; progress is reported
    /// through [`StreamClient::watch_status`].
    pub async fn connect(&mut self, api_url: &str, token: Option<&str>) -> Result<(), StreamError> {
        self.disconnect().await;

        let url = websocket_url(api_url, constants::STREAM_PATH, token)
            .map_err(|e| StreamError::InvalidAddress(e.to_string()))?;
        tracing::debug!("Starting event stream task for {}", api_url);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = ConnectionTask {
            url: url.to_string(),
            store: self.store.clone(),
            status_tx: self.status_tx.clone(),
            command_rx,
            shutdown_rx,
            reconnect_delay: self.options.reconnect_delay,
        };

        self.connection = Some(ConnectionHandle {
            command_tx,
            shutdown_tx,
            task: tokio::spawn(task.run()),
        });

        Ok(())
    }

    /// Close the stream without scheduling a reconnect
    pub async fn disconnect(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        // The task may already be gone (rejected token)
        let _ = connection.shutdown_tx.send(true);

        if let Err(e) = connection.task.await {
            tracing::warn!("Event stream task ended abnormally: {}", e);
        }
    }

    /// Merge `update` into the subscription and push it if the stream is open.
    /// When it is not, the merged subscription goes out on the next connect.
    pub async fn update_subscriptions(&self, update: SubscriptionUpdate) -> SubscriptionConfig {
        let merged = self.store.update_subscriptions(&update).await;

        if self.send(merged.to_message()).is_err() {
            tracing::debug!("Stream not open; subscription will be sent on connect");
        }

        merged
    }

    /// Ask the proxy to drop every active connection
    pub fn close_all_connections(&self) -> Result<(), StreamError> {
        self.send(ClientMessage::CloseAllConnections)
    }

    fn send(&self, message: ClientMessage) -> Result<(), StreamError> {
        match &self.connection {
            Some(connection) if self.status() == StreamStatus::Open => connection
                .command_tx
                .send(message)
                .map_err(|_| StreamError::NotConnected),
            _ => Err(StreamError::NotConnected),
        }
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            let _ = connection.shutdown_tx.send(true);
        }
    }
}

/// How one connected session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Dropped,
    Rejected,
    Shutdown,
}

/// One turn of the session loop
enum Step {
    Frame(Option<Result<Message, tungstenite::Error>>),
    Command(Option<ClientMessage>),
    Shutdown,
}

struct ConnectionTask {
    url: String,
    store: Arc<StreamStore>,
    status_tx: Arc<watch::Sender<StreamStatus>>,
    command_rx: mpsc::UnboundedReceiver<ClientMessage>,
    shutdown_rx: watch::Receiver<bool>,
    reconnect_delay: Duration,
}

impl ConnectionTask {
    fn set_status(&self, status: StreamStatus) {
        let previous = self.status_tx.send_replace(status);
        if previous != status {
            tracing::debug!("Stream status: {} -> {}", previous.as_str(), status.as_str());
            self.store.publish_status(status);
        }
    }

    async fn run(mut self) {
        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            self.set_status(StreamStatus::Connecting);

            let attempt = tokio::select! {
                result = connect_async(self.url.as_str()) => Some(result),
                _ = self.shutdown_rx.changed() => None,
            };

            let outcome = match attempt {
                None => SessionEnd::Shutdown,
                Some(Ok((ws_stream, _))) => self.drive(ws_stream).await,
                Some(Err(tungstenite::Error::Http(response)))
                    if response.status().as_u16() == 401 =>
                {
                    SessionEnd::Rejected
                }
                Some(Err(e)) => {
                    tracing::warn!("Failed to connect to event stream: {}", e);
                    SessionEnd::Dropped
                }
            };

            match outcome {
                SessionEnd::Shutdown => break,
                SessionEnd::Rejected => {
                    tracing::error!("Event stream rejected the secret; not reconnecting");
                    self.set_status(StreamStatus::Rejected);
                    return;
                }
                SessionEnd::Dropped => {
                    self.set_status(StreamStatus::Reconnecting);
                    tracing::info!(
                        "Reconnecting to event stream in {}s",
                        self.reconnect_delay.as_secs_f32()
                    );

                    let shutdown = tokio::select! {
                        _ = tokio::time::sleep(self.reconnect_delay) => false,
                        _ = self.shutdown_rx.changed() => true,
                    };
                    if shutdown {
                        break;
                    }
                }
            }
        }

        self.set_status(StreamStatus::Closed);
    }

    /// Run one connected session until it ends
    async fn drive(&mut self, ws_stream: WsStream) -> SessionEnd {
        let (mut write, mut read) = ws_stream.split();

        // Anything queued for a previous session is stale; the subscribe below
        // already carries the latest configuration.
        while self.command_rx.try_recv().is_ok() {}

        self.set_status(StreamStatus::Open);
        tracing::info!("Event stream connected");

        let subscribe = self.store.subscriptions().await.to_message();
        if let Err(e) = send_message(&mut write, &subscribe).await {
            tracing::warn!("Failed to send subscription: {}", e);
            return SessionEnd::Dropped;
        }

        loop {
            let step = tokio::select! {
                frame = read.next() => Step::Frame(frame),
                command = self.command_rx.recv() => Step::Command(command),
                _ = self.shutdown_rx.changed() => Step::Shutdown,
            };

            match step {
                Step::Frame(Some(Ok(Message::Text(text)))) => {
                    self.dispatch(text.as_str()).await;
                }
                Step::Frame(Some(Ok(Message::Close(frame)))) => {
                    let code = frame.as_ref().map(|f| u16::from(f.code));
                    if code == Some(constants::CLOSE_CODE_POLICY_VIOLATION) {
                        return SessionEnd::Rejected;
                    }
                    tracing::info!("Event stream closed by server ({:?})", code);
                    return SessionEnd::Dropped;
                }
                Step::Frame(Some(Ok(Message::Binary(data)))) => {
                    tracing::debug!("Ignoring binary stream frame ({} bytes)", data.len());
                }
                Step::Frame(Some(Ok(_))) => {}
                Step::Frame(Some(Err(e))) => {
                    tracing::error!("Event stream error: {}", e);
                    return SessionEnd::Dropped;
                }
                Step::Frame(None) => {
                    tracing::info!("Event stream ended");
                    return SessionEnd::Dropped;
                }
                Step::Command(Some(message)) => {
                    if let Err(e) = send_message(&mut write, &message).await {
                        tracing::warn!("Failed to send control message: {}", e);
                        return SessionEnd::Dropped;
                    }
                }
                Step::Command(None) | Step::Shutdown => {
                    self.set_status(StreamStatus::Closing);
                    self.close(&mut write).await;
                    return SessionEnd::Shutdown;
                }
            }
        }
    }

    /// Flush control messages queued before the close request, then close
    async fn close(&mut self, write: &mut WsSink) {
        while let Ok(message) = self.command_rx.try_recv() {
            if let Err(e) = send_message(write, &message).await {
                tracing::debug!("Dropping queued control message on close: {}", e);
                break;
            }
        }

        let _ = write.send(Message::Close(None)).await;
    }

    async fn dispatch(&self, text: &str) {
        match ServerMessage::decode(text) {
            Ok(Some(message)) => self.store.handle_message(message).await,
            Ok(None) => tracing::debug!("Ignoring stream message of unknown type"),
            Err(e) => tracing::warn!("Dropping malformed stream message: {}", e),
        }
    }
}

async fn send_message(write: &mut WsSink, message: &ClientMessage) -> anyhow::Result<()> {
    let json = message.to_json()?;
    write.send(Message::Text(json.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{
            ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade},
            Query, State,
        },
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::get,
        Router,
    };
    use crate::stream::store::StreamEvent;
    use proxyui_common::{LogLevel, Topic};
    use std::collections::HashMap;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;

    const SECRET: &str = "letmein";
    const DELAY: Duration = Duration::from_millis(100);

    #[derive(Clone, Copy)]
    enum Behaviour {
        /// Send the scripted frames, then hold the connection open
        Hold,
        /// Close the first connection immediately, hold later ones
        DropFirst,
        /// Close every connection with the policy-violation code
        RejectPolicy,
    }

    #[derive(Clone)]
    struct MockServer {
        behaviour: Behaviour,
        frames: Arc<Vec<WsMessage>>,
        accepted: Arc<AtomicUsize>,
        accepted_at: Arc<Mutex<Vec<Instant>>>,
        received: Arc<Mutex<Vec<String>>>,
    }

    impl MockServer {
        fn accepted(&self) -> usize {
            self.accepted.load(Ordering::SeqCst)
        }

        fn accepted_at(&self) -> Vec<Instant> {
            self.accepted_at.lock().unwrap().clone()
        }

        fn received(&self) -> Vec<String> {
            self.received.lock().unwrap().clone()
        }
    }

    async fn start_handler(
        ws: WebSocketUpgrade,
        Query(params): Query<HashMap<String, String>>,
        State(server): State<MockServer>,
    ) -> Response {
        if params.get("token").map(String::as_str) != Some(SECRET) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        ws.on_upgrade(move |socket| serve_socket(socket, server))
    }

    async fn serve_socket(mut socket: WebSocket, server: MockServer) {
        server.accepted_at.lock().unwrap().push(Instant::now());
        let index = server.accepted.fetch_add(1, Ordering::SeqCst);

        let close_code = match server.behaviour {
            Behaviour::DropFirst if index == 0 => Some(1000),
            Behaviour::RejectPolicy => Some(constants::CLOSE_CODE_POLICY_VIOLATION),
            _ => None,
        };
        if let Some(code) = close_code {
            let frame = CloseFrame {
                code,
                reason: "bye".into(),
            };
            let _ = socket.send(WsMessage::Close(Some(frame))).await;
            return;
        }

        for frame in server.frames.iter() {
            if socket.send(frame.clone()).await.is_err() {
                return;
            }
        }

        while let Some(Ok(message)) = socket.recv().await {
            match message {
                WsMessage::Text(text) => server.received.lock().unwrap().push(text.as_str().to_string()),
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    }

    async fn spawn_server(behaviour: Behaviour, frames: Vec<String>) -> (String, MockServer) {
        let frames = frames
            .into_iter()
            .map(|frame| WsMessage::Text(frame.into()))
            .collect();
        spawn_server_with(behaviour, frames).await
    }

    async fn spawn_server_with(behaviour: Behaviour, frames: Vec<WsMessage>) -> (String, MockServer) {
        let server = MockServer {
            behaviour,
            frames: Arc::new(frames),
            accepted: Arc::new(AtomicUsize::new(0)),
            accepted_at: Arc::new(Mutex::new(Vec::new())),
            received: Arc::new(Mutex::new(Vec::new())),
        };

        let app = Router::new()
            .route("/start", get(start_handler))
            .with_state(server.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (format!("http://{}", addr), server)
    }

    fn client() -> StreamClient {
        StreamClient::new(
            Arc::new(StreamStore::new()),
            StreamOptions {
                reconnect_delay: DELAY,
            },
        )
    }

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..500 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("Condition not met in time");
    }

    async fn wait_for_status(client: &StreamClient, wanted: StreamStatus) {
        let mut status = client.watch_status();
        tokio::time::timeout(Duration::from_secs(5), status.wait_for(|s| *s == wanted))
            .await
            .expect("Timed out waiting for status")
            .expect("Status channel closed");
    }

    fn subscribe_topics(text: &str) -> (Vec<Topic>, LogLevel) {
        match ClientMessage::from_json(text).unwrap() {
            ClientMessage::Subscribe { topics, log_level } => (topics, log_level),
            other => panic!("Expected subscribe, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatches_stream_messages() {
        let frames = vec![
            r#"{"type":"traffic","data":{"up":100,"down":250}}"#.to_string(),
            r#"{"type":"log","data":{"level":"INFO","session":1,"message":"x","time":1}}"#.to_string(),
            r#"{"type":"heartbeat","data":{}}"#.to_string(),
            "definitely not json".to_string(),
            r#"{"type":"connections","data":[{"id":9,"host":"example.com:443","method":"CONNECT","url":"","remote":"127.0.0.1:40000","protocol":"HTTPS-Tunnel"}]}"#.to_string(),
            r#"{"type":"mitm_exchange","data":{"id":5,"request":{"method":"GET","url":"https://example.com/","host":"example.com"},"response":{"statusCode":200,"status":"200 OK"}}}"#.to_string(),
            r#"{"type":"log","data":{"level":"INFO","session":1,"message":"x","time":1}}"#.to_string(),
        ];
        let (base, server) = spawn_server(Behaviour::Hold, frames).await;
        let mut client = client();
        let store = client.store().clone();

        client.connect(&base, Some(SECRET)).await.unwrap();

        eventually(|| {
            let store = store.clone();
            async move { store.logs().await.len() == 2 }
        })
        .await;

        let traffic = store.traffic_history().await;
        assert_eq!(traffic.len(), 1);
        assert_eq!((traffic[0].up, traffic[0].down), (100, 250));
        assert!(traffic[0].timestamp > 0);

        let connections = store.connections().await;
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].id, 9);

        let exchanges = store.mitm_exchanges().await;
        assert_eq!(exchanges.len(), 1);
        assert_eq!(exchanges[0].method, "GET");
        assert!(exchanges[0].has_response);
        assert!(!exchanges[0].has_error);

        let logs = store.logs().await;
        assert_ne!(logs[0].id, logs[1].id);

        // Malformed frames do not end the session
        assert_eq!(client.status(), StreamStatus::Open);
        assert_eq!(server.accepted(), 1);

        eventually(|| std::future::ready(!server.received().is_empty())).await;
        let (topics, level) = subscribe_topics(&server.received()[0]);
        assert_eq!(
            topics,
            vec![Topic::Traffic, Topic::Connections, Topic::Logs, Topic::MitmDetail]
        );
        assert_eq!(level, LogLevel::Info);

        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_binary_frames_are_ignored() {
        let frames = vec![
            WsMessage::Binary(vec![0u8, 1, 2, 3].into()),
            WsMessage::Text(r#"{"type":"traffic","data":{"up":5,"down":6}}"#.to_string().into()),
        ];
        let (base, server) = spawn_server_with(Behaviour::Hold, frames).await;
        let mut client = client();
        let store = client.store().clone();

        client.connect(&base, Some(SECRET)).await.unwrap();

        eventually(|| {
            let store = store.clone();
            async move { store.traffic_history().await.len() == 1 }
        })
        .await;

        assert_eq!(client.status(), StreamStatus::Open);
        assert_eq!(server.accepted(), 1);
        assert!(store.logs().await.is_empty());
        assert!(store.mitm_exchanges().await.is_empty());

        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_subscribers_see_stream_items() {
        let frames = vec![r#"{"type":"traffic","data":{"up":1,"down":2}}"#.to_string()];
        let (base, _server) = spawn_server(Behaviour::Hold, frames).await;
        let mut client = client();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let _subscription = {
            let seen = seen.clone();
            client
                .store()
                .subscribe_traffic(move |sample| seen.lock().unwrap().push(sample.clone()))
        };

        client.connect(&base, Some(SECRET)).await.unwrap();
        eventually(|| std::future::ready(!seen.lock().unwrap().is_empty())).await;

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!((seen[0].up, seen[0].down), (1, 2));

        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_update_subscriptions_resends() {
        let (base, server) = spawn_server(Behaviour::Hold, Vec::new()).await;
        let mut client = client();

        client.connect(&base, Some(SECRET)).await.unwrap();
        wait_for_status(&client, StreamStatus::Open).await;
        eventually(|| std::future::ready(server.received().len() == 1)).await;

        let merged = client
            .update_subscriptions(SubscriptionUpdate {
                mitm: Some(false),
                log_level: Some(LogLevel::Warn),
                ..Default::default()
            })
            .await;
        assert!(!merged.mitm);

        eventually(|| std::future::ready(server.received().len() == 2)).await;
        let received = server.received();
        assert!(!received[1].contains("mitm_detail"));

        let (topics, level) = subscribe_topics(&received[1]);
        assert_eq!(topics, vec![Topic::Traffic, Topic::Connections, Topic::Logs]);
        assert_eq!(level, LogLevel::Warn);

        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_update_before_connect_applies_on_open() {
        let (base, server) = spawn_server(Behaviour::Hold, Vec::new()).await;
        let mut client = client();

        client
            .update_subscriptions(SubscriptionUpdate {
                traffic: Some(false),
                ..Default::default()
            })
            .await;
        client.connect(&base, Some(SECRET)).await.unwrap();

        eventually(|| std::future::ready(server.received().len() == 1)).await;
        let (topics, _) = subscribe_topics(&server.received()[0]);
        assert!(!topics.contains(&Topic::Traffic));

        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_close_all_connections() {
        let (base, server) = spawn_server(Behaviour::Hold, Vec::new()).await;
        let mut client = client();

        assert!(matches!(
            client.close_all_connections(),
            Err(StreamError::NotConnected)
        ));

        client.connect(&base, Some(SECRET)).await.unwrap();
        wait_for_status(&client, StreamStatus::Open).await;
        client.close_all_connections().unwrap();

        eventually(|| {
            std::future::ready(
                server
                    .received()
                    .iter()
                    .any(|m| m == r#"{"action":"closeAllConnections"}"#),
            )
        })
        .await;

        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_close_schedules_exactly_one_reconnect() {
        let (base, server) = spawn_server(Behaviour::DropFirst, Vec::new()).await;
        let mut client = client();

        client.connect(&base, Some(SECRET)).await.unwrap();
        eventually(|| std::future::ready(server.accepted() == 2)).await;
        wait_for_status(&client, StreamStatus::Open).await;

        let accepted_at = server.accepted_at();
        assert!(
            accepted_at[1].duration_since(accepted_at[0]) >= DELAY,
            "reconnected after {:?}, before the {:?} delay",
            accepted_at[1].duration_since(accepted_at[0]),
            DELAY
        );

        tokio::time::sleep(DELAY * 4).await;
        assert_eq!(server.accepted(), 2);
        assert_eq!(client.status(), StreamStatus::Open);

        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_disconnect_does_not_reconnect() {
        let (base, server) = spawn_server(Behaviour::Hold, Vec::new()).await;
        let mut client = client();

        client.connect(&base, Some(SECRET)).await.unwrap();
        wait_for_status(&client, StreamStatus::Open).await;

        client.disconnect().await;
        assert_eq!(client.status(), StreamStatus::Closed);

        tokio::time::sleep(DELAY * 4).await;
        assert_eq!(server.accepted(), 1);
        assert_eq!(client.status(), StreamStatus::Closed);
    }

    #[tokio::test]
    async fn test_policy_close_is_rejected() {
        let (base, server) = spawn_server(Behaviour::RejectPolicy, Vec::new()).await;
        let mut client = client();

        client.connect(&base, Some(SECRET)).await.unwrap();
        wait_for_status(&client, StreamStatus::Rejected).await;

        tokio::time::sleep(DELAY * 4).await;
        assert_eq!(server.accepted(), 1);
        assert_eq!(client.status(), StreamStatus::Rejected);

        client.disconnect().await;
        assert_eq!(client.status(), StreamStatus::Rejected);
    }

    #[tokio::test]
    async fn test_wrong_token_is_rejected() {
        let (base, server) = spawn_server(Behaviour::Hold, Vec::new()).await;
        let mut client = client();

        client.connect(&base, Some("wrong")).await.unwrap();
        wait_for_status(&client, StreamStatus::Rejected).await;
        assert_eq!(server.accepted(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_server_retries_until_disconnect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut client = client();
        client
            .connect(&format!("http://{}", addr), Some(SECRET))
            .await
            .unwrap();
        wait_for_status(&client, StreamStatus::Reconnecting).await;

        client.disconnect().await;
        assert_eq!(client.status(), StreamStatus::Closed);
    }

    #[tokio::test]
    async fn test_connect_replaces_existing_connection() {
        let (base, server) = spawn_server(Behaviour::Hold, Vec::new()).await;
        let mut client = client();
        let mut events = client.store().events();

        client.connect(&base, Some(SECRET)).await.unwrap();
        wait_for_status(&client, StreamStatus::Open).await;
        client.connect(&base, Some(SECRET)).await.unwrap();
        wait_for_status(&client, StreamStatus::Open).await;

        assert_eq!(server.accepted(), 2);

        let mut statuses = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let StreamEvent::StatusChanged(status) = event {
                statuses.push(status);
            }
        }
        assert_eq!(
            statuses,
            vec![
                StreamStatus::Connecting,
                StreamStatus::Open,
                StreamStatus::Closing,
                StreamStatus::Closed,
                StreamStatus::Connecting,
                StreamStatus::Open,
            ]
        );

        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_invalid_address() {
        let mut client = client();
        assert!(matches!(
            client.connect("nowhere", None).await,
            Err(StreamError::InvalidAddress(_))
        ));
        assert_eq!(client.status(), StreamStatus::Idle);
    }
}
