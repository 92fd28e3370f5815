//! proxyui Common - Shared stream protocol for the proxy control API
//!
//! This crate contains the message definitions exchanged over the control
//! server's `/start` event stream, plus the subscription state that drives the
//! outbound `subscribe` message.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid JSON message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid message format")]
    InvalidFormat,
}

/// A logical channel a client may subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "traffic")]
    Traffic,
    #[serde(rename = "connections")]
    Connections,
    #[serde(rename = "logs")]
    Logs,
    #[serde(rename = "mitm_detail")]
    MitmDetail,
}

impl Topic {
    /// Get the wire name of the topic
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Traffic => "traffic",
            Topic::Connections => "connections",
            Topic::Logs => "logs",
            Topic::MitmDetail => "mitm_detail",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log severity, ordered the way the backend filters log delivery
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    /// Rank a level string as received from the server.
    /// Only the exact uppercase names are known; anything else ranks lowest,
    /// matching the backend's lookup.
    pub fn from_wire(level: &str) -> Self {
        match level {
            "INFO" => LogLevel::Info,
            "WARN" => LogLevel::Warn,
            "ERROR" => LogLevel::Error,
            _ => LogLevel::Debug,
        }
    }

    /// Whether a message at `level` passes a filter set to `self`
    pub fn admits(&self, level: &str) -> bool {
        LogLevel::from_wire(level) >= *self
    }
}

impl FromStr for LogLevel {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            _ => Err(ProtocolError::InvalidFormat),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Control message sent by the client over the stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ClientMessage {
    /// Replace the server-side subscription for this connection
    #[serde(rename = "subscribe")]
    Subscribe {
        topics: Vec<Topic>,
        #[serde(rename = "logLevel")]
        log_level: LogLevel,
    },

    /// Ask the proxy to close every active connection. No reply is sent.
    #[serde(rename = "closeAllConnections")]
    CloseAllConnections,
}

impl ClientMessage {
    /// Serialize the message to a JSON text frame
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from a JSON text frame
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }
}

/// Subscription state pushed to the server on change and on every (re)connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    pub traffic: bool,
    pub connections: bool,
    pub logs: bool,
    pub mitm: bool,
    pub log_level: LogLevel,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            traffic: true,
            connections: true,
            logs: true,
            mitm: true,
            log_level: LogLevel::Info,
        }
    }
}

/// Partial subscription change; `None` fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionUpdate {
    pub traffic: Option<bool>,
    pub connections: Option<bool>,
    pub logs: Option<bool>,
    pub mitm: Option<bool>,
    pub log_level: Option<LogLevel>,
}

impl SubscriptionConfig {
    /// Merge a partial update into this configuration
    pub fn merge(&mut self, update: &SubscriptionUpdate) {
        if let Some(traffic) = update.traffic {
            self.traffic = traffic;
        }
        if let Some(connections) = update.connections {
            self.connections = connections;
        }
        if let Some(logs) = update.logs {
            self.logs = logs;
        }
        if let Some(mitm) = update.mitm {
            self.mitm = mitm;
        }
        if let Some(level) = update.log_level {
            self.log_level = level;
        }
    }

    /// Enabled topics, in wire order
    pub fn topics(&self) -> Vec<Topic> {
        [
            (self.traffic, Topic::Traffic),
            (self.connections, Topic::Connections),
            (self.logs, Topic::Logs),
            (self.mitm, Topic::MitmDetail),
        ]
        .into_iter()
        .filter_map(|(enabled, topic)| enabled.then_some(topic))
        .collect()
    }

    /// Build the `subscribe` control message for this configuration
    pub fn to_message(&self) -> ClientMessage {
        ClientMessage::Subscribe {
            topics: self.topics(),
            log_level: self.log_level,
        }
    }
}

/// Global traffic delta for the last sampling interval (bytes)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficDelta {
    #[serde(default)]
    pub up: i64,
    #[serde(default)]
    pub down: i64,
}

/// One active proxied connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Proxy session number
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub remote: String,
    /// HTTP, HTTPS-Tunnel or HTTPS-MITM
    #[serde(default)]
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down: Option<i64>,
}

/// A log line emitted by the proxy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub session: i64,
    #[serde(default)]
    pub message: String,
    /// Either epoch milliseconds or an RFC 3339 string, depending on the backend build
    #[serde(default)]
    pub time: Value,
}

/// Header map as sent by the proxy (one name, many values)
pub type HeaderMap = HashMap<String, Vec<String>>;

/// Request half of an intercepted exchange
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSnapshot {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub header: Option<HeaderMap>,
    /// Header plus body bytes
    #[serde(default)]
    pub sum_size: i64,
}

/// Response half of an intercepted exchange
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSnapshot {
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub header: Option<HeaderMap>,
    #[serde(default)]
    pub sum_size: i64,
}

/// A complete MITM request/response exchange as recorded by the proxy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpExchange {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub session_id: i64,
    #[serde(default)]
    pub parent_id: i64,
    /// Start time, epoch milliseconds
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub request: Option<RequestSnapshot>,
    #[serde(default)]
    pub response: Option<ResponseSnapshot>,
    /// Milliseconds
    #[serde(default)]
    pub duration: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Tagged message pushed by the server over the stream
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "traffic")]
    Traffic(TrafficDelta),
    #[serde(rename = "connections")]
    Connections(Vec<ConnectionInfo>),
    #[serde(rename = "log")]
    Log(LogRecord),
    #[serde(rename = "mitm_exchange")]
    MitmExchange(HttpExchange),
}

impl ServerMessage {
    /// Decode one text frame.
    ///
    /// Returns `Ok(None)` for a well-formed envelope carrying a `type` this
    /// client does not know. Non-JSON text, an envelope without a string
    /// `type`, or a payload that does not match its type are errors.
    pub fn decode(text: &str) -> Result<Option<Self>, ProtocolError> {
        let mut envelope: Value = serde_json::from_str(text)?;
        let kind = envelope
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::InvalidFormat)?
            .to_owned();
        let data = envelope
            .get_mut("data")
            .map(Value::take)
            .unwrap_or(Value::Null);

        let message = match kind.as_str() {
            "traffic" => ServerMessage::Traffic(serde_json::from_value(data)?),
            "connections" => ServerMessage::Connections(serde_json::from_value(data)?),
            "log" => ServerMessage::Log(serde_json::from_value(data)?),
            "mitm_exchange" => ServerMessage::MitmExchange(serde_json::from_value(data)?),
            _ => return Ok(None),
        };

        Ok(Some(message))
    }

    /// Serialize the message to a JSON text frame
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// The subscription topic that carries this message
    pub fn topic(&self) -> Topic {
        match self {
            ServerMessage::Traffic(_) => Topic::Traffic,
            ServerMessage::Connections(_) => Topic::Connections,
            ServerMessage::Log(_) => Topic::Logs,
            ServerMessage::MitmExchange(_) => Topic::MitmDetail,
        }
    }
}

/// Constants for the protocol
pub mod constants {
    /// Event stream endpoint on the control server
    pub const STREAM_PATH: &str = "/start";

    /// Query parameter carrying the control secret
    pub const TOKEN_PARAM: &str = "token";

    /// Traffic samples kept (one per second on the server side)
    pub const MAX_TRAFFIC_HISTORY: usize = 60;

    /// Log entries kept
    pub const MAX_LOGS: usize = 500;

    /// MITM exchanges kept
    pub const MAX_MITM_EXCHANGES: usize = 1000;

    /// Fixed delay before reconnecting a dropped stream
    pub const RECONNECT_DELAY_SECONDS: u64 = 5;

    /// WebSocket close code the server uses to reject authentication
    pub const CLOSE_CODE_POLICY_VIOLATION: u16 = 1008;

    /// Default control API address
    pub const DEFAULT_API_URL: &str = "http://127.0.0.1:9090";

    /// Proxy configuration endpoint
    pub const CONFIGS_ENDPOINT: &str = "/configs";

    /// Presigned download lookup for stored exchange bodies
    pub const STORAGE_DOWNLOAD_ENDPOINT: &str = "/api/storage/download";
}
