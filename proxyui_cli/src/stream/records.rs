//! Items stored by the stream store, derived from raw server payloads at ingestion

use chrono::Utc;
use proxyui_common::{HeaderMap, HttpExchange, LogLevel, LogRecord, TrafficDelta};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// One traffic delta, stamped with its arrival time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrafficSample {
    pub up: i64,
    pub down: i64,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl TrafficSample {
    pub fn new(delta: TrafficDelta, timestamp: i64) -> Self {
        Self {
            up: delta.up,
            down: delta.down,
            timestamp,
        }
    }

    /// Stamp a delta with the current time
    pub fn received_now(delta: TrafficDelta) -> Self {
        Self::new(delta, Utc::now().timestamp_millis())
    }
}

/// A log line with a client-side identifier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub id: String,
    pub level: String,
    pub session: i64,
    pub message: String,
    pub time: Value,
}

impl LogEntry {
    pub fn severity(&self) -> LogLevel {
        LogLevel::from_wire(&self.level)
    }
}

impl From<LogRecord> for LogEntry {
    fn from(record: LogRecord) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            level: record.level,
            session: record.session,
            message: record.message,
            time: record.time,
        }
    }
}

/// Flattened MITM exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exchange {
    pub id: i64,
    pub session_id: i64,
    pub parent_id: i64,
    pub time: i64,
    pub duration: i64,
    pub error: String,

    pub method: String,
    pub url: String,
    pub host: String,
    pub request_headers: HeaderMap,
    pub request_size: i64,

    pub status_code: u16,
    pub status: String,
    pub response_headers: HeaderMap,
    pub response_size: i64,

    pub has_response: bool,
    pub has_error: bool,
}

impl From<HttpExchange> for Exchange {
    fn from(raw: HttpExchange) -> Self {
        let request = raw.request.unwrap_or_default();
        let has_response = raw
            .response
            .as_ref()
            .is_some_and(|response| response.status_code != 0);
        let response = raw.response.unwrap_or_default();
        let error = raw.error.unwrap_or_default();

        Self {
            id: raw.id,
            session_id: raw.session_id,
            parent_id: raw.parent_id,
            time: raw.time,
            duration: raw.duration,
            has_error: !error.is_empty(),
            error,

            method: request.method,
            url: request.url,
            host: request.host,
            request_headers: request.header.unwrap_or_default(),
            request_size: request.sum_size,

            status_code: response.status_code,
            status: response.status,
            response_headers: response.header.unwrap_or_default(),
            response_size: response.sum_size,

            has_response,
        }
    }
}
