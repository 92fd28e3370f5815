//! Live event stream from the proxy backend

mod buffer;
mod client;
mod records;
mod registry;
mod store;

pub use buffer::BoundedBuffer;
pub use client::{StreamClient, StreamError, StreamOptions, StreamStatus};
pub use records::{Exchange, LogEntry, TrafficSample};
pub use registry::{Subscribers, Subscription};
pub use store::{StreamEvent, StreamStore};
