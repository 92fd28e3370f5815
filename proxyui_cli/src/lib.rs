//! Client side of the proxy control backend: the live event stream, the
//! request/response API and the saved CLI configuration.

pub mod api;
pub mod config;
pub mod stream;
