//! Outbound HTTP acquisition: client construction and request pacing.

pub mod http_client;
pub mod throttle;
