//! Connection management for the broker session
//!
//! This module handles:
//! - Mutual-TLS MQTT session setup from the device's certificates
//! - Subscribe-on-connect for the jobs topics
//! - Automatic reconnection with exponential backoff
//! - Forwarding inbound messages as connection events

mod manager;

pub use manager::{ConnectionConfig, ConnectionEvent, ConnectionManager, TlsPaths};
