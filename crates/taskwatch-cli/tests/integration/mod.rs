//! Integration tests for taskwatch-cli.
//!
//! These tests run the real WebSocket transport against a local server:
//! - Channel URL and token delivery
//! - Event dispatch and heartbeats over the wire
//! - Reconnection on server-initiated closes

pub mod common;
