//! Shared helpers for taskwatch-ws integration tests.

#![allow(dead_code)]

pub mod mock_transport;
