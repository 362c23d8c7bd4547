//! Terminal live tap for trading-task status.
//!
//! Wires the live-update client to a terminal:
//! - Loads TOML configuration
//! - Owns the connection manager and the state sampler
//! - Prints task events and connection status changes

pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
