//! Live task-status client for the trading-task dashboard.
//!
//! Keeps one push channel to the server open:
//! - Automatic reconnection with bounded exponential backoff (3s..30s, 5 retries)
//! - Heartbeat pings every 30s while open
//! - Fan-out of decoded events to independent subscribers with failure isolation
//! - A sampled CONNECTED / RECONNECTING / OFFLINE signal for presentation and
//!   the polling fallback

pub mod connection;
pub mod endpoint;
pub mod error;
pub mod heartbeat;
pub mod lifecycle;
pub mod message;
pub mod reconnect;
pub mod router;
pub mod sampler;
pub mod transport;

pub use connection::{ConnectionConfig, ConnectionManager};
pub use endpoint::channel_url;
pub use error::{WsError, WsResult};
pub use heartbeat::{HeartbeatMonitor, HeartbeatStats};
pub use lifecycle::{ConnectionPhase, CLOSE_ABNORMAL, CLOSE_NORMAL};
pub use message::{decode, ServerMessage, TaskEvent, TaskEventData, TaskEventKind, WsRequest};
pub use reconnect::ReconnectPolicy;
pub use router::{ChannelSubscriber, EventSubscriber, SubscriberId};
pub use sampler::{
    ConnectionStateSampler, PresentationState, RefreshStrategy, SamplerConfig, StateChangeCallback,
};
pub use transport::{OutboundFrame, Transport, TransportChannel, TransportEvent, TungsteniteTransport};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any `wss` connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
