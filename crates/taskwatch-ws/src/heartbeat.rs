//! Heartbeat sender for the task-status channel.
//!
//! Sends `{"type":"ping"}` on a fixed interval while the channel is open so
//! idle-timeout proxies keep the connection alive. Responses are recorded for
//! statistics only; nothing is validated.

use crate::error::WsError;
use crate::message::WsRequest;
use crate::transport::OutboundFrame;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Heartbeat monitor. At most one ping loop runs at a time.
pub struct HeartbeatMonitor {
    /// Heartbeat interval (how often to send ping).
    interval: Duration,
    /// Running ping loop, if any.
    task: Option<JoinHandle<()>>,
    stats: Arc<RwLock<HeartbeatStats>>,
}

impl HeartbeatMonitor {
    /// Create a new, stopped heartbeat monitor.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            task: None,
            stats: Arc::new(RwLock::new(HeartbeatStats::default())),
        }
    }

    /// Start sending pings on `outbound`. Replaces any running loop.
    ///
    /// The first ping goes out one full interval after start.
    pub fn start(&mut self, outbound: mpsc::UnboundedSender<OutboundFrame>) {
        self.stop();

        let period = self.interval;
        let stats = self.stats.clone();
        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let frame = match WsRequest::ping().to_frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(?e, "Failed to encode heartbeat ping");
                        continue;
                    }
                };

                // A failed send is only logged; the close event drives recovery.
                if outbound.send(OutboundFrame::Text(frame)).is_err() {
                    let err = WsError::SendFailed("outbound channel closed".to_string());
                    warn!(error = %err, "Heartbeat ping not sent");
                    continue;
                }

                stats.write().record_ping();
                debug!("Sent heartbeat ping");
            }
        }));
    }

    /// Stop the ping loop immediately. Idempotent.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Heartbeat stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Record a heartbeat acknowledgment from the server.
    pub fn record_pong(&self) {
        self.stats.write().record_pong();
    }

    /// Get heartbeat statistics.
    pub fn stats(&self) -> HeartbeatStats {
        self.stats.read().clone()
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Heartbeat statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatStats {
    pub pings_sent: u64,
    pub last_ping: Option<DateTime<Utc>>,
    pub last_pong: Option<DateTime<Utc>>,
}

impl HeartbeatStats {
    fn record_ping(&mut self) {
        self.pings_sent += 1;
        self.last_ping = Some(Utc::now());
    }

    fn record_pong(&mut self) {
        let now = Utc::now();
        self.last_pong = Some(now);

        if let Some(ping_time) = self.last_ping {
            let rtt_ms = (now - ping_time).num_milliseconds();
            debug!(rtt_ms, "Received pong");
        }
    }
}
