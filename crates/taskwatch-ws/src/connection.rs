//! WebSocket connection manager.
//!
//! Owns the single live channel, the auth token, the reconnect counter and the
//! manual-disconnect intent. All public methods return immediately; their
//! effects are observed through `phase()`/`is_connected()` and subscriber
//! callbacks. State lives behind one mutex that is never held across an
//! `.await` or a subscriber callback.

use crate::endpoint::{channel_url, redacted};
use crate::error::{WsError, WsResult};
use crate::heartbeat::{HeartbeatMonitor, HeartbeatStats};
use crate::lifecycle::{
    CloseAction, ConnectOrigin, ConnectionPhase, Lifecycle, OpenAction, CLOSE_ABNORMAL,
    CLOSE_NORMAL,
};
use crate::message::TaskEvent;
use crate::reconnect::{ReconnectPolicy, ReconnectTimer};
use crate::router::{
    ChannelSubscriber, EventSubscriber, MessageRouter, RouteOutcome, SubscriberId,
};
use crate::transport::{OutboundFrame, Transport, TransportEvent, TungsteniteTransport};
use parking_lot::Mutex;
use taskwatch_telemetry::Metrics;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;
use zeroize::Zeroizing;

const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30000;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Origin of the hosting page (e.g. `https://dashboard.example.com`).
    /// Its scheme decides between `ws` and `wss`.
    pub server_url: String,
    /// Maximum reconnection attempts between two successful opens.
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential backoff.
    pub reconnect_base_delay_ms: u64,
    /// Maximum delay for exponential backoff.
    pub reconnect_max_delay_ms: u64,
    /// Heartbeat interval.
    pub heartbeat_interval_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 3000,
            reconnect_max_delay_ms: 30000,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
        }
    }
}

impl ConnectionConfig {
    /// Heartbeat period. Zero is not a valid period and falls back to the default.
    pub fn heartbeat_interval(&self) -> Duration {
        if self.heartbeat_interval_ms == 0 {
            warn!(
                default_ms = DEFAULT_HEARTBEAT_INTERVAL_MS,
                "heartbeat_interval_ms is 0, using default"
            );
            return Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS);
        }
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
            max_attempts: self.max_reconnect_attempts,
        }
    }
}

/// The live channel: id, outbound queue and event pump.
struct ChannelHandle {
    id: u64,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    pump: JoinHandle<()>,
}

impl ChannelHandle {
    fn close(self, code: u16, reason: &str) {
        let _ = self.outbound.send(OutboundFrame::Close {
            code,
            reason: reason.to_string(),
        });
        self.pump.abort();
    }
}

/// Mutable connection state.
struct Core {
    lifecycle: Lifecycle,
    token: Option<Zeroizing<String>>,
    channel: Option<ChannelHandle>,
    heartbeat: HeartbeatMonitor,
    pending_retry: Option<ReconnectTimer>,
    next_channel_id: u64,
    next_timer_id: u64,
}

impl Core {
    fn is_current(&self, channel_id: u64) -> bool {
        self.channel.as_ref().is_some_and(|c| c.id == channel_id)
    }

    fn cancel_retry(&mut self) {
        if let Some(timer) = self.pending_retry.take() {
            timer.cancel();
            debug!(timer_id = timer.id(), "Pending reconnect cancelled");
        }
    }
}

struct Inner {
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
    core: Mutex<Core>,
    router: MessageRouter,
}

/// WebSocket connection manager.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a connection manager using the tokio-tungstenite transport.
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_transport(config, Arc::new(TungsteniteTransport::new()))
    }

    /// Create a connection manager over a custom transport.
    pub fn with_transport(config: ConnectionConfig, transport: Arc<dyn Transport>) -> Self {
        let policy = config.reconnect_policy();
        let heartbeat = HeartbeatMonitor::new(config.heartbeat_interval());
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                core: Mutex::new(Core {
                    lifecycle: Lifecycle::new(policy),
                    token: None,
                    channel: None,
                    heartbeat,
                    pending_retry: None,
                    next_channel_id: 0,
                    next_timer_id: 0,
                }),
                router: MessageRouter::new(),
            }),
        }
    }

    /// Open the channel with `token`, replacing any existing one.
    ///
    /// An empty token is a logged no-op returning `MissingToken`.
    /// Outside a tokio runtime nothing is touched and `ConnectionFailed` is
    /// returned. Subscribers are kept across calls.
    pub fn connect(&self, token: &str) -> WsResult<()> {
        if token.is_empty() {
            warn!("connect called without auth token, ignoring");
            return Err(WsError::MissingToken);
        }

        if let Err(e) = tokio::runtime::Handle::try_current() {
            error!(?e, "connect called outside a tokio runtime");
            return Err(WsError::ConnectionFailed(format!("no tokio runtime: {e}")));
        }

        let url = channel_url(&self.inner.config.server_url, token)?;

        let mut core = self.inner.core.lock();
        core.token = Some(Zeroizing::new(token.to_string()));
        self.inner.open_channel(&mut core, url, ConnectOrigin::Manual);
        Ok(())
    }

    /// Tear down the connection. Idempotent.
    ///
    /// Cancels any pending retry, stops the heartbeat, closes the channel with
    /// code 1000, forgets the token and clears all subscribers. Events still in
    /// flight from the old channel are ignored.
    pub fn disconnect(&self) {
        let mut core = self.inner.core.lock();
        let was_active = core.channel.is_some() || core.pending_retry.is_some();

        core.lifecycle.disconnect();
        core.cancel_retry();
        core.heartbeat.stop();
        if let Some(channel) = core.channel.take() {
            debug!(channel_id = channel.id, "Closing channel");
            channel.close(CLOSE_NORMAL, "client disconnect");
        }
        core.token = None;
        drop(core);

        self.inner.router.clear();

        if was_active {
            info!("Disconnected");
        } else {
            debug!("disconnect called while already disconnected");
        }
    }

    /// Register a subscriber. Registering the same `Arc` twice returns the same id.
    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) -> SubscriberId {
        self.inner.router.subscribe(subscriber)
    }

    /// Register a closure subscriber.
    pub fn subscribe_fn<F>(&self, f: F) -> SubscriberId
    where
        F: Fn(&TaskEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.router.subscribe(Arc::new(f))
    }

    /// Register a subscriber that forwards events into a bounded channel.
    pub fn subscribe_channel(&self, capacity: usize) -> (SubscriberId, mpsc::Receiver<TaskEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        let id = self
            .inner
            .router
            .subscribe(Arc::new(ChannelSubscriber::new(tx)));
        (id, rx)
    }

    /// Returns whether `id` was registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.router.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.router.len()
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.inner.core.lock().lifecycle.phase()
    }

    /// True iff the phase is `Open`.
    pub fn is_connected(&self) -> bool {
        self.inner.core.lock().lifecycle.is_open()
    }

    /// Current reconnect attempt counter.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.core.lock().lifecycle.attempts()
    }

    pub fn max_reconnect_attempts(&self) -> u32 {
        self.inner.config.max_reconnect_attempts
    }

    /// Delay of the pending reconnect, if one is scheduled.
    pub fn pending_reconnect_delay(&self) -> Option<Duration> {
        self.inner
            .core
            .lock()
            .pending_retry
            .as_ref()
            .map(ReconnectTimer::delay)
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.inner.core.lock().heartbeat.is_running()
    }

    pub fn heartbeat_stats(&self) -> HeartbeatStats {
        self.inner.core.lock().heartbeat.stats()
    }
}

impl Inner {
    /// Replace the current channel with a new one to `url`.
    fn open_channel(self: &Arc<Self>, core: &mut Core, url: Url, origin: ConnectOrigin) {
        core.lifecycle.begin_connect(origin);
        core.cancel_retry();
        core.heartbeat.stop();
        if let Some(old) = core.channel.take() {
            debug!(channel_id = old.id, "Closing previous channel");
            old.close(CLOSE_NORMAL, "replaced");
        }

        core.next_channel_id += 1;
        let channel_id = core.next_channel_id;

        info!(
            channel_id,
            url = %redacted(&url),
            attempt = core.lifecycle.attempts(),
            ?origin,
            "Connecting to WebSocket"
        );

        match self.transport.open(&url) {
            Ok(channel) => {
                let pump = spawn_event_pump(Arc::downgrade(self), channel_id, channel.events);
                core.channel = Some(ChannelHandle {
                    id: channel_id,
                    outbound: channel.outbound,
                    pump,
                });
            }
            Err(e) => {
                error!(channel_id, ?e, "Channel establishment failed");
                self.on_channel_closed(core, CLOSE_ABNORMAL, &e.to_string());
            }
        }
    }

    fn handle_transport_event(self: &Arc<Self>, channel_id: u64, event: TransportEvent) {
        match event {
            TransportEvent::Open => {
                let mut core = self.core.lock();
                if !core.is_current(channel_id) {
                    debug!(channel_id, "Ignoring open from stale channel");
                    return;
                }
                match core.lifecycle.on_open() {
                    OpenAction::StartHeartbeat => {
                        if let Some(outbound) = core.channel.as_ref().map(|c| c.outbound.clone()) {
                            core.heartbeat.start(outbound);
                        }
                        info!(channel_id, "WebSocket channel open");
                    }
                    OpenAction::Abort => {
                        if let Some(channel) = core.channel.take() {
                            channel.close(CLOSE_NORMAL, "client disconnect");
                        }
                        info!(channel_id, "Channel opened after disconnect, closing");
                    }
                }
            }
            TransportEvent::Message(text) => {
                if !self.core.lock().is_current(channel_id) {
                    debug!(channel_id, "Ignoring message from stale channel");
                    return;
                }
                // Lock released: subscribers may call back into the manager.
                if self.router.route(&text) == RouteOutcome::Pong {
                    self.core.lock().heartbeat.record_pong();
                }
            }
            TransportEvent::Error(e) => {
                // The close event that follows drives the state transition.
                warn!(channel_id, error = %e, "WebSocket transport error");
            }
            TransportEvent::Closed { code, reason } => {
                let mut core = self.core.lock();
                if !core.is_current(channel_id) {
                    debug!(channel_id, code, "Ignoring close from stale channel");
                    return;
                }
                core.channel = None;
                self.on_channel_closed(&mut core, code, &reason);
            }
        }
    }

    /// Apply a close (or establishment failure) of the current channel.
    fn on_channel_closed(self: &Arc<Self>, core: &mut Core, code: u16, reason: &str) {
        core.heartbeat.stop();

        match core.lifecycle.on_close(code) {
            CloseAction::ManualDisconnect => {
                debug!(code, "Channel closed after manual disconnect");
            }
            CloseAction::NormalClosure => {
                info!(code, %reason, "Channel closed normally, not reconnecting");
            }
            CloseAction::Reconnect { attempt, delay } => {
                warn!(
                    code,
                    %reason,
                    attempt,
                    max_attempts = core.lifecycle.policy().max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Channel closed unexpectedly, scheduling reconnect"
                );
                Metrics::ws_reconnect();
                core.next_timer_id += 1;
                let timer_id = core.next_timer_id;
                let weak = Arc::downgrade(self);
                core.pending_retry = Some(ReconnectTimer::schedule(timer_id, delay, move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_retry_timer(timer_id);
                    }
                }));
            }
            CloseAction::Exhausted { attempts } => {
                error!(
                    code,
                    %reason,
                    attempts,
                    "Max reconnection attempts reached, waiting for manual connect"
                );
            }
        }
    }

    fn on_retry_timer(self: &Arc<Self>, timer_id: u64) {
        let mut core = self.core.lock();

        if core.pending_retry.as_ref().map(ReconnectTimer::id) != Some(timer_id) {
            debug!(timer_id, "Ignoring superseded reconnect timer");
            return;
        }
        core.pending_retry = None;

        if core.lifecycle.is_manually_disconnected() {
            return;
        }

        let url = match core.token.as_ref() {
            Some(token) => channel_url(&self.config.server_url, token),
            None => {
                warn!("Reconnect timer fired without a token");
                return;
            }
        };

        match url {
            Ok(url) => self.open_channel(&mut core, url, ConnectOrigin::Retry),
            Err(e) => error!(?e, "Failed to build reconnect URL"),
        }
    }
}

/// Forward transport events for `channel_id` into the manager.
///
/// A channel whose event stream ends without a close event is treated as an
/// abnormal close.
fn spawn_event_pump(
    inner: Weak<Inner>,
    channel_id: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let closed = matches!(event, TransportEvent::Closed { .. });
            inner.handle_transport_event(channel_id, event);
            if closed {
                return;
            }
        }

        if let Some(inner) = inner.upgrade() {
            inner.handle_transport_event(
                channel_id,
                TransportEvent::Closed {
                    code: CLOSE_ABNORMAL,
                    reason: "transport ended".to_string(),
                },
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportChannel;

    /// Transport whose construction always fails.
    struct FailingTransport;

    impl Transport for FailingTransport {
        fn open(&self, _url: &Url) -> WsResult<TransportChannel> {
            Err(WsError::ConnectionFailed("refused".to_string()))
        }
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            server_url: "http://localhost:8000".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.heartbeat_interval_ms, 30000);
        assert_eq!(config.reconnect_policy(), ReconnectPolicy::default());
    }

    #[test]
    fn test_zero_heartbeat_interval_falls_back_to_default() {
        let zero = ConnectionConfig {
            heartbeat_interval_ms: 0,
            ..config()
        };
        assert_eq!(zero.heartbeat_interval(), Duration::from_millis(30000));
        assert_eq!(config().heartbeat_interval(), Duration::from_millis(30000));

        let custom = ConnectionConfig {
            heartbeat_interval_ms: 250,
            ..config()
        };
        assert_eq!(custom.heartbeat_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_connect_outside_runtime_fails_without_side_effects() {
        let manager = ConnectionManager::new(config());
        assert!(matches!(
            manager.connect("tok"),
            Err(WsError::ConnectionFailed(_))
        ));
        assert_eq!(manager.phase(), ConnectionPhase::Closed);
        assert_eq!(manager.reconnect_attempts(), 0);
        assert!(manager.pending_reconnect_delay().is_none());

        let manager = ConnectionManager::with_transport(config(), Arc::new(FailingTransport));
        assert!(manager.connect("tok").is_err());
        assert!(manager.pending_reconnect_delay().is_none());
        manager.disconnect();
    }

    #[tokio::test]
    async fn test_connect_without_token_is_noop() {
        let manager = ConnectionManager::with_transport(config(), Arc::new(FailingTransport));
        assert!(matches!(manager.connect(""), Err(WsError::MissingToken)));
        assert_eq!(manager.phase(), ConnectionPhase::Closed);
        assert!(manager.pending_reconnect_delay().is_none());
    }

    #[tokio::test]
    async fn test_connect_with_bad_origin_fails() {
        let manager = ConnectionManager::with_transport(
            ConnectionConfig::default(),
            Arc::new(FailingTransport),
        );
        assert!(manager.connect("tok").is_err());
        assert_eq!(manager.phase(), ConnectionPhase::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_establishment_failure_schedules_retry() {
        let manager = ConnectionManager::with_transport(config(), Arc::new(FailingTransport));
        manager.connect("tok").unwrap();

        assert_eq!(manager.phase(), ConnectionPhase::Closed);
        assert_eq!(manager.reconnect_attempts(), 1);
        assert_eq!(
            manager.pending_reconnect_delay(),
            Some(Duration::from_millis(3000))
        );

        manager.disconnect();
        assert!(manager.pending_reconnect_delay().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_without_connect() {
        let manager = ConnectionManager::with_transport(config(), Arc::new(FailingTransport));
        manager.disconnect();
        manager.disconnect();
        assert_eq!(manager.phase(), ConnectionPhase::Closed);
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_clears_subscribers() {
        let manager = ConnectionManager::with_transport(config(), Arc::new(FailingTransport));
        manager.subscribe_fn(|_| Ok(()));
        let (_id, _rx) = manager.subscribe_channel(8);
        assert_eq!(manager.subscriber_count(), 2);

        manager.disconnect();
        assert_eq!(manager.subscriber_count(), 0);
    }
}
