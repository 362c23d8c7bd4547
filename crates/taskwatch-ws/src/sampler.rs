//! Connection state sampler.
//!
//! Periodically reads the connection manager and reduces it to a three-value
//! presentation state. Consumers are notified only when the value changes.
//! The sampler also owns the manager's lifecycle for its owner: it connects
//! on start when a token is available and disconnects exactly once on
//! teardown.

use crate::connection::ConnectionManager;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Render-friendly connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresentationState {
    Connected,
    Reconnecting { attempt: u32, max: u32 },
    /// Never connected, or retries exhausted.
    #[default]
    Offline,
}

impl PresentationState {
    /// Reduce connection counters to a presentation state.
    pub fn derive(connected: bool, attempts: u32, max_attempts: u32) -> Self {
        if connected {
            Self::Connected
        } else if attempts > 0 && attempts < max_attempts {
            Self::Reconnecting {
                attempt: attempts,
                max: max_attempts,
            }
        } else {
            Self::Offline
        }
    }

    /// Refresh strategy the rest of the application should use.
    pub fn refresh_strategy(&self) -> RefreshStrategy {
        match self {
            Self::Offline => RefreshStrategy::Polling,
            Self::Connected | Self::Reconnecting { .. } => RefreshStrategy::Live,
        }
    }
}

impl std::fmt::Display for PresentationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "Connected"),
            Self::Reconnecting { attempt, max } => write!(f, "Reconnecting… ({attempt}/{max})"),
            Self::Offline => write!(f, "Offline – Using polling"),
        }
    }
}

/// How data should be refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStrategy {
    /// Live push updates.
    Live,
    /// Polling fallback over REST.
    Polling,
}

/// Sampler options.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub enabled: bool,
    pub interval: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_millis(1000),
        }
    }
}

/// Called with the new state on every change.
pub type StateChangeCallback = Box<dyn Fn(PresentationState) + Send + Sync>;

type SharedCallback = Arc<dyn Fn(PresentationState) + Send + Sync>;

/// A running sampling loop.
struct SamplingRun {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SamplingRun {
    fn stop(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// Periodic sampler over a `ConnectionManager`.
///
/// Active while it holds a token: starting with a token, or later gaining
/// one through `update_token`, connects the manager and starts sampling.
pub struct ConnectionStateSampler {
    manager: ConnectionManager,
    config: SamplerConfig,
    on_change: Option<SharedCallback>,
    state_tx: watch::Sender<PresentationState>,
    run: Mutex<Option<SamplingRun>>,
    torn_down: AtomicBool,
}

impl ConnectionStateSampler {
    /// Start sampling `manager`.
    ///
    /// When enabled and `token` is non-empty, connects the manager and starts
    /// the sampling loop. Otherwise the sampler stays inactive and reports
    /// `Offline` until a token arrives.
    pub fn start(
        manager: ConnectionManager,
        token: Option<&str>,
        config: SamplerConfig,
        on_change: Option<StateChangeCallback>,
    ) -> Self {
        let (state_tx, _) = watch::channel(PresentationState::Offline);
        let sampler = Self {
            manager,
            config,
            on_change: on_change.map(Arc::from),
            state_tx,
            run: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        };

        match token.filter(|t| !t.is_empty()) {
            Some(token) => sampler.activate(token),
            None => info!("No auth token, live updates inactive"),
        }
        sampler
    }

    /// Latest sampled state.
    pub fn state(&self) -> PresentationState {
        *self.state_tx.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch(&self) -> watch::Receiver<PresentationState> {
        self.state_tx.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.run.lock().is_some()
    }

    /// React to the owner's token changing.
    ///
    /// Losing the token tears the sampler down. A new token reconnects an
    /// active sampler and activates an inactive one.
    pub fn update_token(&self, token: Option<&str>) {
        match token.filter(|t| !t.is_empty()) {
            None => self.teardown(),
            Some(token) if self.is_active() => {
                if let Err(e) = self.manager.connect(token) {
                    warn!(?e, "Reconnect with new token failed");
                }
            }
            Some(token) => self.activate(token),
        }
    }

    /// Stop sampling and disconnect the manager.
    ///
    /// Runs at most once per activation; repeated calls are no-ops.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(run) = self.run.lock().take() {
            run.stop();
        }
        self.manager.disconnect();
        self.state_tx.send_replace(PresentationState::Offline);
        debug!("Connection sampler torn down");
    }

    /// Connect with `token` and start the sampling loop.
    fn activate(&self, token: &str) {
        if !self.config.enabled {
            debug!("Connection sampler disabled");
            return;
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(?e, "No tokio runtime, live updates inactive");
                return;
            }
        };

        let mut run = self.run.lock();
        if run.is_some() {
            return;
        }
        self.torn_down.store(false, Ordering::SeqCst);

        if let Err(e) = self.manager.connect(token) {
            warn!(?e, "Initial connect failed");
        }

        let cancel = CancellationToken::new();
        let task = runtime.spawn(sample_loop(
            self.manager.clone(),
            self.config.interval,
            self.state_tx.clone(),
            cancel.clone(),
            self.on_change.clone(),
        ));
        *run = Some(SamplingRun { cancel, task });
        info!("Live updates active");
    }
}

impl Drop for ConnectionStateSampler {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn sample_loop(
    manager: ConnectionManager,
    period: Duration,
    state_tx: watch::Sender<PresentationState>,
    cancel: CancellationToken,
    on_change: Option<SharedCallback>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last = *state_tx.borrow();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let state = PresentationState::derive(
                    manager.is_connected(),
                    manager.reconnect_attempts(),
                    manager.max_reconnect_attempts(),
                );
                if state == last {
                    continue;
                }

                debug!(from = %last, to = %state, "Connection state changed");
                last = state;
                state_tx.send_replace(state);
                if let Some(callback) = on_change.as_ref() {
                    callback(state);
                }
            }
        }
    }
}
