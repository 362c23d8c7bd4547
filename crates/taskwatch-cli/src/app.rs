//! Main application orchestration.
//!
//! Owns the connection manager and the state sampler for the lifetime of the
//! process, prints task events as they arrive and reports when the dashboard
//! should fall back to polling.

use crate::config::AppConfig;
use crate::error::AppResult;
use chrono::Utc;
use std::future::Future;
use taskwatch_telemetry::Metrics;
use taskwatch_ws::{
    channel_url, ConnectionManager, ConnectionStateSampler, PresentationState, RefreshStrategy,
    StateChangeCallback, TaskEvent,
};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Buffered events between the router and the print loop.
const EVENT_BUFFER: usize = 256;

/// Main application.
pub struct Application {
    config: AppConfig,
    manager: ConnectionManager,
    token: Option<Zeroizing<String>>,
}

impl Application {
    /// Create a new application. Fails fast on an unusable server origin.
    pub fn new(config: AppConfig, token: Option<String>) -> AppResult<Self> {
        let token = token.filter(|t| !t.is_empty()).map(Zeroizing::new);
        if let Some(token) = token.as_ref() {
            channel_url(&config.server_url, token)?;
        }

        let manager = ConnectionManager::new(config.connection_config());
        Ok(Self {
            config,
            manager,
            token,
        })
    }

    /// Handle to the underlying manager.
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Run until Ctrl+C.
    pub async fn run(self) -> AppResult<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(?e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run until `shutdown` completes.
    pub async fn run_until<F>(self, shutdown: F) -> AppResult<()>
    where
        F: Future<Output = ()>,
    {
        info!(server_url = %self.config.server_url, "Starting live tap");

        let (subscriber_id, mut events) = self.manager.subscribe_channel(EVENT_BUFFER);
        debug!(%subscriber_id, "Event printer subscribed");

        let sampler = ConnectionStateSampler::start(
            self.manager.clone(),
            self.token.as_ref().map(|t| t.as_str()),
            self.config.sampler_config(),
            Some(state_reporter()),
        );

        if !sampler.is_active() {
            let state = sampler.state();
            Metrics::ws_state_set(state_label(&state));
            warn!(status = %state, "Live updates inactive, refresh by polling");
        }

        tokio::pin!(shutdown);
        let mut event_count = 0u64;

        loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    event_count += 1;
                    record_event(&event);
                    println!("{}", render_event(&event));
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        sampler.teardown();
        info!(event_count, "Live tap stopped");

        match Metrics::encode_text() {
            Ok(text) => debug!(metrics = %text, "Final metrics"),
            Err(e) => warn!(?e, "Failed to encode metrics"),
        }

        Ok(())
    }
}

/// Callback for the sampler: log the status line and update metrics.
fn state_reporter() -> StateChangeCallback {
    Box::new(|state: PresentationState| {
        Metrics::ws_state_set(state_label(&state));

        match state.refresh_strategy() {
            RefreshStrategy::Live => info!(status = %state, "Connection status"),
            RefreshStrategy::Polling => {
                warn!(status = %state, "Connection status, falling back to polling")
            }
        }
    })
}

/// Metric label for a presentation state.
pub fn state_label(state: &PresentationState) -> &'static str {
    match state {
        PresentationState::Connected => "connected",
        PresentationState::Reconnecting { .. } => "reconnecting",
        PresentationState::Offline => "offline",
    }
}

fn record_event(event: &TaskEvent) {
    let delay_ms = event
        .data
        .parsed_timestamp()
        .map(|ts| (Utc::now() - ts).num_milliseconds() as f64);
    Metrics::event_received(event.kind.as_str(), delay_ms);
}

/// One terminal line per event.
pub fn render_event(event: &TaskEvent) -> String {
    let data = &event.data;
    let mut line = format!(
        "[{}] task {} ({}) {}",
        data.timestamp, data.task_id, data.task_type, event.kind
    );
    if let Some(status) = &data.status {
        line.push_str(&format!(" status={status}"));
    }
    if let Some(progress) = data.progress {
        line.push_str(&format!(" progress={progress:.1}%"));
    }
    if let Some(execution_id) = data.execution_id {
        line.push_str(&format!(" execution={execution_id}"));
    }
    if let Some(error) = &data.error_message {
        line.push_str(&format!(" error=\"{error}\""));
    }
    line
}
