//! In-memory transport for integration tests.
//!
//! Records every channel construction and lets a test play the server side:
//! - Fire `Open`, `Message`, `Error` and `Closed` events on any channel
//! - Inspect frames the client queued (heartbeats, close frames)
//! - Make the next constructions fail synchronously

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use taskwatch_ws::{
    OutboundFrame, Transport, TransportChannel, TransportEvent, WsError, WsResult,
};
use tokio::sync::mpsc;
use url::Url;

struct MockChannel {
    url: Url,
    events: mpsc::UnboundedSender<TransportEvent>,
    outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    sent: Vec<OutboundFrame>,
}

#[derive(Default)]
struct MockState {
    channels: Vec<MockChannel>,
    attempts: usize,
    fail_next: usize,
}

/// Transport test double.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of construction attempts, failed ones included.
    pub fn constructions(&self) -> usize {
        self.state.lock().attempts
    }

    /// Number of channels successfully constructed.
    pub fn channel_count(&self) -> usize {
        self.state.lock().channels.len()
    }

    /// Index of the most recent channel.
    pub fn last(&self) -> usize {
        self.channel_count()
            .checked_sub(1)
            .expect("no channel constructed")
    }

    pub fn url(&self, index: usize) -> Url {
        self.state.lock().channels[index].url.clone()
    }

    /// Make the next `n` constructions fail.
    pub fn fail_next(&self, n: usize) {
        self.state.lock().fail_next = n;
    }

    pub fn open(&self, index: usize) {
        self.emit(index, TransportEvent::Open);
    }

    pub fn message(&self, index: usize, text: &str) {
        self.emit(index, TransportEvent::Message(text.to_string()));
    }

    pub fn error(&self, index: usize, reason: &str) {
        self.emit(index, TransportEvent::Error(reason.to_string()));
    }

    pub fn close(&self, index: usize, code: u16) {
        self.emit(
            index,
            TransportEvent::Closed {
                code,
                reason: String::new(),
            },
        );
    }

    /// All frames the client queued on channel `index` so far.
    pub fn sent(&self, index: usize) -> Vec<OutboundFrame> {
        let mut state = self.state.lock();
        let channel = &mut state.channels[index];
        while let Ok(frame) = channel.outbound.try_recv() {
            channel.sent.push(frame);
        }
        channel.sent.clone()
    }

    pub fn pings_sent(&self, index: usize) -> usize {
        self.sent(index)
            .iter()
            .filter(|f| matches!(f, OutboundFrame::Text(t) if t == r#"{"type":"ping"}"#))
            .count()
    }

    pub fn close_frames(&self, index: usize) -> Vec<u16> {
        self.sent(index)
            .iter()
            .filter_map(|f| match f {
                OutboundFrame::Close { code, .. } => Some(*code),
                OutboundFrame::Text(_) => None,
            })
            .collect()
    }

    fn emit(&self, index: usize, event: TransportEvent) {
        // Ignore send errors: the client may already have dropped this channel.
        let _ = self.state.lock().channels[index].events.send(event);
    }
}

impl Transport for MockTransport {
    fn open(&self, url: &Url) -> WsResult<TransportChannel> {
        let mut state = self.state.lock();
        state.attempts += 1;

        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(WsError::ConnectionFailed("mock refused".to_string()));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        state.channels.push(MockChannel {
            url: url.clone(),
            events: events_tx,
            outbound: outbound_rx,
            sent: Vec::new(),
        });

        Ok(TransportChannel {
            outbound: outbound_tx,
            events: events_rx,
        })
    }
}

/// Let spawned tasks process queued events without advancing time.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Advance paused time by `ms` and let tasks run.
pub async fn advance_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    settle().await;
}
