//! Connection lifecycle state machine.
//!
//! Pure bookkeeping with no I/O: the connection manager feeds it transport
//! events and executes the action it returns. Every retry/no-retry decision
//! is made here.

use crate::reconnect::ReconnectPolicy;
use std::time::Duration;

/// WebSocket close code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code reported when no close frame was received.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Close code for an abnormal closure (connection lost, establishment failure).
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Connection phase.
///
/// `Open` implies a live channel and a running heartbeat; `Closed` implies
/// neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    Connecting,
    Open,
    #[default]
    Closed,
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Open => write!(f, "OPEN"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Who asked for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOrigin {
    /// Caller invoked `connect`.
    Manual,
    /// Reconnect timer expired.
    Retry,
}

/// Decision taken on an open event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAction {
    /// Channel is live: start the heartbeat.
    StartHeartbeat,
    /// A disconnect raced the attempt: close the channel instead.
    Abort,
}

/// Decision taken on a close event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Caller disconnected; nothing to do.
    ManualDisconnect,
    /// Server closed with code 1000; treated like a manual disconnect.
    NormalClosure,
    /// Schedule retry number `attempt` after `delay`.
    Reconnect { attempt: u32, delay: Duration },
    /// Cap reached; wait for a fresh manual connect.
    Exhausted { attempts: u32 },
}

/// Phase, reconnect counter and manual-disconnect intent.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    phase: ConnectionPhase,
    attempts: u32,
    manual_disconnect: bool,
    policy: ReconnectPolicy,
}

impl Lifecycle {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            phase: ConnectionPhase::Closed,
            attempts: 0,
            manual_disconnect: false,
            policy,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn is_open(&self) -> bool {
        self.phase == ConnectionPhase::Open
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_manually_disconnected(&self) -> bool {
        self.manual_disconnect
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// A new channel is being constructed.
    ///
    /// A manual connect clears the disconnect intent and re-arms the retry
    /// budget; a retry keeps counting.
    pub fn begin_connect(&mut self, origin: ConnectOrigin) {
        if origin == ConnectOrigin::Manual {
            self.manual_disconnect = false;
            self.attempts = 0;
        }
        self.phase = ConnectionPhase::Connecting;
    }

    /// The transport reported open.
    pub fn on_open(&mut self) -> OpenAction {
        if self.manual_disconnect {
            self.phase = ConnectionPhase::Closed;
            return OpenAction::Abort;
        }
        self.phase = ConnectionPhase::Open;
        self.attempts = 0;
        OpenAction::StartHeartbeat
    }

    /// The transport reported close (or could not be constructed).
    pub fn on_close(&mut self, code: u16) -> CloseAction {
        self.phase = ConnectionPhase::Closed;

        if self.manual_disconnect {
            return CloseAction::ManualDisconnect;
        }
        if code == CLOSE_NORMAL {
            return CloseAction::NormalClosure;
        }

        let attempt = self.attempts.saturating_add(1);
        if !self.policy.allows(attempt) {
            self.attempts = self.policy.max_attempts;
            return CloseAction::Exhausted {
                attempts: self.attempts,
            };
        }

        self.attempts = attempt;
        CloseAction::Reconnect {
            attempt,
            delay: self.policy.delay(attempt),
        }
    }

    /// Caller requested teardown. Idempotent.
    pub fn disconnect(&mut self) {
        self.manual_disconnect = true;
        self.phase = ConnectionPhase::Closed;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}
