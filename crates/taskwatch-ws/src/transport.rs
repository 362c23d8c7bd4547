//! Transport abstraction.
//!
//! Mirrors the event model of a browser WebSocket: synchronous construction,
//! then `Open`, `Message`, `Error` and `Closed` events on a channel. The
//! connection manager is the only caller.

use crate::error::{WsError, WsResult};
use crate::lifecycle::{CLOSE_ABNORMAL, CLOSE_NO_STATUS};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

/// Event reported by a transport channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed.
    Open,
    /// Text frame received.
    Message(String),
    /// Transport-level error. Always followed by `Closed`.
    Error(String),
    /// Channel closed. Terminal.
    Closed { code: u16, reason: String },
}

/// Frame queued for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Close { code: u16, reason: String },
}

/// Both ends of a freshly constructed channel.
#[derive(Debug)]
pub struct TransportChannel {
    pub outbound: mpsc::UnboundedSender<OutboundFrame>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Channel factory.
pub trait Transport: Send + Sync + 'static {
    /// Construct a channel to `url`.
    ///
    /// Returns immediately; the handshake outcome arrives as an event. An
    /// `Err` means construction itself failed.
    fn open(&self, url: &Url) -> WsResult<TransportChannel>;
}

/// Production transport over tokio-tungstenite.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteTransport;

impl TungsteniteTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for TungsteniteTransport {
    fn open(&self, url: &Url) -> WsResult<TransportChannel> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| WsError::ConnectionFailed(format!("no tokio runtime: {e}")))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        runtime.spawn(run_channel(url.clone(), outbound_rx, events_tx));

        Ok(TransportChannel {
            outbound: outbound_tx,
            events: events_rx,
        })
    }
}

/// Drive one WebSocket connection until it closes.
/// Report a fatal channel error: `Error` followed by an abnormal close.
fn report_failure(events: &mpsc::UnboundedSender<TransportEvent>, error: WsError) {
    let reason = error.to_string();
    let _ = events.send(TransportEvent::Error(reason.clone()));
    let _ = events.send(TransportEvent::Closed {
        code: CLOSE_ABNORMAL,
        reason,
    });
}

async fn run_channel(
    url: Url,
    mut outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    // TCP_NODELAY: heartbeats and status updates are small frames
    let connect = connect_async_tls_with_config(url.as_str(), None, true, None);
    tokio::pin!(connect);

    let ws_stream = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok((ws_stream, _response)) => break ws_stream,
                Err(e) => {
                    warn!(?e, "WebSocket handshake failed");
                    report_failure(&events, e.into());
                    return;
                }
            },
            frame = outbound.recv() => match frame {
                Some(OutboundFrame::Close { code, reason }) => {
                    debug!(code, "Channel closed before handshake completed");
                    let _ = events.send(TransportEvent::Closed { code, reason });
                    return;
                }
                Some(OutboundFrame::Text(_)) => {
                    debug!("Dropping frame queued before handshake completed");
                }
                None => return,
            },
        }
    };

    info!("WebSocket connected");
    if events.send(TransportEvent::Open).is_err() {
        return;
    }

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if events.send(TransportEvent::Message(text)).is_err() {
                            // Owner dropped the channel.
                            let _ = write.send(Message::Close(None)).await;
                            return;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        debug!("Received ping, sending pong");
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            warn!(?e, "Failed to answer protocol ping");
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (f.code.into(), f.reason.to_string()))
                            .unwrap_or((CLOSE_NO_STATUS, String::new()));
                        info!(code, %reason, "WebSocket closed by server");
                        let _ = events.send(TransportEvent::Closed { code, reason });
                        return;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!(len = data.len(), "Ignoring binary frame");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(?e, "WebSocket read error");
                        report_failure(&events, e.into());
                        return;
                    }
                    None => {
                        warn!("WebSocket stream ended");
                        let _ = events.send(TransportEvent::Closed {
                            code: CLOSE_ABNORMAL,
                            reason: "stream ended".to_string(),
                        });
                        return;
                    }
                }
            }

            frame = outbound.recv() => {
                match frame {
                    Some(OutboundFrame::Text(text)) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            warn!(?e, "WebSocket write error");
                            report_failure(&events, e.into());
                            return;
                        }
                    }
                    Some(OutboundFrame::Close { code, reason }) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.clone().into(),
                        };
                        if let Err(e) = write.send(Message::Close(Some(frame))).await {
                            debug!(?e, "Failed to send close frame");
                        }
                        let _ = events.send(TransportEvent::Closed { code, reason });
                        return;
                    }
                    None => {
                        let _ = write.send(Message::Close(None)).await;
                        return;
                    }
                }
            }
        }
    }
}
