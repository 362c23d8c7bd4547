//! Mock task-status server for integration tests.
//!
//! Provides a WebSocket server that can:
//! - Accept connections and record the request path
//! - Push queued frames to every new connection
//! - Record received text frames and client close codes
//! - Close every open connection with a given code

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};

#[derive(Default)]
struct Recorded {
    connections: u32,
    requests: Vec<String>,
    messages: Vec<String>,
    close_codes: Vec<u16>,
    greeting: Vec<String>,
}

/// A mock WebSocket server for testing.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    close_tx: broadcast::Sender<u16>,
    recorded: Arc<Mutex<Recorded>>,
}

impl MockWsServer {
    /// Start a new mock server on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (close_tx, _) = broadcast::channel::<u16>(8);

        let recorded_clone = recorded.clone();
        let close_clone = close_tx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        tokio::spawn(handle_connection(
                            stream,
                            recorded_clone.clone(),
                            close_clone.subscribe(),
                        ));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            close_tx,
            recorded,
        }
    }

    /// Page origin pointing at this server.
    pub fn origin(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Queue a frame sent to every connection right after the handshake.
    pub fn push_greeting(&self, text: &str) {
        self.recorded.lock().unwrap().greeting.push(text.to_string());
    }

    pub fn connection_count(&self) -> u32 {
        self.recorded.lock().unwrap().connections
    }

    /// Request URIs (path and query) in connection order.
    pub fn requests(&self) -> Vec<String> {
        self.recorded.lock().unwrap().requests.clone()
    }

    pub fn received_messages(&self) -> Vec<String> {
        self.recorded.lock().unwrap().messages.clone()
    }

    /// Close codes sent by clients.
    pub fn close_codes(&self) -> Vec<u16> {
        self.recorded.lock().unwrap().close_codes.clone()
    }

    /// Close every open connection with `code`.
    pub fn close_all(&self, code: u16) {
        let _ = self.close_tx.send(code);
    }

    /// Shutdown the listener.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    recorded: Arc<Mutex<Recorded>>,
    mut close_rx: broadcast::Receiver<u16>,
) {
    let recorded_hdr = recorded.clone();
    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let mut rec = recorded_hdr.lock().unwrap();
        rec.connections += 1;
        rec.requests.push(req.uri().to_string());
        Ok(resp)
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    let greeting = recorded.lock().unwrap().greeting.clone();
    for text in greeting {
        if write.send(Message::Text(text)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    recorded.lock().unwrap().messages.push(text);
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code)).unwrap_or(1005);
                    recorded.lock().unwrap().close_codes.push(code);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => break,
            },
            Ok(code) = close_rx.recv() => {
                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: "".into(),
                };
                let _ = write.send(Message::Close(Some(frame))).await;
                // Drain until the client acknowledges.
                while let Some(Ok(msg)) = read.next().await {
                    if msg.is_close() {
                        break;
                    }
                }
                break;
            }
        }
    }
}
