//! In-process stand-ins for the audio node and the chat gateway.

use std::{net::SocketAddr, time::Duration};

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{
        Message,
        handshake::server::{ErrorResponse, Request, Response},
        http::HeaderMap,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};

use crate::{configs::NodeOptions, manager::GatewaySender, protocol::VoiceStateUpdate};

const WAIT: Duration = Duration::from_secs(5);

/// Decodes every text frame queued on an outbound channel.
pub fn drain_frames(rx: &flume::Receiver<Message>) -> Vec<Value> {
    rx.try_iter()
        .filter_map(|msg| match msg {
            Message::Text(text) => serde_json::from_str(text.as_str()).ok(),
            _ => None,
        })
        .collect()
}

/// Chat gateway that records every frame it is asked to send.
#[derive(Default)]
pub struct RecordingGateway {
    frames: Mutex<Vec<Value>>,
}

impl RecordingGateway {
    pub fn frames(&self) -> Vec<Value> {
        self.frames.lock().clone()
    }
}

impl GatewaySender for RecordingGateway {
    fn send_voice_state(&self, update: &VoiceStateUpdate) {
        let frame = serde_json::to_value(update.to_frame()).unwrap_or(Value::Null);
        self.frames.lock().push(frame);
    }
}

/// WebSocket server on an ephemeral local port that hands each accepted
/// connection to the test.
pub struct MockNode {
    addr: SocketAddr,
    conns: mpsc::UnboundedReceiver<MockConn>,
}

pub struct MockConn {
    pub headers: HeaderMap,
    pub ws: WebSocketStream<TcpStream>,
}

impl MockNode {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, conns) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let mut headers = HeaderMap::new();
                let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    headers = req.headers().clone();
                    Ok(resp)
                };
                let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                    continue;
                };
                if tx.send(MockConn { headers, ws }).is_err() {
                    break;
                }
            }
        });

        Self { addr, conns }
    }

    pub fn options(&self) -> NodeOptions {
        NodeOptions::new("127.0.0.1", self.addr.port()).with_password("s3cret")
    }

    pub async fn accept(&mut self) -> MockConn {
        tokio::time::timeout(WAIT, self.conns.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("mock node stopped")
    }
}

impl MockConn {
    pub async fn send_text(&mut self, text: &str) {
        self.ws.send(Message::Text(text.into())).await.unwrap();
    }

    pub async fn send_json(&mut self, value: Value) {
        self.send_text(&value.to_string()).await;
    }

    pub async fn close(&mut self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        let _ = self.ws.close(Some(frame)).await;
    }

    /// Next text frame from the client, decoded.
    pub async fn next_json(&mut self) -> Value {
        loop {
            let msg = tokio::time::timeout(WAIT, self.ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("connection ended")
                .expect("read failed");
            if let Message::Text(text) = msg {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }
}
