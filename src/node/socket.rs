use std::{sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};
use tracing::{debug, trace};

use super::{
    Node,
    constants::{ABNORMAL_CLOSE_CODE, CLOSE_FLUSH_TIMEOUT_MS, NO_STATUS_CLOSE_CODE},
};
use crate::common::ClientError;

pub(super) type NodeStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Drives one socket until it closes, then reports the close to the node.
///
/// Outbound frames come from `rx`; once the node detaches the socket the
/// sender is dropped and the loop flushes a close and exits.
pub(super) async fn run(
    node: Arc<Node>,
    generation: u64,
    ws: NodeStream,
    rx: flume::Receiver<Message>,
) {
    let (mut write, mut read) = ws.split();

    let (code, reason) = loop {
        tokio::select! {
            outbound = rx.recv_async() => match outbound {
                Ok(msg) => {
                    let closing = matches!(msg, Message::Close(_));
                    if let Err(e) = write.send(msg).await {
                        debug!("[{}] Socket #{} write failed: {}", node.host(), generation, e);
                        if node.is_current(generation) {
                            node.emit_error(ClientError::from(e));
                        }
                        break (ABNORMAL_CLOSE_CODE, "write failed".to_string());
                    }
                    if closing {
                        trace!("[{}] Close frame sent on socket #{}", node.host(), generation);
                    }
                }
                Err(_) => {
                    // Detached by the node: finish the close handshake and stop.
                    let _ = tokio::time::timeout(
                        Duration::from_millis(CLOSE_FLUSH_TIMEOUT_MS),
                        write.close(),
                    )
                    .await;
                    break (NO_STATUS_CLOSE_CODE, "detached".to_string());
                }
            },
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => node.handle_text(generation, text.as_str()),
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((NO_STATUS_CLOSE_CODE, String::new()));
                }
                Some(Ok(Message::Binary(data))) => {
                    debug!("[{}] Ignoring {} byte binary frame", node.host(), data.len());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("[{}] Socket #{} read failed: {}", node.host(), generation, e);
                    if node.is_current(generation) {
                        node.emit_error(ClientError::from(e));
                    }
                    break (ABNORMAL_CLOSE_CODE, "read failed".to_string());
                }
                None => break (ABNORMAL_CLOSE_CODE, "stream ended".to_string()),
            },
        }
    };

    trace!(
        "[{}] Socket #{} loop ended: code={}, reason='{}'",
        node.host(),
        generation,
        code,
        reason
    );
    node.handle_close(generation, code, &reason);
}
