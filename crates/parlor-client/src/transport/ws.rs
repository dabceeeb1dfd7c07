use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use parlor_types::api::GraphQlRequest;
use parlor_types::events::{ClientFrame, ConnectionParams, SUBPROTOCOL, ServerFrame};

use crate::error::TransportError;
use crate::transport::{Handshake, StreamConnector, StreamHandle, StreamItem, response_data};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Sender = SplitSink<Socket, Message>;
type Receiver = SplitStream<Socket>;

/// Payloads buffered between the socket task and the consumer.
const EVENT_BUFFER: usize = 64;

/// `graphql-ws` subscriptions over a WebSocket. One socket per subscription;
/// the token goes in `connection_init` and nowhere else.
pub struct WsStreamConnector {
    url: String,
    handshake_timeout: Duration,
    keepalive_timeout: Option<Duration>,
}

impl WsStreamConnector {
    pub fn new(url: impl Into<String>, handshake_timeout: Duration, keepalive_timeout: Option<Duration>) -> Self {
        Self {
            url: url.into(),
            handshake_timeout,
            keepalive_timeout,
        }
    }
}

#[async_trait]
impl StreamConnector for WsStreamConnector {
    async fn connect(
        &self,
        handshake: Handshake,
        request: &GraphQlRequest,
    ) -> Result<StreamHandle, TransportError> {
        let mut upgrade = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        upgrade
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));

        let (socket, _) = timeout(self.handshake_timeout, connect_async(upgrade))
            .await
            .map_err(|_| TransportError::Network(format!("connecting to {} timed out", self.url)))?
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let (mut sender, mut receiver) = socket.split();

        let init = ClientFrame::ConnectionInit {
            payload: ConnectionParams {
                auth_token: handshake.credential.map(|c| c.token().to_string()),
            },
        };
        send_frame(&mut sender, &init).await?;

        timeout(self.handshake_timeout, wait_for_ack(&mut receiver))
            .await
            .map_err(|_| TransportError::Network("no connection_ack before timeout".into()))??;

        let operation_id = Uuid::new_v4().to_string();
        send_frame(
            &mut sender,
            &ClientFrame::Start {
                id: operation_id.clone(),
                payload: request.clone(),
            },
        )
        .await?;

        info!(
            "Subscribed {} on {} as {}",
            request.operation_name().unwrap_or("<anonymous>"),
            self.url,
            operation_id
        );

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_socket(
            sender,
            receiver,
            operation_id,
            tx,
            shutdown.clone(),
            self.keepalive_timeout,
        ));

        Ok(StreamHandle::new(rx, shutdown).with_task(task))
    }
}

async fn send_frame(sender: &mut Sender, frame: &ClientFrame) -> Result<(), TransportError> {
    let text = serde_json::to_string(frame)?;
    sender
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| TransportError::Network(e.to_string()))
}

/// Skip keep-alives until the server accepts or refuses the handshake.
async fn wait_for_ack(receiver: &mut Receiver) -> Result<(), TransportError> {
    while let Some(msg) = receiver.next().await {
        match msg.map_err(|e| TransportError::Network(e.to_string()))? {
            Message::Text(text) => match serde_json::from_str::<ServerFrame>(text.as_str())? {
                ServerFrame::ConnectionAck { .. } => return Ok(()),
                ServerFrame::ConnectionError { payload } => {
                    return Err(TransportError::HandshakeRejected(payload.to_string()));
                }
                ServerFrame::KeepAlive {} => continue,
                other => {
                    return Err(TransportError::Protocol(format!(
                        "unexpected frame before connection_ack: {:?}",
                        other
                    )));
                }
            },
            Message::Close(_) => return Err(TransportError::Closed),
            _ => {}
        }
    }
    Err(TransportError::Closed)
}

enum Step {
    Deliver(StreamItem),
    Skip,
    End(TransportError),
}

/// Forward payloads for `operation_id` until the socket fails or `shutdown`
/// fires, then unsubscribe and close.
async fn run_socket(
    mut sender: Sender,
    mut receiver: Receiver,
    operation_id: String,
    events: mpsc::Sender<StreamItem>,
    shutdown: CancellationToken,
    keepalive: Option<Duration>,
) {
    loop {
        let received = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            received = next_message(&mut receiver, keepalive) => received,
        };

        match classify(received, &operation_id) {
            Step::Skip => continue,
            Step::Deliver(item) => {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    sent = events.send(item) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            Step::End(reason) => {
                debug!("Subscription {} ended: {}", operation_id, reason);
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {}
                    _ = events.send(Err(reason)) => {}
                }
                break;
            }
        }
    }

    // Best effort; the peer may already be gone.
    let _ = send_frame(&mut sender, &ClientFrame::Stop { id: operation_id.clone() }).await;
    let _ = send_frame(&mut sender, &ClientFrame::ConnectionTerminate).await;
    let _ = sender.close().await;
    debug!("Released subscription socket {}", operation_id);
}

async fn next_message(
    receiver: &mut Receiver,
    keepalive: Option<Duration>,
) -> Option<Result<Message, TransportError>> {
    let next = match keepalive {
        Some(limit) => match timeout(limit, receiver.next()).await {
            Ok(next) => next,
            Err(_) => return Some(Err(TransportError::KeepaliveTimeout(limit))),
        },
        None => receiver.next().await,
    };
    next.map(|msg| msg.map_err(|e| TransportError::Network(e.to_string())))
}

fn classify(received: Option<Result<Message, TransportError>>, operation_id: &str) -> Step {
    let text = match received {
        None => return Step::End(TransportError::Closed),
        Some(Err(e)) => return Step::End(e),
        Some(Ok(Message::Text(text))) => text,
        Some(Ok(Message::Close(_))) => return Step::End(TransportError::Closed),
        Some(Ok(_)) => return Step::Skip,
    };

    let frame = match serde_json::from_str::<ServerFrame>(text.as_str()) {
        Ok(frame) => frame,
        Err(e) => {
            let raw: String = text.as_str().chars().take(200).collect();
            warn!("Undecodable frame: {} -- raw: {}", e, raw);
            return Step::Skip;
        }
    };

    if frame.operation_id().is_some_and(|id| id != operation_id) {
        return Step::Skip;
    }

    match frame {
        ServerFrame::KeepAlive {} => {
            trace!("ka");
            Step::Skip
        }
        ServerFrame::ConnectionAck { .. } => Step::Skip,
        ServerFrame::Data { payload, .. } => match response_data(payload) {
            Ok(data) => Step::Deliver(Ok(data)),
            Err(e) => {
                warn!("Subscription {} reported: {}", operation_id, e);
                Step::Skip
            }
        },
        ServerFrame::Error { payload, .. } => {
            Step::End(TransportError::Protocol(format!("subscription failed: {}", payload)))
        }
        ServerFrame::Complete { .. } => Step::End(TransportError::Closed),
        ServerFrame::ConnectionError { payload } => {
            Step::End(TransportError::HandshakeRejected(payload.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn text(value: serde_json::Value) -> Option<Result<Message, TransportError>> {
        Some(Ok(Message::Text(value.to_string().into())))
    }

    #[test]
    fn data_for_own_operation_is_delivered() {
        let step = classify(
            text(json!({ "type": "data", "id": "op", "payload": { "data": { "messageCreated": null } } })),
            "op",
        );
        assert!(matches!(step, Step::Deliver(Ok(_))));
    }

    #[test]
    fn frames_for_other_operations_and_keepalives_are_skipped() {
        let other = classify(text(json!({ "type": "data", "id": "other", "payload": { "data": {} } })), "op");
        assert!(matches!(other, Step::Skip));

        let ka = classify(text(json!({ "type": "ka" })), "op");
        assert!(matches!(ka, Step::Skip));

        let garbage = classify(Some(Ok(Message::Text("not json".into()))), "op");
        assert!(matches!(garbage, Step::Skip));
    }

    #[test]
    fn complete_error_and_close_end_the_stream() {
        assert!(matches!(
            classify(text(json!({ "type": "complete", "id": "op" })), "op"),
            Step::End(TransportError::Closed)
        ));
        assert!(matches!(
            classify(text(json!({ "type": "error", "id": "op", "payload": { "message": "x" } })), "op"),
            Step::End(TransportError::Protocol(_))
        ));
        assert!(matches!(classify(None, "op"), Step::End(TransportError::Closed)));
        assert!(matches!(
            classify(Some(Err(TransportError::KeepaliveTimeout(Duration::from_secs(1)))), "op"),
            Step::End(TransportError::KeepaliveTimeout(_))
        ));
    }
}
