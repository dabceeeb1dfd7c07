//! Transport layer.
//!
//! Two channel kinds sit behind two traits:
//! - `RequestChannel`: one request, exactly one reply (queries, mutations)
//! - `StreamConnector`: one persistent connection, zero or more replies (subscriptions)
//!
//! `TransportRouter` picks the channel for an `Operation` and attaches the
//! credential with the lifecycle each channel kind requires.

pub mod http;
pub mod router;
pub mod ws;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use parlor_types::api::{GraphQlError, GraphQlRequest, GraphQlResponse};

use crate::credential::Credential;
use crate::error::TransportError;

pub use http::HttpRequestChannel;
pub use router::{Operation, OperationKind, RequestKind, RequestOperation, Routed, StreamOperation, TransportRouter};
pub use ws::WsStreamConnector;

/// One delivery from a stream: a result payload, or the error that ended it.
pub type StreamItem = Result<Value, TransportError>;

/// Request/response channel.
#[async_trait]
pub trait RequestChannel: Send + Sync {
    /// Send `request`, attaching `credential` as the `Authorization` header
    /// when present. Returns the `data` member of the reply.
    async fn execute(
        &self,
        request: &GraphQlRequest,
        credential: Option<&Credential>,
    ) -> Result<Value, TransportError>;
}

/// Everything sent in the streaming handshake.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    /// Captured at connect time; fixed for the life of the connection.
    pub credential: Option<Credential>,
}

/// Streaming channel.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Open a connection, perform the handshake and start `request` on it.
    async fn connect(
        &self,
        handshake: Handshake,
        request: &GraphQlRequest,
    ) -> Result<StreamHandle, TransportError>;
}

/// An open subscription. Dropping it, or calling `close`, releases the
/// underlying connection.
pub struct StreamHandle {
    events: mpsc::Receiver<StreamItem>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl StreamHandle {
    /// `shutdown` is cancelled when the handle is closed or dropped; whatever
    /// feeds `events` must stop and release its connection when it fires.
    pub fn new(events: mpsc::Receiver<StreamItem>, shutdown: CancellationToken) -> Self {
        Self {
            events,
            shutdown,
            task: None,
        }
    }

    /// Attach the task driving the connection so `close` can wait for it.
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }

    /// Next payload. `None` once the connection is gone.
    pub async fn next(&mut self) -> Option<StreamItem> {
        self.events.recv().await
    }

    /// Unsubscribe and wait until the connection is released.
    pub async fn close(mut self) {
        self.shutdown.cancel();
        // Wakes a producer blocked on a full buffer.
        self.events.close();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Stream task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Unwrap a GraphQL reply into its `data` member.
pub(crate) fn response_data(response: GraphQlResponse) -> Result<Value, TransportError> {
    if response.errors.iter().any(GraphQlError::is_unauthenticated) {
        return Err(TransportError::unauthorized(join_messages(&response.errors)));
    }
    if !response.errors.is_empty() {
        return Err(TransportError::GraphQl(
            response.errors.into_iter().map(|e| e.message).collect(),
        ));
    }
    match response.data {
        Some(data) if !data.is_null() => Ok(data),
        _ => Err(TransportError::Protocol("reply carried no data".into())),
    }
}

fn join_messages(errors: &[GraphQlError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}
