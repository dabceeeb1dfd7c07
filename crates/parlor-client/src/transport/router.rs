use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use parlor_types::api::GraphQlRequest;

use crate::credential::{Credential, CredentialStore};
use crate::error::TransportError;
use crate::transport::{Handshake, RequestChannel, StreamConnector, StreamHandle};

/// The operation type a GraphQL document declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    /// Read the leading keyword of a document. A bare selection set (`{ ... }`)
    /// is a query. `#` comments before the keyword are skipped.
    pub fn from_document(document: &str) -> Option<Self> {
        let mut rest = document;
        loop {
            rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',' || c == '\u{feff}');
            match rest.strip_prefix('#') {
                Some(comment) => rest = comment.split_once('\n').map_or("", |(_, tail)| tail),
                None => break,
            }
        }

        if rest.starts_with('{') {
            return Some(Self::Query);
        }

        let keyword = rest
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .next()?;
        match keyword {
            "query" => Some(Self::Query),
            "mutation" => Some(Self::Mutation),
            "subscription" => Some(Self::Subscription),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Query,
    Mutation,
}

/// A one-shot operation: exactly one reply over the request channel.
#[derive(Debug, Clone)]
pub struct RequestOperation {
    pub kind: RequestKind,
    pub request: GraphQlRequest,
    /// When set, dispatch fails with `Unauthorized` if no usable credential is held.
    pub requires_auth: bool,
}

impl RequestOperation {
    pub fn query(request: GraphQlRequest) -> Self {
        Self {
            kind: RequestKind::Query,
            request,
            requires_auth: true,
        }
    }

    pub fn mutation(request: GraphQlRequest) -> Self {
        Self {
            kind: RequestKind::Mutation,
            request,
            requires_auth: true,
        }
    }

    /// Allow dispatch without a credential (e.g. login).
    pub fn public(mut self) -> Self {
        self.requires_auth = false;
        self
    }
}

/// A long-lived operation: zero or more replies over the streaming channel.
#[derive(Debug, Clone)]
pub struct StreamOperation {
    pub request: GraphQlRequest,
}

impl StreamOperation {
    pub fn new(request: GraphQlRequest) -> Self {
        Self { request }
    }
}

/// Operation descriptor tagged with the channel kind it needs.
#[derive(Debug, Clone)]
pub enum Operation {
    Request(RequestOperation),
    Stream(StreamOperation),
}

impl Operation {
    /// Tag a request by the keyword its document declares. Requests built this
    /// way require a credential.
    pub fn from_request(request: GraphQlRequest) -> Result<Self, TransportError> {
        match OperationKind::from_document(&request.query) {
            Some(OperationKind::Query) => Ok(Self::Request(RequestOperation::query(request))),
            Some(OperationKind::Mutation) => Ok(Self::Request(RequestOperation::mutation(request))),
            Some(OperationKind::Subscription) => Ok(Self::Stream(StreamOperation::new(request))),
            None => Err(TransportError::Protocol(format!(
                "cannot classify operation {}",
                request.operation_name().unwrap_or("<anonymous>")
            ))),
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Request(op) => match op.kind {
                RequestKind::Query => OperationKind::Query,
                RequestKind::Mutation => OperationKind::Mutation,
            },
            Self::Stream(_) => OperationKind::Subscription,
        }
    }
}

/// Result of routing an `Operation`.
pub enum Routed {
    Reply(Value),
    Stream(StreamHandle),
}

/// Routes operations to the matching channel and attaches the credential.
///
/// Credential timing differs per channel kind:
/// - requests read the store immediately before each dispatch, so a token
///   change applies to the very next request;
/// - streams read the store once, when the connection is established, and
///   send it in the handshake. A token set or cleared while a stream is open
///   has no effect on that stream until it is re-established.
#[derive(Clone)]
pub struct TransportRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    requests: Arc<dyn RequestChannel>,
    streams: Arc<dyn StreamConnector>,
    credentials: Arc<dyn CredentialStore>,
}

impl TransportRouter {
    pub fn new(
        requests: Arc<dyn RequestChannel>,
        streams: Arc<dyn StreamConnector>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                requests,
                streams,
                credentials,
            }),
        }
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.credentials
    }

    pub async fn route(&self, operation: Operation) -> Result<Routed, TransportError> {
        match operation {
            Operation::Request(op) => self.request(op).await.map(Routed::Reply),
            Operation::Stream(op) => self.open_stream(op).await.map(Routed::Stream),
        }
    }

    /// Dispatch over the request channel. Never retried here.
    pub async fn request(&self, op: RequestOperation) -> Result<Value, TransportError> {
        let credential = self.current_credential();
        if op.requires_auth && credential.is_none() {
            return Err(TransportError::unauthorized("no valid credential held"));
        }

        debug!(
            operation = op.request.operation_name().unwrap_or("<anonymous>"),
            kind = ?op.kind,
            authenticated = credential.is_some(),
            "Dispatching request"
        );

        self.inner
            .requests
            .execute(&op.request, credential.as_ref())
            .await
    }

    /// `request` plus decoding of the reply's `data` member.
    pub async fn request_typed<T: DeserializeOwned>(
        &self,
        op: RequestOperation,
    ) -> Result<T, TransportError> {
        let data = self.request(op).await?;
        Ok(serde_json::from_value(data)?)
    }

    /// Establish a stream. The credential held right now goes into the
    /// handshake and stays bound to this connection.
    pub async fn open_stream(&self, op: StreamOperation) -> Result<StreamHandle, TransportError> {
        let handshake = Handshake {
            credential: self.inner.credentials.get(),
        };

        info!(
            operation = op.request.operation_name().unwrap_or("<anonymous>"),
            authenticated = handshake.credential.is_some(),
            "Opening stream"
        );

        self.inner.streams.connect(handshake, &op.request).await
    }

    fn current_credential(&self) -> Option<Credential> {
        match self.inner.credentials.get() {
            Some(credential) if credential.is_expired() => {
                warn!("Held credential has expired; treating it as absent");
                None
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_leading_keyword() {
        assert_eq!(OperationKind::from_document("query Q { a }"), Some(OperationKind::Query));
        assert_eq!(OperationKind::from_document("  mutation M { a }"), Some(OperationKind::Mutation));
        assert_eq!(
            OperationKind::from_document("subscription S($r: Int!) { s(roomId: $r) }"),
            Some(OperationKind::Subscription)
        );
        assert_eq!(OperationKind::from_document("{ a }"), Some(OperationKind::Query));
        assert_eq!(
            OperationKind::from_document("# leading comment\n# another\nsubscription { x }"),
            Some(OperationKind::Subscription)
        );
        assert_eq!(OperationKind::from_document("fragment F on T { a }"), None);
        assert_eq!(OperationKind::from_document(""), None);
    }

    #[test]
    fn subscription_documents_become_stream_operations() {
        let op = Operation::from_request(GraphQlRequest::message_created(parlor_types::models::RoomId(1))).unwrap();
        assert!(matches!(op, Operation::Stream(_)));
        assert_eq!(op.kind(), OperationKind::Subscription);

        let op = Operation::from_request(GraphQlRequest::login("a@b.c", "pw")).unwrap();
        match op {
            Operation::Request(req) => {
                assert_eq!(req.kind, RequestKind::Mutation);
                assert!(req.requires_auth);
            }
            Operation::Stream(_) => panic!("login must not stream"),
        }
    }

    #[test]
    fn public_clears_auth_requirement() {
        let op = RequestOperation::mutation(GraphQlRequest::login("a@b.c", "pw")).public();
        assert!(!op.requires_auth);
    }
}
