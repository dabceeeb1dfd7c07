use chrono::{DateTime, Utc};
use tracing::debug;

use parlor_types::api::{CreateMessageData, GraphQlRequest};
use parlor_types::models::{MessageId, RoomId, UserId};

use crate::error::SyncError;
use crate::transport::{RequestOperation, TransportRouter};

/// What the server assigned to an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub id: MessageId,
    pub timestamp: DateTime<Utc>,
}

/// Submits new messages. Never touches the feed: the canonical copy of a
/// sent message arrives over the stream like everyone else's.
#[derive(Clone)]
pub struct MessageComposer {
    router: TransportRouter,
    sender: UserId,
}

impl MessageComposer {
    pub fn new(router: TransportRouter, sender: UserId) -> Self {
        Self { router, sender }
    }

    pub fn sender(&self) -> UserId {
        self.sender
    }

    /// Not retried on failure; resubmitting is up to the caller.
    pub async fn send(&self, content: &str, room: RoomId) -> Result<SentMessage, SyncError> {
        let op = RequestOperation::mutation(GraphQlRequest::create_message(content, self.sender, room));
        let data: CreateMessageData = self.router.request_typed(op).await?;
        let message = data.create_message.message;

        debug!(room = %room, id = %message.id, "Message accepted");
        Ok(SentMessage {
            id: message.id,
            timestamp: message.timestamp,
        })
    }
}
