use std::sync::Arc;

use tracing::info;

use parlor_types::models::{RoomId, UserId};

use crate::auth::Authenticator;
use crate::composer::{MessageComposer, SentMessage};
use crate::config::ClientConfig;
use crate::credential::CredentialStore;
use crate::error::{SyncError, TransportError};
use crate::store::{PageSummary, PaginatedFeedStore};
use crate::subscription::SubscriptionManager;
use crate::transport::{HttpRequestChannel, TransportRouter, WsStreamConnector};

/// Entry point: owns the router and hands out per-room sessions.
pub struct ChatClient {
    config: ClientConfig,
    router: TransportRouter,
    auth: Authenticator,
}

impl ChatClient {
    /// Build the HTTP and WebSocket channels described by `config`.
    pub fn new(config: ClientConfig, credentials: Arc<dyn CredentialStore>) -> Result<Self, TransportError> {
        let requests = Arc::new(HttpRequestChannel::new(config.http_url.clone(), config.request_timeout)?);
        let streams = Arc::new(WsStreamConnector::new(
            config.ws_url.clone(),
            config.handshake_timeout,
            config.keepalive_timeout,
        ));
        let router = TransportRouter::new(requests, streams, credentials);
        Ok(Self::with_router(config, router))
    }

    /// Use an already assembled router (e.g. over in-process channels).
    pub fn with_router(config: ClientConfig, router: TransportRouter) -> Self {
        let auth = Authenticator::new(router.clone());
        Self { config, router, auth }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn router(&self) -> &TransportRouter {
        &self.router
    }

    pub fn auth(&self) -> &Authenticator {
        &self.auth
    }

    /// Open the room's stream, then load its initial window. The stream is
    /// started first so nothing posted during the window request is missed.
    pub async fn enter(&self, room: RoomId, sender: UserId) -> Result<ConversationSession, SyncError> {
        let feed = PaginatedFeedStore::new(self.router.clone());
        let subscription =
            SubscriptionManager::new(self.router.clone(), feed.clone(), self.config.backoff.clone());
        subscription.start(room).await;

        let session = ConversationSession {
            room,
            feed,
            composer: MessageComposer::new(self.router.clone(), sender),
            subscription,
        };

        let loaded = session.feed.load_initial_window(room, self.config.page_size).await;
        match loaded {
            Ok(summary) => {
                info!(room = %room, loaded = summary.loaded, "Entered room");
                Ok(session)
            }
            Err(e) => {
                session.leave().await;
                Err(e)
            }
        }
    }
}

/// Everything bound to one room. Leaving tears the stream down.
pub struct ConversationSession {
    room: RoomId,
    feed: PaginatedFeedStore,
    composer: MessageComposer,
    subscription: SubscriptionManager,
}

impl ConversationSession {
    pub fn room(&self) -> RoomId {
        self.room
    }

    pub fn feed(&self) -> &PaginatedFeedStore {
        &self.feed
    }

    pub fn composer(&self) -> &MessageComposer {
        &self.composer
    }

    pub fn subscription(&self) -> &SubscriptionManager {
        &self.subscription
    }

    pub async fn send(&self, content: &str) -> Result<SentMessage, SyncError> {
        self.composer.send(content, self.room).await
    }

    pub async fn load_older(&self) -> Result<PageSummary, SyncError> {
        self.feed.load_older_page().await
    }

    /// Returns once the stream is released; the feed gets no further updates.
    pub async fn leave(self) {
        self.subscription.teardown().await;
        info!(room = %self.room, "Left room");
    }
}
