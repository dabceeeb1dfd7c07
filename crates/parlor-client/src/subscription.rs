//! Live-update stream for one room.
//!
//! ```text
//! disconnected -> connecting -> open
//!                    |           |
//!                    v           v
//!                 retrying <-----+
//!                    |
//!                    +--(backoff)--> connecting
//!
//! connecting | retrying | open --(teardown)--> disconnected
//! ```
//!
//! Delivery is at-most-once. Events sent while the stream was down are not
//! re-fetched after reconnecting.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use parlor_types::api::{GraphQlRequest, MessageCreatedData};
use parlor_types::models::RoomId;

use crate::config::BackoffConfig;
use crate::error::TransportError;
use crate::store::PaginatedFeedStore;
use crate::transport::{StreamHandle, StreamOperation, TransportRouter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Retrying,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Open)
                | (Connecting, Retrying)
                | (Open, Retrying)
                | (Retrying, Connecting)
                | (Connecting, Disconnected)
                | (Retrying, Disconnected)
                | (Open, Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Retrying => "retrying",
        };
        f.write_str(name)
    }
}

/// Stream status reports. Failures arrive here, never as an `Err`.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionNotice {
    StateChanged(ConnectionState),
    /// The stream failed; another attempt follows after `retry_in`.
    ConnectionDegraded {
        attempt: u32,
        reason: String,
        retry_in: Duration,
    },
}

/// Keeps a room's stream open and feeds its events to a `PaginatedFeedStore`.
///
/// Dropping the manager cancels the connection task; `teardown` additionally
/// waits until it has released the stream.
pub struct SubscriptionManager {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

struct Shared {
    router: TransportRouter,
    feed: PaginatedFeedStore,
    backoff: BackoffConfig,
    state: watch::Sender<ConnectionState>,
    notices: broadcast::Sender<SubscriptionNotice>,
}

struct Running {
    room: RoomId,
    cancel_on_drop: DropGuard,
    task: JoinHandle<()>,
}

impl SubscriptionManager {
    pub fn new(router: TransportRouter, feed: PaginatedFeedStore, backoff: BackoffConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (notices, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                router,
                feed,
                backoff,
                state,
                notices,
            }),
            running: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn notices(&self) -> broadcast::Receiver<SubscriptionNotice> {
        self.shared.notices.subscribe()
    }

    /// Room currently subscribed to, if any.
    pub fn room(&self) -> Option<RoomId> {
        self.running.lock().as_ref().map(|r| r.room)
    }

    /// Subscribe to `room`, replacing any previous subscription.
    pub async fn start(&self, room: RoomId) {
        self.teardown().await;

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(self.shared.clone().run(room, shutdown.clone()));
        *self.running.lock() = Some(Running {
            room,
            cancel_on_drop: shutdown.drop_guard(),
            task,
        });
    }

    /// Stop the stream and wait for it to be released. Once this returns no
    /// further events reach the feed.
    pub async fn teardown(&self) {
        let running = self.running.lock().take();
        let Some(Running {
            room,
            cancel_on_drop,
            task,
        }) = running
        else {
            return;
        };

        drop(cancel_on_drop);
        if let Err(e) = task.await {
            warn!(room = %room, "Subscription task ended abnormally: {}", e);
            self.shared.transition(ConnectionState::Disconnected);
        }
    }
}

impl Shared {
    fn transition(&self, next: ConnectionState) {
        let prev = *self.state.borrow();
        if prev == next {
            return;
        }
        if !prev.can_transition_to(next) {
            warn!("Ignoring illegal connection transition {} -> {}", prev, next);
            return;
        }
        self.state.send_replace(next);
        debug!("Connection {} -> {}", prev, next);
        let _ = self.notices.send(SubscriptionNotice::StateChanged(next));
    }

    async fn run(self: Arc<Self>, room: RoomId, shutdown: CancellationToken) {
        let mut attempt: u32 = 0;

        loop {
            self.transition(ConnectionState::Connecting);
            let operation = StreamOperation::new(GraphQlRequest::message_created(room));
            let opened = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                opened = self.router.open_stream(operation) => opened,
            };

            let reason = match opened {
                Ok(mut stream) => {
                    attempt = 0;
                    self.transition(ConnectionState::Open);
                    info!(room = %room, "Subscription open");

                    let outcome = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => None,
                        reason = self.pump(&mut stream, room) => Some(reason),
                    };
                    stream.close().await;
                    match outcome {
                        Some(reason) => reason,
                        None => break,
                    }
                }
                Err(e) => e,
            };

            attempt = attempt.saturating_add(1);
            let retry_in = self.backoff.delay(attempt);
            self.transition(ConnectionState::Retrying);
            warn!(
                room = %room,
                attempt,
                delay_ms = retry_in.as_millis() as u64,
                "Subscription degraded: {}",
                reason
            );
            let _ = self.notices.send(SubscriptionNotice::ConnectionDegraded {
                attempt,
                reason: reason.to_string(),
                retry_in,
            });

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(retry_in) => {}
            }
        }

        self.transition(ConnectionState::Disconnected);
        info!(room = %room, "Subscription torn down");
    }

    /// Hand every event to the feed until the stream fails.
    async fn pump(&self, stream: &mut StreamHandle, room: RoomId) -> TransportError {
        loop {
            match stream.next().await {
                Some(Ok(payload)) => match serde_json::from_value::<MessageCreatedData>(payload) {
                    Ok(data) => {
                        self.feed.apply_live_message(data.message_created);
                    }
                    Err(e) => warn!(room = %room, "Skipping undecodable event: {}", e),
                },
                Some(Err(e)) => return e,
                None => return TransportError::Closed,
            }
        }
    }
}
