use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use parlor_types::api::{FetchMessagesData, GraphQlRequest};
use parlor_types::models::{Continuation, Cursor, Message, MessageId, Page, RoomId};

use crate::error::SyncError;
use crate::feed::{Feed, LiveOutcome};
use crate::transport::{RequestOperation, TransportRouter};

/// Change notifications for anyone rendering the feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedUpdate {
    /// A new initial window replaced the feed.
    Replaced { count: usize },
    /// Older history was added in front.
    Prepended { count: usize },
    /// A live message was added at the tail.
    Appended(Message),
}

/// Outcome of a page load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSummary {
    /// Messages actually added to the feed.
    pub loaded: usize,
    pub continuation: Continuation,
}

/// Owns the feed for one room and every mutation of it.
///
/// History loads and live applications go through the same lock, so they
/// are serialized against each other. `load_older_page` is single-flight.
#[derive(Clone)]
pub struct PaginatedFeedStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    router: TransportRouter,
    state: Mutex<FeedState>,
    /// Set while an older page is in flight.
    loading_older: AtomicBool,
    updates: broadcast::Sender<FeedUpdate>,
}

#[derive(Default)]
struct FeedState {
    feed: Feed,
    window: Option<Window>,
    /// Bumped on every initial window; older pages from a previous
    /// generation are discarded.
    generation: u64,
}

struct Window {
    room: RoomId,
    page_size: u32,
    continuation: Continuation,
}

/// Clears the busy flag on every exit path.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl PaginatedFeedStore {
    pub fn new(router: TransportRouter) -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(StoreInner {
                router,
                state: Mutex::new(FeedState::default()),
                loading_older: AtomicBool::new(false),
                updates,
            }),
        }
    }

    pub fn updates(&self) -> broadcast::Receiver<FeedUpdate> {
        self.inner.updates.subscribe()
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.inner.state.lock().feed.to_vec()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().feed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().feed.is_empty()
    }

    /// Room of the current window, if one has been loaded.
    pub fn room(&self) -> Option<RoomId> {
        self.inner.state.lock().window.as_ref().map(|w| w.room)
    }

    /// Continuation marker recorded by the last page load.
    pub fn continuation(&self) -> Option<Continuation> {
        self.inner
            .state
            .lock()
            .window
            .as_ref()
            .map(|w| w.continuation.clone())
    }

    pub fn is_loading_older(&self) -> bool {
        self.inner.loading_older.load(Ordering::Acquire)
    }

    /// Fetch the newest `page_size` messages of `room` and replace the feed
    /// with them.
    ///
    /// Live messages applied while the request was in flight, and newer than
    /// everything in the window, are kept at the tail.
    pub async fn load_initial_window(
        &self,
        room: RoomId,
        page_size: u32,
    ) -> Result<PageSummary, SyncError> {
        let page = self.fetch(room, page_size, None).await?;
        let (messages, continuation) = page.into_messages();
        let count = messages.len();

        let summary = {
            let mut state = self.inner.state.lock();
            let same_room = state.window.as_ref().is_none_or(|w| w.room == room);

            let carried: Vec<Message> = if same_room {
                let window_ids: HashSet<&MessageId> = messages.iter().map(|m| &m.id).collect();
                let newest = messages.last().map(|m| m.timestamp);
                state
                    .feed
                    .iter()
                    .filter(|m| !window_ids.contains(&m.id))
                    .filter(|m| newest.is_none_or(|ts| m.timestamp >= ts))
                    .cloned()
                    .collect()
            } else {
                Vec::new()
            };

            state.generation += 1;
            state.feed.replace(messages);
            for message in carried {
                state.feed.append_live(message);
            }
            state.window = Some(Window {
                room,
                page_size,
                continuation: continuation.clone(),
            });

            PageSummary {
                loaded: count,
                continuation,
            }
        };

        debug!(
            room = %room,
            loaded = summary.loaded,
            has_more = summary.continuation.has_more,
            "Initial window loaded"
        );
        let _ = self.inner.updates.send(FeedUpdate::Replaced {
            count: summary.loaded,
        });
        Ok(summary)
    }

    /// Fetch the page before the oldest loaded message and prepend it.
    ///
    /// Fails with `Busy` while a previous call is outstanding, leaving the
    /// feed untouched.
    pub async fn load_older_page(&self) -> Result<PageSummary, SyncError> {
        let _busy = BusyGuard::acquire(&self.inner.loading_older).ok_or(SyncError::Busy)?;

        let (room, page_size, cursor, generation) = {
            let state = self.inner.state.lock();
            let window = state.window.as_ref().ok_or(SyncError::NotLoaded)?;
            let cursor = window
                .continuation
                .older_cursor()
                .cloned()
                .ok_or(SyncError::NoOlderPage)?;
            (window.room, window.page_size, cursor, state.generation)
        };

        let page = self.fetch(room, page_size, Some(&cursor)).await?;
        let (messages, continuation) = page.into_messages();

        let summary = {
            let mut state = self.inner.state.lock();
            if state.generation != generation {
                debug!(room = %room, "Discarding older page from a replaced window");
                let continuation = state
                    .window
                    .as_ref()
                    .map(|w| w.continuation.clone())
                    .unwrap_or_default();
                return Ok(PageSummary {
                    loaded: 0,
                    continuation,
                });
            }

            let loaded = state.feed.prepend_older(messages);
            if let Some(window) = state.window.as_mut() {
                window.continuation = continuation.clone();
            }
            PageSummary {
                loaded,
                continuation,
            }
        };

        debug!(
            room = %room,
            loaded = summary.loaded,
            has_more = summary.continuation.has_more,
            "Older page loaded"
        );
        let _ = self.inner.updates.send(FeedUpdate::Prepended {
            count: summary.loaded,
        });
        Ok(summary)
    }

    /// Add a message received over the stream. Known ids are ignored.
    pub fn apply_live_message(&self, message: Message) -> LiveOutcome {
        let outcome = self.inner.state.lock().feed.append_live(message.clone());
        match outcome {
            LiveOutcome::Appended => {
                let _ = self.inner.updates.send(FeedUpdate::Appended(message));
            }
            LiveOutcome::Duplicate => {
                debug!(id = %message.id, "Ignoring duplicate live message");
            }
            LiveOutcome::OutOfOrder => {
                warn!(
                    id = %message.id,
                    timestamp = %message.timestamp,
                    "Live message is older than the feed tail; not inserted"
                );
            }
        }
        outcome
    }

    async fn fetch(
        &self,
        room: RoomId,
        page_size: u32,
        before: Option<&Cursor>,
    ) -> Result<Page, SyncError> {
        let op = RequestOperation::query(GraphQlRequest::fetch_messages(room, page_size, before));
        let data: FetchMessagesData = self.inner.router.request_typed(op).await?;
        Ok(Page::from(data.messages_by_room))
    }
}
