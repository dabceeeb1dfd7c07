//! The materialized message sequence for one room.
//!
//! `Feed` has no arbitrary insert. History enters at the front, live messages
//! at the back, and both paths refuse anything that would break timestamp
//! order or repeat an id.

use std::collections::{HashSet, VecDeque};

use parlor_types::models::{Message, MessageId};

/// What `append_live` did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveOutcome {
    Appended,
    /// The id is already in the feed.
    Duplicate,
    /// The message is older than the current tail and was not inserted.
    OutOfOrder,
}

/// Oldest-first, duplicate-free, sorted by server timestamp.
#[derive(Debug, Clone, Default)]
pub struct Feed {
    messages: VecDeque<Message>,
    ids: HashSet<MessageId>,
}

impl Feed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    pub fn oldest(&self) -> Option<&Message> {
        self.messages.front()
    }

    pub fn newest(&self) -> Option<&Message> {
        self.messages.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn to_vec(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }

    /// Discard everything and start over from `messages`. Input order is not
    /// trusted; later repeats of an id are dropped.
    pub fn replace(&mut self, mut messages: Vec<Message>) {
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        self.messages.clear();
        self.ids.clear();
        for message in messages {
            if self.ids.insert(message.id.clone()) {
                self.messages.push_back(message);
            }
        }
    }

    /// Put a page of older history in front of the feed. Messages already
    /// present, or newer than the current oldest, are skipped. Returns how
    /// many were added.
    pub fn prepend_older(&mut self, mut messages: Vec<Message>) -> usize {
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        let mut added = 0;
        for message in messages.into_iter().rev() {
            if self.ids.contains(&message.id) {
                continue;
            }
            if self
                .messages
                .front()
                .is_some_and(|front| message.timestamp > front.timestamp)
            {
                continue;
            }
            self.ids.insert(message.id.clone());
            self.messages.push_front(message);
            added += 1;
        }
        added
    }

    /// Add a message pushed over the stream to the tail.
    pub fn append_live(&mut self, message: Message) -> LiveOutcome {
        if self.ids.contains(&message.id) {
            return LiveOutcome::Duplicate;
        }
        if self
            .messages
            .back()
            .is_some_and(|tail| message.timestamp < tail.timestamp)
        {
            return LiveOutcome::OutOfOrder;
        }
        self.ids.insert(message.id.clone());
        self.messages.push_back(message);
        LiveOutcome::Appended
    }
}
