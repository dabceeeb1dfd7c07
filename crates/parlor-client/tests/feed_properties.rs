//! Property tests for the feed merge.
//!
//! Random sequences of window replacements, older-page prepends and live
//! appends, drawn from one room's history, must always leave the feed sorted
//! by timestamp with every id at most once.

use std::collections::HashSet;

use chrono::{TimeZone, Utc};
use parlor_client::{Feed, LiveOutcome};
use parlor_types::models::{Message, MessageId, User, UserId};
use proptest::prelude::*;

const HISTORY: usize = 40;

/// Message `i` of the room. Pairs share a timestamp so ties are exercised.
fn history(i: usize) -> Message {
    Message {
        id: MessageId::new(format!("m{i}")),
        content: format!("body {i}"),
        sender: User {
            id: UserId((i % 3) as i64),
            name: "someone".into(),
        },
        timestamp: Utc.timestamp_opt(1_700_000_000 + (i / 2) as i64, 0).unwrap(),
    }
}

#[derive(Debug, Clone)]
enum Op {
    Replace(Vec<usize>),
    PrependOlder(Vec<usize>),
    Live(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let indices = prop::collection::vec(0..HISTORY, 0..12);
    prop_oneof![
        1 => indices.clone().prop_map(Op::Replace),
        3 => indices.prop_map(Op::PrependOlder),
        4 => (0..HISTORY).prop_map(Op::Live),
    ]
}

fn apply(feed: &mut Feed, op: &Op) {
    match op {
        Op::Replace(idx) => feed.replace(idx.iter().map(|&i| history(i)).collect()),
        Op::PrependOlder(idx) => {
            feed.prepend_older(idx.iter().map(|&i| history(i)).collect());
        }
        Op::Live(i) => {
            feed.append_live(history(*i));
        }
    }
}

fn check_invariants(feed: &Feed) -> Result<(), TestCaseError> {
    let messages = feed.to_vec();
    for pair in messages.windows(2) {
        prop_assert!(
            pair[0].timestamp <= pair[1].timestamp,
            "{} after {}",
            pair[1].id,
            pair[0].id
        );
    }
    let unique: HashSet<&MessageId> = messages.iter().map(|m| &m.id).collect();
    prop_assert_eq!(unique.len(), messages.len());
    for message in &messages {
        prop_assert!(feed.contains(&message.id));
    }
    Ok(())
}

proptest! {
    #[test]
    fn feed_stays_sorted_and_unique(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let mut feed = Feed::new();
        for op in &ops {
            apply(&mut feed, op);
            check_invariants(&feed)?;
        }
    }

    #[test]
    fn repeated_live_message_is_applied_once(
        ops in prop::collection::vec(op_strategy(), 0..20),
        i in 0..HISTORY,
    ) {
        let mut feed = Feed::new();
        for op in &ops {
            apply(&mut feed, op);
        }

        let first = feed.append_live(history(i));
        let len = feed.len();
        prop_assert_eq!(feed.append_live(history(i)), match first {
            LiveOutcome::OutOfOrder => LiveOutcome::OutOfOrder,
            _ => LiveOutcome::Duplicate,
        });
        prop_assert_eq!(feed.len(), len);
        check_invariants(&feed)?;
    }

    #[test]
    fn prepend_never_moves_existing_messages(
        window in prop::collection::vec(0..HISTORY, 1..12),
        older in prop::collection::vec(0..HISTORY, 0..12),
    ) {
        let mut feed = Feed::new();
        feed.replace(window.iter().map(|&i| history(i)).collect());
        let before = feed.to_vec();

        let added = feed.prepend_older(older.iter().map(|&i| history(i)).collect());
        let after = feed.to_vec();

        prop_assert_eq!(after.len(), before.len() + added);
        prop_assert_eq!(&after[added..], &before[..]);
        check_invariants(&feed)?;
    }
}
