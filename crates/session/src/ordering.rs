//! Canonical ordering and de-duplication of message sequences.
//!
//! A canonical sequence holds each message id at most once and is sorted by
//! `(created_at, id)`. Merging is first-seen-wins, so history and live delivery can both
//! report a message without producing a duplicate row or changing the retained content.

use std::cmp::Ordering;
use std::collections::HashSet;

use super::ids::MessageId;
use super::message::{Message, Provenance};

pub fn canonical_cmp(left: &Message, right: &Message) -> Ordering {
    left.created_at
        .cmp(&right.created_at)
        .then_with(|| left.id.cmp(&right.id))
}

/// An incoming entry that lost to an already-present message with the same id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedDuplicate {
    pub id: MessageId,
    pub kept: Provenance,
    pub dropped: Provenance,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MergeOutcome {
    pub messages: Vec<Message>,
    pub dropped: Vec<DroppedDuplicate>,
}

pub fn merge(existing: &[Message], incoming: &[Message]) -> Vec<Message> {
    merge_tracked(existing, incoming).messages
}

/// Same as [`merge`], also reporting which duplicates were discarded.
pub fn merge_tracked(existing: &[Message], incoming: &[Message]) -> MergeOutcome {
    let mut seen: HashSet<&MessageId> = HashSet::with_capacity(existing.len() + incoming.len());
    let mut messages = Vec::with_capacity(existing.len() + incoming.len());
    let mut dropped = Vec::new();

    for message in existing.iter().chain(incoming) {
        if seen.insert(&message.id) {
            messages.push(message.clone());
            continue;
        }

        if let Some(kept) = messages.iter().find(|kept: &&Message| kept.id == message.id) {
            dropped.push(DroppedDuplicate {
                id: message.id.clone(),
                kept: kept.provenance,
                dropped: message.provenance,
            });
        }
    }

    // Stable sort keeps first-seen order for identical keys, though ids are unique by now.
    messages.sort_by(canonical_cmp);
    MergeOutcome { messages, dropped }
}

/// Returns true when `messages` has unique ids and is sorted by `(created_at, id)`.
pub fn is_canonical(messages: &[Message]) -> bool {
    let mut seen = HashSet::with_capacity(messages.len());
    messages.iter().all(|message| seen.insert(&message.id))
        && messages
            .windows(2)
            .all(|pair| canonical_cmp(&pair[0], &pair[1]) == Ordering::Less)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn msg(id: &str, created_at: i64) -> Message {
        Message::text(id, "u1", format!("body-{id}"), created_at)
    }

    fn ids(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|message| message.id.as_str()).collect()
    }

    #[test]
    fn merge_sorts_by_timestamp_then_id() {
        let merged = merge(&[msg("m3", 300), msg("b", 100)], &[msg("a", 100), msg("m2", 200)]);
        assert_eq!(ids(&merged), vec!["a", "b", "m2", "m3"]);
        assert!(is_canonical(&merged));
    }

    #[test]
    fn merge_with_empty_or_self_is_identity() {
        let canonical = merge(&[], &[msg("m2", 200), msg("m1", 100), msg("m3", 300)]);
        assert_eq!(merge(&canonical, &[]), canonical);
        assert_eq!(merge(&canonical, &canonical), canonical);
        assert_eq!(merge(&[], &canonical), canonical);
    }

    #[test]
    fn first_seen_copy_wins_on_duplicate_ids() {
        let history = vec![msg("m1", 100), msg("m2", 200)];
        let mut replay = msg("m2", 200).with_provenance(Provenance::Live);
        replay.content = "edited elsewhere".to_string();

        let outcome = merge_tracked(&history, &[replay]);

        assert_eq!(ids(&outcome.messages), vec!["m1", "m2"]);
        assert_eq!(outcome.messages[1].content, "body-m2");
        assert_eq!(
            outcome.dropped,
            vec![DroppedDuplicate {
                id: MessageId::new("m2"),
                kept: Provenance::History,
                dropped: Provenance::Live,
            }]
        );
    }

    #[test]
    fn duplicates_inside_one_input_collapse() {
        let merged = merge(&[], &[msg("m1", 100), msg("m1", 100), msg("m0", 50)]);
        assert_eq!(ids(&merged), vec!["m0", "m1"]);
    }

    #[test]
    fn history_batch_after_live_arrival_matches_history_first() {
        let live_first = merge(&merge(&[], &[msg("m3", 300)]), &[msg("m1", 100), msg("m2", 200)]);
        let history_first = merge(&merge(&[], &[msg("m1", 100), msg("m2", 200)]), &[msg("m3", 300)]);
        assert_eq!(live_first, history_first);
    }

    #[test]
    fn is_canonical_rejects_disorder_and_duplicates() {
        assert!(is_canonical(&[]));
        assert!(!is_canonical(&[msg("m2", 200), msg("m1", 100)]));
        assert!(!is_canonical(&[msg("m1", 100), msg("m1", 100)]));
        assert!(!is_canonical(&[msg("b", 100), msg("a", 100)]));
    }

    // A repeated id is always the same message, as when history and live both report it.
    fn deliveries() -> impl Strategy<Value = Vec<Message>> {
        (
            prop::array::uniform8(0_i64..4),
            prop::collection::vec(0_usize..8, 0..16),
        )
            .prop_map(|(stamps, picks)| {
                picks
                    .into_iter()
                    .map(|pick| msg(&format!("m{pick}"), stamps[pick]))
                    .collect()
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

        #[test]
        fn merge_output_is_canonical_and_idempotent(messages in deliveries()) {
            let canonical = merge(&[], &messages);

            prop_assert!(is_canonical(&canonical));
            prop_assert_eq!(&merge(&canonical, &[]), &canonical);
            prop_assert_eq!(&merge(&canonical, &canonical), &canonical);
        }

        #[test]
        fn one_at_a_time_in_any_order_matches_batch_merge(
            (messages, arrivals) in deliveries()
                .prop_flat_map(|messages| (Just(messages.clone()), Just(messages).prop_shuffle()))
        ) {
            let expected = merge(&[], &messages);
            let incremental = arrivals.iter().fold(Vec::new(), |state, next| {
                merge(&state, std::slice::from_ref(next))
            });

            prop_assert!(is_canonical(&incremental));
            prop_assert_eq!(incremental, expected);
        }

        #[test]
        fn split_point_does_not_change_the_result(
            messages in deliveries(),
            split in 0_usize..17,
        ) {
            let split = split.min(messages.len());
            let (left, right) = messages.split_at(split);

            prop_assert_eq!(merge(&merge(&[], left), right), merge(&[], &messages));
        }
    }
}
