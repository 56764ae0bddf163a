//! Property tests for the merge and truncation rules.

use feedme::feed::{merge, FeedEntry};
use feedme::storage::{truncate, Collection, Episode, Subscription};
use proptest::prelude::*;
use std::collections::{BTreeMap, HashSet};

/// Links drawn from a small alphabet so previous and fresh lists overlap;
/// the empty string stands for an entry without a link.
fn link() -> impl Strategy<Value = String> {
    prop_oneof![
        1 => Just(String::new()),
        6 => "[a-h]".prop_map(|s| format!("https://example.com/{s}")),
    ]
}

fn fresh_entries() -> impl Strategy<Value = Vec<FeedEntry>> {
    prop::collection::vec((link(), "[A-Z][a-z]{0,6}"), 0..12).prop_map(|items| {
        items
            .into_iter()
            .map(|(link, title)| FeedEntry {
                title,
                link,
                ..Default::default()
            })
            .collect()
    })
}

/// Previous episodes with distinct links, each with an arbitrary read flag.
fn previous_episodes() -> impl Strategy<Value = Vec<Episode>> {
    prop::collection::btree_map("[a-h]", any::<bool>(), 0..8).prop_map(|links| {
        links
            .into_iter()
            .map(|(slug, read)| Episode {
                title: slug.to_uppercase(),
                link: format!("https://example.com/{slug}"),
                read,
                ..Default::default()
            })
            .collect()
    })
}

fn collection() -> impl Strategy<Value = Collection> {
    prop::collection::btree_map(
        "[a-z]{1,6}",
        prop::collection::vec(any::<bool>(), 0..40),
        0..5,
    )
    .prop_map(|subs| {
        subs.into_iter()
            .map(|(name, reads)| {
                let mut sub = Subscription::new(format!("https://example.com/{name}.xml"));
                sub.episodes = reads
                    .into_iter()
                    .enumerate()
                    .map(|(i, read)| Episode {
                        title: format!("{name} {i}"),
                        link: format!("https://example.com/{name}/{i}"),
                        read,
                        ..Default::default()
                    })
                    .collect();
                (name, sub)
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn merge_is_deterministic(previous in previous_episodes(), fresh in fresh_entries()) {
        let first = merge(&previous, fresh.clone());
        let second = merge(&previous, fresh);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn merge_follows_fresh_order_and_carries_read_flags(
        previous in previous_episodes(),
        fresh in fresh_entries(),
    ) {
        let read_by_link: BTreeMap<&str, bool> =
            previous.iter().map(|e| (e.link.as_str(), e.read)).collect();

        // Expected order: fresh entries with repeated links removed after the first
        let mut seen = HashSet::new();
        let expected: Vec<&FeedEntry> = fresh
            .iter()
            .filter(|e| e.link.is_empty() || seen.insert(e.link.clone()))
            .collect();

        let merged = merge(&previous, fresh.clone());
        prop_assert_eq!(merged.len(), expected.len());

        for (episode, entry) in merged.iter().zip(expected) {
            prop_assert_eq!(&episode.link, &entry.link);
            prop_assert_eq!(&episode.title, &entry.title);
            let want = !entry.link.is_empty()
                && read_by_link.get(entry.link.as_str()).copied().unwrap_or(false);
            prop_assert_eq!(episode.read, want);
        }
    }

    #[test]
    fn merge_never_invents_links(previous in previous_episodes(), fresh in fresh_entries()) {
        let fresh_links: HashSet<String> = fresh.iter().map(|e| e.link.clone()).collect();
        for episode in merge(&previous, fresh) {
            prop_assert!(fresh_links.contains(&episode.link));
        }
    }

    #[test]
    fn truncation_is_idempotent(mut collection in collection(), max in 0usize..30) {
        truncate(&mut collection, max);
        let once = collection.clone();
        let dropped = truncate(&mut collection, max);
        prop_assert_eq!(dropped, 0);
        prop_assert_eq!(collection, once);
    }

    #[test]
    fn truncation_keeps_first_max(collection in collection(), max in 0usize..30) {
        let original = collection.clone();
        let mut truncated = collection;
        truncate(&mut truncated, max);

        prop_assert_eq!(truncated.len(), original.len());
        for (name, sub) in &truncated {
            let before = &original[name].episodes;
            let keep = before.len().min(max);
            prop_assert_eq!(&sub.episodes[..], &before[..keep]);
            prop_assert_eq!(&sub.url, &original[name].url);
        }
    }
}
