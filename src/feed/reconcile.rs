//! Merging freshly fetched entries into stored episode history.
//!
//! An episode's `link` is its identity across fetches. The read flag is the
//! only state carried from history into the merged list; everything else comes
//! from the fresh entry. Entries without a link cannot be matched and always
//! arrive unread.

use std::collections::{HashMap, HashSet};

use crate::feed::fetcher::RefreshOutcome;
use crate::feed::parser::FeedEntry;
use crate::storage::{Collection, Episode};

/// Per-cycle accounting returned by [`apply`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Subscriptions whose episode list was replaced, by name.
    pub updated: Vec<String>,
    /// Subscriptions whose fetch failed, with the diagnostic message.
    pub failed: Vec<(String, String)>,
    /// Subscriptions deleted or re-pointed while their fetch was in flight.
    pub skipped: Vec<String>,
    /// Episodes in the merged lists that had no match in history.
    pub new_episodes: usize,
}

impl RefreshSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Merges `fresh` entries with `previous` episodes.
///
/// The result follows `fresh` order exactly. Each episode carries the fresh
/// fields plus the read flag of the previous episode with the same non-empty
/// link (false when there is none). Episodes whose link is absent from
/// `fresh` are dropped. When `fresh` repeats a link, the first occurrence wins.
///
/// Pure: identical inputs always give identical output.
pub fn merge(previous: &[Episode], fresh: Vec<FeedEntry>) -> Vec<Episode> {
    let read_by_link: HashMap<&str, bool> = previous
        .iter()
        .filter(|ep| !ep.link.is_empty())
        .map(|ep| (ep.link.as_str(), ep.read))
        .collect();

    let mut seen: HashSet<String> = HashSet::new();
    let mut merged = Vec::with_capacity(fresh.len());

    for entry in fresh {
        if !entry.link.is_empty() && !seen.insert(entry.link.clone()) {
            tracing::debug!(link = %entry.link, "Dropping duplicate link within fetch");
            continue;
        }

        let read = if entry.link.is_empty() {
            false
        } else {
            read_by_link.get(entry.link.as_str()).copied().unwrap_or(false)
        };

        merged.push(Episode {
            title: entry.title,
            published: entry.published,
            summary: entry.summary,
            link: entry.link,
            enclosures: entry.enclosures,
            read,
        });
    }

    merged
}

/// Folds refresh outcomes into `collection` in place.
///
/// Successful fetches replace the subscription's episodes with the merge
/// result. Failed fetches leave the subscription exactly as it was. Outcomes
/// for subscriptions that no longer exist, or whose url changed since the
/// fetch started, are skipped. Summary lists are sorted by name.
pub fn apply(collection: &mut Collection, outcomes: Vec<RefreshOutcome>) -> RefreshSummary {
    let mut summary = RefreshSummary::default();

    for outcome in outcomes {
        let Some(sub) = collection.get_mut(&outcome.name) else {
            tracing::debug!(name = %outcome.name, "Subscription removed during refresh, skipping");
            summary.skipped.push(outcome.name);
            continue;
        };

        if sub.url != outcome.url {
            tracing::debug!(
                name = %outcome.name,
                fetched = %outcome.url,
                current = %sub.url,
                "Subscription url changed during refresh, skipping"
            );
            summary.skipped.push(outcome.name);
            continue;
        }

        match outcome.result {
            Ok(entries) => {
                let known: HashSet<&str> = sub
                    .episodes
                    .iter()
                    .filter(|ep| !ep.link.is_empty())
                    .map(|ep| ep.link.as_str())
                    .collect();
                let merged = merge(&sub.episodes, entries);
                let new_count = merged
                    .iter()
                    .filter(|ep| ep.link.is_empty() || !known.contains(ep.link.as_str()))
                    .count();
                tracing::debug!(
                    name = %outcome.name,
                    episodes = merged.len(),
                    new = new_count,
                    "Merged feed"
                );
                sub.episodes = merged;
                summary.new_episodes += new_count;
                summary.updated.push(outcome.name);
            }
            Err(e) => {
                summary.failed.push((outcome.name, e.to_string()));
            }
        }
    }

    summary.updated.sort();
    summary.failed.sort();
    summary.skipped.sort();
    summary
}
