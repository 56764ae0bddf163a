//! The subscription library: the single owner of the in-memory collection.
//!
//! Every mutation (refresh merges, read toggles, adds, deletes, imports)
//! takes the collection lock, so concurrent callers never lose each other's
//! changes. Saves are encoded under that lock and written after it is
//! released; the store's own write permit keeps them in order.
//!
//! Selecting an episode starts a short dwell timer. If no other episode is
//! selected before it fires, the episode is marked read and saved.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::feed::{apply, refresh_all, FetchOptions, RefreshSummary, RefreshTarget};
use crate::storage::{Collection, Episode, StorageError, Store, Subscription};
use crate::util::{validate_feed_url, UrlValidationError};

/// Default dwell before a selected episode counts as read.
pub const DEFAULT_MARK_READ_DELAY: Duration = Duration::from_millis(100);

// ============================================================================
// Error Types
// ============================================================================

/// Rejected requests. Nothing is mutated when one of these is returned.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("Invalid feed URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: UrlValidationError,
    },

    #[error("A subscription named '{0}' already exists")]
    DuplicateName(String),

    #[error("No subscription named '{0}'")]
    UnknownSubscription(String),

    #[error("Episode {index} out of range for '{name}' ({len} episodes)")]
    EpisodeOutOfRange { name: String, index: usize, len: usize },
}

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

// ============================================================================
// Public Types
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct LibraryOptions {
    pub fetch: FetchOptions,
    pub mark_read_delay: Duration,
}

impl Default for LibraryOptions {
    fn default() -> Self {
        Self {
            fetch: FetchOptions::default(),
            mark_read_delay: DEFAULT_MARK_READ_DELAY,
        }
    }
}

impl LibraryOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fetch: FetchOptions {
                timeout: config.fetch_timeout(),
                max_concurrent: config.max_concurrent_fetches,
            },
            mark_read_delay: config.mark_read_delay(),
        }
    }
}

/// One row of the subscription listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionOverview {
    pub name: String,
    pub url: String,
    pub episodes: usize,
    pub unread: usize,
}

impl SubscriptionOverview {
    pub fn has_unread(&self) -> bool {
        self.unread > 0
    }
}

/// Counts from merging an imported feed list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub added: usize,
    pub overwritten: usize,
}

/// The armed dwell timer and what it was armed for.
struct PendingMark {
    name: String,
    index: usize,
    handle: JoinHandle<()>,
}

// ============================================================================
// Library
// ============================================================================

pub struct Library {
    collection: Arc<Mutex<Collection>>,
    store: Store,
    client: reqwest::Client,
    options: LibraryOptions,
    pending_mark: std::sync::Mutex<Option<PendingMark>>,
}

impl Library {
    pub fn new(store: Store, client: reqwest::Client, options: LibraryOptions, collection: Collection) -> Self {
        Self {
            collection: Arc::new(Mutex::new(collection)),
            store,
            client,
            options,
            pending_mark: std::sync::Mutex::new(None),
        }
    }

    /// Loads the persisted collection and wraps it.
    pub async fn open(store: Store, client: reqwest::Client, options: LibraryOptions) -> Self {
        let collection = store.load().await;
        tracing::debug!(
            path = %store.path().display(),
            subscriptions = collection.len(),
            "Opened library"
        );
        Self::new(store, client, options, collection)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // ------------------------------------------------------------------------
    // Refresh
    // ------------------------------------------------------------------------

    /// Fetches every subscription concurrently and merges the results.
    ///
    /// The collection lock is not held while fetching. A failed feed keeps its
    /// previous episodes; only the final save can fail the whole call.
    pub async fn refresh(&self) -> Result<RefreshSummary, StorageError> {
        let targets: Vec<RefreshTarget> = {
            let guard = self.collection.lock().await;
            guard
                .iter()
                .map(|(name, sub)| RefreshTarget {
                    name: name.clone(),
                    url: sub.url.clone(),
                })
                .collect()
        };
        self.refresh_targets(targets).await
    }

    /// Refreshes a single subscription.
    pub async fn refresh_subscription(&self, name: &str) -> Result<RefreshSummary, LibraryError> {
        let target = {
            let guard = self.collection.lock().await;
            let sub = guard
                .get(name)
                .ok_or_else(|| ValidationError::UnknownSubscription(name.to_string()))?;
            RefreshTarget {
                name: name.to_string(),
                url: sub.url.clone(),
            }
        };
        Ok(self.refresh_targets(vec![target]).await?)
    }

    async fn refresh_targets(&self, targets: Vec<RefreshTarget>) -> Result<RefreshSummary, StorageError> {
        if targets.is_empty() {
            tracing::debug!("No subscriptions to refresh");
            return Ok(RefreshSummary::default());
        }

        let outcomes = refresh_all(&self.client, targets, self.options.fetch).await;

        let mut guard = self.collection.lock().await;
        let summary = apply(&mut guard, outcomes);
        tracing::info!(
            updated = summary.updated.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped.len(),
            new_episodes = summary.new_episodes,
            "Refresh complete"
        );
        self.persist(guard).await?;
        Ok(summary)
    }

    // ------------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------------

    /// Sets one episode's read flag and saves.
    pub async fn toggle_read(&self, name: &str, index: usize, read: bool) -> Result<(), LibraryError> {
        let mut guard = self.collection.lock().await;
        let episode = episode_mut(&mut guard, name, index)?;
        if episode.read == read {
            return Ok(());
        }
        episode.read = read;
        tracing::debug!(name = %name, index = index, read = read, "Toggled read state");
        self.persist(guard).await?;
        Ok(())
    }

    /// Adds a subscription with no episodes and saves.
    ///
    /// Name and url are trimmed. An existing subscription with the same name
    /// is left untouched.
    pub async fn add_subscription(&self, name: &str, url: &str) -> Result<(), LibraryError> {
        let name = name.trim();
        let url = url.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyField("name").into());
        }
        if url.is_empty() {
            return Err(ValidationError::EmptyField("url").into());
        }
        validate_feed_url(url).map_err(|source| ValidationError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;

        let mut guard = self.collection.lock().await;
        if guard.contains_key(name) {
            tracing::warn!(name = %name, "Duplicate subscription rejected");
            return Err(ValidationError::DuplicateName(name.to_string()).into());
        }
        guard.insert(name.to_string(), Subscription::new(url));
        tracing::info!(name = %name, url = %url, "Added subscription");
        self.persist(guard).await?;
        Ok(())
    }

    /// Removes a subscription and saves, returning what was removed.
    pub async fn delete_subscription(&self, name: &str) -> Result<Subscription, LibraryError> {
        let mut guard = self.collection.lock().await;
        let removed = guard
            .remove(name)
            .ok_or_else(|| ValidationError::UnknownSubscription(name.to_string()))?;
        tracing::info!(name = %name, "Deleted subscription");
        self.persist(guard).await?;
        Ok(removed)
    }

    /// Merges an imported feed list; same-named entries are replaced.
    pub async fn import(&self, entries: Collection) -> Result<ImportSummary, StorageError> {
        let mut summary = ImportSummary::default();
        if entries.is_empty() {
            return Ok(summary);
        }

        let mut guard = self.collection.lock().await;
        for (name, sub) in entries {
            if guard.insert(name, sub).is_some() {
                summary.overwritten += 1;
            } else {
                summary.added += 1;
            }
        }
        tracing::info!(
            added = summary.added,
            overwritten = summary.overwritten,
            "Imported subscriptions"
        );
        self.persist(guard).await?;
        Ok(summary)
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// All subscriptions, sorted by name.
    pub async fn subscriptions(&self) -> Vec<SubscriptionOverview> {
        let guard = self.collection.lock().await;
        guard
            .iter()
            .map(|(name, sub)| SubscriptionOverview {
                name: name.clone(),
                url: sub.url.clone(),
                episodes: sub.episodes.len(),
                unread: sub.unread_count(),
            })
            .collect()
    }

    /// Episodes of one subscription, newest first.
    pub async fn episodes(&self, name: &str) -> Result<Vec<Episode>, ValidationError> {
        let guard = self.collection.lock().await;
        guard
            .get(name)
            .map(|sub| sub.episodes.clone())
            .ok_or_else(|| ValidationError::UnknownSubscription(name.to_string()))
    }

    pub async fn episode(&self, name: &str, index: usize) -> Result<Episode, ValidationError> {
        let guard = self.collection.lock().await;
        episode_ref(&guard, name, index).cloned()
    }

    /// Copy of the whole collection.
    pub async fn snapshot(&self) -> Collection {
        self.collection.lock().await.clone()
    }

    // ------------------------------------------------------------------------
    // Dwell timer
    // ------------------------------------------------------------------------

    /// Selects an episode, cancelling any earlier selection's timer, and
    /// schedules it to be marked read after the configured delay.
    ///
    /// When the timer fires it re-checks that the same episode (by link and
    /// title) is still at that position, since a refresh may have reordered
    /// the list in the meantime.
    pub async fn select_episode(&self, name: &str, index: usize) -> Result<Episode, ValidationError> {
        let selected = {
            let guard = self.collection.lock().await;
            episode_ref(&guard, name, index)?.clone()
        };

        self.clear_selection();

        let collection = Arc::clone(&self.collection);
        let store = self.store.clone();
        let delay = self.options.mark_read_delay;
        let task_name = name.to_string();
        let link = selected.link.clone();
        let title = selected.title.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let mut guard = collection.lock().await;
            let Some(episode) = guard
                .get_mut(&task_name)
                .and_then(|sub| sub.episodes.get_mut(index))
            else {
                tracing::debug!(name = %task_name, index = index, "Selected episode gone, not marking read");
                return;
            };
            if episode.link != link || episode.title != title {
                tracing::debug!(name = %task_name, index = index, "Selected episode moved, not marking read");
                return;
            }
            if episode.read {
                return;
            }
            episode.read = true;
            tracing::debug!(name = %task_name, index = index, "Marked episode read after dwell");

            match store.prepare(&mut guard).await {
                Ok(pending) => {
                    drop(guard);
                    // commit logs its own failure
                    let _ = pending.commit().await;
                }
                Err(e) => {
                    tracing::warn!(name = %task_name, error = %e, "Failed to save read state");
                }
            }
        });

        // Swap under one lock: a concurrent selection may have armed a timer
        // since the clear above, and that one must be aborted too.
        let replaced = self.lock_pending().replace(PendingMark {
            name: name.to_string(),
            index,
            handle,
        });
        if let Some(previous) = replaced {
            cancel(previous);
        }
        Ok(selected)
    }

    /// Cancels the pending dwell timer, if any.
    pub fn clear_selection(&self) {
        let pending = self.lock_pending().take();
        if let Some(pending) = pending {
            cancel(pending);
        }
    }

    /// Waits for the pending dwell timer to fire and finish saving.
    pub async fn wait_for_pending_mark(&self) {
        let pending = self.lock_pending().take();
        if let Some(pending) = pending {
            if let Err(e) = pending.handle.await {
                if !e.is_cancelled() {
                    tracing::warn!(name = %pending.name, error = %e, "Read mark task failed");
                }
            }
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<PendingMark>> {
        self.pending_mark.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Encodes under the collection lock, then writes after releasing it.
    async fn persist(&self, mut guard: MutexGuard<'_, Collection>) -> Result<(), StorageError> {
        let pending = self.store.prepare(&mut guard).await?;
        drop(guard);
        pending.commit().await
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        self.clear_selection();
    }
}

fn cancel(pending: PendingMark) {
    if !pending.handle.is_finished() {
        tracing::debug!(name = %pending.name, index = pending.index, "Cancelled pending read mark");
    }
    pending.handle.abort();
}

fn episode_ref<'a>(collection: &'a Collection, name: &str, index: usize) -> Result<&'a Episode, ValidationError> {
    let sub = collection
        .get(name)
        .ok_or_else(|| ValidationError::UnknownSubscription(name.to_string()))?;
    sub.episodes
        .get(index)
        .ok_or_else(|| ValidationError::EpisodeOutOfRange {
            name: name.to_string(),
            index,
            len: sub.episodes.len(),
        })
}

fn episode_mut<'a>(collection: &'a mut Collection, name: &str, index: usize) -> Result<&'a mut Episode, ValidationError> {
    let sub = collection
        .get_mut(name)
        .ok_or_else(|| ValidationError::UnknownSubscription(name.to_string()))?;
    let len = sub.episodes.len();
    sub.episodes
        .get_mut(index)
        .ok_or_else(|| ValidationError::EpisodeOutOfRange {
            name: name.to_string(),
            index,
            len,
        })
}

// ============================================================================
// Tests
// ============================================================================
