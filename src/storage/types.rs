use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Default bound on the episode history kept per subscription.
pub const DEFAULT_MAX_EPISODES: usize = 100;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while reading or writing the subscription store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// File system access failed (read, temp file creation, sync or rename).
    #[error("Failed to access subscription store '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The store file exists but is not a valid subscription document.
    #[error("Subscription store '{}' is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The in-memory collection could not be encoded.
    #[error("Failed to encode subscriptions: {0}")]
    Encode(#[source] serde_json::Error),

    /// The blocking persistence task panicked or was cancelled.
    #[error("Persistence task failed: {0}")]
    Task(String),
}

// ============================================================================
// Data Structures
// ============================================================================

/// All subscriptions keyed by display name.
///
/// A `BTreeMap` keeps names unique and iterates them alphabetically, which is
/// the order the subscription list is presented in.
pub type Collection = BTreeMap<String, Subscription>;

/// A named podcast feed with its cached episode history (newest first).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub url: String,
    #[serde(default)]
    pub episodes: Vec<Episode>,
}

impl Subscription {
    /// A fresh subscription with no episode history.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            episodes: Vec::new(),
        }
    }

    pub fn unread_count(&self) -> usize {
        self.episodes.iter().filter(|ep| !ep.read).count()
    }

    /// True when any episode is still unread (the list marker).
    pub fn has_unread(&self) -> bool {
        self.episodes.iter().any(|ep| !ep.read)
    }
}

/// One stored feed entry plus its read flag.
///
/// Every field falls back to its default when missing from the store file so
/// that hand-edited or older documents still load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Episode {
    pub title: String,
    /// Display string as provided by the feed. Not guaranteed to sort.
    pub published: String,
    /// Raw markup; see [`crate::util::clean_summary`] for display.
    pub summary: String,
    /// Merge identity. Empty means the episode can never be matched to history.
    pub link: String,
    pub enclosures: Vec<Enclosure>,
    pub read: bool,
}

impl Episode {
    /// The first enclosure's address, if it has one.
    pub fn primary_media(&self) -> Option<&str> {
        self.enclosures
            .first()
            .map(|enc| enc.href.as_str())
            .filter(|href| !href.is_empty())
    }
}

/// A media attachment reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enclosure {
    #[serde(default)]
    pub href: String,
    /// Content-type label, e.g. `audio/mpeg`. Empty when the feed omits it.
    #[serde(rename = "type", default)]
    pub media_type: String,
}

impl Enclosure {
    pub fn new(href: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            media_type: media_type.into(),
        }
    }
}
