//! Feed retrieval, reconciliation, and feed-list import.
//!
//! - `parser` - RSS/Atom parsing with `feed-rs` into normalized entries
//! - `fetcher` - single-attempt HTTP retrieval and concurrent refresh cycles
//! - `reconcile` - link-keyed merge of fresh entries with stored episodes
//! - `opml` - OPML feed-list import
//!
//! # Example
//!
//! ```ignore
//! use feedme::feed::{apply, refresh_all, FetchOptions};
//!
//! let outcomes = refresh_all(&client, targets, FetchOptions::default()).await;
//! let summary = apply(&mut collection, outcomes);
//! ```

mod fetcher;
mod opml;
mod parser;
mod reconcile;

pub use fetcher::{
    build_client, fetch, refresh_all, FetchError, FetchOptions, FetchResult, RefreshOutcome,
    RefreshTarget, DEFAULT_FETCH_TIMEOUT, DEFAULT_MAX_CONCURRENT_FETCHES,
};
pub use opml::{import_file, parse_feed_list, ImportError};
pub use parser::{parse_feed, FeedEntry};
pub use reconcile::{apply, merge, RefreshSummary};
