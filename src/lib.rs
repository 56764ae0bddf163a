//! feedme: podcast subscriptions that remember what you have heard.
//!
//! Subscriptions live in a single JSON document. Refreshing fetches every
//! feed concurrently and merges the fresh entries into the stored episode
//! lists, keeping each episode's read flag by link. A failed feed keeps its
//! previous episodes.
//!
//! - [`storage`] - the persisted document and its atomic writer
//! - [`feed`] - fetching, parsing, merging, and OPML import
//! - [`library`] - the single-writer owner of the collection
//! - [`launcher`] - external player and downloader invocation
//! - [`config`] - `config.toml` settings

pub mod config;
pub mod feed;
pub mod launcher;
pub mod library;
pub mod storage;
pub mod util;
