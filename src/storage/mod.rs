//! Durable subscription storage.
//!
//! The whole collection lives in one JSON document keyed by subscription name.
//! [`Store`] owns the file: it loads with a start-fresh-on-corruption policy,
//! truncates episode history to the configured bound, and writes atomically
//! with saves serialized through a shared lock.

mod store;
mod types;

pub use store::{encode, truncate, PendingWrite, Store};
pub use types::{
    Collection, Enclosure, Episode, StorageError, Subscription, DEFAULT_MAX_EPISODES,
};
