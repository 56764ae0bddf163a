//! Utility functions for common operations.
//!
//! - **URL validation**: feed addresses must be absolute http(s) URLs
//! - **Text processing**: summary markup cleaning, terminal-safe output and
//!   width-aware truncation
//!
//! # Examples
//!
//! ```
//! use feedme::util::{clean_summary, truncate_to_width, validate_feed_url};
//!
//! let url = validate_feed_url("https://example.com/feed.xml").unwrap();
//! let text = clean_summary("<p>Show notes</p>");
//! let title = truncate_to_width("A very long episode title", 12);
//! ```

mod text;
mod url_validator;

pub use text::{clean_summary, strip_control_chars, truncate_to_width};
pub use url_validator::{validate_feed_url, UrlValidationError};
