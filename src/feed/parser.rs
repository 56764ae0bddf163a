use feed_rs::model::Entry;
use feed_rs::parser::{self, ParseFeedError};

use crate::storage::Enclosure;

const NO_TITLE: &str = "No Title";
const NO_PUBLISH_DATE: &str = "No Publish Date";
const NO_SUMMARY: &str = "No Summary";

/// A feed item normalized for reconciliation. Carries no read state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub published: String,
    pub summary: String,
    pub link: String,
    pub enclosures: Vec<Enclosure>,
}

/// Parses RSS or Atom bytes into entries, keeping the feed's own order.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<FeedEntry>, ParseFeedError> {
    let feed = parser::parse(bytes)?;
    Ok(feed.entries.into_iter().map(normalize_entry).collect())
}

fn normalize_entry(entry: Entry) -> FeedEntry {
    let title = entry
        .title
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| NO_TITLE.to_string());

    let published = entry
        .published
        .or(entry.updated)
        .map(|dt| dt.to_rfc2822())
        .unwrap_or_else(|| NO_PUBLISH_DATE.to_string());

    let summary = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body))
        .unwrap_or_else(|| NO_SUMMARY.to_string());

    let link = entry
        .links
        .iter()
        .find(|l| !is_enclosure_rel(l.rel.as_deref()))
        .map(|l| l.href.trim().to_string())
        .unwrap_or_default();

    let mut enclosures: Vec<Enclosure> = Vec::new();
    let media = entry.media.iter().flat_map(|m| m.content.iter()).filter_map(|c| {
        c.url.as_ref().map(|url| {
            let media_type = c
                .content_type
                .as_ref()
                .map(|mime| mime.to_string())
                .unwrap_or_default();
            Enclosure::new(url.as_str(), media_type)
        })
    });
    let linked = entry
        .links
        .iter()
        .filter(|l| is_enclosure_rel(l.rel.as_deref()))
        .map(|l| Enclosure::new(l.href.trim(), l.media_type.clone().unwrap_or_default()));
    for enclosure in media.chain(linked) {
        if !enclosure.href.is_empty() && !enclosures.iter().any(|e| e.href == enclosure.href) {
            enclosures.push(enclosure);
        }
    }

    FeedEntry {
        title,
        published,
        summary,
        link,
        enclosures,
    }
}

fn is_enclosure_rel(rel: Option<&str>) -> bool {
    rel.is_some_and(|r| r.eq_ignore_ascii_case("enclosure"))
}
