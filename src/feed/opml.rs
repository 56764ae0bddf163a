use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::path::Path;
use thiserror::Error;

use crate::storage::{Collection, Subscription};
use crate::util::validate_feed_url;

/// SEC-003: Maximum allowed nesting depth for OPML outline elements.
/// Prevents stack overflow attacks from maliciously crafted deeply nested OPMLs.
const MAX_OPML_DEPTH: usize = 50;

/// Document-level import failures.
///
/// Individual malformed outlines are not errors; they are skipped.
#[derive(Debug, Error)]
pub enum ImportError {
    /// SEC-003: OPML nesting depth exceeds safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    /// The document is not well-formed XML.
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// File I/O error.
    #[error("Failed to read feed list: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads an OPML file and converts it into subscriptions with empty history.
pub async fn import_file(path: &Path) -> Result<Collection, ImportError> {
    let content = tokio::fs::read_to_string(path).await?;
    let feeds = parse_feed_list(&content)?;
    tracing::debug!(path = %path.display(), feeds = feeds.len(), "Parsed feed list");
    Ok(feeds)
}

/// Extracts `name -> {url, episodes: []}` from an OPML document.
///
/// Every `<outline>` inside `<body>` is considered, at any depth; outlines
/// elsewhere (e.g. in `<head>`) are ignored. The name is the `title`
/// attribute, falling back to `text`; the url is `xmlUrl`. Outlines missing
/// either, carrying undecodable attributes, or with a url that is not http(s)
/// are skipped with a warning. When two outlines share a name, the later wins.
///
/// # Security
///
/// - XXE (XML External Entity) attacks are mitigated because `quick-xml` (0.37) does not
///   parse `<!ENTITY>` declarations. Custom entities cause `EscapeError::UnrecognizedEntity`,
///   which skips the outline carrying them.
pub fn parse_feed_list(content: &str) -> Result<Collection, ImportError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut feeds = Collection::new();
    let mut buf = Vec::new();
    let mut depth: usize = 0;
    let mut in_body = false;
    let mut seen_element = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                seen_element = true;
                match e.name().as_ref() {
                    b"body" => in_body = true,
                    b"outline" => {
                        depth += 1;
                        if depth > MAX_OPML_DEPTH {
                            return Err(ImportError::MaxDepthExceeded(MAX_OPML_DEPTH));
                        }
                        if in_body {
                            collect_outline(&e, &reader, &mut feeds);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                seen_element = true;
                if in_body && e.name().as_ref() == b"outline" {
                    collect_outline(&e, &reader, &mut feeds);
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"body" => in_body = false,
                b"outline" => depth = depth.saturating_sub(1),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ImportError::XmlParse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !seen_element {
        return Err(ImportError::XmlParse("document contains no elements".to_string()));
    }

    Ok(feeds)
}

fn collect_outline(e: &BytesStart<'_>, reader: &Reader<&[u8]>, feeds: &mut Collection) {
    if let Some((name, url)) = outline_entry(e, reader) {
        if feeds.contains_key(&name) {
            tracing::debug!(name = %name, "Duplicate name in feed list, later entry wins");
        }
        tracing::debug!(name = %name, url = %url, "Imported feed");
        feeds.insert(name, Subscription::new(url));
    }
}

/// Returns `(name, url)` for a usable outline, `None` otherwise.
fn outline_entry(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Option<(String, String)> {
    let mut xml_url = None;
    let mut title = None;
    let mut text = None;

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(err) => {
                tracing::warn!(error = %err, "Skipping outline with malformed attribute");
                return None;
            }
        };
        let slot = match attr.key.as_ref() {
            b"xmlUrl" => &mut xml_url,
            b"title" => &mut title,
            b"text" => &mut text,
            _ => continue,
        };
        match attr.decode_and_unescape_value(reader.decoder()) {
            Ok(value) => *slot = Some(value.trim().to_string()),
            Err(err) => {
                tracing::warn!(error = %err, "Skipping outline with undecodable attribute");
                return None;
            }
        }
    }

    let name = title
        .filter(|t| !t.is_empty())
        .or(text.filter(|t| !t.is_empty()));
    let url = xml_url.filter(|u| !u.is_empty());

    match (name, url) {
        (Some(name), Some(url)) => match validate_feed_url(&url) {
            Ok(_) => Some((name, url)),
            Err(err) => {
                tracing::warn!(name = %name, url = %url, error = %err, "Skipping feed with invalid url");
                None
            }
        },
        // Category/folder outlines have a name but no feed url
        (Some(_), None) => None,
        (None, Some(url)) => {
            tracing::warn!(url = %url, "Skipping feed without a title");
            None
        }
        (None, None) => None,
    }
}
