use feed_rs::model::FeedType;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::storage::{Article, Enclosure};

/// Errors produced while turning feed bytes into articles.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Neither the RSS reader nor the generic reader recognized the document
    #[error("Unrecognized feed document: {0}")]
    Unrecognized(String),
}

/// A parsed feed document: its declared title and its items in document order.
#[derive(Debug, Clone)]
struct ParsedFeed {
    title: String,
    articles: Vec<Article>,
}

/// Parse raw feed bytes into canonical articles, in document order.
///
/// RSS 2.0 documents are read with the `rss` crate so the `pubDate` text and
/// the enclosure attributes survive exactly as published. Atom, RSS 1.0 and
/// JSON Feed fall back to `feed-rs`, with each entry's date text read back
/// from the document unchanged.
///
/// Every article's `source` is the feed's declared title. Items without a
/// link are dropped, since the link is the article's identity.
///
/// # Errors
///
/// Returns [`ParseError::Unrecognized`] if the bytes are not a feed. No
/// partial result is returned in that case.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<Article>, ParseError> {
    Ok(parse_document(bytes)?.articles)
}

/// The feed's declared title, or an empty string if it declares none.
pub fn parse_feed_title(bytes: &[u8]) -> Result<String, ParseError> {
    Ok(parse_document(bytes)?.title)
}

fn parse_document(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    match rss::Channel::read_from(bytes) {
        Ok(channel) => Ok(from_rss(channel, bytes)),
        Err(rss_err) => {
            tracing::debug!(error = %rss_err, "Not an RSS document, trying generic parser");
            feed_rs::parser::parse(bytes)
                .map(|feed| from_generic(feed, bytes))
                .map_err(|e| ParseError::Unrecognized(e.to_string()))
        }
    }
}

// ============================================================================
// RSS 2.0
// ============================================================================

fn from_rss(channel: rss::Channel, bytes: &[u8]) -> ParsedFeed {
    let title = channel.title().to_string();
    let items = channel.into_items();

    // The rss crate keeps the last <enclosure> of an item; we want the first.
    let first_enclosures = scan_first_enclosures(bytes);
    let use_scan = first_enclosures.len() == items.len();
    let mut scanned = first_enclosures.into_iter();
    if !use_scan {
        tracing::debug!(
            items = items.len(),
            scanned = scanned.len(),
            "Item count mismatch in enclosure scan, using parsed enclosures"
        );
    }

    let articles = items
        .into_iter()
        .filter_map(|item| {
            let scanned_enclosure = scanned.next().flatten();
            let link = item.link().unwrap_or_default().trim().to_string();
            if link.is_empty() {
                tracing::debug!(title = ?item.title(), "Dropping item without link");
                return None;
            }

            let enclosure = if use_scan {
                scanned_enclosure
            } else {
                item.enclosure().and_then(|e| {
                    (!e.url().is_empty()).then(|| Enclosure {
                        url: e.url().to_string(),
                        mime_type: e.mime_type().to_string(),
                        length: e.length().to_string(),
                    })
                })
            };

            Some(Article {
                title: item.title().unwrap_or_default().to_string(),
                link,
                description: item.description().unwrap_or_default().to_string(),
                content: item.content().unwrap_or_default().to_string(),
                source: title.clone(),
                pubdate: item.pub_date().unwrap_or_default().to_string(),
                fetched_at: None,
                enclosure,
            })
        })
        .collect();

    ParsedFeed { title, articles }
}

/// One entry per `<item>` in document order, holding that item's first
/// `<enclosure>` with a non-empty url.
fn scan_first_enclosures(bytes: &[u8]) -> Vec<Option<Enclosure>> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();
    let mut found: Vec<Option<Enclosure>> = Vec::new();
    let mut in_item = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"item" => {
                in_item = true;
                found.push(None);
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"item" => found.push(None),
            Ok(Event::End(e)) if e.name().as_ref() == b"item" => in_item = false,
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if in_item && e.name().as_ref() == b"enclosure" =>
            {
                if let Some(slot) = found.last_mut() {
                    if slot.is_none() {
                        *slot = enclosure_attributes(&e, &reader);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Enclosure scan stopped early");
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    found
}

fn enclosure_attributes(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Option<Enclosure> {
    let mut enclosure = Enclosure {
        url: String::new(),
        mime_type: String::new(),
        length: String::new(),
    };

    for attr in e.attributes().flatten() {
        let decoder = reader.decoder();
        let value = match attr.decode_and_unescape_value(decoder) {
            Ok(value) => value.into_owned(),
            Err(err) => {
                tracing::debug!(error = %err, "Skipping malformed enclosure attribute");
                continue;
            }
        };
        match attr.key.as_ref() {
            b"url" => enclosure.url = value,
            b"type" => enclosure.mime_type = value,
            b"length" => enclosure.length = value,
            _ => {}
        }
    }

    (!enclosure.url.is_empty()).then_some(enclosure)
}

// ============================================================================
// Atom / RSS 1.0 / JSON Feed
// ============================================================================

fn from_generic(feed: feed_rs::model::Feed, bytes: &[u8]) -> ParsedFeed {
    let title = feed.title.map(|t| t.content).unwrap_or_default();

    // feed-rs only keeps dates it could parse, normalized to UTC; the raw text
    // is read back from the document instead.
    let raw_dates = match feed.feed_type {
        FeedType::JSON => json_item_dates(bytes),
        _ => scan_entry_dates(bytes),
    };
    let use_raw = raw_dates.len() == feed.entries.len();
    if !use_raw {
        tracing::debug!(
            entries = feed.entries.len(),
            scanned = raw_dates.len(),
            "Entry count mismatch in date scan, using parsed dates"
        );
    }
    let mut raw_dates = raw_dates.into_iter();

    let articles = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let raw_date = raw_dates.next();
            let link = entry
                .links
                .iter()
                .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
                .or_else(|| {
                    entry
                        .links
                        .iter()
                        .find(|l| l.rel.as_deref() != Some("enclosure"))
                })
                .map(|l| l.href.trim().to_string())
                .unwrap_or_default();
            if link.is_empty() {
                tracing::debug!(id = %entry.id, "Dropping entry without link");
                return None;
            }

            let enclosure = entry
                .links
                .iter()
                .find(|l| l.rel.as_deref() == Some("enclosure") && !l.href.is_empty())
                .map(|l| Enclosure {
                    url: l.href.clone(),
                    mime_type: l.media_type.clone().unwrap_or_default(),
                    length: l.length.map(|n| n.to_string()).unwrap_or_default(),
                })
                .or_else(|| {
                    entry
                        .media
                        .iter()
                        .flat_map(|m| m.content.iter())
                        .find_map(|c| {
                            c.url.as_ref().map(|url| Enclosure {
                                url: url.to_string(),
                                mime_type: c
                                    .content_type
                                    .as_ref()
                                    .map(|t| t.to_string())
                                    .unwrap_or_default(),
                                length: c.size.map(|n| n.to_string()).unwrap_or_default(),
                            })
                        })
                });

            Some(Article {
                title: entry.title.map(|t| t.content).unwrap_or_default(),
                link,
                description: entry.summary.map(|s| s.content).unwrap_or_default(),
                content: entry.content.and_then(|c| c.body).unwrap_or_default(),
                source: title.clone(),
                pubdate: match raw_date {
                    Some(date) if use_raw => date,
                    _ => entry
                        .published
                        .or(entry.updated)
                        .map(|dt| dt.to_rfc3339())
                        .unwrap_or_default(),
                },
                fetched_at: None,
                enclosure,
            })
        })
        .collect();

    ParsedFeed { title, articles }
}

#[derive(Clone, Copy)]
enum DateField {
    Published,
    Updated,
}

/// One entry per Atom `<entry>` in document order: the raw text of its
/// `<published>`, or of its `<updated>` if it has no `<published>`.
fn scan_entry_dates(bytes: &[u8]) -> Vec<String> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();
    let mut dates = Vec::new();

    // (published, updated) of the open entry, and element depth inside it
    let mut entry: Option<(Option<String>, Option<String>)> = None;
    let mut depth = 0usize;
    let mut capture: Option<DateField> = None;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if entry.is_some() {
                    depth += 1;
                    if depth == 1 {
                        capture = match e.local_name().as_ref() {
                            b"published" | b"pubDate" => Some(DateField::Published),
                            b"updated" => Some(DateField::Updated),
                            _ => None,
                        };
                        text.clear();
                    }
                } else if e.local_name().as_ref() == b"entry" {
                    entry = Some((None, None));
                    depth = 0;
                }
            }
            Ok(Event::Empty(e)) if entry.is_none() && e.local_name().as_ref() == b"entry" => {
                dates.push(String::new());
            }
            Ok(Event::Text(t)) if capture.is_some() => match t.unescape() {
                Ok(value) => text.push_str(&value),
                Err(err) => tracing::debug!(error = %err, "Skipping malformed date text"),
            },
            Ok(Event::CData(t)) if capture.is_some() => {
                text.push_str(&String::from_utf8_lossy(&t));
            }
            Ok(Event::End(_)) => {
                if let Some((published, updated)) = entry.as_mut() {
                    if depth == 0 {
                        dates.push(published.take().or(updated.take()).unwrap_or_default());
                        entry = None;
                    } else {
                        if depth == 1 {
                            let value = text.trim().to_string();
                            match capture.take() {
                                Some(DateField::Published) => {
                                    published.get_or_insert(value);
                                }
                                Some(DateField::Updated) => {
                                    updated.get_or_insert(value);
                                }
                                None => {}
                            }
                        }
                        depth -= 1;
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Date scan stopped early");
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    dates
}

/// One entry per JSON Feed item: its raw `date_published`, or
/// `date_modified` if it has none.
fn json_item_dates(bytes: &[u8]) -> Vec<String> {
    let doc: serde_json::Value = match serde_json::from_slice(bytes) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::debug!(error = %e, "Date scan skipped");
            return Vec::new();
        }
    };

    doc.get("items")
        .and_then(|items| items.as_array())
        .map(|items| {
            items
                .iter()
                .map(|item| {
                    item.get("date_published")
                        .or_else(|| item.get("date_modified"))
                        .and_then(|d| d.as_str())
                        .unwrap_or_default()
                        .to_string()
                })
                .collect()
        })
        .unwrap_or_default()
}
