use crate::rss_utils::html::text_excerpt;
use crate::types::{FeedItem, ParsedFeed, PublisherError, Result};
use feed_rs::parser;
use tracing::{debug, info};

const SNIPPET_CHARS: usize = 300;

pub struct FeedParser;

impl FeedParser {
    pub fn parse_feed(content: &str) -> Result<ParsedFeed> {
        debug!("Parsing feed content ({} bytes)", content.len());

        // No synthesized ids: an entry without a GUID is identified by its link
        let feed = parser::Builder::new()
            .id_generator(|_links, _title, _uri| String::new())
            .build()
            .parse(content.as_bytes())
            .map_err(|e| PublisherError::Parse(format!("Failed to parse feed: {}", e)))?;

        let title = feed.title.map(|t| t.content);
        let description = feed.description.map(|d| d.content);

        let items: Vec<FeedItem> = feed
            .entries
            .into_iter()
            .filter_map(Self::parse_entry)
            .collect();

        info!("Parsed feed with {} entries", items.len());

        Ok(ParsedFeed {
            title,
            description,
            items,
        })
    }

    fn parse_entry(entry: feed_rs::model::Entry) -> Option<FeedItem> {
        let title = entry
            .title
            .map(|t| t.content.trim().to_string())
            .unwrap_or_default();

        // Entries without a link cannot be attributed or deduplicated
        let link = entry.links.first()?.href.trim().to_string();
        if link.is_empty() {
            debug!("Skipping entry without link: {}", title);
            return None;
        }

        let identity = if entry.id.trim().is_empty() {
            link.clone()
        } else {
            entry.id.trim().to_string()
        };

        let summary = entry.summary.map(|s| s.content);

        // Prefer full content over summary for the body
        let raw_body = entry
            .content
            .and_then(|c| c.body)
            .or_else(|| summary.clone())
            .unwrap_or_default();

        let raw_snippet = match summary {
            Some(s) if !s.trim().is_empty() => s,
            _ => text_excerpt(&raw_body, SNIPPET_CHARS),
        };

        let categories = entry
            .categories
            .into_iter()
            .map(|c| c.label.unwrap_or(c.term))
            .filter(|c| !c.trim().is_empty())
            .collect();

        Some(FeedItem {
            identity,
            link,
            title,
            published_at: entry.published.or(entry.updated),
            raw_body,
            raw_snippet,
            categories,
        })
    }

    pub fn is_valid_feed_content(content: &str) -> bool {
        let content_lower = content.to_lowercase();
        content_lower.contains("<rss")
            || content_lower.contains("<feed")
            || content_lower.contains("<rdf:rdf")
            || content_lower.contains("<channel")
    }
}
