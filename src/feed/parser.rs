use chrono::{DateTime, Utc};
use feed_rs::model::Link;
use feed_rs::parser;

use crate::util::{normalize, strip_control_chars};

/// One item extracted from a feed document.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub title: String,
    /// Link exactly as it appeared in the feed.
    pub link: String,
    /// Dedup key derived from `link`.
    pub normalized_link: String,
    /// Empty when the item has neither a summary nor content.
    pub description: String,
    pub published: Option<DateTime<Utc>>,
}

impl Entry {
    pub fn new(
        title: impl Into<String>,
        link: impl Into<String>,
        description: impl Into<String>,
        published: Option<DateTime<Utc>>,
    ) -> Self {
        let link = link.into();
        Self {
            title: title.into(),
            normalized_link: normalize(&link),
            link,
            description: description.into(),
            published,
        }
    }

    /// Publish time used for recency checks and ordering; items without a
    /// structured timestamp count as published at `now`.
    pub fn published_or(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.published.unwrap_or(now)
    }

    /// Case-sensitive substring test over `title + description`.
    pub fn matches_keyword(&self, keyword: &str) -> bool {
        let mut haystack = String::with_capacity(self.title.len() + self.description.len());
        haystack.push_str(&self.title);
        haystack.push_str(&self.description);
        haystack.contains(keyword)
    }
}

/// Result of parsing a feed, keeping document order.
#[derive(Debug, Default)]
pub struct ParseResult {
    pub entries: Vec<Entry>,
    /// Items dropped because they carried no link.
    pub skipped: usize,
}

/// Parses an RSS 0.9x/1.0/2.0, Atom or JSON Feed document.
pub fn parse_feed(bytes: &[u8]) -> Result<ParseResult, parser::ParseFeedError> {
    let feed = parser::parse(bytes)?;
    let mut result = ParseResult::default();

    for item in feed.entries {
        let Some(link) = pick_link(&item.links) else {
            result.skipped += 1;
            continue;
        };

        let title = item
            .title
            .map(|t| strip_control_chars(t.content.trim()).into_owned())
            .unwrap_or_else(|| "Untitled".to_string());
        let description = item
            .summary
            .map(|s| s.content)
            .or_else(|| item.content.and_then(|c| c.body))
            .map(|d| strip_control_chars(&d).into_owned())
            .unwrap_or_default();
        let published = item.published.or(item.updated);

        result
            .entries
            .push(Entry::new(title, link, description, published));
    }

    Ok(result)
}

/// Prefers the `alternate` link (Atom) and falls back to the first one.
fn pick_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
        .or_else(|| links.first())
        .map(|l| l.href.trim().to_owned())
        .filter(|href| !href.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const RSS_TWO_ITEMS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>News</title>
  <item>
    <title>学生起業家が資金調達</title>
    <link>https://example.com/a?utm_source=rss</link>
    <description>シード調達の話</description>
    <pubDate>Mon, 06 May 2024 10:00:00 +0900</pubDate>
  </item>
  <item>
    <title>Weather report</title>
    <link>https://example.com/b</link>
  </item>
</channel></rss>"#;

    #[test]
    fn test_parse_rss_entries_in_document_order() {
        let result = parse_feed(RSS_TWO_ITEMS.as_bytes()).unwrap();
        assert_eq!(result.entries.len(), 2);
        assert_eq!(result.skipped, 0);

        let first = &result.entries[0];
        assert_eq!(first.title, "学生起業家が資金調達");
        assert_eq!(first.link, "https://example.com/a?utm_source=rss");
        assert_eq!(first.normalized_link, "https://example.com/a");
        assert_eq!(first.description, "シード調達の話");
        assert_eq!(
            first.published,
            Some(Utc.with_ymd_and_hms(2024, 5, 6, 1, 0, 0).unwrap())
        );

        let second = &result.entries[1];
        assert_eq!(second.description, "");
        assert_eq!(second.published, None);
    }

    #[test]
    fn test_parse_atom_prefers_alternate_link() {
        let atom = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Blog</title>
  <entry>
    <id>1</id>
    <title>Post</title>
    <link rel="edit" href="https://example.com/edit/1"/>
    <link rel="alternate" href="https://example.com/post/1"/>
    <updated>2024-01-01T00:00:00Z</updated>
    <content type="text">Body text</content>
  </entry>
</feed>"#;
        let result = parse_feed(atom.as_bytes()).unwrap();
        assert_eq!(result.entries.len(), 1);
        let entry = &result.entries[0];
        assert_eq!(entry.link, "https://example.com/post/1");
        assert_eq!(entry.description, "Body text");
        assert_eq!(
            entry.published,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_rss1_rdf() {
        let rdf = r#"<?xml version="1.0" encoding="UTF-8"?>
<rdf:RDF xmlns="http://purl.org/rss/1.0/"
         xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
         xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel rdf:about="https://example.jp/index.rdf">
    <title>Press</title>
    <link>https://example.jp/</link>
    <description>Press releases</description>
  </channel>
  <item rdf:about="https://example.jp/r/1">
    <title>起業支援プログラム開始</title>
    <link>https://example.jp/r/1</link>
    <description>募集開始</description>
    <dc:date>2024-03-01T09:00:00+09:00</dc:date>
  </item>
</rdf:RDF>"#;
        let result = parse_feed(rdf.as_bytes()).unwrap();
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].link, "https://example.jp/r/1");
        assert_eq!(result.entries[0].description, "募集開始");
    }

    #[test]
    fn test_items_without_link_are_skipped() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <item><title>No link</title></item>
  <item><title>Linked</title><link>https://example.com/x</link></item>
</channel></rss>"#;
        let result = parse_feed(rss.as_bytes()).unwrap();
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.entries[0].title, "Linked");
    }

    #[test]
    fn test_control_chars_removed_from_title() {
        let rss = "<?xml version=\"1.0\"?>\n<rss version=\"2.0\"><channel>\
            <item><title>Evil\x1b Title</title><link>https://example.com/e</link></item>\
            </channel></rss>";
        let result = parse_feed(rss.as_bytes()).unwrap();
        assert_eq!(result.entries[0].title, "Evil Title");
    }

    #[test]
    fn test_malformed_document_is_error() {
        assert!(parse_feed(b"<html><body>not a feed</body></html>").is_err());
        assert!(parse_feed(b"<not valid xml").is_err());
    }

    #[test]
    fn test_keyword_matches_title_or_description() {
        let in_title = Entry::new("起業の記事", "https://e.com/1", "", None);
        let in_desc = Entry::new("記事", "https://e.com/2", "起業について", None);
        let neither = Entry::new("記事", "https://e.com/3", "天気", None);
        assert!(in_title.matches_keyword("起業"));
        assert!(in_desc.matches_keyword("起業"));
        assert!(!neither.matches_keyword("起業"));
    }

    #[test]
    fn test_keyword_spanning_title_and_description() {
        // The haystack is the plain concatenation of the two fields.
        let split = Entry::new("新しい起", "https://e.com/4", "業家", None);
        assert!(split.matches_keyword("起業"));
    }

    #[test]
    fn test_published_or_defaults_to_now() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let entry = Entry::new("t", "https://e.com/", "", None);
        assert_eq!(entry.published_or(now), now);
    }
}
