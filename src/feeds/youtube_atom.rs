// src/feeds/youtube_atom.rs
//! YouTube channel Atom parsing (quick-xml serde structs).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;

use super::FeedEntry;

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(rename = "entry", default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    title: Option<String>,
    #[serde(rename = "link", default)]
    link: Vec<Link>,
    published: Option<String>,
    #[serde(rename = "yt:videoId")]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(rename = "@href")]
    href: Option<String>,
}

/// Parse a YouTube channel Atom document into feed entries.
pub fn parse(xml: &str) -> Result<Vec<FeedEntry>> {
    let t0 = std::time::Instant::now();
    let feed: Feed = from_str(xml).context("parsing youtube atom xml")?;

    let mut out = Vec::with_capacity(feed.entry.len());
    for e in feed.entry {
        let url = e
            .link
            .iter()
            .find_map(|l| l.href.clone())
            .or_else(|| {
                e.video_id
                    .as_deref()
                    .map(|id| format!("https://www.youtube.com/watch?v={id}"))
            });
        let Some(url) = url else { continue };
        out.push(FeedEntry {
            title: e.title.unwrap_or_else(|| "Untitled video".to_string()),
            url,
            published_at: e
                .published
                .as_deref()
                .and_then(|p| DateTime::parse_from_rfc3339(p).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap_or_default()),
            audio_url: None,
        });
    }

    histogram!("feed_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    counter!("feed_entries_total", "kind" => "youtube_atom").increment(out.len() as u64);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:yt="http://www.youtube.com/xml/schemas/2015">
  <title>Example Channel</title>
  <entry>
    <title>New Video</title>
    <yt:videoId>abc123xyz</yt:videoId>
    <link rel="alternate" href="https://www.youtube.com/watch?v=abc123xyz"/>
    <published>2026-06-02T09:00:00+00:00</published>
  </entry>
</feed>"#;

    #[test]
    fn parses_entries() {
        let entries = parse(SAMPLE).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "New Video");
        assert_eq!(entries[0].url, "https://www.youtube.com/watch?v=abc123xyz");
        assert!(entries[0].audio_url.is_none());
    }
}
