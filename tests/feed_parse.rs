// tests/feed_parse.rs
//
// Fixture-driven parser checks for the two supported feed formats.

use insight_pipeline::feeds::{podcast_rss, youtube_atom};

#[test]
fn podcast_fixture_parses_with_enclosures_and_dates() {
    let xml = include_str!("fixtures/podcast_rss.xml");
    let entries = podcast_rss::parse(xml).unwrap();
    assert_eq!(entries.len(), 3);

    assert_eq!(entries[0].title, "Ep 12 - Schedulers & Sleep");
    assert_eq!(entries[0].url, "https://afterhours.example/episodes/12");
    assert_eq!(
        entries[0].audio_url.as_deref(),
        Some("https://cdn.afterhours.example/ep12.mp3")
    );

    // Item with no <link> falls back to the enclosure URL.
    assert_eq!(entries[2].url, "https://cdn.afterhours.example/bonus.mp3");

    // RFC2822 dates parse and order sensibly.
    assert!(entries[0].published_at > entries[1].published_at);
    assert!(entries[2].published_at > entries[1].published_at);
}

#[test]
fn youtube_fixture_parses_links_and_timestamps() {
    let xml = include_str!("fixtures/youtube_atom.xml");
    let entries = youtube_atom::parse(xml).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].title, "Profiling async Rust in production");
    assert_eq!(entries[0].url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    assert!(entries[0].published_at > entries[1].published_at);
    assert!(entries.iter().all(|e| e.audio_url.is_none()));
}
